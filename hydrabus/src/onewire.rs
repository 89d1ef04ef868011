//! Module `onewire` contains the API for 1-Wire mode.

use crate::low::{self, Bulk, MAX_BULK};
use crate::mode::{attach_channel, BusMode, SubMode};
use crate::Error;
use embedded_hal::serial;

pub struct Config {
    pub pullup: bool,
}

pub const DEFAULT_CONFIG: Config = Config { pullup: true };

impl Config {
    pub(crate) fn command_byte(&self) -> u8 {
        0b0100_0000 | (self.pullup as u8) << 2
    }
}

/// `OneWire` represents a HydraBus in 1-Wire mode.
pub struct OneWire<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
}

attach_channel!(OneWire);

impl<TX, RX, TXErr, RXErr> OneWire<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    /// `reset` sends a bus reset pulse.
    ///
    /// Some firmware versions answer with a byte and others stay silent, so
    /// one answer is consumed if it arrives in time.
    pub fn reset(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.write_all(&[0b0000_0010])?;
        self.ch.flush()?;
        if let Some(b) = self.ch.reply()? {
            log::trace!("1-Wire reset answered {:#04x}", b);
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8, Error<TXErr, RXErr>> {
        self.ch.query(0b0000_0100)
    }

    /// `bulk_write` sends 1 to 16 bytes.
    pub fn bulk_write(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.bulk(Bulk::TrailingAck, data, &mut [])
    }
}

impl<TX, RX, TXErr, RXErr> BusMode<TX, RX> for OneWire<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    const MODE: SubMode = SubMode::OneWire;
    type Config = Config;

    fn configure(&mut self, config: &Config) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[config.command_byte()])
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        for chunk in data.chunks(MAX_BULK) {
            self.bulk_write(chunk)?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        for b in buf.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pullup_is_on_by_default() {
        assert_eq!(DEFAULT_CONFIG.command_byte(), 0b0100_0100);
        assert_eq!(Config { pullup: false }.command_byte(), 0b0100_0000);
    }
}
