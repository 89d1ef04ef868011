//! Module `rawwire` contains the API for raw-wire mode, a bit-level two or
//! three wire bus with manual control over the clock and data lines.
//!
//! The SWD support in `swd` is built on top of this mode.

use crate::low::{self, Bulk, MAX_BULK};
use crate::mode::{attach_channel, BusMode, SubMode};
use crate::Error;
use embedded_hal::serial;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Speed5KHz,
    Speed50KHz,
    Speed100KHz,
    Speed1MHz,
}

impl Speed {
    fn code(self) -> u8 {
        match self {
            Speed::Speed5KHz => 0b00,
            Speed::Speed50KHz => 0b01,
            Speed::Speed100KHz => 0b10,
            Speed::Speed1MHz => 0b11,
        }
    }
}

pub struct Config {
    pub open_drain: bool,
    pub three_wire: bool,
    pub lsb_first: bool,
}

pub const DEFAULT_CONFIG: Config = Config {
    open_drain: false,
    three_wire: true,
    lsb_first: false,
};

/// Two wires, open drain, least significant bit first.
pub const SWD_CONFIG: Config = Config {
    open_drain: true,
    three_wire: false,
    lsb_first: true,
};

impl Config {
    pub(crate) fn command_byte(&self) -> u8 {
        0b1000_0000
            | (self.open_drain as u8) << 3
            | (self.three_wire as u8) << 2
            | (self.lsb_first as u8) << 1
    }
}

/// `RawWire` represents a HydraBus in raw-wire mode.
pub struct RawWire<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
}

attach_channel!(RawWire);

impl<TX, RX, TXErr, RXErr> RawWire<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    pub fn set_speed(&mut self, speed: Speed) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[0b0110_0000 | speed.code()])
    }

    /// `read_byte` clocks in eight bits.
    pub fn read_byte(&mut self) -> Result<u8, Error<TXErr, RXErr>> {
        self.ch.query(0b0000_0110)
    }

    /// `read_bit` sends one clock tick and samples the data line.
    pub fn read_bit(&mut self) -> Result<bool, Error<TXErr, RXErr>> {
        Ok(self.ch.query(0b0000_0111)? & 1 != 0)
    }

    /// `peek_sda` samples the data line without clocking.
    pub fn peek_sda(&mut self) -> Result<bool, Error<TXErr, RXErr>> {
        Ok(self.ch.query(0b0000_1000)? & 1 != 0)
    }

    /// `clock` sends a single clock tick.
    pub fn clock(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0b0000_1001)
    }

    pub fn set_clk(&mut self, high: bool) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0b0000_1010 | high as u8)
    }

    pub fn set_sda(&mut self, high: bool) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0b0000_1100 | high as u8)
    }

    /// `bulk_transfer` clocks out 1 to 16 bytes and fills `response` with
    /// the bytes sampled on the data line meanwhile. `response` must be as
    /// long as `data`.
    pub fn bulk_transfer(
        &mut self,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.bulk(Bulk::TrailingAckThenReply, data, response)
    }

    /// `bulk_write` clocks out 1 to 16 bytes, discarding what was sampled.
    pub fn bulk_write(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        let mut sampled = [0u8; MAX_BULK];
        let n = data.len().min(MAX_BULK);
        self.bulk_transfer(data, &mut sampled[..n])
    }

    /// `write_bits` clocks out the first `count` (1 to 8) bits of `bits`,
    /// in the configured bit order.
    pub fn write_bits(&mut self, bits: u8, count: u8) -> Result<(), Error<TXErr, RXErr>> {
        if count == 0 || count > 8 {
            return Err(Error::request("bulk bit writes carry 1 to 8 bits"));
        }
        self.ch.write_all(&[0b0011_0000 | (count - 1), bits])?;
        self.ch.flush()?;
        self.ch.transfer_ack()
    }

    /// `bulk_ticks` sends 1 to 16 clock ticks.
    pub fn bulk_ticks(&mut self, count: u8) -> Result<(), Error<TXErr, RXErr>> {
        if count == 0 || count as usize > MAX_BULK {
            return Err(Error::request("bulk clock ticks are limited to 1 to 16"));
        }
        self.ch.simple_command(0b0010_0000 | (count - 1))
    }

    /// `clocks` sends any number of clock ticks, 16 at a time.
    pub fn clocks(&mut self, count: usize) -> Result<(), Error<TXErr, RXErr>> {
        let mut left = count;
        while left > 0 {
            let n = left.min(MAX_BULK);
            self.bulk_ticks(n as u8)?;
            left -= n;
        }
        Ok(())
    }
}

impl<TX, RX, TXErr, RXErr> BusMode<TX, RX> for RawWire<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    const MODE: SubMode = SubMode::RawWire;
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
    fn config_bits() {
        assert_eq!(DEFAULT_CONFIG.command_byte(), 0b1000_0100);
        assert_eq!(SWD_CONFIG.command_byte(), 0b1000_1010);
        assert_eq!(Speed::Speed1MHz.code(), 0b11);
    }
}
