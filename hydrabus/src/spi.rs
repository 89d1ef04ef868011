//! Module `spi` contains the API for SPI mode.
//!
//! ```rust,ignore
//! let mut spi = bb.to_spi()?;
//! spi.configure(&spi::DEFAULT_CONFIG)?;
//! spi.set_speed(spi::Speed::Speed10MHz)?;
//! let mut id = [0u8; 3];
//! spi.write_then_read(&[0x9f], &mut id, true)?;
//! ```

use crate::low::{self, Bulk, MAX_BULK, MAX_TRANSFER};
use crate::mode::{BusMode, SubMode};
use crate::Error;
use embedded_hal::serial;
use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0, MODE_1};

/// `Device` selects which of the two SPI peripherals is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Spi1,
    Spi2,
}

/// `Speed` is a bus clock. The two devices support different sets of speeds;
/// see `Speed::code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Speed160KHz,
    Speed320KHz,
    Speed650KHz,
    Speed1MHz,
    Speed2MHz,
    Speed5MHz,
    Speed10MHz,
    Speed21MHz,
    Speed42MHz,
}

const SPI1_SPEEDS: [Speed; 8] = [
    Speed::Speed320KHz,
    Speed::Speed650KHz,
    Speed::Speed1MHz,
    Speed::Speed2MHz,
    Speed::Speed5MHz,
    Speed::Speed10MHz,
    Speed::Speed21MHz,
    Speed::Speed42MHz,
];

const SPI2_SPEEDS: [Speed; 8] = [
    Speed::Speed160KHz,
    Speed::Speed320KHz,
    Speed::Speed650KHz,
    Speed::Speed1MHz,
    Speed::Speed2MHz,
    Speed::Speed5MHz,
    Speed::Speed10MHz,
    Speed::Speed21MHz,
];

impl Speed {
    /// The 3-bit speed code for this speed on the given device, if that
    /// device supports it.
    pub fn code(self, device: Device) -> Option<u8> {
        let table = match device {
            Device::Spi1 => &SPI1_SPEEDS,
            Device::Spi2 => &SPI2_SPEEDS,
        };
        table.iter().position(|s| *s == self).map(|i| i as u8)
    }

    pub fn hertz(self) -> u32 {
        match self {
            Speed::Speed160KHz => 160_000,
            Speed::Speed320KHz => 320_000,
            Speed::Speed650KHz => 650_000,
            Speed::Speed1MHz => 1_000_000,
            Speed::Speed2MHz => 2_000_000,
            Speed::Speed5MHz => 5_000_000,
            Speed::Speed10MHz => 10_000_000,
            Speed::Speed21MHz => 21_000_000,
            Speed::Speed42MHz => 42_000_000,
        }
    }

    /// `from_hertz` finds the speed with exactly the given clock.
    pub fn from_hertz(hz: u32) -> Option<Speed> {
        SPI1_SPEEDS
            .iter()
            .chain(SPI2_SPEEDS.iter())
            .copied()
            .find(|s| s.hertz() == hz)
    }
}

pub struct Config {
    pub mode: Mode,
    pub device: Device,
}

pub const DEFAULT_CONFIG: Config = Config {
    mode: MODE_1,
    device: Device::Spi2,
};

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: MODE_0,
            device: Device::Spi1,
        }
    }
}

impl Config {
    pub(crate) fn command_byte(&self) -> u8 {
        let mut cmd = 0b10000000 as u8;
        cmd = cmd
            | (match self.mode.polarity {
                Polarity::IdleLow => 0,
                Polarity::IdleHigh => 1,
            } << 2);
        cmd = cmd
            | (match self.mode.phase {
                Phase::CaptureOnFirstTransition => 0,
                Phase::CaptureOnSecondTransition => 1,
            } << 1);
        cmd = cmd
            | (match self.device {
                Device::Spi2 => 0,
                Device::Spi1 => 1,
            } << 0);
        cmd
    }
}

/// `Spi` represents a HydraBus in SPI mode.
pub struct Spi<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
    device: Device,
}

impl<TX, RX> crate::mode::sealed::Attach<TX, RX> for Spi<TX, RX>
where
    TX: serial::Write<u8>,
    RX: serial::Read<u8>,
{
    fn attach(ch: low::Channel<TX, RX>) -> Self {
        // The device comes up on SPI1 until told otherwise.
        Self {
            ch,
            device: Device::Spi1,
        }
    }

    fn detach(self) -> low::Channel<TX, RX> {
        self.ch
    }

    fn channel(&mut self) -> &mut low::Channel<TX, RX> {
        &mut self.ch
    }
}

impl<TX, RX, TXErr, RXErr> Spi<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    /// The device selected by the last successful `configure`.
    pub fn device(&self) -> Device {
        self.device
    }

    /// `set_speed` changes the clock of the current device. Speeds that the
    /// current device does not support are rejected without sending anything.
    pub fn set_speed(&mut self, speed: Speed) -> Result<(), Error<TXErr, RXErr>> {
        let code = speed
            .code(self.device)
            .ok_or_else(|| Error::request("speed not supported by this SPI device"))?;
        self.ch.config_command(&[0b0110_0000 | code])
    }

    /// `set_cs` drives the chip select line: `false` is asserted (low).
    pub fn set_cs(&mut self, high: bool) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0b0000_0010 | high as u8)
    }

    /// `write_then_read` writes `payload` and then clocks in `response`,
    /// both limited to 4096 bytes. With `drive_cs` the device asserts chip
    /// select around the whole exchange; otherwise it is left as it is.
    pub fn write_then_read(
        &mut self,
        payload: &[u8],
        response: &mut [u8],
        drive_cs: bool,
    ) -> Result<(), Error<TXErr, RXErr>> {
        let opcode = if drive_cs { 0b0000_0100 } else { 0b0000_0101 };
        self.ch.write_then_read(opcode, payload, response)
    }

    /// `bulk_transfer` sends 1 to 16 bytes and returns the bytes clocked in
    /// at the same time in `response`, which must have the same length.
    pub fn bulk_transfer(&mut self, data: &[u8], response: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.bulk(Bulk::AckThenReply, data, response)
    }

    /// `transfer` clocks out `words` and replaces them with the bytes clocked
    /// in, in chunks of 16.
    pub fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Error<TXErr, RXErr>> {
        for chunk in words.chunks_mut(MAX_BULK) {
            let mut got = [0u8; MAX_BULK];
            let got = &mut got[..chunk.len()];
            self.bulk_transfer(chunk, got)?;
            chunk.copy_from_slice(got);
        }
        Ok(words)
    }
}

impl<TX, RX, TXErr, RXErr> BusMode<TX, RX> for Spi<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    const MODE: SubMode = SubMode::Spi;
    type Config = Config;

    fn configure(&mut self, config: &Config) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[config.command_byte()])?;
        self.device = config.device;
        Ok(())
    }

    /// Writes without touching chip select; the bytes clocked in are dropped.
    fn write(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        for chunk in data.chunks(MAX_TRANSFER) {
            self.write_then_read(chunk, &mut [], false)?;
        }
        Ok(())
    }

    /// Reads by clocking out `0xff`, without touching chip select.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        for b in buf.iter_mut() {
            *b = 0xff;
        }
        self.transfer(buf)?;
        Ok(())
    }
}

/// `Comms` is the part of SPI mode that generic drivers need.
pub trait Comms {
    type Error;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error>;

    fn transaction(&mut self, write: &[u8], read: &mut [u8], drive_cs: bool) -> Result<(), Self::Error>;
}

impl<TX, RX, TXErr, RXErr> Comms for Spi<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    type Error = Error<TXErr, RXErr>;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        Spi::transfer(self, words)
    }

    fn transaction(&mut self, write: &[u8], read: &mut [u8], drive_cs: bool) -> Result<(), Self::Error> {
        self.write_then_read(write, read, drive_cs)
    }
}
