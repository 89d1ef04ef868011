//! Module `i2c` contains the API for I2C mode.
//!
//! Addresses taken by the transaction helpers (`write_to`, `read_from`,
//! `write_read`) are 7-bit; the read/write bit is added here.

use crate::low::{self, Bulk, MAX_BULK, MAX_TRANSFER};
use crate::mode::{attach_channel, BusMode, SubMode};
use crate::{Error, TransferFailure};
use arrayvec::ArrayVec;
use embedded_hal::serial;

/// Highest address probed by `scan`; 0x78 and up are reserved.
pub const LAST_ADDRESS: u8 = 0x77;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Speed50KHz,
    Speed100KHz,
    Speed400KHz,
    Speed1MHz,
}

impl Speed {
    fn code(self) -> u8 {
        match self {
            Speed::Speed50KHz => 0b00,
            Speed::Speed100KHz => 0b01,
            Speed::Speed400KHz => 0b10,
            Speed::Speed1MHz => 0b11,
        }
    }
}

pub struct Config {
    pub pullup: bool,
}

pub const DEFAULT_CONFIG: Config = Config { pullup: false };

impl Config {
    pub(crate) fn command_byte(&self) -> u8 {
        0b0100_0000 | (self.pullup as u8) << 2
    }
}

/// `I2c` represents a HydraBus in I2C mode.
pub struct I2c<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
}

attach_channel!(I2c);

impl<TX, RX, TXErr, RXErr> I2c<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    pub fn set_speed(&mut self, speed: Speed) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[0b0110_0000 | speed.code()])
    }

    pub fn start(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0x02)
    }

    pub fn stop(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0x03)
    }

    /// `read_byte` clocks in one byte. It must be followed by `send_ack` or
    /// `send_nack`.
    pub fn read_byte(&mut self) -> Result<u8, Error<TXErr, RXErr>> {
        self.ch.query(0x04)
    }

    pub fn send_ack(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0x06)
    }

    pub fn send_nack(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0x07)
    }

    /// `write_then_read` sends a start condition, writes `payload`, reads
    /// `response` (ACKing all bytes but the last) and sends a stop
    /// condition. A byte of `payload` that is not acknowledged by the
    /// target is reported as `TransferFailure::Nack`.
    pub fn write_then_read(
        &mut self,
        payload: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.write_then_read(0x08, payload, response)
    }

    /// `bulk_write` writes 1 to 16 bytes without start or stop conditions.
    /// `status` receives one byte per written byte: `0x00` when the target
    /// acknowledged it.
    pub fn bulk_write(&mut self, data: &[u8], status: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.bulk(Bulk::AckThenReply, data, status)
    }

    /// Writes all of `data` in bulk commands, stopping at the first byte the
    /// target does not acknowledge.
    fn write_acked(&mut self, data: &[u8]) -> Result<bool, Error<TXErr, RXErr>> {
        for chunk in data.chunks(MAX_BULK) {
            let mut status = [0u8; MAX_BULK];
            let status = &mut status[..chunk.len()];
            self.bulk_write(chunk, status)?;
            if status.iter().any(|s| *s != 0x00) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn addressed_write(&mut self, address: u8, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.start()?;
        if !self.write_acked(&[address << 1])? || !self.write_acked(data)? {
            log::debug!("I2C target {:#04x} did not acknowledge", address);
            self.stop()?;
            return Err(Error::transfer(TransferFailure::Nack));
        }
        Ok(())
    }

    /// `write_to` writes `data` to the target at `address` in one
    /// transaction.
    pub fn write_to(&mut self, address: u8, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.addressed_write(address, data)?;
        self.stop()
    }

    /// `read_from` reads `buf` from the target at `address` in one
    /// transaction.
    pub fn read_from(&mut self, address: u8, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.write_then_read(&[address << 1 | 1], buf)
    }

    /// `write_read` writes `data` to the target at `address`, then reads
    /// `buf` after a repeated start.
    pub fn write_read(
        &mut self,
        address: u8,
        data: &[u8],
        buf: &mut [u8],
    ) -> Result<(), Error<TXErr, RXErr>> {
        self.addressed_write(address, data)?;
        self.read_from(address, buf)
    }

    /// `scan` probes every address from 1 to `LAST_ADDRESS` and returns the
    /// ones that acknowledged their write address.
    pub fn scan(&mut self) -> Result<ArrayVec<u8, 128>, Error<TXErr, RXErr>> {
        let mut found = ArrayVec::new();
        for addr in 1..=LAST_ADDRESS {
            self.start()?;
            let mut status = [0u8; 1];
            self.bulk_write(&[addr << 1], &mut status)?;
            if status[0] == 0x00 {
                log::debug!("I2C target answered at {:#04x}", addr);
                found.push(addr);
            }
            self.stop()?;
        }
        Ok(found)
    }
}

impl<TX, RX, TXErr, RXErr> BusMode<TX, RX> for I2c<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    const MODE: SubMode = SubMode::I2c;
    type Config = Config;

    fn configure(&mut self, config: &Config) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[config.command_byte()])
    }

    /// Each chunk of up to 4096 bytes is its own start/stop transaction.
    fn write(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        for chunk in data.chunks(MAX_TRANSFER) {
            self.write_then_read(chunk, &mut [])?;
        }
        Ok(())
    }

    /// Reads byte by byte, NACKing the last one.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        let last = buf.len().saturating_sub(1);
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_byte()?;
            if i == last {
                self.send_nack()?;
            } else {
                self.send_ack()?;
            }
        }
        Ok(())
    }
}

/// `Comms` is the part of I2C mode that generic drivers need.
pub trait Comms {
    type Error;

    fn write_to(&mut self, address: u8, data: &[u8]) -> Result<(), Self::Error>;

    fn read_from(&mut self, address: u8, buf: &mut [u8]) -> Result<(), Self::Error>;

    fn write_read(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<(), Self::Error>;
}

impl<TX, RX, TXErr, RXErr> Comms for I2c<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    type Error = Error<TXErr, RXErr>;

    fn write_to(&mut self, address: u8, data: &[u8]) -> Result<(), Self::Error> {
        I2c::write_to(self, address, data)
    }

    fn read_from(&mut self, address: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        I2c::read_from(self, address, buf)
    }

    fn write_read(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<(), Self::Error> {
        I2c::write_read(self, address, data, buf)
    }
}
