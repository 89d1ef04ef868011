//! Module `uart` contains the API for UART mode.
//!
//! Bytes received on the bus are only forwarded to the host while echo is
//! enabled, and `read` returns whatever was forwarded:
//!
//! ```rust,ignore
//! let mut uart = bb.to_uart()?;
//! uart.set_baud(115_200)?;
//! uart.set_echo(true)?;
//! uart.write(b"AT\r\n")?;
//! let mut reply = [0u8; 4];
//! uart.read(&mut reply)?;
//! ```

use crate::low::{self, Bulk, MAX_BULK};
use crate::mode::{attach_channel, BusMode, SubMode};
use crate::Error;
use embedded_hal::serial;

/// `Speed` is one of the preset baud rates selectable with a single
/// command byte. Arbitrary rates are set with `Uart::set_baud`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Baud640,
    Baud1200,
    Baud2400,
    Baud4800,
    Baud9600,
    Baud19200,
    Baud31250,
    Baud38400,
    Baud57600,
    Baud115200,
}

impl Speed {
    pub(crate) fn code(self) -> u8 {
        match self {
            Speed::Baud640 => 0,
            Speed::Baud1200 => 1,
            Speed::Baud2400 => 2,
            Speed::Baud4800 => 3,
            Speed::Baud9600 => 4,
            Speed::Baud19200 => 5,
            Speed::Baud31250 => 6,
            Speed::Baud38400 => 7,
            Speed::Baud57600 => 8,
            // 9 is not a valid code
            Speed::Baud115200 => 10,
        }
    }

    pub fn baud(self) -> u32 {
        match self {
            Speed::Baud640 => 640,
            Speed::Baud1200 => 1200,
            Speed::Baud2400 => 2400,
            Speed::Baud4800 => 4800,
            Speed::Baud9600 => 9600,
            Speed::Baud19200 => 19200,
            Speed::Baud31250 => 31250,
            Speed::Baud38400 => 38400,
            Speed::Baud57600 => 57600,
            Speed::Baud115200 => 115_200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

pub struct Config {
    pub parity: Parity,
    pub two_stop_bits: bool,
}

/// 8N1.
pub const DEFAULT_CONFIG: Config = Config {
    parity: Parity::None,
    two_stop_bits: false,
};

impl Config {
    pub(crate) fn command_byte(&self) -> u8 {
        let parity = match self.parity {
            Parity::None => 0b00,
            Parity::Even => 0b01,
            Parity::Odd => 0b10,
        };
        0b1000_0000 | parity << 2 | (self.two_stop_bits as u8) << 1
    }
}

/// `Uart` represents a HydraBus in UART mode.
pub struct Uart<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
}

attach_channel!(Uart);

impl<TX, RX, TXErr, RXErr> Uart<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    pub fn set_speed(&mut self, speed: Speed) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[0b0110_0000 | speed.code()])
    }

    /// `set_baud` sets an arbitrary baud rate.
    pub fn set_baud(&mut self, baud: u32) -> Result<(), Error<TXErr, RXErr>> {
        let b = baud.to_be_bytes();
        self.ch.config_command(&[0b0000_0111, b[0], b[1], b[2], b[3]])
    }

    /// `set_echo` turns forwarding of received bytes to the host on or off.
    pub fn set_echo(&mut self, on: bool) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0b0000_0010 | !on as u8)
    }

    /// `bulk_write` sends 1 to 16 bytes.
    pub fn bulk_write(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        let mut acks = [0u8; MAX_BULK];
        let n = data.len().min(MAX_BULK);
        self.ch.bulk(Bulk::AckPerByte, data, &mut acks[..n])
    }

    /// `bridge` connects the host serial port straight to the bus. The
    /// device stays bridged until its user button is pressed.
    pub fn bridge(mut self) -> Result<Bridge<TX, RX>, Error<TXErr, RXErr>> {
        self.ch.write_all(&[0b0000_1111])?;
        self.ch.flush()?;
        log::info!("UART bridge active, press the HydraBus button to leave");
        Ok(Bridge { ch: self.ch })
    }
}

/// `Bridge` is a HydraBus forwarding bytes between the host and its UART.
pub struct Bridge<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
}

impl<TX, RX, TXErr, RXErr> Bridge<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    /// The serial writer and reader, which now talk to the bus directly.
    pub fn port(&mut self) -> (&mut TX, &mut RX) {
        (&mut self.ch.tx, &mut self.ch.rx)
    }

    /// `wait_end` blocks until the user leaves the bridge and returns to UART
    /// mode. Bytes still arriving from the bus before the final ACK are
    /// dropped.
    pub fn wait_end(mut self) -> Result<Uart<TX, RX>, Error<TXErr, RXErr>> {
        while self.ch.read()? != low::ACK {}
        log::info!("UART bridge closed");
        Ok(Uart { ch: self.ch })
    }
}

impl<TX, RX, TXErr, RXErr> BusMode<TX, RX> for Uart<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    const MODE: SubMode = SubMode::Uart;
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

    /// Blocks until `buf` is filled with echoed bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.read_exact(buf)
    }
}
