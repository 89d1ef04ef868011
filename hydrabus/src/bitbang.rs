//! Module `bitbang` contains the API for the root binary mode.
//!
//! This mode cannot be entered directly. Instead, create a `Hydrabus` object
//! (from the root module of this crate) and call `to_bitbang` on it:
//!
//! ```rust,ignore
//! let hb = Hydrabus::new(tx, rx);
//! let bb = hb.to_bitbang()?;
//! ```
//!
//! The result of `to_bitbang` is an instance of `BitBang`.

use crate::low;
use crate::mode::{self, BusMode};
use crate::Error;
use crate::Hydrabus;
use embedded_hal::serial;

/// `BitBang` represents a HydraBus device in the root binary mode.
///
/// This mode serves both as an interface to a few board utilities (ADC,
/// frequency counter) and as an intermediate step to reach the bus modes.
pub struct BitBang<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    pub(crate) ch: low::Channel<TX, RX>,
}

/// `Frequency` is the result of the on-board frequency counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequency {
    pub hertz: u32,
    pub duty_cycle: u32,
}

impl<TX, RX, TXErr, RXErr> BitBang<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    /// `close` resets the HydraBus back into its console mode, exiting
    /// binary mode.
    pub fn close(self) -> Result<Hydrabus<TX, RX>, Error<TXErr, RXErr>> {
        crate::close_handshake(self.ch)
    }

    /// `enter` switches to the bus mode `M`.
    ///
    /// This consumes the `BitBang` object. To retrieve it, call `exit` on the
    /// resulting mode object. If the device does not answer with the
    /// expected banner, it is sent back to the console and
    /// `Error::Protocol` is returned.
    pub fn enter<M: BusMode<TX, RX>>(self) -> Result<M, Error<TXErr, RXErr>> {
        mode::enter(self.ch)
    }

    /// `to_spi` switches to SPI mode.
    pub fn to_spi(self) -> Result<crate::spi::Spi<TX, RX>, Error<TXErr, RXErr>> {
        self.enter()
    }

    /// `to_i2c` switches to I2C mode.
    pub fn to_i2c(self) -> Result<crate::i2c::I2c<TX, RX>, Error<TXErr, RXErr>> {
        self.enter()
    }

    /// `to_uart` switches to UART mode.
    pub fn to_uart(self) -> Result<crate::uart::Uart<TX, RX>, Error<TXErr, RXErr>> {
        self.enter()
    }

    /// `to_onewire` switches to 1-Wire mode.
    pub fn to_onewire(self) -> Result<crate::onewire::OneWire<TX, RX>, Error<TXErr, RXErr>> {
        self.enter()
    }

    /// `to_rawwire` switches to raw-wire mode.
    pub fn to_rawwire(self) -> Result<crate::rawwire::RawWire<TX, RX>, Error<TXErr, RXErr>> {
        self.enter()
    }

    /// `to_smartcard` switches to smartcard mode.
    pub fn to_smartcard(
        self,
    ) -> Result<crate::smartcard::Smartcard<TX, RX>, Error<TXErr, RXErr>> {
        self.enter()
    }

    /// `read_adc` samples the on-board ADC (pin PA1) once.
    pub fn read_adc(&mut self) -> Result<u16, Error<TXErr, RXErr>> {
        self.ch.write_all(&[0b0001_0100])?;
        self.ch.flush()?;
        let mut v = [0u8; 2];
        self.ch.read_exact(&mut v)?;
        Ok(u16::from_be_bytes(v))
    }

    /// `frequency` runs the on-board frequency counter (pin PC6) once.
    pub fn frequency(&mut self) -> Result<Frequency, Error<TXErr, RXErr>> {
        self.ch.write_all(&[0b0001_0110])?;
        self.ch.flush()?;
        let mut v = [0u8; 8];
        self.ch.read_exact(&mut v)?;
        Ok(Frequency {
            hertz: u32::from_le_bytes([v[0], v[1], v[2], v[3]]),
            duty_cycle: u32::from_le_bytes([v[4], v[5], v[6], v[7]]),
        })
    }
}
