//! Module `mode` contains the capabilities shared by every bus mode.
//!
//! Each bus mode type (`spi::Spi`, `i2c::I2c`, and so on) implements
//! [`BusMode`], which gives access to configuration, raw writes and reads,
//! the auxiliary pins, and the transitions back to the root binary mode or
//! to the console. The set of modes is closed: `BusMode` cannot be
//! implemented outside of this crate.

use crate::auxpin::Aux;
use crate::bitbang::BitBang;
use crate::low;
use crate::{Error, Hydrabus};
use embedded_hal::serial;

/// `SubMode` enumerates the bus modes reachable from the root binary mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMode {
    Spi,
    I2c,
    Uart,
    OneWire,
    RawWire,
    Smartcard,
}

impl SubMode {
    /// The byte that selects this mode from the root binary mode.
    pub fn command(self) -> u8 {
        match self {
            SubMode::Spi => 0x01,
            SubMode::I2c => 0x02,
            SubMode::Uart => 0x03,
            SubMode::OneWire => 0x04,
            SubMode::RawWire => 0x05,
            SubMode::Smartcard => 0x0b,
        }
    }

    /// The four byte banner the device answers with once in this mode.
    pub fn banner(self) -> &'static [u8; 4] {
        match self {
            SubMode::Spi => b"SPI1",
            SubMode::I2c => b"I2C1",
            SubMode::Uart => b"ART1",
            SubMode::OneWire => b"1W01",
            SubMode::RawWire => b"RAW1",
            SubMode::Smartcard => b"CRD1",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SubMode::Spi => "SPI mode",
            SubMode::I2c => "I2C mode",
            SubMode::Uart => "UART mode",
            SubMode::OneWire => "1-Wire mode",
            SubMode::RawWire => "raw-wire mode",
            SubMode::Smartcard => "smartcard mode",
        }
    }
}

pub(crate) mod sealed {
    use crate::low::Channel;
    use embedded_hal::serial;

    pub trait Attach<TX: serial::Write<u8>, RX: serial::Read<u8>>: Sized {
        fn attach(ch: Channel<TX, RX>) -> Self;
        fn detach(self) -> Channel<TX, RX>;
        fn channel(&mut self) -> &mut Channel<TX, RX>;
    }
}

/// `BusMode` is implemented by every bus mode object.
pub trait BusMode<TX, RX>: sealed::Attach<TX, RX>
where
    TX: serial::Write<u8>,
    RX: serial::Read<u8>,
{
    /// The sub-mode this type speaks.
    const MODE: SubMode;

    /// The mode's configuration, turned into a single command byte.
    type Config;

    /// `configure` sends the configuration command for this mode. Any reply
    /// other than ACK is reported as `Error::Configuration`.
    fn configure(&mut self, config: &Self::Config) -> Result<(), Error<TX::Error, RX::Error>>;

    /// `write` sends `data` on the bus, splitting it into as many commands as
    /// needed.
    fn write(&mut self, data: &[u8]) -> Result<(), Error<TX::Error, RX::Error>>;

    /// `read` fills `buf` from the bus.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<TX::Error, RX::Error>>;

    /// `identify` asks the device for the banner of the current mode.
    fn identify(&mut self) -> Result<[u8; 4], Error<TX::Error, RX::Error>> {
        let ch = self.channel();
        ch.write_all(&[0x01])?;
        ch.flush()?;
        let mut banner = [0u8; 4];
        ch.read_exact(&mut banner)?;
        Ok(banner)
    }

    /// `aux` gives access to the auxiliary pins, which work the same way in
    /// every mode.
    fn aux(&mut self) -> Aux<'_, TX, RX> {
        Aux::new(self.channel())
    }

    /// `exit` returns to the root binary mode.
    fn exit(self) -> Result<BitBang<TX, RX>, Error<TX::Error, RX::Error>> {
        log::debug!("leaving {}", Self::MODE.name());
        crate::binary_reset_handshake(self.detach())
    }

    /// `close` returns all the way to the console.
    fn close(self) -> Result<Hydrabus<TX, RX>, Error<TX::Error, RX::Error>> {
        self.exit()?.close()
    }
}

/// Implements `sealed::Attach` for a mode type holding a `ch` field.
macro_rules! attach_channel {
    ($mode:ident) => {
        impl<TX, RX> crate::mode::sealed::Attach<TX, RX> for $mode<TX, RX>
        where
            TX: embedded_hal::serial::Write<u8>,
            RX: embedded_hal::serial::Read<u8>,
        {
            fn attach(ch: crate::low::Channel<TX, RX>) -> Self {
                Self { ch }
            }

            fn detach(self) -> crate::low::Channel<TX, RX> {
                self.ch
            }

            fn channel(&mut self) -> &mut crate::low::Channel<TX, RX> {
                &mut self.ch
            }
        }
    };
}

pub(crate) use attach_channel;

pub(crate) fn enter<M, TX, RX>(ch: low::Channel<TX, RX>) -> Result<M, Error<TX::Error, RX::Error>>
where
    M: BusMode<TX, RX>,
    TX: serial::Write<u8>,
    RX: serial::Read<u8>,
{
    let ch = crate::binary_mode_handshake(ch, M::MODE)?;
    Ok(M::attach(ch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bytes_and_banners() {
        let all = [
            SubMode::Spi,
            SubMode::I2c,
            SubMode::Uart,
            SubMode::OneWire,
            SubMode::RawWire,
            SubMode::Smartcard,
        ];
        let bytes: [u8; 6] = [1, 2, 3, 4, 5, 0x0b];
        for (mode, byte) in all.iter().zip(bytes.iter()) {
            assert_eq!(mode.command(), *byte);
            assert_eq!(mode.banner().len(), 4);
        }
        assert_eq!(SubMode::Uart.banner(), b"ART1");
        assert_eq!(SubMode::OneWire.banner(), b"1W01");
    }
}
