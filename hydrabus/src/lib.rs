//! HydraBus client library
//!
//! This library implements the [HydraBus](https://hydrabus.com/) binary
//! "bit-bang" protocol, allowing Rust programs to drive a HydraBus and in turn
//! to interact with SPI, I2C, UART, 1-Wire, raw-wire, SWD and ISO 7816
//! smartcard devices.
//!
//! The library API uses types to ensure safe switching between the different
//! HydraBus modes and to provide functions relating only to the current mode.
//! At initialization, the HydraBus is assumed to be in its normal console
//! mode, and so the first step implemented by this library is to switch into
//! binary mode. After that, the caller may transition into the bus modes as
//! desired.
//!
//! The entry point is `Hydrabus::new`, which takes (and consumes) a serial
//! writer and a serial reader as defined by
//! [`embedded_hal::serial`](https://docs.rs/embedded-hal/0.2.3/embedded_hal/serial/).
//! If you are running on a general computing platform then you can use
//! [`serial_embedded_hal`](https://docs.rs/serial-embedded-hal/0.1.2/serial_embedded_hal/struct.Serial.html)
//! to connect with a serial port provided by your operating system:
//!
//! ```rust,ignore
//! let port = Serial::new(
//!     "/dev/ttyACM0",
//!     &PortSettings {
//!         baud_rate: serial_embedded_hal::BaudRate::Baud115200,
//!         char_size: serial_embedded_hal::CharSize::Bits8,
//!         parity: serial_embedded_hal::Parity::ParityNone,
//!         stop_bits: serial_embedded_hal::StopBits::Stop1,
//!         flow_control: serial_embedded_hal::FlowControl::FlowNone,
//!     },
//! )?;
//! let (tx, rx) = port.split();
//! let hb = Hydrabus::new(tx, rx);
//! ```
//!
//! A `Hydrabus` object represents a HydraBus in console mode, not yet
//! configured to speak the binary protocol. Method `to_bitbang` transitions
//! into the root binary mode, yielding a `bitbang::BitBang` object:
//!
//! ```rust,ignore
//! let bb = hb.to_bitbang()?;
//! ```
//!
//! The root binary mode is the gateway into the bus modes. For example, SPI
//! mode:
//!
//! ```rust,ignore
//! let mut spi = bb.to_spi()?;
//! spi.configure(&spi::DEFAULT_CONFIG)?;
//! ```
//!
//! Every bus mode implements [`mode::BusMode`], and can be turned back into
//! the root mode with `exit` or all the way back to the console with `close`.
//!
//! Smartcard Answer To Reset decoding lives in [`atr`], independent of any
//! transport, and SPI NOR flash helpers live in [`flash`].

#![cfg_attr(not(feature = "std"), no_std)]

pub mod atr;
pub mod auxpin;
pub mod bitbang;
pub mod flash;
pub mod i2c;
mod low;
pub mod mode;
pub mod onewire;
pub mod rawwire;
pub mod smartcard;
pub mod spi;
pub mod swd;
pub mod uart;

use core::fmt;
use embedded_hal::serial;
use snafu::Snafu;

pub use mode::{BusMode, SubMode};

const PROTO_VERSION_MSG: [u8; 5] = *b"BBIO1";

/// Number of `0x00` bytes sent while waiting for the binary mode banner.
pub const BANNER_ATTEMPTS: u32 = 20;

/// `Hydrabus` represents a HydraBus device in its normal console mode, not
/// yet initialized into the binary mode.
///
/// The primary method on `Hydrabus` is `to_bitbang`, which transitions the
/// device into the root binary mode. That mode then also allows transitions
/// into the bus modes.
///
/// ```rust,ignore
/// let bb = hb.to_bitbang()?;
/// ```
#[derive(Debug, Clone)]
pub struct Hydrabus<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
}

impl<TX, RX, TXErr, RXErr> Hydrabus<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    /// `Hydrabus::new` associates some serial channels with a new `Hydrabus`
    /// object.
    ///
    /// The transmit and receive objects are consumed. If the caller needs to
    /// access them again, it must call `release` to discard the `Hydrabus`
    /// object and recover the original objects.
    pub fn new(tx: TX, rx: RX) -> Self {
        Self {
            ch: low::Channel::new(tx, rx),
        }
    }

    /// `with_patience` sets how many consecutive empty reads are tolerated
    /// while waiting for a status reply before it is treated as absent.
    ///
    /// Each empty read is one expiry of the underlying serial reader's own
    /// timeout, so the effective deadline is `patience` times that timeout.
    pub fn with_patience(mut self, patience: u32) -> Self {
        self.ch.patience = patience.max(1);
        self
    }

    /// `to_bitbang` directs the HydraBus to move into the root binary mode.
    ///
    /// Anything waiting in the receive buffer (console prompts and the like)
    /// is discarded first, then `0x00` is sent up to [`BANNER_ATTEMPTS`]
    /// times until the `BBIO1` banner comes back.
    ///
    /// `to_bitbang` consumes the `Hydrabus` object and returns a `BitBang`
    /// object in its place. To recover the `Hydrabus` object, call `close`
    /// on the `BitBang` object to reset the HydraBus back into console mode.
    pub fn to_bitbang(mut self) -> Result<bitbang::BitBang<TX, RX>, Error<TXErr, RXErr>> {
        self.ch.eat_rx_buffer()?;
        binary_reset_handshake(self.ch)
    }

    /// `release` returns the serial transmit and receive objects wrapped by
    /// the `Hydrabus` object.
    ///
    /// This consumes the `Hydrabus` object.
    pub fn release(self) -> (TX, RX) {
        (self.ch.tx, self.ch.rx)
    }
}

/// `TransferFailure` describes why a framed exchange was not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    /// The device answered `0x00`.
    Nack,
    /// The device did not answer at all.
    Timeout,
    /// The device answered with a byte that is neither ACK nor NACK.
    Unexpected(u8),
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFailure::Nack => write!(f, "device answered NACK"),
            TransferFailure::Timeout => write!(f, "no answer from device"),
            TransferFailure::Unexpected(b) => write!(f, "unexpected answer {:#04x}", b),
        }
    }
}

/// `Error` represents communication errors.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error<TXErr, RXErr> {
    /// `Write` indicates that the underlying serial write object returned an
    /// error.
    ///
    /// The data is the error returned by the underlying serial implementation.
    #[snafu(display("serial write failed"))]
    Write { error: TXErr },

    /// `Read` indicates that the underlying serial read object returned an
    /// error.
    ///
    /// The data is the error returned by the underlying serial implementation.
    #[snafu(display("serial read failed"))]
    Read { error: RXErr },

    /// `Protocol` indicates that the binary mode banner or a mode
    /// acknowledgement never arrived or did not match. A fresh session can
    /// be attempted.
    #[snafu(display("unexpected reply while entering {}", stage))]
    Protocol { stage: &'static str },

    /// `Configuration` indicates that the device (or a device behind it)
    /// rejected a configuration or status-checked command. No further bus
    /// operations should be issued.
    #[snafu(display("device rejected command {:#04x}", command))]
    Configuration { command: u8 },

    /// `Transfer` indicates that a framed exchange was not acknowledged. The
    /// device is in an undefined sub-state and binary mode must be
    /// re-entered before continuing.
    #[snafu(display("transfer failed: {}", reason))]
    Transfer { reason: TransferFailure },

    /// `Request` indicates that the caller provided invalid arguments that
    /// could not be checked at compile time. Nothing was sent.
    #[snafu(display("invalid request: {}", reason))]
    Request { reason: &'static str },

    /// `RetryExhausted` indicates that a bounded retry loop gave up.
    #[snafu(display("gave up waiting for {} after {} attempts", what, attempts))]
    RetryExhausted { what: &'static str, attempts: u32 },
}

impl<TXErr, RXErr> Error<TXErr, RXErr> {
    fn tx(got: TXErr) -> Self {
        Error::Write { error: got }
    }

    fn rx(got: RXErr) -> Self {
        Error::Read { error: got }
    }

    pub(crate) fn request(reason: &'static str) -> Self {
        Error::Request { reason }
    }

    pub(crate) fn transfer(reason: TransferFailure) -> Self {
        Error::Transfer { reason }
    }

    /// Reports whether starting over with a fresh session (binary mode
    /// banner wait) is a reasonable reaction to this error.
    pub fn is_session_retryable(&self) -> bool {
        matches!(self, Error::Protocol { .. })
    }

    /// Reports whether this error leaves the device in an undefined state,
    /// so that binary mode has to be re-entered before any further command.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            Error::Transfer { .. } | Error::Configuration { .. } | Error::RetryExhausted { .. }
        )
    }
}

fn binary_mode_handshake<TX: serial::Write<u8>, RX: serial::Read<u8>>(
    mut ch: low::Channel<TX, RX>,
    mode: SubMode,
) -> Result<low::Channel<TX, RX>, Error<TX::Error, RX::Error>> {
    // A mode byte means something else once the mode is active, so unlike
    // the banner wait this is never retried.
    let patience = ch.patience;
    let ok = match ch.handshake(mode.command(), mode.banner(), 1, patience) {
        Ok(ok) => ok,
        Err(e) => {
            ch.abandon();
            return Err(e);
        }
    };

    if !ok {
        log::debug!("no {:?} banner, returning to console", mode);
        ch.abandon();
        return Err(Error::Protocol {
            stage: mode.name(),
        });
    }

    ch.eat_rx_buffer()?;
    log::debug!("entered {:?} mode", mode);

    Ok(ch)
}

fn binary_reset_handshake<TX: serial::Write<u8>, RX: serial::Read<u8>>(
    mut ch: low::Channel<TX, RX>,
) -> Result<bitbang::BitBang<TX, RX>, Error<TX::Error, RX::Error>> {
    if !ch.handshake(0x00, &PROTO_VERSION_MSG, BANNER_ATTEMPTS, 1)? {
        return Err(Error::Protocol {
            stage: "binary mode",
        });
    }

    ch.eat_rx_buffer()?;
    log::debug!("entered binary mode");

    Ok(bitbang::BitBang { ch })
}

fn close_handshake<TX: serial::Write<u8>, RX: serial::Read<u8>>(
    mut ch: low::Channel<TX, RX>,
) -> Result<Hydrabus<TX, RX>, Error<TX::Error, RX::Error>> {
    ch.write_all(&[0b00001111, b'\n'])?;
    ch.flush()?;
    log::debug!("returned to console mode");
    Ok(Hydrabus { ch })
}
