//! Module `smartcard` contains the API for ISO 7816-3 smartcard mode.
//!
//! Once TS has been read, every byte exchanged with the card goes through
//! the convention it announced, so callers always see byte values:
//!
//! ```rust,ignore
//! let mut sc = bb.to_smartcard()?;
//! sc.configure(&smartcard::DEFAULT_CONFIG)?;
//! sc.warm_reset(&mut delay)?;
//! let atr = sc.read_atr(AtrOptions::default())?;
//! println!("{}", atr);
//! ```

use crate::atr::{Atr, AtrOptions, AtrParser, ClockRate, Convention, MAX_HISTORICAL};
use crate::low::{self, MAX_TRANSFER};
use crate::mode::{BusMode, SubMode};
use crate::Error;
use arrayvec::ArrayVec;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial;

pub use crate::uart::Speed;

/// Time the card is held in reset by `warm_reset`.
pub const RESET_DELAY_MS: u16 = 200;

/// Largest information field of a T=1 block.
pub const MAX_T1_INFO: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    Half,
    OneAndHalf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

pub struct Config {
    pub clock_polarity_high: bool,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// Have the device itself decode the inverse convention. Leave this off
    /// when the convention is handled by `Smartcard`.
    pub device_inverse: bool,
}

/// Even parity, 1.5 stop bits, direct convention on the device.
pub const DEFAULT_CONFIG: Config = Config {
    clock_polarity_high: false,
    stop_bits: StopBits::OneAndHalf,
    parity: Parity::Even,
    device_inverse: false,
};

impl Config {
    pub(crate) fn command_byte(&self) -> u8 {
        let mut cmd = 0b1000_0000;
        cmd |= self.clock_polarity_high as u8;
        cmd |= ((self.stop_bits == StopBits::OneAndHalf) as u8) << 1;
        cmd |= ((self.parity == Parity::Odd) as u8) << 2;
        cmd |= (self.device_inverse as u8) << 3;
        cmd
    }
}

/// `lrc` is the XOR of `data`, the epilogue of a T=1 block and the check
/// byte of a PPS request.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// `pps_request` builds a PPS request proposing `protocol` and the Fi/Di
/// pair of `rate`.
pub fn pps_request(protocol: u8, rate: ClockRate) -> Option<[u8; 4]> {
    if protocol > 15 || rate.fi_index > 15 || rate.di_index > 15 {
        return None;
    }
    let mut req = [0xff, 0x10 | protocol, rate.fi_index << 4 | rate.di_index, 0];
    req[3] = lrc(&req[..3]);
    Some(req)
}

/// `t1_block` builds a T=1 block: prologue (NAD, PCB, LEN), `info` and the
/// LRC epilogue.
pub fn t1_block(nad: u8, pcb: u8, info: &[u8]) -> Option<ArrayVec<u8, 258>> {
    if info.len() > MAX_T1_INFO {
        return None;
    }
    let mut block = ArrayVec::new();
    block.push(nad);
    block.push(pcb);
    block.push(info.len() as u8);
    block.try_extend_from_slice(info).ok()?;
    let check = lrc(&block);
    block.push(check);
    Some(block)
}

/// `Smartcard` represents a HydraBus in smartcard mode.
pub struct Smartcard<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: low::Channel<TX, RX>,
    convention: Convention,
}

impl<TX, RX> crate::mode::sealed::Attach<TX, RX> for Smartcard<TX, RX>
where
    TX: serial::Write<u8>,
    RX: serial::Read<u8>,
{
    fn attach(ch: low::Channel<TX, RX>) -> Self {
        Self {
            ch,
            convention: Convention::Direct,
        }
    }

    fn detach(self) -> low::Channel<TX, RX> {
        self.ch
    }

    fn channel(&mut self) -> &mut low::Channel<TX, RX> {
        &mut self.ch
    }
}

impl<TX, RX, TXErr, RXErr> Smartcard<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    /// The convention applied to exchanged bytes, taken from the last ATR.
    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn set_convention(&mut self, convention: Convention) {
        self.convention = convention;
    }

    /// `set_rst` drives the card's reset line; low holds the card in reset.
    pub fn set_rst(&mut self, high: bool) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.simple_command(0b0000_0010 | high as u8)
    }

    pub fn set_prescaler(&mut self, prescaler: u8) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[0b0000_0110, prescaler])
    }

    pub fn set_guard_time(&mut self, guard_time: u8) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[0b0000_0111, guard_time])
    }

    /// `set_speed` selects one of the preset baud rates.
    pub fn set_speed(&mut self, speed: Speed) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[0b0110_0000 | speed.code()])
    }

    /// `set_baud` sets an arbitrary baud rate. Only firmware that takes a
    /// 32-bit rate after the speed opcode understands this; older firmware
    /// reads the opcode as the 640 baud preset.
    pub fn set_baud(&mut self, baud: u32) -> Result<(), Error<TXErr, RXErr>> {
        let b = baud.to_be_bytes();
        self.ch.config_command(&[0b0110_0000, b[0], b[1], b[2], b[3]])
    }

    /// `write_then_read` sends `payload` to the card and reads `response`,
    /// applying the current convention both ways.
    pub fn write_then_read(
        &mut self,
        payload: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<TXErr, RXErr>> {
        let conv = self.convention;
        self.ch
            .write_then_read_with(0b0000_0100, payload, response, |b| conv.apply(b))
    }

    /// `warm_reset` restarts the card at the initial 9600 baud so that it
    /// sends its ATR again. Anything received before the reset is released
    /// is dropped.
    pub fn warm_reset<D: DelayMs<u16>>(&mut self, delay: &mut D) -> Result<(), Error<TXErr, RXErr>> {
        log::debug!("smartcard warm reset");
        self.set_rst(true)?;
        self.set_speed(Speed::Baud9600)?;
        self.set_rst(false)?;
        delay.delay_ms(RESET_DELAY_MS);
        self.ch.eat_rx_buffer()?;
        self.set_rst(true)?;
        self.convention = Convention::Direct;
        Ok(())
    }

    /// `read_atr` reads and decodes the Answer To Reset, asking the card for
    /// exactly as many bytes as the structure announces. TS is read as
    /// received; the convention it selects is used from then on.
    pub fn read_atr(&mut self, options: AtrOptions) -> Result<Atr, Error<TXErr, RXErr>> {
        let mut parser = AtrParser::new(options);
        let mut buf = [0u8; MAX_HISTORICAL];
        let mut ts_read = false;

        while parser.needed() > 0 {
            let chunk = &mut buf[..parser.needed()];
            if ts_read {
                self.write_then_read(&[], chunk)?;
            } else {
                self.ch.write_then_read(0b0000_0100, &[], chunk)?;
            }
            for b in chunk.iter() {
                parser.push(*b);
            }
            if !ts_read {
                ts_read = true;
                self.convention = parser.convention();
            }
        }

        let atr = parser.finish();
        log::debug!("ATR read: {:02x?}", atr.raw());
        Ok(atr)
    }

    /// `send_pps` proposes `protocol` and `rate` to the card and returns its
    /// answer. The card accepted when the answer equals the request.
    pub fn send_pps(&mut self, protocol: u8, rate: ClockRate) -> Result<[u8; 4], Error<TXErr, RXErr>> {
        let req =
            pps_request(protocol, rate).ok_or_else(|| Error::request("PPS fields out of range"))?;
        let mut resp = [0u8; 4];
        self.write_then_read(&req, &mut resp)?;
        if resp != req {
            log::warn!("PPS {:02x?} answered {:02x?}", req, resp);
        }
        Ok(resp)
    }

    /// `t1_exchange` sends one T=1 block and reads `response`, which should
    /// be sized for the whole expected block including its epilogue.
    pub fn t1_exchange(
        &mut self,
        nad: u8,
        pcb: u8,
        info: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<TXErr, RXErr>> {
        let block =
            t1_block(nad, pcb, info).ok_or_else(|| Error::request("T=1 information field too long"))?;
        self.write_then_read(&block, response)?;
        if !response.is_empty() && lrc(response) != 0 {
            log::warn!("T=1 response epilogue does not match");
        }
        Ok(())
    }
}

impl<TX, RX, TXErr, RXErr> BusMode<TX, RX> for Smartcard<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    const MODE: SubMode = SubMode::Smartcard;
    type Config = Config;

    fn configure(&mut self, config: &Config) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[config.command_byte()])
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        for chunk in data.chunks(MAX_TRANSFER) {
            self.write_then_read(chunk, &mut [])?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        for chunk in buf.chunks_mut(MAX_TRANSFER) {
            self.write_then_read(&[], chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_bits() {
        assert_eq!(DEFAULT_CONFIG.command_byte(), 0b1000_0010);
        let odd = Config {
            parity: Parity::Odd,
            ..DEFAULT_CONFIG
        };
        assert_eq!(odd.command_byte(), 0b1000_0110);
    }

    #[test]
    fn pps_framing() {
        let req = pps_request(1, ClockRate::from(0x96));
        assert_eq!(req, Some([0xff, 0x11, 0x96, 0x78]));
        assert_eq!(pps_request(16, ClockRate::from(0x11)), None);
    }

    #[test]
    fn t1_framing() {
        let block = t1_block(0x00, 0xc1, &[0xfe]).unwrap();
        assert_eq!(block.as_slice(), &[0x00, 0xc1, 0x01, 0xfe, 0x3e]);
        assert_eq!(lrc(&block), 0);
        assert!(t1_block(0, 0, &[0u8; 255]).is_none());
        assert_eq!(t1_block(0, 0, &[0u8; 254]).map(|b| b.len()), Some(258));
    }
}
