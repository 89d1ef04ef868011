//! Module `swd` implements ARM Serial Wire Debug on top of raw-wire mode.
//!
//! ```rust,ignore
//! let mut wire = bb.to_rawwire()?;
//! let mut swd = Swd::new(&mut wire)?;
//! swd.bus_init()?;
//! let idcode = swd.read_dp(0x0)?;
//! swd.power_up()?;
//! for (ap, idr) in swd.scan()?.iter() {
//!     println!("AP {:#04x}: {:#010x}", ap, idr);
//! }
//! ```

use crate::mode::BusMode;
use crate::rawwire::{RawWire, SWD_CONFIG};
use crate::{Error, TransferFailure};
use arrayvec::ArrayVec;
use embedded_hal::serial;

/// How many times a request answered with WAIT is retried by default.
pub const DEFAULT_WAIT_RETRIES: u32 = 8;

const ACK_OK: u8 = 0b001;
const ACK_WAIT: u8 = 0b010;

/// Line reset, JTAG-to-SWD select sequence, line reset.
const JTAG_TO_SWD: [u8; 15] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7b, 0x9e, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x0f,
];

/// DP registers.
pub const DP_IDCODE: u8 = 0x0;
pub const DP_ABORT: u8 = 0x0;
pub const DP_CTRL_STAT: u8 = 0x4;
pub const DP_SELECT: u8 = 0x8;
pub const DP_RDBUFF: u8 = 0xc;

/// CSYSPWRUPREQ and CDBGPWRUPREQ.
const POWER_UP_REQUEST: u32 = 0x5000_0000;

/// AP identification register.
pub const AP_IDR: u8 = 0xfc;

/// `request_byte` builds the 8-bit packet request for a register access:
/// start, APnDP, RnW, A[3:2], parity, stop and park.
pub fn request_byte(read: bool, ap: bool, addr: u8) -> u8 {
    let mut cmd = if read { 0x85 } else { 0x81 };
    cmd |= (ap as u8) << 1;
    cmd |= (addr & 0b1100) << 1;
    if (cmd & 0b0001_1110).count_ones() % 2 == 1 {
        cmd |= 1 << 5;
    }
    cmd
}

fn parity_byte(value: u32) -> u8 {
    (value.count_ones() % 2) as u8
}

/// `Swd` drives an SWD target through a HydraBus in raw-wire mode.
///
/// It borrows the raw-wire mode object, so that the caller can still leave
/// the mode cleanly once done.
pub struct Swd<'a, TX: serial::Write<u8>, RX: serial::Read<u8>> {
    wire: &'a mut RawWire<TX, RX>,
    retries: u32,
}

impl<'a, TX, RX, TXErr, RXErr> Swd<'a, TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    /// `new` switches the raw-wire mode to the SWD line configuration.
    pub fn new(wire: &'a mut RawWire<TX, RX>) -> Result<Self, Error<TXErr, RXErr>> {
        wire.configure(&SWD_CONFIG)?;
        Ok(Self {
            wire,
            retries: DEFAULT_WAIT_RETRIES,
        })
    }

    /// `with_retries` sets how many WAIT answers are tolerated per access.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// `bus_init` moves the target from JTAG to SWD and idles the line.
    pub fn bus_init(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        log::debug!("SWD line reset");
        self.wire.write(&JTAG_TO_SWD)?;
        self.sync()
    }

    fn sync(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.wire.bulk_write(&[0x00])
    }

    /// Sends the request and returns the three ACK bits.
    fn request(&mut self, cmd: u8) -> Result<u8, Error<TXErr, RXErr>> {
        self.wire.bulk_write(&[cmd])?;
        let mut status = 0;
        for i in 0..3 {
            status |= (self.wire.read_bit()? as u8) << i;
        }
        log::trace!("SWD request {:#04x} answered {:#05b}", cmd, status);
        Ok(status)
    }

    fn write_data(&mut self, value: u32) -> Result<(), Error<TXErr, RXErr>> {
        self.wire.bulk_write(&value.to_le_bytes())?;
        self.wire.bulk_write(&[parity_byte(value)])
    }

    /// Clears the sticky error flags. Its own status is not checked, so a
    /// target that keeps answering WAIT cannot make it recurse.
    fn abort(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        let status = self.request(request_byte(false, false, DP_ABORT))?;
        self.wire.clocks(2)?;
        if status == ACK_OK {
            self.write_data(0x1f)
        } else {
            log::warn!("SWD abort answered {:#05b}", status);
            self.sync()
        }
    }

    fn read_register(&mut self, ap: bool, addr: u8) -> Result<u32, Error<TXErr, RXErr>> {
        let cmd = request_byte(true, ap, addr);
        for _ in 0..self.retries {
            match self.request(cmd)? {
                ACK_OK => {
                    let mut v = [0u8; 4];
                    self.wire.read(&mut v)?;
                    self.sync()?;
                    return Ok(u32::from_le_bytes(v));
                }
                ACK_WAIT => {
                    log::debug!("SWD target busy, aborting and retrying");
                    self.sync()?;
                    self.abort()?;
                }
                other => {
                    self.sync()?;
                    return Err(Error::transfer(TransferFailure::Unexpected(other)));
                }
            }
        }
        Err(Error::RetryExhausted {
            what: "SWD read",
            attempts: self.retries,
        })
    }

    fn write_register(&mut self, ap: bool, addr: u8, value: u32) -> Result<(), Error<TXErr, RXErr>> {
        let cmd = request_byte(false, ap, addr);
        for _ in 0..self.retries {
            let status = self.request(cmd)?;
            self.wire.clocks(2)?;
            match status {
                ACK_OK => return self.write_data(value),
                ACK_WAIT => {
                    log::debug!("SWD target busy, aborting and retrying");
                    self.sync()?;
                    self.abort()?;
                }
                other => {
                    self.sync()?;
                    return Err(Error::transfer(TransferFailure::Unexpected(other)));
                }
            }
        }
        Err(Error::RetryExhausted {
            what: "SWD write",
            attempts: self.retries,
        })
    }

    /// `read_dp` reads the debug port register at `addr`.
    pub fn read_dp(&mut self, addr: u8) -> Result<u32, Error<TXErr, RXErr>> {
        self.read_register(false, addr)
    }

    pub fn write_dp(&mut self, addr: u8, value: u32) -> Result<(), Error<TXErr, RXErr>> {
        self.write_register(false, addr, value)
    }

    /// `power_up` requests the system and debug power domains, which must
    /// be on before any access port answers.
    pub fn power_up(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        self.write_dp(DP_CTRL_STAT, POWER_UP_REQUEST)
    }

    fn select(&mut self, ap: u8, bank: u8) -> Result<(), Error<TXErr, RXErr>> {
        let select = (ap as u32) << 24 | (bank & 0xf0) as u32;
        self.write_dp(DP_SELECT, select)
    }

    /// `read_ap` reads register `bank` of access port `ap`. AP reads are
    /// posted, so the value is collected from RDBUFF.
    pub fn read_ap(&mut self, ap: u8, bank: u8) -> Result<u32, Error<TXErr, RXErr>> {
        self.select(ap, bank)?;
        self.read_register(true, bank & 0b1100)?;
        self.read_dp(DP_RDBUFF)
    }

    pub fn write_ap(&mut self, ap: u8, bank: u8, value: u32) -> Result<(), Error<TXErr, RXErr>> {
        self.select(ap, bank)?;
        self.write_register(true, bank & 0b1100, value)
    }

    /// `scan` reads the IDR of all 256 access ports and returns the ones
    /// that look populated.
    pub fn scan(&mut self) -> Result<ArrayVec<(u8, u32), 256>, Error<TXErr, RXErr>> {
        let mut found = ArrayVec::new();
        for ap in 0..=255u8 {
            let idr = self.read_ap(ap, AP_IDR)?;
            if idr != 0 && idr != 0xffff_ffff {
                log::debug!("AP {:#04x}: IDR {:#010x}", ap, idr);
                found.push((ap, idr));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parity() {
        assert_eq!(request_byte(true, false, DP_IDCODE), 0xa5);
        assert_eq!(request_byte(false, false, DP_ABORT), 0x81);
        assert_eq!(request_byte(false, false, DP_SELECT), 0xb1);
        assert_eq!(request_byte(true, false, DP_RDBUFF), 0xbd);
        assert_eq!(request_byte(true, true, 0xc), 0x9f);
    }

    #[test]
    fn data_parity() {
        assert_eq!(parity_byte(0x1f), 1);
        assert_eq!(parity_byte(0x5000_0000), 0);
    }
}
