//! Module `flash` contains helpers for SPI NOR flash chips driven through
//! SPI mode.
//!
//! The commands used are the ones common to most serial NOR parts (JEDEC
//! RDID, READ, WREN, RDSR, sector erase, page program), plus the Macronix
//! security register to detect failed program and erase cycles.
//!
//! ```rust,ignore
//! let mut spi = bb.to_spi()?;
//! spi.configure(&spi::Config::default())?;
//! let mut flash = SpiFlash::new(&mut spi, FlashConfig::default());
//! let id = flash.chip_id()?;
//! let mut buf = [0u8; 4096];
//! flash.read(0, &mut buf)?;
//! ```

use crate::spi::Spi;
use crate::Error;
use embedded_hal::serial;

pub const RDID: u8 = 0x9f;
pub const WREN: u8 = 0x06;
pub const RDSR: u8 = 0x05;
pub const RDSCUR: u8 = 0x28;
pub const CLSR: u8 = 0x30;

pub const SECTOR_SIZE: u32 = 0x1000;
pub const PAGE_SIZE: u32 = 0x100;

/// Low address bits that must be clear at the start of `program`.
pub const PROGRAM_ALIGN_MASK: u32 = 0x1ff;

const SR_WIP: u8 = 1 << 0;
const SR_WEL: u8 = 1 << 1;
const SR_SRWD: u8 = 1 << 7;

/// P_FAIL (bit 5) and E_FAIL (bit 6) of the security register.
const SCUR_FAIL_MASK: u8 = 0x60;

/// `AddressMode` selects the address width of read, erase and program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ThreeByte,
    FourByte,
}

impl AddressMode {
    fn read_opcode(self) -> u8 {
        match self {
            AddressMode::ThreeByte => 0x03,
            AddressMode::FourByte => 0x13,
        }
    }

    fn erase_opcode(self) -> u8 {
        match self {
            AddressMode::ThreeByte => 0x20,
            AddressMode::FourByte => 0x21,
        }
    }

    fn program_opcode(self) -> u8 {
        match self {
            AddressMode::ThreeByte => 0x02,
            AddressMode::FourByte => 0x12,
        }
    }

    /// Writes the opcode and `address` into `out`, returning the length used.
    fn frame(self, opcode: u8, address: u32, out: &mut [u8]) -> usize {
        let a = address.to_be_bytes();
        out[0] = opcode;
        match self {
            AddressMode::ThreeByte => {
                out[1..4].copy_from_slice(&a[1..]);
                4
            }
            AddressMode::FourByte => {
                out[1..5].copy_from_slice(&a);
                5
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashConfig {
    pub address_mode: AddressMode,
    /// Bytes read per write-then-read, 1 to 4096.
    pub block_size: usize,
    /// Status register polls before giving up.
    pub max_attempts: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        FlashConfig {
            address_mode: AddressMode::ThreeByte,
            block_size: 4096,
            max_attempts: 30,
        }
    }
}

/// `SpiFlash` talks to a NOR flash chip through an SPI mode object. Each
/// command is one write-then-read with chip select driven by the device.
pub struct SpiFlash<'a, TX: serial::Write<u8>, RX: serial::Read<u8>> {
    spi: &'a mut Spi<TX, RX>,
    config: FlashConfig,
}

impl<'a, TX, RX, TXErr, RXErr> SpiFlash<'a, TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    pub fn new(spi: &'a mut Spi<TX, RX>, config: FlashConfig) -> Self {
        SpiFlash { spi, config }
    }

    fn command(&mut self, payload: &[u8], response: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.spi.write_then_read(payload, response, true)
    }

    /// `chip_id` returns the JEDEC manufacturer and device id.
    pub fn chip_id(&mut self) -> Result<[u8; 3], Error<TXErr, RXErr>> {
        let mut id = [0u8; 3];
        self.command(&[RDID], &mut id)?;
        log::debug!("flash id {:02x?}", id);
        Ok(id)
    }

    pub fn read_status(&mut self) -> Result<u8, Error<TXErr, RXErr>> {
        let mut sr = [0u8; 1];
        self.command(&[RDSR], &mut sr)?;
        Ok(sr[0])
    }

    /// `read` fills `buf` starting at `address`, one block at a time.
    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        let block = self.config.block_size;
        if block == 0 || block > 4096 {
            return Err(Error::request("flash block size must be 1 to 4096"));
        }
        let mode = self.config.address_mode;
        let mut addr = address;
        for chunk in buf.chunks_mut(block) {
            let mut cmd = [0u8; 5];
            let n = mode.frame(mode.read_opcode(), addr, &mut cmd);
            self.command(&cmd[..n], chunk)?;
            addr = addr.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }

    /// `write_enable` sets the write enable latch, polling the status
    /// register until it is set and no write is in progress.
    pub fn write_enable(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        for _ in 0..self.config.max_attempts {
            self.command(&[WREN], &mut [])?;
            let sr = self.read_status()?;
            if sr & SR_SRWD != 0 {
                log::warn!("flash is write protected (status {:#010b})", sr);
                return Err(Error::Configuration { command: WREN });
            }
            if sr & (SR_WEL | SR_WIP) == SR_WEL {
                return Ok(());
            }
        }
        Err(Error::RetryExhausted {
            what: "write enable latch",
            attempts: self.config.max_attempts,
        })
    }

    /// `wait_ready` polls the status register until the write in progress
    /// bit clears.
    pub fn wait_ready(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        for _ in 0..self.config.max_attempts {
            if self.read_status()? & SR_WIP == 0 {
                return Ok(());
            }
        }
        Err(Error::RetryExhausted {
            what: "write in progress",
            attempts: self.config.max_attempts,
        })
    }

    /// `check_fail` reads the security register and reports a failed program
    /// or erase cycle, clearing the failure flags first.
    pub fn check_fail(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        let mut scur = [0u8; 1];
        self.command(&[RDSCUR], &mut scur)?;
        if scur[0] & SCUR_FAIL_MASK != 0 {
            log::warn!("flash reports a failed cycle (security {:#010b})", scur[0]);
            self.command(&[CLSR], &mut [])?;
            return Err(Error::Configuration { command: RDSCUR });
        }
        Ok(())
    }

    /// `erase_sector` erases the 4 KiB sector holding `address`.
    pub fn erase_sector(&mut self, address: u32) -> Result<(), Error<TXErr, RXErr>> {
        self.write_enable()?;
        let mode = self.config.address_mode;
        let mut cmd = [0u8; 5];
        let n = mode.frame(mode.erase_opcode(), address & !(SECTOR_SIZE - 1), &mut cmd);
        self.command(&cmd[..n], &mut [])?;
        self.wait_ready()?;
        self.check_fail()
    }

    /// `program_page` writes at most one page of `data` at `address`. The
    /// data must not run past the end of the page.
    pub fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        let room = (PAGE_SIZE - (address & (PAGE_SIZE - 1))) as usize;
        if data.is_empty() || data.len() > room {
            return Err(Error::request("page program must stay within one page"));
        }
        self.write_enable()?;
        let mode = self.config.address_mode;
        let mut cmd = [0u8; 5 + PAGE_SIZE as usize];
        let n = mode.frame(mode.program_opcode(), address, &mut cmd);
        cmd[n..n + data.len()].copy_from_slice(data);
        self.command(&cmd[..n + data.len()], &mut [])?;
        self.wait_ready()?;
        self.check_fail()
    }

    /// `program` writes `data` from `start`, erasing each sector it touches
    /// first when `erase` is set. `progress` is called after every page
    /// with the number of bytes written so far and the total.
    pub fn program<P: FnMut(usize, usize)>(
        &mut self,
        start: u32,
        data: &[u8],
        erase: bool,
        mut progress: P,
    ) -> Result<(), Error<TXErr, RXErr>> {
        if start & PROGRAM_ALIGN_MASK != 0 {
            return Err(Error::request("program start address must be 512-byte aligned"));
        }

        let mut done = 0;
        for page in data.chunks(PAGE_SIZE as usize) {
            let addr = start.wrapping_add(done as u32);
            // The first page may start in the middle of a sector.
            if erase && (done == 0 || addr & (SECTOR_SIZE - 1) == 0) {
                log::debug!("erasing sector {:#010x}", addr & !(SECTOR_SIZE - 1));
                self.erase_sector(addr)?;
            }
            self.program_page(addr, page)?;
            done += page.len();
            progress(done, data.len());
        }
        Ok(())
    }
}
