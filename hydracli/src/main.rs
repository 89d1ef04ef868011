//! A command-line tool for common HydraBus chores: dumping and programming
//! SPI NOR flash, reading smartcard ATRs and scanning SWD access ports.
//!
//! Every command that talks to the hardware opens its own session and
//! returns the HydraBus to its console before exiting, whether or not the
//! command succeeded.

use std::convert::TryFrom;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::spi::{Mode, Phase, Polarity};
use hydrabus::atr::{Atr, AtrOptions};
use hydrabus::flash::{FlashConfig, SpiFlash};
use hydrabus::mode::BusMode;
use hydrabus::rawwire::RawWire;
use hydrabus::smartcard::Smartcard;
use hydrabus::spi::{self, Spi};
use hydrabus::swd::Swd;
use hydrabus::Hydrabus;
use serial_embedded_hal::{PortSettings, Rx, Serial, Tx};

/// Drives a HydraBus over its binary protocol.
#[derive(Debug, Parser)]
#[clap(version)]
struct HydraCli {
    /// Serial port the HydraBus is attached to.
    #[clap(long, short, global = true, default_value = "/dev/ttyACM0")]
    port: String,
    /// Serial baud rate.
    #[clap(long, short, global = true, default_value_t = 115_200)]
    baud: usize,
    /// SPI peripheral to use, 1 or 2.
    #[clap(long, global = true, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    spi_device: u8,
    /// SPI clock in Hz. Must be one of the clocks the chosen device supports.
    #[clap(long, global = true, default_value = "10000000", value_parser = parse_number)]
    spi_speed: u32,
    /// Idle the SPI clock high.
    #[clap(long, global = true)]
    polarity: bool,
    /// Sample SPI data on the second clock edge.
    #[clap(long, global = true)]
    phase: bool,

    #[clap(subcommand)]
    cmd: SubCmd,
}

#[derive(Debug, Subcommand)]
enum SubCmd {
    /// Reads the JEDEC ID of a SPI flash chip.
    ChipId,
    /// Reads blocks of a SPI flash chip into a file.
    Dump {
        /// Output file.
        file: PathBuf,
        /// Number of blocks to read.
        #[clap(value_parser = parse_number)]
        blocks: u32,
        /// Flash address to start reading.
        #[clap(value_parser = parse_number)]
        start: u32,
        /// Bytes per read command, 1 to 4096.
        #[clap(long, default_value = "4096", value_parser = parse_number)]
        block_size: u32,
        /// Use 4-byte addresses.
        #[clap(long)]
        four_byte: bool,
    },
    /// Writes the contents of a file into a SPI flash chip.
    Program {
        /// Data to write; its length determines the amount written.
        file: PathBuf,
        /// Flash address to start writing. Must be 512-byte aligned.
        #[clap(value_parser = parse_number)]
        start: u32,
        /// Erase every touched sector before programming it.
        #[clap(long)]
        erase: bool,
        /// Use 4-byte addresses.
        #[clap(long)]
        four_byte: bool,
    },
    /// Resets the smartcard and decodes its Answer To Reset.
    Atr,
    /// Decodes an Answer To Reset given in hex, without any hardware.
    DecodeAtr {
        /// ATR bytes, optionally separated by spaces or colons.
        hex: Vec<String>,
    },
    /// Reads the DP IDCODE and lists the populated access ports.
    SwdScan,
}

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_hex(words: &[String]) -> Result<Vec<u8>> {
    let digits: Vec<char> = words
        .iter()
        .flat_map(|w| w.chars())
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair: String = pair.iter().collect();
            u8::from_str_radix(&pair, 16).map_err(|_| anyhow!("invalid hex byte {:?}", pair))
        })
        .collect()
}

struct StdDelay;

impl DelayMs<u16> for StdDelay {
    fn delay_ms(&mut self, ms: u16) {
        std::thread::sleep(Duration::from_millis(ms.into()));
    }
}

impl HydraCli {
    fn open(&self) -> Result<Hydrabus<Tx, Rx>> {
        let port = Serial::new(
            &self.port,
            &PortSettings {
                baud_rate: serial_embedded_hal::BaudRate::from_speed(self.baud),
                char_size: serial_embedded_hal::CharSize::Bits8,
                parity: serial_embedded_hal::Parity::ParityNone,
                stop_bits: serial_embedded_hal::StopBits::Stop1,
                flow_control: serial_embedded_hal::FlowControl::FlowNone,
            },
        )
        .with_context(|| format!("failed to open {}", self.port))?;
        let (tx, rx) = port.split();
        Ok(Hydrabus::new(tx, rx))
    }

    /// Runs `f` in bus mode `M`. The device goes back to its console
    /// afterwards; when `f` failed, its error wins over any error while
    /// leaving the mode.
    fn session<M, T, F>(&self, f: F) -> Result<T>
    where
        M: BusMode<Tx, Rx>,
        F: FnOnce(&mut M) -> Result<T>,
    {
        let bb = self
            .open()?
            .to_bitbang()
            .context("HydraBus did not enter binary mode")?;
        let mut mode: M = bb
            .enter()
            .with_context(|| format!("HydraBus did not enter {}", M::MODE.name()))?;

        let result = f(&mut mode);
        match mode.close() {
            Ok(_) => result,
            Err(e) if result.is_err() => {
                log::warn!("could not return HydraBus to console: {}", e);
                result
            }
            Err(e) => Err(e).context("could not return HydraBus to console"),
        }
    }

    fn spi_config(&self) -> spi::Config {
        spi::Config {
            mode: Mode {
                polarity: if self.polarity {
                    Polarity::IdleHigh
                } else {
                    Polarity::IdleLow
                },
                phase: if self.phase {
                    Phase::CaptureOnSecondTransition
                } else {
                    Phase::CaptureOnFirstTransition
                },
            },
            device: if self.spi_device == 2 {
                spi::Device::Spi2
            } else {
                spi::Device::Spi1
            },
        }
    }

    fn spi_session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Spi<Tx, Rx>) -> Result<T>,
    {
        let speed = spi::Speed::from_hertz(self.spi_speed)
            .ok_or_else(|| anyhow!("no SPI clock of {} Hz", self.spi_speed))?;
        self.session(|spi: &mut Spi<Tx, Rx>| {
            spi.configure(&self.spi_config())
                .context("SPI configuration rejected")?;
            spi.set_speed(speed).context("SPI speed rejected")?;
            f(spi)
        })
    }

    fn run(&self) -> Result<()> {
        match &self.cmd {
            SubCmd::ChipId => self.spi_session(|spi| {
                let mut flash = SpiFlash::new(spi, FlashConfig::default());
                let id = flash.chip_id().context("failed to read chip ID")?;
                println!("{:02x} {:02x} {:02x}", id[0], id[1], id[2]);
                Ok(())
            }),
            SubCmd::Dump {
                file,
                blocks,
                start,
                block_size,
                four_byte,
            } => {
                if *block_size == 0 || *block_size > 4096 {
                    bail!("block size must be between 1 and 4096");
                }
                let total = blocks
                    .checked_mul(*block_size)
                    .ok_or_else(|| anyhow!("dump size overflows"))?;
                let config = flash_config(*four_byte, *block_size as usize);
                let data = self.spi_session(|spi| {
                    let mut flash = SpiFlash::new(spi, config);
                    let mut data = vec![0u8; total as usize];
                    for (i, chunk) in data.chunks_mut(*block_size as usize).enumerate() {
                        let address = block_address(*start, i, *block_size)?;
                        flash
                            .read(address, chunk)
                            .with_context(|| format!("failed to read block at {:#x}", address))?;
                        log::info!("read block {}/{}", i + 1, blocks);
                    }
                    Ok(data)
                })?;
                fs::write(file, &data)
                    .with_context(|| format!("failed to write {}", file.display()))?;
                println!("{} bytes written to {}", data.len(), file.display());
                Ok(())
            }
            SubCmd::Program {
                file,
                start,
                erase,
                four_byte,
            } => {
                let data =
                    fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
                let config = flash_config(*four_byte, FlashConfig::default().block_size);
                self.spi_session(|spi| {
                    let mut flash = SpiFlash::new(spi, config);
                    flash
                        .program(*start, &data, *erase, |done, total| {
                            log::info!("programmed {}/{} bytes", done, total)
                        })
                        .context("programming failed")
                })?;
                println!("{} bytes programmed at {:#x}", data.len(), start);
                Ok(())
            }
            SubCmd::Atr => {
                let atr = self.session(|sc: &mut Smartcard<Tx, Rx>| {
                    sc.configure(&hydrabus::smartcard::DEFAULT_CONFIG)
                        .context("smartcard configuration rejected")?;
                    sc.warm_reset(&mut StdDelay).context("card reset failed")?;
                    sc.read_atr(AtrOptions::default())
                        .context("card did not answer to reset")
                })?;
                print!("{}", atr);
                Ok(())
            }
            SubCmd::DecodeAtr { hex } => {
                let bytes = parse_hex(hex)?;
                print!("{}", Atr::parse(&bytes, AtrOptions::default()));
                Ok(())
            }
            SubCmd::SwdScan => self.session(|wire: &mut RawWire<Tx, Rx>| {
                let mut swd = Swd::new(wire).context("SWD configuration rejected")?;
                swd.bus_init().context("SWD line reset failed")?;
                let idcode = swd.read_dp(hydrabus::swd::DP_IDCODE).context("failed to read IDCODE")?;
                println!("DP IDCODE: {:#010x}", idcode);
                swd.power_up().context("debug power-up failed")?;
                for (ap, idr) in swd.scan().context("AP scan failed")?.iter() {
                    println!("AP {:#04x}: IDR {:#010x}", ap, idr);
                }
                Ok(())
            }),
        }
    }
}

fn block_address(start: u32, index: usize, block_size: u32) -> Result<u32> {
    u32::try_from(index)
        .ok()
        .and_then(|i| i.checked_mul(block_size))
        .and_then(|offset| start.checked_add(offset))
        .ok_or_else(|| anyhow!("dump runs past the 32-bit address space"))
}

fn flash_config(four_byte: bool, block_size: usize) -> FlashConfig {
    FlashConfig {
        address_mode: if four_byte {
            hydrabus::flash::AddressMode::FourByte
        } else {
            hydrabus::flash::AddressMode::ThreeByte
        },
        block_size,
        ..FlashConfig::default()
    }
}

fn main() -> Result<()> {
    env_logger::init();
    HydraCli::parse().run()
}
