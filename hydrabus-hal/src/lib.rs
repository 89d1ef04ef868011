//! `embedded-hal` implementations via a HydraBus device
//!
//! [`embedded-hal`](https://crates.io/crates/embedded-hal) is a hardware
//! abstraction layer for embedded systems. It is most commonly used in
//! applications destined to run on microcontrollers or other small computing
//! devices embedded inside products.
//!
//! This library contains implementations of some of the `embedded-hal` traits
//! in terms of the [HydraBus](https://hydrabus.com/), thus allowing a HAL
//! device driver to talk to its hardware from a general-purpose computer with
//! the HydraBus as an intermediary. That gives a quicker write/test cycle
//! while developing a driver.
//!
//! All of the trait implementations in this library require an
//! already-configured mode object from the `hydrabus` crate:
//!
//! ```rust,ignore
//! let mut spi = bb.to_spi()?;
//! spi.configure(&hydrabus::spi::DEFAULT_CONFIG)?;
//! let spi = hydrabus_hal::spi::HydrabusSpi::new(spi);
//! ```

#![no_std]

pub mod i2c;
pub mod spi;
