//! Module `auxpin` drives the four auxiliary pins (PC4 to PC7), which are
//! available in every bus mode through `BusMode::aux`.

use crate::low;
use crate::Error;
use embedded_hal::serial;

/// Pin direction as reported in the low nibble of the AUX configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

/// `AuxConfig` is the direction and pull-up state of all four pins.
///
/// Bit `n` of `inputs` (and of `pullups`) refers to AUX pin `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuxConfig {
    pub inputs: u8,
    pub pullups: u8,
}

impl AuxConfig {
    pub(crate) fn from_byte(b: u8) -> Self {
        Self {
            inputs: b & 0x0f,
            pullups: b >> 4,
        }
    }

    pub(crate) fn command_byte(&self) -> u8 {
        (self.pullups & 0x0f) << 4 | (self.inputs & 0x0f)
    }

    pub fn direction(&self, pin: u8) -> Direction {
        if self.inputs >> (pin & 0b11) & 1 == 1 {
            Direction::Input
        } else {
            Direction::Output
        }
    }

    pub fn with_direction(mut self, pin: u8, dir: Direction) -> Self {
        let bit = 1 << (pin & 0b11);
        match dir {
            Direction::Input => self.inputs |= bit,
            Direction::Output => self.inputs &= !bit,
        }
        self
    }

    pub fn with_pullup(mut self, pin: u8, enabled: bool) -> Self {
        let bit = 1 << (pin & 0b11);
        if enabled {
            self.pullups |= bit;
        } else {
            self.pullups &= !bit;
        }
        self
    }
}

/// `Aux` borrows the current mode's channel for auxiliary pin commands.
pub struct Aux<'a, TX: serial::Write<u8>, RX: serial::Read<u8>> {
    ch: &'a mut low::Channel<TX, RX>,
}

impl<'a, TX, RX, TXErr, RXErr> Aux<'a, TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    pub(crate) fn new(ch: &'a mut low::Channel<TX, RX>) -> Self {
        Self { ch }
    }

    pub fn config(&mut self) -> Result<AuxConfig, Error<TXErr, RXErr>> {
        self.ch.query(0b1110_0000).map(AuxConfig::from_byte)
    }

    pub fn set_config(&mut self, config: &AuxConfig) -> Result<(), Error<TXErr, RXErr>> {
        self.ch
            .config_command(&[0b1111_0000, config.command_byte()])
    }

    /// `values` returns the level of each pin in the low four bits.
    pub fn values(&mut self) -> Result<u8, Error<TXErr, RXErr>> {
        self.ch.query(0b1100_0000).map(|v| v & 0x0f)
    }

    pub fn set_values(&mut self, values: u8) -> Result<(), Error<TXErr, RXErr>> {
        self.ch.config_command(&[0b1101_0000 | (values & 0x0f)])
    }

    /// `set_pin` changes one output pin, keeping the others as they are.
    pub fn set_pin(&mut self, pin: u8, high: bool) -> Result<(), Error<TXErr, RXErr>> {
        let bit = 1 << (pin & 0b11);
        let current = self.values()?;
        let next = if high { current | bit } else { current & !bit };
        self.set_values(next)
    }
}
