#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::serial;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

struct Exchange {
    request: Vec<u8>,
    reply: Vec<u8>,
}

/// A fake HydraBus that answers only once the exact bytes it was told to
/// expect have been written.
#[derive(Default)]
struct Device {
    script: VecDeque<Exchange>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    written: Vec<u8>,
    do_read_error: bool,
    do_write_error: bool,
}

impl Device {
    fn receive(&mut self, byte: u8) {
        self.written.push(byte);
        self.pending.push(byte);

        let next = match self.script.front() {
            Some(next) => next,
            None => panic!("unscripted write {:02x?}", self.pending),
        };
        if !next.request.starts_with(&self.pending) {
            panic!(
                "expected {:02x?}, got {:02x?}",
                next.request, self.pending
            );
        }
        if next.request.len() == self.pending.len() {
            let done = self.script.pop_front().unwrap();
            self.rx.extend(done.reply);
            self.pending.clear();
        }
    }
}

#[derive(Clone, Default)]
pub struct Mock(Rc<RefCell<Device>>);

impl Mock {
    pub fn new() -> Mock {
        Default::default()
    }

    /// Queues an exchange: once `request` has been written, `reply` becomes
    /// readable.
    pub fn expect(&self, request: &[u8], reply: &[u8]) -> &Self {
        self.0.borrow_mut().script.push_back(Exchange {
            request: request.to_vec(),
            reply: reply.to_vec(),
        });
        self
    }

    /// Makes `bytes` readable right away, like console noise.
    pub fn preload(&self, bytes: &[u8]) -> &Self {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
        self
    }

    pub fn split(&self) -> (Tx, Rx) {
        (Tx(self.0.clone()), Rx(self.0.clone()))
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.borrow().written.clone()
    }

    pub fn clear_written(&self) {
        self.0.borrow_mut().written.clear();
    }

    /// Whether every scripted exchange took place.
    pub fn is_done(&self) -> bool {
        let inner = self.0.borrow();
        inner.script.is_empty() && inner.pending.is_empty()
    }

    pub fn unread(&self) -> usize {
        self.0.borrow().rx.len()
    }

    pub fn trigger_read_error(&self) {
        self.0.borrow_mut().do_read_error = true;
    }

    pub fn trigger_write_error(&self) {
        self.0.borrow_mut().do_write_error = true;
    }

    /// Scripts the entry into the root binary mode.
    pub fn binary_mode(&self) -> &Self {
        self.expect(&[0x00], b"BBIO1")
    }

    /// Scripts the entry into a bus mode from the root binary mode.
    pub fn bus_mode(&self, command: u8, banner: &[u8; 4]) -> &Self {
        self.expect(&[command], banner)
    }
}

pub struct Tx(Rc<RefCell<Device>>);

pub struct Rx(Rc<RefCell<Device>>);

impl serial::Write<u8> for Tx {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), MockError> {
        let mut inner = self.0.borrow_mut();
        if inner.do_write_error {
            inner.do_write_error = false;
            return Err(nb::Error::Other(MockError));
        }
        inner.receive(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}

impl serial::Read<u8> for Rx {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        let mut inner = self.0.borrow_mut();
        if inner.do_read_error {
            inner.do_read_error = false;
            return Err(nb::Error::Other(MockError));
        }
        inner.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}
