use crate::{Error, TransferFailure};
use embedded_hal::serial;

pub(crate) const ACK: u8 = 0x01;
pub(crate) const NACK: u8 = 0x00;

/// Largest write or read length the device accepts in one write-then-read.
pub(crate) const MAX_TRANSFER: usize = 4096;

/// Largest payload of a single bulk command.
pub(crate) const MAX_BULK: usize = 16;

pub(crate) const DEFAULT_PATIENCE: u32 = 10;

/// How a bus mode acknowledges a `0001xxxx` bulk command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bulk {
    /// ACK right after the opcode, then one reply byte per payload byte.
    AckThenReply,
    /// A single ACK once the whole payload went out on the bus.
    TrailingAck,
    /// A single ACK after the payload, then one clocked-in byte per payload
    /// byte.
    TrailingAckThenReply,
    /// One ACK per payload byte.
    AckPerByte,
}

#[derive(Debug, Clone)]
pub struct Channel<TX: serial::Write<u8>, RX: serial::Read<u8>> {
    pub tx: TX,
    pub rx: RX,
    pub patience: u32,
}

impl<TX, RX, TXErr, RXErr> Channel<TX, RX>
where
    TX: serial::Write<u8, Error = TXErr>,
    RX: serial::Read<u8, Error = RXErr>,
{
    pub fn new(tx: TX, rx: RX) -> Self {
        Self {
            tx,
            rx,
            patience: DEFAULT_PATIENCE,
        }
    }

    pub fn read(&mut self) -> Result<u8, Error<TXErr, RXErr>> {
        nb::block!(self.rx.read()).map_err(Error::rx)
    }

    /// Blocks until `buf` is full. Only used for data whose length the
    /// device has already accepted.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error<TXErr, RXErr>> {
        for b in buf.iter_mut() {
            *b = self.read()?;
        }
        log::trace!("<== {:02x?}", buf);
        Ok(())
    }

    /// Waits for a single reply byte, giving up after `patience` empty reads.
    pub fn reply(&mut self) -> Result<Option<u8>, Error<TXErr, RXErr>> {
        for _ in 0..self.patience {
            match self.rx.read() {
                Ok(c) => {
                    log::trace!("<== {:#04x}", c);
                    return Ok(Some(c));
                }
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(e)) => return Err(Error::rx(e)),
            }
        }
        log::trace!("<== (nothing)");
        Ok(None)
    }

    /// Looks at the receive side exactly once, without waiting.
    pub fn peek(&mut self) -> Result<Option<u8>, Error<TXErr, RXErr>> {
        match self.rx.read() {
            Ok(c) => Ok(Some(c)),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(e)) => Err(Error::rx(e)),
        }
    }

    pub fn write(&mut self, c: u8) -> Result<(), Error<TXErr, RXErr>> {
        nb::block!(self.tx.write(c)).map_err(Error::tx)
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        log::trace!("==> {:02x?}", data);
        for c in data {
            self.write(*c)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        nb::block!(self.tx.flush()).map_err(Error::tx)
    }

    /// Waits for the `0x01` status byte that closes most exchanges.
    pub fn transfer_ack(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        match self.reply()? {
            Some(ACK) => Ok(()),
            Some(NACK) => Err(Error::transfer(TransferFailure::Nack)),
            Some(c) => Err(Error::transfer(TransferFailure::Unexpected(c))),
            None => Err(Error::transfer(TransferFailure::Timeout)),
        }
    }

    pub fn simple_command(&mut self, cmd: u8) -> Result<(), Error<TXErr, RXErr>> {
        self.write_all(&[cmd])?;
        self.flush()?;
        self.transfer_ack()
    }

    /// Sends a configuration command (opcode plus optional argument bytes).
    /// Anything but ACK is fatal for the session.
    pub fn config_command(&mut self, cmd: &[u8]) -> Result<(), Error<TXErr, RXErr>> {
        self.write_all(cmd)?;
        self.flush()?;

        match self.reply()? {
            Some(ACK) => Ok(()),
            other => {
                log::warn!("command {:#04x} rejected: {:?}", cmd[0], other);
                Err(Error::Configuration { command: cmd[0] })
            }
        }
    }

    /// Sends a command and returns its one-byte answer, which is data rather
    /// than a status.
    pub fn query(&mut self, cmd: u8) -> Result<u8, Error<TXErr, RXErr>> {
        self.write_all(&[cmd])?;
        self.flush()?;
        self.reply()?
            .ok_or_else(|| Error::transfer(TransferFailure::Timeout))
    }

    pub fn write_then_read(
        &mut self,
        opcode: u8,
        payload: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<TXErr, RXErr>> {
        self.write_then_read_with(opcode, payload, response, |b| b)
    }

    /// Write-then-read where every outgoing and incoming data byte passes
    /// through `map`.
    pub fn write_then_read_with<F: Fn(u8) -> u8>(
        &mut self,
        opcode: u8,
        payload: &[u8],
        response: &mut [u8],
        map: F,
    ) -> Result<(), Error<TXErr, RXErr>> {
        if payload.len() > MAX_TRANSFER || response.len() > MAX_TRANSFER {
            return Err(Error::request("write-then-read is limited to 4096 bytes each way"));
        }

        let wlen = (payload.len() as u16).to_be_bytes();
        let rlen = (response.len() as u16).to_be_bytes();
        self.write_all(&[opcode, wlen[0], wlen[1], rlen[0], rlen[1]])?;
        self.flush()?;

        // The device only speaks up here when it refuses the lengths; with
        // nothing to write it may already be done and acknowledging.
        let acked = match self.peek()? {
            None => false,
            Some(NACK) => {
                log::warn!("write-then-read {:#04x} refused", opcode);
                return Err(Error::transfer(TransferFailure::Nack));
            }
            Some(ACK) if payload.is_empty() => true,
            Some(c) => return Err(Error::transfer(TransferFailure::Unexpected(c))),
        };

        if !acked {
            log::trace!("==> {:02x?}", payload);
            for c in payload {
                self.write(map(*c))?;
            }
            self.flush()?;
            self.transfer_ack()?;
        }

        self.read_exact(response)?;
        for b in response.iter_mut() {
            *b = map(*b);
        }
        Ok(())
    }

    /// `0001xxxx` bulk command. `response` must be as long as `data` for the
    /// framings that answer per byte, and is ignored otherwise.
    pub(crate) fn bulk(
        &mut self,
        framing: Bulk,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<TXErr, RXErr>> {
        if data.is_empty() || data.len() > MAX_BULK {
            return Err(Error::request("bulk transfers carry 1 to 16 bytes"));
        }
        if framing != Bulk::TrailingAck && response.len() != data.len() {
            return Err(Error::request("bulk response buffer must match the payload"));
        }

        let cmd = 0b0001_0000 | (data.len() - 1) as u8;
        match framing {
            Bulk::AckThenReply => {
                self.simple_command(cmd)?;
                self.write_all(data)?;
                self.flush()?;
                self.read_exact(response)
            }
            Bulk::TrailingAck => {
                self.write_all(&[cmd])?;
                self.write_all(data)?;
                self.flush()?;
                self.transfer_ack()
            }
            Bulk::TrailingAckThenReply => {
                self.write_all(&[cmd])?;
                self.write_all(data)?;
                self.flush()?;
                self.transfer_ack()?;
                self.read_exact(response)
            }
            Bulk::AckPerByte => {
                self.write_all(&[cmd])?;
                self.write_all(data)?;
                self.flush()?;
                for r in response.iter_mut() {
                    self.transfer_ack()?;
                    *r = ACK;
                }
                Ok(())
            }
        }
    }

    /// Sends `send` up to `tries` times, each time scanning the reply for
    /// `expect`. A try ends after `patience` consecutive empty reads.
    pub fn handshake(
        &mut self,
        send: u8,
        expect: &[u8],
        tries: u32,
        patience: u32,
    ) -> Result<bool, Error<TXErr, RXErr>> {
        'tries: for _ in 0..tries {
            self.flush()?;
            self.write_all(&[send])?;
            self.flush()?;

            let mut correct = 0;
            let mut idle = 0;
            loop {
                match self.rx.read() {
                    Ok(c) => {
                        idle = 0;
                        if c != expect[correct] {
                            correct = 0;
                        }
                        if c == expect[correct] {
                            correct += 1;
                            if correct == expect.len() {
                                return Ok(true);
                            }
                        }
                    }
                    Err(e) => match e {
                        nb::Error::WouldBlock => {
                            idle += 1;
                            if idle >= patience {
                                continue 'tries;
                            }
                        }
                        nb::Error::Other(e) => return Err(Error::rx(e)),
                    },
                }
            }
        }

        Ok(false)
    }

    /// Best-effort return to the console after a failed transition. Errors
    /// are ignored: the caller already has a more useful one.
    pub fn abandon(&mut self) {
        let _ = self.write_all(&[0x00, 0x0f, b'\n']);
        let _ = self.flush();
    }

    pub fn eat_rx_buffer(&mut self) -> Result<(), Error<TXErr, RXErr>> {
        loop {
            match self.rx.read() {
                Ok(_) => (), // Ignore
                Err(err) => match err {
                    nb::Error::WouldBlock => return Ok(()), // Stop if there's nothing else to read
                    nb::Error::Other(err) => return Err(Error::rx(err)), // Propagate
                },
            }
        }
    }
}
