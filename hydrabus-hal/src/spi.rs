use embedded_hal::blocking::spi;

/// `HydrabusSpi` adapts a HydraBus in SPI mode to the blocking SPI traits.
///
/// Chip select is left to the caller, as drivers written against
/// `embedded-hal` usually manage it with a separate output pin.
pub struct HydrabusSpi<M: hydrabus::spi::Comms> {
    mode: M,
}

impl<M: hydrabus::spi::Comms> HydrabusSpi<M> {
    pub fn new(mode: M) -> Self {
        Self { mode }
    }

    /// Returns the wrapped mode object.
    pub fn release(self) -> M {
        self.mode
    }
}

impl<M, Error> spi::Transfer<u8> for HydrabusSpi<M>
where
    M: hydrabus::spi::Comms<Error = Error>,
{
    type Error = M::Error;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        self.mode.transfer(words)
    }
}

impl<M, Error> spi::Write<u8> for HydrabusSpi<M>
where
    M: hydrabus::spi::Comms<Error = Error>,
{
    type Error = M::Error;

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut empty: [u8; 0] = [];
        self.mode.transaction(words, &mut empty[..], false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::blocking::spi::{Transfer, Write};

    /// Echoes every word inverted and remembers plain writes.
    #[derive(Default)]
    struct Loopback {
        written: [u8; 8],
        len: usize,
        drove_cs: Option<bool>,
    }

    impl hydrabus::spi::Comms for Loopback {
        type Error = ();

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
            for w in words.iter_mut() {
                *w = !*w;
            }
            Ok(words)
        }

        fn transaction(&mut self, write: &[u8], read: &mut [u8], drive_cs: bool) -> Result<(), ()> {
            if !read.is_empty() || write.len() > self.written.len() {
                return Err(());
            }
            self.written[..write.len()].copy_from_slice(write);
            self.len = write.len();
            self.drove_cs = Some(drive_cs);
            Ok(())
        }
    }

    #[test]
    fn transfer_is_full_duplex() {
        let mut spi = HydrabusSpi::new(Loopback::default());
        let mut words = [0x00, 0xf0];
        assert_eq!(spi.transfer(&mut words).unwrap(), &[0xff, 0x0f]);
    }

    #[test]
    fn write_leaves_chip_select_alone() {
        let mut spi = HydrabusSpi::new(Loopback::default());
        spi.write(&[0x06, 0x02]).unwrap();
        let mode = spi.release();
        assert_eq!(&mode.written[..mode.len], &[0x06, 0x02]);
        assert_eq!(mode.drove_cs, Some(false));
    }
}
