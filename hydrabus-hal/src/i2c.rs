use embedded_hal::blocking::i2c;

/// `HydrabusI2c` adapts a HydraBus in I2C mode to the blocking I2C traits.
/// Addresses are 7-bit.
pub struct HydrabusI2c<M: hydrabus::i2c::Comms> {
    mode: M,
}

impl<M: hydrabus::i2c::Comms> HydrabusI2c<M> {
    pub fn new(mode: M) -> Self {
        Self { mode }
    }

    pub fn release(self) -> M {
        self.mode
    }
}

impl<M, Error> i2c::Write for HydrabusI2c<M>
where
    M: hydrabus::i2c::Comms<Error = Error>,
{
    type Error = M::Error;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.mode.write_to(address, bytes)
    }
}

impl<M, Error> i2c::Read for HydrabusI2c<M>
where
    M: hydrabus::i2c::Comms<Error = Error>,
{
    type Error = M::Error;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.mode.read_from(address, buffer)
    }
}

impl<M, Error> i2c::WriteRead for HydrabusI2c<M>
where
    M: hydrabus::i2c::Comms<Error = Error>,
{
    type Error = M::Error;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.mode.write_read(address, bytes, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::blocking::i2c::{Read, Write, WriteRead};

    /// A single target at 0x50 holding a small register file.
    struct Eeprom {
        regs: [u8; 4],
        pointer: usize,
    }

    const ADDRESS: u8 = 0x50;

    impl hydrabus::i2c::Comms for Eeprom {
        type Error = &'static str;

        fn write_to(&mut self, address: u8, data: &[u8]) -> Result<(), Self::Error> {
            if address != ADDRESS {
                return Err("nack");
            }
            if let Some((reg, rest)) = data.split_first() {
                self.pointer = *reg as usize;
                for b in rest {
                    self.regs[self.pointer % 4] = *b;
                    self.pointer += 1;
                }
            }
            Ok(())
        }

        fn read_from(&mut self, address: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
            if address != ADDRESS {
                return Err("nack");
            }
            for b in buf.iter_mut() {
                *b = self.regs[self.pointer % 4];
                self.pointer += 1;
            }
            Ok(())
        }

        fn write_read(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<(), Self::Error> {
            self.write_to(address, data)?;
            self.read_from(address, buf)
        }
    }

    #[test]
    fn register_access() {
        let mut i2c = HydrabusI2c::new(Eeprom {
            regs: [0; 4],
            pointer: 0,
        });
        i2c.write(ADDRESS, &[0x01, 0xaa, 0xbb]).unwrap();

        let mut buf = [0u8; 2];
        i2c.write_read(ADDRESS, &[0x01], &mut buf).unwrap();
        assert_eq!(buf, [0xaa, 0xbb]);

        let mut one = [0u8; 1];
        i2c.read(ADDRESS, &mut one).unwrap();
        assert_eq!(one, [0x00]);
    }

    #[test]
    fn errors_are_passed_through() {
        let mut i2c = HydrabusI2c::new(Eeprom {
            regs: [0; 4],
            pointer: 0,
        });
        assert_eq!(i2c.write(0x51, &[0x00]), Err("nack"));
    }
}
