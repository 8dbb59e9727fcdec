//! The bus interface consumed by the cores, plus trivial memory backends.
//!
//! Peripherals live behind [`Bus`] and are not part of this crate. [`Ram`]
//! and [`Rom`] exist so firmware images and tests have somewhere to live.

use crate::error::BusFault;

/// Width of a single bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    /// Three bytes, used for 20-bit pointers on the M16C.
    Triple,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Triple => 3,
        }
    }

    pub const fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Triple => 0xFF_FFFF,
        }
    }
}

/// A trait to provide bus read/write operations.
///
/// Only the byte primitives are required. Wider accesses default to
/// little-endian composition of byte accesses; a bus with real 16-bit
/// transactions may override them.
pub trait Bus {
    fn read8(&mut self, addr: u32) -> Result<u8, BusFault>;
    fn write8(&mut self, addr: u32, value: u8) -> Result<(), BusFault>;

    fn read(&mut self, width: Width, addr: u32) -> Result<u32, BusFault> {
        let mut value = 0;
        for i in 0..width.bytes() {
            value |= (self.read8(addr.wrapping_add(i))? as u32) << (8 * i);
        }
        Ok(value)
    }

    fn write(&mut self, width: Width, addr: u32, value: u32) -> Result<(), BusFault> {
        for i in 0..width.bytes() {
            self.write8(addr.wrapping_add(i), (value >> (8 * i)) as u8)?;
        }
        Ok(())
    }

    /// Extra cycles charged for accessing `addr`.
    fn wait_states(&self, _addr: u32) -> u32 {
        0
    }
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn read8(&mut self, addr: u32) -> Result<u8, BusFault> {
        (**self).read8(addr)
    }
    fn write8(&mut self, addr: u32, value: u8) -> Result<(), BusFault> {
        (**self).write8(addr, value)
    }
    fn read(&mut self, width: Width, addr: u32) -> Result<u32, BusFault> {
        (**self).read(width, addr)
    }
    fn write(&mut self, width: Width, addr: u32, value: u32) -> Result<(), BusFault> {
        (**self).write(width, addr, value)
    }
    fn wait_states(&self, addr: u32) -> u32 {
        (**self).wait_states(addr)
    }
}

/// The empty bus: reads return zero, writes vanish.
impl Bus for () {
    fn read8(&mut self, _addr: u32) -> Result<u8, BusFault> {
        Ok(0)
    }
    fn write8(&mut self, _addr: u32, _value: u8) -> Result<(), BusFault> {
        Ok(())
    }
}

/// Flat read/write memory starting at address zero. Accesses past the end
/// fault.
pub struct Ram {
    ram: Vec<u8>,
    wait_states: u32,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        Self {
            ram: vec![0; size],
            wait_states: 0,
        }
    }

    /// Charge `wait_states` extra cycles for every access.
    pub fn with_wait_states(mut self, wait_states: u32) -> Self {
        self.wait_states = wait_states;
        self
    }

    /// Copy `image` into memory at `base`.
    pub fn load(&mut self, base: u32, image: &[u8]) -> Result<(), BusFault> {
        let start = base as usize;
        let end = start + image.len();
        if end > self.ram.len() {
            return Err(BusFault::write(base, image.len().min(u8::MAX as usize) as u8));
        }
        self.ram[start..end].copy_from_slice(image);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.ram
    }
}

impl Bus for Ram {
    fn read8(&mut self, addr: u32) -> Result<u8, BusFault> {
        self.ram
            .get(addr as usize)
            .copied()
            .ok_or(BusFault::read(addr, 1))
    }
    fn write8(&mut self, addr: u32, value: u8) -> Result<(), BusFault> {
        match self.ram.get_mut(addr as usize) {
            Some(byte) => {
                *byte = value;
                Ok(())
            }
            None => Err(BusFault::write(addr, 1)),
        }
    }
    fn wait_states(&self, _addr: u32) -> u32 {
        self.wait_states
    }
}

/// Read-only memory. Reads past the image return 0xFF like erased flash;
/// writes are ignored.
pub struct Rom {
    rom: Vec<u8>,
}

impl Rom {
    pub fn new(contents: Vec<u8>) -> Self {
        Self { rom: contents }
    }
}

impl Bus for Rom {
    fn read8(&mut self, addr: u32) -> Result<u8, BusFault> {
        Ok(self.rom.get(addr as usize).copied().unwrap_or(0xFF))
    }
    fn write8(&mut self, _addr: u32, _value: u8) -> Result<(), BusFault> {
        // do nothing
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Access;

    #[test]
    fn wide_accesses_are_little_endian() {
        let mut ram = Ram::new(16);
        ram.write(Width::Triple, 4, 0x0A_BCDE).unwrap();
        assert_eq!(&ram.as_slice()[4..7], &[0xDE, 0xBC, 0x0A]);
        assert_eq!(ram.read(Width::Word, 5).unwrap(), 0x0ABC);
        assert_eq!(ram.read(Width::Triple, 4).unwrap(), 0x0A_BCDE);
    }

    #[test]
    fn ram_faults_past_the_end() {
        let mut ram = Ram::new(4);
        let fault = ram.read(Width::Word, 3).unwrap_err();
        assert_eq!(fault.addr, 4);
        assert_eq!(fault.access, Access::Read);
        assert!(ram.load(2, &[1, 2, 3]).is_err());
    }

    #[test]
    fn rom_ignores_writes() {
        let mut rom = Rom::new(vec![0x12, 0x34]);
        rom.write8(0, 0xAA).unwrap();
        assert_eq!(rom.read8(0).unwrap(), 0x12);
        assert_eq!(rom.read8(100).unwrap(), 0xFF);
    }
}
