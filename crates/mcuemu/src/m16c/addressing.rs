//! Operand addressing.
//!
//! Instructions name their operands with 4-bit `src`/`dest` selectors (and
//! a few short 2- and 3-bit forms). Decoding a selector consumes its
//! displacement bytes from the instruction stream and yields a [`Mode`];
//! the CPU then resolves the mode against the live registers to read or
//! write the operand.
//!
//! | selector | byte | word | bit |
//! |---|---|---|---|
//! | 0-3 | R0L R0H R1L R1H | R0-R3 | bit,R0-R3 |
//! | 4-5 | A0 A1 | A0 A1 | bit,A0 bit,A1 |
//! | 6-7 | [A0] [A1] | | [A0] [A1] |
//! | 8-9 | dsp:8[A0] dsp:8[A1] | | base:8[A0] base:8[A1] |
//! | A-B | dsp:8[SB] dsp:8[FB] | | bit,base:8[SB] bit,base:8[FB] |
//! | C-E | dsp:16[A0] dsp:16[A1] dsp:16[SB] | | base:16[..] |
//! | F | abs16 | | bit,base:16 |
//!
//! `dsp:8[FB]` and `dsp:8[SP]` are signed. Bit displacements off A0/A1
//! and the absolute form count bits; off SB and FB they count bits from
//! the byte the base register points at.

use std::fmt;

use crate::alu::OpSize;
use crate::bus::{Bus, Width};
use crate::error::{Fault, Result};

use super::Cpu;
use super::regs::{ADDR_MASK, register_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    A0,
    A1,
    Sb,
    Fb,
    Sp,
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Base::A0 => "A0",
            Base::A1 => "A1",
            Base::Sb => "SB",
            Base::Fb => "FB",
            Base::Sp => "SP",
        })
    }
}

/// A decoded operand. `len` is the number of instruction-stream bytes the
/// operand consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Register direct, selector 0-5.
    Register(u8),
    Indirect(Base),
    Displacement { base: Base, disp: i32, len: u8 },
    Absolute { addr: u32, len: u8 },
    /// `[A1A0]`: a 20-bit address held in the A1:A0 pair.
    Indirect20,
    Immediate { value: u32, len: u8 },
}

impl Mode {
    /// Instruction-stream bytes consumed by this operand.
    pub fn codelen(&self) -> u32 {
        match *self {
            Mode::Displacement { len, .. }
            | Mode::Absolute { len, .. }
            | Mode::Immediate { len, .. } => len as u32,
            _ => 0,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Mode::Register(_))
    }

    /// Extra cycles this operand costs over a register operand.
    pub fn cycles(&self) -> u32 {
        match *self {
            Mode::Register(_) => 0,
            Mode::Immediate { .. } | Mode::Indirect(_) => 1,
            Mode::Indirect20 => 2,
            Mode::Displacement { len, .. } | Mode::Absolute { len, .. } => 1 + len as u32,
        }
    }

    /// Render at an operand size.
    pub fn sized(&self, size: OpSize) -> SizedMode<'_> {
        SizedMode(self, size)
    }
}

pub struct SizedMode<'a>(&'a Mode, OpSize);

impl fmt::Display for SizedMode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.0 {
            Mode::Register(selector) => f.write_str(register_name(selector, self.1)),
            Mode::Indirect(base) => write!(f, "[{base}]"),
            Mode::Displacement { base, disp, .. } => write!(f, "{disp}[{base}]"),
            Mode::Absolute { addr, len: 3 } => write!(f, "{addr:05X}h"),
            Mode::Absolute { addr, .. } => write!(f, "{addr:04X}h"),
            Mode::Indirect20 => f.write_str("[A1A0]"),
            Mode::Immediate { value, .. } => match self.1 {
                OpSize::Byte => write!(f, "#{value:02X}h"),
                _ => write!(f, "#{value:04X}h"),
            },
        }
    }
}

/// A bit operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitMode {
    /// Bit 0-15 of a word register.
    Register { selector: u8, bit: u8 },
    /// Bit address held in A0/A1.
    Indirect(Base),
    Displacement { base: Base, disp: i32, len: u8 },
    /// Absolute bit address.
    Absolute { addr: u32, len: u8 },
}

impl BitMode {
    pub fn codelen(&self) -> u32 {
        match *self {
            BitMode::Register { .. } => 1,
            BitMode::Indirect(_) => 0,
            BitMode::Displacement { len, .. } | BitMode::Absolute { len, .. } => len as u32,
        }
    }
}

impl fmt::Display for BitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BitMode::Register { selector, bit } => {
                write!(f, "{bit},{}", register_name(selector, OpSize::Word))
            }
            BitMode::Indirect(base) => write!(f, "[{base}]"),
            BitMode::Displacement {
                base: base @ (Base::Sb | Base::Fb),
                disp,
                ..
            } => write!(f, "{},{}[{base}]", disp & 7, disp >> 3),
            BitMode::Displacement { base, disp, .. } => write!(f, "{disp}[{base}]"),
            BitMode::Absolute { addr, .. } => write!(f, "{},{:04X}h", addr & 7, addr >> 3),
        }
    }
}

/// Where a resolved operand lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(u8),
    Memory(u32),
    Immediate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitLocation {
    Register { selector: u8, bit: u8 },
    Memory { addr: u32, bit: u8 },
}

/// Sequential reader over the instruction stream at `pc`.
pub struct Stream<'a, B> {
    bus: &'a mut B,
    pc: u32,
    consumed: u32,
}

impl<'a, B: Bus> Stream<'a, B> {
    pub fn new(bus: &'a mut B, pc: u32) -> Self {
        Self {
            bus,
            pc,
            consumed: 0,
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    /// Address of the first byte not yet consumed.
    pub fn cursor(&self) -> u32 {
        self.pc.wrapping_add(self.consumed) & ADDR_MASK
    }

    pub fn u8(&mut self) -> Result<u8> {
        let value = self.bus.read8(self.cursor())?;
        self.consumed += 1;
        Ok(value)
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let lo = self.u8()?;
        let hi = self.u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn u20(&mut self) -> Result<u32> {
        let lo = self.u16()? as u32;
        let hi = self.u8()? as u32;
        Ok((hi << 16 | lo) & ADDR_MASK)
    }

    pub fn immediate(&mut self, size: OpSize) -> Result<Mode> {
        Ok(match size {
            OpSize::Byte => Mode::Immediate {
                value: self.u8()? as u32,
                len: 1,
            },
            _ => Mode::Immediate {
                value: self.u16()? as u32,
                len: 2,
            },
        })
    }

    /// A 4-bit `src`/`dest` selector.
    pub fn generic(&mut self, selector: u8) -> Result<Mode> {
        Ok(match selector & 0xF {
            selector @ 0..=5 => Mode::Register(selector),
            6 => Mode::Indirect(Base::A0),
            7 => Mode::Indirect(Base::A1),
            8 => self.disp8(Base::A0)?,
            9 => self.disp8(Base::A1)?,
            0xA => self.disp8(Base::Sb)?,
            0xB => self.disp8(Base::Fb)?,
            0xC => self.disp16(Base::A0)?,
            0xD => self.disp16(Base::A1)?,
            0xE => self.disp16(Base::Sb)?,
            _ => Mode::Absolute {
                addr: self.u16()? as u32,
                len: 2,
            },
        })
    }

    /// The 3-bit `DDD` of the short formats: R0H, R0L, dsp:8[SB],
    /// dsp:8[FB], abs16. Codes 0-2 belong to other instructions.
    pub fn short_dest(&mut self, code: u8) -> Result<Option<Mode>> {
        Ok(Some(match code & 7 {
            3 => Mode::Register(1),
            4 => Mode::Register(0),
            5 => self.disp8(Base::Sb)?,
            6 => self.disp8(Base::Fb)?,
            7 => Mode::Absolute {
                addr: self.u16()? as u32,
                len: 2,
            },
            _ => return Ok(None),
        }))
    }

    /// The 2-bit `SS`/`DD` of the short formats. Code 0 is the register
    /// `other`.
    pub fn short_src(&mut self, code: u8, other: u8) -> Result<Mode> {
        Ok(match code & 3 {
            0 => Mode::Register(other),
            1 => self.disp8(Base::Sb)?,
            2 => self.disp8(Base::Fb)?,
            _ => Mode::Absolute {
                addr: self.u16()? as u32,
                len: 2,
            },
        })
    }

    /// A 4-bit bit-operand selector.
    pub fn bit(&mut self, selector: u8) -> Result<BitMode> {
        Ok(match selector & 0xF {
            selector @ 0..=5 => BitMode::Register {
                selector,
                bit: self.u8()? & 0xF,
            },
            6 => BitMode::Indirect(Base::A0),
            7 => BitMode::Indirect(Base::A1),
            selector @ (8..=0xA) => BitMode::Displacement {
                base: [Base::A0, Base::A1, Base::Sb][selector as usize - 8],
                disp: self.u8()? as i32,
                len: 1,
            },
            0xB => BitMode::Displacement {
                base: Base::Fb,
                disp: self.i8()? as i32,
                len: 1,
            },
            selector @ (0xC..=0xE) => BitMode::Displacement {
                base: [Base::A0, Base::A1, Base::Sb][selector as usize - 0xC],
                disp: self.u16()? as i32,
                len: 2,
            },
            _ => BitMode::Absolute {
                addr: self.u16()? as u32,
                len: 2,
            },
        })
    }

    fn disp8(&mut self, base: Base) -> Result<Mode> {
        let disp = match base {
            Base::Fb | Base::Sp => self.i8()? as i32,
            _ => self.u8()? as i32,
        };
        Ok(Mode::Displacement { base, disp, len: 1 })
    }

    fn disp16(&mut self, base: Base) -> Result<Mode> {
        Ok(Mode::Displacement {
            base,
            disp: self.u16()? as i32,
            len: 2,
        })
    }

    /// `dsp:8[SP]`, signed.
    pub fn stack_disp(&mut self) -> Result<Mode> {
        self.disp8(Base::Sp)
    }
}

pub(super) fn width(size: OpSize) -> Width {
    match size {
        OpSize::Byte => Width::Byte,
        _ => Width::Word,
    }
}

/// The operand accessor.
impl Cpu {
    fn base(&self, base: Base) -> u16 {
        match base {
            Base::A0 => self.regs.a(0),
            Base::A1 => self.regs.a(1),
            Base::Sb => self.regs.sb,
            Base::Fb => self.regs.fb(),
            Base::Sp => self.regs.sp(),
        }
    }

    /// Resolve a mode against the current registers.
    pub fn locate(&self, mode: &Mode) -> Location {
        match *mode {
            Mode::Register(selector) => Location::Register(selector),
            Mode::Indirect(base) => Location::Memory(self.base(base) as u32),
            Mode::Displacement { base, disp, len } => {
                let addr = (self.base(base) as i32).wrapping_add(disp) as u32;
                let mask = if len == 3 { ADDR_MASK } else { 0xFFFF };
                Location::Memory(addr & mask)
            }
            Mode::Absolute { addr, .. } => Location::Memory(addr & ADDR_MASK),
            Mode::Indirect20 => {
                let addr = (self.regs.a(1) as u32) << 16 | self.regs.a(0) as u32;
                Location::Memory(addr & ADDR_MASK)
            }
            Mode::Immediate { value, .. } => Location::Immediate(value),
        }
    }

    /// Read memory, charging the bus wait states.
    pub(super) fn load(&mut self, bus: &mut impl Bus, addr: u32, width: Width) -> Result<u32> {
        let addr = addr & ADDR_MASK;
        self.wait += bus.wait_states(addr);
        Ok(bus.read(width, addr)?)
    }

    pub(super) fn store(
        &mut self,
        bus: &mut impl Bus,
        addr: u32,
        width: Width,
        value: u32,
    ) -> Result<()> {
        let addr = addr & ADDR_MASK;
        self.wait += bus.wait_states(addr);
        Ok(bus.write(width, addr, value & width.mask())?)
    }

    fn load_sized(&mut self, bus: &mut impl Bus, addr: u32, size: OpSize) -> Result<u32> {
        match size {
            OpSize::Long => {
                let lo = self.load(bus, addr, Width::Word)?;
                let hi = self.load(bus, addr.wrapping_add(2), Width::Word)?;
                Ok(hi << 16 | lo)
            }
            _ => self.load(bus, addr, width(size)),
        }
    }

    fn store_sized(&mut self, bus: &mut impl Bus, addr: u32, size: OpSize, value: u32) -> Result<()> {
        match size {
            OpSize::Long => {
                self.store(bus, addr, Width::Word, value)?;
                self.store(bus, addr.wrapping_add(2), Width::Word, value >> 16)
            }
            _ => self.store(bus, addr, width(size), value),
        }
    }

    /// Read an operand. Registers of `Long` size are the pairs R2R0,
    /// R3R1 and A1A0.
    pub fn get(&mut self, bus: &mut impl Bus, mode: &Mode, size: OpSize) -> Result<u32> {
        match self.locate(mode) {
            Location::Register(selector) => Ok(self.regs.get(selector, size)),
            Location::Memory(addr) => self.load_sized(bus, addr, size),
            Location::Immediate(value) => Ok(value & size.mask()),
        }
    }

    /// Write an operand. Immediates cannot be written.
    pub fn set(&mut self, bus: &mut impl Bus, mode: &Mode, size: OpSize, value: u32) -> Result<()> {
        match self.locate(mode) {
            Location::Register(selector) => {
                self.regs.set(selector, size, value);
                Ok(())
            }
            Location::Memory(addr) => self.store_sized(bus, addr, size, value),
            Location::Immediate(_) => Err(self.illegal(0xF)),
        }
    }

    /// A 20-bit operand for JMPI.A and friends: a register pair, or three
    /// bytes of memory.
    pub(super) fn get_address(&mut self, bus: &mut impl Bus, mode: &Mode) -> Result<u32> {
        let value = match self.locate(mode) {
            Location::Register(selector) => self.regs.get(selector, OpSize::Long),
            Location::Memory(addr) => self.load(bus, addr, Width::Triple)?,
            Location::Immediate(value) => value,
        };
        Ok(value & ADDR_MASK)
    }

    /// The effective address of a memory operand, as MOVA and PUSHA
    /// compute it.
    pub(super) fn effective_address(&self, mode: &Mode) -> Result<u16> {
        match self.locate(mode) {
            Location::Memory(addr) => Ok(addr as u16),
            _ => Err(self.illegal(0)),
        }
    }

    pub fn locate_bit(&self, mode: &BitMode) -> BitLocation {
        let bit_address = |address: u32| BitLocation::Memory {
            addr: address >> 3 & 0x1FFF,
            bit: (address & 7) as u8,
        };
        match *mode {
            BitMode::Register { selector, bit } => BitLocation::Register { selector, bit },
            BitMode::Indirect(base) => bit_address(self.base(base) as u32),
            BitMode::Displacement {
                base: base @ (Base::Sb | Base::Fb),
                disp,
                ..
            } => BitLocation::Memory {
                addr: (self.base(base) as i32).wrapping_add(disp >> 3) as u32 & 0xFFFF,
                bit: (disp & 7) as u8,
            },
            BitMode::Displacement { base, disp, .. } => {
                bit_address((self.base(base) as i32).wrapping_add(disp) as u32 & 0xFFFF)
            }
            BitMode::Absolute { addr, .. } => bit_address(addr),
        }
    }

    pub fn get_bit(&mut self, bus: &mut impl Bus, mode: &BitMode) -> Result<bool> {
        Ok(match self.locate_bit(mode) {
            BitLocation::Register { selector, bit } => {
                self.regs.get(selector, OpSize::Word) & (1 << bit) != 0
            }
            BitLocation::Memory { addr, bit } => {
                self.load(bus, addr, Width::Byte)? & (1 << bit) != 0
            }
        })
    }

    /// Bit writes to memory are whole-byte read-modify-write cycles.
    pub fn set_bit(&mut self, bus: &mut impl Bus, mode: &BitMode, value: bool) -> Result<()> {
        match self.locate_bit(mode) {
            BitLocation::Register { selector, bit } => {
                let word = self.regs.get(selector, OpSize::Word) as u16;
                let word = crate::alu::set_bit(word, bit, value);
                self.regs.set(selector, OpSize::Word, word as u32);
            }
            BitLocation::Memory { addr, bit } => {
                let byte = self.load(bus, addr, Width::Byte)? as u16;
                let byte = crate::alu::set_bit(byte, bit, value);
                self.store(bus, addr, Width::Byte, byte as u32)?;
            }
        }
        Ok(())
    }

    /// The fault for an operand encoding this instruction cannot use.
    pub(super) fn illegal(&self, selector: u8) -> Fault {
        Fault::IllegalAddressingMode {
            pc: self.regs.pc,
            opcode: self.opcode,
            selector,
        }
    }
}
