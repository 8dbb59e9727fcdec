//! The M16C register file: two banks of R0-R3/A0/A1/FB selected by FLG.B,
//! plus the unbanked SB, USP, ISP, INTB, PC and FLG.

use std::fmt;

use crate::alu::{OpSize, StatusLayout};

pub const FLG_C: u8 = 0;
pub const FLG_D: u8 = 1;
pub const FLG_Z: u8 = 2;
pub const FLG_S: u8 = 3;
pub const FLG_B: u8 = 4;
pub const FLG_O: u8 = 5;
pub const FLG_I: u8 = 6;
pub const FLG_U: u8 = 7;
pub const FLG_IPL_SHIFT: u8 = 12;

/// Bits of FLG that exist. Everything else reads as zero.
pub const FLG_WRITABLE: u16 = 0x70FF;

pub(super) const FLG_LAYOUT: StatusLayout = StatusLayout {
    carry: Some(FLG_C),
    zero: Some(FLG_Z),
    sign: Some(FLG_S),
    overflow: Some(FLG_O),
    half: None,
};

/// Mask of the 20-bit address space.
pub const ADDR_MASK: u32 = 0xF_FFFF;

const BYTE_NAMES: [&str; 6] = ["R0L", "R0H", "R1L", "R1H", "A0", "A1"];
const WORD_NAMES: [&str; 6] = ["R0", "R1", "R2", "R3", "A0", "A1"];
const PAIR_NAMES: [&str; 6] = ["R2R0", "R3R1", "?", "?", "A1A0", "?"];

/// Name of a generic register selector (0-5) at `size`.
pub fn register_name(selector: u8, size: OpSize) -> &'static str {
    let names = match size {
        OpSize::Byte => &BYTE_NAMES,
        OpSize::Word => &WORD_NAMES,
        OpSize::Long => &PAIR_NAMES,
    };
    names.get(selector as usize).copied().unwrap_or("?")
}

/// Whether `selector` names the low half of a 32-bit pair (R2R0, R3R1,
/// A1A0).
pub fn is_pair(selector: u8) -> bool {
    matches!(selector, 0 | 1 | 4)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bank {
    pub r: [u16; 4],
    pub a: [u16; 2],
    pub fb: u16,
}

/// Control registers as LDC, STC, PUSHC and POPC encode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    IntbL,
    IntbH,
    Flg,
    Isp,
    Sp,
    Sb,
    Fb,
}

impl Control {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code & 7 {
            1 => Self::IntbL,
            2 => Self::IntbH,
            3 => Self::Flg,
            4 => Self::Isp,
            5 => Self::Sp,
            6 => Self::Sb,
            7 => Self::Fb,
            _ => return None,
        })
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IntbL => "INTBL",
            Self::IntbH => "INTBH",
            Self::Flg => "FLG",
            Self::Isp => "ISP",
            Self::Sp => "SP",
            Self::Sb => "SB",
            Self::Fb => "FB",
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct Registers {
    banks: [Bank; 2],
    flg: u16,
    pub pc: u32,
    pub usp: u16,
    pub isp: u16,
    pub sb: u16,
    pub intb: u32,
}

impl Registers {
    /// The bank FLG.B selects.
    pub fn bank(&self) -> &Bank {
        &self.banks[self.flag(FLG_B) as usize]
    }

    pub fn bank_mut(&mut self) -> &mut Bank {
        let b = self.flag(FLG_B) as usize;
        &mut self.banks[b]
    }

    pub fn banks(&self) -> &[Bank; 2] {
        &self.banks
    }

    pub fn flg(&self) -> u16 {
        self.flg
    }

    /// Reserved bits are dropped.
    pub fn set_flg(&mut self, value: u16) {
        self.flg = value & FLG_WRITABLE;
    }

    pub fn flag(&self, bit: u8) -> bool {
        self.flg & (1 << bit) != 0
    }

    pub fn flag_set(&mut self, bit: u8, value: bool) {
        self.flg = crate::alu::set_bit(self.flg, bit, value) & FLG_WRITABLE;
    }

    pub fn ipl(&self) -> u8 {
        (self.flg >> FLG_IPL_SHIFT) as u8 & 7
    }

    pub fn set_ipl(&mut self, level: u8) {
        self.flg = (self.flg & !(7 << FLG_IPL_SHIFT)) | ((level as u16 & 7) << FLG_IPL_SHIFT);
    }

    /// The stack pointer FLG.U selects: USP when set, ISP when clear.
    pub fn sp(&self) -> u16 {
        if self.flag(FLG_U) { self.usp } else { self.isp }
    }

    pub fn set_sp(&mut self, value: u16) {
        if self.flag(FLG_U) {
            self.usp = value;
        } else {
            self.isp = value;
        }
    }

    pub fn r(&self, n: usize) -> u16 {
        self.bank().r[n & 3]
    }

    pub fn set_r(&mut self, n: usize, value: u16) {
        self.bank_mut().r[n & 3] = value;
    }

    pub fn a(&self, n: usize) -> u16 {
        self.bank().a[n & 1]
    }

    pub fn set_a(&mut self, n: usize, value: u16) {
        self.bank_mut().a[n & 1] = value;
    }

    pub fn fb(&self) -> u16 {
        self.bank().fb
    }

    pub fn set_fb(&mut self, value: u16) {
        self.bank_mut().fb = value;
    }

    /// Read a generic register selector: R0L/R0H/R1L/R1H for bytes,
    /// R0-R3 for words, R2R0/R3R1 for pairs, then A0 and A1 (A1A0 as a
    /// pair).
    pub fn get(&self, selector: u8, size: OpSize) -> u32 {
        match (selector, size) {
            (4 | 5, OpSize::Byte) => self.a(selector as usize - 4) as u32 & 0xFF,
            (4 | 5, OpSize::Word) => self.a(selector as usize - 4) as u32,
            (4, OpSize::Long) => (self.a(1) as u32) << 16 | self.a(0) as u32,
            (0..=3, OpSize::Byte) => {
                let word = self.r(selector as usize >> 1);
                if selector & 1 == 0 {
                    word as u32 & 0xFF
                } else {
                    word as u32 >> 8
                }
            }
            (0..=3, OpSize::Word) => self.r(selector as usize) as u32,
            (0 | 1, OpSize::Long) => {
                let n = selector as usize;
                (self.r(n + 2) as u32) << 16 | self.r(n) as u32
            }
            _ => 0,
        }
    }

    /// Write a generic register selector. A byte written to A0/A1 is zero
    /// extended.
    pub fn set(&mut self, selector: u8, size: OpSize, value: u32) {
        match (selector, size) {
            (4 | 5, OpSize::Byte) => self.set_a(selector as usize - 4, value as u8 as u16),
            (4 | 5, OpSize::Word) => self.set_a(selector as usize - 4, value as u16),
            (4, OpSize::Long) => {
                self.set_a(0, value as u16);
                self.set_a(1, (value >> 16) as u16);
            }
            (0..=3, OpSize::Byte) => {
                let n = selector as usize >> 1;
                let word = self.r(n);
                let word = if selector & 1 == 0 {
                    (word & 0xFF00) | value as u8 as u16
                } else {
                    (word & 0x00FF) | (value as u8 as u16) << 8
                };
                self.set_r(n, word);
            }
            (0..=3, OpSize::Word) => self.set_r(selector as usize, value as u16),
            (0 | 1, OpSize::Long) => {
                let n = selector as usize;
                self.set_r(n, value as u16);
                self.set_r(n + 2, (value >> 16) as u16);
            }
            _ => {}
        }
    }

    pub fn control(&self, reg: Control) -> u16 {
        match reg {
            Control::IntbL => self.intb as u16,
            Control::IntbH => (self.intb >> 16) as u16 & 0xF,
            Control::Flg => self.flg,
            Control::Isp => self.isp,
            Control::Sp => self.sp(),
            Control::Sb => self.sb,
            Control::Fb => self.fb(),
        }
    }

    pub fn set_control(&mut self, reg: Control, value: u16) {
        match reg {
            Control::IntbL => self.intb = (self.intb & 0xF_0000) | value as u32,
            Control::IntbH => self.intb = (self.intb & 0xFFFF) | (value as u32 & 0xF) << 16,
            Control::Flg => self.set_flg(value),
            Control::Isp => self.isp = value,
            Control::Sp => self.set_sp(value),
            Control::Sb => self.sb = value,
            Control::Fb => self.set_fb(value),
        }
    }
}
