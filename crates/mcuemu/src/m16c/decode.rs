use std::fmt;

use crate::alu::OpSize;
use crate::bus::Bus;
use crate::error::{Fault, Result};

use super::addressing::{Base, BitMode, Mode, Stream};
use super::regs::{ADDR_MASK, Control, FLG_C, FLG_O, FLG_S, FLG_Z, is_pair, register_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Geu,
    Gtu,
    Eq,
    N,
    Ltu,
    Leu,
    Ne,
    Pz,
    Le,
    O,
    Ge,
    Gt,
    No,
    Lt,
}

impl Cond {
    /// The 4-bit condition field. Codes 0-7 double as the 3-bit field of
    /// the short JCnd.
    pub fn from_code(code: u8) -> Option<Self> {
        use Cond::*;
        Some(match code & 0xF {
            0 => Geu,
            1 => Gtu,
            2 => Eq,
            3 => N,
            4 => Ltu,
            5 => Leu,
            6 => Ne,
            7 => Pz,
            8 => Le,
            9 => O,
            0xA => Ge,
            0xC => Gt,
            0xD => No,
            0xE => Lt,
            _ => return None,
        })
    }

    /// The condition byte that trails BMCnd.
    pub fn from_byte(code: u8) -> Option<Self> {
        match code {
            0x00..=0x03 => Self::from_code(code),
            0x04 => Some(Cond::Le),
            0x05 => Some(Cond::O),
            0x06 => Some(Cond::Ge),
            0xF8..=0xFB => Self::from_code(code - 0xF4),
            0xFC => Some(Cond::Gt),
            0xFD => Some(Cond::No),
            0xFE => Some(Cond::Lt),
            _ => None,
        }
    }

    pub fn holds(self, flg: u16) -> bool {
        let bit = |b: u8| flg & (1 << b) != 0;
        let (c, z, s, o) = (bit(FLG_C), bit(FLG_Z), bit(FLG_S), bit(FLG_O));
        match self {
            Cond::Geu => c,
            Cond::Gtu => c && !z,
            Cond::Eq => z,
            Cond::N => s,
            Cond::Ltu => !c,
            Cond::Leu => !c || z,
            Cond::Ne => !z,
            Cond::Pz => !s,
            Cond::Le => z || (s ^ o),
            Cond::O => o,
            Cond::Ge => !(s ^ o),
            Cond::Gt => !(z || (s ^ o)),
            Cond::No => !o,
            Cond::Lt => s ^ o,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cond::Geu => "GEU",
            Cond::Gtu => "GTU",
            Cond::Eq => "EQ",
            Cond::N => "N",
            Cond::Ltu => "LTU",
            Cond::Leu => "LEU",
            Cond::Ne => "NE",
            Cond::Pz => "PZ",
            Cond::Le => "LE",
            Cond::O => "O",
            Cond::Ge => "GE",
            Cond::Gt => "GT",
            Cond::No => "NO",
            Cond::Lt => "LT",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    And,
    Or,
    Xor,
    Tst,
    Dadd,
    Dadc,
    Dsub,
    Dsbb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Abs,
    Neg,
    Not,
    Rolc,
    Rorc,
    Adcf,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Rot,
    Shl,
    Sha,
}

/// Shift count: positive shifts left, negative shifts right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Imm(i8),
    R1h,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    Btst,
    Btstc,
    Btsts,
    Bntst,
    Band,
    Bnand,
    Bor,
    Bnor,
    Bxor,
    Bnxor,
    Bset,
    Bclr,
    Bnot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivKind {
    Divu,
    Div,
    Divx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Smovf,
    Smovb,
    Sstr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpSize {
    S,
    B,
    W,
    A,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Brk,
    Und,
    Into,
    Wait,
    Rts,
    Reit,
    Exitd,
    Int(u8),
    Jmps(u8),
    Jsrs(u8),
    Enter(u8),
    Ldipl(u8),
    Fset(u8),
    Fclr(u8),
    Pushm(u8),
    Popm(u8),
    Mov { size: OpSize, src: Mode, dst: Mode },
    /// Effective address of `src` into register selector `dst`.
    Mova { src: Mode, dst: u8 },
    Binary { op: BinOp, size: OpSize, src: Mode, dst: Mode },
    Unary { op: UnOp, size: OpSize, dst: Mode },
    /// Sign extend `dst` in place to twice `size`.
    Exts { size: OpSize, dst: Mode },
    Shift { op: ShiftOp, size: OpSize, count: Count, dst: Mode },
    Mul { signed: bool, size: OpSize, src: Mode, dst: Mode },
    Div { kind: DivKind, size: OpSize, src: Mode },
    Xchg { size: OpSize, reg: u8, dst: Mode },
    Push { size: OpSize, src: Mode },
    Pop { size: OpSize, dst: Mode },
    Pusha { src: Mode },
    Pushc(Control),
    Popc(Control),
    Ldc { src: Mode, dst: Control },
    Stc { src: Control, dst: Mode },
    StcPc { dst: Mode },
    AddSp { value: i16 },
    Lde { size: OpSize, src: Mode, dst: Mode },
    Ste { size: OpSize, src: Mode, dst: Mode },
    /// STZ, or STNZ when `nonzero`.
    Stz { nonzero: bool, value: u8, dst: Mode },
    Stzx { zero: u8, nonzero: u8, dst: Mode },
    Bit { op: BitOp, operand: BitMode },
    Bmcnd { cond: Cond, operand: BitMode },
    BmcndC(Cond),
    Jmp { size: JumpSize, target: u32 },
    Jcnd { cond: Cond, target: u32 },
    Jsr { far: bool, target: u32 },
    Jmpi { far: bool, src: Mode },
    Jsri { far: bool, src: Mode },
    Adjnz { size: OpSize, step: i8, dst: Mode, target: u32 },
    Str { op: StringOp, size: OpSize },
}

/// Signed 4-bit immediate from an opcode nibble.
fn imm4(nibble: u8) -> i8 {
    ((nibble << 4) as i8) >> 4
}

fn quick(nibble: u8, size: OpSize) -> Mode {
    Mode::Immediate {
        value: imm4(nibble) as i32 as u32 & size.mask(),
        len: 0,
    }
}

fn relative(base: u32, disp: i32) -> u32 {
    (base as i32).wrapping_add(disp) as u32 & ADDR_MASK
}

/// The 20-bit operand of LDE and STE.
fn far<B: Bus>(code: u8, stream: &mut Stream<B>) -> Result<Mode> {
    Ok(match code & 3 {
        0 => Mode::Absolute {
            addr: stream.u20()?,
            len: 3,
        },
        1 => Mode::Displacement {
            base: Base::A0,
            disp: stream.u20()? as i32,
            len: 3,
        },
        _ => Mode::Indirect20,
    })
}

const BIT_OPS: [Option<BitOp>; 16] = [
    Some(BitOp::Btstc),
    Some(BitOp::Btsts),
    None,
    Some(BitOp::Bntst),
    Some(BitOp::Band),
    Some(BitOp::Bnand),
    Some(BitOp::Bor),
    Some(BitOp::Bnor),
    Some(BitOp::Bclr),
    Some(BitOp::Bset),
    Some(BitOp::Bnot),
    Some(BitOp::Btst),
    Some(BitOp::Bxor),
    Some(BitOp::Bnxor),
    None,
    None,
];

const IMM_OPS: [BinOp; 9] = [
    BinOp::Tst,
    BinOp::Xor,
    BinOp::And,
    BinOp::Or,
    BinOp::Add,
    BinOp::Sub,
    BinOp::Adc,
    BinOp::Sbb,
    BinOp::Cmp,
];

const DECIMAL_OPS: [BinOp; 4] = [BinOp::Dadd, BinOp::Dsub, BinOp::Dadc, BinOp::Dsbb];

/// Decode one instruction from `stream`. The stream is left just past the
/// instruction, so `stream.consumed()` is its length.
pub fn decode<B: Bus>(stream: &mut Stream<B>) -> Result<Instruction> {
    use Instruction::*;

    let pc = stream.pc();
    let b0 = stream.u8()?;
    let size = if b0 & 1 == 0 {
        OpSize::Byte
    } else {
        OpSize::Word
    };
    let undefined = |b1: Option<u8>| Fault::UndefinedOpcode {
        pc,
        opcode: match b1 {
            Some(b1) => u16::from_be_bytes([b0, b1]),
            None => b0 as u16,
        },
    };
    let illegal = |b1: u8, selector: u8| Fault::IllegalAddressingMode {
        pc,
        opcode: u16::from_be_bytes([b0, b1]),
        selector,
    };

    let insn = match b0 {
        0x00 => Brk,
        0x04 => Nop,
        // MOV.B:S R0L/R0H,dest
        0x01..=0x07 => Mov {
            size: OpSize::Byte,
            src: Mode::Register((b0 >> 2) & 1),
            dst: stream.short_src(b0 & 3, 0)?,
        },
        // Short two-operand forms onto R0L/R0H (A0/A1 for the MOV at 0x30)
        0x08..=0x3F => {
            let d = (b0 >> 2) & 1;
            let group = b0 >> 3;
            let (dst, other) = if group == 6 {
                (Mode::Register(4 + d), 0)
            } else {
                (Mode::Register(d), 1 - d)
            };
            let src = stream.short_src(b0 & 3, other)?;
            let size = OpSize::Byte;
            match group {
                1 | 6 => Mov { size, src, dst },
                2 => Binary { op: BinOp::And, size, src, dst },
                3 => Binary { op: BinOp::Or, size, src, dst },
                4 => Binary { op: BinOp::Add, size, src, dst },
                5 => Binary { op: BinOp::Sub, size, src, dst },
                _ => Binary { op: BinOp::Cmp, size, src, dst },
            }
        }
        // BCLR/BSET/BNOT/BTST:S bit,base:11[SB]
        0x40..=0x5F => {
            let disp = stream.u8()? as i32;
            let operand = BitMode::Displacement {
                base: Base::Sb,
                disp: disp << 3 | (b0 & 7) as i32,
                len: 1,
            };
            let op = match (b0 >> 3) & 3 {
                0 => BitOp::Bclr,
                1 => BitOp::Bset,
                2 => BitOp::Bnot,
                _ => BitOp::Btst,
            };
            Bit { op, operand }
        }
        0x60..=0x67 => Jmp {
            size: JumpSize::S,
            target: pc.wrapping_add(2 + (b0 & 7) as u32) & ADDR_MASK,
        },
        0x68..=0x6F => {
            let cond = Cond::from_code(b0 & 7).ok_or(undefined(None))?;
            let disp = stream.i8()? as i32;
            Jcnd {
                cond,
                target: relative(pc.wrapping_add(1), disp),
            }
        }
        0x70 | 0x71 | 0x72 | 0x73 | 0x78 | 0x79 | 0x80 | 0x81 | 0x88 | 0x89 | 0x90 | 0x91
        | 0x98 | 0x99 | 0xA0 | 0xA1 | 0xA8 | 0xA9 | 0xB0 | 0xB1 | 0xB8 | 0xB9 | 0xC0 | 0xC1 => {
            let b1 = stream.u8()?;
            let src = stream.generic(b1 >> 4)?;
            let dst = stream.generic(b1 & 0xF)?;
            let binary = |op| Binary { op, size, src, dst };
            match b0 & 0xFE {
                0x70 | 0x78 => {
                    // The product lands in R0/R1/A0/A1 or a register pair.
                    let legal = match (dst, size) {
                        (Mode::Register(s), OpSize::Byte) => matches!(s, 0 | 2 | 4 | 5),
                        (Mode::Register(s), _) => is_pair(s),
                        _ => true,
                    };
                    if !legal {
                        return Err(illegal(b1, b1 & 0xF));
                    }
                    Mul {
                        signed: b0 & 0xFE == 0x78,
                        size,
                        src,
                        dst,
                    }
                }
                0x72 => Mov { size, src, dst },
                0x80 => binary(BinOp::Tst),
                0x88 => binary(BinOp::Xor),
                0x90 => binary(BinOp::And),
                0x98 => binary(BinOp::Or),
                0xA0 => binary(BinOp::Add),
                0xA8 => binary(BinOp::Sub),
                0xB0 => binary(BinOp::Adc),
                0xB8 => binary(BinOp::Sbb),
                _ => binary(BinOp::Cmp),
            }
        }
        0x74 | 0x75 => {
            let b1 = stream.u8()?;
            let lo = b1 & 0xF;
            match b1 >> 4 {
                code @ 0x0..=0x2 => {
                    let src = stream.generic(lo)?;
                    let dst = far(code, stream)?;
                    Ste { size, src, dst }
                }
                0x3 => {
                    let src = stream.generic(lo)?;
                    let dst = stream.stack_disp()?;
                    Mov { size, src, dst }
                }
                0x4 => Push {
                    size,
                    src: stream.generic(lo)?,
                },
                0x5 => Unary {
                    op: UnOp::Neg,
                    size,
                    dst: stream.generic(lo)?,
                },
                0x6 => Shift {
                    op: ShiftOp::Rot,
                    size,
                    count: Count::R1h,
                    dst: stream.generic(lo)?,
                },
                0x7 => Unary {
                    op: UnOp::Not,
                    size,
                    dst: stream.generic(lo)?,
                },
                code @ 0x8..=0xA => {
                    let dst = stream.generic(lo)?;
                    let src = far(code, stream)?;
                    Lde { size, src, dst }
                }
                0xB => {
                    let dst = stream.generic(lo)?;
                    let src = stream.stack_disp()?;
                    Mov { size, src, dst }
                }
                0xC => {
                    let dst = stream.generic(lo)?;
                    let src = stream.immediate(size)?;
                    Mov { size, src, dst }
                }
                0xD => Pop {
                    size,
                    dst: stream.generic(lo)?,
                },
                0xE => Shift {
                    op: ShiftOp::Shl,
                    size,
                    count: Count::R1h,
                    dst: stream.generic(lo)?,
                },
                _ => Shift {
                    op: ShiftOp::Sha,
                    size,
                    count: Count::R1h,
                    dst: stream.generic(lo)?,
                },
            }
        }
        0x76 | 0x77 => {
            let b1 = stream.u8()?;
            let operand = stream.generic(b1 & 0xF)?;
            let unary = |op| Unary {
                op,
                size,
                dst: operand,
            };
            match b1 >> 4 {
                op @ 0..=8 => Binary {
                    op: IMM_OPS[op as usize],
                    size,
                    src: stream.immediate(size)?,
                    dst: operand,
                },
                0x9 => Div {
                    kind: DivKind::Divx,
                    size,
                    src: operand,
                },
                0xA => unary(UnOp::Rolc),
                0xB => unary(UnOp::Rorc),
                0xC => Div {
                    kind: DivKind::Divu,
                    size,
                    src: operand,
                },
                0xD => Div {
                    kind: DivKind::Div,
                    size,
                    src: operand,
                },
                0xE => unary(UnOp::Adcf),
                _ => unary(UnOp::Abs),
            }
        }
        0x7A | 0x7B => {
            let b1 = stream.u8()?;
            if b1 & 0x80 != 0 {
                let control = Control::from_code(b1 >> 4).ok_or(undefined(Some(b1)))?;
                let operand = stream.generic(b1 & 0xF)?;
                if b0 == 0x7A {
                    Ldc {
                        src: operand,
                        dst: control,
                    }
                } else {
                    Stc {
                        src: control,
                        dst: operand,
                    }
                }
            } else if b1 >> 4 < 4 {
                Xchg {
                    size,
                    reg: b1 >> 4,
                    dst: stream.generic(b1 & 0xF)?,
                }
            } else {
                return Err(undefined(Some(b1)));
            }
        }
        0x7C | 0x7D => {
            let b1 = stream.u8()?;
            let lo = b1 & 0xF;
            match (b0, b1) {
                (0x7C, 0x60..=0x6F) => {
                    let dst = stream.generic(lo)?;
                    if matches!(dst, Mode::Register(s) if s != 0 && s != 2) {
                        return Err(illegal(b1, lo));
                    }
                    Exts {
                        size: OpSize::Byte,
                        dst,
                    }
                }
                (0x7C, 0xC0..=0xCF) => {
                    let dst = stream.generic(lo)?;
                    if matches!(dst, Mode::Register(s) if !is_pair(s)) {
                        return Err(illegal(b1, lo));
                    }
                    StcPc { dst }
                }
                (0x7C, 0xF2) => Enter(stream.u8()?),
                (0x7C, 0xF3) => Exts {
                    size: OpSize::Word,
                    dst: Mode::Register(0),
                },
                (0x7D, 0x00..=0x3F) => {
                    let src = stream.generic(lo)?;
                    let far = b1 >> 4 < 2;
                    if far && matches!(src, Mode::Register(s) if !is_pair(s)) {
                        return Err(illegal(b1, lo));
                    }
                    if b1 & 0x10 == 0 {
                        Jmpi { far, src }
                    } else {
                        Jsri { far, src }
                    }
                }
                (0x7D, 0x90..=0x9F) => {
                    let src = stream.generic(lo)?;
                    if !matches!(src, Mode::Displacement { .. } | Mode::Absolute { .. }) {
                        return Err(illegal(b1, lo));
                    }
                    Pusha { src }
                }
                (0x7D, 0xA0..=0xA7) => Ldipl(b1 & 7),
                (0x7D, 0xB0..=0xBF) => AddSp {
                    value: imm4(lo) as i16,
                },
                (0x7D, 0xC0..=0xCF) => {
                    let cond = Cond::from_code(lo).ok_or(undefined(Some(b1)))?;
                    let disp = stream.i8()? as i32;
                    Jcnd {
                        cond,
                        target: relative(pc.wrapping_add(2), disp),
                    }
                }
                (0x7D, 0xD0..=0xDF) => BmcndC(Cond::from_code(lo).ok_or(undefined(Some(b1)))?),
                (0x7D, 0xF2) => Exitd,
                (0x7D, 0xF3) => Wait,
                (_, 0xE0 | 0xE1 | 0xE3) => {
                    let kind = match b1 {
                        0xE0 => DivKind::Divu,
                        0xE1 => DivKind::Div,
                        _ => DivKind::Divx,
                    };
                    Div {
                        kind,
                        size,
                        src: stream.immediate(size)?,
                    }
                }
                (_, 0xE2) => Push {
                    size,
                    src: stream.immediate(size)?,
                },
                (_, 0xE4..=0xE7) => Binary {
                    op: DECIMAL_OPS[(b1 - 0xE4) as usize],
                    size,
                    src: Mode::Register(1),
                    dst: Mode::Register(0),
                },
                (_, 0xE8) => Str {
                    op: StringOp::Smovf,
                    size,
                },
                (_, 0xE9) => Str {
                    op: StringOp::Smovb,
                    size,
                },
                (_, 0xEA) => Str {
                    op: StringOp::Sstr,
                    size,
                },
                (_, 0xEB) => {
                    let value = match size {
                        OpSize::Byte => stream.i8()? as i16,
                        _ => stream.i16()?,
                    };
                    AddSp { value }
                }
                (_, 0xEC..=0xEF) => Binary {
                    op: DECIMAL_OPS[(b1 - 0xEC) as usize],
                    size,
                    src: stream.immediate(size)?,
                    dst: Mode::Register(0),
                },
                _ => return Err(undefined(Some(b1))),
            }
        }
        0x7E => {
            let b1 = stream.u8()?;
            let op = b1 >> 4;
            if op >= 0xE {
                return Err(undefined(Some(b1)));
            }
            let operand = stream.bit(b1 & 0xF)?;
            match BIT_OPS[op as usize] {
                Some(op) => Bit { op, operand },
                None => {
                    let code = stream.u8()?;
                    let cond = Cond::from_byte(code).ok_or(undefined(Some(b1)))?;
                    Bmcnd { cond, operand }
                }
            }
        }
        0x82 | 0x8A => Push {
            size: OpSize::Byte,
            src: Mode::Register((b0 >> 3) & 1),
        },
        0x92 | 0x9A => Pop {
            size: OpSize::Byte,
            dst: Mode::Register((b0 >> 3) & 1),
        },
        0xA2 | 0xAA => Mov {
            size: OpSize::Word,
            src: stream.immediate(OpSize::Word)?,
            dst: Mode::Register(4 + ((b0 >> 3) & 1)),
        },
        0xB2 | 0xBA => Unary {
            op: UnOp::Inc,
            size: OpSize::Word,
            dst: Mode::Register(4 + ((b0 >> 3) & 1)),
        },
        0xC2 | 0xCA => Push {
            size: OpSize::Word,
            src: Mode::Register(4 + ((b0 >> 3) & 1)),
        },
        0xD2 | 0xDA => Pop {
            size: OpSize::Word,
            dst: Mode::Register(4 + ((b0 >> 3) & 1)),
        },
        0xE2 | 0xEA => Mov {
            size: OpSize::Byte,
            src: stream.immediate(OpSize::Byte)?,
            dst: Mode::Register(4 + ((b0 >> 3) & 1)),
        },
        0xF2 | 0xFA => Unary {
            op: UnOp::Dec,
            size: OpSize::Word,
            dst: Mode::Register(4 + ((b0 >> 3) & 1)),
        },
        // Quick immediates
        0xC8 | 0xC9 | 0xD0 | 0xD1 | 0xD8 | 0xD9 => {
            let b1 = stream.u8()?;
            let src = quick(b1 >> 4, size);
            let dst = stream.generic(b1 & 0xF)?;
            match b0 & 0xFE {
                0xC8 => Binary {
                    op: BinOp::Add,
                    size,
                    src,
                    dst,
                },
                0xD0 => Binary {
                    op: BinOp::Cmp,
                    size,
                    src,
                    dst,
                },
                _ => Mov { size, src, dst },
            }
        }
        // Byte forms on a 3-bit short dest. The first immediate precedes
        // the destination's displacement.
        0x83..=0xE7 if b0 & 7 >= 3 => {
            let size = OpSize::Byte;
            let op = b0 & 0xF8;
            let imm = match op {
                0xA0 | 0xA8 | 0xB0 | 0xB8 => None,
                _ => Some(stream.u8()?),
            };
            let dst = stream.short_dest(b0 & 7)?.ok_or(undefined(None))?;
            let value = imm.unwrap_or(0);
            let src = Mode::Immediate {
                value: value as u32,
                len: if imm.is_some() { 1 } else { 0 },
            };
            match op {
                0x80 => Binary {
                    op: BinOp::Add,
                    size,
                    src,
                    dst,
                },
                0x88 => Binary {
                    op: BinOp::Sub,
                    size,
                    src,
                    dst,
                },
                0x90 => Binary {
                    op: BinOp::And,
                    size,
                    src,
                    dst,
                },
                0x98 => Binary {
                    op: BinOp::Or,
                    size,
                    src,
                    dst,
                },
                0xA0 => Unary {
                    op: UnOp::Inc,
                    size,
                    dst,
                },
                0xA8 => Unary {
                    op: UnOp::Dec,
                    size,
                    dst,
                },
                0xB8 => Unary {
                    op: UnOp::Not,
                    size,
                    dst,
                },
                0xB0 | 0xC0 => Mov { size, src, dst },
                0xC8 | 0xD0 => Stz {
                    nonzero: op == 0xD0,
                    value,
                    dst,
                },
                0xD8 => Stzx {
                    zero: value,
                    nonzero: stream.u8()?,
                    dst,
                },
                _ => Binary {
                    op: BinOp::Cmp,
                    size,
                    src,
                    dst,
                },
            }
        }
        0xE0 | 0xE1 | 0xE8 | 0xE9 | 0xF0 | 0xF1 => {
            let b1 = stream.u8()?;
            let n = ((b1 >> 4) & 7) as i8 + 1;
            let count = Count::Imm(if b1 & 0x80 != 0 { -n } else { n });
            let dst = stream.generic(b1 & 0xF)?;
            let op = match b0 & 0xFE {
                0xE0 => ShiftOp::Rot,
                0xE8 => ShiftOp::Shl,
                _ => ShiftOp::Sha,
            };
            Shift {
                op,
                size,
                count,
                dst,
            }
        }
        0xEB => {
            let b1 = stream.u8()?;
            let code = (b1 >> 4) & 7;
            if b1 & 0xC0 == 0xC0 {
                Int(b1 & 0x3F)
            } else if b1 & 0x80 != 0 {
                return Err(undefined(Some(b1)));
            } else {
                let control = || Control::from_code(code).ok_or(undefined(Some(b1)));
                match b1 & 0xF {
                    0 => Ldc {
                        dst: control()?,
                        src: stream.immediate(OpSize::Word)?,
                    },
                    2 => Pushc(control()?),
                    3 => Popc(control()?),
                    4 => Fset(code),
                    5 => Fclr(code),
                    selector @ 8..=0xF if code <= 5 => Mova {
                        src: stream.generic(selector)?,
                        dst: code,
                    },
                    8..=0xF => return Err(undefined(Some(b1))),
                    selector => return Err(illegal(b1, selector)),
                }
            }
        }
        0xEC => Pushm(stream.u8()?),
        0xED => Popm(stream.u8()?),
        0xEE => Jmps(stream.u8()?),
        0xEF => Jsrs(stream.u8()?),
        0xF3 => Rts,
        0xF4 => {
            let disp = stream.i16()? as i32;
            Jmp {
                size: JumpSize::W,
                target: relative(pc.wrapping_add(1), disp),
            }
        }
        0xF5 => {
            let disp = stream.i16()? as i32;
            Jsr {
                far: false,
                target: relative(pc.wrapping_add(1), disp),
            }
        }
        0xF6 => Into,
        0xF8 | 0xF9 => {
            let b1 = stream.u8()?;
            let step = imm4(b1 >> 4);
            let dst = stream.generic(b1 & 0xF)?;
            let disp = stream.i8()? as i32;
            Adjnz {
                size,
                step,
                dst,
                target: relative(pc.wrapping_add(2), disp),
            }
        }
        0xFB => Reit,
        0xFC => Jmp {
            size: JumpSize::A,
            target: stream.u20()?,
        },
        0xFD => Jsr {
            far: true,
            target: stream.u20()?,
        },
        0xFE => {
            let disp = stream.i8()? as i32;
            Jmp {
                size: JumpSize::B,
                target: relative(pc.wrapping_add(1), disp),
            }
        }
        0xFF => Und,
        _ => return Err(undefined(None)),
    };
    Ok(insn)
}

fn suffix(size: OpSize) -> &'static str {
    match size {
        OpSize::Byte => "B",
        _ => "W",
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "ADD",
            BinOp::Adc => "ADC",
            BinOp::Sub => "SUB",
            BinOp::Sbb => "SBB",
            BinOp::Cmp => "CMP",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Xor => "XOR",
            BinOp::Tst => "TST",
            BinOp::Dadd => "DADD",
            BinOp::Dadc => "DADC",
            BinOp::Dsub => "DSUB",
            BinOp::Dsbb => "DSBB",
        })
    }
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnOp::Abs => "ABS",
            UnOp::Neg => "NEG",
            UnOp::Not => "NOT",
            UnOp::Rolc => "ROLC",
            UnOp::Rorc => "RORC",
            UnOp::Adcf => "ADCF",
            UnOp::Inc => "INC",
            UnOp::Dec => "DEC",
        })
    }
}

impl fmt::Display for BitOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BitOp::Btst => "BTST",
            BitOp::Btstc => "BTSTC",
            BitOp::Btsts => "BTSTS",
            BitOp::Bntst => "BNTST",
            BitOp::Band => "BAND",
            BitOp::Bnand => "BNAND",
            BitOp::Bor => "BOR",
            BitOp::Bnor => "BNOR",
            BitOp::Bxor => "BXOR",
            BitOp::Bnxor => "BNXOR",
            BitOp::Bset => "BSET",
            BitOp::Bclr => "BCLR",
            BitOp::Bnot => "BNOT",
        })
    }
}

const FLAG_NAMES: [&str; 8] = ["C", "D", "Z", "S", "B", "O", "I", "U"];

/// PUSHM/POPM register order, lowest address first.
pub(super) const MULTI_REGISTERS: [&str; 8] = ["R0", "R1", "R2", "R3", "A0", "A1", "SB", "FB"];

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match *self {
            Nop => f.write_str("NOP"),
            Brk => f.write_str("BRK"),
            Und => f.write_str("UND"),
            Into => f.write_str("INTO"),
            Wait => f.write_str("WAIT"),
            Rts => f.write_str("RTS"),
            Reit => f.write_str("REIT"),
            Exitd => f.write_str("EXITD"),
            Int(n) => write!(f, "INT #{n}"),
            Jmps(n) => write!(f, "JMPS #{n}"),
            Jsrs(n) => write!(f, "JSRS #{n}"),
            Enter(n) => write!(f, "ENTER #{n}"),
            Ldipl(n) => write!(f, "LDIPL #{n}"),
            Fset(flag) => write!(f, "FSET {}", FLAG_NAMES[flag as usize & 7]),
            Fclr(flag) => write!(f, "FCLR {}", FLAG_NAMES[flag as usize & 7]),
            Pushm(mask) | Popm(mask) => {
                let push = matches!(self, Pushm(_));
                let names = MULTI_REGISTERS
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| {
                        let bit = if push { 7 - i } else { *i };
                        mask & (1 << bit) != 0
                    })
                    .map(|(_, name)| *name)
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{} {names}", if push { "PUSHM" } else { "POPM" })
            }
            Mov { size, src, dst } => {
                write!(f, "MOV.{} {},{}", suffix(size), src.sized(size), dst.sized(size))
            }
            Mova { src, dst } => write!(
                f,
                "MOVA {},{}",
                src.sized(OpSize::Word),
                register_name(dst, OpSize::Word)
            ),
            Binary { op, size, src, dst } => write!(
                f,
                "{op}.{} {},{}",
                suffix(size),
                src.sized(size),
                dst.sized(size)
            ),
            Unary { op, size, dst } => write!(f, "{op}.{} {}", suffix(size), dst.sized(size)),
            Exts { size, dst } => write!(f, "EXTS.{} {}", suffix(size), dst.sized(size)),
            Shift {
                op,
                size,
                count,
                dst,
            } => {
                let op = match op {
                    ShiftOp::Rot => "ROT",
                    ShiftOp::Shl => "SHL",
                    ShiftOp::Sha => "SHA",
                };
                match count {
                    Count::Imm(n) => write!(f, "{op}.{} #{n},{}", suffix(size), dst.sized(size)),
                    Count::R1h => write!(f, "{op}.{} R1H,{}", suffix(size), dst.sized(size)),
                }
            }
            Mul {
                signed,
                size,
                src,
                dst,
            } => write!(
                f,
                "{}.{} {},{}",
                if signed { "MUL" } else { "MULU" },
                suffix(size),
                src.sized(size),
                dst.sized(size)
            ),
            Div { kind, size, src } => {
                let op = match kind {
                    DivKind::Divu => "DIVU",
                    DivKind::Div => "DIV",
                    DivKind::Divx => "DIVX",
                };
                write!(f, "{op}.{} {}", suffix(size), src.sized(size))
            }
            Xchg { size, reg, dst } => write!(
                f,
                "XCHG.{} {},{}",
                suffix(size),
                register_name(reg, size),
                dst.sized(size)
            ),
            Push { size, src } => write!(f, "PUSH.{} {}", suffix(size), src.sized(size)),
            Pop { size, dst } => write!(f, "POP.{} {}", suffix(size), dst.sized(size)),
            Pusha { src } => write!(f, "PUSHA {}", src.sized(OpSize::Word)),
            Pushc(reg) => write!(f, "PUSHC {reg}"),
            Popc(reg) => write!(f, "POPC {reg}"),
            Ldc { src, dst } => write!(f, "LDC {},{dst}", src.sized(OpSize::Word)),
            Stc { src, dst } => write!(f, "STC {src},{}", dst.sized(OpSize::Word)),
            StcPc { dst } => write!(f, "STC PC,{}", dst.sized(OpSize::Long)),
            AddSp { value } => write!(f, "ADD #{value},SP"),
            Lde { size, src, dst } => {
                write!(f, "LDE.{} {},{}", suffix(size), src.sized(size), dst.sized(size))
            }
            Ste { size, src, dst } => {
                write!(f, "STE.{} {},{}", suffix(size), src.sized(size), dst.sized(size))
            }
            Stz {
                nonzero,
                value,
                dst,
            } => write!(
                f,
                "{} #{value:02X}h,{}",
                if nonzero { "STNZ" } else { "STZ" },
                dst.sized(OpSize::Byte)
            ),
            Stzx { zero, nonzero, dst } => write!(
                f,
                "STZX #{zero:02X}h,#{nonzero:02X}h,{}",
                dst.sized(OpSize::Byte)
            ),
            Bit { op, operand } => write!(f, "{op} {operand}"),
            Bmcnd { cond, operand } => write!(f, "BM{cond} {operand}"),
            BmcndC(cond) => write!(f, "BM{cond} C"),
            Jmp { size, target } => write!(f, "JMP.{size:?} {target:05X}h"),
            Jcnd { cond, target } => write!(f, "J{cond} {target:05X}h"),
            Jsr { far, target } => {
                write!(f, "JSR.{} {target:05X}h", if far { "A" } else { "W" })
            }
            Jmpi { far, src } => write!(
                f,
                "JMPI.{} {}",
                if far { "A" } else { "W" },
                src.sized(if far { OpSize::Long } else { OpSize::Word })
            ),
            Jsri { far, src } => write!(
                f,
                "JSRI.{} {}",
                if far { "A" } else { "W" },
                src.sized(if far { OpSize::Long } else { OpSize::Word })
            ),
            Adjnz {
                size,
                step,
                dst,
                target,
            } => write!(
                f,
                "ADJNZ.{} #{step},{},{target:05X}h",
                suffix(size),
                dst.sized(size)
            ),
            Str { op, size } => {
                let op = match op {
                    StringOp::Smovf => "SMOVF",
                    StringOp::Smovb => "SMOVB",
                    StringOp::Sstr => "SSTR",
                };
                write!(f, "{op}.{}", suffix(size))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;

    fn decode_at(bytes: &[u8], pc: u32) -> Result<(Instruction, u32)> {
        let mut ram = Ram::new(0x1_0000);
        ram.load(pc, bytes).unwrap();
        let mut stream = Stream::new(&mut ram, pc);
        let insn = decode(&mut stream)?;
        Ok((insn, stream.consumed()))
    }

    fn text(bytes: &[u8]) -> (String, u32) {
        let (insn, len) = decode_at(bytes, 0x100).unwrap();
        (insn.to_string(), len)
    }

    #[test]
    fn generic_two_operand_forms() {
        // MOV.W dsp:8[FB],abs16
        assert_eq!(
            text(&[0x73, 0xBF, 0xFC, 0x00, 0x04]),
            ("MOV.W -4[FB],0400h".to_string(), 5)
        );
        // ADD.B R0L,[A1]
        assert_eq!(text(&[0xA0, 0x07]), ("ADD.B R0L,[A1]".to_string(), 2));
        // CMP.W #1234h,R2
        assert_eq!(
            text(&[0x77, 0x82, 0x34, 0x12]),
            ("CMP.W #1234h,R2".to_string(), 4)
        );
    }

    #[test]
    fn short_and_quick_forms() {
        assert_eq!(text(&[0xC4, 0x7F]), ("MOV.B #7Fh,R0L".to_string(), 2));
        assert_eq!(text(&[0xD9, 0xF1]), ("MOV.W #FFFFh,R1".to_string(), 2));
        assert_eq!(text(&[0xB5, 0x10]), ("MOV.B #00h,16[SB]".to_string(), 2));
        assert_eq!(text(&[0xC5, 0x12, 0x20]), ("MOV.B #12h,32[SB]".to_string(), 3));
        assert_eq!(
            text(&[0x87, 0x05, 0x00, 0x04]),
            ("ADD.B #05h,0400h".to_string(), 4)
        );
        assert_eq!(
            text(&[0xDD, 0x11, 0x20, 0x22]),
            ("STZX #11h,#22h,32[SB]".to_string(), 4)
        );
        assert_eq!(text(&[0x22, 0x02]), ("ADD.B 2[FB],R0L".to_string(), 2));
        assert_eq!(text(&[0xE9, 0x90]), ("SHL.W #-2,R0".to_string(), 2));
    }

    #[test]
    fn bit_forms() {
        assert_eq!(text(&[0x5B, 0x05]), ("BTST 3,5[SB]".to_string(), 2));
        assert_eq!(text(&[0x7E, 0xBA, 0x2B]), ("BTST 3,5[SB]".to_string(), 3));
        assert_eq!(text(&[0x7E, 0x91, 0x0F]), ("BSET 15,R1".to_string(), 3));
        assert_eq!(
            text(&[0x7E, 0x2A, 0x00, 0xFA]),
            ("BMNE 0,0[SB]".to_string(), 4)
        );
    }

    #[test]
    fn jumps_resolve_targets() {
        assert_eq!(text(&[0xFE, 0xFF]), ("JMP.B 00100h".to_string(), 2));
        assert_eq!(text(&[0x62]), ("JMP.S 00104h".to_string(), 1));
        assert_eq!(text(&[0x6A, 0x10]), ("JEQ 00111h".to_string(), 2));
        assert_eq!(text(&[0x7D, 0xCE, 0x10]), ("JLT 00112h".to_string(), 3));
        assert_eq!(
            text(&[0xFC, 0x56, 0x34, 0x0F]),
            ("JMP.A F3456h".to_string(), 4)
        );
        assert_eq!(
            text(&[0xF8, 0xF0, 0xFC]),
            ("ADJNZ.B #-1,R0L,000FEh".to_string(), 3)
        );
    }

    #[test]
    fn misc_forms() {
        assert_eq!(text(&[0xEB, 0xC5]), ("INT #5".to_string(), 2));
        assert_eq!(text(&[0xEB, 0x64]), ("FSET I".to_string(), 2));
        assert_eq!(text(&[0xEB, 0x60, 0x00, 0x04]), ("LDC #0400h,SB".to_string(), 4));
        assert_eq!(text(&[0xEC, 0xC1]), ("PUSHM R0,R1,FB".to_string(), 2));
        assert_eq!(text(&[0x7C, 0xF2, 0x04]), ("ENTER #4".to_string(), 3));
        assert_eq!(text(&[0x7D, 0xF3]), ("WAIT".to_string(), 2));
    }

    #[test]
    fn undefined_and_illegal_encodings() {
        assert_eq!(
            decode_at(&[0xF7], 0x100).unwrap_err(),
            Fault::UndefinedOpcode {
                pc: 0x100,
                opcode: 0xF7
            }
        );
        assert_eq!(
            decode_at(&[0x7E, 0xE0], 0x100).unwrap_err(),
            Fault::UndefinedOpcode {
                pc: 0x100,
                opcode: 0x7EE0
            }
        );
        // MOVA takes no register source
        assert_eq!(
            decode_at(&[0xEB, 0x01], 0x100).unwrap_err(),
            Fault::IllegalAddressingMode {
                pc: 0x100,
                opcode: 0xEB01,
                selector: 1
            }
        );
        // MUL.W R1,R2: no pair above R2
        assert!(matches!(
            decode_at(&[0x79, 0x12], 0x100),
            Err(Fault::IllegalAddressingMode { selector: 2, .. })
        ));
    }

    #[test]
    fn conditions() {
        let z = 1 << FLG_Z;
        let s = 1 << FLG_S;
        let o = 1 << FLG_O;
        assert!(Cond::Eq.holds(z));
        assert!(Cond::Lt.holds(s));
        assert!(!Cond::Lt.holds(s | o));
        assert!(Cond::Le.holds(z));
        assert!(Cond::Gt.holds(0));
        assert_eq!(Cond::from_byte(0xFA), Some(Cond::Ne));
        assert_eq!(Cond::from_code(0xB), None);
    }
}
