//! AVR opcode decoding into [`Instruction`].
//!
//! Decoding looks only at the opcode word (and, for the four two-word
//! instructions, the word after it). Register numbers are stored already
//! expanded, so `LDI r16` carries `d: 16` rather than the encoded `0`.

use std::fmt;

/// Pointer register pair used by `LD`/`ST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    X,
    Y,
    Z,
}

impl Pointer {
    /// Index of the low register of the pair.
    pub fn low(self) -> u8 {
        match self {
            Pointer::X => 26,
            Pointer::Y => 28,
            Pointer::Z => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerMode {
    Plain,
    PostIncrement,
    PreDecrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Or,
    Eor,
    Cp,
    Cpc,
    Mov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Cpi,
    Sbci,
    Subi,
    Ori,
    Andi,
    Ldi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Com,
    Neg,
    Swap,
    Inc,
    Asr,
    Lsr,
    Ror,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulKind {
    Mul,
    Muls,
    Mulsu,
    Fmul,
    Fmuls,
    Fmulsu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Movw { d: u8, r: u8 },
    Mul { kind: MulKind, d: u8, r: u8 },
    Alu { op: AluOp, d: u8, r: u8 },
    Cpse { d: u8, r: u8 },
    Imm { op: ImmOp, d: u8, k: u8 },
    Unary { op: UnaryOp, d: u8 },
    Adiw { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    Ld { d: u8, ptr: Pointer, mode: PointerMode },
    Ldd { d: u8, ptr: Pointer, q: u8 },
    St { r: u8, ptr: Pointer, mode: PointerMode },
    Std { r: u8, ptr: Pointer, q: u8 },
    Lds { d: u8, addr: u16 },
    Sts { r: u8, addr: u16 },
    Lpm { d: u8, post_increment: bool },
    Push { r: u8 },
    Pop { d: u8 },
    In { d: u8, a: u8 },
    Out { r: u8, a: u8 },
    /// `SBI` when `set`, `CBI` otherwise.
    IoBit { set: bool, a: u8, b: u8 },
    /// `SBIS` when `set`, `SBIC` otherwise.
    SkipIoBit { set: bool, a: u8, b: u8 },
    /// `SBRS` when `set`, `SBRC` otherwise.
    SkipRegBit { set: bool, r: u8, b: u8 },
    Bst { d: u8, b: u8 },
    Bld { d: u8, b: u8 },
    Bset { s: u8 },
    Bclr { s: u8 },
    /// `BRBS` when `set`, `BRBC` otherwise. `k` is in words.
    Branch { set: bool, s: u8, k: i8 },
    Rjmp { k: i16 },
    Rcall { k: i16 },
    Jmp { k: u32 },
    Call { k: u32 },
    Ijmp,
    Icall,
    Ret,
    Reti,
    Sleep,
    Break,
    Wdr,
    Spm,
}

/// True if `word` is the first word of a two-word instruction.
pub fn is_two_words(word: u16) -> bool {
    matches!(word & 0xFE0F, 0x9000 | 0x9200) || matches!(word & 0xFE0E, 0x940C | 0x940E)
}

fn d5(word: u16) -> u8 {
    ((word >> 4) & 0x1F) as u8
}

fn r5(word: u16) -> u8 {
    ((word & 0x0F) | ((word >> 5) & 0x10)) as u8
}

fn k8(word: u16) -> u8 {
    (((word >> 4) & 0xF0) | (word & 0x0F)) as u8
}

/// Decode the instruction starting with `word`. `next` is only consulted for
/// two-word instructions. Returns `None` for undefined encodings.
pub fn decode(word: u16, next: u16) -> Option<Instruction> {
    use Instruction::*;

    let d = d5(word);
    let r = r5(word);
    let insn = match word >> 12 {
        0x0 => match (word >> 8) & 0xF {
            0x0 if word == 0 => Nop,
            0x1 => Movw {
                d: ((word >> 4) & 0xF) as u8 * 2,
                r: (word & 0xF) as u8 * 2,
            },
            0x2 => Mul {
                kind: MulKind::Muls,
                d: 16 + ((word >> 4) & 0xF) as u8,
                r: 16 + (word & 0xF) as u8,
            },
            0x3 => {
                let kind = match word & 0x88 {
                    0x00 => MulKind::Mulsu,
                    0x08 => MulKind::Fmul,
                    0x80 => MulKind::Fmuls,
                    _ => MulKind::Fmulsu,
                };
                Mul {
                    kind,
                    d: 16 + ((word >> 4) & 0x7) as u8,
                    r: 16 + (word & 0x7) as u8,
                }
            }
            0x4..=0x7 => Alu { op: AluOp::Cpc, d, r },
            0x8..=0xB => Alu { op: AluOp::Sbc, d, r },
            0xC..=0xF => Alu { op: AluOp::Add, d, r },
            _ => return None,
        },
        0x1 => match (word >> 10) & 0x3 {
            0 => Cpse { d, r },
            1 => Alu { op: AluOp::Cp, d, r },
            2 => Alu { op: AluOp::Sub, d, r },
            _ => Alu { op: AluOp::Adc, d, r },
        },
        0x2 => {
            let op = match (word >> 10) & 0x3 {
                0 => AluOp::And,
                1 => AluOp::Eor,
                2 => AluOp::Or,
                _ => AluOp::Mov,
            };
            Alu { op, d, r }
        }
        0x3..=0x7 | 0xE => {
            let op = match word >> 12 {
                0x3 => ImmOp::Cpi,
                0x4 => ImmOp::Sbci,
                0x5 => ImmOp::Subi,
                0x6 => ImmOp::Ori,
                0x7 => ImmOp::Andi,
                _ => ImmOp::Ldi,
            };
            Imm {
                op,
                d: 16 + ((word >> 4) & 0xF) as u8,
                k: k8(word),
            }
        }
        0x8 | 0xA => {
            let q = ((word & 0x7) | ((word >> 7) & 0x18) | ((word >> 8) & 0x20)) as u8;
            let ptr = if word & 0x8 != 0 { Pointer::Y } else { Pointer::Z };
            if word & 0x0200 != 0 {
                Std { r: d, ptr, q }
            } else {
                Ldd { d, ptr, q }
            }
        }
        0x9 => return decode_9xxx(word, next),
        0xB => {
            let a = (((word >> 5) & 0x30) | (word & 0xF)) as u8;
            if word & 0x0800 != 0 {
                Out { r: d, a }
            } else {
                In { d, a }
            }
        }
        0xC => Rjmp {
            k: ((word << 4) as i16) >> 4,
        },
        0xD => Rcall {
            k: ((word << 4) as i16) >> 4,
        },
        _ => {
            // 0xF
            let b = (word & 0x7) as u8;
            match (word >> 9) & 0x7 {
                0..=3 => Branch {
                    set: word & 0x0400 == 0,
                    s: b,
                    k: (((word >> 3) & 0x7F) as u8 as i8) << 1 >> 1,
                },
                _ if word & 0x8 != 0 => return None,
                4 => Bld { d, b },
                5 => Bst { d, b },
                6 => SkipRegBit { set: false, r: d, b },
                _ => SkipRegBit { set: true, r: d, b },
            }
        }
    };
    Some(insn)
}

fn decode_9xxx(word: u16, next: u16) -> Option<Instruction> {
    use Instruction::*;

    let d = d5(word);
    let insn = match (word >> 9) & 0x7 {
        // 1001 000d: loads
        0 => match word & 0xF {
            0x0 => Lds { d, addr: next },
            0x1 => Ld { d, ptr: Pointer::Z, mode: PointerMode::PostIncrement },
            0x2 => Ld { d, ptr: Pointer::Z, mode: PointerMode::PreDecrement },
            0x4 => Lpm { d, post_increment: false },
            0x5 => Lpm { d, post_increment: true },
            0x9 => Ld { d, ptr: Pointer::Y, mode: PointerMode::PostIncrement },
            0xA => Ld { d, ptr: Pointer::Y, mode: PointerMode::PreDecrement },
            0xC => Ld { d, ptr: Pointer::X, mode: PointerMode::Plain },
            0xD => Ld { d, ptr: Pointer::X, mode: PointerMode::PostIncrement },
            0xE => Ld { d, ptr: Pointer::X, mode: PointerMode::PreDecrement },
            0xF => Pop { d },
            _ => return None,
        },
        // 1001 001r: stores
        1 => match word & 0xF {
            0x0 => Sts { r: d, addr: next },
            0x1 => St { r: d, ptr: Pointer::Z, mode: PointerMode::PostIncrement },
            0x2 => St { r: d, ptr: Pointer::Z, mode: PointerMode::PreDecrement },
            0x9 => St { r: d, ptr: Pointer::Y, mode: PointerMode::PostIncrement },
            0xA => St { r: d, ptr: Pointer::Y, mode: PointerMode::PreDecrement },
            0xC => St { r: d, ptr: Pointer::X, mode: PointerMode::Plain },
            0xD => St { r: d, ptr: Pointer::X, mode: PointerMode::PostIncrement },
            0xE => St { r: d, ptr: Pointer::X, mode: PointerMode::PreDecrement },
            0xF => Push { r: d },
            _ => return None,
        },
        // 1001 010x: one-operand and the zero-operand group
        2 => match word & 0xF {
            0x0 => Unary { op: UnaryOp::Com, d },
            0x1 => Unary { op: UnaryOp::Neg, d },
            0x2 => Unary { op: UnaryOp::Swap, d },
            0x3 => Unary { op: UnaryOp::Inc, d },
            0x5 => Unary { op: UnaryOp::Asr, d },
            0x6 => Unary { op: UnaryOp::Lsr, d },
            0x7 => Unary { op: UnaryOp::Ror, d },
            0xA => Unary { op: UnaryOp::Dec, d },
            0x8 => match word {
                0x9508 => Ret,
                0x9518 => Reti,
                0x9588 => Sleep,
                0x9598 => Break,
                0x95A8 => Wdr,
                0x95C8 => Lpm { d: 0, post_increment: false },
                0x95E8 => Spm,
                _ if word & 0xFF0F == 0x9408 => {
                    let s = ((word >> 4) & 0x7) as u8;
                    if word & 0x0080 != 0 {
                        Bclr { s }
                    } else {
                        Bset { s }
                    }
                }
                _ => return None,
            },
            0x9 => match word {
                0x9409 => Ijmp,
                0x9509 => Icall,
                _ => return None,
            },
            0xC | 0xD | 0xE | 0xF => {
                let k = ((((word >> 3) & 0x3E) | (word & 0x1)) as u32) << 16 | next as u32;
                if word & 0x2 != 0 {
                    Call { k }
                } else {
                    Jmp { k }
                }
            }
            _ => return None,
        },
        // 1001 011x: ADIW/SBIW
        3 => {
            let d = 24 + ((word >> 4) & 0x3) as u8 * 2;
            let k = (((word >> 2) & 0x30) | (word & 0xF)) as u8;
            if word & 0x0100 != 0 {
                Sbiw { d, k }
            } else {
                Adiw { d, k }
            }
        }
        // 1001 10xx: I/O bit operations
        4 | 5 => {
            let a = ((word >> 3) & 0x1F) as u8;
            let b = (word & 0x7) as u8;
            match (word >> 8) & 0x3 {
                0 => IoBit { set: false, a, b },
                1 => SkipIoBit { set: false, a, b },
                2 => IoBit { set: true, a, b },
                _ => SkipIoBit { set: true, a, b },
            }
        }
        // 1001 11rd: MUL
        _ => Mul {
            kind: MulKind::Mul,
            d,
            r: r5(word),
        },
    };
    Some(insn)
}

impl Instruction {
    /// Length in words.
    pub fn words(&self) -> u16 {
        match self {
            Instruction::Lds { .. }
            | Instruction::Sts { .. }
            | Instruction::Jmp { .. }
            | Instruction::Call { .. } => 2,
            _ => 1,
        }
    }
}

const SET_FLAG: [&str; 8] = ["SEC", "SEZ", "SEN", "SEV", "SES", "SEH", "SET", "SEI"];
const CLEAR_FLAG: [&str; 8] = ["CLC", "CLZ", "CLN", "CLV", "CLS", "CLH", "CLT", "CLI"];
const BRANCH_SET: [&str; 8] = ["BRCS", "BREQ", "BRMI", "BRVS", "BRLT", "BRHS", "BRTS", "BRIE"];
const BRANCH_CLEAR: [&str; 8] = ["BRCC", "BRNE", "BRPL", "BRVC", "BRGE", "BRHC", "BRTC", "BRID"];

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pointer::X => "X",
            Pointer::Y => "Y",
            Pointer::Z => "Z",
        })
    }
}

fn pointer_operand(ptr: Pointer, mode: PointerMode) -> String {
    match mode {
        PointerMode::Plain => format!("{ptr}"),
        PointerMode::PostIncrement => format!("{ptr}+"),
        PointerMode::PreDecrement => format!("-{ptr}"),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match *self {
            Nop => write!(f, "NOP"),
            Movw { d, r } => write!(f, "MOVW r{d}, r{r}"),
            Mul { kind, d, r } => write!(f, "{} r{d}, r{r}", format!("{kind:?}").to_uppercase()),
            Alu { op, d, r } => write!(f, "{} r{d}, r{r}", format!("{op:?}").to_uppercase()),
            Cpse { d, r } => write!(f, "CPSE r{d}, r{r}"),
            Imm { op, d, k } => write!(f, "{} r{d}, 0x{k:02X}", format!("{op:?}").to_uppercase()),
            Unary { op, d } => write!(f, "{} r{d}", format!("{op:?}").to_uppercase()),
            Adiw { d, k } => write!(f, "ADIW r{d}, {k}"),
            Sbiw { d, k } => write!(f, "SBIW r{d}, {k}"),
            Ld { d, ptr, mode } => write!(f, "LD r{d}, {}", pointer_operand(ptr, mode)),
            Ldd { d, ptr, q } => write!(f, "LDD r{d}, {ptr}+{q}"),
            St { r, ptr, mode } => write!(f, "ST {}, r{r}", pointer_operand(ptr, mode)),
            Std { r, ptr, q } => write!(f, "STD {ptr}+{q}, r{r}"),
            Lds { d, addr } => write!(f, "LDS r{d}, 0x{addr:04X}"),
            Sts { r, addr } => write!(f, "STS 0x{addr:04X}, r{r}"),
            Lpm { d, post_increment } => {
                if d == 0 && !post_increment {
                    write!(f, "LPM")
                } else if post_increment {
                    write!(f, "LPM r{d}, Z+")
                } else {
                    write!(f, "LPM r{d}, Z")
                }
            }
            Push { r } => write!(f, "PUSH r{r}"),
            Pop { d } => write!(f, "POP r{d}"),
            In { d, a } => write!(f, "IN r{d}, 0x{a:02X}"),
            Out { r, a } => write!(f, "OUT 0x{a:02X}, r{r}"),
            IoBit { set, a, b } => write!(f, "{} 0x{a:02X}, {b}", if set { "SBI" } else { "CBI" }),
            SkipIoBit { set, a, b } => {
                write!(f, "{} 0x{a:02X}, {b}", if set { "SBIS" } else { "SBIC" })
            }
            SkipRegBit { set, r, b } => {
                write!(f, "{} r{r}, {b}", if set { "SBRS" } else { "SBRC" })
            }
            Bst { d, b } => write!(f, "BST r{d}, {b}"),
            Bld { d, b } => write!(f, "BLD r{d}, {b}"),
            Bset { s } => f.write_str(SET_FLAG[s as usize]),
            Bclr { s } => f.write_str(CLEAR_FLAG[s as usize]),
            Branch { set, s, k } => {
                let name = if set { BRANCH_SET } else { BRANCH_CLEAR }[s as usize];
                write!(f, "{name} .{:+}", (k as i32 + 1) * 2)
            }
            Rjmp { k } => write!(f, "RJMP .{:+}", (k as i32 + 1) * 2),
            Rcall { k } => write!(f, "RCALL .{:+}", (k as i32 + 1) * 2),
            Jmp { k } => write!(f, "JMP 0x{:X}", k * 2),
            Call { k } => write!(f, "CALL 0x{:X}", k * 2),
            Ijmp => write!(f, "IJMP"),
            Icall => write!(f, "ICALL"),
            Ret => write!(f, "RET"),
            Reti => write!(f, "RETI"),
            Sleep => write!(f, "SLEEP"),
            Break => write!(f, "BREAK"),
            Wdr => write!(f, "WDR"),
            Spm => write!(f, "SPM"),
        }
    }
}
