//! Instruction execution. Each arm updates registers, SREG and PC and
//! returns the clock cycles the instruction took.

use tracing::{debug, warn};

use crate::alu::{self, FlagMask, Flags, OpSize};
use crate::bus::Bus;
use crate::error::Result;

use super::decode::{self, AluOp, ImmOp, Instruction, MulKind, Pointer, PointerMode, UnaryOp};
use super::*;

/// Flags written by the arithmetic group (everything but T and I; S is
/// derived).
const ARITH: FlagMask = FlagMask::ALL;
const LOGIC: FlagMask = FlagMask::SZ.union(FlagMask::OVERFLOW);

impl Cpu {
    pub(super) fn execute(
        &mut self,
        insn: Instruction,
        flash: &mut impl Bus,
        data: &mut impl Bus,
    ) -> Result<u32> {
        use Instruction::*;

        let pc = self.pc;
        self.pc = pc.wrapping_add(insn.words());

        let cycles = match insn {
            Nop | Wdr | Spm => 1,
            Break => {
                debug!(pc, "BREAK");
                1
            }
            Sleep => {
                self.sleeping = true;
                debug!(pc, "SLEEP");
                1
            }
            Movw { d, r } => {
                let value = self.pair(r);
                self.pair_set(d, value);
                1
            }
            Mul { kind, d, r } => {
                self.multiply(kind, d, r);
                2
            }
            Alu { op, d, r } => {
                self.alu(op, d, self.reg(r));
                1
            }
            Cpse { d, r } => {
                if self.reg(d) == self.reg(r) {
                    1 + self.skip(flash)?
                } else {
                    1
                }
            }
            Imm { op, d, k } => {
                let op = match op {
                    ImmOp::Cpi => AluOp::Cp,
                    ImmOp::Sbci => AluOp::Sbc,
                    ImmOp::Subi => AluOp::Sub,
                    ImmOp::Ori => AluOp::Or,
                    ImmOp::Andi => AluOp::And,
                    ImmOp::Ldi => AluOp::Mov,
                };
                self.alu(op, d, k);
                1
            }
            Unary { op, d } => {
                self.unary(op, d);
                1
            }
            Adiw { d, k } => {
                let out = alu::add(self.pair(d) as u32, k as u32, false, OpSize::Word);
                self.pair_set(d, out.value as u16);
                self.apply_flags(FlagMask::OSZC, out.flags);
                2
            }
            Sbiw { d, k } => {
                let out = alu::sub_borrow(self.pair(d) as u32, k as u32, false, OpSize::Word);
                self.pair_set(d, out.value as u16);
                self.apply_flags(FlagMask::OSZC, out.flags);
                2
            }
            Ld { d, ptr, mode } => {
                if self.pointer_conflict(d, ptr, mode) {
                    return Ok(2);
                }
                let addr = self.pointer_address(ptr, mode);
                let value = self.load(data, addr)?;
                self.reg_set(d, value);
                2
            }
            St { r, ptr, mode } => {
                if self.pointer_conflict(r, ptr, mode) {
                    return Ok(2);
                }
                let value = self.reg(r);
                let addr = self.pointer_address(ptr, mode);
                self.store(data, addr, value)?;
                2
            }
            Ldd { d, ptr, q } => {
                let addr = self.pair(ptr.low()).wrapping_add(q as u16);
                let value = self.load(data, addr)?;
                self.reg_set(d, value);
                2
            }
            Std { r, ptr, q } => {
                let addr = self.pair(ptr.low()).wrapping_add(q as u16);
                self.store(data, addr, self.reg(r))?;
                2
            }
            Lds { d, addr } => {
                let value = self.load(data, addr)?;
                self.reg_set(d, value);
                2
            }
            Sts { r, addr } => {
                self.store(data, addr, self.reg(r))?;
                2
            }
            Lpm { d, post_increment } => {
                let z = self.pair(30);
                let value = flash.read8(z as u32)?;
                self.reg_set(d, value);
                if post_increment {
                    self.pair_set(30, z.wrapping_add(1));
                }
                3
            }
            Push { r } => {
                self.push(data, self.reg(r))?;
                2
            }
            Pop { d } => {
                let value = self.pop(data)?;
                self.reg_set(d, value);
                2
            }
            In { d, a } => {
                let value = self.load(data, a as u16 + IO_OFFSET)?;
                self.reg_set(d, value);
                1
            }
            Out { r, a } => {
                self.store(data, a as u16 + IO_OFFSET, self.reg(r))?;
                1
            }
            IoBit { set, a, b } => {
                let addr = a as u16 + IO_OFFSET;
                let value = self.load(data, addr)?;
                let value = if set { value | 1 << b } else { value & !(1 << b) };
                self.store(data, addr, value)?;
                2
            }
            SkipIoBit { set, a, b } => {
                let value = self.load(data, a as u16 + IO_OFFSET)?;
                if (value & (1 << b) != 0) == set {
                    1 + self.skip(flash)?
                } else {
                    1
                }
            }
            SkipRegBit { set, r, b } => {
                if (self.reg(r) & (1 << b) != 0) == set {
                    1 + self.skip(flash)?
                } else {
                    1
                }
            }
            Bst { d, b } => {
                self.flag_set(SREG_T, self.reg(d) & (1 << b) != 0);
                1
            }
            Bld { d, b } => {
                let value = self.reg(d);
                let value = if self.flag(SREG_T) {
                    value | 1 << b
                } else {
                    value & !(1 << b)
                };
                self.reg_set(d, value);
                1
            }
            Bset { s } => {
                if s == SREG_I && !self.flag(SREG_I) {
                    self.hold_off = true;
                }
                self.flag_set(s, true);
                1
            }
            Bclr { s } => {
                self.flag_set(s, false);
                1
            }
            Branch { set, s, k } => {
                if self.flag(s) == set {
                    self.pc = self.pc.wrapping_add_signed(k as i16);
                    2
                } else {
                    1
                }
            }
            Rjmp { k } => {
                self.pc = self.pc.wrapping_add_signed(k);
                2
            }
            Rcall { k } => {
                self.push_pc(data, self.pc)?;
                self.pc = self.pc.wrapping_add_signed(k);
                3
            }
            Jmp { k } => {
                self.pc = k as u16;
                3
            }
            Call { k } => {
                self.push_pc(data, self.pc)?;
                self.pc = k as u16;
                4
            }
            Ijmp => {
                self.pc = self.pair(30);
                2
            }
            Icall => {
                self.push_pc(data, self.pc)?;
                self.pc = self.pair(30);
                3
            }
            Ret => {
                self.pc = self.pop_pc(data)?;
                4
            }
            Reti => {
                self.pc = self.pop_pc(data)?;
                self.flag_set(SREG_I, true);
                self.hold_off = true;
                debug!(pc = self.pc, "RETI");
                4
            }
        };
        Ok(cycles)
    }

    /// Skip the instruction after the current one, returning the extra
    /// cycles: one per skipped word.
    fn skip(&mut self, flash: &mut impl Bus) -> Result<u32> {
        let next = Self::fetch(flash, self.pc)?;
        let words = if decode::is_two_words(next) { 2 } else { 1 };
        self.pc = self.pc.wrapping_add(words);
        Ok(words as u32)
    }

    /// `LD`/`ST` with X+/-X (or the Y/Z forms) where the data register is
    /// half of the pointer have no defined result. They execute as a NOP.
    fn pointer_conflict(&self, reg: u8, ptr: Pointer, mode: PointerMode) -> bool {
        let conflict = mode != PointerMode::Plain && (reg & !1) == ptr.low();
        if conflict {
            warn!(
                pc = self.pc,
                reg,
                pointer = %ptr,
                "undefined pointer update with overlapping register, ignored"
            );
        }
        conflict
    }

    /// Effective address of a pointer access, applying pre-decrement or
    /// post-increment to the pair.
    fn pointer_address(&mut self, ptr: Pointer, mode: PointerMode) -> u16 {
        let pair = self.pair(ptr.low());
        match mode {
            PointerMode::Plain => pair,
            PointerMode::PostIncrement => {
                self.pair_set(ptr.low(), pair.wrapping_add(1));
                pair
            }
            PointerMode::PreDecrement => {
                let addr = pair.wrapping_sub(1);
                self.pair_set(ptr.low(), addr);
                addr
            }
        }
    }

    /// Two-register and register-immediate ALU operations.
    fn alu(&mut self, op: AluOp, d: u8, rr: u8) {
        let rd = self.reg(d);
        let (a, b) = (rd as u32, rr as u32);
        let carry = self.flag(SREG_C);
        match op {
            AluOp::Add | AluOp::Adc => {
                let out = alu::add(a, b, op == AluOp::Adc && carry, OpSize::Byte);
                self.reg_set(d, out.value as u8);
                self.apply_flags(ARITH, out.flags);
            }
            AluOp::Sub | AluOp::Cp => {
                let out = alu::sub_borrow(a, b, false, OpSize::Byte);
                if op == AluOp::Sub {
                    self.reg_set(d, out.value as u8);
                }
                self.apply_flags(ARITH, out.flags);
            }
            AluOp::Sbc | AluOp::Cpc => {
                let mut out = alu::sub_borrow(a, b, carry, OpSize::Byte);
                // Z can only be cleared, so multi-byte compares chain.
                out.flags.zero &= self.flag(SREG_Z);
                if op == AluOp::Sbc {
                    self.reg_set(d, out.value as u8);
                }
                self.apply_flags(ARITH, out.flags);
            }
            AluOp::And | AluOp::Or | AluOp::Eor => {
                let out = match op {
                    AluOp::And => alu::and(a, b, OpSize::Byte),
                    AluOp::Or => alu::or(a, b, OpSize::Byte),
                    _ => alu::xor(a, b, OpSize::Byte),
                };
                self.reg_set(d, out.value as u8);
                self.apply_flags(LOGIC, out.flags);
            }
            AluOp::Mov => self.reg_set(d, rr),
        }
    }

    fn unary(&mut self, op: UnaryOp, d: u8) {
        let value = self.reg(d) as u32;
        match op {
            UnaryOp::Com => {
                let mut out = alu::xor(value, 0xFF, OpSize::Byte);
                out.flags.carry = true;
                self.reg_set(d, out.value as u8);
                self.apply_flags(FlagMask::OSZC, out.flags);
            }
            UnaryOp::Neg => {
                let out = alu::sub_borrow(0, value, false, OpSize::Byte);
                self.reg_set(d, out.value as u8);
                self.apply_flags(ARITH, out.flags);
            }
            UnaryOp::Swap => self.reg_set(d, (value as u8).rotate_left(4)),
            UnaryOp::Inc | UnaryOp::Dec => {
                let out = if op == UnaryOp::Inc {
                    alu::add(value, 1, false, OpSize::Byte)
                } else {
                    alu::sub_borrow(value, 1, false, OpSize::Byte)
                };
                self.reg_set(d, out.value as u8);
                self.apply_flags(LOGIC, out.flags);
            }
            UnaryOp::Asr | UnaryOp::Lsr | UnaryOp::Ror => {
                let mut out = match op {
                    UnaryOp::Asr => alu::sar(value, 1, OpSize::Byte),
                    UnaryOp::Lsr => alu::shr(value, 1, OpSize::Byte),
                    _ => alu::rorc(value, self.flag(SREG_C), OpSize::Byte),
                };
                out.flags.overflow = out.flags.sign ^ out.flags.carry;
                self.reg_set(d, out.value as u8);
                self.apply_flags(FlagMask::OSZC, out.flags);
            }
        }
    }

    /// All products land in R1:R0. The fractional forms shift left once;
    /// C is bit 15 of the unshifted product.
    fn multiply(&mut self, kind: MulKind, d: u8, r: u8) {
        let (rd, rr) = (self.reg(d), self.reg(r));
        let product = match kind {
            MulKind::Mul | MulKind::Fmul => rd as u16 * rr as u16,
            MulKind::Muls | MulKind::Fmuls => (rd as i8 as i16 * rr as i8 as i16) as u16,
            MulKind::Mulsu | MulKind::Fmulsu => (rd as i8 as i16 * rr as i16) as u16,
        };
        let carry = product & 0x8000 != 0;
        let result = match kind {
            MulKind::Fmul | MulKind::Fmuls | MulKind::Fmulsu => product << 1,
            _ => product,
        };
        self.pair_set(0, result);
        let flags = Flags {
            carry,
            zero: result == 0,
            ..Flags::default()
        };
        self.apply_flags(FlagMask::CARRY | FlagMask::ZERO, flags);
    }
}
