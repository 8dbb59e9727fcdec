//! Instruction execution. PC already points past the instruction when an
//! arm runs; each arm returns the clock cycles it took, excluding wait
//! states.

use tracing::debug;

use crate::alu::{self, FlagMask, Flags, OpSize, Outcome};
use crate::bus::{Bus, Width};
use crate::error::Result;

use super::addressing::{BitMode, Location, Mode, width};
use super::decode::{BinOp, BitOp, Count, DivKind, Instruction, ShiftOp, StringOp, UnOp};
use super::regs::{ADDR_MASK, FLG_C, FLG_LAYOUT, FLG_O, FLG_Z};
use super::{Cpu, VECTOR_BRK, VECTOR_OVERFLOW, VECTOR_UND};

const OSZ: FlagMask = FlagMask::SZ.union(FlagMask::OVERFLOW);

impl Cpu {
    fn apply_flags(&mut self, mask: FlagMask, flags: Flags) {
        let flg = FLG_LAYOUT.merge(self.regs.flg(), mask, flags);
        self.regs.set_flg(flg);
    }

    /// PUSHM/POPM register number: R0-R3, A0, A1, SB, FB.
    fn multi(&self, index: usize) -> u16 {
        match index {
            0..=3 => self.regs.r(index),
            4 | 5 => self.regs.a(index - 4),
            6 => self.regs.sb,
            _ => self.regs.fb(),
        }
    }

    fn set_multi(&mut self, index: usize, value: u16) {
        match index {
            0..=3 => self.regs.set_r(index, value),
            4 | 5 => self.regs.set_a(index - 4, value),
            6 => self.regs.sb = value,
            _ => self.regs.set_fb(value),
        }
    }

    pub(super) fn execute(
        &mut self,
        bus: &mut impl Bus,
        insn: Instruction,
        pc: u32,
        len: u32,
    ) -> Result<u32> {
        use Instruction::*;

        let next = pc.wrapping_add(len) & ADDR_MASK;
        self.regs.pc = next;

        let cycles = match insn {
            Nop => 1,
            Brk => {
                self.trap(bus, VECTOR_BRK, next)?;
                27
            }
            Und => {
                self.trap(bus, VECTOR_UND, next)?;
                20
            }
            Into => {
                if self.regs.flag(FLG_O) {
                    self.trap(bus, VECTOR_OVERFLOW, next)?;
                    20
                } else {
                    1
                }
            }
            Wait => {
                self.waiting = true;
                debug!(pc, "WAIT");
                3
            }
            Int(n) => {
                self.software_interrupt(bus, n, next)?;
                19
            }
            Rts => {
                self.regs.pc = self.pop(bus, Width::Triple)? & ADDR_MASK;
                6
            }
            Reit => {
                self.pop_context(bus)?;
                debug!(pc = self.regs.pc, ipl = self.regs.ipl(), "REIT");
                6
            }
            Enter(size) => {
                let fb = self.regs.fb();
                self.push(bus, Width::Word, fb as u32)?;
                let sp = self.regs.sp();
                self.regs.set_fb(sp);
                self.regs.set_sp(sp.wrapping_sub(size as u16));
                4
            }
            Exitd => {
                let fb = self.regs.fb();
                self.regs.set_sp(fb);
                let fb = self.pop(bus, Width::Word)?;
                self.regs.set_fb(fb as u16);
                self.regs.pc = self.pop(bus, Width::Triple)? & ADDR_MASK;
                9
            }
            Jmps(n) | Jsrs(n) => {
                let entry = 0xF_FFFE - 2 * n as u32;
                let target = 0xF_0000 | self.load(bus, entry, Width::Word)?;
                let call = matches!(insn, Jsrs(_));
                if call {
                    self.push(bus, Width::Triple, next)?;
                }
                self.regs.pc = target;
                if call { 13 } else { 9 }
            }
            Ldipl(level) => {
                self.regs.set_ipl(level);
                2
            }
            Fset(bit) => {
                self.regs.flag_set(bit, true);
                1
            }
            Fclr(bit) => {
                self.regs.flag_set(bit, false);
                1
            }
            Pushm(mask) => {
                let mut count = 0;
                for index in 0..8 {
                    if mask & (0x80 >> index) != 0 {
                        let value = self.multi(index);
                        self.push(bus, Width::Word, value as u32)?;
                        count += 1;
                    }
                }
                2 + 2 * count
            }
            Popm(mask) => {
                let mut count = 0;
                for index in (0..8).rev() {
                    if mask & (1 << index) != 0 {
                        let value = self.pop(bus, Width::Word)?;
                        self.set_multi(index, value as u16);
                        count += 1;
                    }
                }
                1 + 2 * count
            }
            Mov { size, src, dst } => {
                let value = self.get(bus, &src, size)?;
                self.set(bus, &dst, size, value)?;
                self.apply_flags(FlagMask::SZ, Flags::of(value, size));
                1 + src.cycles() + dst.cycles()
            }
            Mova { src, dst } => {
                let addr = self.effective_address(&src)?;
                self.regs.set(dst, OpSize::Word, addr as u32);
                2
            }
            Xchg { size, reg, dst } => {
                let ours = self.regs.get(reg, size);
                let theirs = self.get(bus, &dst, size)?;
                self.set(bus, &dst, size, ours)?;
                self.regs.set(reg, size, theirs);
                4 + dst.cycles()
            }
            Push { size, src } => {
                let value = self.get(bus, &src, size)?;
                self.push(bus, width(size), value)?;
                2 + src.cycles()
            }
            Pop { size, dst } => {
                let value = self.pop(bus, width(size))?;
                self.set(bus, &dst, size, value)?;
                3 + dst.cycles()
            }
            Pusha { src } => {
                let addr = self.effective_address(&src)?;
                self.push(bus, Width::Word, addr as u32)?;
                2
            }
            Pushc(reg) => {
                let value = self.regs.control(reg);
                self.push(bus, Width::Word, value as u32)?;
                2
            }
            Popc(reg) => {
                let value = self.pop(bus, Width::Word)?;
                self.regs.set_control(reg, value as u16);
                3
            }
            Ldc { src, dst } => {
                let value = self.get(bus, &src, OpSize::Word)?;
                self.regs.set_control(dst, value as u16);
                1 + src.cycles()
            }
            Stc { src, dst } => {
                let value = self.regs.control(src);
                self.set(bus, &dst, OpSize::Word, value as u32)?;
                1 + dst.cycles()
            }
            StcPc { dst } => {
                match self.locate(&dst) {
                    Location::Register(selector) => self.regs.set(selector, OpSize::Long, next),
                    Location::Memory(addr) => self.store(bus, addr, Width::Triple, next)?,
                    Location::Immediate(_) => return Err(self.illegal(0xF)),
                }
                2 + dst.cycles()
            }
            AddSp { value } => {
                let sp = self.regs.sp();
                let out = alu::add(sp as u32, value as u16 as u32, false, OpSize::Word);
                self.regs.set_sp(out.value as u16);
                self.apply_flags(FlagMask::OSZC, out.flags);
                1
            }
            Lde { size, src, dst } | Ste { size, src, dst } => {
                let value = self.get(bus, &src, size)?;
                self.set(bus, &dst, size, value)?;
                self.apply_flags(FlagMask::SZ, Flags::of(value, size));
                4 + src.cycles() + dst.cycles()
            }
            Stz {
                nonzero,
                value,
                dst,
            } => {
                if self.regs.flag(FLG_Z) != nonzero {
                    self.set(bus, &dst, OpSize::Byte, value as u32)?;
                }
                1 + dst.cycles()
            }
            Stzx { zero, nonzero, dst } => {
                let value = if self.regs.flag(FLG_Z) { zero } else { nonzero };
                self.set(bus, &dst, OpSize::Byte, value as u32)?;
                2 + dst.cycles()
            }
            Binary { op, size, src, dst } => self.binary(bus, op, size, &src, &dst)?,
            Unary { op, size, dst } => {
                let value = self.get(bus, &dst, size)?;
                let (out, mask) = self.unary(op, value, size);
                self.set(bus, &dst, size, out.value)?;
                self.apply_flags(mask, out.flags);
                1 + dst.cycles()
            }
            Exts { size, dst } => {
                let wide = match size {
                    OpSize::Byte => OpSize::Word,
                    _ => OpSize::Long,
                };
                let value = size.sign_extend(self.get(bus, &dst, size)?) as u32 & wide.mask();
                // R1L widens into R1, whose word selector is 1.
                let target = match (dst, size) {
                    (Mode::Register(selector), OpSize::Byte) => Mode::Register(selector / 2),
                    _ => dst,
                };
                self.set(bus, &target, wide, value)?;
                self.apply_flags(FlagMask::SZ, Flags::of(value, wide));
                3 + dst.cycles()
            }
            Shift {
                op,
                size,
                count,
                dst,
            } => self.shift(bus, op, size, count, &dst)?,
            Mul {
                signed,
                size,
                src,
                dst,
            } => {
                let a = self.get(bus, &src, size)?;
                let b = self.get(bus, &dst, size)?;
                let product = if signed {
                    (size.sign_extend(a) * size.sign_extend(b)) as u32
                } else {
                    a * b
                };
                let (wide, target) = match (size, dst) {
                    (OpSize::Byte, Mode::Register(selector)) if selector < 4 => {
                        (OpSize::Word, Mode::Register(selector / 2))
                    }
                    (OpSize::Byte, _) => (OpSize::Word, dst),
                    _ => (OpSize::Long, dst),
                };
                self.set(bus, &target, wide, product & wide.mask())?;
                4 + src.cycles() + dst.cycles()
            }
            Div { kind, size, src } => {
                let divisor = self.get(bus, &src, size)?;
                self.divide(kind, size, divisor);
                22 + src.cycles()
            }
            Bit { op, operand } => self.bit(bus, op, &operand)?,
            Bmcnd { cond, operand } => {
                let value = cond.holds(self.regs.flg());
                self.set_bit(bus, &operand, value)?;
                6
            }
            BmcndC(cond) => {
                let value = cond.holds(self.regs.flg());
                self.regs.flag_set(FLG_C, value);
                1
            }
            Jmp { target, .. } => {
                self.regs.pc = target;
                4
            }
            Jcnd { cond, target } => {
                if cond.holds(self.regs.flg()) {
                    self.regs.pc = target;
                    4
                } else {
                    2
                }
            }
            Jsr { target, .. } => {
                self.push(bus, Width::Triple, next)?;
                self.regs.pc = target;
                8
            }
            Jmpi { far, src } | Jsri { far, src } => {
                let target = if far {
                    self.get_address(bus, &src)?
                } else {
                    let offset = OpSize::Word.sign_extend(self.get(bus, &src, OpSize::Word)?);
                    (pc as i32).wrapping_add(offset) as u32 & ADDR_MASK
                };
                let call = matches!(insn, Jsri { .. });
                if call {
                    self.push(bus, Width::Triple, next)?;
                }
                self.regs.pc = target;
                if call { 11 } else { 7 }
            }
            Adjnz {
                size,
                step,
                dst,
                target,
            } => {
                let value = self.get(bus, &dst, size)?;
                let value = value.wrapping_add(step as i32 as u32) & size.mask();
                self.set(bus, &dst, size, value)?;
                if value != 0 {
                    self.regs.pc = target;
                    5
                } else {
                    3
                }
            }
            Str { op, size } => self.string(bus, op, size)?,
        };
        Ok(cycles)
    }

    fn binary(
        &mut self,
        bus: &mut impl Bus,
        op: BinOp,
        size: OpSize,
        src: &Mode,
        dst: &Mode,
    ) -> Result<u32> {
        let b = self.get(bus, src, size)?;
        let a = self.get(bus, dst, size)?;
        let carry = self.regs.flag(FLG_C);
        let (out, mask, write) = match op {
            BinOp::Add => (alu::add(a, b, false, size), FlagMask::OSZC, true),
            BinOp::Adc => (alu::add(a, b, carry, size), FlagMask::OSZC, true),
            BinOp::Sub => (alu::sub_no_borrow(a, b, true, size), FlagMask::OSZC, true),
            BinOp::Sbb => (alu::sub_no_borrow(a, b, carry, size), FlagMask::OSZC, true),
            BinOp::Cmp => (alu::sub_no_borrow(a, b, true, size), FlagMask::OSZC, false),
            BinOp::And => (alu::and(a, b, size), FlagMask::SZ, true),
            BinOp::Or => (alu::or(a, b, size), FlagMask::SZ, true),
            BinOp::Xor => (alu::xor(a, b, size), FlagMask::SZ, true),
            BinOp::Tst => (alu::and(a, b, size), FlagMask::SZ, false),
            BinOp::Dadd => (alu::bcd_add(a, b, false, size), FlagMask::SZC, true),
            BinOp::Dadc => (alu::bcd_add(a, b, carry, size), FlagMask::SZC, true),
            // Decimal subtract reports "no borrow" in C like the binary one.
            BinOp::Dsub | BinOp::Dsbb => {
                let borrow = op == BinOp::Dsbb && !carry;
                let mut out = alu::bcd_sub(a, b, borrow, size);
                out.flags.carry = !out.flags.carry;
                (out, FlagMask::SZC, true)
            }
        };
        if write {
            self.set(bus, dst, size, out.value)?;
        }
        self.apply_flags(mask, out.flags);
        let base = match op {
            BinOp::Dadd | BinOp::Dadc | BinOp::Dsub | BinOp::Dsbb => 5,
            _ => 1,
        };
        Ok(base + src.cycles() + dst.cycles())
    }

    fn unary(&self, op: UnOp, value: u32, size: OpSize) -> (Outcome, FlagMask) {
        let carry = self.regs.flag(FLG_C);
        match op {
            UnOp::Abs if size.is_negative(value) => (alu::sub_no_borrow(0, value, true, size), OSZ),
            UnOp::Abs => (alu::test(value, size), OSZ),
            UnOp::Neg => (alu::sub_no_borrow(0, value, true, size), FlagMask::OSZC),
            UnOp::Not => (alu::test(!value, size), FlagMask::SZ),
            UnOp::Rolc => (alu::rolc(value, carry, size), FlagMask::SZC),
            UnOp::Rorc => (alu::rorc(value, carry, size), FlagMask::SZC),
            UnOp::Adcf => (alu::add(value, 0, carry, size), FlagMask::OSZC),
            UnOp::Inc => (alu::add(value, 1, false, size), FlagMask::SZ),
            UnOp::Dec => (alu::sub_no_borrow(value, 1, true, size), FlagMask::SZ),
        }
    }

    /// A zero count leaves the operand and flags alone.
    fn shift(
        &mut self,
        bus: &mut impl Bus,
        op: ShiftOp,
        size: OpSize,
        count: Count,
        dst: &Mode,
    ) -> Result<u32> {
        let count = match count {
            Count::Imm(n) => n,
            Count::R1h => self.regs.get(3, OpSize::Byte) as u8 as i8,
        };
        if count == 0 {
            return Ok(1 + dst.cycles());
        }
        let value = self.get(bus, dst, size)?;
        let amount = count.unsigned_abs() as u32;
        let left = count > 0;
        let (out, mask) = match (op, left) {
            (ShiftOp::Rot, true) => (alu::rol(value, amount, size), FlagMask::SZC),
            (ShiftOp::Rot, false) => (alu::ror(value, amount, size), FlagMask::SZC),
            (ShiftOp::Shl, true) => (alu::shl(value, amount, size), FlagMask::SZC),
            (ShiftOp::Shl, false) => (alu::shr(value, amount, size), FlagMask::SZC),
            (ShiftOp::Sha, true) => (alu::sal(value, amount, size), FlagMask::OSZC),
            (ShiftOp::Sha, false) => (alu::sar(value, amount, size), FlagMask::OSZC),
        };
        self.set(bus, dst, size, out.value)?;
        self.apply_flags(mask, out.flags);
        Ok(1 + amount + dst.cycles())
    }

    /// R0 (bytes) or R2R0 (words) divided by `divisor`. A zero divisor or a
    /// quotient that does not fit sets O and leaves the registers alone.
    fn divide(&mut self, kind: DivKind, size: OpSize, divisor: u32) {
        let wide = match size {
            OpSize::Byte => OpSize::Word,
            _ => OpSize::Long,
        };
        let dividend = self.regs.get(0, wide);
        let result = if divisor == 0 {
            None
        } else {
            match kind {
                DivKind::Divu => Some(((dividend / divisor) as i64, (dividend % divisor) as i64)),
                DivKind::Div | DivKind::Divx => {
                    let a = wide.sign_extend(dividend) as i64;
                    let d = size.sign_extend(divisor) as i64;
                    let (mut q, mut r) = (a / d, a % d);
                    // DIVX gives the remainder the sign of the divisor.
                    if kind == DivKind::Divx && r != 0 && (r < 0) != (d < 0) {
                        q -= 1;
                        r += d;
                    }
                    Some((q, r))
                }
            }
        };
        let fits = |q: i64| match kind {
            DivKind::Divu => q <= size.mask() as i64,
            _ => q >= -(size.sign_bit() as i64) && q < size.sign_bit() as i64,
        };
        let overflow = match result {
            Some((q, r)) if fits(q) => {
                let (quotient, remainder) = match size {
                    OpSize::Byte => (0, 1),
                    _ => (0, 2),
                };
                self.regs.set(quotient, size, q as u32 & size.mask());
                self.regs.set(remainder, size, r as u32 & size.mask());
                false
            }
            _ => true,
        };
        self.apply_flags(
            FlagMask::OVERFLOW,
            Flags {
                overflow,
                ..Flags::default()
            },
        );
    }

    fn bit(&mut self, bus: &mut impl Bus, op: BitOp, operand: &BitMode) -> Result<u32> {
        if matches!(op, BitOp::Bset | BitOp::Bclr) {
            self.set_bit(bus, operand, op == BitOp::Bset)?;
            return Ok(2 + operand.codelen());
        }
        let bit = self.get_bit(bus, operand)?;
        let carry = self.regs.flag(FLG_C);
        let test = Flags {
            carry: bit,
            zero: !bit,
            ..Flags::default()
        };
        let only_carry = |carry| {
            (
                FlagMask::CARRY,
                Flags {
                    carry,
                    ..Flags::default()
                },
            )
        };
        let (mask, flags) = match op {
            BitOp::Btst | BitOp::Btstc | BitOp::Btsts => (FlagMask::CARRY | FlagMask::ZERO, test),
            BitOp::Bntst => only_carry(!bit),
            BitOp::Band => only_carry(carry & bit),
            BitOp::Bnand => only_carry(carry & !bit),
            BitOp::Bor => only_carry(carry | bit),
            BitOp::Bnor => only_carry(carry | !bit),
            BitOp::Bxor => only_carry(carry ^ bit),
            BitOp::Bnxor => only_carry(carry ^ !bit),
            BitOp::Bnot | BitOp::Bset | BitOp::Bclr => {
                self.set_bit(bus, operand, !bit)?;
                (FlagMask::NONE, Flags::default())
            }
        };
        match op {
            BitOp::Btstc => self.set_bit(bus, operand, false)?,
            BitOp::Btsts => self.set_bit(bus, operand, true)?,
            _ => {}
        }
        self.apply_flags(mask, flags);
        Ok(3 + operand.codelen())
    }

    /// SMOVF/SMOVB copy R3 elements from R1H:A0 (20 bits) to A1; SSTR
    /// fills R3 elements at A1 with R0L or R0. Runs to completion in one
    /// step.
    fn string(&mut self, bus: &mut impl Bus, op: StringOp, size: OpSize) -> Result<u32> {
        let width = width(size);
        let step = size.bytes();
        let mut count = 0;
        while self.regs.r(3) != 0 {
            let dst = self.regs.a(1);
            let forward = op != StringOp::Smovb;
            match op {
                StringOp::Smovf | StringOp::Smovb => {
                    let r1h = self.regs.get(3, OpSize::Byte);
                    let src = (r1h & 0xF) << 16 | self.regs.a(0) as u32;
                    let value = self.load(bus, src, width)?;
                    self.store(bus, dst as u32, width, value)?;
                    let src = if forward {
                        src.wrapping_add(step)
                    } else {
                        src.wrapping_sub(step)
                    } & ADDR_MASK;
                    self.regs.set(3, OpSize::Byte, (r1h & 0xF0) | src >> 16);
                    self.regs.set_a(0, src as u16);
                }
                StringOp::Sstr => {
                    let value = self.regs.get(0, size);
                    self.store(bus, dst as u32, width, value)?;
                }
            }
            let dst = if forward {
                dst.wrapping_add(step as u16)
            } else {
                dst.wrapping_sub(step as u16)
            };
            self.regs.set_a(1, dst);
            let remaining = self.regs.r(3) - 1;
            self.regs.set_r(3, remaining);
            count += 1;
        }
        Ok(1 + 5 * count)
    }
}
