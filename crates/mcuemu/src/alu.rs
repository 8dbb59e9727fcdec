//! The flag/ALU engine shared by all cores.
//!
//! Every primitive is a pure function from operands to an [`Outcome`]: the
//! wrapped result plus the full set of flags it would produce. Nothing here
//! touches a register, the bus or a status word. Cores pick the flags they
//! care about and fold them into their own status word through
//! [`StatusLayout::merge`].
//!
//! Subtraction comes in two carry conventions, and neither is derived from
//! the other at the call site:
//!
//!  - [`sub_borrow`]: carry set when a borrow *was* needed (8051, AVR).
//!  - [`sub_no_borrow`]: carry set when a borrow was *not* needed (M16C).

use std::ops::BitOr;

use once_cell::sync::Lazy;

/// Operand size of an ALU operation. `Long` only appears as the composite
/// result of register-pair operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSize {
    Byte,
    Word,
    Long,
}

impl OpSize {
    pub const fn bytes(self) -> u32 {
        match self {
            OpSize::Byte => 1,
            OpSize::Word => 2,
            OpSize::Long => 4,
        }
    }

    pub const fn bits(self) -> u32 {
        self.bytes() * 8
    }

    pub const fn mask(self) -> u32 {
        match self {
            OpSize::Byte => 0xFF,
            OpSize::Word => 0xFFFF,
            OpSize::Long => 0xFFFF_FFFF,
        }
    }

    pub const fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    pub const fn is_negative(self, value: u32) -> bool {
        value & self.sign_bit() != 0
    }

    pub const fn sign_extend(self, value: u32) -> i32 {
        match self {
            OpSize::Byte => value as u8 as i8 as i32,
            OpSize::Word => value as u16 as i16 as i32,
            OpSize::Long => value as i32,
        }
    }
}

/// Status bits produced by an ALU primitive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub carry: bool,
    pub zero: bool,
    pub sign: bool,
    pub overflow: bool,
    /// Carry (or borrow) across the low nibble boundary.
    pub half: bool,
}

impl Flags {
    /// Sign and zero of `value`, everything else clear.
    pub fn of(value: u32, size: OpSize) -> Self {
        Self {
            zero: value & size.mask() == 0,
            sign: size.is_negative(value),
            ..Self::default()
        }
    }
}

/// Selects which flags a caller wants written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagMask(u8);

impl FlagMask {
    pub const NONE: Self = Self(0);
    pub const CARRY: Self = Self(1 << 0);
    pub const ZERO: Self = Self(1 << 1);
    pub const SIGN: Self = Self(1 << 2);
    pub const OVERFLOW: Self = Self(1 << 3);
    pub const HALF: Self = Self(1 << 4);
    pub const ALL: Self = Self(0x1F);

    pub const SZ: Self = Self::SIGN.union(Self::ZERO);
    pub const SZC: Self = Self::SZ.union(Self::CARRY);
    pub const OSZC: Self = Self::SZC.union(Self::OVERFLOW);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FlagMask {
    type Output = FlagMask;
    fn bitor(self, other: Self) -> Self::Output {
        self.union(other)
    }
}

/// Result of an ALU primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub value: u32,
    pub flags: Flags,
}

impl Outcome {
    fn logic(value: u32, size: OpSize) -> Self {
        let value = value & size.mask();
        Self {
            value,
            flags: Flags::of(value, size),
        }
    }
}

/// Bit positions of each flag inside an architecture's status word. A
/// `None` flag does not exist on that architecture and is never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLayout {
    pub carry: Option<u8>,
    pub zero: Option<u8>,
    pub sign: Option<u8>,
    pub overflow: Option<u8>,
    pub half: Option<u8>,
}

impl StatusLayout {
    /// Replace the bit positions selected by `mask` with `flags`, preserving
    /// every other bit of `status`.
    pub fn merge(&self, status: u16, mask: FlagMask, flags: Flags) -> u16 {
        let fields = [
            (self.carry, FlagMask::CARRY, flags.carry),
            (self.zero, FlagMask::ZERO, flags.zero),
            (self.sign, FlagMask::SIGN, flags.sign),
            (self.overflow, FlagMask::OVERFLOW, flags.overflow),
            (self.half, FlagMask::HALF, flags.half),
        ];
        fields
            .into_iter()
            .fold(status, |status, (bit, selector, value)| match bit {
                Some(bit) if mask.contains(selector) => set_bit(status, bit, value),
                _ => status,
            })
    }
}

#[inline(always)]
pub fn set_bit(status: u16, bit: u8, value: bool) -> u16 {
    if value {
        status | (1 << bit)
    } else {
        status & !(1 << bit)
    }
}

#[inline(always)]
pub fn add_overflow(a: u32, b: u32, result: u32, size: OpSize) -> bool {
    !(a ^ b) & (a ^ result) & size.sign_bit() != 0
}

#[inline(always)]
pub fn sub_overflow(a: u32, b: u32, result: u32, size: OpSize) -> bool {
    (a ^ b) & (a ^ result) & size.sign_bit() != 0
}

/// `a + b + carry_in`. Carry is the carry out of the most significant bit.
pub fn add(a: u32, b: u32, carry_in: bool, size: OpSize) -> Outcome {
    let mask = size.mask() as u64;
    let (a, b) = (a as u64 & mask, b as u64 & mask);
    let full = a + b + carry_in as u64;
    let value = (full & mask) as u32;
    Outcome {
        value,
        flags: Flags {
            carry: full > mask,
            zero: value == 0,
            sign: size.is_negative(value),
            overflow: add_overflow(a as u32, b as u32, value, size),
            half: (a & 0xF) + (b & 0xF) + carry_in as u64 > 0xF,
        },
    }
}

/// `a - b - borrow_in` where carry reports that a borrow was needed.
pub fn sub_borrow(a: u32, b: u32, borrow_in: bool, size: OpSize) -> Outcome {
    let mask = size.mask() as i64;
    let (a, b) = (a as i64 & mask, b as i64 & mask);
    let full = a - b - borrow_in as i64;
    let value = (full & mask) as u32;
    Outcome {
        value,
        flags: Flags {
            carry: full < 0,
            zero: value == 0,
            sign: size.is_negative(value),
            overflow: sub_overflow(a as u32, b as u32, value, size),
            half: (a & 0xF) < (b & 0xF) + borrow_in as i64,
        },
    }
}

/// `a - b - !carry_in` where carry reports that *no* borrow was needed. A
/// set `carry_in` therefore means there is no pending borrow.
pub fn sub_no_borrow(a: u32, b: u32, carry_in: bool, size: OpSize) -> Outcome {
    let mut outcome = sub_borrow(a, b, !carry_in, size);
    outcome.flags.carry = !outcome.flags.carry;
    outcome.flags.half = !outcome.flags.half;
    outcome
}

pub fn and(a: u32, b: u32, size: OpSize) -> Outcome {
    Outcome::logic(a & b, size)
}

pub fn or(a: u32, b: u32, size: OpSize) -> Outcome {
    Outcome::logic(a | b, size)
}

pub fn xor(a: u32, b: u32, size: OpSize) -> Outcome {
    Outcome::logic(a ^ b, size)
}

/// Sign and zero only, for data moves.
pub fn test(value: u32, size: OpSize) -> Outcome {
    Outcome::logic(value, size)
}

/// Decimal add of packed BCD operands.
///
/// Corrected digit by digit: a digit that leaves `[0, 9]` gets 6 added at its
/// position and carries into the next digit, so the carry from one digit
/// decides whether the next one needs correcting.
pub fn bcd_add(a: u32, b: u32, carry_in: bool, size: OpSize) -> Outcome {
    let mut carry = carry_in as u32;
    let mut value = 0;
    let mut half = false;
    for digit in 0..size.bits() / 4 {
        let shift = digit * 4;
        let mut d = ((a >> shift) & 0xF) + ((b >> shift) & 0xF) + carry;
        if d > 9 {
            d += 6;
        }
        carry = (d > 0xF) as u32;
        if digit == 0 {
            half = carry != 0;
        }
        value |= (d & 0xF) << shift;
    }
    Outcome {
        value,
        flags: Flags {
            carry: carry != 0,
            zero: value == 0,
            sign: size.is_negative(value),
            overflow: false,
            half,
        },
    }
}

/// Decimal subtract of packed BCD operands. Carry reports a borrow out of
/// the top digit (true-borrow convention).
pub fn bcd_sub(a: u32, b: u32, borrow_in: bool, size: OpSize) -> Outcome {
    let mut borrow = borrow_in as i32;
    let mut value = 0;
    let mut half = false;
    for digit in 0..size.bits() / 4 {
        let shift = digit * 4;
        let mut d = ((a >> shift) & 0xF) as i32 - ((b >> shift) & 0xF) as i32 - borrow;
        borrow = (d < 0) as i32;
        if d < 0 {
            // 16 from the borrow, minus the 6 correction.
            d += 10;
        }
        if digit == 0 {
            half = borrow != 0;
        }
        value |= ((d as u32) & 0xF) << shift;
    }
    Outcome {
        value,
        flags: Flags {
            carry: borrow != 0,
            zero: value == 0,
            sign: size.is_negative(value),
            overflow: false,
            half,
        },
    }
}

/// Logical shift left by `count` (at least one). Carry is the last bit out.
pub fn shl(value: u32, count: u32, size: OpSize) -> Outcome {
    debug_assert!(count >= 1);
    let wide = (value & size.mask()) as u64;
    let carry = count <= size.bits() && (wide >> (size.bits() - count)) & 1 != 0;
    let mut outcome = Outcome::logic(wide.checked_shl(count).unwrap_or(0) as u32, size);
    outcome.flags.carry = carry;
    outcome
}

/// Arithmetic shift left. Overflow is set if the sign bit changed at any
/// point during the shift.
pub fn sal(value: u32, count: u32, size: OpSize) -> Outcome {
    let mut outcome = shl(value, count, size);
    let span = (count + 1).min(size.bits());
    let top = ((value & size.mask()) as u64) >> (size.bits() - span);
    outcome.flags.overflow = top != 0 && top != (1u64 << span) - 1;
    outcome
}

/// Logical shift right by `count` (at least one). Carry is the last bit out.
pub fn shr(value: u32, count: u32, size: OpSize) -> Outcome {
    debug_assert!(count >= 1);
    let wide = (value & size.mask()) as u64;
    let carry = count <= size.bits() && (wide >> (count - 1)) & 1 != 0;
    let mut outcome = Outcome::logic(wide.checked_shr(count).unwrap_or(0) as u32, size);
    outcome.flags.carry = carry;
    outcome
}

/// Arithmetic shift right by `count` (at least one).
pub fn sar(value: u32, count: u32, size: OpSize) -> Outcome {
    debug_assert!(count >= 1);
    let signed = size.sign_extend(value) as i64;
    let count = count.min(size.bits());
    let carry = (signed >> (count - 1)) & 1 != 0;
    let mut outcome = Outcome::logic((signed >> count) as u32, size);
    outcome.flags.carry = carry;
    outcome
}

/// Rotate left by `count` (at least one). Carry is the bit rotated into the
/// least significant position.
pub fn rol(value: u32, count: u32, size: OpSize) -> Outcome {
    let bits = size.bits();
    let value = value & size.mask();
    let count = count % bits;
    let rotated = if count == 0 {
        value
    } else {
        ((value << count) | (value >> (bits - count))) & size.mask()
    };
    let mut outcome = Outcome::logic(rotated, size);
    outcome.flags.carry = rotated & 1 != 0;
    outcome
}

/// Rotate right by `count` (at least one). Carry is the bit rotated into the
/// most significant position.
pub fn ror(value: u32, count: u32, size: OpSize) -> Outcome {
    let bits = size.bits();
    let value = value & size.mask();
    let count = count % bits;
    let rotated = if count == 0 {
        value
    } else {
        ((value >> count) | (value << (bits - count))) & size.mask()
    };
    let mut outcome = Outcome::logic(rotated, size);
    outcome.flags.carry = size.is_negative(rotated);
    outcome
}

/// Rotate left one bit through carry.
pub fn rolc(value: u32, carry_in: bool, size: OpSize) -> Outcome {
    let mut outcome = Outcome::logic((value << 1) | carry_in as u32, size);
    outcome.flags.carry = size.is_negative(value);
    outcome
}

/// Rotate right one bit through carry.
pub fn rorc(value: u32, carry_in: bool, size: OpSize) -> Outcome {
    let value = value & size.mask();
    let top = if carry_in { size.sign_bit() } else { 0 };
    let mut outcome = Outcome::logic((value >> 1) | top, size);
    outcome.flags.carry = value & 1 != 0;
    outcome
}

/// Carry and overflow of add/subtract looked up from the most significant
/// bits of both operands and the result.
///
/// Those three bits determine both flags: the carry into the top bit is
/// `a ^ b ^ result`, and carry/overflow follow from that. The table is built
/// once by running real arithmetic on one representative operand pair per
/// index, and its agreement with [`add`] / [`sub_borrow`] is checked by test
/// over every 8-bit input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagTable {
    add: [Flags; 8],
    sub: [Flags; 8],
}

impl FlagTable {
    pub fn build() -> Self {
        let mut add = [Flags::default(); 8];
        let mut sub = [Flags::default(); 8];
        for (index, (add, sub)) in add.iter_mut().zip(sub.iter_mut()).enumerate() {
            let a7 = (index >> 2) as u8 & 1;
            let b7 = (index >> 1) as u8 & 1;
            let r7 = index as u8 & 1;
            let into_msb = a7 ^ b7 ^ r7 != 0;

            let (a, b) = if into_msb {
                (a7 << 7 | 0x7F, b7 << 7 | 0x01)
            } else {
                (a7 << 7, b7 << 7)
            };
            let (_, carry) = a.overflowing_add(b);
            let (_, overflow) = (a as i8).overflowing_add(b as i8);
            *add = Flags {
                carry,
                overflow,
                ..Flags::default()
            };

            let (a, b) = if into_msb {
                (a7 << 7, b7 << 7 | 0x01)
            } else {
                (a7 << 7, b7 << 7)
            };
            let (_, borrow) = a.overflowing_sub(b);
            let (_, overflow) = (a as i8).overflowing_sub(b as i8);
            *sub = Flags {
                carry: borrow,
                overflow,
                ..Flags::default()
            };
        }
        Self { add, sub }
    }

    pub const fn index(a: u32, b: u32, result: u32, size: OpSize) -> usize {
        (size.is_negative(a) as usize) << 2
            | (size.is_negative(b) as usize) << 1
            | size.is_negative(result) as usize
    }

    /// Flags of `result = a + b (+ carry)`.
    pub fn add_flags(&self, a: u32, b: u32, result: u32, size: OpSize) -> Flags {
        Self::complete(self.add[Self::index(a, b, result, size)], result, size)
    }

    /// Flags of `result = a - b (- borrow)`, carry meaning borrow.
    pub fn sub_flags(&self, a: u32, b: u32, result: u32, size: OpSize) -> Flags {
        Self::complete(self.sub[Self::index(a, b, result, size)], result, size)
    }

    fn complete(entry: Flags, result: u32, size: OpSize) -> Flags {
        Flags {
            zero: result & size.mask() == 0,
            sign: size.is_negative(result),
            ..entry
        }
    }
}

/// The process-wide flag table, built on first use.
pub static FLAG_TABLE: Lazy<FlagTable> = Lazy::new(FlagTable::build);

#[cfg(test)]
mod tests {
    use super::*;

    fn bcd_to_int(value: u32) -> u32 {
        (value >> 4) * 10 + (value & 0xF)
    }

    #[test]
    fn add_table_matches_formula_for_all_bytes() {
        let table = FlagTable::build();
        for a in 0..=0xFF {
            for b in 0..=0xFF {
                for carry in [false, true] {
                    let direct = add(a, b, carry, OpSize::Byte);
                    let looked_up = table.add_flags(a, b, direct.value, OpSize::Byte);
                    assert_eq!(looked_up.carry, direct.flags.carry, "{a:02X}+{b:02X}+{carry}");
                    assert_eq!(looked_up.overflow, direct.flags.overflow, "{a:02X}+{b:02X}");
                    assert_eq!(looked_up.zero, direct.flags.zero);
                    assert_eq!(looked_up.sign, direct.flags.sign);
                }
            }
        }
    }

    #[test]
    fn sub_table_matches_formula_for_all_bytes() {
        let table = FlagTable::build();
        for a in 0..=0xFF {
            for b in 0..=0xFF {
                for borrow in [false, true] {
                    let direct = sub_borrow(a, b, borrow, OpSize::Byte);
                    let looked_up = table.sub_flags(a, b, direct.value, OpSize::Byte);
                    assert_eq!(looked_up.carry, direct.flags.carry, "{a:02X}-{b:02X}-{borrow}");
                    assert_eq!(looked_up.overflow, direct.flags.overflow, "{a:02X}-{b:02X}");
                }
            }
        }
    }

    #[test]
    fn table_works_on_words() {
        let direct = add(0x7FFF, 0x0001, false, OpSize::Word);
        let flags = FLAG_TABLE.add_flags(0x7FFF, 0x0001, direct.value, OpSize::Word);
        assert!(flags.overflow && !flags.carry && flags.sign);

        let direct = sub_borrow(0x0000, 0x0001, false, OpSize::Word);
        let flags = FLAG_TABLE.sub_flags(0, 1, direct.value, OpSize::Word);
        assert_eq!(direct.value, 0xFFFF);
        assert!(flags.carry && !flags.overflow);
    }

    #[test]
    fn subtract_conventions_are_inverse() {
        let borrow = sub_borrow(0x10, 0x20, false, OpSize::Byte);
        let no_borrow = sub_no_borrow(0x10, 0x20, true, OpSize::Byte);
        assert_eq!(borrow.value, 0xF0);
        assert_eq!(no_borrow.value, 0xF0);
        assert!(borrow.flags.carry);
        assert!(!no_borrow.flags.carry);

        // An M16C-style SBB with C clear subtracts one more.
        assert_eq!(sub_no_borrow(0x10, 0x01, false, OpSize::Byte).value, 0x0E);
    }

    #[test]
    fn overflow_rules() {
        assert!(add(0x7F, 0x01, false, OpSize::Byte).flags.overflow);
        assert!(!add(0x7F, 0xFF, false, OpSize::Byte).flags.overflow);
        // Operands differ in sign, result takes the subtrahend's sign.
        assert!(sub_borrow(0x80, 0x01, false, OpSize::Byte).flags.overflow);
        assert!(sub_borrow(0x01, 0x80, false, OpSize::Byte).flags.overflow);
        assert!(!sub_borrow(0x05, 0x03, false, OpSize::Byte).flags.overflow);
    }

    #[test]
    fn decimal_add_over_all_bcd_bytes() {
        let bcd = (0..=0x99u32).filter(|v| v & 0xF <= 9 && v >> 4 <= 9);
        for a in bcd.clone() {
            for b in bcd.clone() {
                let out = bcd_add(a, b, false, OpSize::Byte);
                let sum = bcd_to_int(a) + bcd_to_int(b);
                assert_eq!(bcd_to_int(out.value), sum % 100, "{a:02X}+{b:02X}");
                assert_eq!(out.flags.carry, sum >= 100, "{a:02X}+{b:02X}");
            }
        }
    }

    #[test]
    fn decimal_sub_borrows_per_digit() {
        let out = bcd_sub(0x10, 0x01, false, OpSize::Byte);
        assert_eq!(out.value, 0x09);
        assert!(!out.flags.carry);
        assert!(out.flags.half);

        let out = bcd_sub(0x00, 0x01, false, OpSize::Byte);
        assert_eq!(out.value, 0x99);
        assert!(out.flags.carry);

        let out = bcd_add(0x0999, 0x0001, false, OpSize::Word);
        assert_eq!(out.value, 0x1000);
    }

    #[test]
    fn shifts_and_rotates() {
        let out = shl(0x81, 1, OpSize::Byte);
        assert_eq!(out.value, 0x02);
        assert!(out.flags.carry);

        let out = shr(0x01, 1, OpSize::Byte);
        assert_eq!(out.value, 0);
        assert!(out.flags.carry && out.flags.zero);

        let out = sar(0x80, 2, OpSize::Byte);
        assert_eq!(out.value, 0xE0);
        assert!(!out.flags.carry);

        assert!(sal(0x40, 1, OpSize::Byte).flags.overflow);
        assert!(!sal(0xC0, 1, OpSize::Byte).flags.overflow);

        let out = rol(0x80, 1, OpSize::Byte);
        assert_eq!(out.value, 0x01);
        assert!(out.flags.carry);

        let out = ror(0x01, 1, OpSize::Word);
        assert_eq!(out.value, 0x8000);
        assert!(out.flags.carry);

        let out = rolc(0x80, true, OpSize::Byte);
        assert_eq!(out.value, 0x01);
        assert!(out.flags.carry);

        let out = rorc(0x01, false, OpSize::Byte);
        assert_eq!(out.value, 0x00);
        assert!(out.flags.carry);
    }

    #[test]
    fn merge_preserves_unselected_bits() {
        let layout = StatusLayout {
            carry: Some(0),
            zero: Some(1),
            sign: None,
            overflow: Some(7),
            half: None,
        };
        let flags = Flags {
            carry: true,
            zero: true,
            sign: true,
            overflow: true,
            half: true,
        };
        assert_eq!(layout.merge(0xF0F0, FlagMask::CARRY, flags), 0xF0F1);
        assert_eq!(layout.merge(0x0000, FlagMask::ALL, flags), 0x0083);
        assert_eq!(layout.merge(0xFFFF, FlagMask::NONE, Flags::default()), 0xFFFF);
    }
}
