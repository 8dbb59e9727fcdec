//! Wrapping register newtypes for the 8051 op DSL.
//!
//! Every operand in an op body is one of these (or a plain integer), and
//! mixing them in arithmetic always wraps at the width of the left-hand side.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{
    Add, AddAssign, BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not, Shl, Shr,
    Sub, SubAssign,
};

use bytemuck::TransparentWrapper;

/// Anything that can be viewed as a 16-bit register value.
pub trait U16Equivalent: Copy + Clone {
    fn to_u16(self) -> u16;
    fn from_u16(value: u16) -> Self;
    fn to_u8(self) -> Reg8 {
        Reg8(self.to_u16() as u8)
    }
    /// Sign-extend the low byte, for relative branch offsets.
    fn sext(self) -> RegI16 {
        RegI16(self.to_u16() as i8 as i16)
    }
}

#[derive(Copy, Clone, Debug, Default, TransparentWrapper)]
#[repr(transparent)]
pub struct Reg8(pub u8);

impl Reg8 {
    pub fn bit(self, n: u8) -> bool {
        self.0 & (1 << n) != 0
    }

    /// Odd parity of the value, as the 8051 PSW.P bit reports it.
    pub fn parity(self) -> bool {
        self.0.count_ones() & 1 != 0
    }
}

#[derive(Copy, Clone, Debug, Default, TransparentWrapper)]
#[repr(transparent)]
pub struct Reg16(pub u16);

impl Reg16 {
    pub fn low(self) -> Reg8 {
        Reg8(self.0 as u8)
    }

    pub fn high(self) -> Reg8 {
        Reg8((self.0 >> 8) as u8)
    }
}

#[derive(Copy, Clone, Debug, Default, TransparentWrapper)]
#[repr(transparent)]
pub struct RegI16(pub i16);

macro_rules! u16_equivalent {
    ($($type:ty => |$v:ident| $to:expr, |$w:ident| $from:expr;)*) => {
        $(
            impl U16Equivalent for $type {
                #[inline(always)]
                fn to_u16(self) -> u16 {
                    let $v = self;
                    $to
                }
                #[inline(always)]
                fn from_u16(value: u16) -> Self {
                    let $w = value;
                    $from
                }
            }
        )*
    };
}

u16_equivalent! {
    Reg8 => |v| v.0 as u16, |w| Reg8(w as u8);
    Reg16 => |v| v.0, |w| Reg16(w);
    RegI16 => |v| v.0 as u16, |w| RegI16(w as i16);
    u8 => |v| v as u16, |w| w as u8;
    u16 => |v| v, |w| w;
    i32 => |v| v as u16, |w| w as i32;
    bool => |v| v as u16, |w| w != 0;
}

impl From<u8> for Reg8 {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl PartialOrd for Reg8 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reg8 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// One wrapping binary operator and its compound-assignment form.
macro_rules! wrapping_op {
    ($type:ident, $trait:ident :: $method:ident, $assign:ident :: $assign_method:ident, |$a:ident, $b:ident| $body:expr) => {
        impl<T: U16Equivalent> $trait<T> for $type {
            type Output = $type;
            #[inline(always)]
            fn $method(self, other: T) -> Self::Output {
                let ($a, $b) = (self.to_u16(), other.to_u16());
                $type::from_u16($body)
            }
        }
        impl<T: U16Equivalent> $assign<T> for $type {
            #[inline(always)]
            fn $assign_method(&mut self, other: T) {
                *self = $trait::$method(*self, other);
            }
        }
    };
}

macro_rules! register_ops {
    ($($type:ident),*) => {
        $(
            wrapping_op!($type, Add::add, AddAssign::add_assign, |a, b| a.wrapping_add(b));
            wrapping_op!($type, Sub::sub, SubAssign::sub_assign, |a, b| a.wrapping_sub(b));
            wrapping_op!($type, BitAnd::bitand, BitAndAssign::bitand_assign, |a, b| a & b);
            wrapping_op!($type, BitOr::bitor, BitOrAssign::bitor_assign, |a, b| a | b);
            wrapping_op!($type, BitXor::bitxor, BitXorAssign::bitxor_assign, |a, b| a ^ b);

            // Shifting left widens so that `hi << 8 | lo` builds a 16-bit value.
            impl<T: U16Equivalent> Shl<T> for $type {
                type Output = Reg16;
                fn shl(self, other: T) -> Self::Output {
                    Reg16(self.to_u16() << other.to_u16())
                }
            }
            impl<T: U16Equivalent> Shr<T> for $type {
                type Output = $type;
                fn shr(self, other: T) -> Self::Output {
                    $type::from_u16(self.to_u16() >> other.to_u16())
                }
            }
            impl Not for $type {
                type Output = $type;
                fn not(self) -> Self::Output {
                    $type::from_u16(!self.to_u16())
                }
            }
            impl<T: U16Equivalent> PartialEq<T> for $type {
                fn eq(&self, other: &T) -> bool {
                    self.to_u16() == $type::from_u16(other.to_u16()).to_u16()
                }
            }
            impl Eq for $type {}
            impl fmt::Display for $type {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
            impl fmt::UpperHex for $type {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )*
    };
}

register_ops!(Reg8, Reg16, RegI16);
