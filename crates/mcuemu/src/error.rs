//! Faults raised while stepping a core.

use std::fmt;

use thiserror::Error;

/// Direction of a failed bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// A fault reported by the bus layer. The core never recovers from these
/// locally; they propagate to whoever drives the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bus fault: {access} of {width} byte(s) at {addr:#07X}")]
pub struct BusFault {
    pub addr: u32,
    pub width: u8,
    pub access: Access,
}

impl BusFault {
    pub fn read(addr: u32, width: u8) -> Self {
        Self {
            addr,
            width,
            access: Access::Read,
        }
    }

    pub fn write(addr: u32, width: u8) -> Self {
        Self {
            addr,
            width,
            access: Access::Write,
        }
    }
}

/// Everything that can stop an instruction from completing.
///
/// Side effects committed before the fault was detected are *not* rolled
/// back, which is how the emulated parts behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("illegal addressing mode {selector:#X} in opcode {opcode:#06X} at pc {pc:#07X}")]
    IllegalAddressingMode { pc: u32, opcode: u16, selector: u8 },
    #[error("undefined opcode {opcode:#06X} at pc {pc:#07X}")]
    UndefinedOpcode { pc: u32, opcode: u16 },
    #[error(transparent)]
    Bus(#[from] BusFault),
}

pub type Result<T, E = Fault> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_opcode_and_pc() {
        let fault = Fault::UndefinedOpcode {
            pc: 0x1234,
            opcode: 0xA5,
        };
        assert_eq!(fault.to_string(), "undefined opcode 0x00A5 at pc 0x01234");

        let fault: Fault = BusFault::write(0xFFFFF, 2).into();
        assert_eq!(
            fault.to_string(),
            "bus fault: write of 2 byte(s) at 0xFFFFF"
        );
    }
}
