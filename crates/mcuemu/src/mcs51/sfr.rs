//! Special-function register addresses and bit positions.

use std::fmt;

pub const SFR_BASE: u8 = 0x80;

pub const SFR_P0: u8 = 0x80;
pub const SFR_SP: u8 = 0x81;
pub const SFR_DPL: u8 = 0x82;
pub const SFR_DPH: u8 = 0x83;
pub const SFR_PCON: u8 = 0x87;
pub const SFR_TCON: u8 = 0x88;
pub const SFR_TMOD: u8 = 0x89;
pub const SFR_TL0: u8 = 0x8A;
pub const SFR_TL1: u8 = 0x8B;
pub const SFR_TH0: u8 = 0x8C;
pub const SFR_TH1: u8 = 0x8D;
pub const SFR_P1: u8 = 0x90;
pub const SFR_SCON: u8 = 0x98;
pub const SFR_SBUF: u8 = 0x99;
pub const SFR_P2: u8 = 0xA0;
pub const SFR_IE: u8 = 0xA8;
pub const SFR_P3: u8 = 0xB0;
pub const SFR_IP: u8 = 0xB8;
pub const SFR_T2CON: u8 = 0xC8;
pub const SFR_RCAP2L: u8 = 0xCA;
pub const SFR_RCAP2H: u8 = 0xCB;
pub const SFR_TL2: u8 = 0xCC;
pub const SFR_TH2: u8 = 0xCD;
pub const SFR_PSW: u8 = 0xD0;
pub const SFR_A: u8 = 0xE0;
pub const SFR_B: u8 = 0xF0;

/// PSW bits.
pub const PSW_C: u8 = 7;
pub const PSW_AC: u8 = 6;
pub const PSW_F0: u8 = 5;
pub const PSW_RS1: u8 = 4;
pub const PSW_RS0: u8 = 3;
pub const PSW_OV: u8 = 2;
/// Parity of A. Computed, never stored.
pub const PSW_P: u8 = 0;

/// IE bits. Bits 0-5 enable one source each, in polling order.
pub const IE_EA: u8 = 7;

/// Vector addresses in polling order: INT0, timer 0, INT1, timer 1,
/// serial, timer 2.
pub const VECTORS: [(&str, u16); 6] = [
    ("IE0", 0x0003),
    ("TF0", 0x000B),
    ("IE1", 0x0013),
    ("TF1", 0x001B),
    ("RI+TI", 0x0023),
    ("TF2", 0x002B),
];

pub fn is_port(addr: u8) -> bool {
    matches!(addr, SFR_P0 | SFR_P1 | SFR_P2 | SFR_P3)
}

pub fn sfr_name(addr: u8) -> Option<&'static str> {
    Some(match addr {
        SFR_P0 => "P0",
        SFR_SP => "SP",
        SFR_DPL => "DPL",
        SFR_DPH => "DPH",
        SFR_PCON => "PCON",
        SFR_TCON => "TCON",
        SFR_TMOD => "TMOD",
        SFR_TL0 => "TL0",
        SFR_TL1 => "TL1",
        SFR_TH0 => "TH0",
        SFR_TH1 => "TH1",
        SFR_P1 => "P1",
        SFR_SCON => "SCON",
        SFR_SBUF => "SBUF",
        SFR_P2 => "P2",
        SFR_IE => "IE",
        SFR_P3 => "P3",
        SFR_IP => "IP",
        SFR_T2CON => "T2CON",
        SFR_RCAP2L => "RCAP2L",
        SFR_RCAP2H => "RCAP2H",
        SFR_TL2 => "TL2",
        SFR_TH2 => "TH2",
        SFR_PSW => "PSW",
        SFR_A => "ACC",
        SFR_B => "B",
        _ => return None,
    })
}

/// A direct address operand: lower RAM below 0x80, SFRs above.
pub struct Direct(pub u8);

impl From<u8> for Direct {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Direct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            addr @ 0x00..0x80 => write!(f, "{addr:02X}h"),
            addr => match sfr_name(addr) {
                Some(name) => f.write_str(name),
                None => write!(f, "{addr:02X}h"),
            },
        }
    }
}

/// A bit address operand: 0x00-0x7F map onto RAM 0x20-0x2F, the rest onto
/// SFRs whose address is a multiple of eight.
pub struct Bit(pub u8);

impl From<u8> for Bit {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl Bit {
    /// The byte holding this bit and the bit position inside it.
    pub fn location(&self) -> (u8, u8) {
        let pos = self.0 & 0x07;
        if self.0 < 0x80 {
            (0x20 + (self.0 >> 3), pos)
        } else {
            (self.0 & 0xF8, pos)
        }
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (byte, pos) = self.location();
        write!(f, "{}.{}", Direct(byte), pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operands_render_with_sfr_names() {
        assert_eq!(Direct(0x30).to_string(), "30h");
        assert_eq!(Direct(SFR_P1).to_string(), "P1");
        assert_eq!(Direct(0xFF).to_string(), "FFh");
        assert_eq!(Bit(0x00).to_string(), "20h.0");
        assert_eq!(Bit(0x7F).to_string(), "2Fh.7");
        assert_eq!(Bit(0xD7).to_string(), "PSW.7");
    }
}
