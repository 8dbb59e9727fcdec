use crate::bus::Bus;

use super::sfr::{SFR_BASE, SFR_P0, is_port};

/// A trait to provide SFR read/write operations for the registers the core
/// does not own (ports, timers, serial).
pub trait PortMapper {
    /// Read an SFR. For a port this is the level on the pins.
    fn read_live(&mut self, addr: u8) -> u8;

    /// Read the output latch of an SFR. Read-modify-write instructions use
    /// this so that a pin held low externally is not written back as zero.
    fn read_latched(&mut self, addr: u8) -> u8 {
        self.read_live(addr)
    }

    fn write(&mut self, addr: u8, value: u8);
}

impl PortMapper for () {
    fn read_live(&mut self, _addr: u8) -> u8 {
        0
    }
    fn write(&mut self, _addr: u8, _value: u8) {}
}

impl<P: PortMapper + ?Sized> PortMapper for &mut P {
    fn read_live(&mut self, addr: u8) -> u8 {
        (**self).read_live(addr)
    }
    fn read_latched(&mut self, addr: u8) -> u8 {
        (**self).read_latched(addr)
    }
    fn write(&mut self, addr: u8, value: u8) {
        (**self).write(addr, value)
    }
}

/// Plain storage for every peripheral SFR, with quasi-bidirectional ports:
/// a pin reads high only if its latch is high and nothing outside pulls it
/// low.
pub struct SfrBank {
    sfr: [u8; 128],
    pins: [u8; 4],
}

impl Default for SfrBank {
    fn default() -> Self {
        let mut sfr = [0; 128];
        for port in 0..4 {
            sfr[port * 0x10] = 0xFF;
        }
        Self {
            sfr,
            pins: [0xFF; 4],
        }
    }
}

impl SfrBank {
    /// Drive the external side of port `port` (0-3). Zero bits pull low.
    pub fn set_pins(&mut self, port: u8, value: u8) {
        self.pins[(port & 3) as usize] = value;
    }

    fn index(addr: u8) -> usize {
        addr.wrapping_sub(SFR_BASE) as usize & 0x7F
    }
}

impl PortMapper for SfrBank {
    fn read_live(&mut self, addr: u8) -> u8 {
        let latch = self.sfr[Self::index(addr)];
        if is_port(addr) {
            latch & self.pins[((addr - SFR_P0) >> 4) as usize]
        } else {
            latch
        }
    }
    fn read_latched(&mut self, addr: u8) -> u8 {
        self.sfr[Self::index(addr)]
    }
    fn write(&mut self, addr: u8, value: u8) {
        self.sfr[Self::index(addr)] = value;
    }
}

/// The memories an 8051 core runs against. This can be implemented by hand,
/// but is most conveniently a `(ports, xdata, code)` tuple.
pub trait Mcs51Context {
    type Ports: PortMapper;
    type Xdata: Bus;
    type Code: Bus;

    fn parts(&mut self) -> (&mut Self::Ports, &mut Self::Xdata, &mut Self::Code);

    fn code_mut(&mut self) -> &mut Self::Code {
        self.parts().2
    }
}

impl<P: PortMapper, X: Bus, C: Bus> Mcs51Context for (P, X, C) {
    type Ports = P;
    type Xdata = X;
    type Code = C;

    fn parts(&mut self) -> (&mut P, &mut X, &mut C) {
        (&mut self.0, &mut self.1, &mut self.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcs51::sfr::{SFR_P1, SFR_TMOD};

    #[test]
    fn pins_pull_live_reads_low() {
        let mut sfr = SfrBank::default();
        assert_eq!(sfr.read_live(SFR_P1), 0xFF);
        sfr.set_pins(1, 0xF0);
        assert_eq!(sfr.read_live(SFR_P1), 0xF0);
        assert_eq!(sfr.read_latched(SFR_P1), 0xFF);

        sfr.write(SFR_TMOD, 0x21);
        assert_eq!(sfr.read_live(SFR_TMOD), 0x21);
    }
}
