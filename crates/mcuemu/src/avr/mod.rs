//! AVR core (ATmega328P class).
//!
//! The program counter is a word address into flash, and every address this
//! core reports (`pc()`, vectors, faults, breakpoints) is a word address too.
//! The data space maps the register file at 0x00-0x1F and SPL/SPH/SREG at
//! 0x5D-0x5F onto the core. Everything else goes to the data bus.

mod decode;
mod exec;

use tracing::{debug, trace};

use crate::alu::{FlagMask, Flags, StatusLayout};
use crate::bus::{Bus, Width};
use crate::dispatch::{CpuCore, CycleAccount, Disassembly, Register, Step};
use crate::error::{Fault, Result};
use crate::intc::{Edge, InterruptController, SourceId, Trigger};

pub use decode::{AluOp, ImmOp, Instruction, MulKind, Pointer, PointerMode, UnaryOp, decode};

/// SREG bits.
pub const SREG_C: u8 = 0;
pub const SREG_Z: u8 = 1;
pub const SREG_N: u8 = 2;
pub const SREG_V: u8 = 3;
pub const SREG_S: u8 = 4;
pub const SREG_H: u8 = 5;
pub const SREG_T: u8 = 6;
pub const SREG_I: u8 = 7;

const SREG_LAYOUT: StatusLayout = StatusLayout {
    carry: Some(SREG_C),
    zero: Some(SREG_Z),
    sign: Some(SREG_N),
    overflow: Some(SREG_V),
    half: Some(SREG_H),
};

/// Data-space addresses of the core registers.
pub const DATA_SPL: u16 = 0x5D;
pub const DATA_SPH: u16 = 0x5E;
pub const DATA_SREG: u16 = 0x5F;

/// Offset from I/O space (`IN`/`OUT`) to data space.
pub const IO_OFFSET: u16 = 0x20;

/// Interrupt vectors after RESET, in priority order.
pub const ATMEGA328P_VECTORS: [&str; 25] = [
    "INT0",
    "INT1",
    "PCINT0",
    "PCINT1",
    "PCINT2",
    "WDT",
    "TIMER2_COMPA",
    "TIMER2_COMPB",
    "TIMER2_OVF",
    "TIMER1_CAPT",
    "TIMER1_COMPA",
    "TIMER1_COMPB",
    "TIMER1_OVF",
    "TIMER0_COMPA",
    "TIMER0_COMPB",
    "TIMER0_OVF",
    "SPI_STC",
    "USART_RX",
    "USART_UDRE",
    "USART_TX",
    "ADC",
    "EE_READY",
    "ANALOG_COMP",
    "TWI",
    "SPM_READY",
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Highest SRAM address; SP starts here.
    pub ram_end: u16,
    /// Words per vector slot: 2 on parts with `JMP`, 1 on parts without.
    pub vector_size: u16,
    /// Vector names for vector numbers 1.. (0 is RESET).
    pub vectors: Vec<&'static str>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ram_end: 0x08FF,
            vector_size: 2,
            vectors: ATMEGA328P_VECTORS.to_vec(),
        }
    }
}

/// The memories an AVR core runs against: flash (byte addressed, read as
/// little-endian words) and the data space.
pub trait AvrContext {
    type Flash: Bus;
    type Data: Bus;

    fn parts(&mut self) -> (&mut Self::Flash, &mut Self::Data);

    fn flash_mut(&mut self) -> &mut Self::Flash {
        self.parts().0
    }
}

impl<F: Bus, D: Bus> AvrContext for (F, D) {
    type Flash = F;
    type Data = D;

    fn parts(&mut self) -> (&mut F, &mut D) {
        (&mut self.0, &mut self.1)
    }
}

#[derive(Debug)]
pub struct Cpu {
    /// Word address.
    pub pc: u16,
    regs: [u8; 32],
    sp: u16,
    sreg: u8,
    sleeping: bool,
    /// Set by SEI and RETI: one more instruction runs before an interrupt.
    hold_off: bool,
    config: Config,
    intc: InterruptController,
    cycles: CycleAccount,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Cpu {
    pub fn new(config: Config) -> Self {
        let mut intc = InterruptController::new();
        for (n, name) in config.vectors.iter().enumerate() {
            let trigger = match *name {
                "INT0" | "INT1" => Trigger::Selectable(Edge::Falling),
                _ => Trigger::Internal,
            };
            let vector = (n as u32 + 1) * config.vector_size as u32;
            intc.add_source(name, vector, trigger);
        }
        Self {
            pc: 0,
            regs: [0; 32],
            sp: config.ram_end,
            sreg: 0,
            sleeping: false,
            hold_off: false,
            config,
            intc,
            cycles: CycleAccount::default(),
        }
    }

    pub fn interrupts(&self) -> &InterruptController {
        &self.intc
    }

    pub fn interrupts_mut(&mut self) -> &mut InterruptController {
        &mut self.intc
    }

    pub fn raise(&mut self, source: SourceId) {
        self.intc.raise(source);
    }

    pub fn source(&self, name: &str) -> Option<SourceId> {
        self.intc.find(name)
    }

    /// Enable or disable one interrupt source. The enable bits live in the
    /// peripherals, which report them here; every enabled source has the
    /// same level and vector order decides.
    pub fn enable(&mut self, source: SourceId, enabled: bool) {
        self.intc.set_level(source, enabled as u8);
    }

    pub fn reg(&self, n: u8) -> u8 {
        self.regs[(n & 0x1F) as usize]
    }

    pub fn reg_set(&mut self, n: u8, value: u8) {
        self.regs[(n & 0x1F) as usize] = value;
    }

    /// Register pair `n+1:n`.
    pub fn pair(&self, n: u8) -> u16 {
        u16::from_le_bytes([self.reg(n), self.reg(n + 1)])
    }

    pub fn pair_set(&mut self, n: u8, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.reg_set(n, lo);
        self.reg_set(n + 1, hi);
    }

    pub fn sp(&self) -> u16 {
        self.sp
    }

    pub fn sreg(&self) -> u8 {
        self.sreg
    }

    pub fn sreg_set(&mut self, value: u8) {
        self.sreg = value;
    }

    pub fn flag(&self, bit: u8) -> bool {
        self.sreg & (1 << bit) != 0
    }

    pub fn flag_set(&mut self, bit: u8, value: bool) {
        if value {
            self.sreg |= 1 << bit;
        } else {
            self.sreg &= !(1 << bit);
        }
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    /// Fold ALU flags into SREG. S is recomputed as N ^ V whenever either
    /// of them is written.
    fn apply_flags(&mut self, mask: FlagMask, flags: Flags) {
        self.sreg = SREG_LAYOUT.merge(self.sreg as u16, mask, flags) as u8;
        if mask.contains(FlagMask::SIGN) || mask.contains(FlagMask::OVERFLOW) {
            let s = self.flag(SREG_N) ^ self.flag(SREG_V);
            self.flag_set(SREG_S, s);
        }
    }

    /// Read the data space.
    fn load(&mut self, data: &mut impl Bus, addr: u16) -> Result<u8> {
        Ok(match addr {
            0x00..=0x1F => self.regs[addr as usize],
            DATA_SPL => self.sp as u8,
            DATA_SPH => (self.sp >> 8) as u8,
            DATA_SREG => self.sreg,
            _ => data.read8(addr as u32)?,
        })
    }

    /// Write the data space.
    fn store(&mut self, data: &mut impl Bus, addr: u16, value: u8) -> Result<()> {
        match addr {
            0x00..=0x1F => self.regs[addr as usize] = value,
            DATA_SPL => self.sp = (self.sp & 0xFF00) | value as u16,
            DATA_SPH => self.sp = (self.sp & 0x00FF) | (value as u16) << 8,
            DATA_SREG => self.sreg = value,
            _ => data.write8(addr as u32, value)?,
        }
        Ok(())
    }

    fn push(&mut self, data: &mut impl Bus, value: u8) -> Result<()> {
        self.store(data, self.sp, value)?;
        self.sp = self.sp.wrapping_sub(1);
        Ok(())
    }

    fn pop(&mut self, data: &mut impl Bus) -> Result<u8> {
        self.sp = self.sp.wrapping_add(1);
        self.load(data, self.sp)
    }

    /// Push a return address: low byte first, so the high byte ends up at
    /// the lower address.
    fn push_pc(&mut self, data: &mut impl Bus, pc: u16) -> Result<()> {
        self.push(data, pc as u8)?;
        self.push(data, (pc >> 8) as u8)
    }

    fn pop_pc(&mut self, data: &mut impl Bus) -> Result<u16> {
        let hi = self.pop(data)?;
        let lo = self.pop(data)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn fetch(flash: &mut impl Bus, pc: u16) -> Result<u16> {
        Ok(flash.read(Width::Word, pc as u32 * 2)? as u16)
    }

    /// Fetch and decode the instruction at `pc`.
    fn fetch_decode(flash: &mut impl Bus, pc: u16) -> Result<Instruction> {
        let word = Self::fetch(flash, pc)?;
        let next = if decode::is_two_words(word) {
            Self::fetch(flash, pc.wrapping_add(1))?
        } else {
            0
        };
        decode(word, next).ok_or(Fault::UndefinedOpcode {
            pc: pc as u32,
            opcode: word,
        })
    }

    fn poll_interrupts(&mut self, data: &mut impl Bus) -> Result<Option<(SourceId, u32)>> {
        if std::mem::take(&mut self.hold_off) || !self.flag(SREG_I) {
            return Ok(None);
        }
        let Some((id, _)) = self.intc.current() else {
            return Ok(None);
        };
        let vector = self.intc.sources()[id].vector();
        self.push_pc(data, self.pc)?;
        self.flag_set(SREG_I, false);
        self.sleeping = false;
        self.pc = vector as u16;
        self.intc.acknowledge(id);
        self.cycles.advance(4);
        debug!(source = self.intc.sources()[id].name(), vector, "interrupt");
        Ok(Some((id, vector)))
    }
}

impl<X: AvrContext> CpuCore<X> for Cpu {
    fn step(&mut self, ctx: &mut X) -> Result<Step> {
        let (flash, data) = ctx.parts();

        if self.sleeping {
            // Only an interrupt that can be taken wakes the core.
            if self.intc.current().is_none() || !self.flag(SREG_I) {
                return Ok(Step::Idle);
            }
            self.sleeping = false;
            debug!(pc = self.pc, "wake from sleep");
            if let Some((source, vector)) = self.poll_interrupts(data)? {
                return Ok(Step::Interrupted { source, vector });
            }
        }

        let pc = self.pc;
        let insn = Self::fetch_decode(flash, pc)?;
        trace!("{pc:05X}: {insn}");
        let cycles = self.execute(insn, flash, data)?;
        self.cycles.advance(cycles);

        if let Some((source, vector)) = self.poll_interrupts(data)? {
            return Ok(Step::Interrupted { source, vector });
        }
        let jump = matches!(insn, Instruction::Rjmp { .. } | Instruction::Jmp { .. });
        if jump && self.pc == pc {
            return Ok(Step::SelfLoop);
        }
        Ok(Step::Executed)
    }

    fn reset(&mut self, _ctx: &mut X) -> Result<()> {
        self.pc = 0;
        self.regs = [0; 32];
        self.sp = self.config.ram_end;
        self.sreg = 0;
        self.sleeping = false;
        self.hold_off = false;
        Ok(())
    }

    fn pc(&self) -> u32 {
        self.pc as u32
    }

    fn cycles(&self) -> u64 {
        self.cycles.elapsed()
    }

    fn interrupts(&self) -> &InterruptController {
        &self.intc
    }

    fn interrupts_mut(&mut self) -> &mut InterruptController {
        &mut self.intc
    }

    fn disassemble(&self, ctx: &mut X, pc: u32) -> Result<Disassembly> {
        let flash = ctx.flash_mut();
        let word = Self::fetch(flash, pc as u16)?;
        let mut bytes = word.to_le_bytes().to_vec();
        let text = match Self::fetch_decode(flash, pc as u16) {
            Ok(insn) => {
                if insn.words() == 2 {
                    let next = Self::fetch(flash, pc as u16 + 1)?;
                    bytes.extend(next.to_le_bytes());
                }
                insn.to_string()
            }
            Err(Fault::UndefinedOpcode { .. }) => format!(".word 0x{word:04X}"),
            Err(fault) => return Err(fault),
        };
        Ok(Disassembly { pc, bytes, text })
    }

    fn registers(&self) -> Vec<Register> {
        let mut regs = vec![
            Register::new("PC", self.pc as u32, 4),
            Register::new("SP", self.sp as u32, 4),
            Register::new("SREG", self.sreg as u32, 2),
            Register::new("X", self.pair(26) as u32, 4),
            Register::new("Y", self.pair(28) as u32, 4),
            Register::new("Z", self.pair(30) as u32, 4),
        ];
        const NAMES: [&str; 32] = [
            "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12",
            "R13", "R14", "R15", "R16", "R17", "R18", "R19", "R20", "R21", "R22", "R23", "R24",
            "R25", "R26", "R27", "R28", "R29", "R30", "R31",
        ];
        for (n, name) in NAMES.into_iter().enumerate() {
            regs.push(Register::new(name, self.regs[n] as u32, 2));
        }
        regs
    }

    fn set_register(&mut self, name: &str, value: u32) -> bool {
        match name {
            "PC" => self.pc = value as u16,
            "SP" => self.sp = value as u16,
            "SREG" => self.sreg = value as u8,
            "X" => self.pair_set(26, value as u16),
            "Y" => self.pair_set(28, value as u16),
            "Z" => self.pair_set(30, value as u16),
            reg => match reg.strip_prefix('R').and_then(|n| n.parse::<u8>().ok()) {
                Some(n @ 0..32) => self.regs[n as usize] = value as u8,
                _ => return false,
            },
        }
        true
    }
}

#[cfg(test)]
mod tests;
