//! M16C/60 core.
//!
//! A single flat 20-bit bus carries code, data and the vector tables. The
//! fixed vectors (UND, overflow, BRK, reset) sit at the top of the address
//! space; peripheral and software interrupts go through the variable table
//! at INTB, four bytes per interrupt number.
//!
//! Undefined opcodes and operands an instruction cannot use do not halt the
//! core. They trap to the UND vector with the faulting PC on the stack, the
//! way the silicon does.

mod addressing;
mod decode;
mod exec;
pub mod regs;

use tracing::{debug, trace, warn};

use crate::bus::{Bus, Width};
use crate::dispatch::{CpuCore, CycleAccount, Disassembly, Register, Step};
use crate::error::{Fault, Result};
use crate::intc::{Edge, InterruptController, SourceId, Trigger};

pub use addressing::{Base, BitLocation, BitMode, Location, Mode, Stream};
pub use decode::{
    BinOp, BitOp, Cond, Count, DivKind, Instruction, JumpSize, ShiftOp, StringOp, UnOp, decode,
};
pub use regs::{ADDR_MASK, Control, Registers};

use regs::{FLG_D, FLG_I, FLG_U};

pub const VECTOR_UND: u32 = 0xF_FFDC;
pub const VECTOR_OVERFLOW: u32 = 0xF_FFE0;
pub const VECTOR_BRK: u32 = 0xF_FFE4;
pub const VECTOR_RESET: u32 = 0xF_FFFC;

/// Peripheral interrupts of the M16C/62 group with their interrupt numbers
/// in the INTB table.
pub const M16C62_SOURCES: [(&str, u32); 21] = [
    ("DMA0", 11),
    ("DMA1", 12),
    ("KEY", 13),
    ("AD", 14),
    ("UART2_TX", 15),
    ("UART2_RX", 16),
    ("UART0_TX", 17),
    ("UART0_RX", 18),
    ("UART1_TX", 19),
    ("UART1_RX", 20),
    ("TIMER_A0", 21),
    ("TIMER_A1", 22),
    ("TIMER_A2", 23),
    ("TIMER_A3", 24),
    ("TIMER_A4", 25),
    ("TIMER_B0", 26),
    ("TIMER_B1", 27),
    ("TIMER_B2", 28),
    ("INT0", 29),
    ("INT1", 30),
    ("INT2", 31),
];

const INTERRUPT_CYCLES: u32 = 18;
const UND_CYCLES: u32 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    /// Peripheral interrupt sources as (name, interrupt number).
    pub sources: Vec<(&'static str, u32)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: M16C62_SOURCES.to_vec(),
        }
    }
}

#[derive(Debug)]
pub struct Cpu {
    regs: Registers,
    intc: InterruptController,
    cycles: CycleAccount,
    /// Wait states charged by bus accesses of the current step.
    wait: u32,
    /// First opcode bytes of the current instruction, for diagnostics.
    opcode: u16,
    waiting: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Cpu {
    pub fn new(config: Config) -> Self {
        let mut intc = InterruptController::new();
        for &(name, number) in &config.sources {
            let trigger = match name {
                "INT0" | "INT1" | "INT2" => Trigger::Selectable(Edge::Falling),
                _ => Trigger::Internal,
            };
            intc.add_source(name, number, trigger);
        }
        Self {
            regs: Registers::default(),
            intc,
            cycles: CycleAccount::default(),
            wait: 0,
            opcode: 0,
            waiting: false,
        }
    }

    pub fn regs(&self) -> &Registers {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut Registers {
        &mut self.regs
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

    /// Program a source's interrupt control register level (ILVL, 0-7).
    /// Level zero disables the source.
    pub fn set_priority(&mut self, source: SourceId, ilvl: u8) {
        self.intc.set_level(source, ilvl & 7);
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    fn push(&mut self, bus: &mut impl Bus, width: Width, value: u32) -> Result<()> {
        let sp = self.regs.sp().wrapping_sub(width.bytes() as u16);
        self.regs.set_sp(sp);
        self.store(bus, sp as u32, width, value)
    }

    fn pop(&mut self, bus: &mut impl Bus, width: Width) -> Result<u32> {
        let sp = self.regs.sp();
        let value = self.load(bus, sp as u32, width)?;
        self.regs.set_sp(sp.wrapping_add(width.bytes() as u16));
        Ok(value)
    }

    /// The four-byte interrupt frame: PC bits 0-15, FLG bits 0-7, then FLG
    /// bits 12-15 over PC bits 16-19.
    fn push_context(&mut self, bus: &mut impl Bus, flg: u16, pc: u32) -> Result<()> {
        let high = ((flg >> 8) as u32 & 0xF0) | (pc >> 16 & 0xF);
        let frame = (pc & 0xFFFF) | (flg as u32 & 0xFF) << 16 | high << 24;
        let sp = self.regs.sp().wrapping_sub(4);
        self.regs.set_sp(sp);
        self.store(bus, sp as u32, Width::Word, frame)?;
        self.store(bus, sp.wrapping_add(2) as u32, Width::Word, frame >> 16)
    }

    fn pop_context(&mut self, bus: &mut impl Bus) -> Result<()> {
        let sp = self.regs.sp();
        let low = self.load(bus, sp as u32, Width::Word)?;
        let high = self.load(bus, sp.wrapping_add(2) as u32, Width::Word)?;
        self.regs.set_sp(sp.wrapping_add(4));
        self.regs.pc = (high >> 8 & 0xF) << 16 | low;
        self.regs.set_flg(((high >> 8 & 0xF0) << 8 | (high & 0xFF)) as u16);
        Ok(())
    }

    /// Save FLG and `ret`, then clear I and D (and U, which moves the push
    /// onto the interrupt stack).
    fn enter(&mut self, bus: &mut impl Bus, ret: u32, clear_u: bool) -> Result<()> {
        let flg = self.regs.flg();
        self.regs.flag_set(FLG_I, false);
        self.regs.flag_set(FLG_D, false);
        if clear_u {
            self.regs.flag_set(FLG_U, false);
        }
        self.push_context(bus, flg, ret)
    }

    fn vector(&mut self, bus: &mut impl Bus, addr: u32) -> Result<u32> {
        Ok(self.load(bus, addr & ADDR_MASK, Width::Triple)? & ADDR_MASK)
    }

    /// Take a fixed-vector trap returning to `ret`.
    fn trap(&mut self, bus: &mut impl Bus, vector: u32, ret: u32) -> Result<()> {
        self.enter(bus, ret, true)?;
        self.regs.pc = self.vector(bus, vector)?;
        debug!(vector = format_args!("{vector:05X}"), ret, "trap");
        Ok(())
    }

    /// INT #n. Numbers 32-63 keep the current stack.
    fn software_interrupt(&mut self, bus: &mut impl Bus, n: u8, ret: u32) -> Result<()> {
        self.enter(bus, ret, n < 32)?;
        let entry = self.regs.intb.wrapping_add(4 * n as u32);
        self.regs.pc = self.vector(bus, entry)?;
        debug!(n, pc = self.regs.pc, "software interrupt");
        Ok(())
    }

    fn acceptable(&self) -> Option<(SourceId, u8)> {
        if !self.regs.flag(FLG_I) {
            return None;
        }
        self.intc
            .current()
            .filter(|&(_, level)| level > self.regs.ipl())
    }

    fn poll_interrupts(&mut self, bus: &mut impl Bus) -> Result<Option<(SourceId, u32)>> {
        let Some((id, level)) = self.acceptable() else {
            return Ok(None);
        };
        let number = self.intc.sources()[id].vector();
        let pc = self.regs.pc;
        self.enter(bus, pc, true)?;
        self.regs.set_ipl(level);
        let entry = self.regs.intb.wrapping_add(4 * number);
        let handler = self.vector(bus, entry)?;
        self.regs.pc = handler;
        self.waiting = false;
        self.intc.acknowledge(id);
        self.cycles
            .advance(INTERRUPT_CYCLES + std::mem::take(&mut self.wait));
        debug!(
            source = self.intc.sources()[id].name(),
            level, handler, "interrupt"
        );
        Ok(Some((id, handler)))
    }

    /// Decode the instruction at `pc`, returning it with its length.
    fn fetch_decode(bus: &mut impl Bus, pc: u32) -> Result<(Instruction, u32)> {
        let mut stream = Stream::new(bus, pc);
        let insn = decode(&mut stream)?;
        Ok((insn, stream.consumed()))
    }

    fn opcode_at(bus: &mut impl Bus, pc: u32, len: u32) -> Result<u16> {
        let b0 = bus.read8(pc)? as u16;
        if len < 2 {
            return Ok(b0);
        }
        Ok(b0 << 8 | bus.read8(pc.wrapping_add(1) & ADDR_MASK)? as u16)
    }

    fn undefined(&mut self, bus: &mut impl Bus, fault: Fault, pc: u32) -> Result<()> {
        warn!(%fault, "trapping to UND");
        self.trap(bus, VECTOR_UND, pc)?;
        self.cycles
            .advance(UND_CYCLES + std::mem::take(&mut self.wait));
        Ok(())
    }
}

impl<X: Bus> CpuCore<X> for Cpu {
    fn step(&mut self, bus: &mut X) -> Result<Step> {
        if self.waiting {
            if self.acceptable().is_none() {
                return Ok(Step::Idle);
            }
            self.waiting = false;
            debug!(pc = self.regs.pc, "wake from wait");
            if let Some((source, vector)) = self.poll_interrupts(bus)? {
                return Ok(Step::Interrupted { source, vector });
            }
        }

        let pc = self.regs.pc;
        self.wait = bus.wait_states(pc);
        let (insn, len) = match Self::fetch_decode(bus, pc) {
            Ok(decoded) => decoded,
            Err(
                fault @ (Fault::UndefinedOpcode { .. } | Fault::IllegalAddressingMode { .. }),
            ) => {
                self.undefined(bus, fault, pc)?;
                return Ok(Step::Executed);
            }
            Err(fault) => return Err(fault),
        };
        self.opcode = Self::opcode_at(bus, pc, len)?;
        trace!("{pc:05X}: {insn}");

        let cycles = match self.execute(bus, insn, pc, len) {
            Ok(cycles) => cycles,
            Err(fault @ Fault::IllegalAddressingMode { .. }) => {
                self.undefined(bus, fault, pc)?;
                return Ok(Step::Executed);
            }
            Err(fault) => return Err(fault),
        };
        self.cycles
            .advance(cycles + std::mem::take(&mut self.wait));

        if let Some((source, vector)) = self.poll_interrupts(bus)? {
            return Ok(Step::Interrupted { source, vector });
        }
        if matches!(insn, Instruction::Jmp { .. }) && self.regs.pc == pc {
            return Ok(Step::SelfLoop);
        }
        Ok(Step::Executed)
    }

    fn reset(&mut self, bus: &mut X) -> Result<()> {
        self.regs = Registers::default();
        self.waiting = false;
        self.wait = 0;
        self.regs.pc = self.vector(bus, VECTOR_RESET)?;
        Ok(())
    }

    fn pc(&self) -> u32 {
        self.regs.pc
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

    fn disassemble(&self, bus: &mut X, pc: u32) -> Result<Disassembly> {
        let (text, len) = match Self::fetch_decode(bus, pc) {
            Ok((insn, len)) => (insn.to_string(), len),
            Err(Fault::UndefinedOpcode { .. } | Fault::IllegalAddressingMode { .. }) => {
                (format!(".byte 0x{:02X}", bus.read8(pc)?), 1)
            }
            Err(fault) => return Err(fault),
        };
        let bytes = (0..len)
            .map(|i| bus.read8(pc.wrapping_add(i) & ADDR_MASK))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Disassembly { pc, bytes, text })
    }

    fn registers(&self) -> Vec<Register> {
        let regs = &self.regs;
        vec![
            Register::new("PC", regs.pc, 5),
            Register::new("FLG", regs.flg() as u32, 4),
            Register::new("R0", regs.r(0) as u32, 4),
            Register::new("R1", regs.r(1) as u32, 4),
            Register::new("R2", regs.r(2) as u32, 4),
            Register::new("R3", regs.r(3) as u32, 4),
            Register::new("A0", regs.a(0) as u32, 4),
            Register::new("A1", regs.a(1) as u32, 4),
            Register::new("FB", regs.fb() as u32, 4),
            Register::new("SB", regs.sb as u32, 4),
            Register::new("USP", regs.usp as u32, 4),
            Register::new("ISP", regs.isp as u32, 4),
            Register::new("INTB", regs.intb, 5),
        ]
    }

    fn set_register(&mut self, name: &str, value: u32) -> bool {
        let regs = &mut self.regs;
        match name {
            "PC" => regs.pc = value & ADDR_MASK,
            "FLG" => regs.set_flg(value as u16),
            "R0" => regs.set_r(0, value as u16),
            "R1" => regs.set_r(1, value as u16),
            "R2" => regs.set_r(2, value as u16),
            "R3" => regs.set_r(3, value as u16),
            "A0" => regs.set_a(0, value as u16),
            "A1" => regs.set_a(1, value as u16),
            "FB" => regs.set_fb(value as u16),
            "SB" => regs.sb = value as u16,
            "SP" => regs.set_sp(value as u16),
            "USP" => regs.usp = value as u16,
            "ISP" => regs.isp = value as u16,
            "INTB" => regs.intb = value & ADDR_MASK,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests;
