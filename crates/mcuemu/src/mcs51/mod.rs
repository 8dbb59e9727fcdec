//! MCS-51 (8051/8052) core.
//!
//! The core owns A, B, DPTR, PSW, SP, IE and IP plus the 256 bytes of
//! internal RAM. Every other SFR is forwarded to the context's
//! [`PortMapper`]. Code and external data are [`Bus`]es.

mod ops;
mod ports;
pub mod sfr;

use tracing::{debug, trace};

use crate::bus::Bus;
use crate::dispatch::{CpuCore, CycleAccount, Disassembly, Register, Step};
use crate::error::Result;
use crate::intc::{InterruptController, SourceId, Trigger};
use crate::regs::Reg8;

pub use ports::{Mcs51Context, PortMapper, SfrBank};
use sfr::*;

#[derive(Debug, Clone)]
pub struct Config {
    /// 8052 timer 2 interrupt (vector 0x2B, IE.5/IP.5).
    pub timer2: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { timer2: true }
    }
}

#[derive(Debug)]
pub struct Cpu {
    pub pc: u16,
    pub internal_ram: [u8; 256],
    a: u8,
    b: u8,
    dpl: u8,
    dph: u8,
    /// PSW without the parity bit, which is derived from A.
    psw: u8,
    sp: u8,
    ie: u8,
    ip: u8,
    /// Interrupts in service at low and high priority.
    in_service: [bool; 2],
    /// Set by RETI and IE/IP writes: the next instruction always runs
    /// before an interrupt is taken.
    hold_off: bool,
    intc: InterruptController,
    /// Source ids in IE bit order.
    sources: Vec<SourceId>,
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
        let count = if config.timer2 { 6 } else { 5 };
        let sources = VECTORS[..count]
            .iter()
            .map(|(name, vector)| intc.add_source(name, *vector as u32, Trigger::Internal))
            .collect();
        Self {
            pc: 0x0000,
            internal_ram: [0; 256],
            a: 0,
            b: 0,
            dpl: 0,
            dph: 0,
            psw: 0,
            sp: 7,
            ie: 0,
            ip: 0,
            in_service: [false; 2],
            hold_off: false,
            intc,
            sources,
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

    /// The controller id of an interrupt by its flag name (`"IE0"`,
    /// `"TF0"`, `"IE1"`, `"TF1"`, `"RI+TI"`, `"TF2"`).
    pub fn source(&self, name: &str) -> Option<SourceId> {
        self.intc.find(name)
    }

    pub fn a(&self) -> u8 {
        self.a
    }

    pub fn a_set(&mut self, value: u8) {
        self.a = value;
    }

    pub fn b(&self) -> u8 {
        self.b
    }

    pub fn b_set(&mut self, value: u8) {
        self.b = value;
    }

    pub fn dptr(&self) -> u16 {
        ((self.dph as u16) << 8) | self.dpl as u16
    }

    pub fn dptr_set(&mut self, value: u16) {
        self.dph = (value >> 8) as u8;
        self.dpl = value as u8;
    }

    /// The full PSW, parity included.
    pub fn psw(&self) -> u8 {
        self.psw | Reg8(self.a).parity() as u8
    }

    /// Write the PSW. The parity bit is read-only and the write to it is
    /// dropped.
    pub fn psw_write(&mut self, value: u8) {
        self.psw = value & !(1 << PSW_P);
    }

    pub fn psw_bit(&self, flag: u8) -> bool {
        self.psw() & (1 << flag) != 0
    }

    pub fn psw_set(&mut self, flag: u8, value: bool) {
        if flag == PSW_P {
            return;
        }
        if value {
            self.psw |= 1 << flag;
        } else {
            self.psw &= !(1 << flag);
        }
    }

    pub fn sp(&self) -> u8 {
        self.sp
    }

    pub fn sp_set(&mut self, value: u8) {
        self.sp = value;
    }

    fn bank_offset(&self) -> usize {
        (((self.psw >> PSW_RS0) & 0b11) * 8) as usize
    }

    pub fn r(&self, x: u8) -> u8 {
        self.internal_ram[(x & 7) as usize + self.bank_offset()]
    }

    pub fn r_mut(&mut self, x: u8) -> &mut u8 {
        let offset = self.bank_offset();
        &mut self.internal_ram[(x & 7) as usize + offset]
    }

    fn sfr(&mut self, addr: u8, latched: bool, ports: &mut impl PortMapper) -> u8 {
        match addr {
            SFR_A => self.a,
            SFR_B => self.b,
            SFR_DPH => self.dph,
            SFR_DPL => self.dpl,
            SFR_PSW => self.psw(),
            SFR_SP => self.sp,
            SFR_IE => self.ie,
            SFR_IP => self.ip,
            _ if latched => ports.read_latched(addr),
            _ => ports.read_live(addr),
        }
    }

    fn sfr_set(&mut self, addr: u8, value: u8, ports: &mut impl PortMapper) {
        match addr {
            SFR_A => self.a = value,
            SFR_B => self.b = value,
            SFR_DPH => self.dph = value,
            SFR_DPL => self.dpl = value,
            SFR_PSW => self.psw_write(value),
            SFR_SP => self.sp = value,
            SFR_IE => {
                self.ie = value;
                self.update_levels();
            }
            SFR_IP => {
                self.ip = value;
                self.update_levels();
            }
            _ => ports.write(addr, value),
        }
    }

    pub(crate) fn read_direct(&mut self, addr: u8, ports: &mut impl PortMapper) -> u8 {
        if addr < SFR_BASE {
            self.internal_ram[addr as usize]
        } else {
            self.sfr(addr, false, ports)
        }
    }

    /// Like [`Self::read_direct`], but ports return their output latch.
    pub(crate) fn read_direct_latched(&mut self, addr: u8, ports: &mut impl PortMapper) -> u8 {
        if addr < SFR_BASE {
            self.internal_ram[addr as usize]
        } else {
            self.sfr(addr, true, ports)
        }
    }

    pub(crate) fn write_direct(&mut self, addr: u8, value: u8, ports: &mut impl PortMapper) {
        if addr < SFR_BASE {
            self.internal_ram[addr as usize] = value;
        } else {
            self.sfr_set(addr, value, ports);
        }
    }

    pub(crate) fn read_indirect(&self, addr: u8) -> u8 {
        self.internal_ram[addr as usize]
    }

    pub(crate) fn write_indirect(&mut self, addr: u8, value: u8) {
        self.internal_ram[addr as usize] = value;
    }

    pub(crate) fn read_bit(&mut self, bit: u8, ports: &mut impl PortMapper) -> bool {
        let (byte, pos) = Bit(bit).location();
        self.read_direct(byte, ports) & (1 << pos) != 0
    }

    pub(crate) fn read_bit_latched(&mut self, bit: u8, ports: &mut impl PortMapper) -> bool {
        let (byte, pos) = Bit(bit).location();
        self.read_direct_latched(byte, ports) & (1 << pos) != 0
    }

    /// Bit writes are read-modify-write of the whole byte, reading the latch.
    pub(crate) fn write_bit(&mut self, bit: u8, value: bool, ports: &mut impl PortMapper) {
        let (byte, pos) = Bit(bit).location();
        let old = self.read_direct_latched(byte, ports);
        let new = if value {
            old | (1 << pos)
        } else {
            old & !(1 << pos)
        };
        self.write_direct(byte, new, ports);
    }

    /// The high byte for `MOVX @Ri`, taken from the P2 latch.
    pub(crate) fn page(&mut self, ports: &mut impl PortMapper, low: u16) -> u16 {
        (self.read_direct_latched(SFR_P2, ports) as u16) << 8 | (low & 0xFF)
    }

    pub fn push_stack(&mut self, value: u8) {
        self.sp = self.sp.wrapping_add(1);
        self.internal_ram[self.sp as usize] = value;
    }

    pub fn push_stack16(&mut self, value: u16) {
        self.push_stack(value as u8);
        self.push_stack((value >> 8) as u8);
    }

    pub fn pop_stack(&mut self) -> u8 {
        let value = self.internal_ram[self.sp as usize];
        self.sp = self.sp.wrapping_sub(1);
        value
    }

    pub fn pop_stack16(&mut self) -> u16 {
        let hi = self.pop_stack();
        let lo = self.pop_stack();
        ((hi as u16) << 8) | lo as u16
    }

    /// Priority level the running code holds: 0 in the main program.
    fn active_level(&self) -> u8 {
        match self.in_service {
            [_, true] => 2,
            [true, false] => 1,
            [false, false] => 0,
        }
    }

    pub(crate) fn reti(&mut self) {
        match self.active_level() {
            2 => self.in_service[1] = false,
            1 => self.in_service[0] = false,
            _ => {}
        }
        self.hold_off = true;
        debug!(level = self.active_level(), "RETI");
    }

    /// IE/IP to controller levels: disabled 0, low 1, high 2.
    fn update_levels(&mut self) {
        let enabled = self.ie & (1 << IE_EA) != 0;
        for (bit, &id) in self.sources.iter().enumerate() {
            let level = if enabled && self.ie & (1 << bit) != 0 {
                1 + (self.ip >> bit & 1)
            } else {
                0
            };
            self.intc.set_level(id, level);
        }
        self.hold_off = true;
    }

    fn poll_interrupts(&mut self) -> Option<(SourceId, u32)> {
        if std::mem::take(&mut self.hold_off) {
            return None;
        }
        let (id, level) = self.intc.current()?;
        if level <= self.active_level() {
            return None;
        }
        let vector = self.intc.sources()[id].vector();
        self.push_stack16(self.pc);
        self.pc = vector as u16;
        self.in_service[(level - 1) as usize] = true;
        self.intc.acknowledge(id);
        // The hardware LCALL.
        self.cycles.advance(2);
        debug!(source = self.intc.sources()[id].name(), level, vector, "interrupt");
        Some((id, vector))
    }
}

impl<X: Mcs51Context> CpuCore<X> for Cpu {
    fn step(&mut self, ctx: &mut X) -> Result<Step> {
        let pc = self.pc;
        let (ports, xdata, code) = ctx.parts();
        let opcode = code.read8(pc as u32)?;
        trace!("{pc:04X}: {opcode:02X}");
        let cycles = ops::execute(self, ports, xdata, code)?;
        self.cycles.advance(cycles as u32);

        if let Some((source, vector)) = self.poll_interrupts() {
            return Ok(Step::Interrupted { source, vector });
        }
        // SJMP, LJMP or AJMP to itself
        let jump = opcode == 0x80 || opcode == 0x02 || opcode & 0x1F == 0x01;
        if jump && self.pc == pc {
            return Ok(Step::SelfLoop);
        }
        Ok(Step::Executed)
    }

    fn reset(&mut self, _ctx: &mut X) -> Result<()> {
        self.pc = 0;
        self.a = 0;
        self.b = 0;
        self.dptr_set(0);
        self.psw = 0;
        self.sp = 7;
        self.ie = 0;
        self.ip = 0;
        self.update_levels();
        self.in_service = [false; 2];
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
        let (bytes, text) = ops::decode(ctx.code_mut(), pc as u16)?;
        Ok(Disassembly { pc, bytes, text })
    }

    fn registers(&self) -> Vec<Register> {
        let mut regs = vec![
            Register::new("PC", self.pc as u32, 4),
            Register::new("A", self.a as u32, 2),
            Register::new("B", self.b as u32, 2),
            Register::new("DPTR", self.dptr() as u32, 4),
            Register::new("PSW", self.psw() as u32, 2),
            Register::new("SP", self.sp as u32, 2),
        ];
        const NAMES: [&str; 8] = ["R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7"];
        for (i, name) in NAMES.into_iter().enumerate() {
            regs.push(Register::new(name, self.r(i as u8) as u32, 2));
        }
        regs
    }

    fn set_register(&mut self, name: &str, value: u32) -> bool {
        match name {
            "PC" => self.pc = value as u16,
            "A" | "ACC" => self.a = value as u8,
            "B" => self.b = value as u8,
            "DPTR" => self.dptr_set(value as u16),
            "PSW" => self.psw_write(value as u8),
            "SP" => self.sp = value as u8,
            "IE" => {
                self.ie = value as u8;
                self.update_levels();
            }
            "IP" => {
                self.ip = value as u8;
                self.update_levels();
            }
            reg => match reg.strip_prefix('R').and_then(|n| n.parse::<u8>().ok()) {
                Some(n @ 0..8) => *self.r_mut(n) = value as u8,
                _ => return false,
            },
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Ram, Rom};

    fn context(code: &[u8]) -> (SfrBank, Ram, Rom) {
        (SfrBank::default(), Ram::new(0x10000), Rom::new(code.to_vec()))
    }

    fn run(cpu: &mut Cpu, ctx: &mut (SfrBank, Ram, Rom), steps: usize) {
        for _ in 0..steps {
            cpu.step(ctx).unwrap();
        }
    }

    #[test]
    fn add_sets_overflow_not_carry() {
        // MOV A,#7F; MOV R0,#01; ADD A,R0
        let mut ctx = context(&[0x74, 0x7F, 0x78, 0x01, 0x28]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 3);
        assert_eq!(cpu.a(), 0x80);
        assert!(cpu.psw_bit(PSW_OV));
        assert!(!cpu.psw_bit(PSW_C));
        assert!(cpu.psw_bit(PSW_AC));
        assert_eq!(cpu.pc, 5);
    }

    #[test]
    fn subb_borrows() {
        // SETB C; MOV A,#10; SUBB A,#01
        let mut ctx = context(&[0xD3, 0x74, 0x10, 0x94, 0x01]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 3);
        assert_eq!(cpu.a(), 0x0E);
        assert!(!cpu.psw_bit(PSW_C));
        assert!(cpu.psw_bit(PSW_AC));

        // MOV A,#00; SUBB A,#01 borrows
        let mut ctx = context(&[0x74, 0x00, 0x94, 0x01]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 2);
        assert_eq!(cpu.a(), 0xFF);
        assert!(cpu.psw_bit(PSW_C));
    }

    #[test]
    fn parity_is_derived_from_a() {
        // MOV A,#07; MOV PSW,#00
        let mut ctx = context(&[0x74, 0x07, 0x75, 0xD0, 0x00]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 2);
        assert!(cpu.psw_bit(PSW_P));
        cpu.psw_write(0x00);
        assert_eq!(cpu.psw(), 0x01);
    }

    #[test]
    fn register_banks_follow_psw() {
        // MOV PSW,#08; MOV R0,#55
        let mut ctx = context(&[0x75, 0xD0, 0x08, 0x78, 0x55]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 2);
        assert_eq!(cpu.internal_ram[8], 0x55);
        assert_eq!(cpu.internal_ram[0], 0x00);
    }

    #[test]
    fn calls_push_low_byte_first() {
        // LCALL 0010; ... 0010: RET
        let mut code = vec![0x12, 0x00, 0x10];
        code.resize(0x10, 0x00);
        code.push(0x22);
        let mut ctx = context(&code);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 1);
        assert_eq!(cpu.pc, 0x0010);
        assert_eq!(cpu.sp(), 9);
        assert_eq!(cpu.internal_ram[8], 0x03);
        assert_eq!(cpu.internal_ram[9], 0x00);
        run(&mut cpu, &mut ctx, 1);
        assert_eq!(cpu.pc, 0x0003);
        assert_eq!(cpu.sp(), 7);
    }

    #[test]
    fn read_modify_write_uses_the_latch() {
        // ANL P1,#FF then MOV A,P1
        let mut ctx = context(&[0x53, SFR_P1, 0xFF, 0xE5, SFR_P1]);
        ctx.0.set_pins(1, 0x0F);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 2);
        assert_eq!(ctx.0.read_latched(SFR_P1), 0xFF);
        assert_eq!(cpu.a(), 0x0F);
    }

    #[test]
    fn bit_instructions_address_ram_and_sfrs() {
        // SETB 20h.1; SETB ACC.7; MOV C,20h.1
        let mut ctx = context(&[0xD2, 0x01, 0xD2, 0xE7, 0xA2, 0x01]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 3);
        assert_eq!(cpu.internal_ram[0x20], 0x02);
        assert_eq!(cpu.a(), 0x80);
        assert!(cpu.psw_bit(PSW_C));
    }

    #[test]
    fn bit_and_direct_reads_feed_writes() {
        let mut ctx = context(&[
            0x75, 0x30, 0x5A, // MOV 30h,#5A
            0xC0, 0x30, // PUSH 30h
            0xD2, 0x01, // SETB 20h.1
            0x82, 0x01, // ANL C,20h.1
            0xD3, // SETB C
            0x82, 0x01, // ANL C,20h.1
            0xB3, // CPL C
            0xA2, 0x01, // MOV C,20h.1
            0x85, 0x30, 0x31, // MOV 31h,30h
        ]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 2);
        assert_eq!(cpu.sp(), 8);
        assert_eq!(cpu.internal_ram[8], 0x5A);
        run(&mut cpu, &mut ctx, 2);
        assert!(!cpu.psw_bit(PSW_C));
        run(&mut cpu, &mut ctx, 2);
        assert!(cpu.psw_bit(PSW_C));
        run(&mut cpu, &mut ctx, 1);
        assert!(!cpu.psw_bit(PSW_C));
        run(&mut cpu, &mut ctx, 2);
        assert!(cpu.psw_bit(PSW_C));
        assert_eq!(cpu.internal_ram[0x31], 0x5A);
        assert_eq!(cpu.pc, 18);
    }

    #[test]
    fn decimal_adjust_after_add() {
        // MOV A,#38; ADD A,#49; DA A
        let mut ctx = context(&[0x74, 0x38, 0x24, 0x49, 0xD4]);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 3);
        assert_eq!(cpu.a(), 0x87);
        assert!(!cpu.psw_bit(PSW_C));
    }

    #[test]
    fn undefined_opcode_halts() {
        let mut ctx = context(&[0xA5]);
        let mut cpu = Cpu::default();
        let fault = cpu.step(&mut ctx).unwrap_err();
        assert_eq!(
            fault,
            crate::error::Fault::UndefinedOpcode {
                pc: 0,
                opcode: 0xA5
            }
        );
    }

    #[test]
    fn sjmp_to_itself_is_a_self_loop() {
        let mut ctx = context(&[0x80, 0xFE]);
        let mut cpu = Cpu::default();
        assert_eq!(cpu.step(&mut ctx).unwrap(), Step::SelfLoop);
    }

    #[test]
    fn interrupts_nest_by_priority_and_hold_off_after_reti() {
        // 0000: LJMP 0030
        // 0003: NOP; RETI          (IE0, low priority)
        // 0013: RETI               (IE1, high priority)
        // 0030: MOV IE,#85; MOV IP,#04; SJMP $
        let mut program = vec![0x02, 0x00, 0x30];
        program.resize(0x30, 0x00);
        program[0x04] = 0x32;
        program[0x13] = 0x32;
        program.extend_from_slice(&[0x75, 0xA8, 0x85, 0x75, 0xB8, 0x04, 0x80, 0xFE]);
        let mut ctx = context(&program);
        let mut cpu = Cpu::default();
        run(&mut cpu, &mut ctx, 3);
        assert_eq!(cpu.pc, 0x0036);

        let ie0 = cpu.source("IE0").unwrap();
        let ie1 = cpu.source("IE1").unwrap();
        cpu.raise(ie0);
        let step = cpu.step(&mut ctx).unwrap();
        assert_eq!(step, Step::Interrupted { source: ie0, vector: 0x03 });
        assert!(!cpu.interrupts().sources()[ie0].is_pending());

        // High-priority IE1 preempts the low-priority handler after its NOP.
        cpu.raise(ie1);
        let step = cpu.step(&mut ctx).unwrap();
        assert_eq!(step, Step::Interrupted { source: ie1, vector: 0x13 });

        // A second IE0 must wait: RETI holds off, then IE0 is still in service.
        cpu.raise(ie0);
        assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Executed);
        assert_eq!(cpu.pc, 0x0004);
        assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Executed);
        assert_eq!(cpu.pc, 0x0036);
        assert_eq!(cpu.sp(), 7);

        // Back in the main program the pending IE0 is taken.
        let step = cpu.step(&mut ctx).unwrap();
        assert_eq!(step, Step::Interrupted { source: ie0, vector: 0x03 });
    }
}
