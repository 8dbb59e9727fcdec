//! End-to-end runs of the three cores through the public API.

use mcuemu::alu::OpSize;
use mcuemu::breakpoint::{Action, Breakpoints};
use mcuemu::bus::{Bus, Ram, Rom};
use mcuemu::intc::{InterruptController, Trigger};
use mcuemu::m16c::{self, Base, Location, Mode, Stream};
use mcuemu::mcs51::{self, SfrBank, sfr::PSW_AC, sfr::PSW_C, sfr::PSW_OV};
use mcuemu::{BusFault, CpuCore, Fault, RunOptions, Step, StopReason, avr, run};

const M16C_ORIGIN: u32 = 0xF_0000;

fn m16c_context(code: &[u8]) -> (m16c::Cpu, Ram) {
    let mut ram = Ram::new(0x10_0000);
    ram.load(M16C_ORIGIN, code).unwrap();
    ram.load(m16c::VECTOR_RESET, &[0x00, 0x00, 0x0F]).unwrap();
    let mut cpu = m16c::Cpu::default();
    cpu.reset(&mut ram).unwrap();
    cpu.regs_mut().isp = 0x0800;
    (cpu, ram)
}

fn avr_context(words: &[u16]) -> (Rom, Ram) {
    let bytes = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    (Rom::new(bytes), Ram::new(0x900))
}

fn until_self_loop<X, C: CpuCore<X>>(cpu: &mut C, ctx: &mut X) -> StopReason {
    let options = RunOptions {
        max_instructions: Some(100),
        stop_on_self_loop: true,
    };
    run(cpu, ctx, &mut Breakpoints::new(), options).reason
}

#[test]
fn mcs51_add_signed_overflow() {
    // ADD A,R0
    let mut ctx = (SfrBank::default(), Ram::new(0x10000), Rom::new(vec![0x28]));
    let mut cpu = mcs51::Cpu::default();
    cpu.a_set(0x7F);
    *cpu.r_mut(0) = 0x01;
    cpu.step(&mut ctx).unwrap();
    assert_eq!(cpu.a(), 0x80);
    assert!(cpu.psw_bit(PSW_OV));
    assert!(cpu.psw_bit(PSW_AC));
    assert!(!cpu.psw_bit(PSW_C));
}

#[test]
fn avr_sbc_with_carry_in() {
    // LDI r16,0x10; LDI r17,0x01; SEC; SBC r16,r17
    let mut ctx = avr_context(&[0xE100, 0xE011, 0x9408, 0x0B01]);
    let mut cpu = avr::Cpu::default();
    for _ in 0..4 {
        cpu.step(&mut ctx).unwrap();
    }
    assert_eq!(cpu.reg(16), 0x0E);
    assert!(!cpu.flag(avr::SREG_C));
    assert!(cpu.flag(avr::SREG_H));
}

#[test]
fn m16c_bit_test_leaves_memory_alone() {
    // BTST:S 3,5[SB]
    let (mut cpu, mut ram) = m16c_context(&[0x5B, 0x05]);
    cpu.regs_mut().sb = 0x0400;
    ram.load(0x0405, &[0x08]).unwrap();
    cpu.step(&mut ram).unwrap();
    assert!(cpu.regs().flag(m16c::regs::FLG_C));
    assert!(!cpu.regs().flag(m16c::regs::FLG_Z));
    assert_eq!(ram.as_slice()[0x0405], 0x08);
}

#[test]
fn m16c_negative_frame_displacement() {
    let mut ram = Ram::new(0x100);
    ram.load(0, &[0xFF]).unwrap();
    let mode = Stream::new(&mut ram, 0).generic(0xB).unwrap();
    assert_eq!(
        mode,
        Mode::Displacement {
            base: Base::Fb,
            disp: -1,
            len: 1
        }
    );
    assert_eq!(mode.codelen(), 1);

    let mut cpu = m16c::Cpu::default();
    cpu.regs_mut().set_fb(0x1000);
    assert_eq!(cpu.locate(&mode), Location::Memory(0x0FFF));
}

#[test]
fn m16c_operands_round_trip() {
    let mut ram = Ram::new(0x10_0000);
    ram.load(0, &[0x10, 0x00]).unwrap();
    let mut cpu = m16c::Cpu::default();
    cpu.regs_mut().set_a(0, 0x0200);
    cpu.regs_mut().set_a(1, 0x0300);
    for selector in 0..=0xF {
        let mode = Stream::new(&mut ram, 0).generic(selector).unwrap();
        cpu.set(&mut ram, &mode, OpSize::Word, 0x1234).unwrap();
        assert_eq!(cpu.get(&mut ram, &mode, OpSize::Word).unwrap(), 0x1234);
    }
}

#[test]
fn highest_level_wins_until_acknowledged() {
    let mut intc = InterruptController::new();
    let s1 = intc.add_source("S1", 0x10, Trigger::Internal);
    let s2 = intc.add_source("S2", 0x20, Trigger::Internal);
    intc.set_level(s1, 3);
    intc.set_level(s2, 5);
    intc.raise(s1);
    intc.raise(s2);
    assert_eq!(intc.current(), Some((s2, 5)));
    intc.acknowledge(s2);
    assert_eq!(intc.current(), Some((s1, 3)));
    intc.acknowledge(s1);
    assert_eq!(intc.current(), None);
}

#[test]
fn every_core_stops_on_a_jump_to_itself() {
    // NOP; SJMP $
    let mut ctx = (SfrBank::default(), Ram::new(0x10000), Rom::new(vec![0x00, 0x80, 0xFE]));
    let mut cpu = mcs51::Cpu::default();
    assert_eq!(
        until_self_loop(&mut cpu, &mut ctx),
        StopReason::SelfLoop { pc: 1 }
    );

    // NOP; RJMP .-1
    let mut ctx = avr_context(&[0x0000, 0xCFFF]);
    let mut cpu = avr::Cpu::default();
    assert_eq!(
        until_self_loop(&mut cpu, &mut ctx),
        StopReason::SelfLoop { pc: 1 }
    );

    // NOP; JMP.B $
    let (mut cpu, mut ram) = m16c_context(&[0x04, 0xFE, 0xFF]);
    assert_eq!(
        until_self_loop(&mut cpu, &mut ram),
        StopReason::SelfLoop {
            pc: M16C_ORIGIN + 1
        }
    );
}

#[test]
fn breakpoints_stop_and_act() {
    // NOP; NOP; NOP; JMP.B $
    let (mut cpu, mut ram) = m16c_context(&[0x04, 0x04, 0x04, 0xFE, 0xFF]);
    let mut breakpoints = Breakpoints::new();
    breakpoints.add(true, M16C_ORIGIN, Action::Set("R0".to_string(), 0x55));
    breakpoints.add(
        false,
        M16C_ORIGIN + 1,
        Action::Run(Box::new(|cpu: &mut m16c::Cpu| cpu.regs_mut().set_r(1, 0x66))),
    );
    breakpoints.add(true, M16C_ORIGIN + 2, Action::Stop);

    let summary = run(&mut cpu, &mut ram, &mut breakpoints, RunOptions::default());
    assert_eq!(
        summary.reason,
        StopReason::Breakpoint {
            pc: M16C_ORIGIN + 2
        }
    );
    assert_eq!(summary.instructions, 2);
    assert_eq!(cpu.regs().r(0), 0x55);
    assert_eq!(cpu.regs().r(1), 0x66);
    assert_eq!(cpu.regs().pc, M16C_ORIGIN + 2);
}

#[test]
fn instruction_limit_bounds_the_run() {
    let (mut cpu, mut ram) = m16c_context(&[0x04; 16]);
    let options = RunOptions {
        max_instructions: Some(5),
        stop_on_self_loop: true,
    };
    let summary = run(&mut cpu, &mut ram, &mut Breakpoints::new(), options);
    assert_eq!(summary.reason, StopReason::InstructionLimit);
    assert_eq!(summary.instructions, 5);
    assert_eq!(cpu.regs().pc, M16C_ORIGIN + 5);
}

/// RAM that refuses writes to one address.
struct Guarded {
    ram: Ram,
    guard: u32,
}

impl Bus for Guarded {
    fn read8(&mut self, addr: u32) -> Result<u8, BusFault> {
        self.ram.read8(addr)
    }
    fn write8(&mut self, addr: u32, value: u8) -> Result<(), BusFault> {
        if addr == self.guard {
            return Err(BusFault::write(addr, 1));
        }
        self.ram.write8(addr, value)
    }
}

#[test]
fn bus_faults_end_the_run() {
    // MOV.B:S R0L,10h[SB]
    let (mut cpu, ram) = m16c_context(&[0x01, 0x10]);
    let mut bus = Guarded { ram, guard: 0x8000 };
    cpu.regs_mut().sb = 0x7FF0;
    let summary = run(&mut cpu, &mut bus, &mut Breakpoints::new(), RunOptions::default());
    match summary.reason {
        StopReason::Fault(Fault::Bus(fault)) => assert_eq!(fault.addr, 0x8000),
        other => panic!("unexpected stop: {other:?}"),
    }
    assert_eq!(summary.instructions, 0);
}

#[test]
fn mcs51_timer_interrupt_vectors_after_hold_off() {
    // NOP; NOP
    let mut ctx = (SfrBank::default(), Ram::new(0x10000), Rom::new(vec![0x00, 0x00]));
    let mut cpu = mcs51::Cpu::default();
    assert!(CpuCore::<(SfrBank, Ram, Rom)>::set_register(&mut cpu, "IE", 0x82));
    let timer = cpu.source("TF0").unwrap();
    cpu.raise(timer);

    // The IE write holds interrupts off for one instruction.
    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Executed);
    assert_eq!(
        cpu.step(&mut ctx).unwrap(),
        Step::Interrupted {
            source: timer,
            vector: 0x000B
        }
    );
    assert_eq!(cpu.pc, 0x000B);
}
