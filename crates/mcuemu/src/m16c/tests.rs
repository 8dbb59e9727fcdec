use super::regs::{FLG_B, FLG_C, FLG_I, FLG_O, FLG_S, FLG_Z};
use super::*;
use crate::alu::OpSize;
use crate::bus::Ram;

const ORIGIN: u32 = 0xF_0000;

/// A megabyte of RAM with `code` at ORIGIN and the reset vector pointing at
/// it. The interrupt stack starts at 0x0800.
fn context(code: &[u8]) -> (Cpu, Ram) {
    context_with(Ram::new(0x10_0000), code)
}

fn context_with(mut ram: Ram, code: &[u8]) -> (Cpu, Ram) {
    ram.load(ORIGIN, code).unwrap();
    ram.load(VECTOR_RESET, &[0x00, 0x00, 0x0F]).unwrap();
    let mut cpu = Cpu::default();
    cpu.reset(&mut ram).unwrap();
    cpu.regs.isp = 0x0800;
    (cpu, ram)
}

fn run(cpu: &mut Cpu, ram: &mut Ram, steps: usize) {
    for _ in 0..steps {
        cpu.step(ram).unwrap();
    }
}

#[test]
fn reset_loads_the_vector() {
    let (cpu, _) = context(&[]);
    assert_eq!(cpu.regs.pc, ORIGIN);
    assert_eq!(cpu.regs.flg(), 0);
    assert_eq!(cpu.regs.intb, 0);
}

#[test]
fn btst_reads_without_writing() {
    // BTST:S 3,5[SB]
    let (mut cpu, mut ram) = context(&[0x5B, 0x05]);
    cpu.regs.sb = 0x0400;
    ram.load(0x0405, &[0x08]).unwrap();
    run(&mut cpu, &mut ram, 1);
    assert!(cpu.regs.flag(FLG_C));
    assert!(!cpu.regs.flag(FLG_Z));
    assert_eq!(ram.as_slice()[0x0405], 0x08);
    assert_eq!(cpu.regs.pc, ORIGIN + 2);
}

#[test]
fn add_sets_overflow() {
    // MOV.B #7Fh,R0L; ADD.B:Q #1,R0L
    let (mut cpu, mut ram) = context(&[0xC4, 0x7F, 0xC8, 0x10]);
    run(&mut cpu, &mut ram, 2);
    assert_eq!(cpu.regs.get(0, OpSize::Byte), 0x80);
    assert!(cpu.regs.flag(FLG_O));
    assert!(cpu.regs.flag(FLG_S));
    assert!(!cpu.regs.flag(FLG_Z));
    assert!(!cpu.regs.flag(FLG_C));
}

#[test]
fn subtract_carry_means_no_borrow() {
    // MOV.B #5,R0L; SUB.B #6,R0L; MOV.B #5,R0L; SUB.B #3,R0L
    let (mut cpu, mut ram) = context(&[0xC4, 0x05, 0x8C, 0x06, 0xC4, 0x05, 0x8C, 0x03]);
    run(&mut cpu, &mut ram, 2);
    assert_eq!(cpu.regs.get(0, OpSize::Byte), 0xFF);
    assert!(!cpu.regs.flag(FLG_C));
    assert!(cpu.regs.flag(FLG_S));
    run(&mut cpu, &mut ram, 2);
    assert_eq!(cpu.regs.get(0, OpSize::Byte), 0x02);
    assert!(cpu.regs.flag(FLG_C));
}

#[test]
fn short_immediates_come_before_the_displacement() {
    let (mut cpu, mut ram) = context(&[
        0xC5, 0x12, 0x20, // MOV.B:S #12h,20h[SB]
        0x85, 0x05, 0x20, // ADD.B:S #5,20h[SB]
        0xE5, 0x17, 0x20, // CMP.B:S #17h,20h[SB]
        0xDD, 0x11, 0x21, 0x22, // STZX #11h,#22h,21h[SB]
        0xD5, 0x33, 0x22, // STNZ #33h,22h[SB]
        0xCF, 0x44, 0x23, 0x04, // STZ #44h,0423h
        0x8E, 0x01, 0xFF, // SUB.B:S #1,-1[FB]
    ]);
    cpu.regs.sb = 0x0400;
    cpu.regs.set_fb(0x0500);
    ram.load(0x04FF, &[0x03]).unwrap();

    run(&mut cpu, &mut ram, 3);
    assert_eq!(ram.as_slice()[0x0420], 0x17);
    assert!(cpu.regs.flag(FLG_Z));
    run(&mut cpu, &mut ram, 3);
    assert_eq!(&ram.as_slice()[0x0421..0x0424], &[0x11, 0x00, 0x44]);
    run(&mut cpu, &mut ram, 1);
    assert_eq!(ram.as_slice()[0x04FF], 0x02);
    assert_eq!(cpu.regs.pc, ORIGIN + 23);
}

#[test]
fn fset_b_switches_banks() {
    // MOV.W #1234h,R0; FSET B; MOV.W #5678h,R0; FCLR B
    let (mut cpu, mut ram) = context(&[
        0x75, 0xC0, 0x34, 0x12, 0xEB, 0x44, 0x75, 0xC0, 0x78, 0x56, 0xEB, 0x45,
    ]);
    run(&mut cpu, &mut ram, 4);
    assert!(!cpu.regs.flag(FLG_B));
    assert_eq!(cpu.regs.r(0), 0x1234);
    assert_eq!(cpu.regs.banks()[1].r[0], 0x5678);
}

#[test]
fn jsr_pushes_three_bytes() {
    // JSR.W +10h; ... RTS
    let mut code = vec![0xF5, 0x0F, 0x00];
    code.resize(0x10, 0x04);
    code.push(0xF3);
    let (mut cpu, mut ram) = context(&code);
    run(&mut cpu, &mut ram, 1);
    assert_eq!(cpu.regs.pc, ORIGIN + 0x10);
    assert_eq!(cpu.regs.isp, 0x07FD);
    assert_eq!(&ram.as_slice()[0x07FD..0x0800], &[0x03, 0x00, 0x0F]);
    run(&mut cpu, &mut ram, 1);
    assert_eq!(cpu.regs.pc, ORIGIN + 3);
    assert_eq!(cpu.regs.isp, 0x0800);
}

#[test]
fn software_interrupt_and_reit() {
    // FSET I; INT #5; ... handler: REIT
    let mut code = vec![0xEB, 0x64, 0xEB, 0xC5];
    code.resize(0x20, 0x04);
    code.push(0xFB);
    let (mut cpu, mut ram) = context(&code);
    cpu.regs.intb = 0x1000;
    ram.load(0x1000 + 4 * 5, &[0x20, 0x00, 0x0F]).unwrap();

    run(&mut cpu, &mut ram, 2);
    assert_eq!(cpu.regs.pc, ORIGIN + 0x20);
    assert!(!cpu.regs.flag(FLG_I));
    assert_eq!(cpu.regs.isp, 0x07FC);
    assert_eq!(&ram.as_slice()[0x07FC..0x0800], &[0x04, 0x00, 0x40, 0x0F]);

    run(&mut cpu, &mut ram, 1);
    assert_eq!(cpu.regs.pc, ORIGIN + 4);
    assert!(cpu.regs.flag(FLG_I));
    assert_eq!(cpu.regs.isp, 0x0800);
}

#[test]
fn peripheral_interrupt_needs_level_above_ipl() {
    // FSET I; NOP; NOP
    let (mut cpu, mut ram) = context(&[0xEB, 0x64, 0x04, 0x04]);
    cpu.regs.intb = 0x1000;
    ram.load(0x1000 + 4 * 21, &[0x40, 0x00, 0x0F]).unwrap();
    let timer = cpu.source("TIMER_A0").unwrap();
    cpu.set_priority(timer, 3);
    cpu.raise(timer);
    cpu.regs.set_ipl(3);

    assert_eq!(cpu.step(&mut ram).unwrap(), Step::Executed);
    assert!(cpu.interrupts().sources()[timer].is_pending());

    cpu.regs.set_ipl(2);
    let step = cpu.step(&mut ram).unwrap();
    assert_eq!(
        step,
        Step::Interrupted {
            source: timer,
            vector: ORIGIN + 0x40
        }
    );
    assert_eq!(cpu.regs.pc, ORIGIN + 0x40);
    assert_eq!(cpu.regs.ipl(), 3);
    assert!(!cpu.regs.flag(FLG_I));
    assert!(!cpu.interrupts().sources()[timer].is_pending());
    // Saved IPL 2 shares the top frame byte with PC bits 16-19.
    assert_eq!(&ram.as_slice()[0x07FC..0x0800], &[0x03, 0x00, 0x40, 0x2F]);
}

#[test]
fn undefined_opcode_traps_to_und() {
    let (mut cpu, mut ram) = context(&[0xF7]);
    ram.load(VECTOR_UND, &[0x00, 0x01, 0x0F]).unwrap();
    assert_eq!(cpu.step(&mut ram).unwrap(), Step::Executed);
    assert_eq!(cpu.regs.pc, ORIGIN + 0x100);
    assert_eq!(&ram.as_slice()[0x07FC..0x0800], &[0x00, 0x00, 0x00, 0x0F]);
}

#[test]
fn illegal_operand_traps_to_und() {
    // MOVA with a register source
    let (mut cpu, mut ram) = context(&[0xEB, 0x01]);
    ram.load(VECTOR_UND, &[0x00, 0x01, 0x0F]).unwrap();
    assert_eq!(cpu.step(&mut ram).unwrap(), Step::Executed);
    assert_eq!(cpu.regs.pc, ORIGIN + 0x100);
    assert_eq!(cpu.regs.isp, 0x07FC);
}

#[test]
fn wait_idles_until_an_interrupt_is_acceptable() {
    // FSET I; WAIT; NOP
    let (mut cpu, mut ram) = context(&[0xEB, 0x64, 0x7D, 0xF3, 0x04]);
    cpu.regs.intb = 0x1000;
    ram.load(0x1000 + 4 * 21, &[0x40, 0x00, 0x0F]).unwrap();
    let timer = cpu.source("TIMER_A0").unwrap();
    cpu.set_priority(timer, 1);
    run(&mut cpu, &mut ram, 2);
    assert!(cpu.is_waiting());
    assert_eq!(cpu.step(&mut ram).unwrap(), Step::Idle);
    assert_eq!(cpu.regs.pc, ORIGIN + 4);

    cpu.raise(timer);
    let step = cpu.step(&mut ram).unwrap();
    assert_eq!(
        step,
        Step::Interrupted {
            source: timer,
            vector: ORIGIN + 0x40
        }
    );
    assert!(!cpu.is_waiting());
}

#[test]
fn memory_operands_charge_wait_states() {
    // MOV.B:S R0L,10h[SB]
    let code = [0x01, 0x10];
    let (mut fast, mut ram) = context(&code);
    run(&mut fast, &mut ram, 1);
    let (mut slow, mut ram) = context_with(Ram::new(0x10_0000).with_wait_states(1), &code);
    run(&mut slow, &mut ram, 1);
    // One for the fetch, one for the store.
    assert_eq!(slow.cycles.elapsed() - fast.cycles.elapsed(), 2);
}

#[test]
fn operands_round_trip_through_every_selector() {
    let (mut cpu, mut ram) = context(&[]);
    ram.load(0, &[0x10, 0x00]).unwrap();
    for size in [OpSize::Byte, OpSize::Word] {
        let value = match size {
            OpSize::Byte => 0xA5,
            _ => 0xBEEF,
        };
        for selector in 0..=0xF {
            cpu.regs.set_a(0, 0x0200);
            cpu.regs.set_a(1, 0x0300);
            cpu.regs.sb = 0x0400;
            cpu.regs.set_fb(0x0500);
            let mode = Stream::new(&mut ram, 0).generic(selector).unwrap();
            cpu.set(&mut ram, &mode, size, value).unwrap();
            assert_eq!(
                cpu.get(&mut ram, &mode, size).unwrap(),
                value,
                "selector {selector:X} at {size:?}"
            );
        }
    }
}

#[test]
fn pc_advances_by_operand_lengths() {
    let (mut cpu, mut ram) = context(&[]);
    let codelen = |selector: u8| match selector {
        0..=7 => 0,
        8..=0xB => 1,
        _ => 2,
    };
    for src in 0..=0xFu8 {
        for dst in 0..=0xFu8 {
            // MOV.W:G src,dst
            ram.load(ORIGIN, &[0x73, src << 4 | dst, 0x10, 0x00, 0x10, 0x00])
                .unwrap();
            cpu.regs.pc = ORIGIN;
            cpu.regs.set_a(0, 0x0200);
            cpu.regs.set_a(1, 0x0300);
            cpu.step(&mut ram).unwrap();
            assert_eq!(
                cpu.regs.pc,
                ORIGIN + 2 + codelen(src) + codelen(dst),
                "MOV.W {src:X},{dst:X}"
            );
        }
    }
}

#[test]
fn divide_by_zero_sets_overflow_only() {
    // DIVU.B #0; DIVU.B #10h
    let (mut cpu, mut ram) = context(&[0x7C, 0xE0, 0x00, 0x7C, 0xE0, 0x10]);
    cpu.regs.set_r(0, 0x0123);
    run(&mut cpu, &mut ram, 1);
    assert!(cpu.regs.flag(FLG_O));
    assert_eq!(cpu.regs.r(0), 0x0123);
    run(&mut cpu, &mut ram, 1);
    assert!(!cpu.regs.flag(FLG_O));
    assert_eq!(cpu.regs.r(0), 0x0312);
}

#[test]
fn signed_byte_multiply_fills_a_word() {
    // MUL.B R1L,R0L
    let (mut cpu, mut ram) = context(&[0x78, 0x20]);
    cpu.regs.set_r(0, 0x00FE);
    cpu.regs.set_r(1, 0x0003);
    run(&mut cpu, &mut ram, 1);
    assert_eq!(cpu.regs.r(0), 0xFFFA);
}

#[test]
fn smovf_copies_the_whole_string() {
    // SMOVF.B
    let (mut cpu, mut ram) = context(&[0x7C, 0xE8]);
    ram.load(0x0100, &[1, 2, 3]).unwrap();
    cpu.regs.set_r(3, 3);
    cpu.regs.set_a(0, 0x0100);
    cpu.regs.set_a(1, 0x0200);
    run(&mut cpu, &mut ram, 1);
    assert_eq!(&ram.as_slice()[0x0200..0x0203], &[1, 2, 3]);
    assert_eq!(cpu.regs.r(3), 0);
    assert_eq!(cpu.regs.a(0), 0x0103);
    assert_eq!(cpu.regs.a(1), 0x0203);
}

#[test]
fn pushm_and_popm_mirror_each_other() {
    // PUSHM R0,R1,FB; POPM R0,R1,FB
    let (mut cpu, mut ram) = context(&[0xEC, 0xC1, 0xED, 0x83]);
    cpu.regs.set_r(0, 1);
    cpu.regs.set_r(1, 2);
    cpu.regs.set_fb(3);
    run(&mut cpu, &mut ram, 1);
    assert_eq!(cpu.regs.isp, 0x07FA);
    cpu.regs.set_r(0, 0);
    cpu.regs.set_r(1, 0);
    cpu.regs.set_fb(0);
    run(&mut cpu, &mut ram, 1);
    assert_eq!(
        (cpu.regs.r(0), cpu.regs.r(1), cpu.regs.fb()),
        (1, 2, 3)
    );
    assert_eq!(cpu.regs.isp, 0x0800);
}

#[test]
fn jump_to_self_is_a_self_loop() {
    let (mut cpu, mut ram) = context(&[0xFE, 0xFF]);
    assert_eq!(cpu.step(&mut ram).unwrap(), Step::SelfLoop);
    assert_eq!(cpu.regs.pc, ORIGIN);
}

#[test]
fn disassembles_operands_and_bytes() {
    let (cpu, mut ram) = context(&[0x73, 0xBF, 0xFC, 0x00, 0x04, 0xF7]);
    let dis = cpu.disassemble(&mut ram, ORIGIN).unwrap();
    assert_eq!(dis.text, "MOV.W -4[FB],0400h");
    assert_eq!(dis.bytes, vec![0x73, 0xBF, 0xFC, 0x00, 0x04]);
    let dis = cpu.disassemble(&mut ram, ORIGIN + 5).unwrap();
    assert_eq!(dis.text, ".byte 0xF7");
}

#[test]
fn registers_round_trip_by_name() {
    let mut cpu = Cpu::default();
    assert!(CpuCore::<Ram>::set_register(&mut cpu, "SB", 0x0400));
    assert!(CpuCore::<Ram>::set_register(&mut cpu, "INTB", 0x1_2345));
    assert!(!CpuCore::<Ram>::set_register(&mut cpu, "R9", 0));
    let regs = CpuCore::<Ram>::registers(&cpu);
    assert!(regs.iter().any(|r| r.name == "SB" && r.value == 0x0400));
    assert!(regs.iter().any(|r| r.name == "INTB" && r.value == 0x1_2345));
}
