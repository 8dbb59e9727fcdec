use super::*;
use crate::bus::{Ram, Rom};
use crate::error::Fault;

fn context(words: &[u16]) -> (Rom, Ram) {
    let bytes = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    (Rom::new(bytes), Ram::new(0x900))
}

fn run(cpu: &mut Cpu, ctx: &mut (Rom, Ram), steps: usize) {
    for _ in 0..steps {
        cpu.step(ctx).unwrap();
    }
}

#[test]
fn sbc_borrows_through_carry() {
    // LDI r16,0x10; LDI r17,0x01; SEC; SBC r16,r17
    let mut ctx = context(&[0xE100, 0xE011, 0x9408, 0x0B01]);
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 4);
    assert_eq!(cpu.reg(16), 0x0E);
    assert!(!cpu.flag(SREG_C));
    assert!(cpu.flag(SREG_H));
    assert!(!cpu.flag(SREG_Z));
    assert_eq!(cpu.pc, 4);
}

#[test]
fn cpc_never_sets_zero() {
    // LDI r16,5; LDI r17,5; CLZ; CPC r16,r17; CP r16,r17
    let mut ctx = context(&[0xE005, 0xE015, 0x9498, 0x0701, 0x1701]);
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 4);
    assert!(!cpu.flag(SREG_Z));
    run(&mut cpu, &mut ctx, 1);
    assert!(cpu.flag(SREG_Z));
}

#[test]
fn sign_is_n_xor_v() {
    // LDI r16,0x7F; LDI r17,0x01; ADD r16,r17
    let mut ctx = context(&[0xE70F, 0xE011, 0x0F01]);
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 3);
    assert_eq!(cpu.reg(16), 0x80);
    assert!(cpu.flag(SREG_N));
    assert!(cpu.flag(SREG_V));
    assert!(!cpu.flag(SREG_S));
    assert!(cpu.flag(SREG_H));
}

#[test]
fn call_pushes_high_byte_at_lower_address() {
    // CALL 0x0010; ... 0x0010: RET
    let mut program = vec![0x940E, 0x0010];
    program.resize(0x10, 0x0000);
    program.push(0x9508);
    let mut ctx = context(&program);
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 1);
    assert_eq!(cpu.pc, 0x0010);
    assert_eq!(cpu.sp(), 0x08FD);
    assert_eq!(ctx.1.as_slice()[0x08FF], 0x02);
    assert_eq!(ctx.1.as_slice()[0x08FE], 0x00);
    assert_eq!(CpuCore::<(Rom, Ram)>::cycles(&cpu), 4);
    run(&mut cpu, &mut ctx, 1);
    assert_eq!(cpu.pc, 0x0002);
    assert_eq!(cpu.sp(), 0x08FF);
}

#[test]
fn core_registers_are_memory_mapped() {
    // LDI r16,0x80; OUT SREG,r16; IN r17,SPL
    let mut ctx = context(&[0xE800, 0xBF0F, 0xB71D]);
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 3);
    assert!(cpu.flag(SREG_I));
    assert_eq!(cpu.reg(17), 0xFF);
}

#[test]
fn ld_post_increments_the_pointer() {
    // LDI r26,0x00; LDI r27,0x01; LD r0,X+
    let mut ctx = context(&[0xE0A0, 0xE0B1, 0x900D]);
    ctx.1.load(0x100, &[0x42]).unwrap();
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 3);
    assert_eq!(cpu.reg(0), 0x42);
    assert_eq!(cpu.pair(26), 0x0101);
}

#[test]
fn overlapping_pointer_update_is_ignored() {
    // LDI r26,0x00; LDI r27,0x01; LD r26,X+
    let mut ctx = context(&[0xE0A0, 0xE0B1, 0x91AD]);
    ctx.1.load(0x100, &[0x42]).unwrap();
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 3);
    assert_eq!(cpu.pair(26), 0x0100);
    assert_eq!(cpu.pc, 3);
}

#[test]
fn skips_cover_two_word_instructions() {
    // LDI r16,1; SBRS r16,0; LDS r17,0x0100; NOP
    let mut ctx = context(&[0xE001, 0xFF00, 0x9110, 0x0100, 0x0000]);
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 2);
    assert_eq!(cpu.pc, 4);
    assert_eq!(CpuCore::<(Rom, Ram)>::cycles(&cpu), 4);
}

#[test]
fn mul_writes_r1_r0() {
    // LDI r16,200; LDI r17,2; MUL r16,r17
    let mut ctx = context(&[0xEC08, 0xE012, 0x9F01]);
    let mut cpu = Cpu::default();
    run(&mut cpu, &mut ctx, 3);
    assert_eq!(cpu.pair(0), 400);
    assert!(!cpu.flag(SREG_C));
    assert!(!cpu.flag(SREG_Z));
}

#[test]
fn undefined_opcode_halts() {
    let mut ctx = context(&[0xFFFF]);
    let mut cpu = Cpu::default();
    assert_eq!(
        cpu.step(&mut ctx).unwrap_err(),
        Fault::UndefinedOpcode {
            pc: 0,
            opcode: 0xFFFF
        }
    );
}

#[test]
fn sei_holds_off_one_instruction() {
    // 0000: RJMP 0004
    // 0002: RETI               (INT0)
    // 0004: SEI; NOP; RJMP .-2
    let mut ctx = context(&[0xC003, 0x0000, 0x9518, 0x0000, 0x9478, 0x0000, 0xCFFF]);
    let mut cpu = Cpu::default();
    let int0 = cpu.source("INT0").unwrap();
    cpu.enable(int0, true);
    cpu.raise(int0);

    // RJMP and SEI retire without taking the pending interrupt.
    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Executed);
    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Executed);
    assert_eq!(cpu.pc, 5);

    let step = cpu.step(&mut ctx).unwrap();
    assert_eq!(step, Step::Interrupted { source: int0, vector: 2 });
    assert!(!cpu.flag(SREG_I));
    assert_eq!(ctx.1.as_slice()[0x08FF], 0x06);

    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Executed);
    assert_eq!(cpu.pc, 6);
    assert!(cpu.flag(SREG_I));
    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::SelfLoop);
}

#[test]
fn sleep_idles_until_an_interrupt_is_pending() {
    // 0000: RJMP 0004
    // 0002: RETI               (INT0)
    // 0004: SEI; SLEEP; RJMP .-2
    let mut ctx = context(&[0xC003, 0x0000, 0x9518, 0x0000, 0x9478, 0x9588, 0xCFFF]);
    let mut cpu = Cpu::default();
    let int0 = cpu.source("INT0").unwrap();
    cpu.enable(int0, true);
    run(&mut cpu, &mut ctx, 3);
    assert!(cpu.is_sleeping());
    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Idle);
    assert_eq!(cpu.pc, 6);

    cpu.raise(int0);
    let step = cpu.step(&mut ctx).unwrap();
    assert_eq!(step, Step::Interrupted { source: int0, vector: 2 });
    assert!(!cpu.is_sleeping());
    run(&mut cpu, &mut ctx, 1);
    assert_eq!(cpu.pc, 6);
}

#[test]
fn sleep_with_interrupts_masked_never_wakes() {
    // SLEEP; NOP
    let mut ctx = context(&[0x9588, 0x0000]);
    let mut cpu = Cpu::default();
    let int0 = cpu.source("INT0").unwrap();
    cpu.enable(int0, true);
    run(&mut cpu, &mut ctx, 1);
    assert!(cpu.is_sleeping());

    cpu.raise(int0);
    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Idle);
    assert_eq!(cpu.step(&mut ctx).unwrap(), Step::Idle);
    assert!(cpu.is_sleeping());
    assert_eq!(cpu.pc, 1);
    assert!(cpu.interrupts().sources()[int0].is_pending());
}

#[test]
fn disabled_sources_stay_pending() {
    // SEI; NOP; NOP
    let mut ctx = context(&[0x9478, 0x0000, 0x0000]);
    let mut cpu = Cpu::default();
    let adc = cpu.source("ADC").unwrap();
    cpu.raise(adc);
    run(&mut cpu, &mut ctx, 3);
    assert_eq!(cpu.pc, 3);
    assert!(cpu.interrupts().sources()[adc].is_pending());
}

#[test]
fn registers_round_trip_by_name() {
    let mut cpu = Cpu::default();
    assert!(CpuCore::<(Rom, Ram)>::set_register(&mut cpu, "Z", 0x1234));
    assert_eq!(cpu.reg(30), 0x34);
    assert_eq!(cpu.reg(31), 0x12);
    assert!(CpuCore::<(Rom, Ram)>::set_register(&mut cpu, "R5", 0xAA));
    assert!(!CpuCore::<(Rom, Ram)>::set_register(&mut cpu, "R32", 0));
    let regs = CpuCore::<(Rom, Ram)>::registers(&cpu);
    assert!(regs.iter().any(|r| r.name == "R5" && r.value == 0xAA));
}

#[test]
fn disassembles_word_addresses() {
    let mut ctx = context(&[0x940E, 0x0010, 0x9478]);
    let cpu = Cpu::default();
    let dis = cpu.disassemble(&mut ctx, 0).unwrap();
    assert_eq!(dis.text, "CALL 0x20");
    assert_eq!(dis.bytes, vec![0x0E, 0x94, 0x10, 0x00]);
    assert_eq!(cpu.disassemble(&mut ctx, 2).unwrap().text, "SEI");
}
