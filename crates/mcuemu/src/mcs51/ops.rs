//! The 8051 instruction table.
//!
//! Each `OP` line is `OP(machine cycles) "mnemonic" first-opcode [- field
//! mask] operand-bytes [, derived = (expr)] => { body }`. The body is written
//! in the `op_def!` DSL: `A`, `B`, `PC`, `DPTR`, `C`, `OV` and `AC` are
//! registers, `SPACE[index]` is a memory access, and upper-case calls are
//! core intrinsics.
//!
//! Spaces: `DATA` (direct), `IDATA` (indirect), `R` (current bank), `BIT`,
//! `CODE`, `XDATA`, plus `LDATA`/`LBIT`, which read port latches instead of
//! pins and mark read-modify-write instructions.

use mcuemu_proc_macro::op_def;

use crate::alu::{self, FLAG_TABLE, OpSize};
use crate::bus::Bus;
use crate::error::{Fault, Result};
use crate::regs::{Reg8, Reg16, U16Equivalent};

use super::sfr::*;
use super::{Cpu, PortMapper};

/// Marks opcodes with no table row.
const UNDEFINED: u16 = 0x100;

struct Context<'a, P: PortMapper, X: Bus, C: Bus> {
    cpu: &'a mut Cpu,
    ports: &'a mut P,
    xdata: &'a mut X,
    code: &'a mut C,
}

/// Disassembly operand type for an operand byte, picked by its name.
macro_rules! operand_type {
    (direct) => { Direct };
    (src) => { Direct };
    (dst) => { Direct };
    (bit) => { Bit };
    ($other:ident) => { Reg8 };
}

// Helper macros for the proc macro to use
macro_rules! op_def_read {
    ($ctx:ident, A) => {
        Reg8($ctx.cpu.a)
    };
    ($ctx:ident, B) => {
        Reg8($ctx.cpu.b)
    };
    ($ctx:ident, PC) => {
        Reg16($ctx.cpu.pc)
    };
    ($ctx:ident, DPTR) => {
        Reg16($ctx.cpu.dptr())
    };
    ($ctx:ident, C) => {
        $ctx.cpu.psw_bit(PSW_C)
    };
    ($ctx:ident, OV) => {
        $ctx.cpu.psw_bit(PSW_OV)
    };
    ($ctx:ident, AC) => {
        $ctx.cpu.psw_bit(PSW_AC)
    };
    ($ctx:ident, BIT, $index:expr) => {{
        let index = $index.to_u8().0;
        $ctx.cpu.read_bit(index, $ctx.ports)
    }};
    ($ctx:ident, LBIT, $index:expr) => {{
        let index = $index.to_u8().0;
        $ctx.cpu.read_bit_latched(index, $ctx.ports)
    }};
    ($ctx:ident, DATA, $index:expr) => {{
        let index = $index.to_u8().0;
        Reg8($ctx.cpu.read_direct(index, $ctx.ports))
    }};
    ($ctx:ident, LDATA, $index:expr) => {{
        let index = $index.to_u8().0;
        Reg8($ctx.cpu.read_direct_latched(index, $ctx.ports))
    }};
    ($ctx:ident, IDATA, $index:expr) => {{
        let index = $index.to_u8().0;
        Reg8($ctx.cpu.read_indirect(index))
    }};
    ($ctx:ident, R, $index:expr) => {
        Reg8($ctx.cpu.r($index.to_u8().0))
    };
    ($ctx:ident, CODE, $index:expr) => {
        Reg8($ctx.code.read8($index.to_u16() as u32)?)
    };
    ($ctx:ident, XDATA, $index:expr) => {
        Reg8($ctx.xdata.read8($index.to_u16() as u32)?)
    };
}

// Values are bound before the core is borrowed: reading a bit or a direct
// address takes `&mut Cpu` too.
macro_rules! op_def_write {
    ($ctx:ident, A, $value:expr) => {{
        let value = $value.to_u8().0;
        $ctx.cpu.a = value;
    }};
    ($ctx:ident, B, $value:expr) => {{
        let value = $value.to_u8().0;
        $ctx.cpu.b = value;
    }};
    ($ctx:ident, PC, $value:expr) => {{
        let value = $value.to_u16();
        $ctx.cpu.pc = value;
    }};
    ($ctx:ident, DPTR, $value:expr) => {{
        let value = $value.to_u16();
        $ctx.cpu.dptr_set(value);
    }};
    ($ctx:ident, C, $value:expr) => {{
        let value = $value;
        $ctx.cpu.psw_set(PSW_C, value);
    }};
    ($ctx:ident, OV, $value:expr) => {{
        let value = $value;
        $ctx.cpu.psw_set(PSW_OV, value);
    }};
    ($ctx:ident, AC, $value:expr) => {{
        let value = $value;
        $ctx.cpu.psw_set(PSW_AC, value);
    }};
    ($ctx:ident, BIT, $index:expr, $value:expr) => {{
        let index = $index.to_u8().0;
        let value = $value;
        $ctx.cpu.write_bit(index, value, $ctx.ports)
    }};
    ($ctx:ident, LBIT, $index:expr, $value:expr) => {{
        let index = $index.to_u8().0;
        let value = $value;
        $ctx.cpu.write_bit(index, value, $ctx.ports)
    }};
    ($ctx:ident, DATA, $index:expr, $value:expr) => {{
        let index = $index.to_u8().0;
        let value = $value.to_u8().0;
        $ctx.cpu.write_direct(index, value, $ctx.ports)
    }};
    ($ctx:ident, LDATA, $index:expr, $value:expr) => {{
        let index = $index.to_u8().0;
        let value = $value.to_u8().0;
        $ctx.cpu.write_direct(index, value, $ctx.ports)
    }};
    ($ctx:ident, IDATA, $index:expr, $value:expr) => {{
        let index = $index.to_u8().0;
        let value = $value.to_u8().0;
        $ctx.cpu.write_indirect(index, value)
    }};
    ($ctx:ident, R, $index:expr, $value:expr) => {{
        let index = $index.to_u8().0;
        let value = $value.to_u8().0;
        *$ctx.cpu.r_mut(index) = value
    }};
    ($ctx:ident, CODE, $index:expr, $value:expr) => {
        compile_error!("CODE cannot be written")
    };
    ($ctx:ident, XDATA, $index:expr, $value:expr) => {{
        let addr = $index.to_u16() as u32;
        let value = $value.to_u8().0;
        $ctx.xdata.write8(addr, value)?
    }};
}

macro_rules! op_def_call {
    ($ctx:ident, POP()) => {
        Reg8($ctx.cpu.pop_stack())
    };
    ($ctx:ident, POP16()) => {
        Reg16($ctx.cpu.pop_stack16())
    };
    ($ctx:ident, PUSH($value:expr)) => {{
        let value = U16Equivalent::to_u16($value) as u8;
        $ctx.cpu.push_stack(value)
    }};
    ($ctx:ident, PUSH16($value:expr)) => {{
        let value = U16Equivalent::to_u16($value);
        $ctx.cpu.push_stack16(value)
    }};
    ($ctx:ident, RETI_DONE()) => {
        $ctx.cpu.reti()
    };
    ($ctx:ident, SEXT($value:expr)) => {
        U16Equivalent::sext($value)
    };
    ($ctx:ident, PAGE($value:expr)) => {{
        let value = U16Equivalent::to_u16($value);
        $ctx.cpu.page($ctx.ports, value)
    }};
}

macro_rules! op {
    (
        $(
            OP($cycles:literal) $name:literal $start:literal $(- $mask:ident $mask_pattern:literal)? $($arg:ident)* $(, $arg_mask:ident = $arg_mask_expr:tt)? => $stmt:tt ;
        )*
    ) => {
        /// Opcode to the first opcode of its table row.
        const ROWS: [u16; 256] = {
            let mut rows = [UNDEFINED; 256];
            let mut op = 0;
            while op < 256 {
                let byte = op as u8;
                $(
                    if byte $(& !$mask_pattern)? == $start {
                        rows[op] = $start;
                    }
                )*
                op += 1;
            }
            rows
        };

        pub(super) fn decode(code: &mut impl Bus, pc: u16) -> Result<(Vec<u8>, String)> {
            #![allow(unused)]
            #![allow(non_snake_case)]
            #![allow(unused_parens)]

            let op = Reg8(code.read8(pc as u32)?);
            let mut bytes = vec![op.0];

            match ROWS[op.0 as usize] {
                $(
                    $start => {
                        $(let $mask = op & $mask_pattern;)?
                        let mut next_read = pc.wrapping_add(1);
                        $(
                            let b = code.read8(next_read as u32)?;
                            let $arg: operand_type!($arg) = b.into();
                            next_read = next_read.wrapping_add(1);
                            bytes.push(b);
                        )*
                        $(op_def!(__no_cpu {let $arg_mask = $arg_mask_expr;});)?
                        Ok((bytes, format!($name)))
                    }
                )*
                _ => Ok((bytes, "???".to_string())),
            }
        }

        /// Execute the instruction at PC, returning its machine cycles.
        pub(super) fn execute<P: PortMapper, X: Bus, C: Bus>(
            cpu: &mut Cpu,
            ports: &mut P,
            xdata: &mut X,
            code: &mut C,
        ) -> Result<u8> {
            #![allow(non_snake_case)]
            #![allow(redundant_semicolons)]
            #![allow(unused_assignments)]
            #![allow(unused_parens)]

            let mut ctx = Context {
                cpu,
                ports,
                xdata,
                code,
            };

            let pc = ctx.cpu.pc;
            let op = Reg8(ctx.code.read8(pc as u32)?);

            match ROWS[op.0 as usize] {
                $(
                    $start => {
                        $(let $mask = op & $mask_pattern;)?
                        #[allow(unused)]
                        let mut next_read = pc.wrapping_add(1);
                        $(
                            let $arg = Reg8(ctx.code.read8(next_read as u32)?);
                            next_read = next_read.wrapping_add(1);
                        )*
                        $(op_def!(__no_cpu {let $arg_mask = $arg_mask_expr;});)?
                        op_def!(ctx $stmt);
                        Ok($cycles)
                    }
                )*
                _ => Err(Fault::UndefinedOpcode {
                    pc: pc as u32,
                    opcode: op.0 as u16,
                }),
            }
        }
    };
}

op! {
    OP(2) "AJMP {imm11:03X}h" 0b00000001 - mask 0b11100000 imm8, imm11 = (mask<<3|imm8) => { PC=((PC+2)&0xF800)|imm11; };
    OP(2) "ACALL {imm11:03X}h" 0b00010001 - mask 0b11100000 imm8, imm11 = (mask<<3|imm8) => { PUSH16(PC+2); PC=((PC+2)&0xF800)|imm11; };

    // Control flow
    OP(1) "NOP" 0b00000000 => {PC+=1};
    OP(2) "LJMP {addr16:04X}h" 0b00000010 imm_hi imm_lo, addr16 = (imm_hi<<8|imm_lo) => {PC=addr16};
    OP(2) "LCALL {addr16:04X}h" 0b00010010 imm_hi imm_lo, addr16 = (imm_hi<<8|imm_lo) => {PUSH16(PC+3); PC=addr16};
    OP(2) "JC {rel:+}" 0b01000000 rel, rel=(SEXT(rel)) => {if (C) {PC=PC+2+rel} else {PC+=2}};
    OP(2) "JNC {rel:+}" 0b01010000 rel, rel=(SEXT(rel)) => {if (!C) {PC=PC+2+rel} else {PC+=2}};
    OP(2) "JZ {rel:+}" 0b01100000 rel, rel=(SEXT(rel)) => {if (A==0) {PC=PC+2+rel} else {PC+=2}};
    OP(2) "JNZ {rel:+}" 0b01110000 rel, rel=(SEXT(rel)) => {if (A!=0) {PC=PC+2+rel} else {PC+=2}};
    OP(2) "SJMP {rel:+}" 0b10000000 rel, rel=(SEXT(rel)) => {PC=PC+2+rel};
    OP(2) "RET" 0b00100010 => {PC=POP16()};
    OP(2) "RETI" 0b00110010 => {PC=POP16(); RETI_DONE()};
    OP(2) "JMP @A+DPTR" 0b01110011 => {PC=DPTR+A};
    OP(2) "JB {bit},{rel:+}" 0b00100000 bit rel, rel=(SEXT(rel)) => {if (BIT[bit]) {PC=PC+3+rel} else {PC+=3}};
    OP(2) "JNB {bit},{rel:+}" 0b00110000 bit rel, rel=(SEXT(rel)) => {if (!BIT[bit]) {PC=PC+3+rel} else {PC+=3}};
    OP(2) "JBC {bit},{rel:+}" 0b00010000 bit rel, rel=(SEXT(rel)) => {if (LBIT[bit]) {LBIT[bit]=false; PC=PC+3+rel} else {PC+=3}};

    // Decrement/compare and jump
    OP(2) "DJNZ {direct},{rel:+}" 0b11010101 direct rel, rel=(SEXT(rel)) => {let tmp=LDATA[direct]-1; LDATA[direct]=tmp; if (tmp!=0) {PC=PC+3+rel} else {PC+=3}};
    OP(2) "DJNZ R{x},{rel:+}" 0b11011000 - x 0b111 rel, rel=(SEXT(rel)) => {let tmp=R[x]-1; R[x]=tmp; if (tmp!=0) {PC=PC+2+rel} else {PC+=2}};
    OP(2) "CJNE A,{direct},{rel:+}" 0b10110101 direct rel, rel=(SEXT(rel)) => {let tmp=DATA[direct]; C=A<tmp; if (A!=tmp) {PC=PC+3+rel} else {PC+=3}};
    OP(2) "CJNE @R{x},#{imm8:02X}h,{rel:+}" 0b10110110 - x 0b1 imm8 rel, rel=(SEXT(rel)) => {let tmp=IDATA[R[x]]; C=tmp<imm8; if (tmp!=imm8) {PC=PC+3+rel} else {PC+=3}};
    OP(2) "CJNE R{x},#{imm8:02X}h,{rel:+}" 0b10111000 - x 0b111 imm8 rel, rel=(SEXT(rel)) => {C=R[x]<imm8; if (R[x]!=imm8) {PC=PC+3+rel} else {PC+=3}};
    OP(2) "CJNE A,#{imm8:02X}h,{rel:+}" 0b10110100 imm8 rel, rel=(SEXT(rel)) => {C=A<imm8; if (A!=imm8) {PC=PC+3+rel} else {PC+=3}};

    // DPTR / MOVX / MOVC
    OP(2) "MOV DPTR,#{imm16:04X}h" 0b10010000 imm_hi imm_lo, imm16 = (imm_hi<<8|imm_lo) => {DPTR=imm16; PC+=3};
    OP(2) "INC DPTR" 0b10100011 => {DPTR+=1; PC+=1};
    OP(2) "MOVX @DPTR,A" 0b11110000 => {XDATA[DPTR]=A; PC+=1};
    OP(2) "MOVX A,@DPTR" 0b11100000 => {A=XDATA[DPTR]; PC+=1};
    OP(2) "MOVX A,@R{x}" 0b11100010 - x 0b1 => {A=XDATA[PAGE(R[x])]; PC+=1};
    OP(2) "MOVX @R{x},A" 0b11110010 - x 0b1 => {XDATA[PAGE(R[x])]=A; PC+=1};
    OP(2) "MOVC A,@A+DPTR" 0b10010011 => {A=CODE[DPTR+A]; PC+=1};
    OP(2) "MOVC A,@A+PC" 0b10000011 => {A=CODE[PC+1+A]; PC+=1};

    // Accumulator and arithmetic
    OP(1) "CLR A" 0b11100100 => {A=0; PC+=1};
    OP(1) "CPL A" 0b11110100 => {A=!A; PC+=1};

    OP(1) "INC A" 0b00000100 => {A=A+1; PC+=1};
    OP(1) "INC {direct}" 0b00000101 direct => {LDATA[direct]+=1; PC+=2};
    OP(1) "INC @R{x}" 0b00000110 - x 0b1 => {IDATA[R[x]]+=1; PC+=1};
    OP(1) "INC R{x}" 0b00001000 - x 0b111 => {R[x]+=1; PC+=1};

    OP(1) "DEC A" 0b00010100 => {A=A-1; PC+=1};
    OP(1) "DEC {direct}" 0b00010101 direct => {LDATA[direct]-=1; PC+=2};
    OP(1) "DEC @R{x}" 0b00010110 - x 0b1 => {IDATA[R[x]]-=1; PC+=1};
    OP(1) "DEC R{x}" 0b00011000 - x 0b111 => {R[x]-=1; PC+=1};

    OP(4) "MUL AB" 0b10100100 => {(A, B, C, OV) = mul(A, B); PC+=1};
    OP(4) "DIV AB" 0b10000100 => {(A, B, C, OV) = div(A, B); PC+=1};

    OP(1) "ADD A,#{imm8:02X}h" 0b00100100 imm8 => {(A, C, OV, AC) = add(A, imm8, false); PC+=2};
    OP(1) "ADD A,{direct}" 0b00100101 direct => {(A, C, OV, AC) = add(A, DATA[direct], false); PC+=2};
    OP(1) "ADD A,@R{x}" 0b00100110 - x 0b1 => {(A, C, OV, AC) = add(A, IDATA[R[x]], false); PC+=1};
    OP(1) "ADD A,R{x}" 0b00101000 - x 0b111 => {(A, C, OV, AC) = add(A, R[x], false); PC+=1};

    OP(1) "ADDC A,#{imm8:02X}h" 0b00110100 imm8 => {(A, C, OV, AC) = add(A, imm8, C); PC+=2};
    OP(1) "ADDC A,{direct}" 0b00110101 direct => {(A, C, OV, AC) = add(A, DATA[direct], C); PC+=2};
    OP(1) "ADDC A,@R{x}" 0b00110110 - x 0b1 => {(A, C, OV, AC) = add(A, IDATA[R[x]], C); PC+=1};
    OP(1) "ADDC A,R{x}" 0b00111000 - x 0b111 => {(A, C, OV, AC) = add(A, R[x], C); PC+=1};

    OP(1) "SUBB A,#{imm8:02X}h" 0b10010100 imm8 => {(A, C, OV, AC) = subb(A, imm8, C); PC+=2};
    OP(1) "SUBB A,{direct}" 0b10010101 direct => {(A, C, OV, AC) = subb(A, DATA[direct], C); PC+=2};
    OP(1) "SUBB A,@R{x}" 0b10010110 - x 0b1 => {(A, C, OV, AC) = subb(A, IDATA[R[x]], C); PC+=1};
    OP(1) "SUBB A,R{x}" 0b10011000 - x 0b111 => {(A, C, OV, AC) = subb(A, R[x], C); PC+=1};

    OP(1) "RLC A" 0b00110011 => {(A, C) = rlc(A, C); PC+=1};
    OP(1) "RRC A" 0b00010011 => {(A, C) = rrc(A, C); PC+=1};
    OP(1) "RL A" 0b00100011 => {A = rl(A); PC+=1};
    OP(1) "RR A" 0b00000011 => {A = rr(A); PC+=1};

    OP(1) "ANL A,#{imm8:02X}h"           0b01010100 imm8 => {A=A&imm8; PC+=2};
    OP(1) "ANL A,{direct}"               0b01010101 direct => {A=A&DATA[direct]; PC+=2};
    OP(1) "ANL A,@R{x}"                  0b01010110 - x 0b1 => {A=A&IDATA[R[x]]; PC+=1};
    OP(1) "ANL A,R{x}"                   0b01011000 - x 0b111 => {A=A&R[x]; PC+=1};
    OP(1) "ANL {direct},A"               0b01010010 direct => {LDATA[direct]&=A; PC+=2};
    OP(2) "ANL {direct},#{imm8:02X}h"    0b01010011 direct imm8 => {LDATA[direct]&=imm8; PC+=3};

    OP(1) "ORL A,#{imm8:02X}h"           0b01000100 imm8 => {A=A|imm8; PC+=2};
    OP(1) "ORL A,{direct}"               0b01000101 direct => {A=A|DATA[direct]; PC+=2};
    OP(1) "ORL A,@R{x}"                  0b01000110 - x 0b1 => {A=A|IDATA[R[x]]; PC+=1};
    OP(1) "ORL A,R{x}"                   0b01001000 - x 0b111 => {A=A|R[x]; PC+=1};
    OP(1) "ORL {direct},A"               0b01000010 direct => {LDATA[direct]|=A; PC+=2};
    OP(2) "ORL {direct},#{imm8:02X}h"    0b01000011 direct imm8 => {LDATA[direct]|=imm8; PC+=3};

    OP(1) "XRL A,#{imm8:02X}h"           0b01100100 imm8 => {A=A^imm8; PC+=2};
    OP(1) "XRL A,{direct}"               0b01100101 direct => {A=A^DATA[direct]; PC+=2};
    OP(1) "XRL A,@R{x}"                  0b01100110 - x 0b1 => {A=A^IDATA[R[x]]; PC+=1};
    OP(1) "XRL A,R{x}"                   0b01101000 - x 0b111 => {A=A^R[x]; PC+=1};
    OP(1) "XRL {direct},A"               0b01100010 direct => {LDATA[direct]^=A; PC+=2};
    OP(2) "XRL {direct},#{imm8:02X}h"    0b01100011 direct imm8 => {LDATA[direct]^=imm8; PC+=3};

    OP(1) "DA A" 0b11010100 => {(A, C) = decimal_adjust(A, C, AC); PC+=1};

    // MOV families
    OP(1) "MOV A,#{imm8:02X}h"           0b01110100 imm8 => {A=imm8; PC+=2};
    OP(1) "MOV R{x},#{imm8:02X}h"        0b01111000 - x 0b111 imm8 => {R[x]=imm8; PC+=2};
    OP(1) "MOV @R{x},A"                  0b11110110 - x 0b1 => {IDATA[R[x]]=A; PC+=1};
    OP(1) "MOV A,@R{x}"                  0b11100110 - x 0b1 => {A=IDATA[R[x]]; PC+=1};
    OP(1) "MOV R{x},A"                   0b11111000 - x 0b111 => {R[x]=A; PC+=1};
    OP(1) "MOV A,R{x}"                   0b11101000 - x 0b111 => {A=R[x]; PC+=1};
    OP(1) "MOV {direct},A"               0b11110101 direct => {DATA[direct]=A; PC+=2};
    OP(1) "MOV A,{direct}"               0b11100101 direct => {A=DATA[direct]; PC+=2};
    OP(2) "MOV {direct},#{imm8:02X}h"    0b01110101 direct imm8 => {DATA[direct]=imm8; PC+=3};
    OP(1) "MOV @R{x},#{imm8:02X}h"       0b01110110 - x 0b1 imm8 => {IDATA[R[x]]=imm8; PC+=2};
    OP(2) "MOV {dst},{src}"              0b10000101 src dst => {DATA[dst]=DATA[src]; PC+=3};
    OP(2) "MOV {direct},@R{x}"           0b10000110 - x 0b1 direct => {DATA[direct]=IDATA[R[x]]; PC+=2};
    OP(2) "MOV {direct},R{x}"            0b10001000 - x 0b111 direct => {DATA[direct]=R[x]; PC+=2};
    OP(2) "MOV @R{x},{direct}"           0b10100110 - x 0b1 direct => {IDATA[R[x]]=DATA[direct]; PC+=2};
    OP(2) "MOV R{x},{direct}"            0b10101000 - x 0b111 direct => {R[x]=DATA[direct]; PC+=2};

    // Stack
    OP(2) "PUSH {direct}" 0b11000000 direct => {PUSH(DATA[direct]); PC+=2};
    OP(2) "POP {direct}" 0b11010000 direct => {DATA[direct]=POP(); PC+=2};

    // Carry and bit operations
    OP(1) "CLR C" 0b11000011 => {C=false; PC+=1};
    OP(1) "SETB C" 0b11010011 => {C=true; PC+=1};
    OP(1) "CPL C" 0b10110011 => {C=!C; PC+=1};
    OP(1) "CLR {bit}" 0b11000010 bit => {LBIT[bit]=false; PC+=2};
    OP(1) "SETB {bit}" 0b11010010 bit => {LBIT[bit]=true; PC+=2};
    OP(1) "CPL {bit}" 0b10110010 bit => {LBIT[bit]=!LBIT[bit]; PC+=2};
    OP(1) "MOV C,{bit}" 0b10100010 bit => {C=BIT[bit]; PC+=2};
    OP(2) "MOV {bit},C" 0b10010010 bit => {LBIT[bit]=C; PC+=2};
    OP(2) "ANL C,{bit}" 0b10000010 bit => {C&=BIT[bit]; PC+=2};
    OP(2) "ANL C,/{bit}" 0b10110000 bit => {C&=!BIT[bit]; PC+=2};
    OP(2) "ORL C,{bit}" 0b01110010 bit => {C|=BIT[bit]; PC+=2};
    OP(2) "ORL C,/{bit}" 0b10100000 bit => {C|=!BIT[bit]; PC+=2};

    // Exchange
    OP(1) "SWAP A" 0b11000100 => {A=swap_nibbles(A); PC+=1};
    OP(1) "XCH A,{direct}" 0b11000101 direct => {(A, DATA[direct])=(DATA[direct], A); PC+=2};
    OP(1) "XCH A,@R{x}" 0b11000110 - x 0b1 => {(A, IDATA[R[x]])=(IDATA[R[x]], A); PC+=1};
    OP(1) "XCH A,R{x}" 0b11001000 - x 0b111 => {(A, R[x])=(R[x], A); PC+=1};
    OP(1) "XCHD A,@R{x}" 0b11010110 - x 0b1 => {let tmp=IDATA[R[x]]; let low=A&0x0F; A=(A&0xF0)|(tmp&0x0F); IDATA[R[x]]=(tmp&0xF0)|low; PC+=1};
}

fn swap_nibbles(a: Reg8) -> Reg8 {
    Reg8(a.0.rotate_left(4))
}

/// `DA A`: C can be set by the adjustment but never cleared. AC is left
/// alone.
fn decimal_adjust(a: Reg8, c: bool, ac: bool) -> (Reg8, bool) {
    let mut value = a.0 as u16;
    let mut carry = c;
    if value & 0x0F > 9 || ac {
        value += 0x06;
        carry |= value > 0xFF;
        value &= 0xFF;
    }
    if value >> 4 > 9 || carry {
        value += 0x60;
        carry |= value > 0xFF;
    }
    (Reg8(value as u8), carry)
}

#[inline(always)]
fn add(a: Reg8, b: Reg8, c: bool) -> (Reg8, bool, bool, bool) {
    let out = alu::add(a.0 as u32, b.0 as u32, c, OpSize::Byte);
    let flags = FLAG_TABLE.add_flags(a.0 as u32, b.0 as u32, out.value, OpSize::Byte);
    (Reg8(out.value as u8), flags.carry, flags.overflow, out.flags.half)
}

#[inline(always)]
fn subb(a: Reg8, b: Reg8, c: bool) -> (Reg8, bool, bool, bool) {
    let out = alu::sub_borrow(a.0 as u32, b.0 as u32, c, OpSize::Byte);
    let flags = FLAG_TABLE.sub_flags(a.0 as u32, b.0 as u32, out.value, OpSize::Byte);
    (Reg8(out.value as u8), flags.carry, flags.overflow, out.flags.half)
}

#[inline(always)]
fn mul(a: Reg8, b: Reg8) -> (Reg8, Reg8, bool, bool) {
    let product = a.0 as u16 * b.0 as u16;
    (Reg8(product as u8), Reg8((product >> 8) as u8), false, product > 0xFF)
}

/// Division by zero sets OV and leaves A and B unchanged.
#[inline(always)]
fn div(a: Reg8, b: Reg8) -> (Reg8, Reg8, bool, bool) {
    if b == 0 {
        return (a, b, false, true);
    }
    (Reg8(a.0 / b.0), Reg8(a.0 % b.0), false, false)
}

#[inline(always)]
fn rlc(a: Reg8, c: bool) -> (Reg8, bool) {
    let out = alu::rolc(a.0 as u32, c, OpSize::Byte);
    (Reg8(out.value as u8), out.flags.carry)
}

#[inline(always)]
fn rrc(a: Reg8, c: bool) -> (Reg8, bool) {
    let out = alu::rorc(a.0 as u32, c, OpSize::Byte);
    (Reg8(out.value as u8), out.flags.carry)
}

#[inline(always)]
fn rl(a: Reg8) -> Reg8 {
    Reg8(alu::rol(a.0 as u32, 1, OpSize::Byte).value as u8)
}

#[inline(always)]
fn rr(a: Reg8) -> Reg8 {
    Reg8(alu::ror(a.0 as u32, 1, OpSize::Byte).value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Rom;

    #[test]
    fn every_opcode_but_a5_has_a_row() {
        for op in 0..=0xFFu8 {
            if op == 0xA5 {
                assert_eq!(ROWS[op as usize], UNDEFINED);
            } else {
                assert_ne!(ROWS[op as usize], UNDEFINED, "{op:02X}");
            }
        }
        assert_eq!(ROWS[0xE1], 0x01);
        assert_eq!(ROWS[0xF1], 0x11);
        assert_eq!(ROWS[0x2F], 0x28);
    }

    #[test]
    fn decode_formats_operands() {
        let mut rom = Rom::new(vec![0x02, 0x12, 0x34, 0x53, 0x90, 0x0F, 0xC2, 0xD7]);
        assert_eq!(decode(&mut rom, 0).unwrap().1, "LJMP 1234h");
        let (bytes, text) = decode(&mut rom, 3).unwrap();
        assert_eq!(text, "ANL P1,#0Fh");
        assert_eq!(bytes, vec![0x53, 0x90, 0x0F]);
        assert_eq!(decode(&mut rom, 6).unwrap().1, "CLR PSW.7");

        let mut rom = Rom::new(vec![0x80, 0xFE, 0xA5]);
        assert_eq!(decode(&mut rom, 0).unwrap().1, "SJMP -2");
        assert_eq!(decode(&mut rom, 2).unwrap().1, "???");
    }

    #[test]
    fn op_def_compile_test() {
        #![allow(redundant_semicolons, non_snake_case, unused_parens)]

        fn body() -> Result<()> {
            let mut cpu = Cpu::default();
            let bit = 0;
            let FUNC = |a| a;

            let ctx = Context {
                cpu: &mut cpu,
                ports: &mut (),
                xdata: &mut (),
                code: &mut (),
            };

            op_def!(ctx {
                BIT[bit] = true;
                PC+=2;
                DPTR=10;
                A=DPTR;
                A=SEXT(A);
                let _tmp = SEXT(A);
                PC=POP16();
                A=FUNC(A);
                PC=(PC+1)+1;
                PC += 2;
                (A, B) = (A, B);
                if C {
                    PC += 1;
                } else {
                    PC += 2;
                }
            });
            Ok(())
        }
        body().unwrap();
    }
}
