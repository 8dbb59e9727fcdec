use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcuemu::breakpoint::{Action, Breakpoints};
use mcuemu::bus::{Ram, Rom};
use mcuemu::{CpuCore, RunOptions, avr, m16c, mcs51, run};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Arch {
    /// 8051 / 8052
    Mcs51,
    /// ATmega328P-style AVR
    Avr,
    /// M16C/60 (M16C/62 vector layout)
    M16c,
}

#[derive(Parser)]
struct Args {
    /// Core to run the image on
    #[arg(short, long, value_enum)]
    arch: Arch,

    /// Raw binary image to load
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// Byte address the image is loaded at
    #[arg(short, long, default_value = "0", value_parser = parse_address)]
    base: u32,

    /// Maximum number of instructions to execute
    #[arg(short, long, default_value = "1000")]
    max_instructions: u64,

    /// Stop at these program counter values (hex with 0x, or decimal)
    #[arg(long = "break", value_parser = parse_address)]
    breakpoints: Vec<u32>,

    /// Raise these interrupt sources by name before running
    #[arg(long)]
    raise: Vec<String>,

    /// Keep going when the program jumps to itself
    #[arg(long)]
    no_stop_on_self_loop: bool,

    /// Trace every instruction and the registers after it
    #[arg(short, long)]
    trace: bool,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("bad address {s:?}: {e}"))
}

/// The image placed at `base` in an otherwise erased code space.
fn code_image(base: u32, image: &[u8]) -> Vec<u8> {
    let mut code = vec![0xFF; base as usize];
    code.extend_from_slice(image);
    code
}

fn execute<X, C: CpuCore<X>>(cpu: &mut C, ctx: &mut X, args: &Args) -> Result<()> {
    cpu.reset(ctx).context("reset failed")?;

    for name in &args.raise {
        let Some(source) = cpu.interrupts().find(name) else {
            bail!("no interrupt source named {name:?}");
        };
        cpu.raise(source);
    }

    let mut breakpoints = Breakpoints::new();
    breakpoints.trace_all(args.trace);
    for &addr in &args.breakpoints {
        breakpoints.add(true, addr, Action::TraceRegisters);
        breakpoints.add(true, addr, Action::Stop);
    }

    let options = RunOptions {
        max_instructions: Some(args.max_instructions),
        stop_on_self_loop: !args.no_stop_on_self_loop,
    };
    let summary = run(cpu, ctx, &mut breakpoints, options);

    println!(
        "{} after {} instructions, {} cycles",
        summary.reason,
        summary.instructions,
        cpu.cycles()
    );
    let regs = cpu
        .registers()
        .iter()
        .map(|reg| reg.to_string())
        .collect::<Vec<_>>()
        .join("  ");
    println!("  {regs}");
    Ok(())
}

pub fn main() -> Result<()> {
    let args = Args::parse();

    let default = if args.trace { "trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    let image = fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;
    info!(
        image = %args.image.display(),
        bytes = image.len(),
        base = args.base,
        arch = ?args.arch,
        "loaded"
    );

    match args.arch {
        Arch::Mcs51 => {
            if args.base as usize + image.len() > 0x10000 {
                bail!("image does not fit in 64 KiB of code space");
            }
            let mut cpu = mcs51::Cpu::default();
            let mut ctx = (
                mcs51::SfrBank::default(),
                Ram::new(0x10000),
                Rom::new(code_image(args.base, &image)),
            );
            execute(&mut cpu, &mut ctx, &args)
        }
        Arch::Avr => {
            if args.base as usize + image.len() > 0x20000 {
                bail!("image does not fit in 128 KiB of flash");
            }
            let mut cpu = avr::Cpu::default();
            let mut ctx = (Rom::new(code_image(args.base, &image)), Ram::new(0x900));
            execute(&mut cpu, &mut ctx, &args)
        }
        Arch::M16c => {
            let mut ram = Ram::new(0x10_0000);
            ram.load(args.base, &image)
                .context("image does not fit in the 1 MiB address space")?;
            let mut cpu = m16c::Cpu::default();
            execute(&mut cpu, &mut ram, &args)
        }
    }
}
