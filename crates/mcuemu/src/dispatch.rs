//! The architecture-neutral half of the dispatcher.
//!
//! Each core implements [`CpuCore`]; one call to [`CpuCore::step`] runs
//! `FETCH → DECODE → EXECUTE → INTERRUPT CHECK` for a single instruction.
//! [`run`] loops over steps, consulting breakpoints, until something stops
//! it.

use std::fmt;

use tracing::{error, trace};

use crate::breakpoint::Breakpoints;
use crate::error::{Fault, Result};
use crate::intc::{InterruptController, SourceId};

/// Monotonic count of elapsed cycles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleAccount {
    elapsed: u64,
}

impl CycleAccount {
    pub fn advance(&mut self, cycles: u32) {
        self.elapsed += cycles as u64;
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }
}

/// What a single step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One instruction retired.
    Executed,
    /// The retired instruction was an unconditional jump to itself.
    SelfLoop,
    /// An instruction retired and an interrupt was then taken.
    Interrupted { source: SourceId, vector: u32 },
    /// The core is sleeping and nothing is pending. No instruction ran.
    Idle,
}

/// A snapshot of one architectural register for traces and breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub value: u32,
    /// Display width in hex digits.
    pub digits: u8,
}

impl Register {
    pub fn new(name: &'static str, value: u32, digits: u8) -> Self {
        Self {
            name,
            value,
            digits,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:0width$X}",
            self.name,
            self.value,
            width = self.digits as usize
        )
    }
}

/// One decoded instruction for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembly {
    pub pc: u32,
    pub bytes: Vec<u8>,
    pub text: String,
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self
            .bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        if f.alternate() {
            write!(f, "{:05X}: {:14} {}", self.pc, bytes, self.text)
        } else {
            write!(f, "{:05X}: {}", self.pc, self.text)
        }
    }
}

/// A CPU core driven through the memory context `X`.
pub trait CpuCore<X: ?Sized> {
    /// Execute one instruction, then poll for interrupts.
    fn step(&mut self, ctx: &mut X) -> Result<Step>;

    /// Put the core into its power-on state.
    fn reset(&mut self, ctx: &mut X) -> Result<()>;

    /// The program counter as an address into code space.
    fn pc(&self) -> u32;

    fn cycles(&self) -> u64;

    fn interrupts(&self) -> &InterruptController;

    fn interrupts_mut(&mut self) -> &mut InterruptController;

    /// Decode the instruction at `pc` without executing it.
    fn disassemble(&self, ctx: &mut X, pc: u32) -> Result<Disassembly>;

    fn registers(&self) -> Vec<Register>;

    /// Assign a register by name, returning false for unknown names.
    fn set_register(&mut self, name: &str, value: u32) -> bool;

    /// Make an interrupt source pending.
    fn raise(&mut self, source: SourceId) {
        self.interrupts_mut().raise(source);
    }

    fn acknowledge(&mut self, source: SourceId) {
        self.interrupts_mut().acknowledge(source);
    }
}

/// Limits for [`run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub max_instructions: Option<u64>,
    /// Stop when the core jumps to itself.
    pub stop_on_self_loop: bool,
}

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    InstructionLimit,
    SelfLoop { pc: u32 },
    Breakpoint { pc: u32 },
    /// The core is idle with nothing pending, so nothing can wake it.
    Idle { pc: u32 },
    Fault(Fault),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstructionLimit => write!(f, "instruction limit reached"),
            Self::SelfLoop { pc } => write!(f, "self loop at {pc:#07X}"),
            Self::Breakpoint { pc } => write!(f, "breakpoint at {pc:#07X}"),
            Self::Idle { pc } => write!(f, "idle at {pc:#07X}"),
            Self::Fault(fault) => write!(f, "{fault}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub instructions: u64,
}

/// Step `cpu` until a limit, breakpoint, self loop or fault stops it.
///
/// Faults end the run; whatever the faulting instruction committed before
/// the fault stays committed.
pub fn run<X: ?Sized, C: CpuCore<X>>(
    cpu: &mut C,
    ctx: &mut X,
    breakpoints: &mut Breakpoints<C>,
    options: RunOptions,
) -> RunSummary {
    let mut instructions = 0;
    let reason = loop {
        if options
            .max_instructions
            .is_some_and(|max| instructions >= max)
        {
            break StopReason::InstructionLimit;
        }

        let pc = cpu.pc();
        if breakpoints.run(true, pc, cpu, ctx) {
            break StopReason::Breakpoint { pc };
        }

        let step = match cpu.step(ctx) {
            Ok(step) => step,
            Err(fault) => {
                error!(pc, %fault, "halting");
                break StopReason::Fault(fault);
            }
        };
        trace!(?step, cycles = cpu.cycles(), "step");

        match step {
            Step::Idle => break StopReason::Idle { pc },
            Step::SelfLoop if options.stop_on_self_loop => {
                instructions += 1;
                break StopReason::SelfLoop { pc };
            }
            _ => instructions += 1,
        }

        if breakpoints.run(false, pc, cpu, ctx) {
            break StopReason::Breakpoint { pc };
        }
    };
    RunSummary {
        reason,
        instructions,
    }
}
