use std::collections::BTreeMap;

use tracing::{Level, info, warn};

use crate::dispatch::CpuCore;

pub enum Action<C> {
    /// Log a message to the console.
    Log(String),
    /// Set a register to a value.
    Set(String, u32),
    /// Enable or disable tracing of instructions.
    SetTraceInstructions(bool),
    /// Enable or disable automatic tracing of registers.
    SetTraceRegisters(bool),
    /// Trace current instruction.
    TraceInstructions,
    /// Trace the current state of the CPU.
    TraceRegisters,
    /// Stop the run loop.
    Stop,
    /// Run an arbitrary function.
    Run(Box<dyn Fn(&mut C)>),
}

impl<C> Action<C> {
    /// Returns true if the run should stop.
    fn run<X: ?Sized>(&self, cpu: &mut C, state: &mut BreakpointState, ctx: &mut X) -> bool
    where
        C: CpuCore<X>,
    {
        match self {
            Self::Log(message) => info!("[BP] {}", message),
            Self::Set(register, value) => {
                if !cpu.set_register(register, *value) {
                    warn!(register, "[BP] unknown register");
                }
            }
            Self::SetTraceInstructions(value) => state.trace_instructions = *value,
            Self::SetTraceRegisters(value) => state.trace_registers = *value,
            Self::TraceInstructions => match cpu.disassemble(ctx, cpu.pc()) {
                Ok(line) => info!("{line:#}"),
                Err(fault) => warn!(%fault, "[BP] cannot decode"),
            },
            Self::TraceRegisters => {
                if tracing::enabled!(Level::INFO) {
                    let regs = cpu
                        .registers()
                        .iter()
                        .map(|reg| reg.to_string())
                        .collect::<Vec<_>>()
                        .join("  ");
                    info!("  {}", regs);
                }
            }
            Self::Stop => return true,
            Self::Run(func) => func(cpu),
        }
        false
    }
}

#[derive(Default)]
struct BreakpointState {
    trace_instructions: bool,
    trace_registers: bool,
}

/// Actions keyed by program counter, run before or after the instruction
/// at that address.
pub struct Breakpoints<C> {
    breakpoints_before: BTreeMap<u32, Vec<Action<C>>>,
    breakpoints_after: BTreeMap<u32, Vec<Action<C>>>,
    state: BreakpointState,
}

impl<C> Default for Breakpoints<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Breakpoints<C> {
    pub fn new() -> Self {
        Self {
            breakpoints_before: BTreeMap::new(),
            breakpoints_after: BTreeMap::new(),
            state: Default::default(),
        }
    }

    pub fn add(&mut self, before: bool, addr: u32, action: Action<C>) {
        if before {
            self.breakpoints_before
                .entry(addr)
                .or_default()
                .push(action);
        } else {
            self.breakpoints_after.entry(addr).or_default().push(action);
        }
    }

    pub fn remove(&mut self, addr: u32) {
        self.breakpoints_before.remove(&addr);
        self.breakpoints_after.remove(&addr);
    }

    pub fn clear(&mut self) {
        self.breakpoints_before.clear();
        self.breakpoints_after.clear();
    }

    /// Trace everything regardless of breakpoints.
    pub fn trace_all(&mut self, value: bool) {
        self.state.trace_instructions = value;
        self.state.trace_registers = value;
    }

    /// Run the actions attached to the instruction at `pc`. Returns true if
    /// one of them asked to stop.
    pub fn run<X: ?Sized>(&mut self, before: bool, pc: u32, cpu: &mut C, ctx: &mut X) -> bool
    where
        C: CpuCore<X>,
    {
        let actions = if before {
            self.breakpoints_before
                .get(&pc)
                .map(|actions| actions.as_slice())
                .unwrap_or(&[])
        } else {
            self.breakpoints_after
                .get(&pc)
                .map(|actions| actions.as_slice())
                .unwrap_or(&[])
        };
        let mut stop = false;
        for action in actions {
            stop |= action.run(cpu, &mut self.state, ctx);
        }
        if self.state.trace_instructions && before {
            Action::TraceInstructions.run(cpu, &mut self.state, ctx);
        }
        if self.state.trace_registers && !before {
            Action::TraceRegisters.run(cpu, &mut self.state, ctx);
        }
        stop
    }
}
