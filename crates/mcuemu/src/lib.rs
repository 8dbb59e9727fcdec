pub mod alu;
pub mod avr;
pub mod breakpoint;
pub mod bus;
pub mod dispatch;
pub mod error;
pub mod intc;
pub mod m16c;
pub mod mcs51;
mod regs;

pub use bus::{Bus, Ram, Rom, Width};
pub use dispatch::{CpuCore, RunOptions, RunSummary, Step, StopReason, run};
pub use error::{BusFault, Fault};
pub use intc::{InterruptController, SourceId};
