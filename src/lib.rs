//! rxevm - a virtual machine for compiled NXT robot programs
//!
//! This library loads RXE program images, builds their dataspace and executes
//! their bytecode one instruction at a time against a pluggable I/O facade.

pub mod analyzer;
pub mod config;
pub mod host;
pub mod runner;
pub mod vm;

// Re-export commonly used types
pub use config::{ClockMode, OutputFormat, RuntimeConfig};
pub use host::{HeadlessIo, IoFacade, ManualClock, SystemClock, TickSource};
pub use runner::{RunError, RunReport, Runner, run_file_with_config};
pub use vm::{ProgramImage, StepOutcome, Vm, VmError, VmStatus};
