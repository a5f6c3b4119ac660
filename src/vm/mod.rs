pub mod asm;
mod decode;
mod image;
mod memory;
mod ops;
pub mod syscall;
mod types;
#[allow(clippy::module_inception)]
mod vm;

pub use decode::{Instruction, decode};
pub use image::{
    Clump, DataspaceHeader, FLAG_ZERO_DEFAULT, FORMAT_STRING, ImageError, NOT_A_DS_ID,
    ProgramImage, TocEntry,
};
pub use memory::{
    ArrayValue, DOPE_VECTOR_SIZE, DopeVector, Memory, MemoryError, MemorySnapshot, ScalarValue,
};
pub use ops::{CompareMode, Opcode};
pub use syscall::{ParamCluster, SyscallRequest};
pub use types::SlotType;
pub use vm::{
    Diagnostic, DiagnosticKind, ExecutionState, StepOutcome, Vm, VmError, VmStatus,
};
