use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{trace, warn};

use crate::host::{IoFacade, TickSource};

use super::decode::{Instruction, decode};
use super::image::{ImageError, NOT_A_DS_ID, ProgramImage};
use super::memory::{Memory, MemoryError};
use super::ops::{CompareMode, Opcode};
use super::syscall::ParamCluster;
use super::types::SlotType;

// =============================================================================
// Errors and results
// =============================================================================

/// Error raised while executing an instruction.
///
/// Everything except [`VmError::Memory`] halts the machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("program stopped at pc {pc}")]
    Stopped { pc: usize },
    #[error("invalid {} opcode 0x{opcode:02x} at pc {pc}", encoding(.short))]
    InvalidOpcode { pc: usize, opcode: u8, short: bool },
    #[error("invalid compare mode {mode} at pc {pc}")]
    InvalidCompareMode { pc: usize, mode: u8 },
    #[error("malformed instruction at pc {pc}: {reason}")]
    MalformedInstruction { pc: usize, reason: &'static str },
    #[error("branch at pc {pc} targets {target}")]
    InvalidBranchTarget { pc: usize, target: i64 },
    #[error("call to unknown clump {clump} at pc {pc}")]
    InvalidClump { pc: usize, clump: u16 },
    #[error("return without call at pc {pc}")]
    CallStackUnderflow { pc: usize },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

fn encoding(short: &bool) -> &'static str {
    if *short { "short" } else { "long" }
}

impl VmError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VmError::Memory(_))
    }
}

/// Result of one call to [`Vm::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// One instruction ran.
    Executed,
    /// The program counter is past the end of the code. Nothing ran.
    Finished,
    /// A WAIT is still in effect. Nothing ran.
    Waiting { until: u32 },
    /// The machine is halted. Nothing ran.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Ready,
    Waiting,
    Halted,
}

/// Where execution is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionState {
    /// Word index of the next instruction.
    pub pc: usize,
    pub clump: usize,
    /// Return addresses of active SUBCALLs.
    pub call_stack: Vec<usize>,
    /// Tick before which no instruction runs.
    pub resume_at: u32,
}

impl ExecutionState {
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Something the program did that the machine accepted but did not carry out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnsupportedOpcode { opcode: &'static str },
    CompositeMove { dst: SlotType, src: SlotType },
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::UnsupportedOpcode { opcode } => write!(f, "ignored {opcode}"),
            DiagnosticKind::CompositeMove { dst, src } => {
                write!(f, "ignored MOV from {src} to {dst}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Diagnostic {
    pub pc: usize,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

// =============================================================================
// Vm
// =============================================================================

/// The bytecode interpreter for one program.
///
/// Executes at most one instruction per [`Vm::step`]. The host decides when to
/// step and what to do with recoverable errors.
pub struct Vm<H, C> {
    image: Arc<ProgramImage>,
    memory: Memory,
    state: ExecutionState,
    halted: bool,
    io: H,
    clock: C,
    diagnostics: Vec<Diagnostic>,
    seen: HashSet<Diagnostic>,
}

impl<H: IoFacade, C: TickSource> Vm<H, C> {
    pub fn new(image: Arc<ProgramImage>, io: H, clock: C) -> Result<Self, ImageError> {
        let memory = Memory::new(Arc::clone(&image))?;
        let state = initial_state(&image);
        Ok(Self {
            image,
            memory,
            state,
            halted: false,
            io,
            clock,
            diagnostics: Vec::new(),
            seen: HashSet::new(),
        })
    }

    /// Rebuild memory from the image and start over at clump 0.
    pub fn reset(&mut self) -> Result<(), ImageError> {
        self.memory = Memory::new(Arc::clone(&self.image))?;
        self.state = initial_state(&self.image);
        self.halted = false;
        self.diagnostics.clear();
        self.seen.clear();
        Ok(())
    }

    pub fn image(&self) -> &Arc<ProgramImage> {
        &self.image
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn io(&self) -> &H {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut H {
        &mut self.io
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn waiting_until_tick(&self) -> u32 {
        self.state.resume_at
    }

    pub fn is_finished(&self) -> bool {
        self.state.pc >= self.image.code().len()
    }

    pub fn status(&self) -> VmStatus {
        if self.halted {
            VmStatus::Halted
        } else if self.clock.current_tick() < self.state.resume_at {
            VmStatus::Waiting
        } else {
            VmStatus::Ready
        }
    }

    /// Execute the next instruction, if the machine is able to.
    pub fn step(&mut self) -> Result<StepOutcome, VmError> {
        if self.halted {
            return Ok(StepOutcome::Halted);
        }
        if self.is_finished() {
            return Ok(StepOutcome::Finished);
        }
        let until = self.state.resume_at;
        if self.clock.current_tick() < until {
            return Ok(StepOutcome::Waiting { until });
        }

        let image = Arc::clone(&self.image);
        let pc = self.state.pc;
        let inst = match decode(image.code(), pc) {
            Ok(inst) => inst,
            Err(e) => return Err(self.halt(e)),
        };
        self.state.pc += inst.length;
        trace!(pc, op = %inst.opcode, operands = ?inst.operands(), "execute");

        match self.execute(&inst, pc) {
            Ok(()) => Ok(StepOutcome::Executed),
            Err(e) if e.is_fatal() => Err(self.halt(e)),
            Err(e) => Err(e),
        }
    }

    fn halt(&mut self, error: VmError) -> VmError {
        self.halted = true;
        trace!(%error, "halted");
        error
    }

    fn diagnose(&mut self, pc: usize, kind: DiagnosticKind) {
        let diagnostic = Diagnostic { pc, kind };
        if self.seen.insert(diagnostic.clone()) {
            warn!(pc, "{}", diagnostic.kind);
            self.diagnostics.push(diagnostic);
        }
    }

    fn execute(&mut self, inst: &Instruction<'_>, pc: usize) -> Result<(), VmError> {
        let op = |i: usize| inst.operand(i);
        match inst.opcode {
            // Math
            Opcode::Add => self.binary(inst, i32::wrapping_add),
            Opcode::Sub => self.binary(inst, i32::wrapping_sub),
            Opcode::Mul => self.binary(inst, i32::wrapping_mul),
            Opcode::Div => self.binary(inst, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
            Opcode::Mod => self.binary(inst, |a, b| if b == 0 { 0 } else { a.wrapping_rem(b) }),
            Opcode::Neg => self.unary(inst, i32::wrapping_neg),
            Opcode::Abs => self.unary(inst, i32::wrapping_abs),
            Opcode::Sqrt => self.unary(inst, |a| if a < 0 { 0 } else { a.isqrt() }),

            // Logic
            Opcode::And => self.binary(inst, |a, b| a & b),
            Opcode::Or => self.binary(inst, |a, b| a | b),
            Opcode::Xor => self.binary(inst, |a, b| a ^ b),
            Opcode::Not => self.unary(inst, |a| i32::from(a == 0)),

            // Comparison
            Opcode::Cmp => {
                let mode = compare_mode(inst.flags, pc)?;
                let a = self.scalar(op(1))?;
                let b = self.scalar(op(2))?;
                self.set_scalar(op(0), i32::from(mode.apply(a, b)))
            }
            Opcode::Tst => {
                let mode = compare_mode(inst.flags, pc)?;
                let a = self.scalar(op(1))?;
                self.set_scalar(op(0), i32::from(mode.apply(a, 0)))
            }

            // Data manipulation
            Opcode::Index => self.op_index(inst),
            Opcode::Replace => self.op_replace(inst),
            Opcode::ArrSize => {
                let len = self.memory.array_len(op(1) as usize)?;
                self.set_scalar(op(0), len as i32)
            }
            Opcode::ArrBuild => self.op_arrbuild(inst),
            Opcode::ArrSubset => self.op_arrsubset(inst),
            Opcode::ArrInit => self.op_arrinit(inst),
            Opcode::Mov => self.op_mov(inst, pc),
            Opcode::Set => self.set_scalar(op(0), i32::from(op(1))),
            Opcode::Flatten
            | Opcode::Unflatten
            | Opcode::NumToString
            | Opcode::StringToNum
            | Opcode::StrCat
            | Opcode::StrSubset
            | Opcode::StrToByteArr
            | Opcode::ByteArrToStr => {
                self.diagnose(
                    pc,
                    DiagnosticKind::UnsupportedOpcode {
                        opcode: inst.opcode.name(),
                    },
                );
                Ok(())
            }

            // Control flow
            Opcode::Jmp => self.branch(pc, op(0)),
            Opcode::BrCmp => {
                let mode = compare_mode(inst.flags, pc)?;
                let a = self.scalar(op(1))?;
                let b = self.scalar(op(2))?;
                if mode.apply(a, b) {
                    self.branch(pc, op(0))?;
                }
                Ok(())
            }
            Opcode::BrTst => {
                let mode = compare_mode(inst.flags, pc)?;
                let a = self.scalar(op(1))?;
                if mode.apply(a, 0) {
                    self.branch(pc, op(0))?;
                }
                Ok(())
            }
            Opcode::Stop => Err(VmError::Stopped { pc }),
            // Clumps run one at a time, so scheduling and locking have nothing to do.
            Opcode::FinClump | Opcode::FinClumpImmed | Opcode::Acquire | Opcode::Release => {
                trace!(pc, op = %inst.opcode, "no effect");
                Ok(())
            }
            Opcode::SubCall => self.op_subcall(inst, pc),
            Opcode::SubRet => self.op_subret(inst, pc),

            // System I/O
            Opcode::Syscall => {
                let mut cluster = ParamCluster::new(&mut self.memory, op(1) as usize);
                self.io.syscall(op(0), &mut cluster)?;
                Ok(())
            }
            Opcode::SetIn => {
                let value = self.scalar(op(0))?;
                let port = self.scalar(op(1))?;
                self.io.set_input_config(port, op(2), value);
                Ok(())
            }
            Opcode::SetOut => self.op_setout(inst),
            Opcode::GetIn => {
                let port = self.scalar(op(1))?;
                let value = self.io.input_config(port, op(2));
                self.set_scalar(op(0), value)
            }
            Opcode::GetOut => {
                let port = self.scalar(op(1))?;
                let value = self.io.output_config(port, op(2));
                self.set_scalar(op(0), value)
            }
            Opcode::Wait => {
                let duration = self.scalar(op(1))?.max(0) as u32;
                self.state.resume_at = self.clock.current_tick().saturating_add(duration);
                Ok(())
            }
            Opcode::GetTick => {
                let tick = self.clock.current_tick();
                self.set_scalar(op(0), tick as i32)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Operand helpers
    // -------------------------------------------------------------------------

    fn scalar(&self, entry: u16) -> Result<i32, VmError> {
        Ok(self.memory.scalar(entry as usize)?)
    }

    fn set_scalar(&mut self, entry: u16, value: i32) -> Result<(), VmError> {
        Ok(self.memory.set_scalar(entry as usize, value)?)
    }

    /// Read an index or count operand. `NOT_A_DS_ID` selects `default`.
    fn index_operand(&self, entry: u16, default: usize) -> Result<usize, VmError> {
        if entry == NOT_A_DS_ID {
            return Ok(default);
        }
        // Negative values behave as huge unsigned ones and fail bounds checks.
        Ok(self.scalar(entry)? as u32 as usize)
    }

    fn unary(&mut self, inst: &Instruction<'_>, f: impl Fn(i32) -> i32) -> Result<(), VmError> {
        let a = self.scalar(inst.operand(1))?;
        self.set_scalar(inst.operand(0), f(a))
    }

    fn binary(
        &mut self,
        inst: &Instruction<'_>,
        f: impl Fn(i32, i32) -> i32,
    ) -> Result<(), VmError> {
        let a = self.scalar(inst.operand(1))?;
        let b = self.scalar(inst.operand(2))?;
        self.set_scalar(inst.operand(0), f(a, b))
    }

    fn branch(&mut self, pc: usize, offset: u16) -> Result<(), VmError> {
        let target = pc as i64 + i64::from(offset as i16);
        if target < 0 {
            return Err(VmError::InvalidBranchTarget { pc, target });
        }
        self.state.pc = target as usize;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Arrays
    // -------------------------------------------------------------------------

    fn op_index(&mut self, inst: &Instruction<'_>) -> Result<(), VmError> {
        let index = self.index_operand(inst.operand(2), 0)?;
        let value = self.memory.array_element(inst.operand(1) as usize, index)?;
        self.set_scalar(inst.operand(0), value)
    }

    fn op_arrbuild(&mut self, inst: &Instruction<'_>) -> Result<(), VmError> {
        let ops = inst.operands();
        let dst = inst.operand(1) as usize;
        let count = (inst.operand(0) as usize / 2).saturating_sub(3);
        let sources = ops.get(2..).unwrap_or_default();
        let sources = &sources[..count.min(sources.len())];

        let values = sources
            .iter()
            .map(|&src| self.scalar(src))
            .collect::<Result<Vec<_>, _>>()?;
        self.memory.set_array_len(dst, values.len())?;
        for (i, value) in values.into_iter().enumerate() {
            self.memory.set_array_element(dst, i, value)?;
        }
        Ok(())
    }

    fn op_arrinit(&mut self, inst: &Instruction<'_>) -> Result<(), VmError> {
        let dst = inst.operand(0) as usize;
        let value = self.scalar(inst.operand(1))?;
        let count = self.index_operand(inst.operand(2), 0)?;
        self.memory.set_array_len(dst, count)?;
        for i in 0..count {
            self.memory.set_array_element(dst, i, value)?;
        }
        Ok(())
    }

    fn op_arrsubset(&mut self, inst: &Instruction<'_>) -> Result<(), VmError> {
        let dst = inst.operand(0) as usize;
        let src = inst.operand(1) as usize;
        let src_len = self.memory.array_len(src)?;
        let start = self.index_operand(inst.operand(2), 0)?.min(src_len);
        let length = self.index_operand(inst.operand(3), usize::MAX)?;
        let end = start + length.min(src_len - start);

        let values = (start..end)
            .map(|i| self.memory.array_element(src, i))
            .collect::<Result<Vec<_>, _>>()?;
        self.memory.set_array_len(dst, values.len())?;
        for (i, value) in values.into_iter().enumerate() {
            self.memory.set_array_element(dst, i, value)?;
        }
        Ok(())
    }

    fn op_replace(&mut self, inst: &Instruction<'_>) -> Result<(), VmError> {
        let dst = inst.operand(0) as usize;
        let src = inst.operand(1) as usize;
        let start = self.index_operand(inst.operand(2), 0)?;
        let new = inst.operand(3) as usize;

        let replacement = if self.memory.slot_type(new)? == SlotType::Array {
            let len = self.memory.array_len(new)?;
            (0..len)
                .map(|i| self.memory.array_element(new, i))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![self.memory.scalar(new)?]
        };

        if dst != src {
            self.memory.copy_array(dst, src)?;
        }
        let len = self.memory.array_len(dst)?;
        for (i, value) in replacement.into_iter().enumerate() {
            let index = start.saturating_add(i);
            if index >= len {
                break;
            }
            self.memory.set_array_element(dst, index, value)?;
        }
        Ok(())
    }

    fn op_mov(&mut self, inst: &Instruction<'_>, pc: usize) -> Result<(), VmError> {
        let dst = inst.operand(0) as usize;
        let src = inst.operand(1) as usize;
        let dst_type = self.memory.slot_type(dst)?;
        let src_type = self.memory.slot_type(src)?;

        if dst_type == SlotType::Array && src_type == SlotType::Array {
            self.memory.copy_array(dst, src)?;
        } else if !dst_type.is_flat() || !src_type.is_flat() {
            self.diagnose(
                pc,
                DiagnosticKind::CompositeMove {
                    dst: dst_type,
                    src: src_type,
                },
            );
        } else {
            let value = self.memory.scalar(src)?;
            self.memory.set_scalar(dst, value)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Subroutines
    // -------------------------------------------------------------------------

    fn op_subcall(&mut self, inst: &Instruction<'_>, pc: usize) -> Result<(), VmError> {
        let clump = inst.operand(0);
        let code_start = self
            .image
            .clump(clump as usize)
            .map(|c| c.code_start as usize)
            .ok_or(VmError::InvalidClump { pc, clump })?;
        self.set_scalar(inst.operand(1), self.state.clump as i32)?;
        self.state.call_stack.push(self.state.pc);
        self.state.clump = clump as usize;
        self.state.pc = code_start;
        Ok(())
    }

    fn op_subret(&mut self, inst: &Instruction<'_>, pc: usize) -> Result<(), VmError> {
        if self.state.call_stack.is_empty() {
            return Err(VmError::CallStackUnderflow { pc });
        }
        // A bad caller slot still resumes the caller, with the clump id unchanged.
        if let Some(ret) = self.state.call_stack.pop() {
            self.state.pc = ret;
        }
        let caller = self.scalar(inst.operand(0))?;
        self.state.clump = caller as u32 as usize;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Outputs
    // -------------------------------------------------------------------------

    fn op_setout(&mut self, inst: &Instruction<'_>) -> Result<(), VmError> {
        let ops = inst.operands();
        let port_entry = inst.operand(1) as usize;
        let count = (inst.operand(0) as usize / 2).saturating_sub(3);
        let pairs = ops.get(2..).unwrap_or_default();
        let pairs = &pairs[..count.min(pairs.len())];

        let ports = if self.memory.slot_type(port_entry)? == SlotType::Array {
            let len = self.memory.array_len(port_entry)?;
            (0..len)
                .map(|i| self.memory.array_element(port_entry, i))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![self.memory.scalar(port_entry)?]
        };

        for port in ports {
            for pair in pairs.chunks_exact(2) {
                let value = self.scalar(pair[1])?;
                self.io.set_output_config(port, pair[0], value);
            }
        }
        Ok(())
    }
}

fn initial_state(image: &ProgramImage) -> ExecutionState {
    ExecutionState {
        pc: image.clump(0).map(|c| c.code_start as usize).unwrap_or(0),
        ..ExecutionState::default()
    }
}

fn compare_mode(flags: u8, pc: usize) -> Result<CompareMode, VmError> {
    CompareMode::from_flags(flags).ok_or(VmError::InvalidCompareMode { pc, mode: flags })
}
