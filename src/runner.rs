//! Drives a [`Vm`] until it finishes, halts or runs out of budget.
//!
//! The VM executes one instruction per step and never sleeps. The runner owns
//! the loop around it: pausing, step and time limits, waiting out WAITs on the
//! wall clock or jumping a driven clock straight to the resume tick, and the
//! policy for recoverable memory faults.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ClockMode, ConfigError, RuntimeConfig};
use crate::host::{HeadlessIo, HostEvent, IoFacade, ManualClock, SystemClock, TickSource};
use crate::vm::{
    Diagnostic, ImageError, MemorySnapshot, ProgramImage, StepOutcome, Vm, VmError, VmStatus,
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why a run returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The program counter ran off the end of the code.
    Finished,
    /// A STOP instruction executed.
    Stopped { pc: usize },
    /// A fatal error halted the machine.
    Halted { error: String },
    /// A memory fault with `halt_on_fault` set.
    Faulted { error: String },
    StepLimit,
    TimeBudget,
    /// Waiting on a clock that cannot be driven, and the run may not sleep.
    Waiting { until: u32 },
    Paused,
}

impl RunOutcome {
    /// Whether the run ended in an error other than STOP.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Halted { .. } | RunOutcome::Faulted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Instructions executed by this run, faulting ones included.
    pub steps: u64,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Runner<H, C> {
    vm: Vm<H, C>,
    paused: bool,
    halt_on_fault: bool,
    max_steps: Option<u64>,
    time_budget: Option<Duration>,
    total_steps: u64,
    /// Error that ended the most recent run, if any.
    error: Option<VmError>,
}

impl<H: IoFacade, C: TickSource> Runner<H, C> {
    pub fn new(vm: Vm<H, C>) -> Self {
        Self {
            vm,
            paused: false,
            halt_on_fault: false,
            max_steps: None,
            time_budget: None,
            total_steps: 0,
            error: None,
        }
    }

    pub fn with_config(vm: Vm<H, C>, config: &RuntimeConfig) -> Self {
        Self {
            halt_on_fault: config.halt_on_fault,
            max_steps: config.max_steps,
            time_budget: config.time_budget_ms.map(Duration::from_millis),
            ..Self::new(vm)
        }
    }

    pub fn vm(&self) -> &Vm<H, C> {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm<H, C> {
        &mut self.vm
    }

    pub fn into_vm(self) -> Vm<H, C> {
        self.vm
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// A paused runner returns from every run immediately.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn last_error(&self) -> Option<&VmError> {
        self.error.as_ref()
    }

    /// Error worth reporting as a failed run: any fatal error but STOP, or a
    /// memory fault when faults halt.
    pub fn failure(&self) -> Option<&VmError> {
        self.error.as_ref().filter(|e| match e {
            VmError::Stopped { .. } => false,
            VmError::Memory(_) => self.halt_on_fault,
            _ => true,
        })
    }

    /// Start the program over from its initial memory image.
    pub fn reload(&mut self) -> Result<(), ImageError> {
        self.vm.reset()?;
        self.paused = false;
        self.total_steps = 0;
        self.error = None;
        debug!("program reloaded");
        Ok(())
    }

    /// Execute up to `n` instructions without sleeping.
    pub fn run_steps(&mut self, n: u64) -> RunSummary {
        self.drive(Some(n), None, false)
    }

    /// Run for at most `duration` of wall time, sleeping through WAITs.
    pub fn run_for(&mut self, duration: Duration) -> RunSummary {
        self.drive(self.max_steps, Some(Instant::now() + duration), true)
    }

    /// Run until the program finishes or halts, within the configured limits.
    pub fn run_to_completion(&mut self) -> RunSummary {
        let deadline = self.time_budget.map(|budget| Instant::now() + budget);
        self.drive(self.max_steps, deadline, true)
    }

    fn drive(
        &mut self,
        max_steps: Option<u64>,
        deadline: Option<Instant>,
        sleep: bool,
    ) -> RunSummary {
        if self.vm.status() != VmStatus::Halted {
            self.error = None;
        }
        let mut steps = 0u64;
        let outcome = loop {
            if self.paused {
                break RunOutcome::Paused;
            }
            if max_steps.is_some_and(|max| steps >= max) {
                break RunOutcome::StepLimit;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break RunOutcome::TimeBudget;
            }

            match self.vm.step() {
                Ok(StepOutcome::Executed) => steps += 1,
                Ok(StepOutcome::Finished) => break RunOutcome::Finished,
                Ok(StepOutcome::Halted) => break self.halted_outcome(),
                Ok(StepOutcome::Waiting { until }) => {
                    if self.vm.clock_mut().advance_to(until) {
                        continue;
                    }
                    if !sleep {
                        break RunOutcome::Waiting { until };
                    }
                    let now = self.vm.clock().current_tick();
                    let mut wait = Duration::from_millis(u64::from(until.saturating_sub(now)));
                    if let Some(deadline) = deadline {
                        wait = wait.min(deadline.saturating_duration_since(Instant::now()));
                    }
                    thread::sleep(wait);
                }
                Err(error) if error.is_fatal() => {
                    steps += 1;
                    self.error = Some(error);
                    break self.halted_outcome();
                }
                Err(error) => {
                    steps += 1;
                    warn!(pc = self.vm.state().pc, %error, "memory fault");
                    if self.halt_on_fault {
                        let outcome = RunOutcome::Faulted {
                            error: error.to_string(),
                        };
                        self.error = Some(error);
                        break outcome;
                    }
                }
            }
        };

        self.total_steps += steps;
        RunSummary {
            steps,
            outcome,
            diagnostics: self.vm.diagnostics().to_vec(),
        }
    }

    fn halted_outcome(&self) -> RunOutcome {
        match &self.error {
            Some(VmError::Stopped { pc }) => RunOutcome::Stopped { pc: *pc },
            Some(error) => RunOutcome::Halted {
                error: error.to_string(),
            },
            None => RunOutcome::Halted {
                error: "halted".to_string(),
            },
        }
    }
}

// =============================================================================
// Running files
// =============================================================================

/// Everything a finished run has to say.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub file: String,
    #[serde(flatten)]
    pub summary: RunSummary,
    pub status: VmStatus,
    pub total_steps: u64,
    pub events: Vec<HostEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySnapshot>,
}

impl RunReport {
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "file: {}", self.file);
        let outcome = match &self.summary.outcome {
            RunOutcome::Finished => "finished".to_string(),
            RunOutcome::Stopped { pc } => format!("stopped at pc {pc}"),
            RunOutcome::Halted { error } => format!("halted: {error}"),
            RunOutcome::Faulted { error } => format!("faulted: {error}"),
            RunOutcome::StepLimit => "step limit reached".to_string(),
            RunOutcome::TimeBudget => "time budget exhausted".to_string(),
            RunOutcome::Waiting { until } => format!("waiting until tick {until}"),
            RunOutcome::Paused => "paused".to_string(),
        };
        let _ = writeln!(out, "outcome: {outcome}");
        let _ = writeln!(out, "steps: {}", self.total_steps);

        if self.summary.diagnostics.is_empty() {
            let _ = writeln!(out, "diagnostics: none");
        } else {
            let _ = writeln!(out, "diagnostics:");
            for diagnostic in &self.summary.diagnostics {
                let _ = writeln!(out, "  pc {}: {}", diagnostic.pc, diagnostic.kind);
            }
        }

        let _ = writeln!(out, "events: {}", self.events.len());
        for event in &self.events {
            let line = serde_json::to_string(event).unwrap_or_else(|e| e.to_string());
            let _ = writeln!(out, "  {line}");
        }
        out
    }
}

/// Load an image and run it on a [`HeadlessIo`] host.
///
/// Fails on load errors and on fatal errors other than STOP. Memory faults fail
/// the run only when `halt_on_fault` is set.
pub fn run_file_with_config(path: &Path, config: &RuntimeConfig) -> Result<RunReport, RunError> {
    let image = Arc::new(ProgramImage::load(path)?);
    let io = HeadlessIo::with_sensors(config.sensors);
    let file = path.display().to_string();
    match config.clock {
        ClockMode::Wall => run_image(file, image, io, SystemClock::new(), config),
        ClockMode::Simulated => run_image(file, image, io, ManualClock::default(), config),
    }
}

fn run_image<C: TickSource>(
    file: String,
    image: Arc<ProgramImage>,
    io: HeadlessIo,
    clock: C,
    config: &RuntimeConfig,
) -> Result<RunReport, RunError> {
    let vm = Vm::new(image, io, clock)?;
    let mut runner = Runner::with_config(vm, config);
    let summary = runner.run_to_completion();
    info!(
        file = %file,
        steps = summary.steps,
        outcome = ?summary.outcome,
        diagnostics = summary.diagnostics.len(),
        "run finished"
    );

    if let Some(error) = runner.failure() {
        return Err(error.clone().into());
    }

    let total_steps = runner.total_steps();
    let mut vm = runner.into_vm();
    Ok(RunReport {
        file,
        summary,
        status: vm.status(),
        total_steps,
        events: vm.io_mut().take_events(),
        memory: config.dump_memory.then(|| vm.memory().snapshot()),
    })
}
