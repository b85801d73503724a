//! The tasks that make up a run.
//!
//! Each task is a struct that owns handles to its collaborators and is moved
//! into its own thread, where [`run`](OutputTask::run) drives it until it's
//! told to stop.
use std::{fmt, sync::Arc};

use crate::sync::{CancelToken, SharedCounter, SignalLatch};

mod dependent;
mod measurement;
mod output;

pub use self::{dependent::DependentTask, measurement::MeasurementTask, output::OutputTask};

/// Identifies a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Output,
    Dependent,
    Measurement,
}

impl Role {
    /// The name given to the task's thread.
    pub fn thread_name(self) -> &'static str {
        match self {
            Self::Output => "hwmap-output",
            Self::Dependent => "hwmap-dependent",
            Self::Measurement => "hwmap-measurement",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Output => "output",
            Self::Dependent => "dependent",
            Self::Measurement => "measurement",
        })
    }
}

/// When the output task stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Run until the run is cancelled.
    Cancelled,
    /// Run until the shared counter reaches the given value, or the run is
    /// cancelled.
    Count(u32),
}

/// The state shared by every task of a run.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub counter: Arc<SharedCounter>,
    pub latch: Arc<SignalLatch>,
    pub token: CancelToken,
}

impl TaskContext {
    pub fn new(latch: SignalLatch) -> Self {
        Self {
            counter: Arc::new(SharedCounter::new()),
            latch: Arc::new(latch),
            token: CancelToken::new(),
        }
    }
}

/// What a task did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub role: Role,
    /// Completed loop iterations.
    pub iterations: usize,
    /// Signals sent to the dependent task.
    pub signals: usize,
    /// Signals consumed from the output task.
    pub wakes: usize,
    /// Iterations in which the task's key was found pressed.
    pub key_presses: usize,
    /// Intervals stored in the sample buffer.
    pub recorded: usize,
    /// Intervals measured but not stored (wraparound or full buffer).
    pub discarded: usize,
    /// Measurements lost to clock read failures.
    pub clock_failures: usize,
    /// The real-time policy couldn't be fully applied.
    pub degraded: bool,
    /// The task stopped because the run was cancelled.
    pub cancelled: bool,
}

impl TaskReport {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            iterations: 0,
            signals: 0,
            wakes: 0,
            key_presses: 0,
            recorded: 0,
            discarded: 0,
            clock_failures: 0,
            degraded: false,
            cancelled: false,
        }
    }
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task: {} iterations", self.role, self.iterations)?;
        match self.role {
            Role::Output => write!(f, ", {} signals", self.signals)?,
            Role::Dependent => write!(f, ", {} wakes", self.wakes)?,
            Role::Measurement => write!(
                f,
                ", {} recorded, {} discarded, {} clock failures",
                self.recorded, self.discarded, self.clock_failures
            )?,
        }
        if self.key_presses > 0 {
            write!(f, ", {} key presses", self.key_presses)?;
        }
        if self.degraded {
            f.write_str(", degraded timing")?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}
