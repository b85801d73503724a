//! Run configuration.
use std::time::Duration;

use crate::{
    layout, rt::RtPolicy, sync::DEFAULT_WAIT_POLL, timing::ClockKind, window::AccessPolicy,
};

/// Selects which tasks take part in a run and how it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    /// The output, dependent, and measurement tasks. The run ends when the
    /// measurement task's loop completes.
    #[default]
    ThreeTask,
    /// The output and dependent tasks only. The run ends when the shared
    /// counter reaches `iterations`.
    TwoTask { iterations: u32 },
}

/// Pacing of the output task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPacing {
    /// The sleep between toggling the indicator and polling the key.
    pub period: Duration,
    /// Signal the dependent task whenever the counter reaches a multiple of
    /// this.
    pub signal_every: u32,
}

/// Pacing of the dependent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentPacing {
    /// How long the indicator stays lit after each wake-up.
    pub on_time: Duration,
}

/// Pacing and bounds of the measurement task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementPacing {
    /// The delay between applying the real-time policy and the first
    /// measurement.
    pub settle: Duration,
    /// The sleep after each measurement, with the indicator lit.
    pub on_time: Duration,
    /// The sleep after clearing the indicator.
    pub off_time: Duration,
    /// The loop runs while the shared counter is below this.
    pub threshold: u32,
}

/// Everything that parameterizes a run.
///
/// The default reproduces the pacing the board has always been run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub variant: Variant,
    pub output: OutputPacing,
    pub dependent: DependentPacing,
    pub measurement: MeasurementPacing,
    /// Applied by the measurement task to itself.
    pub rt: RtPolicy,
    pub clock: ClockKind,
    pub access: AccessPolicy,
    /// The interval at which blocked waits recheck for cancellation.
    pub wait_poll: Duration,
    /// The number of intervals the sample array can hold.
    pub sample_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            variant: Variant::ThreeTask,
            output: OutputPacing {
                period: Duration::from_millis(500),
                signal_every: 5,
            },
            dependent: DependentPacing {
                on_time: Duration::from_secs(1),
            },
            measurement: MeasurementPacing {
                settle: Duration::from_secs(1),
                on_time: Duration::from_millis(100),
                off_time: Duration::from_millis(100),
                threshold: 30,
            },
            rt: RtPolicy::default(),
            clock: ClockKind::Monotonic,
            access: AccessPolicy::Serialized,
            wait_poll: DEFAULT_WAIT_POLL,
            sample_capacity: layout::SAMPLE_CAPACITY,
        }
    }
}

impl RunConfig {
    /// The default configuration with every interval shortened by a factor of
    /// 50 and no real-time setup. Suitable for the simulated board.
    pub fn fast() -> Self {
        let mut config = Self::default();
        config.output.period = Duration::from_millis(10);
        config.dependent.on_time = Duration::from_millis(20);
        config.measurement.settle = Duration::from_millis(20);
        config.measurement.on_time = Duration::from_millis(2);
        config.measurement.off_time = Duration::from_millis(2);
        config.wait_poll = Duration::from_millis(2);
        config.rt = RtPolicy::NONE;
        config
    }

    /// The two-task variant bounded the way it has always been.
    pub fn two_task(mut self) -> Self {
        self.variant = Variant::TwoTask {
            iterations: self.measurement.threshold,
        };
        self
    }
}
