//! Starts the tasks of a run and collects their results.
use std::{io, sync::Arc, thread};

use crate::{
    board::Board,
    config::{RunConfig, Variant},
    layout,
    sync::SignalLatch,
    tasks::{
        DependentTask, MeasurementTask, OutputTask, Role, StopCondition, TaskContext, TaskReport,
    },
    timing::{SampleBuffer, SampleStats, TimingRecorder},
    workload::Workload,
};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Could not start the {role} task.")]
    Spawn {
        role: Role,
        #[source]
        source: io::Error,
    },
    #[error("The {0} task panicked.")]
    TaskPanicked(Role),
}

/// The outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// One report per task, in joining order.
    pub tasks: Vec<TaskReport>,
    /// The recorded intervals in nanoseconds, in recording order. Empty for
    /// the two-task variant.
    pub samples: Vec<u32>,
    pub stats: Option<SampleStats>,
    /// The shared counter's value after every task stopped.
    pub final_count: u32,
}

impl RunReport {
    pub fn task(&self, role: Role) -> Option<&TaskReport> {
        self.tasks.iter().find(|r| r.role == role)
    }
}

#[derive(Default)]
struct Running {
    measurement: Option<thread::JoinHandle<(TaskReport, SampleBuffer)>>,
    output: Option<thread::JoinHandle<TaskReport>>,
    dependent: Option<thread::JoinHandle<TaskReport>>,
}

fn spawn<T: Send + 'static>(
    role: Role,
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<thread::JoinHandle<T>, RunError> {
    log::debug!("starting the {role} task");
    thread::Builder::new()
        .name(role.thread_name().to_owned())
        .spawn(f)
        .map_err(|source| RunError::Spawn { role, source })
}

/// Join `handle`, noting the first task to have panicked in `panicked`.
fn join<T>(
    role: Role,
    handle: Option<thread::JoinHandle<T>>,
    panicked: &mut Option<Role>,
) -> Option<T> {
    match handle?.join() {
        Ok(x) => Some(x),
        Err(_) => {
            log::error!("the {role} task panicked");
            panicked.get_or_insert(role);
            None
        }
    }
}

/// Perform a run on `board`.
///
/// Configures the GPIO directions, starts the tasks selected by
/// `config.variant`, and waits for all of them to stop. Afterwards every LED
/// is turned off and the recorded intervals are read back. `board` is left
/// mapped.
pub fn run<W: Workload + 'static>(
    board: &Board,
    config: &RunConfig,
    workload: W,
) -> Result<RunReport, RunError> {
    log::info!("starting a {:?} run", config.variant);
    board.configure_directions();

    let cx = TaskContext::new(SignalLatch::with_poll(config.wait_poll));
    let mut running = Running::default();

    let started = (|| -> Result<(), RunError> {
        let stop = match config.variant {
            Variant::ThreeTask => StopCondition::Cancelled,
            Variant::TwoTask { iterations } => StopCondition::Count(iterations),
        };
        let task = OutputTask::new(board, cx.clone(), config.output, stop);
        running.output = Some(spawn(Role::Output, move || task.run())?);

        let task = DependentTask::new(board, cx.clone(), config.dependent);
        running.dependent = Some(spawn(Role::Dependent, move || task.run())?);

        if config.variant == Variant::ThreeTask {
            let buffer = SampleBuffer::new(
                Arc::clone(&board.fpga_ram),
                layout::FPGA_RAM_SAMPLES,
                config.sample_capacity,
            );
            let task = MeasurementTask::new(
                board,
                TimingRecorder::new(config.clock.clock(), buffer),
                workload,
                cx.clone(),
                config.measurement,
                config.rt,
            );
            running.measurement = Some(spawn(Role::Measurement, move || task.run())?);
        }
        Ok(())
    })();

    if started.is_err() {
        cx.token.cancel();
    }

    let mut panicked = None;
    let mut tasks = Vec::with_capacity(3);
    let mut buffer = None;

    if let Some((report, b)) = join(Role::Measurement, running.measurement, &mut panicked) {
        tasks.push(report);
        buffer = Some(b);
    }
    tasks.extend(join(Role::Output, running.output, &mut panicked));
    if let Variant::TwoTask { .. } = config.variant {
        cx.token.cancel();
    }
    tasks.extend(join(Role::Dependent, running.dependent, &mut panicked));

    board.clear_indicators();

    started?;
    if let Some(role) = panicked {
        return Err(RunError::TaskPanicked(role));
    }

    let samples = buffer.map(|b| b.to_vec()).unwrap_or_default();
    let report = RunReport {
        stats: SampleStats::of(&samples),
        samples,
        tasks,
        final_count: cx.counter.read(),
    };

    for task in &report.tasks {
        log::info!("{task}");
    }
    log::info!("final count = {}", report.final_count);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{board::BoardSource, window::AccessPolicy};

    #[test]
    fn panicking_workload_is_reported() {
        let board = Board::open(&BoardSource::Simulated, AccessPolicy::Serialized).unwrap();
        let result = run(&board, &RunConfig::fast(), || panic!("workload failed"));
        match result {
            Err(RunError::TaskPanicked(Role::Measurement)) => {}
            other => panic!("{other:?}"),
        }
        assert_eq!(
            board.gpio1.read_word(layout::GPIO1_DR) & layout::GPIO1_LED_ALL,
            0
        );
        assert_eq!(
            board.fpga_pio.read_byte(layout::FPGA_LED) & layout::FPGA_LED_ALL,
            0
        );
    }

    #[test]
    fn report_lookup() {
        let report = RunReport {
            tasks: vec![TaskReport::new(Role::Output)],
            samples: vec![],
            stats: None,
            final_count: 0,
        };
        assert!(report.task(Role::Output).is_some());
        assert!(report.task(Role::Dependent).is_none());
    }
}
