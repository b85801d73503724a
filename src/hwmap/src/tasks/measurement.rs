use std::sync::Arc;

use super::{Role, TaskContext, TaskReport};
use crate::{
    board::Board,
    config::MeasurementPacing,
    layout,
    rt::RtPolicy,
    timing::{Clock, MeasureOutcome, SampleBuffer, SystemClock, TimingRecorder},
    window::RegisterWindow,
    workload::Workload,
};

/// The timing task. Runs the workload under [`TimingRecorder`] until the
/// shared counter reaches the threshold, then cancels the run.
pub struct MeasurementTask<W, C = SystemClock> {
    gpio1: Arc<RegisterWindow>,
    recorder: TimingRecorder<C>,
    workload: W,
    cx: TaskContext,
    pacing: MeasurementPacing,
    rt: RtPolicy,
}

impl<W: Workload, C: Clock> MeasurementTask<W, C> {
    pub fn new(
        board: &Board,
        recorder: TimingRecorder<C>,
        workload: W,
        cx: TaskContext,
        pacing: MeasurementPacing,
        rt: RtPolicy,
    ) -> Self {
        Self {
            gpio1: Arc::clone(&board.gpio1),
            recorder,
            workload,
            cx,
            pacing,
            rt,
        }
    }

    /// Run the task on the calling thread. Returns the report and the sample
    /// buffer for the caller to read out.
    pub fn run(self) -> (TaskReport, SampleBuffer) {
        let Self {
            gpio1,
            recorder,
            mut workload,
            cx,
            pacing,
            rt,
        } = self;
        let _guard = cx.token.cancel_on_panic();
        let mut report = TaskReport::new(Role::Measurement);

        report.degraded = rt.apply().is_degraded();
        if let Some(cpu) = crate::rt::current_processor() {
            log::debug!("measurement task is running on processor {cpu}");
        }

        if cx.token.sleep(pacing.settle).is_ok() {
            while cx.counter.read() < pacing.threshold {
                if cx.token.is_cancelled() {
                    report.cancelled = true;
                    break;
                }

                log::debug!("GPIO1 LED3 on");
                gpio1.set_bit(layout::GPIO1_LED3);

                match recorder.measure(|| workload.run()) {
                    MeasureOutcome::Recorded { index, nanos } => {
                        log::trace!("interval {index}: {nanos} ns");
                        report.recorded += 1;
                        if recorder.buffer().is_full() {
                            log::info!(
                                "the sample buffer is full; further intervals are discarded"
                            );
                        }
                    }
                    MeasureOutcome::BufferFull { .. } | MeasureOutcome::Wraparound => {
                        report.discarded += 1;
                    }
                    MeasureOutcome::ClockFailed => report.clock_failures += 1,
                }

                let on = cx.token.sleep(pacing.on_time);
                log::debug!("GPIO1 LED3 off");
                gpio1.clear_bit(layout::GPIO1_LED3);
                if on.is_err() || cx.token.sleep(pacing.off_time).is_err() {
                    report.cancelled = true;
                    break;
                }
                report.iterations += 1;
            }
        } else {
            report.cancelled = true;
        }

        // Stop the other tasks
        cx.token.cancel();

        log::debug!("{report}");
        (report, recorder.into_buffer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::BoardSource, sync::SignalLatch, timing::ClockKind, window::AccessPolicy,
    };
    use std::time::Duration;

    fn pacing(threshold: u32) -> MeasurementPacing {
        MeasurementPacing {
            settle: Duration::ZERO,
            on_time: Duration::from_millis(1),
            off_time: Duration::from_millis(1),
            threshold,
        }
    }

    fn task(
        board: &Board,
        cx: &TaskContext,
        capacity: usize,
        threshold: u32,
        workload: impl Workload,
    ) -> MeasurementTask<impl Workload> {
        let buffer = SampleBuffer::new(
            Arc::clone(&board.fpga_ram),
            layout::FPGA_RAM_SAMPLES,
            capacity,
        );
        MeasurementTask::new(
            board,
            TimingRecorder::new(ClockKind::Monotonic.clock(), buffer),
            workload,
            cx.clone(),
            pacing(threshold),
            RtPolicy::NONE,
        )
    }

    #[test]
    fn stops_at_threshold_and_cancels() {
        let board = Board::open(&BoardSource::Simulated, AccessPolicy::Serialized).unwrap();
        let cx = TaskContext::new(SignalLatch::new());
        let counter = Arc::clone(&cx.counter);
        let mut runs = 0;
        let (report, _) = task(&board, &cx, 50, 3, move || {
            runs += 1;
            if runs <= 3 {
                counter.increment();
            }
        })
        .run();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.recorded + report.discarded + report.clock_failures, 3);
        assert!(!report.cancelled);
        assert!(cx.token.is_cancelled());
        assert!(!board.gpio1.is_set(layout::GPIO1_LED3));
    }

    #[test]
    fn keeps_running_the_workload_when_full() {
        let board = Board::open(&BoardSource::Simulated, AccessPolicy::Serialized).unwrap();
        let cx = TaskContext::new(SignalLatch::new());
        let counter = Arc::clone(&cx.counter);
        let (report, buffer) = task(&board, &cx, 2, 6, move || {
            std::thread::sleep(Duration::from_micros(50));
            counter.increment();
        })
        .run();
        assert_eq!(report.iterations, 6);
        assert!(buffer.len() <= 2);
        assert_eq!(buffer.is_full(), buffer.len() == 2);
        assert!(report.discarded >= 4);
    }

    #[test]
    fn cancelled_before_starting() {
        let board = Board::open(&BoardSource::Simulated, AccessPolicy::Serialized).unwrap();
        let cx = TaskContext::new(SignalLatch::new());
        cx.token.cancel();
        let (report, buffer) = task(&board, &cx, 50, 30, || panic!("must not run")).run();
        assert!(report.cancelled);
        assert_eq!(report.iterations, 0);
        assert!(buffer.is_empty());
    }
}
