use std::sync::Arc;

use super::{Role, StopCondition, TaskContext, TaskReport};
use crate::{board::Board, config::OutputPacing, layout, window::RegisterWindow};

/// The driving task. Toggles GPIO1 LED1, polls GPIO2 KEY3, counts, and wakes
/// the dependent task every `signal_every` counts.
#[derive(Debug)]
pub struct OutputTask {
    gpio1: Arc<RegisterWindow>,
    gpio2: Arc<RegisterWindow>,
    fpga_ram: Arc<RegisterWindow>,
    cx: TaskContext,
    pacing: OutputPacing,
    stop: StopCondition,
}

impl OutputTask {
    pub fn new(board: &Board, cx: TaskContext, pacing: OutputPacing, stop: StopCondition) -> Self {
        Self {
            gpio1: Arc::clone(&board.gpio1),
            gpio2: Arc::clone(&board.gpio2),
            fpga_ram: Arc::clone(&board.fpga_ram),
            cx,
            pacing,
            stop,
        }
    }

    fn should_stop(&self) -> bool {
        match self.stop {
            StopCondition::Cancelled => false,
            StopCondition::Count(bound) => self.cx.counter.read() >= bound,
        }
    }

    pub fn run(self) -> TaskReport {
        let _guard = self.cx.token.cancel_on_panic();
        let mut report = TaskReport::new(Role::Output);

        loop {
            if self.cx.token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.should_stop() {
                break;
            }

            if self.cx.counter.read() % 2 == 1 {
                log::debug!("GPIO1 LED1 on");
                self.gpio1.set_bit(layout::GPIO1_LED1);
            } else {
                log::debug!("GPIO1 LED1 off");
                self.gpio1.clear_bit(layout::GPIO1_LED1);
            }

            if self.cx.token.sleep(self.pacing.period).is_err() {
                report.cancelled = true;
                break;
            }

            if self.gpio2.is_pressed(layout::GPIO2_KEY3) {
                log::info!("GPIO2 KEY3 pressed");
                report.key_presses += 1;
            }

            let (count, ()) = self.cx.counter.increment_with(|_| {
                self.fpga_ram
                    .write_word(layout::FPGA_RAM_CONTROL, layout::FPGA_RAM_CONTROL_MARK)
            });
            log::debug!("output task count = {count}");
            report.iterations += 1;

            if count.checked_rem(self.pacing.signal_every) == Some(0) {
                self.cx.latch.signal();
                report.signals += 1;
            }
        }

        log::debug!("{report}");
        report
    }
}
