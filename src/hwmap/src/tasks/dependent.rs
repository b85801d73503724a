use std::sync::Arc;

use super::{Role, TaskContext, TaskReport};
use crate::{board::Board, config::DependentPacing, layout, window::RegisterWindow};

/// The consumer task. Each signal from the output task pulses FPGA LED2 once.
#[derive(Debug)]
pub struct DependentTask {
    fpga_pio: Arc<RegisterWindow>,
    fpga_ram: Arc<RegisterWindow>,
    cx: TaskContext,
    pacing: DependentPacing,
}

impl DependentTask {
    pub fn new(board: &Board, cx: TaskContext, pacing: DependentPacing) -> Self {
        Self {
            fpga_pio: Arc::clone(&board.fpga_pio),
            fpga_ram: Arc::clone(&board.fpga_ram),
            cx,
            pacing,
        }
    }

    pub fn run(self) -> TaskReport {
        let _guard = self.cx.token.cancel_on_panic();
        let mut report = TaskReport::new(Role::Dependent);

        loop {
            if self.cx.latch.wait_cancellable(&self.cx.token).is_err() {
                report.cancelled = true;
                break;
            }
            report.wakes += 1;

            log::debug!("FPGA LED2 on");
            self.fpga_pio.set_bit(layout::FPGA_LED2);
            let slept = self.cx.token.sleep(self.pacing.on_time);
            // The LED goes dark even if the run was cancelled mid-pulse
            log::debug!("FPGA LED2 off");
            self.fpga_pio.clear_bit(layout::FPGA_LED2);
            if slept.is_err() {
                report.cancelled = true;
                break;
            }

            let (count, control) = self
                .cx
                .counter
                .increment_with(|_| self.fpga_ram.read_word(layout::FPGA_RAM_CONTROL));
            log::debug!("dependent task count = {count}, control word = {control:#x}");
            report.iterations += 1;

            if self.fpga_pio.is_pressed(layout::FPGA_KEY1) {
                log::info!("FPGA KEY1 pressed");
                report.key_presses += 1;
            }
        }

        log::debug!("{report}");
        report
    }
}
