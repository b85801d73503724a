//! The fixed set of windows the tasks work on.
use std::{path::PathBuf, sync::Arc};

use crate::{
    layout,
    window::{AccessPolicy, MapError, RegisterWindow, UnmapError, WindowSpec, DEV_MEM},
};

/// Where the board's windows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardSource {
    /// Map physical memory through the given device node.
    DevMem(PathBuf),
    /// Use zeroed in-process stores, with every key released.
    Simulated,
}

impl Default for BoardSource {
    fn default() -> Self {
        Self::DevMem(PathBuf::from(DEV_MEM))
    }
}

impl BoardSource {
    fn map(&self, spec: WindowSpec, policy: AccessPolicy) -> Result<RegisterWindow, MapError> {
        match self {
            Self::DevMem(path) => RegisterWindow::map_from(path, spec, policy),
            Self::Simulated => Ok(RegisterWindow::simulated(spec, policy)),
        }
    }
}

/// The GPIO, FPGA I/O, and FPGA memory windows, mapped.
#[derive(Debug)]
pub struct Board {
    pub gpio1: Arc<RegisterWindow>,
    pub gpio2: Arc<RegisterWindow>,
    pub fpga_pio: Arc<RegisterWindow>,
    pub fpga_ram: Arc<RegisterWindow>,
}

/// Returned by [`Board::unmap`]. Holds every failure, in unmapping order.
#[derive(Debug, thiserror::Error)]
#[error("Could not unmap {} window(s).", .0.len())]
pub struct UnmapFailures(pub Vec<UnmapError>);

impl Board {
    /// Map every window.
    ///
    /// If any window fails to map, the ones already mapped are released
    /// (best effort, with failures logged) before the error is returned.
    pub fn open(source: &BoardSource, policy: AccessPolicy) -> Result<Self, MapError> {
        // On an early return the windows mapped so far are unmapped by
        // `RegisterWindow::drop`
        let gpio1 = source.map(layout::GPIO1, policy)?;
        let gpio2 = source.map(layout::GPIO2, policy)?;
        let fpga_pio = source.map(layout::FPGA_PIO, policy)?;
        let fpga_ram = source.map(layout::FPGA_RAM, policy)?;

        if *source == BoardSource::Simulated {
            // Inputs are active-low
            gpio2.write_word(layout::GPIO2_EXT_PORT, !0);
            fpga_pio.write_byte(layout::FPGA_KEY, 0xff);
        }

        log::info!(
            "mapped {}, {}, {}, and {}",
            gpio1.spec(),
            gpio2.spec(),
            fpga_pio.spec(),
            fpga_ram.spec(),
        );

        Ok(Self {
            gpio1: Arc::new(gpio1),
            gpio2: Arc::new(gpio2),
            fpga_pio: Arc::new(fpga_pio),
            fpga_ram: Arc::new(fpga_ram),
        })
    }

    /// Make the GPIO1 LEDs outputs and every GPIO2 line an input, then turn
    /// the GPIO1 LEDs off.
    pub fn configure_directions(&self) {
        self.gpio1.write_word(layout::GPIO1_DDR, layout::GPIO1_LED_ALL);
        self.gpio2.write_word(layout::GPIO2_DDR, 0);
        self.gpio1
            .modify_word(layout::GPIO1_DR, |x| x & !layout::GPIO1_LED_ALL);
    }

    /// Turn every GPIO1 and FPGA LED off.
    pub fn clear_indicators(&self) {
        log::debug!("turning all LEDs off");
        self.gpio1
            .modify_word(layout::GPIO1_DR, |x| x & !layout::GPIO1_LED_ALL);
        self.fpga_pio
            .modify_byte(layout::FPGA_LED, |x| x & !layout::FPGA_LED_ALL);
    }

    /// Unmap every window, attempting all of them even if some fail.
    ///
    /// A window still referenced elsewhere can't be unmapped here; it's
    /// released when the last reference goes away.
    pub fn unmap(self) -> Result<(), UnmapFailures> {
        let mut failures = Vec::new();
        for window in [self.gpio1, self.gpio2, self.fpga_pio, self.fpga_ram] {
            match Arc::try_unwrap(window) {
                Ok(window) => {
                    if let Err(e) = window.unmap() {
                        log::error!("{e}: {}", e.source);
                        failures.push(e);
                    }
                }
                Err(window) => {
                    log::warn!("{} is still in use; deferring its unmapping", window.spec());
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(UnmapFailures(failures))
        }
    }
}
