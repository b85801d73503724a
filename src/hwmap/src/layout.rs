//! The fixed register topology of the target board.
//!
//! Addresses are physical. Every window base is page-aligned, so each one can
//! be handed to `mmap` as-is.
use crate::window::{Bit, WindowSpec};

/// The page size assumed when sizing windows.
pub const PAGE_SIZE: usize = 4096;

// ----------------------------------------------------------------------------
// HPS GPIO1 (LEDs)

/// HPS GPIO1. The data register sits at offset 0.
pub const GPIO1: WindowSpec = WindowSpec::new("GPIO1", 0xff70_9000, PAGE_SIZE);

/// GPIO1 data register.
pub const GPIO1_DR: usize = 0x00;
/// GPIO1 data direction register.
pub const GPIO1_DDR: usize = 0x04;

pub const GPIO1_LED0: Bit = Bit::word(GPIO1_DR, 0x0100_0000);
pub const GPIO1_LED1: Bit = Bit::word(GPIO1_DR, 0x0200_0000);
pub const GPIO1_LED2: Bit = Bit::word(GPIO1_DR, 0x0400_0000);
pub const GPIO1_LED3: Bit = Bit::word(GPIO1_DR, 0x0800_0000);
/// All four GPIO1 LEDs. Written to [`GPIO1_DDR`] to make them outputs.
pub const GPIO1_LED_ALL: u32 = 0x0f00_0000;

// ----------------------------------------------------------------------------
// HPS GPIO2 (keys)

/// HPS GPIO2.
pub const GPIO2: WindowSpec = WindowSpec::new("GPIO2", 0xff70_a000, PAGE_SIZE);

/// GPIO2 data direction register. All zeros configures every pin as input.
pub const GPIO2_DDR: usize = 0x04;
/// GPIO2 external port register, where the key levels are read.
pub const GPIO2_EXT_PORT: usize = 0x50;

pub const GPIO2_KEY0: Bit = Bit::word(GPIO2_EXT_PORT, 0x0020_0000);
pub const GPIO2_KEY1: Bit = Bit::word(GPIO2_EXT_PORT, 0x0040_0000);
pub const GPIO2_KEY2: Bit = Bit::word(GPIO2_EXT_PORT, 0x0080_0000);
pub const GPIO2_KEY3: Bit = Bit::word(GPIO2_EXT_PORT, 0x0100_0000);

// ----------------------------------------------------------------------------
// FPGA PIO (behind the lightweight HPS-to-FPGA bridge)

/// The lightweight bridge window. Twenty pages cover every PIO core.
pub const FPGA_PIO: WindowSpec = WindowSpec::new("FPGA PIO", 0xff20_0000, 20 * PAGE_SIZE);

/// FPGA LED PIO data byte.
pub const FPGA_LED: usize = 0x0001_0040;
/// FPGA key PIO data byte.
pub const FPGA_KEY: usize = 0x0001_00c0;

pub const FPGA_LED0: Bit = Bit::byte(FPGA_LED, 0x01);
pub const FPGA_LED1: Bit = Bit::byte(FPGA_LED, 0x02);
pub const FPGA_LED2: Bit = Bit::byte(FPGA_LED, 0x04);
pub const FPGA_LED3: Bit = Bit::byte(FPGA_LED, 0x08);
pub const FPGA_LED_ALL: u8 = 0x0f;

pub const FPGA_KEY0: Bit = Bit::byte(FPGA_KEY, 0x01);
pub const FPGA_KEY1: Bit = Bit::byte(FPGA_KEY, 0x02);
pub const FPGA_KEY2: Bit = Bit::byte(FPGA_KEY, 0x04);
pub const FPGA_KEY3: Bit = Bit::byte(FPGA_KEY, 0x08);

// ----------------------------------------------------------------------------
// FPGA on-chip RAM

/// FPGA on-chip RAM, shared with the programmable logic.
pub const FPGA_RAM: WindowSpec = WindowSpec::new("FPGA RAM", 0xc000_0000, 16 * PAGE_SIZE);

/// Control word, written by the output task on every increment.
pub const FPGA_RAM_CONTROL: usize = 0x000;
/// The value the output task stores into [`FPGA_RAM_CONTROL`].
pub const FPGA_RAM_CONTROL_MARK: u32 = 0xeeff;
/// Start of the measured-interval array.
pub const FPGA_RAM_SAMPLES: usize = 0x010;
/// The number of `u32` slots in the measured-interval array.
pub const SAMPLE_CAPACITY: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_page_aligned() {
        for spec in [GPIO1, GPIO2, FPGA_PIO, FPGA_RAM] {
            assert_eq!(spec.base % PAGE_SIZE as u64, 0, "{}", spec.name);
            assert_eq!(spec.len % PAGE_SIZE, 0, "{}", spec.name);
        }
    }

    #[test]
    fn registers_fit_in_their_windows() {
        for bit in [GPIO1_LED1, GPIO1_LED3, GPIO2_KEY3] {
            assert!(bit.offset + 4 <= PAGE_SIZE);
        }
        for bit in [FPGA_LED2, FPGA_KEY1] {
            assert!(bit.offset < FPGA_PIO.len);
        }
        assert!(FPGA_RAM_SAMPLES + SAMPLE_CAPACITY * 4 <= FPGA_RAM.len);
        assert!(FPGA_RAM_SAMPLES >= FPGA_RAM_CONTROL + 4);
    }
}
