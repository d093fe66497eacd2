//! Board discovery from the device tree.
//!
//! The peripheral window moves between SoC revisions (0x2000_0000 on
//! BCM2835, 0x3F00_0000 on BCM2836/7, 0xFE00_0000 on BCM2711) and so do the
//! PLLD rate and the DMA channel the firmware leaves free. The firmware
//! publishes the window through `/proc/device-tree/soc/ranges`; the model
//! string tells the generations apart.

use std::fs;

use crate::dma::DmaChannel;
use crate::{Error, Result};

/// PLLD rate on BCM2835..BCM2837 (Pi 3 and earlier).
pub const PLLD_HZ_BCM283X: u32 = 500_000_000;

/// PLLD rate on BCM2711 (Pi 4).
pub const PLLD_HZ_BCM2711: u32 = 750_000_000;

/// Bus alias under which the firmware hands out uncached SDRAM.
///
/// Subtracting it from a mailbox bus address yields the ARM physical
/// address of the same bytes.
pub const SDRAM_BUS_BASE: u32 = 0xC000_0000;

/// Fallback peripheral window length when the ranges entry omits a size.
const DEFAULT_PERIPHERAL_SIZE: usize = 0x0100_0000;

/// SoC generation, as far as this engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocGeneration {
    /// BCM2835/6/7 — Pi 3 and earlier, Pi Zero.
    Bcm283x,
    /// BCM2711 — Pi 4, Pi 400, CM4.
    Bcm2711,
}

/// Discovered board parameters.
#[derive(Debug, Clone, Copy)]
pub struct Board {
    /// SoC generation.
    pub generation: SocGeneration,
    /// ARM physical address of the peripheral window.
    pub peripheral_base: u64,
    /// Length of the peripheral window in bytes.
    pub peripheral_size: usize,
}

impl Board {
    /// Read the peripheral window and SoC generation from the device tree.
    pub fn detect() -> Result<Self> {
        let ranges = fs::read("/proc/device-tree/soc/ranges").map_err(|source| {
            Error::DeviceTree { path: "/proc/device-tree/soc/ranges", source }
        })?;
        let (peripheral_base, peripheral_size) = parse_soc_ranges(&ranges)?;

        let model = fs::read("/proc/device-tree/model").unwrap_or_default();
        let model = String::from_utf8_lossy(&model);
        let generation = if peripheral_base >= 0xFC00_0000 {
            SocGeneration::Bcm2711
        } else {
            SocGeneration::Bcm283x
        };

        let board = Self {
            generation,
            peripheral_base,
            peripheral_size,
        };
        tracing::debug!(
            model = %model.trim_end_matches('\0'),
            base = peripheral_base,
            size = peripheral_size,
            "detected board"
        );
        Ok(board)
    }

    /// PLLD rate feeding the Clock Manager on this SoC.
    pub const fn plld_hz(&self) -> u32 {
        match self.generation {
            SocGeneration::Bcm283x => PLLD_HZ_BCM283X,
            SocGeneration::Bcm2711 => PLLD_HZ_BCM2711,
        }
    }

    /// DMA channel the engine claims on this SoC.
    ///
    /// Channel 13 is free on Pi 3 and earlier; on the Pi 4 the firmware uses
    /// it, so channel 5 is claimed instead.
    pub const fn dma_channel(&self) -> DmaChannel {
        match self.generation {
            SocGeneration::Bcm283x => DmaChannel::new(13),
            SocGeneration::Bcm2711 => DmaChannel::new(5),
        }
    }
}

/// Parse the first entry of a `soc/ranges` property.
///
/// Entries are big-endian cells: `<child> <parent> <size>` on older boards,
/// `<child> <parent-hi> <parent-lo> <size>` when the parent address takes
/// two cells (Pi 4). The child address is the 0x7E00_0000 bus alias.
fn parse_soc_ranges(bytes: &[u8]) -> Result<(u64, usize)> {
    let cell = |index: usize| -> Option<u32> {
        let start = index * 4;
        bytes
            .get(start..start + 4)
            .map(|raw| u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    };

    let child = cell(0).ok_or(Error::RangesLayout)?;
    if child != 0x7E00_0000 {
        return Err(Error::RangesLayout);
    }

    let word1 = cell(1).ok_or(Error::RangesLayout)?;
    let (base, size) = if word1 != 0 {
        // Single-cell parent address.
        (u64::from(word1), cell(2))
    } else {
        // Two-cell parent address with a zero high word.
        (u64::from(cell(2).ok_or(Error::RangesLayout)?), cell(3))
    };

    let size = size.map_or(DEFAULT_PERIPHERAL_SIZE, |s| s as usize);
    Ok((base, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn parses_single_cell_parent_ranges() {
        let bytes = cells(&[0x7E00_0000, 0x3F00_0000, 0x0100_0000]);
        let (base, size) = parse_soc_ranges(&bytes).unwrap();
        assert_eq!(base, 0x3F00_0000);
        assert_eq!(size, 0x0100_0000);
    }

    #[test]
    fn parses_two_cell_parent_ranges() {
        let bytes = cells(&[0x7E00_0000, 0, 0xFE00_0000, 0x0180_0000]);
        let (base, size) = parse_soc_ranges(&bytes).unwrap();
        assert_eq!(base, 0xFE00_0000);
        assert_eq!(size, 0x0180_0000);
    }

    #[test]
    fn rejects_foreign_child_addresses() {
        let bytes = cells(&[0x1234_0000, 0x3F00_0000, 0x0100_0000]);
        assert!(parse_soc_ranges(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_ranges() {
        assert!(parse_soc_ranges(&[0x7E, 0x00]).is_err());
    }

    #[test]
    fn generations_pick_their_clock_and_channel() {
        let pi3 = Board {
            generation: SocGeneration::Bcm283x,
            peripheral_base: 0x3F00_0000,
            peripheral_size: 0x0100_0000,
        };
        assert_eq!(pi3.plld_hz(), 500_000_000);
        assert_eq!(pi3.dma_channel().index(), 13);

        let pi4 = Board {
            generation: SocGeneration::Bcm2711,
            peripheral_base: 0xFE00_0000,
            peripheral_size: 0x0180_0000,
        };
        assert_eq!(pi4.plld_hz(), 750_000_000);
        assert_eq!(pi4.dma_channel().index(), 5);
    }
}
