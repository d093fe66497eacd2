//! BCM283x peripheral access for Linux userspace.
//!
//! Everything the transmit engine needs from the SoC lives here: register
//! windows mapped through `/dev/mem`, board discovery from the device tree,
//! the VideoCore mailbox allocator for uncached DMA memory, and thin drivers
//! for the Clock Manager, DMA controller, GPIO block, and PCM serializer.
//!
//! # Design rules
//!
//! - No global peripheral state: each driver owns its mapped window and is
//!   held by whoever constructed it.
//! - Registers are whole 32-bit words manipulated through named shift/mask
//!   accessors; hardware layout never depends on compiler struct packing.
//! - Every register access is a single volatile 32-bit load or store with
//!   acquire/release ordering (see [`mmio::MmioRegion`]).
//! - Drivers are infallible once constructed; parameter violations are
//!   programming errors and assert.

pub mod board;
pub mod clock;
pub mod dma;
pub mod gpio;
pub mod mailbox;
pub mod memory;
pub mod mmio;
pub mod pcm;

use std::io;

/// Peripheral bus address at which the devices see their own registers.
///
/// DMA control blocks must address peripherals through this alias, not
/// through the ARM physical address the CPU maps.
pub const BUS_PERIPHERAL_BASE: u32 = 0x7E00_0000;

/// Platform-layer failures. All are fatal to the caller: they occur during
/// setup (opening device files, mapping memory, talking to the firmware)
/// and the engine cannot run without any of these resources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A device file could not be opened.
    #[error("failed to open {path}")]
    Open {
        /// Path that failed to open.
        path: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// An `mmap` of physical memory failed.
    #[error("failed to map {len:#x} bytes of physical memory at {offset:#x}")]
    Map {
        /// Physical offset of the attempted mapping.
        offset: u64,
        /// Length of the attempted mapping.
        len: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The property-channel ioctl itself failed.
    #[error("mailbox property ioctl failed")]
    MailboxIoctl(#[source] io::Error),

    /// The firmware answered but flagged the request as failed.
    #[error("firmware rejected mailbox request {tag:#010x}")]
    MailboxRequest {
        /// Property tag of the rejected request.
        tag: u32,
    },

    /// The firmware could not provide the requested contiguous memory.
    #[error("firmware allocation of {len} bytes of DMA memory failed")]
    AllocationFailed {
        /// Requested length in bytes.
        len: usize,
    },

    /// A device-tree file could not be read.
    #[error("failed to read device tree node {path}")]
    DeviceTree {
        /// Path that failed to read.
        path: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The device-tree `soc/ranges` property had an unknown layout.
    #[error("unrecognized soc ranges layout in the device tree")]
    RangesLayout,
}

/// Convenience alias for platform results.
pub type Result<T> = std::result::Result<T, Error>;
