//! Uncached, physically contiguous DMA memory.
//!
//! The CPU and the DMA engine must agree on the bytes without cache
//! maintenance, so the backing store comes from the firmware in the
//! uncached `0xC` bus alias and is mapped into the process through
//! `/dev/mem`. A [`PhysicalMemory`] therefore has two addresses: the bus
//! address programmed into DMA descriptors and the virtual address the
//! producer writes through.

use std::ptr::NonNull;

use crate::board::SDRAM_BUS_BASE;
use crate::mailbox::{Mailbox, MEM_FLAG_DIRECT, MEM_FLAG_ZERO_INIT};
use crate::{mmio, Error, Result};

/// A locked, mapped firmware allocation.
///
/// Teardown mirrors construction: the mapping is removed, then the
/// allocation is unlocked and released back to the firmware.
pub struct PhysicalMemory {
    mailbox: Mailbox,
    handle: u32,
    bus_address: u32,
    virt: NonNull<u8>,
    len: usize,
}

impl PhysicalMemory {
    /// Allocate `len` bytes of page-aligned, zeroed, uncached memory.
    pub fn allocate(len: usize) -> Result<Self> {
        let mailbox = Mailbox::open()?;

        let alignment = page_size::get() as u32;
        let handle = mailbox
            .allocate_memory(len as u32, alignment, MEM_FLAG_DIRECT | MEM_FLAG_ZERO_INIT)
            .map_err(|_| Error::AllocationFailed { len })?;

        let bus_address = match mailbox.lock_memory(handle) {
            Ok(address) => address,
            Err(error) => {
                if let Err(release_error) = mailbox.release_memory(handle) {
                    tracing::warn!(%release_error, "failed to release unlockable allocation");
                }
                return Err(error);
            }
        };

        // The bus address carries the uncached alias; strip it to get the
        // ARM physical address /dev/mem understands.
        let physical = u64::from(bus_address - SDRAM_BUS_BASE);
        let virt = match mmio::map_physical(physical, len) {
            Ok(virt) => virt,
            Err(error) => {
                Self::unlock_and_release(&mailbox, handle);
                return Err(error);
            }
        };

        tracing::debug!(bus = bus_address, len, "allocated uncached DMA memory");

        Ok(Self {
            mailbox,
            handle,
            bus_address,
            virt,
            len,
        })
    }

    /// Bus address of the allocation, as the DMA engine must address it.
    pub const fn bus_address(&self) -> u32 {
        self.bus_address
    }

    /// Virtual address of the allocation for CPU access.
    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }

    /// Length of the allocation in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocation is empty (never true in practice).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn unlock_and_release(mailbox: &Mailbox, handle: u32) {
        if let Err(error) = mailbox.unlock_memory(handle) {
            tracing::warn!(%error, "failed to unlock firmware allocation");
        }
        if let Err(error) = mailbox.release_memory(handle) {
            tracing::warn!(%error, "failed to release firmware allocation");
        }
    }
}

impl Drop for PhysicalMemory {
    fn drop(&mut self) {
        mmio::unmap(self.virt, self.len);
        Self::unlock_and_release(&self.mailbox, self.handle);
    }
}
