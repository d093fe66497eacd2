//! `/dev/mem`-backed register windows.
//!
//! A window is a shared mapping of a physical address range. Reads and
//! writes are single volatile 32-bit accesses: a read is followed by an
//! acquire fence (values that steer CPU behavior are ordered before what
//! follows), a write is preceded by a release fence (buffer contents are
//! globally visible before a register write can arm the hardware).

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, Ordering};

use crate::{Error, Result};

/// Map `len` bytes of physical memory starting at `offset` into this
/// process, read-write, shared, uncached (`O_SYNC`).
///
/// The file descriptor is closed before returning; the mapping survives it.
pub fn map_physical(offset: u64, len: usize) -> Result<NonNull<u8>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open("/dev/mem")
        .map_err(|source| Error::Open { path: "/dev/mem", source })?;

    // SAFETY: requesting a fresh shared mapping of /dev/mem; the kernel
    // validates the offset and length against the opened descriptor.
    let mapped = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            offset as libc::off_t,
        )
    };
    if mapped == libc::MAP_FAILED {
        return Err(Error::Map {
            offset,
            len,
            source: std::io::Error::last_os_error(),
        });
    }

    tracing::debug!(offset, len, "mapped physical memory");

    // SAFETY: mmap returned a non-MAP_FAILED pointer, which is never null.
    Ok(unsafe { NonNull::new_unchecked(mapped.cast::<u8>()) })
}

/// Unmap a region previously produced by [`map_physical`].
pub(crate) fn unmap(ptr: NonNull<u8>, len: usize) {
    // SAFETY: ptr/len describe a live mapping created by map_physical; after
    // this call the caller never touches it again.
    let result = unsafe { libc::munmap(ptr.as_ptr().cast(), len) };
    if result != 0 {
        tracing::warn!(
            error = %std::io::Error::last_os_error(),
            "failed to unmap physical memory"
        );
    }
}

/// A mapped window of device registers.
pub struct MmioRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is a plain address range; all accesses are volatile and
// the drivers built on top are used from a single thread plus a signal
// handler that only performs a single aligned store.
unsafe impl Send for MmioRegion {}

impl MmioRegion {
    /// Map `len` bytes of device registers at physical address `offset`.
    pub fn map(offset: u64, len: usize) -> Result<Self> {
        let base = map_physical(offset, len)?;
        Ok(Self { base, len })
    }

    /// Length of the window in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty (it never is; present for completeness).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn word_ptr(&self, offset: usize) -> *mut u32 {
        assert!(offset % 4 == 0, "register offset {offset:#x} not word aligned");
        assert!(offset + 4 <= self.len, "register offset {offset:#x} outside window");
        // SAFETY: offset is in bounds of the mapping per the asserts above.
        unsafe { self.base.as_ptr().add(offset).cast::<u32>() }
    }

    /// Volatile 32-bit register read at `offset` bytes into the window,
    /// followed by an acquire fence.
    pub fn read(&self, offset: usize) -> u32 {
        // SAFETY: word_ptr yields an aligned in-bounds pointer into a live
        // shared mapping.
        let value = unsafe { ptr::read_volatile(self.word_ptr(offset)) };
        fence(Ordering::Acquire);
        value
    }

    /// Release fence, then a volatile 32-bit register write at `offset`.
    pub fn write(&self, offset: usize, value: u32) {
        fence(Ordering::Release);
        // SAFETY: word_ptr yields an aligned in-bounds pointer into a live
        // shared mapping.
        unsafe { ptr::write_volatile(self.word_ptr(offset), value) };
    }

    /// Raw pointer to the register word at `offset`.
    ///
    /// Exists for the one consumer that must write a register from a signal
    /// handler without touching any other state.
    pub fn register_ptr(&self, offset: usize) -> *mut u32 {
        self.word_ptr(offset)
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        unmap(self.base, self.len);
    }
}
