//! VideoCore property-channel mailbox client.
//!
//! The firmware owns the SDRAM the DMA engine streams from; contiguous,
//! uncached allocations are requested over the `/dev/vcio` property channel.
//! Messages are word arrays: a header (total length, request code), one tag
//! (identifier, value-buffer length, request code, value words), and an end
//! marker. The firmware rewrites the codes with bit 31 set on success.

use std::fs::File;
use std::os::unix::io::AsRawFd;

use crate::{Error, Result};

/// Allocate the buffer in the uncached `0xC` bus alias.
pub const MEM_FLAG_DIRECT: u32 = 1 << 2;
/// Allocate in the non-allocating `0x8` bus alias.
pub const MEM_FLAG_COHERENT: u32 = 2 << 2;
/// Zero the allocation before handing it over.
pub const MEM_FLAG_ZERO_INIT: u32 = 1 << 4;
/// Leave the allocation uninitialized.
pub const MEM_FLAG_NO_INIT: u32 = 1 << 5;
/// Hint that the buffer will stay locked for its whole life.
pub const MEM_FLAG_HINT_PERMALOCK: u32 = 1 << 6;

/// Tag: query the DMA channels reserved for the ARM side.
const TAG_GET_DMA_CHANNELS: u32 = 0x0006_0001;
/// Tag: allocate contiguous GPU-side memory.
const TAG_ALLOCATE_MEMORY: u32 = 0x0003_000C;
/// Tag: lock an allocation, returning its bus address.
const TAG_LOCK_MEMORY: u32 = 0x0003_000D;
/// Tag: unlock an allocation.
const TAG_UNLOCK_MEMORY: u32 = 0x0003_000E;
/// Tag: release an allocation.
const TAG_RELEASE_MEMORY: u32 = 0x0003_000F;

/// Success bit the firmware sets in the message and tag codes.
const CODE_SUCCESS: u32 = 0x8000_0000;

/// Words in the scratch message buffer; covers every tag used here.
const MESSAGE_WORDS: usize = 16;

// The vcio character device defines its single ioctl as
// _IOWR(100, 0, char *): the encoded size is that of a pointer.
nix::ioctl_readwrite!(vcio_property, 100, 0, *mut libc::c_char);

/// An open property channel.
pub struct Mailbox {
    vcio: File,
}

impl Mailbox {
    /// Open `/dev/vcio`.
    pub fn open() -> Result<Self> {
        let vcio = File::open("/dev/vcio")
            .map_err(|source| Error::Open { path: "/dev/vcio", source })?;
        Ok(Self { vcio })
    }

    /// Issue a single-tag property request. `request` holds the tag's value
    /// words; the tag's response words are returned.
    fn call(&self, tag: u32, request: &[u32], response_words: usize) -> Result<Vec<u32>> {
        let value_words = request.len().max(response_words);
        assert!(6 + value_words < MESSAGE_WORDS, "property message too large");

        let mut message = [0u32; MESSAGE_WORDS];
        let total_words = 6 + value_words;
        message[0] = (total_words * 4) as u32; // message length in bytes
        message[1] = 0; // process request
        message[2] = tag;
        message[3] = (value_words * 4) as u32; // value buffer length
        message[4] = 0; // tag request code
        message[5..5 + request.len()].copy_from_slice(request);
        message[5 + value_words] = 0; // end tag

        // SAFETY: the ioctl reads and rewrites `message` in place; the
        // buffer outlives the call and is sized for the declared length.
        unsafe { vcio_property(self.vcio.as_raw_fd(), message.as_mut_ptr().cast()) }
            .map_err(|errno| Error::MailboxIoctl(std::io::Error::from_raw_os_error(errno as i32)))?;

        if message[1] & CODE_SUCCESS == 0 || message[4] & CODE_SUCCESS == 0 {
            return Err(Error::MailboxRequest { tag });
        }

        Ok(message[5..5 + response_words].to_vec())
    }

    /// Allocate `size` bytes of contiguous GPU-side memory and return the
    /// firmware handle.
    pub fn allocate_memory(&self, size: u32, alignment: u32, flags: u32) -> Result<u32> {
        let response = self.call(TAG_ALLOCATE_MEMORY, &[size, alignment, flags], 1)?;
        Ok(response[0])
    }

    /// Lock an allocation in place and return its bus address.
    pub fn lock_memory(&self, handle: u32) -> Result<u32> {
        let response = self.call(TAG_LOCK_MEMORY, &[handle], 1)?;
        Ok(response[0])
    }

    /// Unlock a previously locked allocation.
    pub fn unlock_memory(&self, handle: u32) -> Result<()> {
        self.call(TAG_UNLOCK_MEMORY, &[handle], 1)?;
        Ok(())
    }

    /// Release an allocation back to the firmware.
    pub fn release_memory(&self, handle: u32) -> Result<()> {
        self.call(TAG_RELEASE_MEMORY, &[handle], 1)?;
        Ok(())
    }

    /// Mask of DMA channels available to the ARM (set bit = usable).
    pub fn dma_channel_mask(&self) -> Result<u32> {
        let response = self.call(TAG_GET_DMA_CHANNELS, &[], 1)?;
        tracing::debug!(mask = response[0], "firmware DMA channel mask");
        Ok(response[0])
    }
}
