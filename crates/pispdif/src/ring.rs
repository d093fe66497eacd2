//! The uncached DMA ring.
//!
//! One firmware allocation holds three DMA control blocks followed by three
//! sample slots; the control blocks chain in a cycle so the DMA engine
//! streams the slots into the PCM FIFO forever without CPU involvement. The
//! producer writes a slot only while the engine is busy elsewhere (enforced
//! by the loop in `producer`, not here).

use std::mem;
use std::ptr;

use platform::dma::{DmaControlBlock, DreqPeripheral, TransferInfo};
use platform::memory::PhysicalMemory;
use platform::pcm::FIFO_BUS_ADDRESS;

/// Slots in the ring. The producer stays one slot behind the DMA cursor,
/// leaving two slots of queued audio in the steady state.
pub const SLOT_COUNT: usize = 3;

/// Stereo samples per slot.
pub const SLOT_SAMPLES: usize = 2048;

/// One pre-encoded stereo sample: both subframes split into the 32-bit
/// halves the PCM FIFO consumes, most significant word first.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodedSample {
    /// Subframe A, upper half.
    pub a_msb: u32,
    /// Subframe A, lower half.
    pub a_lsb: u32,
    /// Subframe B, upper half.
    pub b_msb: u32,
    /// Subframe B, lower half.
    pub b_lsb: u32,
}

/// One DMA transfer's worth of encoded samples.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Slot {
    /// The slot's encoded samples.
    pub samples: [EncodedSample; SLOT_SAMPLES],
}

/// Bytes per slot; must fit the 16-bit DMA transfer-length field.
pub const SLOT_BYTES: usize = mem::size_of::<Slot>();

const _: () = assert!(SLOT_BYTES == SLOT_SAMPLES * 16);
const _: () = assert!(SLOT_BYTES <= u16::MAX as usize, "slot exceeds the DMA length field");

/// Layout of the single uncached allocation: descriptors first, then slots.
#[repr(C)]
struct RingLayout {
    control: [DmaControlBlock; SLOT_COUNT],
    slots: [Slot; SLOT_COUNT],
}

const _: () = assert!(
    mem::size_of::<RingLayout>() == SLOT_COUNT * (32 + SLOT_BYTES),
    "ring layout must be exactly descriptors plus slots"
);

const fn control_offset(index: usize) -> usize {
    index * mem::size_of::<DmaControlBlock>()
}

const fn slot_offset(index: usize) -> usize {
    SLOT_COUNT * mem::size_of::<DmaControlBlock>() + index * SLOT_BYTES
}

/// The allocated, descriptor-initialized ring.
pub struct DmaRing {
    memory: PhysicalMemory,
}

impl DmaRing {
    /// Allocate the ring and build the control-block cycle.
    pub fn allocate() -> platform::Result<Self> {
        let memory = PhysicalMemory::allocate(mem::size_of::<RingLayout>())?;
        let ring = Self { memory };
        ring.install_control_blocks();
        Ok(ring)
    }

    /// Write the three descriptors: each streams its own slot into the PCM
    /// FIFO, paced by the PCM TX DREQ, then chains to the next.
    fn install_control_blocks(&self) {
        let transfer_information = TransferInfo::new()
            .no_wide_bursts()
            .wait_response()
            .source_increment()
            .destination_dreq()
            .peripheral_map(DreqPeripheral::PcmTx)
            .raw();

        for index in 0..SLOT_COUNT {
            let mut block = DmaControlBlock::zeroed();
            block.transfer_information = transfer_information;
            block.source_address = self.slot_bus_address(index);
            block.destination_address = FIFO_BUS_ADDRESS;
            block.transfer_length = SLOT_BYTES as u32;
            block.next_control_block = self.control_bus_address((index + 1) % SLOT_COUNT);

            // SAFETY: control_offset(index) is in bounds of the allocation
            // by the RingLayout size assert; the memory is exclusively ours
            // and 32-byte alignment follows from the page-aligned base.
            unsafe {
                let dst = self
                    .memory
                    .as_ptr()
                    .add(control_offset(index))
                    .cast::<DmaControlBlock>();
                ptr::write_volatile(dst, block);
            }
        }

        // The chain must close into a cycle.
        // SAFETY: same bounds argument as above; read-back of our own write.
        let last = unsafe {
            ptr::read_volatile(
                self.memory
                    .as_ptr()
                    .add(control_offset(SLOT_COUNT - 1))
                    .cast::<DmaControlBlock>(),
            )
        };
        assert_eq!(
            last.next_control_block,
            self.control_bus_address(0),
            "control blocks must form a cycle"
        );
    }

    /// Bus address of descriptor `index`.
    pub fn control_bus_address(&self, index: usize) -> u32 {
        assert!(index < SLOT_COUNT);
        self.memory.bus_address() + control_offset(index) as u32
    }

    fn slot_bus_address(&self, index: usize) -> u32 {
        assert!(index < SLOT_COUNT);
        self.memory.bus_address() + slot_offset(index) as u32
    }

    /// Which slot a CONBLK_AD readback refers to, if any.
    pub fn slot_of_control_block(&self, control_block: u32) -> Option<usize> {
        (0..SLOT_COUNT).find(|&index| self.control_bus_address(index) == control_block)
    }

    /// Store one encoded stereo sample into a slot.
    ///
    /// The stores are volatile: the memory is uncached and the DMA engine
    /// may start reading it as soon as the producer moves on.
    pub fn store_sample(&self, slot: usize, index: usize, code_a: u64, code_b: u64) {
        assert!(slot < SLOT_COUNT);
        assert!(index < SLOT_SAMPLES);

        let offset = slot_offset(slot) + index * mem::size_of::<EncodedSample>();
        // SAFETY: offset is in bounds by the asserts above and the
        // RingLayout size assert; alignment is 4 bytes off the page-aligned
        // base.
        unsafe {
            let words = self.memory.as_ptr().add(offset).cast::<u32>();
            ptr::write_volatile(words, (code_a >> 32) as u32);
            ptr::write_volatile(words.add(1), code_a as u32);
            ptr::write_volatile(words.add(2), (code_b >> 32) as u32);
            ptr::write_volatile(words.add(3), code_b as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_fits_the_dma_length_field() {
        assert_eq!(SLOT_BYTES, 32_768);
        assert!(SLOT_BYTES <= usize::from(u16::MAX));
    }

    #[test]
    fn layout_places_slots_after_the_descriptors() {
        assert_eq!(control_offset(0), 0);
        assert_eq!(control_offset(2), 64);
        assert_eq!(slot_offset(0), 96);
        assert_eq!(slot_offset(1), 96 + SLOT_BYTES);
    }

    #[test]
    fn ring_layout_has_no_padding() {
        assert_eq!(
            mem::size_of::<RingLayout>(),
            SLOT_COUNT * mem::size_of::<DmaControlBlock>() + SLOT_COUNT * SLOT_BYTES
        );
    }
}
