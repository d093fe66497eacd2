//! DMA controller driver.
//!
//! The engine chases 32-byte control blocks through memory on its own; the
//! CPU only loads the first block's bus address, flips ACTIVE, and polls
//! CONBLK_AD to see which block is being consumed.

use crate::mmio::MmioRegion;

/// Offset of the DMA controller block from the peripheral base.
pub const DMA_BASE_OFFSET: u64 = 0x0000_7000;

/// Stride between consecutive channel register sets.
pub const DMA_CHANNEL_STRIDE: usize = 0x100;

/// Length of the register window covering channels 0..=14.
pub const DMA_WINDOW_LEN: usize = 15 * DMA_CHANNEL_STRIDE;

// Channel register offsets.
const REG_CS: usize = 0x00;
const REG_CONBLK_AD: usize = 0x04;
const REG_DEBUG: usize = 0x20;

// Control/status bits.
const CS_ACTIVE: u32 = 1 << 0;
const CS_END: u32 = 1 << 1;
const CS_INT: u32 = 1 << 2;
const CS_RESET: u32 = 1 << 31;

// Debug register write-1-to-clear error bits.
const DEBUG_READ_LAST_NOT_SET: u32 = 1 << 0;
const DEBUG_FIFO_ERROR: u32 = 1 << 1;
const DEBUG_READ_ERROR: u32 = 1 << 2;

// Transfer-information bit positions.
const TI_WAIT_RESP: u32 = 1 << 3;
const TI_DEST_INC: u32 = 1 << 4;
const TI_DEST_DREQ: u32 = 1 << 6;
const TI_SRC_INC: u32 = 1 << 8;
const TI_SRC_DREQ: u32 = 1 << 10;
const TI_PERMAP_SHIFT: u32 = 16;
const TI_PERMAP_MASK: u32 = 0x1F;
const TI_NO_WIDE_BURSTS: u32 = 1 << 26;

/// DREQ lines a transfer can pace itself against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DreqPeripheral {
    /// No pacing; transfer runs continuously.
    AlwaysOn,
    /// PCM transmit FIFO.
    PcmTx,
    /// PCM receive FIFO.
    PcmRx,
    /// PWM FIFO.
    Pwm,
    /// SPI transmit FIFO.
    SpiTx,
    /// SPI receive FIFO.
    SpiRx,
}

impl DreqPeripheral {
    const fn code(self) -> u32 {
        match self {
            DreqPeripheral::AlwaysOn => 0,
            DreqPeripheral::PcmTx => 2,
            DreqPeripheral::PcmRx => 3,
            DreqPeripheral::Pwm => 5,
            DreqPeripheral::SpiTx => 6,
            DreqPeripheral::SpiRx => 7,
        }
    }
}

/// Builder for a control block's transfer-information word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferInfo(u32);

impl TransferInfo {
    /// An all-clear word.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Wait for AXI write responses between bursts.
    pub const fn wait_response(self) -> Self {
        Self(self.0 | TI_WAIT_RESP)
    }

    /// Increment the source address after each word.
    pub const fn source_increment(self) -> Self {
        Self(self.0 | TI_SRC_INC)
    }

    /// Increment the destination address after each word.
    pub const fn destination_increment(self) -> Self {
        Self(self.0 | TI_DEST_INC)
    }

    /// Pace destination writes on the mapped peripheral's DREQ.
    pub const fn destination_dreq(self) -> Self {
        Self(self.0 | TI_DEST_DREQ)
    }

    /// Pace source reads on the mapped peripheral's DREQ.
    pub const fn source_dreq(self) -> Self {
        Self(self.0 | TI_SRC_DREQ)
    }

    /// Select which peripheral's DREQ paces the transfer.
    pub const fn peripheral_map(self, peripheral: DreqPeripheral) -> Self {
        Self(self.0 | ((peripheral.code() & TI_PERMAP_MASK) << TI_PERMAP_SHIFT))
    }

    /// Never emit two-beat AXI bursts (required for some peripherals).
    pub const fn no_wide_bursts(self) -> Self {
        Self(self.0 | TI_NO_WIDE_BURSTS)
    }

    /// The packed register word.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A hardware DMA control block.
///
/// The engine reads these from memory, so layout and 32-byte alignment are
/// load-bearing. Addresses are bus addresses.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Default)]
pub struct DmaControlBlock {
    /// Transfer-information word (see [`TransferInfo`]).
    pub transfer_information: u32,
    /// Source bus address.
    pub source_address: u32,
    /// Destination bus address.
    pub destination_address: u32,
    /// Transfer length in bytes (low 16 bits in linear mode).
    pub transfer_length: u32,
    /// 2D stride; unused in linear mode.
    pub stride: u32,
    /// Bus address of the next control block, 0 to stop.
    pub next_control_block: u32,
    _reserved: [u32; 2],
}

const _: () = assert!(core::mem::size_of::<DmaControlBlock>() == 32);
const _: () = assert!(core::mem::align_of::<DmaControlBlock>() == 32);

impl DmaControlBlock {
    /// An all-zero descriptor.
    pub const fn zeroed() -> Self {
        Self {
            transfer_information: 0,
            source_address: 0,
            destination_address: 0,
            transfer_length: 0,
            stride: 0,
            next_control_block: 0,
            _reserved: [0; 2],
        }
    }
}

/// A DMA channel index, 0..=14.
///
/// Channel 15 lives at a separate address and is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannel(u8);

impl DmaChannel {
    /// Wrap a channel number; panics on 15 and above.
    pub const fn new(channel: u8) -> Self {
        assert!(channel < 15, "DMA channel out of range");
        Self(channel)
    }

    /// The channel number.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    const fn base(self) -> usize {
        self.0 as usize * DMA_CHANNEL_STRIDE
    }
}

/// The hardware only fetches descriptors from 256-bit-aligned addresses; a
/// misaligned one is a construction bug, not a runtime condition.
fn assert_control_block_aligned(control_block: u32) {
    assert!(
        control_block & 0x1F == 0,
        "control block {control_block:#x} not 32-byte aligned"
    );
}

/// The mapped DMA controller block.
pub struct Dma {
    regs: MmioRegion,
}

impl Dma {
    /// Wrap a mapped DMA register window.
    pub fn new(regs: MmioRegion) -> Self {
        Self { regs }
    }

    /// Reset a channel and clear its latched status and error flags.
    pub fn reset(&self, channel: DmaChannel) {
        let cs = channel.base() + REG_CS;
        self.regs.write(cs, self.regs.read(cs) | CS_RESET);

        // END and INT are write-1-to-clear.
        self.regs.write(cs, CS_END | CS_INT);

        self.regs.write(
            channel.base() + REG_DEBUG,
            DEBUG_READ_LAST_NOT_SET | DEBUG_FIFO_ERROR | DEBUG_READ_ERROR,
        );
    }

    /// Load a channel's control-block address.
    ///
    /// `control_block` is a bus address and must be 32-byte aligned.
    pub fn set_control_block(&self, channel: DmaChannel, control_block: u32) {
        assert_control_block_aligned(control_block);
        self.regs.write(channel.base() + REG_CONBLK_AD, control_block);
    }

    /// Bus address of the control block the channel is currently executing.
    pub fn control_block(&self, channel: DmaChannel) -> u32 {
        self.regs.read(channel.base() + REG_CONBLK_AD)
    }

    /// Set or clear the channel's ACTIVE bit.
    pub fn enable(&self, channel: DmaChannel, enable: bool) {
        let cs = channel.base() + REG_CS;
        let value = self.regs.read(cs);
        let value = if enable {
            value | CS_ACTIVE
        } else {
            value & !CS_ACTIVE
        };
        self.regs.write(cs, value);
    }

    /// Whether the channel is currently active.
    pub fn active(&self, channel: DmaChannel) -> bool {
        self.regs.read(channel.base() + REG_CS) & CS_ACTIVE != 0
    }

    /// Raw pointer to the channel's CS register.
    ///
    /// A signal handler may store 0 through this to halt output with a
    /// single aligned write; nothing else should use it.
    pub fn control_status_ptr(&self, channel: DmaChannel) -> *mut u32 {
        self.regs.register_ptr(channel.base() + REG_CS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_info_packs_the_pcm_tx_profile() {
        let ti = TransferInfo::new()
            .no_wide_bursts()
            .wait_response()
            .source_increment()
            .destination_dreq()
            .peripheral_map(DreqPeripheral::PcmTx);
        // NO_WIDE_BURSTS | PERMAP=2 | DEST_DREQ | WAIT_RESP | SRC_INC
        assert_eq!(ti.raw(), (1 << 26) | (2 << 16) | (1 << 8) | (1 << 6) | (1 << 3));
    }

    #[test]
    fn control_block_is_one_hardware_descriptor() {
        assert_eq!(core::mem::size_of::<DmaControlBlock>(), 32);
        assert_eq!(core::mem::align_of::<DmaControlBlock>(), 32);
    }

    #[test]
    fn channel_register_bases_step_by_the_stride() {
        assert_eq!(DmaChannel::new(0).base(), 0);
        assert_eq!(DmaChannel::new(5).base(), 0x500);
        assert_eq!(DmaChannel::new(13).base(), 0xD00);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn channel_fifteen_is_rejected() {
        DmaChannel::new(15);
    }

    #[test]
    #[should_panic(expected = "not 32-byte aligned")]
    fn misaligned_control_blocks_are_rejected() {
        assert_control_block_aligned(0xC000_0010);
    }

    #[test]
    fn aligned_control_blocks_pass_the_precondition() {
        assert_control_block_aligned(0xC000_0020);
    }
}
