//! Hardware bring-up and teardown.
//!
//! One `Engine` value owns every mapped peripheral and the DMA ring; it is
//! constructed once in `main` and passed where needed. Construction
//! configures everything but arms nothing; [`Engine::start`] flips the two
//! enable bits once the ring is prefilled.

use anyhow::{Context, Result};
use platform::board::Board;
use platform::clock::{
    ClockConfig, ClockManager, ClockPeripheral, ClockSource, MashFilter, CLOCK_BASE_OFFSET,
    CLOCK_WINDOW_LEN,
};
use platform::dma::{Dma, DmaChannel, DMA_BASE_OFFSET, DMA_WINDOW_LEN};
use platform::gpio::{
    Gpio, GpioConfig, GpioEventDetect, GpioFunction, GpioPull, GPIO_BASE_OFFSET, GPIO_WINDOW_LEN,
};
use platform::mailbox::Mailbox;
use platform::mmio::MmioRegion;
use platform::pcm::{
    BitClockConfig, ChannelConfig, DmaThresholds, FifoThresholds, FrameConfig, FrameMode,
    FrameSyncConfig, Pcm, PcmConfig, PcmRole, PCM_BASE_OFFSET, PCM_WINDOW_LEN,
};

use crate::clock_math::{self, ClockDivisor};
use crate::ring::DmaRing;

/// S/PDIF output pin (PCM DOUT via alternate function 0).
pub const OUTPUT_PIN: u32 = 21;

/// PCM TX DREQ threshold in FIFO words.
const TX_DREQ_THRESHOLD: u8 = 32;
/// PCM TX panic threshold in FIFO words.
const TX_DREQ_PANIC: u8 = 16;

/// The configured, not-yet-running output engine.
pub struct Engine {
    board: Board,
    clock: ClockManager,
    dma: Dma,
    gpio: Gpio,
    pcm: Pcm,
    ring: DmaRing,
    channel: DmaChannel,
}

impl Engine {
    /// Map the peripherals, allocate the ring, and configure the whole
    /// clock/PCM/DMA/GPIO chain for `sample_rate`.
    pub fn new(sample_rate: u32) -> Result<Self> {
        anyhow::ensure!(sample_rate > 0, "sample rate must be positive");

        let board = Board::detect().context("board detection failed")?;
        let channel = board.dma_channel();

        let clock = ClockManager::new(
            MmioRegion::map(board.peripheral_base + CLOCK_BASE_OFFSET, CLOCK_WINDOW_LEN)
                .context("mapping the clock manager failed")?,
        );
        let dma = Dma::new(
            MmioRegion::map(board.peripheral_base + DMA_BASE_OFFSET, DMA_WINDOW_LEN)
                .context("mapping the DMA controller failed")?,
        );
        let gpio = Gpio::new(
            MmioRegion::map(board.peripheral_base + GPIO_BASE_OFFSET, GPIO_WINDOW_LEN)
                .context("mapping the GPIO block failed")?,
        );
        let pcm = Pcm::new(
            MmioRegion::map(board.peripheral_base + PCM_BASE_OFFSET, PCM_WINDOW_LEN)
                .context("mapping the PCM block failed")?,
        );

        // The firmware reports which channels the ARM may use; a conflict
        // still works often enough that it only warrants a warning.
        match Mailbox::open().and_then(|mailbox| mailbox.dma_channel_mask()) {
            Ok(mask) => {
                if mask & (1 << channel.index()) == 0 {
                    tracing::warn!(
                        channel = channel.index(),
                        "firmware marks the DMA channel as in use"
                    );
                }
            }
            Err(error) => tracing::debug!(%error, "DMA channel mask query failed"),
        }

        let ring = DmaRing::allocate().context("allocating the DMA ring failed")?;

        let engine = Self {
            board,
            clock,
            dma,
            gpio,
            pcm,
            ring,
            channel,
        };
        engine.configure(sample_rate);
        Ok(engine)
    }

    /// Program every peripheral; nothing is armed yet.
    fn configure(&self, sample_rate: u32) {
        // DMA: park the channel on the first descriptor.
        self.dma.reset(self.channel);
        self.dma
            .set_control_block(self.channel, self.ring.control_bus_address(0));

        // GPIO: route PCM DOUT to the output pin, pulls untouched.
        self.gpio.configure_mask(
            1 << OUTPUT_PIN,
            &GpioConfig {
                function: GpioFunction::Af0,
                pull: GpioPull::NoChange,
                event_detect: GpioEventDetect::None,
            },
        );

        // Clock: PLLD divided down to the line rate.
        let divisor = clock_math::spdif_divisor(self.board.plld_hz(), sample_rate);
        tracing::debug!(
            line_rate = clock_math::line_rate_hz(sample_rate),
            divi = divisor.divi,
            divf = divisor.divf,
            "configuring the PCM clock"
        );
        self.configure_clock(&divisor);
        // The serializer needs its clock ticking before the SYNC handshake
        // in clear_fifos can complete.
        self.clock.enable(ClockPeripheral::Pcm, true);

        // PCM: 32-bit frames on one full-width channel, DREQ-paced DMA.
        self.pcm.reset();
        self.pcm.configure(&PcmConfig {
            frame_sync: FrameSyncConfig {
                // S/PDIF has no frame sync; one clock of FS is handy on a
                // scope and otherwise harmless.
                length: 1,
                invert: false,
                mode: PcmRole::Master,
            },
            clock: BitClockConfig {
                invert: false,
                mode: PcmRole::Master,
            },
            frame: FrameConfig {
                tx_mode: FrameMode::Unpacked,
                rx_mode: FrameMode::Unpacked,
                length: 32,
            },
            fifo: FifoThresholds::default(),
        });
        self.pcm.configure_dma(
            true,
            &DmaThresholds {
                tx_threshold: TX_DREQ_THRESHOLD,
                tx_panic: TX_DREQ_PANIC,
                rx_threshold: 0,
                rx_panic: 0,
            },
        );
        self.pcm.configure_transmit_channels(
            Some(&ChannelConfig {
                width: 32,
                position: 0,
            }),
            None,
        );
        self.pcm.clear_fifos();
    }

    fn configure_clock(&self, divisor: &ClockDivisor) {
        self.clock.configure(
            ClockPeripheral::Pcm,
            &ClockConfig {
                source: ClockSource::PllD,
                // MASH is required whenever the divisor has a fraction.
                mash: if divisor.needs_mash() {
                    MashFilter::OneStage
                } else {
                    MashFilter::None
                },
                invert: false,
                divi: divisor.divi,
                divf: divisor.divf,
            },
        );
    }

    /// Arm the hardware: DMA first, then the serializer. The ring must be
    /// prefilled; bits appear on the pin immediately.
    pub fn start(&self) {
        self.dma.enable(self.channel, true);
        self.pcm.enable(true, false);
    }

    /// Which ring slot the DMA engine is currently draining, if the
    /// readback matches a descriptor.
    pub fn active_slot(&self) -> Option<usize> {
        self.ring
            .slot_of_control_block(self.dma.control_block(self.channel))
    }

    /// Store one encoded stereo sample into the ring.
    pub fn store_sample(&self, slot: usize, index: usize, code_a: u64, code_b: u64) {
        self.ring.store_sample(slot, index, code_a, code_b);
    }

    /// Switch the serializer's transmit path without reconfiguring.
    pub fn set_transmit(&self, on: bool) {
        self.pcm.set_transmit(on);
    }

    /// CS register of the armed DMA channel, for the signal handlers.
    pub fn dma_stop_register(&self) -> *mut u32 {
        self.dma.control_status_ptr(self.channel)
    }

    /// Stop and release the hardware in reverse acquisition order: PCM
    /// back to defaults, clock off, DMA channel off. The ring memory
    /// returns to the firmware when the engine drops.
    pub fn shutdown(&self) {
        self.pcm.reset();
        self.clock.enable(ClockPeripheral::Pcm, false);
        self.dma.enable(self.channel, false);
    }
}
