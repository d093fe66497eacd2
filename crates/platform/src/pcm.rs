//! PCM/I2S serializer driver.
//!
//! The serializer is used as a dumb shift register: 32-bit frames, one
//! channel at full width, master clock and frame sync, DREQ-paced DMA into
//! the transmit FIFO. The block has no reset line; "reset" rewrites every
//! register to its datasheet default.

use std::thread;
use std::time::Duration;

use crate::mmio::MmioRegion;
use crate::BUS_PERIPHERAL_BASE;

/// Offset of the PCM block from the peripheral base.
pub const PCM_BASE_OFFSET: u64 = 0x0020_3000;

/// Length of the register window the driver maps.
pub const PCM_WINDOW_LEN: usize = 0x24;

/// Bus address of the transmit FIFO, as DMA destination.
pub const FIFO_BUS_ADDRESS: u32 = BUS_PERIPHERAL_BASE + 0x0020_3004;

/// Transmit FIFO depth in words; DREQ thresholds must not exceed it.
pub const FIFO_DEPTH: u8 = 64;

// Register offsets.
const REG_CS: usize = 0x00;
const REG_MODE: usize = 0x08;
const REG_RXC: usize = 0x0C;
const REG_TXC: usize = 0x10;
const REG_DREQ: usize = 0x14;
const REG_INTEN: usize = 0x18;
const REG_INTSTC: usize = 0x1C;
const REG_GRAY: usize = 0x20;

// Control/status bits.
const CS_EN: u32 = 1 << 0;
const CS_RXON: u32 = 1 << 1;
const CS_TXON: u32 = 1 << 2;
const CS_TXCLR: u32 = 1 << 3;
const CS_RXCLR: u32 = 1 << 4;
const CS_TXTHR_SHIFT: u32 = 5;
const CS_RXTHR_SHIFT: u32 = 7;
const CS_THR_MASK: u32 = 0x3;
const CS_DMAEN: u32 = 1 << 9;
const CS_TXERR: u32 = 1 << 15;
const CS_RXERR: u32 = 1 << 16;
const CS_SYNC: u32 = 1 << 24;
const CS_STBY: u32 = 1 << 25;

// Mode register fields.
const MODE_FSLEN_SHIFT: u32 = 0;
const MODE_FSLEN_MASK: u32 = 0x3FF;
const MODE_FLEN_SHIFT: u32 = 10;
const MODE_FLEN_MASK: u32 = 0x3FF;
const MODE_FSI: u32 = 1 << 20;
const MODE_FSM: u32 = 1 << 21;
const MODE_CLKI: u32 = 1 << 22;
const MODE_CLKM: u32 = 1 << 23;
const MODE_FTXP: u32 = 1 << 24;
const MODE_FRXP: u32 = 1 << 25;

// Channel config fields (TXC and RXC share the layout).
const XC_CH2WID_SHIFT: u32 = 0;
const XC_CH2POS_SHIFT: u32 = 4;
const XC_CH2EN: u32 = 1 << 14;
const XC_CH2WEX: u32 = 1 << 15;
const XC_CH1WID_SHIFT: u32 = 16;
const XC_CH1POS_SHIFT: u32 = 20;
const XC_CH1EN: u32 = 1 << 30;
const XC_CH1WEX: u32 = 1 << 31;
const XC_WID_MASK: u32 = 0xF;
const XC_POS_MASK: u32 = 0x3FF;

// DREQ register fields.
const DREQ_RX_SHIFT: u32 = 0;
const DREQ_TX_SHIFT: u32 = 8;
const DREQ_RX_PANIC_SHIFT: u32 = 16;
const DREQ_TX_PANIC_SHIFT: u32 = 24;
const DREQ_FIELD_MASK: u32 = 0x7F;

// Datasheet defaults for the DREQ register after "reset".
const DREQ_RESET: u32 = (0x10 << DREQ_TX_PANIC_SHIFT)
    | (0x30 << DREQ_RX_PANIC_SHIFT)
    | (0x30 << DREQ_TX_SHIFT)
    | (0x20 << DREQ_RX_SHIFT);

/// Master or slave role for a clock or frame-sync line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmRole {
    /// The serializer drives the line.
    Master,
    /// An external device drives the line.
    Slave,
}

/// Frame packing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// One channel word per 32-bit FIFO word.
    Unpacked,
    /// Two 16-bit channel words packed per FIFO word.
    Packed,
}

/// Frame-sync line configuration.
#[derive(Debug, Clone, Copy)]
pub struct FrameSyncConfig {
    /// High time of frame sync in clocks.
    pub length: u16,
    /// Invert the line.
    pub invert: bool,
    /// Who drives the line.
    pub mode: PcmRole,
}

/// Bit-clock configuration.
#[derive(Debug, Clone, Copy)]
pub struct BitClockConfig {
    /// Invert the clock.
    pub invert: bool,
    /// Who drives the clock.
    pub mode: PcmRole,
}

/// Frame format configuration.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// Transmit packing.
    pub tx_mode: FrameMode,
    /// Receive packing.
    pub rx_mode: FrameMode,
    /// Frame length in bit clocks.
    pub length: u16,
}

/// FIFO interrupt/flag thresholds (2-bit codes).
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoThresholds {
    /// TXW flag threshold.
    pub tx: u8,
    /// RXR flag threshold.
    pub rx: u8,
}

/// Full serializer configuration.
#[derive(Debug, Clone, Copy)]
pub struct PcmConfig {
    /// Frame-sync line.
    pub frame_sync: FrameSyncConfig,
    /// Bit clock.
    pub clock: BitClockConfig,
    /// Frame format.
    pub frame: FrameConfig,
    /// FIFO flag thresholds.
    pub fifo: FifoThresholds,
}

/// DREQ pacing thresholds, in FIFO words.
#[derive(Debug, Clone, Copy, Default)]
pub struct DmaThresholds {
    /// TX DREQ asserts when the FIFO drops below this level.
    pub tx_threshold: u8,
    /// TX panic asserts below this level.
    pub tx_panic: u8,
    /// RX DREQ threshold.
    pub rx_threshold: u8,
    /// RX panic threshold.
    pub rx_panic: u8,
}

/// Pack the mode register from a configuration.
///
/// FTXP follows the transmit frame mode and FRXP the receive frame mode,
/// independently.
fn mode_word(config: &PcmConfig) -> u32 {
    let mut mode = 0u32;

    // FLEN holds frame length minus one.
    mode |= ((u32::from(config.frame.length) - 1) & MODE_FLEN_MASK) << MODE_FLEN_SHIFT;
    mode |= (u32::from(config.frame_sync.length) & MODE_FSLEN_MASK) << MODE_FSLEN_SHIFT;

    if config.frame_sync.invert {
        mode |= MODE_FSI;
    }
    if matches!(config.frame_sync.mode, PcmRole::Slave) {
        mode |= MODE_FSM;
    }
    if config.clock.invert {
        mode |= MODE_CLKI;
    }
    if matches!(config.clock.mode, PcmRole::Slave) {
        mode |= MODE_CLKM;
    }
    if matches!(config.frame.tx_mode, FrameMode::Packed) {
        mode |= MODE_FTXP;
    }
    if matches!(config.frame.rx_mode, FrameMode::Packed) {
        mode |= MODE_FRXP;
    }

    // PDM off, clock enabled (PDME/PDMN/CLK_DIS all zero).
    mode
}

/// One channel's placement within the frame.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Channel width in bits, 8..=32.
    pub width: u8,
    /// First bit-clock of the channel within the frame.
    pub position: u16,
}

/// Pack a TXC/RXC register from up to two channel configurations.
fn channel_word(channel1: Option<&ChannelConfig>, channel2: Option<&ChannelConfig>) -> u32 {
    let mut word = 0u32;

    if let Some(ch) = channel1 {
        word |= XC_CH1EN;
        word |= (u32::from(ch.position) & XC_POS_MASK) << XC_CH1POS_SHIFT;
        word |= (u32::from(ch.width.wrapping_sub(8)) & XC_WID_MASK) << XC_CH1WID_SHIFT;
        if ch.width >= 24 {
            word |= XC_CH1WEX;
        }
    }
    if let Some(ch) = channel2 {
        word |= XC_CH2EN;
        word |= (u32::from(ch.position) & XC_POS_MASK) << XC_CH2POS_SHIFT;
        word |= (u32::from(ch.width.wrapping_sub(8)) & XC_WID_MASK) << XC_CH2WID_SHIFT;
        if ch.width >= 24 {
            word |= XC_CH2WEX;
        }
    }

    word
}

/// The mapped PCM block.
pub struct Pcm {
    regs: MmioRegion,
}

impl Pcm {
    /// Wrap a mapped PCM register window.
    pub fn new(regs: MmioRegion) -> Self {
        Self { regs }
    }

    fn update_cs(&self, f: impl FnOnce(u32) -> u32) {
        let value = self.regs.read(REG_CS);
        self.regs.write(REG_CS, f(value));
    }

    /// Rewrite every register to its datasheet default.
    pub fn reset(&self) {
        self.update_cs(|cs| cs & !CS_EN);
        thread::sleep(Duration::from_micros(10));

        self.regs.write(REG_CS, 0);
        // FIFO clears and error flags are write-1-to-clear.
        self.regs.write(REG_CS, CS_TXCLR | CS_RXCLR | CS_TXERR | CS_RXERR);

        self.regs.write(REG_MODE, 0);
        self.regs.write(REG_RXC, 0);
        self.regs.write(REG_TXC, 0);
        self.regs.write(REG_DREQ, DREQ_RESET);
        self.regs.write(REG_INTEN, 0);
        self.regs.write(REG_INTSTC, 0);
        self.regs.write(REG_GRAY, 0);
    }

    /// Wait out at least two PCM clocks using the SYNC echo bit.
    ///
    /// The written SYNC value appears in reads two PCM clocks later; the
    /// initial value is unknown, so toggle through both states.
    fn sync(&self) {
        self.update_cs(|cs| cs & !CS_SYNC);
        while self.regs.read(REG_CS) & CS_SYNC != 0 {}

        self.update_cs(|cs| cs | CS_SYNC);
        while self.regs.read(REG_CS) & CS_SYNC == 0 {}
    }

    /// Configure frame geometry, sync, clock, and FIFO flag thresholds.
    ///
    /// Leaves the block enabled but with both directions off; transmission
    /// starts with [`enable`](Self::enable).
    pub fn configure(&self, config: &PcmConfig) {
        assert!(
            config.frame.length >= 1 && config.frame.length <= 1024,
            "frame length {} outside 1..=1024",
            config.frame.length
        );

        // Enable the block clock, leave standby, halt both directions
        // while registers change.
        self.update_cs(|cs| (cs | CS_EN | CS_STBY) & !(CS_TXON | CS_RXON));
        thread::sleep(Duration::from_micros(10));

        self.regs.write(REG_MODE, mode_word(config));

        self.update_cs(|cs| {
            let mut cs = cs & !(CS_THR_MASK << CS_TXTHR_SHIFT) & !(CS_THR_MASK << CS_RXTHR_SHIFT);
            cs |= (u32::from(config.fifo.tx) & CS_THR_MASK) << CS_TXTHR_SHIFT;
            cs |= (u32::from(config.fifo.rx) & CS_THR_MASK) << CS_RXTHR_SHIFT;
            cs
        });

        thread::sleep(Duration::from_micros(10));
    }

    /// Enable or disable DREQ generation and program its thresholds.
    pub fn configure_dma(&self, enable: bool, thresholds: &DmaThresholds) {
        assert!(thresholds.tx_threshold <= FIFO_DEPTH, "TX threshold exceeds FIFO");
        assert!(thresholds.tx_panic <= FIFO_DEPTH, "TX panic exceeds FIFO");
        assert!(thresholds.rx_threshold <= FIFO_DEPTH, "RX threshold exceeds FIFO");
        assert!(thresholds.rx_panic <= FIFO_DEPTH, "RX panic exceeds FIFO");

        self.update_cs(|cs| if enable { cs | CS_DMAEN } else { cs & !CS_DMAEN });

        let mut dreq = 0u32;
        dreq |= (u32::from(thresholds.tx_panic) & DREQ_FIELD_MASK) << DREQ_TX_PANIC_SHIFT;
        dreq |= (u32::from(thresholds.tx_threshold) & DREQ_FIELD_MASK) << DREQ_TX_SHIFT;
        dreq |= (u32::from(thresholds.rx_panic) & DREQ_FIELD_MASK) << DREQ_RX_PANIC_SHIFT;
        dreq |= (u32::from(thresholds.rx_threshold) & DREQ_FIELD_MASK) << DREQ_RX_SHIFT;
        self.regs.write(REG_DREQ, dreq);
    }

    /// Configure the transmit channels; `None` disables a channel.
    pub fn configure_transmit_channels(
        &self,
        channel1: Option<&ChannelConfig>,
        channel2: Option<&ChannelConfig>,
    ) {
        self.regs.write(REG_TXC, channel_word(channel1, channel2));
    }

    /// Configure the receive channels; `None` disables a channel.
    pub fn configure_receive_channels(
        &self,
        channel1: Option<&ChannelConfig>,
        channel2: Option<&ChannelConfig>,
    ) {
        self.regs.write(REG_RXC, channel_word(channel1, channel2));
    }

    /// Clear both FIFOs and wait for the clears to take effect.
    pub fn clear_fifos(&self) {
        self.update_cs(|cs| cs | CS_TXCLR | CS_RXCLR);
        self.sync();
    }

    /// Enable the block and switch the transmit/receive paths on or off.
    pub fn enable(&self, transmit: bool, receive: bool) {
        self.update_cs(|cs| {
            let mut cs = cs | CS_EN;
            cs = if transmit { cs | CS_TXON } else { cs & !CS_TXON };
            cs = if receive { cs | CS_RXON } else { cs & !CS_RXON };
            cs
        });
    }

    /// Switch only the transmit path, leaving everything else running.
    ///
    /// Used by the underrun policy to silence the output without a
    /// reconfiguration cycle.
    pub fn set_transmit(&self, on: bool) {
        self.update_cs(|cs| if on { cs | CS_TXON } else { cs & !CS_TXON });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spdif_config() -> PcmConfig {
        PcmConfig {
            frame_sync: FrameSyncConfig {
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
        }
    }

    #[test]
    fn mode_word_for_the_spdif_profile() {
        // FLEN = 31, FSLEN = 1, everything else master/unpacked/upright.
        assert_eq!(mode_word(&spdif_config()), (31 << 10) | 1);
    }

    #[test]
    fn mode_word_packs_tx_and_rx_independently() {
        let mut config = spdif_config();
        config.frame.tx_mode = FrameMode::Packed;
        let word = mode_word(&config);
        assert_ne!(word & MODE_FTXP, 0, "FTXP must follow the TX mode");
        assert_eq!(word & MODE_FRXP, 0, "FRXP must not follow the TX mode");

        config.frame.tx_mode = FrameMode::Unpacked;
        config.frame.rx_mode = FrameMode::Packed;
        let word = mode_word(&config);
        assert_eq!(word & MODE_FTXP, 0, "FTXP must not follow the RX mode");
        assert_ne!(word & MODE_FRXP, 0, "FRXP must follow the RX mode");
    }

    #[test]
    fn slave_roles_set_their_mode_bits() {
        let mut config = spdif_config();
        config.frame_sync.mode = PcmRole::Slave;
        config.clock.mode = PcmRole::Slave;
        let word = mode_word(&config);
        assert_ne!(word & MODE_FSM, 0);
        assert_ne!(word & MODE_CLKM, 0);
    }

    #[test]
    fn full_width_channel_one_uses_the_width_extension() {
        let word = channel_word(Some(&ChannelConfig { width: 32, position: 0 }), None);
        // CH1EN, CH1WEX, CH1WID = (32 - 8) & 0xF = 8, CH1POS = 0, CH2 clear.
        assert_eq!(word, XC_CH1EN | XC_CH1WEX | (8 << XC_CH1WID_SHIFT));
    }

    #[test]
    fn disabled_channels_leave_their_fields_clear() {
        assert_eq!(channel_word(None, None), 0);
    }

    #[test]
    fn fifo_sits_one_word_into_the_block() {
        assert_eq!(FIFO_BUS_ADDRESS, 0x7E20_3004);
    }
}
