//! Clock Manager driver.
//!
//! Each peripheral clock is a CTL/DIV register pair. Every write must carry
//! the 0x5A password in the top byte; source or divisor changes require the
//! generator to be disabled and idle first.

use crate::mmio::MmioRegion;

/// Offset of the Clock Manager block from the peripheral base.
pub const CLOCK_BASE_OFFSET: u64 = 0x0010_1000;

/// Length of the register window the driver maps.
pub const CLOCK_WINDOW_LEN: usize = 0x108;

/// Password required in bits 24..=31 of every CTL/DIV write.
const PASSWORD: u32 = 0x5A << 24;

const CTL_SRC_MASK: u32 = 0xF;
const CTL_ENAB: u32 = 1 << 4;
const CTL_BUSY: u32 = 1 << 7;
const CTL_FLIP: u32 = 1 << 8;
const CTL_MASH_SHIFT: u32 = 9;
const CTL_MASH_MASK: u32 = 0x3;

const DIV_DIVF_SHIFT: u32 = 0;
const DIV_DIVI_SHIFT: u32 = 12;
const DIV_FIELD_MASK: u32 = 0xFFF;

/// Clock generators this driver can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPeripheral {
    /// General-purpose clock 0.
    Gp0,
    /// General-purpose clock 1.
    Gp1,
    /// General-purpose clock 2.
    Gp2,
    /// PCM serializer clock.
    Pcm,
    /// PWM clock.
    Pwm,
}

impl ClockPeripheral {
    /// Byte offset of this generator's CTL register within the block.
    const fn ctl_offset(self) -> usize {
        match self {
            ClockPeripheral::Gp0 => 0x70,
            ClockPeripheral::Gp1 => 0x78,
            ClockPeripheral::Gp2 => 0x80,
            ClockPeripheral::Pcm => 0x98,
            ClockPeripheral::Pwm => 0xA0,
        }
    }

    const fn div_offset(self) -> usize {
        self.ctl_offset() + 4
    }
}

/// Clock source selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// Grounded (no clock).
    Ground,
    /// 19.2 / 54 MHz crystal oscillator.
    Oscillator,
    /// PLLA per-channel output.
    PllA,
    /// PLLC core output.
    PllC,
    /// PLLD, the stable 500/750 MHz peripheral PLL.
    PllD,
    /// HDMI auxiliary clock.
    HdmiAux,
}

impl ClockSource {
    const fn code(self) -> u32 {
        match self {
            ClockSource::Ground => 0,
            ClockSource::Oscillator => 1,
            ClockSource::PllA => 4,
            ClockSource::PllC => 5,
            ClockSource::PllD => 6,
            ClockSource::HdmiAux => 7,
        }
    }
}

/// MASH noise-shaping depth for fractional divisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MashFilter {
    /// Integer division only.
    None,
    /// One-stage noise shaping; required whenever DIVF is non-zero.
    OneStage,
    /// Two-stage noise shaping.
    TwoStage,
    /// Three-stage noise shaping.
    ThreeStage,
}

impl MashFilter {
    const fn code(self) -> u32 {
        match self {
            MashFilter::None => 0,
            MashFilter::OneStage => 1,
            MashFilter::TwoStage => 2,
            MashFilter::ThreeStage => 3,
        }
    }
}

/// One generator's full configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    /// Source to divide down.
    pub source: ClockSource,
    /// MASH filter depth.
    pub mash: MashFilter,
    /// Invert the output.
    pub invert: bool,
    /// Integer divisor, 1..=4095.
    pub divi: u16,
    /// Fractional divisor in 1/4096 steps, 0..=4095.
    pub divf: u16,
}

/// The mapped Clock Manager block.
pub struct ClockManager {
    regs: MmioRegion,
}

impl ClockManager {
    /// Wrap a mapped Clock Manager window.
    pub fn new(regs: MmioRegion) -> Self {
        Self { regs }
    }

    /// Program a generator's source and divisor.
    ///
    /// Disables the generator, waits for it to go idle, then writes the new
    /// control and divisor words. The generator stays disabled; call
    /// [`enable`](Self::enable) afterwards.
    pub fn configure(&self, peripheral: ClockPeripheral, config: &ClockConfig) {
        assert!(
            config.divi > 0 && config.divi < 4096,
            "DIVI {} outside 1..=4095",
            config.divi
        );
        assert!(config.divf < 4096, "DIVF {} outside 0..=4095", config.divf);

        // Disable without disturbing the remaining control bits.
        let control = self.regs.read(peripheral.ctl_offset());
        self.regs
            .write(peripheral.ctl_offset(), (control & !CTL_ENAB & !PASSWORD_MASK) | PASSWORD);

        self.wait_idle(peripheral);

        let mut control = PASSWORD;
        control |= config.source.code() & CTL_SRC_MASK;
        control |= (config.mash.code() & CTL_MASH_MASK) << CTL_MASH_SHIFT;
        if config.invert {
            control |= CTL_FLIP;
        }

        let mut divisor = PASSWORD;
        divisor |= (u32::from(config.divi) & DIV_FIELD_MASK) << DIV_DIVI_SHIFT;
        divisor |= (u32::from(config.divf) & DIV_FIELD_MASK) << DIV_DIVF_SHIFT;

        self.regs.write(peripheral.ctl_offset(), control);
        self.regs.write(peripheral.div_offset(), divisor);
    }

    /// Enable or disable a generator, leaving its configuration intact.
    pub fn enable(&self, peripheral: ClockPeripheral, enable: bool) {
        let control = self.regs.read(peripheral.ctl_offset());
        let control = if enable {
            control | CTL_ENAB
        } else {
            control & !CTL_ENAB
        };
        self.regs
            .write(peripheral.ctl_offset(), (control & !PASSWORD_MASK) | PASSWORD);
    }

    /// Spin until the generator reports idle.
    pub fn wait_idle(&self, peripheral: ClockPeripheral) {
        while self.regs.read(peripheral.ctl_offset()) & CTL_BUSY != 0 {}
    }
}

/// Mask of the password byte within a control word.
const PASSWORD_MASK: u32 = 0xFF << 24;
