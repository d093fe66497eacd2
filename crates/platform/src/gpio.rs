//! GPIO block driver.
//!
//! Covers what the transmitter needs from bank 0 (pins 0..=31): function
//! select, the pull-resistor strobe sequence, and event-detect routing.

use std::thread;
use std::time::Duration;

use crate::mmio::MmioRegion;

/// Offset of the GPIO block from the peripheral base.
pub const GPIO_BASE_OFFSET: u64 = 0x0020_0000;

/// Length of the register window the driver maps.
pub const GPIO_WINDOW_LEN: usize = 0xB4;

/// Pins addressable through the bank-0 mask.
pub const GPIO_PIN_COUNT: u32 = 32;

// Register offsets (bank 0 where banked).
const REG_GPFSEL0: usize = 0x00;
const REG_GPEDS0: usize = 0x40;
const REG_GPREN0: usize = 0x4C;
const REG_GPFEN0: usize = 0x58;
const REG_GPHEN0: usize = 0x64;
const REG_GPLEN0: usize = 0x70;
const REG_GPAREN0: usize = 0x7C;
const REG_GPAFEN0: usize = 0x88;
const REG_GPPUD: usize = 0x94;
const REG_GPPUDCLK0: usize = 0x98;

/// Pin function selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioFunction {
    /// Input.
    Input,
    /// Output.
    Output,
    /// Alternate function 0.
    Af0,
    /// Alternate function 1.
    Af1,
    /// Alternate function 2.
    Af2,
    /// Alternate function 3.
    Af3,
    /// Alternate function 4.
    Af4,
    /// Alternate function 5.
    Af5,
}

impl GpioFunction {
    /// The 3-bit FSEL field code. The alternate functions are not in
    /// numeric order in hardware.
    const fn code(self) -> u32 {
        match self {
            GpioFunction::Input => 0b000,
            GpioFunction::Output => 0b001,
            GpioFunction::Af0 => 0b100,
            GpioFunction::Af1 => 0b101,
            GpioFunction::Af2 => 0b110,
            GpioFunction::Af3 => 0b111,
            GpioFunction::Af4 => 0b011,
            GpioFunction::Af5 => 0b010,
        }
    }
}

/// Pull-resistor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioPull {
    /// Leave whatever the firmware configured.
    NoChange,
    /// No pull resistor.
    Off,
    /// Pull down.
    Down,
    /// Pull up.
    Up,
}

/// Event-detect selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioEventDetect {
    /// No event detection.
    None,
    /// Synchronous rising edge.
    RisingEdge,
    /// Synchronous falling edge.
    FallingEdge,
    /// Either edge.
    AnyEdge,
    /// High level.
    HighLevel,
    /// Low level.
    LowLevel,
    /// Asynchronous rising edge.
    RisingEdgeAsync,
    /// Asynchronous falling edge.
    FallingEdgeAsync,
}

/// Complete per-pin configuration applied by [`Gpio::configure_mask`].
#[derive(Debug, Clone, Copy)]
pub struct GpioConfig {
    /// Function to select.
    pub function: GpioFunction,
    /// Pull resistor to program.
    pub pull: GpioPull,
    /// Event detection to route.
    pub event_detect: GpioEventDetect,
}

/// The mapped GPIO block.
pub struct Gpio {
    regs: MmioRegion,
}

impl Gpio {
    /// Wrap a mapped GPIO register window.
    pub fn new(regs: MmioRegion) -> Self {
        Self { regs }
    }

    /// Apply `config` to every pin set in `mask` (bank 0).
    pub fn configure_mask(&self, mask: u32, config: &GpioConfig) {
        for pin in 0..GPIO_PIN_COUNT {
            if mask & (1 << pin) != 0 {
                self.set_function(pin, config.function);
            }
        }

        self.clear_events(mask);
        self.select_events(mask, config.event_detect);
        self.set_pull(mask, config.pull);
    }

    /// Program one pin's function-select field.
    fn set_function(&self, pin: u32, function: GpioFunction) {
        assert!(pin < GPIO_PIN_COUNT, "pin {pin} out of range");

        let reg = REG_GPFSEL0 + 4 * (pin as usize / 10);
        let shift = (pin % 10) * 3;
        let value = self.regs.read(reg);
        let value = (value & !(0b111 << shift)) | (function.code() << shift);
        self.regs.write(reg, value);
    }

    /// Disable every event-detect source for the masked pins and drop any
    /// latched events.
    fn clear_events(&self, mask: u32) {
        for reg in [
            REG_GPREN0, REG_GPFEN0, REG_GPHEN0, REG_GPLEN0, REG_GPAREN0, REG_GPAFEN0,
        ] {
            let value = self.regs.read(reg);
            self.regs.write(reg, value & !mask);
        }
        // Event status is write-1-to-clear.
        self.regs.write(REG_GPEDS0, mask);
    }

    fn select_events(&self, mask: u32, detect: GpioEventDetect) {
        let enable = |reg: usize| {
            let value = self.regs.read(reg);
            self.regs.write(reg, value | mask);
        };
        match detect {
            GpioEventDetect::None => {}
            GpioEventDetect::RisingEdge => enable(REG_GPREN0),
            GpioEventDetect::FallingEdge => enable(REG_GPFEN0),
            GpioEventDetect::AnyEdge => {
                enable(REG_GPREN0);
                enable(REG_GPFEN0);
            }
            GpioEventDetect::HighLevel => enable(REG_GPHEN0),
            GpioEventDetect::LowLevel => enable(REG_GPLEN0),
            GpioEventDetect::RisingEdgeAsync => enable(REG_GPAREN0),
            GpioEventDetect::FallingEdgeAsync => enable(REG_GPAFEN0),
        }
    }

    /// Run the pull-resistor strobe sequence for the masked pins.
    ///
    /// The control value must be held for 150 cycles before and after the
    /// clock strobe; a microsecond sleep comfortably covers that at any
    /// core clock.
    fn set_pull(&self, mask: u32, pull: GpioPull) {
        let code = match pull {
            GpioPull::NoChange => return,
            GpioPull::Off => 0,
            GpioPull::Down => 1,
            GpioPull::Up => 2,
        };

        self.regs.write(REG_GPPUD, code);
        thread::sleep(Duration::from_micros(1));
        self.regs.write(REG_GPPUDCLK0, mask);
        thread::sleep(Duration::from_micros(1));
        self.regs.write(REG_GPPUD, 0);
        self.regs.write(REG_GPPUDCLK0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_function_codes_are_not_sequential() {
        assert_eq!(GpioFunction::Af0.code(), 0b100);
        assert_eq!(GpioFunction::Af4.code(), 0b011);
        assert_eq!(GpioFunction::Af5.code(), 0b010);
    }

    #[test]
    fn pin_21_lands_in_fsel2_bits_3_to_5() {
        let pin = 21u32;
        assert_eq!(REG_GPFSEL0 + 4 * (pin as usize / 10), 0x08);
        assert_eq!((pin % 10) * 3, 3);
    }
}
