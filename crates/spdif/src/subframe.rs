//! Subframe word assembly.
//!
//! A subframe is a 32-bit word whose fields are addressed here by explicit
//! shift/mask accessors. Nominal bit order (wire order is LSB first):
//!
//! ```text
//! bits  0..=3   preamble time slot (never stored, see `bmc`)
//! bits  4..=7   aux (low 4 bits of a 24-bit sample)
//! bits  8..=27  sample (20 bits)
//! bit   28      validity (0 = sample is valid)
//! bit   29      user data
//! bit   30      channel status
//! bit   31      parity (even over bits 4..=30)
//! ```
//!
//! The PCM serializer shifts MSBit first while IEC 60958 transmits LSBit
//! first, so the finished word is bit-reversed before biphase-mark coding.

use crate::bmc::{self, Preamble};

/// Input sample width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDepth {
    /// 16-bit samples, scaled into the top of the 20-bit sample field.
    Bits16,
    /// 20-bit samples, stored verbatim.
    Bits20,
    /// 24-bit samples: top 20 bits in the sample field, low 4 in aux.
    Bits24,
}

const AUX_SHIFT: u32 = 4;
const AUX_MASK: u32 = 0xF;
const SAMPLE_SHIFT: u32 = 8;
const SAMPLE_MASK: u32 = 0xF_FFFF;
const VALIDITY_BIT: u32 = 1 << 28;
const USER_DATA_BIT: u32 = 1 << 29;
const CHANNEL_STATUS_BIT: u32 = 1 << 30;
const PARITY_BIT: u32 = 1 << 31;

/// One channel's 32-bit subframe word.
///
/// Holds the channel-status bit written once per block by
/// [`Block::new`](crate::Block::new); the per-sample fields are rewritten by
/// [`build`](Subframe::build) on every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subframe(u32);

impl Subframe {
    /// The raw word, nominal bit order.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Aux field (bits 4..=7).
    pub const fn aux(self) -> u8 {
        ((self.0 >> AUX_SHIFT) & AUX_MASK) as u8
    }

    /// Set the aux field.
    pub fn set_aux(&mut self, aux: u8) {
        self.0 = (self.0 & !(AUX_MASK << AUX_SHIFT)) | ((u32::from(aux) & AUX_MASK) << AUX_SHIFT);
    }

    /// Sample field (bits 8..=27).
    pub const fn sample(self) -> u32 {
        (self.0 >> SAMPLE_SHIFT) & SAMPLE_MASK
    }

    /// Set the 20-bit sample field.
    pub fn set_sample(&mut self, sample: u32) {
        self.0 = (self.0 & !(SAMPLE_MASK << SAMPLE_SHIFT)) | ((sample & SAMPLE_MASK) << SAMPLE_SHIFT);
    }

    /// Validity flag. A low bit marks the sample as valid.
    pub const fn validity(self) -> bool {
        self.0 & VALIDITY_BIT != 0
    }

    /// Set the validity flag (raw bit value; 0 = valid).
    pub fn set_validity(&mut self, bit: bool) {
        self.set_flag(VALIDITY_BIT, bit);
    }

    /// User-data bit.
    pub const fn user_data(self) -> bool {
        self.0 & USER_DATA_BIT != 0
    }

    /// Set the user-data bit.
    pub fn set_user_data(&mut self, bit: bool) {
        self.set_flag(USER_DATA_BIT, bit);
    }

    /// Channel-status bit.
    pub const fn channel_status(self) -> bool {
        self.0 & CHANNEL_STATUS_BIT != 0
    }

    /// Set the channel-status bit.
    pub fn set_channel_status(&mut self, bit: bool) {
        self.set_flag(CHANNEL_STATUS_BIT, bit);
    }

    /// Parity bit.
    pub const fn parity(self) -> bool {
        self.0 & PARITY_BIT != 0
    }

    /// Set the parity bit.
    pub fn set_parity(&mut self, bit: bool) {
        self.set_flag(PARITY_BIT, bit);
    }

    fn set_flag(&mut self, mask: u32, bit: bool) {
        if bit {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    /// Place `sample` into the word, recompute parity, and return the
    /// biphase-mark-coded subframe ready for the serializer.
    ///
    /// Only the sample, aux, validity, and parity fields change; the
    /// channel-status and user-data bits are left as previously written.
    pub fn build(&mut self, preamble: Preamble, depth: SampleDepth, sample: i32) -> u64 {
        match depth {
            SampleDepth::Bits16 => {
                self.set_sample((sample as u32) << 4);
                self.set_aux(0);
            }
            SampleDepth::Bits20 => {
                self.set_sample(sample as u32);
                self.set_aux(0);
            }
            SampleDepth::Bits24 => {
                self.set_sample((sample >> 4) as u32);
                self.set_aux((sample & 0xF) as u8);
            }
        }

        self.set_validity(false); // 0 indicates a valid sample

        // Even parity over everything below the parity bit; the preamble
        // slot bits are always zero so counting the whole word is safe.
        self.set_parity(false);
        self.set_parity(self.0.count_ones() % 2 == 1);

        bmc::encode(preamble, self.0.reverse_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bit_samples_scale_to_twenty() {
        let mut subframe = Subframe::default();
        subframe.build(Preamble::M, SampleDepth::Bits16, 0x7FFF);
        assert_eq!(subframe.sample(), 0x7FFF0);
        assert_eq!(subframe.aux(), 0);
    }

    #[test]
    fn sixteen_bit_negative_samples_wrap_into_the_field() {
        let mut subframe = Subframe::default();
        subframe.build(Preamble::W, SampleDepth::Bits16, -32768);
        assert_eq!(subframe.sample(), 0x80000);
    }

    #[test]
    fn twenty_four_bit_samples_split_into_sample_and_aux() {
        let mut subframe = Subframe::default();
        subframe.build(Preamble::M, SampleDepth::Bits24, 0x123456);
        assert_eq!(subframe.sample(), 0x12345);
        assert_eq!(subframe.aux(), 0x6);
    }

    #[test]
    fn parity_makes_the_word_even() {
        for sample in [0i32, 1, -1, 0x7FFF, -32768, 12345] {
            let mut subframe = Subframe::default();
            subframe.set_channel_status(true);
            subframe.build(Preamble::M, SampleDepth::Bits16, sample);
            assert_eq!(
                subframe.raw().count_ones() % 2,
                0,
                "parity must even out sample {sample}"
            );
        }
    }

    #[test]
    fn validity_is_cleared_on_every_build() {
        let mut subframe = Subframe::default();
        subframe.set_validity(true);
        subframe.build(Preamble::M, SampleDepth::Bits16, 0);
        assert!(!subframe.validity());
    }

    #[test]
    fn build_preserves_channel_status() {
        let mut subframe = Subframe::default();
        subframe.set_channel_status(true);
        subframe.build(Preamble::M, SampleDepth::Bits16, -42);
        assert!(subframe.channel_status());
    }

    #[test]
    fn even_parity_ends_the_coded_word_low() {
        // Line state after the word is its final half-cell; even parity
        // must force it low so the next preamble needs no inversion.
        for sample in [0i32, 0x1234, -20000] {
            let mut subframe = Subframe::default();
            let code = subframe.build(Preamble::B, SampleDepth::Bits16, sample);
            assert_eq!(code & 1, 0, "line must rest low after sample {sample}");
        }
    }
}
