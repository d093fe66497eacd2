//! Block state: 192 frames with their channel-status bits laid in.

use crate::bmc::Preamble;
use crate::channel_status::{ChannelStatus, CHANNEL_LEFT, CHANNEL_RIGHT};
use crate::subframe::{SampleDepth, Subframe};

/// Frames per IEC 60958 block; the channel-status record spans exactly one.
pub const FRAMES_PER_BLOCK: usize = 192;

/// One frame: subframe A carries the left sample, B the right.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frame {
    /// Left-channel subframe.
    pub a: Subframe,
    /// Right-channel subframe.
    pub b: Subframe,
}

/// A block's worth of subframe state.
///
/// Construction writes the channel-status records across the frames once;
/// [`encode_frame`](Block::encode_frame) then reuses the frames cyclically,
/// rewriting only the per-sample fields.
pub struct Block {
    frames: [Frame; FRAMES_PER_BLOCK],
}

impl Block {
    /// A block carrying the consumer linear-PCM channel-status records
    /// (channel 1 on A, channel 2 on B).
    pub fn new() -> Self {
        let mut block = Self {
            frames: [Frame::default(); FRAMES_PER_BLOCK],
        };
        block.write_channel_status(
            &ChannelStatus::consumer_pcm(CHANNEL_LEFT),
            &ChannelStatus::consumer_pcm(CHANNEL_RIGHT),
        );
        block
    }

    /// Spread the per-channel records across the block, one bit per frame.
    fn write_channel_status(&mut self, a: &ChannelStatus, b: &ChannelStatus) {
        for (i, frame) in self.frames.iter_mut().enumerate() {
            frame.a.set_channel_status(a.bit(i));
            frame.b.set_channel_status(b.bit(i));
        }
    }

    /// Preamble for subframe A at the given frame position: B opens the
    /// block, M marks every other left subframe. Subframe B always takes W.
    pub const fn preamble_a(frame_index: usize) -> Preamble {
        if frame_index == 0 {
            Preamble::B
        } else {
            Preamble::M
        }
    }

    /// Encode one stereo pair at `frame_index`, returning the coded words
    /// for subframes A and B.
    pub fn encode_frame(
        &mut self,
        frame_index: usize,
        depth: SampleDepth,
        left: i32,
        right: i32,
    ) -> (u64, u64) {
        assert!(frame_index < FRAMES_PER_BLOCK);

        let preamble_a = Self::preamble_a(frame_index);
        let frame = &mut self.frames[frame_index];
        let code_a = frame.a.build(preamble_a, depth, left);
        let code_b = frame.b.build(Preamble::W, depth, right);
        (code_a, code_b)
    }

    /// The frame states, in block order.
    pub fn frames(&self) -> &[Frame; FRAMES_PER_BLOCK] {
        &self.frames
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_status_bits_reassemble_into_the_records() {
        let block = Block::new();
        let expected_a = ChannelStatus::consumer_pcm(CHANNEL_LEFT);
        let expected_b = ChannelStatus::consumer_pcm(CHANNEL_RIGHT);
        for i in 0..FRAMES_PER_BLOCK {
            assert_eq!(block.frames()[i].a.channel_status(), expected_a.bit(i));
            assert_eq!(block.frames()[i].b.channel_status(), expected_b.bit(i));
        }
    }

    #[test]
    fn only_frame_zero_takes_the_block_preamble() {
        assert_eq!(Block::preamble_a(0), Preamble::B);
        for i in 1..FRAMES_PER_BLOCK {
            assert_eq!(Block::preamble_a(i), Preamble::M);
        }
    }

    #[test]
    fn encode_frame_tags_codes_with_the_schedule() {
        let mut block = Block::new();
        let (a0, b0) = block.encode_frame(0, SampleDepth::Bits16, 0, 0);
        assert_eq!(a0 >> 56, 0xE8, "frame 0 A leads with preamble B");
        assert_eq!(b0 >> 56, 0xE4, "B subframes lead with preamble W");

        let (a1, _) = block.encode_frame(1, SampleDepth::Bits16, 0, 0);
        assert_eq!(a1 >> 56, 0xE2, "later A subframes lead with preamble M");
    }
}
