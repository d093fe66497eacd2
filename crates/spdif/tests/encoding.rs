//! End-to-end encoding checks against the wire-level rules a receiver
//! enforces: parity, preamble schedule, channel status, and the
//! biphase-mark transition structure.

use proptest::prelude::*;
use spdif::bmc::{self, Preamble};
use spdif::channel_status::{ChannelStatus, CHANNEL_LEFT, CHANNEL_RIGHT};
use spdif::{Block, SampleDepth, Subframe, FRAMES_PER_BLOCK};

/// Half-cells of a coded word in transmission order (MSBit first).
fn half_cells(word: u64) -> Vec<u8> {
    (0..64).rev().map(|i| ((word >> i) & 1) as u8).collect()
}

/// Assert the 56 data half-cells obey biphase-mark: a transition at every
/// bit boundary, so no run of equal half-cells ever exceeds one bit period
/// outside the preamble.
fn assert_biphase_valid(word: u64) {
    let cells = half_cells(word);
    for bit in 0..28 {
        let first = 8 + 2 * bit;
        assert_ne!(cells[first], cells[first - 1], "no transition entering bit {bit}");
    }
}

#[test]
fn silence_round_trip() {
    let mut block = Block::new();
    let expected_a = ChannelStatus::consumer_pcm(CHANNEL_LEFT);
    let expected_b = ChannelStatus::consumer_pcm(CHANNEL_RIGHT);

    for pair in 0..4096usize {
        let frame_index = pair % FRAMES_PER_BLOCK;
        let (code_a, code_b) = block.encode_frame(frame_index, SampleDepth::Bits16, 0, 0);

        let expected_preamble = if frame_index == 0 { 0xE8 } else { 0xE2 };
        assert_eq!(code_a >> 56, expected_preamble, "A preamble at frame {frame_index}");
        assert_eq!(code_b >> 56, 0xE4, "B preamble at frame {frame_index}");

        // Decode back and verify the silence subframe contents.
        let (_, wire_a) = bmc::decode(code_a).expect("A word must decode");
        let subframe_a = raw_from_wire(wire_a.reverse_bits()); // undo the serializer bit flip
        assert_eq!(subframe_a.sample(), 0, "silence sample at pair {pair}");
        assert_eq!(subframe_a.aux(), 0);
        assert!(!subframe_a.validity());
        assert_eq!(subframe_a.channel_status(), expected_a.bit(frame_index));

        let (_, wire_b) = bmc::decode(code_b).expect("B word must decode");
        let subframe_b = raw_from_wire(wire_b.reverse_bits());
        assert_eq!(subframe_b.channel_status(), expected_b.bit(frame_index));

        assert_biphase_valid(code_a);
        assert_biphase_valid(code_b);
    }
}

/// Rebuild a `Subframe` view from decoded wire bits (nominal order, with the
/// preamble slot restored as zeros).
fn raw_from_wire(raw: u32) -> Subframe {
    let mut subframe = Subframe::default();
    subframe.set_aux(((raw >> 4) & 0xF) as u8);
    subframe.set_sample((raw >> 8) & 0xF_FFFF);
    subframe.set_validity(raw & (1 << 28) != 0);
    subframe.set_user_data(raw & (1 << 29) != 0);
    subframe.set_channel_status(raw & (1 << 30) != 0);
    subframe.set_parity(raw & (1 << 31) != 0);
    subframe
}

#[test]
fn dc_left_and_right_extremes() {
    let mut block = Block::new();
    for frame_index in 0..FRAMES_PER_BLOCK {
        let (code_a, code_b) =
            block.encode_frame(frame_index, SampleDepth::Bits16, 0x7FFF, -32768);

        let frame = block.frames()[frame_index];
        assert_eq!(frame.a.sample(), 0x7FFF0);
        assert_eq!(frame.b.sample(), 0x80000);
        assert_eq!(frame.a.raw().count_ones() % 2, 0, "A parity");
        assert_eq!(frame.b.raw().count_ones() % 2, 0, "B parity");

        // Even parity keeps the line low at word boundaries.
        assert_eq!(code_a & 1, 0);
        assert_eq!(code_b & 1, 0);
    }
}

#[test]
fn block_boundary_restarts_the_preamble_schedule() {
    let mut block = Block::new();
    let mut preambles = Vec::new();
    for frame in 0..193usize {
        let frame_index = frame % FRAMES_PER_BLOCK;
        let (code_a, code_b) = block.encode_frame(frame_index, SampleDepth::Bits16, 0, 0);
        preambles.push(code_a >> 56);
        assert_eq!(code_b >> 56, 0xE4);
    }

    assert_eq!(preambles[0], 0xE8, "frame 0 opens a block");
    assert_eq!(preambles[192], 0xE8, "frame 192 opens the next block");
    assert!(
        preambles[1..192].iter().all(|&p| p == 0xE2),
        "frames 1..191 carry preamble M"
    );
}

#[test]
fn twenty_four_bit_sample_splits() {
    let mut block = Block::new();
    block.encode_frame(1, SampleDepth::Bits24, 0x123456, 0);
    let frame = block.frames()[1];
    assert_eq!(frame.a.sample(), 0x12345);
    assert_eq!(frame.a.aux(), 0x6);
    assert_eq!(frame.a.raw().count_ones() % 2, 0);
}

proptest! {
    /// Every subframe carries even parity and rests the line low,
    /// regardless of sample value, depth, or block position.
    #[test]
    fn parity_and_line_state_hold_for_all_samples(
        left in any::<i16>(),
        right in any::<i16>(),
        frame_index in 0usize..FRAMES_PER_BLOCK,
    ) {
        let mut block = Block::new();
        let (code_a, code_b) =
            block.encode_frame(frame_index, SampleDepth::Bits16, i32::from(left), i32::from(right));

        let frame = block.frames()[frame_index];
        prop_assert_eq!(frame.a.raw().count_ones() % 2, 0);
        prop_assert_eq!(frame.b.raw().count_ones() % 2, 0);
        prop_assert_eq!(code_a & 1, 0);
        prop_assert_eq!(code_b & 1, 0);

        assert_biphase_valid(code_a);
        assert_biphase_valid(code_b);
    }

    /// The biphase-mark coder round-trips arbitrary 28-bit payloads under
    /// every preamble.
    #[test]
    fn bmc_round_trips(data in 0u32..=0x0FFF_FFFF) {
        for preamble in [Preamble::B, Preamble::M, Preamble::W] {
            let code = bmc::encode(preamble, data);
            prop_assert_eq!(bmc::decode(code), Some((preamble, data)));
        }
    }

    /// 16-bit samples land shifted by four with a clear aux field.
    #[test]
    fn sixteen_bit_placement(sample in any::<i16>()) {
        let mut subframe = Subframe::default();
        subframe.build(Preamble::M, SampleDepth::Bits16, i32::from(sample));
        prop_assert_eq!(subframe.sample(), ((sample as u32) << 4) & 0xF_FFFF);
        prop_assert_eq!(subframe.aux(), 0);
    }
}
