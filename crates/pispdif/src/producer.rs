//! The producer loop.
//!
//! Reads stereo frames from the input, encodes them, and keeps the ring
//! filled ahead of the DMA cursor. Underrun is not an error: when the input
//! would block, the ring is refilled with silence (or barely-audible dither
//! that keeps downstream receivers locked) until data returns. The block
//! frame counter keeps running across underruns, so receivers never lose
//! channel-status alignment.

use std::thread;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use spdif::{Block, SampleDepth, FRAMES_PER_BLOCK};

use crate::engine::Engine;
use crate::input::{Input, ReadOutcome};
use crate::ring::{SLOT_COUNT, SLOT_SAMPLES};
use crate::signals;

/// Keep-alive dither amplitude, in LSBs of a 16-bit sample.
const DITHER_AMPLITUDE: i32 = 5;

/// Poll interval while waiting for input during an underrun; bounds the
/// latency of noticing a termination signal.
const UNDERRUN_POLL: Duration = Duration::from_millis(100);

/// Behavior switches for the loop.
#[derive(Debug, Clone, Copy)]
pub struct ProducerOptions {
    /// Output sample rate (drives the cursor-wait sleep time).
    pub sample_rate: u32,
    /// Subframe depth for encoding.
    pub depth: SampleDepth,
    /// Emit dither instead of true silence while underrun.
    pub keep_alive: bool,
    /// Drop PCM TXON while waiting for data.
    pub disable_pcm_on_idle: bool,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// The input reached end of stream.
    EndOfStream,
    /// A termination signal arrived.
    Signal,
}

/// Frame encoder state that survives underruns: the block and the position
/// within it.
struct FrameEncoder {
    block: Block,
    depth: SampleDepth,
    frame_index: usize,
}

impl FrameEncoder {
    fn new(depth: SampleDepth) -> Self {
        Self {
            block: Block::new(),
            depth,
            frame_index: 0,
        }
    }

    /// Encode one stereo pair and advance the block position.
    fn encode(&mut self, left: i32, right: i32) -> (u64, u64) {
        let codes = self
            .block
            .encode_frame(self.frame_index, self.depth, left, right);
        self.frame_index = (self.frame_index + 1) % FRAMES_PER_BLOCK;
        codes
    }
}

/// Write position within the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RingCursor {
    slot: usize,
    offset: usize,
}

impl RingCursor {
    const fn start() -> Self {
        Self { slot: 0, offset: 0 }
    }

    /// Advance one sample; returns `true` when crossing into a new slot.
    fn advance(&mut self) -> bool {
        self.offset += 1;
        if self.offset == SLOT_SAMPLES {
            self.offset = 0;
            self.slot = (self.slot + 1) % SLOT_COUNT;
            true
        } else {
            false
        }
    }
}

/// Spin (with sleeps) while the DMA engine is draining `target` and no stop
/// has been requested. The producer must never write the slot the engine is
/// reading.
fn wait_while_draining(
    target: usize,
    mut active_slot: impl FnMut() -> Option<usize>,
    mut should_stop: impl FnMut() -> bool,
    mut sleep: impl FnMut(),
) {
    while !should_stop() && active_slot() == Some(target) {
        sleep();
    }
}

/// Duration of one ring slot at the configured rate; the natural unit for
/// cursor-wait sleeps.
fn slot_duration(sample_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 * SLOT_SAMPLES as u64 / u64::from(sample_rate))
}

/// The whole producer: prefill, start, steady state, underrun handling.
pub fn run(engine: &Engine, input: &mut Input, options: &ProducerOptions) {
    let mut encoder = FrameEncoder::new(options.depth);
    let mut cursor = RingCursor::start();
    let mut rng = SmallRng::from_entropy();
    let pause = slot_duration(options.sample_rate);

    tracing::info!("waiting for data");
    if !prefill(engine, input, &mut encoder, &mut cursor) {
        tracing::info!("input ended before the ring filled once");
        return;
    }

    tracing::info!("transmitting");
    engine.start();

    let stop = loop {
        if signals::shutdown_requested() {
            break Stop::Signal;
        }

        wait_while_draining(
            cursor.slot,
            || engine.active_slot(),
            signals::shutdown_requested,
            || thread::sleep(pause),
        );
        if signals::shutdown_requested() {
            break Stop::Signal;
        }

        match input.read_frame() {
            ReadOutcome::Frame(left, right) => {
                let (code_a, code_b) = encoder.encode(left, right);
                engine.store_sample(cursor.slot, cursor.offset, code_a, code_b);
                cursor.advance();
            }
            ReadOutcome::WouldBlock => {
                if let Some(stop) = underrun(engine, input, &mut encoder, &mut cursor, options, &mut rng, pause) {
                    break stop;
                }
            }
            ReadOutcome::Eof => break Stop::EndOfStream,
        }
    };

    match stop {
        Stop::EndOfStream => tracing::info!("end of stream"),
        Stop::Signal => tracing::info!("terminated by signal"),
    }
}

/// Fill the ring once before transmission starts. Returns `false` when the
/// input ended (or a signal arrived) before a single sample was written.
fn prefill(
    engine: &Engine,
    input: &mut Input,
    encoder: &mut FrameEncoder,
    cursor: &mut RingCursor,
) -> bool {
    let mut written = 0usize;
    while written < SLOT_COUNT * SLOT_SAMPLES {
        if signals::shutdown_requested() {
            return false;
        }
        match input.read_frame() {
            ReadOutcome::Frame(left, right) => {
                let (code_a, code_b) = encoder.encode(left, right);
                engine.store_sample(cursor.slot, cursor.offset, code_a, code_b);
                cursor.advance();
                written += 1;
            }
            ReadOutcome::WouldBlock => {
                input.wait_readable(UNDERRUN_POLL);
            }
            ReadOutcome::Eof => break,
        }
    }
    written > 0
}

/// Underrun policy: pad the whole ring with silence or dither, optionally
/// silence the serializer, then block until input returns.
#[allow(clippy::too_many_arguments)]
fn underrun(
    engine: &Engine,
    input: &mut Input,
    encoder: &mut FrameEncoder,
    cursor: &mut RingCursor,
    options: &ProducerOptions,
    rng: &mut SmallRng,
    pause: Duration,
) -> Option<Stop> {
    tracing::debug!(
        keep_alive = options.keep_alive,
        "input underrun, padding the ring"
    );

    // The rest of the current slot plus every other slot once.
    let samples_to_pad = (SLOT_SAMPLES - cursor.offset) + (SLOT_COUNT - 1) * SLOT_SAMPLES;
    for _ in 0..samples_to_pad {
        wait_while_draining(
            cursor.slot,
            || engine.active_slot(),
            signals::shutdown_requested,
            || thread::sleep(pause),
        );
        if signals::shutdown_requested() {
            return Some(Stop::Signal);
        }

        let (left, right) = pad_pair(options, rng);
        let (code_a, code_b) = encoder.encode(left, right);
        engine.store_sample(cursor.slot, cursor.offset, code_a, code_b);
        cursor.advance();
    }

    if options.disable_pcm_on_idle {
        engine.set_transmit(false);
    }

    loop {
        if signals::shutdown_requested() {
            return Some(Stop::Signal);
        }
        if input.wait_readable(UNDERRUN_POLL) {
            break;
        }
    }

    if options.disable_pcm_on_idle {
        engine.set_transmit(true);
    }
    tracing::debug!("input resumed");
    None
}

/// One pad sample pair: zeros, or dither within 5 LSBs of a 16-bit sample
/// scaled to the active depth.
fn pad_pair(options: &ProducerOptions, rng: &mut SmallRng) -> (i32, i32) {
    if !options.keep_alive {
        return (0, 0);
    }
    let scale = match options.depth {
        SampleDepth::Bits16 => 1,
        SampleDepth::Bits20 => 1 << 4,
        SampleDepth::Bits24 => 1 << 8,
    };
    (
        rng.gen_range(-DITHER_AMPLITUDE..=DITHER_AMPLITUDE) * scale,
        rng.gen_range(-DITHER_AMPLITUDE..=DITHER_AMPLITUDE) * scale,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_walks_slots_in_a_cycle() {
        let mut cursor = RingCursor::start();
        for _ in 0..SLOT_SAMPLES - 1 {
            assert!(!cursor.advance());
        }
        assert!(cursor.advance(), "slot boundary must be reported");
        assert_eq!(cursor, RingCursor { slot: 1, offset: 0 });

        for _ in 0..2 * SLOT_SAMPLES {
            cursor.advance();
        }
        assert_eq!(cursor, RingCursor { slot: 0, offset: 0 });
    }

    #[test]
    fn producer_sleeps_while_dma_drains_its_slot() {
        // DMA sits on slot 1 for three polls, then moves on.
        let mut polls = 0;
        let mut sleeps = 0;
        wait_while_draining(
            1,
            || {
                polls += 1;
                if polls <= 3 {
                    Some(1)
                } else {
                    Some(2)
                }
            },
            || false,
            || sleeps += 1,
        );
        assert_eq!(sleeps, 3, "must sleep exactly while the slot is active");
    }

    #[test]
    fn producer_does_not_wait_on_other_slots() {
        let mut sleeps = 0;
        wait_while_draining(0, || Some(2), || false, || sleeps += 1);
        assert_eq!(sleeps, 0);
    }

    #[test]
    fn stop_request_interrupts_the_wait() {
        let mut sleeps = 0;
        wait_while_draining(0, || Some(0), || true, || sleeps += 1);
        assert_eq!(sleeps, 0, "a stop request must win over the cursor wait");
    }

    #[test]
    fn frame_counter_runs_across_underruns() {
        let mut encoder = FrameEncoder::new(SampleDepth::Bits16);
        for _ in 0..10 {
            encoder.encode(1, -1);
        }
        // Underrun padding advances the same counter.
        let options = ProducerOptions {
            sample_rate: 44_100,
            depth: SampleDepth::Bits16,
            keep_alive: true,
            disable_pcm_on_idle: false,
        };
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..5 {
            let (left, right) = pad_pair(&options, &mut rng);
            encoder.encode(left, right);
        }
        assert_eq!(encoder.frame_index, 15, "padding must not reset the block position");

        // 192 frames later the counter wraps, not resets.
        for _ in 0..FRAMES_PER_BLOCK - 15 {
            encoder.encode(0, 0);
        }
        assert_eq!(encoder.frame_index, 0);
    }

    #[test]
    fn dither_stays_within_five_lsbs() {
        let options = ProducerOptions {
            sample_rate: 44_100,
            depth: SampleDepth::Bits16,
            keep_alive: true,
            disable_pcm_on_idle: false,
        };
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..1000 {
            let (left, right) = pad_pair(&options, &mut rng);
            assert!((-5..=5).contains(&left));
            assert!((-5..=5).contains(&right));
        }
    }

    #[test]
    fn dither_scales_with_depth() {
        let options = ProducerOptions {
            sample_rate: 44_100,
            depth: SampleDepth::Bits24,
            keep_alive: true,
            disable_pcm_on_idle: false,
        };
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..1000 {
            let (left, _) = pad_pair(&options, &mut rng);
            assert!((-5 * 256..=5 * 256).contains(&left));
            assert_eq!(left % 256, 0, "24-bit dither moves in 16-bit LSB steps");
        }
    }

    #[test]
    fn silence_padding_is_true_silence() {
        let options = ProducerOptions {
            sample_rate: 44_100,
            depth: SampleDepth::Bits16,
            keep_alive: false,
            disable_pcm_on_idle: false,
        };
        let mut rng = SmallRng::seed_from_u64(42);
        assert_eq!(pad_pair(&options, &mut rng), (0, 0));
    }

    #[test]
    fn slot_duration_matches_the_sample_rate() {
        // 2048 samples at 44.1 kHz is a hair over 46 ms.
        assert_eq!(slot_duration(44_100), Duration::from_micros(46_439));
        assert_eq!(slot_duration(48_000), Duration::from_micros(42_666));
    }
}
