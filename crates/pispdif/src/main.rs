//! Software S/PDIF transmitter for Raspberry Pi.
//!
//! Encodes PCM from stdin (or a file) into an IEC 60958 consumer bitstream
//! and clocks it out of GPIO 21 through the PCM serializer, driven by a
//! cyclic DMA ring in uncached memory. See the `spdif` crate for the wire
//! encoding and the `platform` crate for the peripheral plumbing.

mod clock_math;
mod engine;
mod input;
mod producer;
mod ring;
mod signals;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;
use crate::input::{Input, SampleFormat};
use crate::producer::ProducerOptions;

/// Stream PCM audio to an S/PDIF receiver from GPIO 21.
#[derive(Parser)]
#[command(name = "pispdif", version)]
struct Cli {
    /// Read PCM from a file or FIFO instead of stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Sample rate in Hz.
    #[arg(short, long, default_value_t = 44_100, value_parser = parse_rate)]
    rate: u32,

    /// Input sample format.
    #[arg(short, long, value_enum, default_value_t = SampleFormat::S16le)]
    format: SampleFormat,

    /// Emit true silence on underrun instead of keep-alive dither.
    #[arg(short = 'k', long = "no-keep-alive")]
    no_keep_alive: bool,

    /// Disable the PCM transmitter while waiting out an underrun.
    #[arg(short, long)]
    disable_pcm_on_idle: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// A sample rate must be a positive decimal integer.
fn parse_rate(raw: &str) -> Result<u32, String> {
    let rate: u32 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a valid sample rate"))?;
    if rate == 0 {
        return Err("sample rate must be positive".into());
    }
    Ok(rate)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    signals::install().context("installing signal handlers failed")?;

    let engine = Engine::new(cli.rate).context("hardware initialization failed")?;
    signals::arm_dma_stop(engine.dma_stop_register());

    let mut input =
        Input::open(cli.input.as_deref(), cli.format).context("opening the input failed")?;

    producer::run(
        &engine,
        &mut input,
        &ProducerOptions {
            sample_rate: cli.rate,
            depth: cli.format.depth(),
            keep_alive: !cli.no_keep_alive,
            disable_pcm_on_idle: cli.disable_pcm_on_idle,
        },
    );

    engine.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_junk_rates_are_rejected() {
        assert!(parse_rate("0").is_err());
        assert!(parse_rate("-44100").is_err());
        assert!(parse_rate("44.1k").is_err());
        assert_eq!(parse_rate("44100"), Ok(44_100));
    }

    #[test]
    fn cli_defaults_match_the_wire_defaults() {
        let cli = Cli::parse_from(["pispdif"]);
        assert_eq!(cli.rate, 44_100);
        assert_eq!(cli.format, SampleFormat::S16le);
        assert!(!cli.no_keep_alive);
        assert!(!cli.disable_pcm_on_idle);
    }

    #[test]
    fn short_flags_parse() {
        let cli = Cli::parse_from(["pispdif", "-r", "48000", "-f", "s24le", "-k", "-d", "-v"]);
        assert_eq!(cli.rate, 48_000);
        assert_eq!(cli.format, SampleFormat::S24le);
        assert!(cli.no_keep_alive);
        assert!(cli.disable_pcm_on_idle);
        assert!(cli.verbose);
    }
}
