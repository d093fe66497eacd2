//! IEC 60958 (consumer S/PDIF) frame encoding.
//!
//! This crate turns PCM sample pairs into the 64-bit biphase-mark-coded words
//! that a 32-bit serializer clocks out at 128x the sample rate. It is pure
//! computation: no I/O, no hardware access, no allocation beyond the block
//! state.
//!
//! # Wire structure
//!
//! ```text
//! block  = 192 frames                 (channel-status record spans a block)
//! frame  = subframe A + subframe B    (left, right)
//! subframe = 4 preamble cells + 28 data bits, biphase-mark coded
//!          = 64 half-cells = 64 bits at the line rate
//! ```
//!
//! Subframe data bits carry 4 aux bits, a 20-bit sample, and the
//! validity/user/channel-status/parity flags. Even parity forces the line
//! back to the low state at every preamble boundary, which is why the fixed
//! preamble patterns in [`Preamble`] never need their inverted forms.

pub mod bmc;
pub mod block;
pub mod channel_status;
pub mod subframe;

pub use block::{Block, Frame, FRAMES_PER_BLOCK};
pub use bmc::Preamble;
pub use channel_status::ChannelStatus;
pub use subframe::{SampleDepth, Subframe};
