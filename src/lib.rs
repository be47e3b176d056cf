//! HuC6280 PSG Emulator for the PC Engine / TurboGrafx-16
//!
//! A cycle-accurate software model of the HuC6280's programmable sound
//! generator: six wavetable channels (two of them noise-capable), per-channel
//! and global stereo balance, a one-channel-modulates-another LFO, and a
//! crossfaded volume update machine, driven by timestamped register writes.
//!
//! # Features
//! - Cycle-accurate emulation of all 6 wavetable channels
//! - Noise LFSR on channels 4-5, kept running even while inaudible
//! - Frequency modulation (channel 1 modulates channel 0's period)
//! - Gradual 24-phase volume crossfade, as on hardware
//! - Band-limited step injection into host-drained delta buffers
//! - Both shipped silicon revisions (HuC6280 and HuC6280A)
//! - Tagged save/restore with post-load state repair
//!
//! # Quick start
//! ```
//! use huc6280_psg::{Psg, Revision};
//!
//! let mut psg = Psg::new(Revision::Huc6280A, 0x10000).unwrap();
//! psg.write(0, 0x01, 0xFF); // global balance wide open
//! psg.write(0, 0x00, 0x00); // select channel 0
//! psg.write(0, 0x02, 0xC8); // frequency LSB
//! psg.write(0, 0x05, 0xFF); // channel balance
//! psg.write(0, 0x04, 0x9F); // enable, full volume
//! psg.update(20_000);       // synthesize 20000 clocks
//! let (left, _right) = psg.hr_bufs();
//! assert!(left.iter().any(|&d| d != 0));
//! ```
//!
//! Timestamps are supplied by the host in hardware clock units and must be
//! non-decreasing. The host drains the high-resolution delta buffers between
//! bounded `update` windows and resamples them into audible output; that
//! final mixing stage is outside this crate.

#![warn(missing_docs)]

pub mod psg;
pub mod state;

/// Error types for PSG core operations
///
/// This enum only contains configuration-time errors; all register traffic
/// at runtime is value-based (masked, clamped or ignored) and infallible.
#[derive(thiserror::Error, Debug)]
pub enum PsgError {
    /// Revision id does not name a shipped chip variant
    #[error("unknown PSG revision id {0}")]
    UnknownRevision(u32),

    /// High-resolution buffer length must be a power of two
    #[error("invalid output buffer length {0}: must be a nonzero power of two")]
    InvalidBufferLength(usize),
}

/// Result type for PSG operations
pub type Result<T> = std::result::Result<T, PsgError>;

// Public API exports
pub use psg::{OutputFunc, Psg, RegisterId, Revision};
pub use state::{MemoryStateStore, StateReader, StateWriter};
