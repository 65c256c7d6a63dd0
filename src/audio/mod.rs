//! Audio buffer codecs
//!
//! Decoding compressed containers to PCM is the caller's job; this module only
//! moves between canonical WAV bytes and in-memory stereo floats.

pub mod format;
pub mod wav;

pub use format::{normalize_peak, sanitize, PeakAdjustment, DEFAULT_PEAK_TARGET};
pub use wav::{encode, parse, BitDepth};
