//! Core data types for musicroom
//!
//! These types represent the domain model and flow through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Stems
// =============================================================================

/// The stem targets a separation can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StemKind {
    Vocal,
    Bass,
    Drums,
    Piano,
    Guitar,
    Others,
}

impl StemKind {
    /// All stems in canonical order
    pub const ALL: [StemKind; 6] = [
        StemKind::Vocal,
        StemKind::Bass,
        StemKind::Drums,
        StemKind::Piano,
        StemKind::Guitar,
        StemKind::Others,
    ];

    /// Stem name as used in model configuration and output file names
    pub fn as_str(self) -> &'static str {
        match self {
            StemKind::Vocal => "Vocal",
            StemKind::Bass => "Bass",
            StemKind::Drums => "Drums",
            StemKind::Piano => "Piano",
            StemKind::Guitar => "Guitar",
            StemKind::Others => "Others",
        }
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StemKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown stem '{}' (expected one of Vocal, Bass, Drums, Piano, Guitar, Others)",
                    s
                )
            })
    }
}

/// Per-stem values for one run, iterated in canonical stem order
pub type StemMap<T> = BTreeMap<StemKind, T>;

// =============================================================================
// Audio buffer types
// =============================================================================

/// Stereo PCM waveform normalized to [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct StereoBuffer {
    /// Left channel samples
    pub left: Vec<f32>,
    /// Right channel samples
    pub right: Vec<f32>,
    /// Sample rate in Hz (typically 44100)
    pub sample_rate: u32,
    /// Duration in seconds
    pub duration: f64,
}

impl StereoBuffer {
    /// Build a buffer, truncating the longer channel so both have equal length
    pub fn new(mut left: Vec<f32>, mut right: Vec<f32>, sample_rate: u32) -> Self {
        let num_samples = left.len().min(right.len());
        left.truncate(num_samples);
        right.truncate(num_samples);
        // Guard against division by zero - use 0 duration for invalid sample rate
        let duration = if sample_rate > 0 {
            num_samples as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            left,
            right,
            sample_rate,
            duration,
        }
    }

    /// Silent buffer of the given length
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], vec![0.0; len], sample_rate)
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Largest absolute sample value across both channels
    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(self.right.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Get interleaved samples [L, R, L, R, ...]
    pub fn interleaved(&self) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.left.len() * 2);
        for (l, r) in self.left.iter().zip(self.right.iter()) {
            result.push(*l);
            result.push(*r);
        }
        result
    }

    /// Create from interleaved samples
    pub fn from_interleaved(samples: &[f32], sample_rate: u32) -> Self {
        let num_frames = samples.len() / 2;
        let mut left = Vec::with_capacity(num_frames);
        let mut right = Vec::with_capacity(num_frames);

        for chunk in samples.chunks_exact(2) {
            left.push(chunk[0]);
            right.push(chunk[1]);
        }

        Self::new(left, right, sample_rate)
    }
}

// =============================================================================
// Separation output
// =============================================================================

/// One finished stem, ready to hand to a packager
#[derive(Debug, Clone)]
pub struct EncodedStem {
    /// Canonical 32-bit float WAV
    pub wav_f32: Vec<u8>,
    /// Canonical 16-bit PCM WAV
    pub wav_i16: Vec<u8>,
    /// Duration in seconds
    pub duration_seconds: f64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Absolute peak of the float samples
    pub peak: f32,
}

/// Result of a successful separation run
#[derive(Debug, Clone, Default)]
pub struct SeparatedStems {
    pub stems: StemMap<EncodedStem>,
}

impl SeparatedStems {
    pub fn get(&self, kind: StemKind) -> Option<&EncodedStem> {
        self.stems.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}
