//! Mask estimation abstractions
//!
//! These traits define the interface for swappable mask backends.
//! The builtin heuristic implements [`MaskProvider`] directly; learned models
//! plug in through an [`InferenceAdapter`].

use super::mask::StereoMask;
use super::stft::StereoMagnitude;
use crate::config::ModelSpec;
use crate::error::Result;

/// Per-stem magnitude mask estimator
pub trait MaskProvider: Send + Sync {
    /// Estimate left/right masks in [0, 1], shaped like `mixture`
    fn estimate(
        &self,
        mixture: &StereoMagnitude,
        model: &ModelSpec,
        sample_rate: u32,
    ) -> Result<StereoMask>;

    /// Get the name of this provider (for logging)
    fn name(&self) -> &'static str;
}

/// Opaque learned-model runner
///
/// Receives bins `0..=N/2` of the mixture magnitude and returns one mask value
/// per input value. Tensor layout and execution are the adapter's concern.
pub trait InferenceAdapter: Send + Sync {
    fn infer(&self, model: &ModelSpec, magnitude: &StereoMagnitude) -> Result<StereoMask>;

    /// Get the name of this adapter (for logging)
    fn name(&self) -> &'static str;
}
