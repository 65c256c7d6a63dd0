//! Per-stem magnitude masks
//!
//! Two providers produce masks in [0, 1]:
//!
//! - [`HeuristicBandMask`]: a fixed gain curve over frequency for each stem.
//!   It ignores the mixture content entirely; the Wiener refiner turns the
//!   relative curve heights into energy shares.
//! - [`LearnedModelMask`]: hands the half spectrum to an [`InferenceAdapter`]
//!   and mirrors its answer back onto the full spectrum.
//!
//! Masks are then sharpened per stem and combined into the initial power
//! estimate the refiner starts from.

use super::stft::{bin_to_hz, fold_bin, Plane, StereoMagnitude};
use super::traits::{InferenceAdapter, MaskProvider};
use crate::config::{ModelSpec, StereoMaskMode};
use crate::error::{Result, SeparationError};
use crate::types::StemKind;
use std::sync::Arc;
use tracing::debug;

/// Per-frame, per-bin gains for both channels
#[derive(Debug, Clone, PartialEq)]
pub struct StereoMask {
    pub left: Plane,
    pub right: Plane,
}

impl StereoMask {
    /// Same gains on both channels
    pub fn mono(plane: Plane) -> Self {
        Self {
            right: plane.clone(),
            left: plane,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.left.len()
    }

    /// Shape as (frames, bins); None when the channels or frames disagree
    pub fn shape(&self) -> Option<(usize, usize)> {
        let frames = self.left.len();
        let bins = self.left.first().map_or(0, |f| f.len());
        let uniform = |plane: &Plane| plane.len() == frames && plane.iter().all(|f| f.len() == bins);
        (uniform(&self.left) && uniform(&self.right)).then_some((frames, bins))
    }

    /// Smallest and largest gain across both channels
    pub fn range(&self) -> (f32, f32) {
        self.left
            .iter()
            .chain(self.right.iter())
            .flat_map(|f| f.iter())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &g| {
                (lo.min(g), hi.max(g))
            })
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        let apply = |plane: &Plane| -> Plane {
            plane
                .iter()
                .map(|frame| frame.iter().map(|&g| f(g)).collect())
                .collect()
        };
        Self {
            left: apply(&self.left),
            right: apply(&self.right),
        }
    }
}

// =============================================================================
// Heuristic provider
// =============================================================================

/// Linear interpolation between (x0, y0) and (x1, y1), clamped to the segment
///
/// Outside the segment the endpoint value is returned exactly.
fn ramp(x: f32, x0: f32, y0: f32, x1: f32, y1: f32) -> f32 {
    let t = (x - x0) / (x1 - x0);
    if t <= 0.0 {
        y0
    } else if t >= 1.0 {
        y1
    } else {
        y0 + (y1 - y0) * t
    }
}

/// Frequency-band mask curves, one per stem
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicBandMask;

impl HeuristicBandMask {
    pub fn new() -> Self {
        Self
    }

    /// Gain for a stem at a frequency
    pub fn band_gain(target: StemKind, hz: f32) -> f32 {
        match target {
            StemKind::Bass => ramp(hz, 180.0, 1.0, 400.0, 0.05),
            StemKind::Vocal => {
                if hz < 500.0 {
                    ramp(hz, 150.0, 0.05, 500.0, 0.9)
                } else {
                    ramp(hz, 3500.0, 0.9, 6000.0, 0.05)
                }
            }
            StemKind::Drums => {
                if (120.0..=6000.0).contains(&hz) {
                    0.6
                } else {
                    0.2
                }
            }
            StemKind::Guitar => {
                if (120.0..=5500.0).contains(&hz) {
                    0.6
                } else {
                    0.1
                }
            }
            StemKind::Piano => {
                if (80.0..=6000.0).contains(&hz) {
                    0.5
                } else {
                    0.1
                }
            }
            StemKind::Others => 0.3,
        }
    }
}

impl MaskProvider for HeuristicBandMask {
    fn estimate(
        &self,
        mixture: &StereoMagnitude,
        model: &ModelSpec,
        sample_rate: u32,
    ) -> Result<StereoMask> {
        let bins = mixture.num_bins();
        let curve: Vec<f32> = (0..bins)
            .map(|k| Self::band_gain(model.target, bin_to_hz(k, bins, sample_rate)))
            .collect();
        Ok(StereoMask::mono(vec![curve; mixture.num_frames()]))
    }

    fn name(&self) -> &'static str {
        "heuristic-band"
    }
}

// =============================================================================
// Learned provider
// =============================================================================

/// Mask provider backed by an inference adapter
pub struct LearnedModelMask {
    adapter: Arc<dyn InferenceAdapter>,
}

impl LearnedModelMask {
    pub fn new(adapter: Arc<dyn InferenceAdapter>) -> Self {
        Self { adapter }
    }
}

impl MaskProvider for LearnedModelMask {
    fn estimate(
        &self,
        mixture: &StereoMagnitude,
        model: &ModelSpec,
        _sample_rate: u32,
    ) -> Result<StereoMask> {
        let bins = mixture.num_bins();
        let half = mixture.half_spectrum();
        let expected = (half.num_frames(), bins / 2 + 1);

        debug!(
            "Running {} on {} frames for model '{}'",
            self.adapter.name(),
            expected.0,
            model.name
        );
        let mask = self.adapter.infer(model, &half)?;

        match mask.shape() {
            Some(shape) if shape == expected => {}
            other => {
                return Err(SeparationError::inference_error(
                    &model.name,
                    format!(
                        "mask shape {:?} does not match magnitude shape {:?}",
                        other, expected
                    ),
                ))
            }
        }

        // NaN fails every comparison, so max(0.0) maps it to 0.0
        let clamped = mask.map(|g| g.max(0.0).min(1.0));
        let mirror = |plane: &Plane| -> Plane {
            plane
                .iter()
                .map(|frame| (0..bins).map(|k| frame[fold_bin(k, bins)]).collect())
                .collect()
        };
        Ok(StereoMask {
            left: mirror(&clamped.left),
            right: mirror(&clamped.right),
        })
    }

    fn name(&self) -> &'static str {
        "learned-model"
    }
}

// =============================================================================
// Sharpening and initial power
// =============================================================================

/// Raise every gain to `alpha`, flooring the result at `eps`
pub fn sharpen(mask: &StereoMask, alpha: f32, eps: f32) -> StereoMask {
    mask.map(|g| g.clamp(0.0, 1.0).powf(alpha).max(eps))
}

/// Initial stem power: combined mask squared times the stereo-averaged mixture power
pub fn initial_power(mask: &StereoMask, mode: StereoMaskMode, mixture_power: &Plane, eps: f32) -> Plane {
    mask.left
        .iter()
        .zip(mask.right.iter())
        .zip(mixture_power.iter())
        .map(|((l, r), p)| {
            l.iter()
                .zip(r.iter())
                .zip(p.iter())
                .map(|((&ml, &mr), &power)| {
                    let m = match mode {
                        StereoMaskMode::Shared => 0.5 * (ml + mr),
                        StereoMaskMode::PerChannel => ml.max(mr),
                    };
                    (m * m * power).max(eps)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAdapter {
        value: f32,
        extra_bin: bool,
    }

    impl InferenceAdapter for FixedAdapter {
        fn infer(&self, _model: &ModelSpec, magnitude: &StereoMagnitude) -> Result<StereoMask> {
            let bins = magnitude.num_bins() + usize::from(self.extra_bin);
            Ok(StereoMask::mono(vec![
                vec![self.value; bins];
                magnitude.num_frames()
            ]))
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn magnitude(frames: usize, bins: usize) -> StereoMagnitude {
        StereoMagnitude {
            left: vec![vec![1.0; bins]; frames],
            right: vec![vec![1.0; bins]; frames],
        }
    }

    #[test]
    fn test_band_curves() {
        assert_eq!(HeuristicBandMask::band_gain(StemKind::Bass, 100.0), 1.0);
        assert!((HeuristicBandMask::band_gain(StemKind::Bass, 290.0) - 0.525).abs() < 1e-5);
        assert_eq!(HeuristicBandMask::band_gain(StemKind::Bass, 1000.0), 0.05);
        assert_eq!(HeuristicBandMask::band_gain(StemKind::Vocal, 100.0), 0.05);
        assert_eq!(HeuristicBandMask::band_gain(StemKind::Vocal, 1000.0), 0.9);
        assert_eq!(HeuristicBandMask::band_gain(StemKind::Vocal, 8000.0), 0.05);
        assert_eq!(HeuristicBandMask::band_gain(StemKind::Drums, 50.0), 0.2);
        assert_eq!(HeuristicBandMask::band_gain(StemKind::Others, 50.0), 0.3);
    }

    #[test]
    fn test_ramp_endpoints_exact() {
        assert_eq!(ramp(400.0, 180.0, 1.0, 400.0, 0.05), 0.05);
        assert_eq!(ramp(20000.0, 180.0, 1.0, 400.0, 0.05), 0.05);
        assert_eq!(ramp(180.0, 180.0, 1.0, 400.0, 0.05), 1.0);
        assert_eq!(ramp(500.0, 150.0, 0.05, 500.0, 0.9), 0.9);
        assert_eq!(ramp(6000.0, 3500.0, 0.9, 6000.0, 0.05), 0.05);
        let mid = ramp(290.0, 180.0, 1.0, 400.0, 0.05);
        assert!(mid > 0.05 && mid < 1.0);
    }

    #[test]
    fn test_heuristic_mask_is_symmetric_and_bounded() {
        let model = ModelSpec::builtin(StemKind::Vocal).with_resolution(64, 16);
        let mask = HeuristicBandMask::new()
            .estimate(&magnitude(3, 64), &model, 44100)
            .unwrap();
        assert_eq!(mask.shape(), Some((3, 64)));
        for k in 1..32 {
            assert_eq!(mask.left[0][k], mask.left[0][64 - k]);
        }
        let (lo, hi) = mask.range();
        assert!(lo >= 0.0 && hi <= 1.0);
    }

    #[test]
    fn test_learned_mask_clamped_and_mirrored() {
        let adapter = Arc::new(FixedAdapter {
            value: 1.7,
            extra_bin: false,
        });
        let model = ModelSpec::builtin(StemKind::Bass).with_resolution(16, 4);
        let mask = LearnedModelMask::new(adapter)
            .estimate(&magnitude(2, 16), &model, 44100)
            .unwrap();
        assert_eq!(mask.shape(), Some((2, 16)));
        assert_eq!(mask.range(), (1.0, 1.0));
    }

    #[test]
    fn test_learned_mask_nan_becomes_zero() {
        let adapter = Arc::new(FixedAdapter {
            value: f32::NAN,
            extra_bin: false,
        });
        let model = ModelSpec::builtin(StemKind::Bass).with_resolution(16, 4);
        let mask = LearnedModelMask::new(adapter)
            .estimate(&magnitude(2, 16), &model, 44100)
            .unwrap();
        assert_eq!(mask.range(), (0.0, 0.0));
    }

    #[test]
    fn test_learned_mask_shape_mismatch() {
        let adapter = Arc::new(FixedAdapter {
            value: 0.5,
            extra_bin: true,
        });
        let model = ModelSpec::builtin(StemKind::Bass).with_resolution(16, 4);
        let result = LearnedModelMask::new(adapter).estimate(&magnitude(2, 16), &model, 44100);
        assert!(matches!(result, Err(SeparationError::Inference { .. })));
    }

    #[test]
    fn test_sharpen_floors_at_eps() {
        let mask = StereoMask::mono(vec![vec![0.0, 0.5, 1.0]]);
        let sharp = sharpen(&mask, 2.0, 1e-8);
        assert_eq!(sharp.left[0][0], 1e-8);
        assert!((sharp.left[0][1] - 0.25).abs() < 1e-7);
        assert_eq!(sharp.left[0][2], 1.0);
    }

    #[test]
    fn test_initial_power_modes() {
        let mask = StereoMask {
            left: vec![vec![0.2]],
            right: vec![vec![0.6]],
        };
        let power = vec![vec![10.0]];
        let shared = initial_power(&mask, StereoMaskMode::Shared, &power, 1e-8);
        let per_channel = initial_power(&mask, StereoMaskMode::PerChannel, &power, 1e-8);
        assert!((shared[0][0] - 1.6).abs() < 1e-5);
        assert!((per_channel[0][0] - 3.6).abs() < 1e-5);

        let silent = initial_power(&mask, StereoMaskMode::Shared, &vec![vec![0.0]], 1e-8);
        assert_eq!(silent[0][0], 1e-8);
    }
}
