//! Spectral redistribution passes
//!
//! Each pass takes the stem spectrograms by value and returns the adjusted
//! set. Only real, non-negative gains are applied, so every stem keeps the
//! phase the Wiener refiner gave it. Order: vocal center boost, HPSS boosts,
//! residual assignment.
//!
//! Residual assignment first headroom-limits the other stems to the mixture
//! magnitude, so boosted stems never leave negative energy in the residual.

use super::hpss::percussive_ratio;
use super::stft::{bin_to_hz, fold_bin, StereoSpectrogram};
use crate::types::{StemKind, StemMap, StereoBuffer};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use tracing::debug;

/// Upper bound of the vocal center boost gain
pub const VOCAL_BOOST: f32 = 0.6;

/// Largest gain the percussive boost may apply to Drums
pub const MAX_DRUMS_GAIN: f32 = 1.5;

/// Scale every coefficient of a spectrogram by `gain(frame, bin)`
fn apply_gain(
    spec: &mut StereoSpectrogram,
    gain: impl Fn(usize, usize) -> f32 + Sync,
) {
    let apply = |(f, frame): (usize, &mut Vec<Complex<f32>>)| {
        for (k, c) in frame.iter_mut().enumerate() {
            *c *= gain(f, k);
        }
    };
    spec.left.par_iter_mut().enumerate().for_each(apply);
    spec.right.par_iter_mut().enumerate().for_each(apply);
}

/// Boost Vocal where the mixture is centered in the stereo field
///
/// center = |(L+R)/2| / (0.7 (|L|+|R|) + eps), capped at 1; gain = 1 + 0.6 center.
pub fn vocal_center_boost(
    mut stems: StemMap<StereoSpectrogram>,
    mixture: &StereoSpectrogram,
    eps: f32,
) -> StemMap<StereoSpectrogram> {
    if let Some(vocal) = stems.get_mut(&StemKind::Vocal) {
        apply_gain(vocal, |f, k| {
            let l = mixture.left[f][k];
            let r = mixture.right[f][k];
            let mid = ((l + r) * 0.5).norm();
            let center = (mid / (0.7 * (l.norm() + r.norm()) + eps)).min(1.0);
            1.0 + VOCAL_BOOST * center
        });
    }
    stems
}

/// Static Guitar/Piano band weights at a frequency
fn harmonic_weights(hz: f32) -> (f32, f32) {
    let guitar = if (200.0..=5500.0).contains(&hz) { 0.6 } else { 0.2 };
    let piano = if hz < 4000.0 { 0.4 } else { 0.2 };
    (guitar, piano)
}

/// Boost Drums on percussive bins and split harmonic emphasis between Guitar and Piano
///
/// The percussive ratio comes from median-filtering the accompaniment (every
/// stem except Vocal and the residual target), left channel, bins `0..=N/2`.
pub fn harmonic_percussive(
    mut stems: StemMap<StereoSpectrogram>,
    residual: StemKind,
    eps: f32,
) -> StemMap<StereoSpectrogram> {
    let boosted = [StemKind::Drums, StemKind::Guitar, StemKind::Piano];
    if !boosted
        .iter()
        .any(|kind| *kind != residual && stems.contains_key(kind))
    {
        debug!("No Drums/Guitar/Piano stem, skipping HPSS");
        return stems;
    }

    let accompaniment: Vec<&StereoSpectrogram> = stems
        .iter()
        .filter(|(kind, _)| **kind != StemKind::Vocal && **kind != residual)
        .map(|(_, spec)| spec)
        .collect();
    let Some(first) = accompaniment.first() else {
        return stems;
    };
    let fft_size = first.fft_size;
    let sample_rate = first.sample_rate;
    let half = fft_size / 2 + 1;

    let magnitude: Vec<Vec<f32>> = (0..first.num_frames())
        .map(|f| {
            (0..half)
                .map(|k| {
                    accompaniment
                        .iter()
                        .map(|spec| spec.left[f][k])
                        .sum::<Complex<f32>>()
                        .norm()
                })
                .collect()
        })
        .collect();
    let ratio = percussive_ratio(&magnitude, eps);

    for kind in boosted {
        if kind == residual {
            continue;
        }
        let Some(spec) = stems.get_mut(&kind) else {
            continue;
        };
        match kind {
            StemKind::Drums => apply_gain(spec, |f, k| {
                (1.0 + 0.8 * ratio[f][fold_bin(k, fft_size)]).min(MAX_DRUMS_GAIN)
            }),
            StemKind::Guitar => apply_gain(spec, |_, k| {
                let (g, p) = harmonic_weights(bin_to_hz(k, fft_size, sample_rate));
                1.0 + 0.5 * g / (g + p)
            }),
            _ => apply_gain(spec, |_, k| {
                let (g, p) = harmonic_weights(bin_to_hz(k, fft_size, sample_rate));
                1.0 + 0.5 * p / (g + p)
            }),
        }
    }
    stems
}

/// Make the residual target absorb whatever the other stems leave of the mixture
///
/// Non-residual stems are first scaled down wherever their sum would exceed
/// the mixture magnitude, so the residual never has to cancel an overshoot.
pub fn assign_residual(
    mut stems: StemMap<StereoSpectrogram>,
    mixture: &StereoSpectrogram,
    residual: StemKind,
) -> StemMap<StereoSpectrogram> {
    stems.remove(&residual);

    let mut left_sum = mixture.zeros_like().left;
    let mut right_sum = left_sum.clone();
    limit_channel(
        stems.values_mut().map(|s| &mut s.left).collect(),
        &mixture.left,
        &mut left_sum,
    );
    limit_channel(
        stems.values_mut().map(|s| &mut s.right).collect(),
        &mixture.right,
        &mut right_sum,
    );

    let subtract = |mix: &[Vec<Complex<f32>>], sum: Vec<Vec<Complex<f32>>>| {
        mix.iter()
            .zip(sum)
            .map(|(m, s)| m.iter().zip(s).map(|(&y, x)| y - x).collect())
            .collect::<Vec<Vec<Complex<f32>>>>()
    };
    let rest = mixture.with_frames(
        subtract(&mixture.left, left_sum),
        subtract(&mixture.right, right_sum),
    );
    stems.insert(residual, rest);
    stems
}

/// Headroom-limit one channel of the stems in place; leaves their sum in `sum`
fn limit_channel(
    mut channels: Vec<&mut Vec<Vec<Complex<f32>>>>,
    mixture: &[Vec<Complex<f32>>],
    sum: &mut [Vec<Complex<f32>>],
) {
    for (f, (mix_frame, sum_frame)) in mixture.iter().zip(sum.iter_mut()).enumerate() {
        for (k, (&y, total)) in mix_frame.iter().zip(sum_frame.iter_mut()).enumerate() {
            let raw: Complex<f32> = channels.iter().map(|c| c[f][k]).sum();
            let (limit, raw_norm) = (y.norm(), raw.norm());
            if raw_norm > limit && raw_norm > 0.0 {
                let scale = limit / raw_norm;
                for channel in channels.iter_mut() {
                    channel[f][k] *= scale;
                }
                *total = raw * scale;
            } else {
                *total = raw;
            }
        }
    }
}

/// Time-domain projection: the residual becomes `mixture - Σ other stems`
pub fn project_residual(
    mut stems: StemMap<StereoBuffer>,
    mixture: &StereoBuffer,
    residual: StemKind,
) -> StemMap<StereoBuffer> {
    stems.remove(&residual);
    let mut left = mixture.left.clone();
    let mut right = mixture.right.clone();
    for stem in stems.values() {
        for (r, s) in left.iter_mut().zip(stem.left.iter()) {
            *r -= s;
        }
        for (r, s) in right.iter_mut().zip(stem.right.iter()) {
            *r -= s;
        }
    }
    stems.insert(residual, StereoBuffer::new(left, right, mixture.sample_rate));
    stems
}

/// The redistribution chain with its fixed parameters
#[derive(Debug, Clone, Copy)]
pub struct Redistributor {
    pub residual: StemKind,
    pub eps: f32,
}

impl Redistributor {
    pub fn new(residual: StemKind, eps: f32) -> Self {
        Self { residual, eps }
    }

    /// Vocal boost, then HPSS boosts, then residual assignment
    pub fn apply(
        &self,
        stems: StemMap<StereoSpectrogram>,
        mixture: &StereoSpectrogram,
    ) -> StemMap<StereoSpectrogram> {
        let stems = vocal_center_boost(stems, mixture, self.eps);
        let stems = harmonic_percussive(stems, self.residual, self.eps);
        assign_residual(stems, mixture, self.residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrogram(left: Vec<Vec<Complex<f32>>>, right: Vec<Vec<Complex<f32>>>) -> StereoSpectrogram {
        let fft_size = left[0].len();
        StereoSpectrogram {
            left,
            right,
            fft_size,
            hop_size: fft_size / 4,
            pad: fft_size / 2,
            original_len: 0,
            sample_rate: 44100,
        }
    }

    fn constant(frames: usize, bins: usize, value: Complex<f32>) -> StereoSpectrogram {
        spectrogram(vec![vec![value; bins]; frames], vec![vec![value; bins]; frames])
    }

    fn scaled(spec: &StereoSpectrogram, gain: f32) -> StereoSpectrogram {
        let mut out = spec.clone();
        apply_gain(&mut out, |_, _| gain);
        out
    }

    #[test]
    fn test_vocal_boost_on_centered_mix() {
        let mix = constant(2, 8, Complex::new(1.0, 0.5));
        let stems = StemMap::from([(StemKind::Vocal, scaled(&mix, 0.5))]);
        let out = vocal_center_boost(stems, &mix, 1e-8);
        // L == R: center = 1 / 1.4
        let expected = 0.5 * (1.0 + 0.6 / 1.4);
        let got = out[&StemKind::Vocal].left[1][3].norm() / mix.left[1][3].norm();
        assert!((got - expected).abs() < 1e-5);
    }

    #[test]
    fn test_vocal_boost_ignores_side_content() {
        let left = vec![vec![Complex::new(1.0, 0.0); 8]; 2];
        let right = vec![vec![Complex::new(-1.0, 0.0); 8]; 2];
        let mix = spectrogram(left, right);
        let stems = StemMap::from([(StemKind::Vocal, scaled(&mix, 0.5))]);
        let out = vocal_center_boost(stems, &mix, 1e-8);
        assert_eq!(out[&StemKind::Vocal], scaled(&mix, 0.5));
    }

    #[test]
    fn test_hpss_skipped_without_targets() {
        let mix = constant(4, 16, Complex::new(1.0, 0.0));
        let stems = StemMap::from([
            (StemKind::Bass, scaled(&mix, 0.5)),
            (StemKind::Others, scaled(&mix, 0.5)),
        ]);
        let out = harmonic_percussive(stems.clone(), StemKind::Others, 1e-8);
        assert_eq!(out, stems);
    }

    #[test]
    fn test_hpss_gains_bounded() {
        let mix = constant(12, 64, Complex::new(1.0, 0.0));
        let stems = StemMap::from([
            (StemKind::Drums, scaled(&mix, 0.3)),
            (StemKind::Guitar, scaled(&mix, 0.3)),
            (StemKind::Piano, scaled(&mix, 0.2)),
            (StemKind::Others, scaled(&mix, 0.2)),
        ]);
        let out = harmonic_percussive(stems, StemKind::Others, 1e-8);
        for (kind, base) in [
            (StemKind::Drums, 0.3),
            (StemKind::Guitar, 0.3),
            (StemKind::Piano, 0.2),
        ] {
            for frame in &out[&kind].left {
                for c in frame {
                    let gain = c.norm() / base;
                    assert!((1.0..=1.5 + 1e-5).contains(&gain), "{} gain {}", kind, gain);
                }
            }
        }
        assert_eq!(out[&StemKind::Others], scaled(&mix, 0.2));
    }

    #[test]
    fn test_residual_completes_mixture() {
        let mix = constant(3, 8, Complex::new(0.8, -0.4));
        let stems = StemMap::from([
            (StemKind::Vocal, scaled(&mix, 0.3)),
            (StemKind::Bass, scaled(&mix, 0.2)),
        ]);
        let out = assign_residual(stems, &mix, StemKind::Others);
        assert_eq!(out.len(), 3);
        let rest = out[&StemKind::Others].left[2][5];
        assert!((rest - mix.left[2][5] * 0.5).norm() < 1e-6);
    }

    #[test]
    fn test_headroom_limits_overshoot() {
        let mix = constant(2, 8, Complex::new(1.0, 0.0));
        let stems = StemMap::from([
            (StemKind::Vocal, scaled(&mix, 1.2)),
            (StemKind::Bass, scaled(&mix, 0.4)),
            (StemKind::Others, scaled(&mix, 0.1)),
        ]);
        let out = assign_residual(stems, &mix, StemKind::Others);
        let vocal = out[&StemKind::Vocal].left[0][0].re;
        let bass = out[&StemKind::Bass].left[0][0].re;
        assert!((vocal - 0.75).abs() < 1e-6);
        assert!((bass - 0.25).abs() < 1e-6);
        assert!(out[&StemKind::Others].left[0][0].norm() < 1e-6);
    }

    #[test]
    fn test_boosted_vocal_leaves_no_negative_residual() {
        let mix = constant(3, 8, Complex::new(0.5, 0.5));
        let stems = StemMap::from([
            (StemKind::Vocal, scaled(&mix, 1.0)),
            (StemKind::Others, scaled(&mix, 0.0)),
        ]);
        let out = Redistributor::new(StemKind::Others, 1e-8).apply(stems, &mix);
        for f in 0..3 {
            for k in 0..8 {
                let vocal = out[&StemKind::Vocal].left[f][k];
                assert!((vocal - mix.left[f][k]).norm() < 1e-6);
                assert!(out[&StemKind::Others].left[f][k].norm() < 1e-6);
            }
        }
    }

    #[test]
    fn test_project_residual() {
        let mix = StereoBuffer::new(vec![1.0, 0.5], vec![0.2, -0.2], 44100);
        let stems = StemMap::from([
            (StemKind::Bass, StereoBuffer::new(vec![0.6, 0.1], vec![0.1, 0.0], 44100)),
            (StemKind::Others, StereoBuffer::new(vec![9.0, 9.0], vec![9.0, 9.0], 44100)),
        ]);
        let out = project_residual(stems, &mix, StemKind::Others);
        let rest = &out[&StemKind::Others];
        assert!((rest.left[0] - 0.4).abs() < 1e-6);
        assert!((rest.left[1] - 0.4).abs() < 1e-6);
        assert!((rest.right[0] - 0.1).abs() < 1e-6);
        assert!((rest.right[1] + 0.2).abs() < 1e-6);
    }
}
