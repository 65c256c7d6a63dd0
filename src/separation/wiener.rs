//! Mixture-consistent Wiener refinement
//!
//! Every iteration hands each stem the share `v[stem] / Σ v` of the mixture
//! coefficient at each (frame, bin), so the stems always sum back to the
//! mixture. The stem's own power then becomes next iteration's `v`, which
//! sharpens the shares towards whichever stem dominates a bin.

use super::stft::{Plane, SpectralTransform, StereoSpectrogram};
use crate::config::SecondPassSettings;
use crate::error::{Result, SeparationError};
use crate::types::{StemKind, StemMap, StereoBuffer};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use std::time::Instant;
use tracing::debug;

/// Magnitude floor of the second pass
pub const SECOND_PASS_FLOOR: f32 = 1e-20;

/// One frame of one stem: (left bins, right bins)
type StereoFrame = (Vec<Complex<f32>>, Vec<Complex<f32>>);

/// Iterative spectral apportionment across stems
#[derive(Debug, Clone, Copy)]
pub struct WienerRefiner {
    iterations: usize,
    eps: f32,
}

impl WienerRefiner {
    pub fn new(iterations: usize, eps: f32) -> Self {
        Self { iterations, eps }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Split the mixture into one spectrogram per stem
    ///
    /// `initial_power` holds each stem's starting power estimate, shaped like
    /// the mixture. `on_iteration(done, total)` fires after every iteration.
    pub fn refine(
        &self,
        mixture: &StereoSpectrogram,
        initial_power: StemMap<Plane>,
        on_iteration: &mut dyn FnMut(usize, usize),
    ) -> Result<StemMap<StereoSpectrogram>> {
        if initial_power.is_empty() {
            return Err(SeparationError::config_error(
                "Wiener refinement needs at least one stem",
            ));
        }
        let num_frames = mixture.num_frames();
        let num_bins = mixture.num_bins();
        if let Some((kind, _)) = initial_power.iter().find(|(_, p)| {
            p.len() != num_frames || p.iter().any(|frame| frame.len() != num_bins)
        }) {
            return Err(SeparationError::config_error(format!(
                "initial power for {} does not match the mixture spectrogram",
                kind
            )));
        }

        let kinds: Vec<StemKind> = initial_power.keys().copied().collect();
        let mut power: Vec<Plane> = initial_power.into_values().collect();
        let total = self.iterations.max(1);
        let mut frames: Vec<Vec<StereoFrame>> = Vec::with_capacity(num_frames);

        for iteration in 0..total {
            let start = Instant::now();
            // Barrier: the next iteration reads only the fully collected power
            let results: Vec<(Vec<StereoFrame>, Vec<Vec<f32>>)> = (0..num_frames)
                .into_par_iter()
                .map(|f| self.split_frame(mixture, &power, f))
                .collect();

            frames.clear();
            for (f, (split, next_power)) in results.into_iter().enumerate() {
                for (stem_power, next) in power.iter_mut().zip(next_power) {
                    stem_power[f] = next;
                }
                frames.push(split);
            }

            debug!(
                "Wiener iteration {}/{} over {} frames in {:.1?}",
                iteration + 1,
                total,
                num_frames,
                start.elapsed()
            );
            on_iteration(iteration + 1, total);
        }

        let mut channels: Vec<(Vec<_>, Vec<_>)> = (0..kinds.len())
            .map(|_| (Vec::with_capacity(num_frames), Vec::with_capacity(num_frames)))
            .collect();
        for frame in frames {
            for ((left, right), (l, r)) in channels.iter_mut().zip(frame) {
                left.push(l);
                right.push(r);
            }
        }
        Ok(kinds
            .into_iter()
            .zip(channels)
            .map(|(kind, (left, right))| (kind, mixture.with_frames(left, right)))
            .collect())
    }

    /// Apportion one mixture frame; returns each stem's frame and its next power
    fn split_frame(
        &self,
        mixture: &StereoSpectrogram,
        power: &[Plane],
        frame: usize,
    ) -> (Vec<StereoFrame>, Vec<Vec<f32>>) {
        let num_stems = power.len();
        let num_bins = mixture.num_bins();
        let mix_l = &mixture.left[frame];
        let mix_r = &mixture.right[frame];
        let equal = 1.0 / num_stems as f32;

        let mut split: Vec<StereoFrame> = (0..num_stems)
            .map(|_| {
                (
                    vec![Complex::new(0.0, 0.0); num_bins],
                    vec![Complex::new(0.0, 0.0); num_bins],
                )
            })
            .collect();
        let mut next = vec![vec![self.eps; num_bins]; num_stems];

        for k in 0..num_bins {
            let denom: f32 = power.iter().map(|p| p[frame][k]).sum();
            let degenerate = !(denom.is_finite() && denom > self.eps);

            for s in 0..num_stems {
                // No eps in the denominator: the shares must sum to exactly one
                let w = if degenerate {
                    equal
                } else {
                    power[s][frame][k] / denom
                };
                let l = mix_l[k] * w;
                let r = mix_r[k] * w;
                split[s].0[k] = l;
                split[s].1[k] = r;
                next[s][k] = (0.5 * (l.norm_sqr() + r.norm_sqr())).max(self.eps);
            }
        }

        (split, next)
    }
}

/// Second refinement pass over resynthesised stems
///
/// Re-analyses every stem and the mixture at the pass's own resolution, then
/// per channel reassigns the mixture by `|S|^p / Σ|S|^p` for a few rounds.
pub fn refine_waveforms(
    transform: &SpectralTransform,
    stems: &StemMap<StereoBuffer>,
    mixture: &StereoBuffer,
    settings: &SecondPassSettings,
    on_iteration: &mut dyn FnMut(usize, usize),
) -> Result<StemMap<StereoBuffer>> {
    let mix_spec = transform.forward(mixture, settings.fft_size, settings.hop_size)?;
    let kinds: Vec<StemKind> = stems.keys().copied().collect();
    let mut specs: Vec<StereoSpectrogram> = stems
        .values()
        .map(|buffer| transform.forward(buffer, settings.fft_size, settings.hop_size))
        .collect::<Result<_>>()?;

    for iteration in 0..settings.iterations {
        let half_power = settings.power / 2.0;
        let num_stems = specs.len();

        let frames: Vec<Vec<StereoFrame>> = (0..mix_spec.num_frames())
            .into_par_iter()
            .map(|f| {
                let left_in: Vec<&[Complex<f32>]> = specs.iter().map(|s| &s.left[f][..]).collect();
                let right_in: Vec<&[Complex<f32>]> =
                    specs.iter().map(|s| &s.right[f][..]).collect();
                let left = reweight_channel(&mix_spec.left[f], &left_in, half_power);
                let right = reweight_channel(&mix_spec.right[f], &right_in, half_power);
                left.into_iter().zip(right).collect::<Vec<StereoFrame>>()
            })
            .collect();

        for (f, frame) in frames.into_iter().enumerate() {
            for (spec, (left, right)) in specs.iter_mut().zip(frame) {
                spec.left[f] = left;
                spec.right[f] = right;
            }
        }
        debug!(
            "Second pass round {}/{} over {} stems",
            iteration + 1,
            settings.iterations,
            num_stems
        );
        on_iteration(iteration + 1, settings.iterations);
    }

    kinds
        .into_iter()
        .zip(specs.iter())
        .map(|(kind, spec)| Ok((kind, transform.inverse(spec)?)))
        .collect()
}

/// Reassign one channel of one mixture frame by powered stem magnitudes
fn reweight_channel(
    mixture: &[Complex<f32>],
    stems: &[&[Complex<f32>]],
    half_power: f32,
) -> Vec<Vec<Complex<f32>>> {
    let num_stems = stems.len();
    let equal = 1.0 / num_stems as f32;
    let mut out = vec![vec![Complex::new(0.0, 0.0); mixture.len()]; num_stems];
    let mut weights = vec![0.0f32; num_stems];

    for (k, &y) in mixture.iter().enumerate() {
        for (w, stem) in weights.iter_mut().zip(stems.iter()) {
            *w = stem[k].norm_sqr().max(SECOND_PASS_FLOOR).powf(half_power);
        }
        let sum: f32 = weights.iter().sum();
        for (s, &w) in weights.iter().enumerate() {
            let share = if sum > SECOND_PASS_FLOOR && sum.is_finite() {
                w / sum
            } else {
                equal
            };
            out[s][k] = y * share;
        }
    }
    out
}
