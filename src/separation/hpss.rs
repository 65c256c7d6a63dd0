//! Median-filter harmonic/percussive decomposition
//!
//! A sustained tone is smooth along time and peaky along frequency; a hit is
//! the opposite. Median filtering along each axis therefore estimates the
//! harmonic (across time) and percussive (across frequency) parts.

use super::stft::Plane;
use rayon::prelude::*;

/// Median window along time, in frames
pub const TIME_KERNEL: usize = 9;

/// Median window along frequency, in bins
pub const FREQ_KERNEL: usize = 17;

/// Median of a scratch buffer (upper median for even lengths)
fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    *m
}

/// Centered window bounds, clipped to `0..len`
fn window(center: usize, kernel: usize, len: usize) -> std::ops::Range<usize> {
    let half = kernel / 2;
    center.saturating_sub(half)..(center + half + 1).min(len)
}

/// Median across time for every bin (harmonic estimate)
pub fn median_across_time(magnitude: &Plane, kernel: usize) -> Plane {
    let frames = magnitude.len();
    let bins = magnitude.first().map_or(0, |f| f.len());

    (0..frames)
        .into_par_iter()
        .map(|f| {
            let range = window(f, kernel, frames);
            let mut scratch = Vec::with_capacity(range.len());
            (0..bins)
                .map(|k| {
                    scratch.clear();
                    scratch.extend(range.clone().map(|t| magnitude[t][k]));
                    median(&mut scratch)
                })
                .collect()
        })
        .collect()
}

/// Median across frequency within every frame (percussive estimate)
pub fn median_across_frequency(magnitude: &Plane, kernel: usize) -> Plane {
    magnitude
        .par_iter()
        .map(|frame| {
            let mut scratch = Vec::with_capacity(kernel);
            (0..frame.len())
                .map(|k| {
                    scratch.clear();
                    scratch.extend_from_slice(&frame[window(k, kernel, frame.len())]);
                    median(&mut scratch)
                })
                .collect()
        })
        .collect()
}

/// Percussive share `P / (H + P + eps)` per frame and bin
pub fn percussive_ratio(magnitude: &Plane, eps: f32) -> Plane {
    let harmonic = median_across_time(magnitude, TIME_KERNEL);
    let percussive = median_across_frequency(magnitude, FREQ_KERNEL);

    harmonic
        .iter()
        .zip(percussive.iter())
        .map(|(h, p)| {
            h.iter()
                .zip(p.iter())
                .map(|(&h, &p)| {
                    let ratio = p / (h + p + eps);
                    if ratio.is_finite() {
                        ratio
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}
