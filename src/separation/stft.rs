//! STFT (Short-Time Fourier Transform) analysis and overlap-add resynthesis
//!
//! # Framing
//!
//! - **Periodic Hann window**: `0.5 * (1 - cos(2πn/N))`. With hop ≤ N/2 the
//!   squared window overlap never vanishes inside the signal, so dividing by
//!   the accumulated `Σw²` reconstructs the input exactly.
//! - **Padding**: N/2 zeros at both ends so the first and last samples sit
//!   under a window peak rather than a window edge.
//! - **Full spectrum**: frames keep all N bins. Gains applied later are
//!   computed on the folded bin index `min(k, N-k)`, which keeps the spectrum
//!   conjugate-symmetric and the resynthesised signal real.

use crate::error::{Result, SeparationError};
use crate::types::StereoBuffer;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Floor for the window-energy normalisation during overlap-add
pub const WINDOW_ENERGY_FLOOR: f32 = 1e-8;

/// Per-frame, per-bin magnitudes for one channel: `[frame][bin]`
pub type Plane = Vec<Vec<f32>>;

/// Complex spectrogram for a stereo signal
#[derive(Debug, Clone, PartialEq)]
pub struct StereoSpectrogram {
    /// Left channel spectrogram: [frame][bin]
    pub left: Vec<Vec<Complex<f32>>>,
    /// Right channel spectrogram: [frame][bin]
    pub right: Vec<Vec<Complex<f32>>>,
    pub fft_size: usize,
    pub hop_size: usize,
    /// Zeros added at each end before framing
    pub pad: usize,
    /// Samples per channel before padding
    pub original_len: usize,
    pub sample_rate: u32,
}

impl StereoSpectrogram {
    pub fn num_frames(&self) -> usize {
        self.left.len()
    }

    /// Bins per frame (equal to the fft size)
    pub fn num_bins(&self) -> usize {
        self.fft_size
    }

    /// Get the shape as (channels, frames, bins)
    pub fn shape(&self) -> (usize, usize, usize) {
        (2, self.num_frames(), self.num_bins())
    }

    /// All-zero spectrogram with the same geometry
    pub fn zeros_like(&self) -> Self {
        let frame = vec![Complex::new(0.0, 0.0); self.fft_size];
        self.with_frames(
            vec![frame.clone(); self.num_frames()],
            vec![frame; self.num_frames()],
        )
    }

    /// Spectrogram with this geometry and the given frames
    pub fn with_frames(
        &self,
        left: Vec<Vec<Complex<f32>>>,
        right: Vec<Vec<Complex<f32>>>,
    ) -> Self {
        Self {
            left,
            right,
            fft_size: self.fft_size,
            hop_size: self.hop_size,
            pad: self.pad,
            original_len: self.original_len,
            sample_rate: self.sample_rate,
        }
    }

    /// Magnitude of every coefficient
    pub fn magnitudes(&self) -> StereoMagnitude {
        let mag = |channel: &[Vec<Complex<f32>>]| -> Plane {
            channel
                .iter()
                .map(|frame| frame.iter().map(|c| c.norm()).collect())
                .collect()
        };
        StereoMagnitude {
            left: mag(&self.left),
            right: mag(&self.right),
        }
    }

    /// Stereo-averaged power `0.5 * (|L|² + |R|²)` per frame and bin
    pub fn mean_power(&self) -> Plane {
        self.left
            .iter()
            .zip(self.right.iter())
            .map(|(l, r)| {
                l.iter()
                    .zip(r.iter())
                    .map(|(a, b)| 0.5 * (a.norm_sqr() + b.norm_sqr()))
                    .collect()
            })
            .collect()
    }

    /// Check that another spectrogram can be combined bin-for-bin with this one
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.fft_size == other.fft_size
            && self.hop_size == other.hop_size
            && self.num_frames() == other.num_frames()
    }
}

/// Per-channel magnitude planes, shaped [frame][bin]
#[derive(Debug, Clone, PartialEq)]
pub struct StereoMagnitude {
    pub left: Plane,
    pub right: Plane,
}

impl StereoMagnitude {
    pub fn num_frames(&self) -> usize {
        self.left.len()
    }

    pub fn num_bins(&self) -> usize {
        self.left.first().map_or(0, |f| f.len())
    }

    /// Keep bins `0..=N/2` of every frame
    pub fn half_spectrum(&self) -> Self {
        let half = |plane: &Plane| -> Plane {
            plane
                .iter()
                .map(|frame| frame[..frame.len() / 2 + 1].to_vec())
                .collect()
        };
        Self {
            left: half(&self.left),
            right: half(&self.right),
        }
    }
}

/// Folded bin index: bins above N/2 mirror the positive frequencies
#[inline]
pub fn fold_bin(bin: usize, fft_size: usize) -> usize {
    bin.min(fft_size - bin)
}

/// Frequency in Hz of a (possibly mirrored) bin
#[inline]
pub fn bin_to_hz(bin: usize, fft_size: usize, sample_rate: u32) -> f32 {
    fold_bin(bin, fft_size) as f32 * sample_rate as f32 / fft_size as f32
}

/// Check fft/hop sizes before any allocation happens
pub fn validate_resolution(fft_size: usize, hop_size: usize) -> Result<()> {
    if fft_size < 2 || !fft_size.is_power_of_two() {
        return Err(SeparationError::config_error(format!(
            "fft size must be a power of two >= 2, got {}",
            fft_size
        )));
    }
    if hop_size == 0 || hop_size > fft_size {
        return Err(SeparationError::config_error(format!(
            "hop size must be in 1..={}, got {}",
            fft_size, hop_size
        )));
    }
    Ok(())
}

/// Number of analysis frames for a signal of `len` samples
pub fn frame_count(len: usize, fft_size: usize, hop_size: usize) -> usize {
    let padded = len + 2 * (fft_size / 2);
    let span = padded.saturating_sub(fft_size);
    (span.div_ceil(hop_size) + 1).max(1)
}

/// Window and FFT plans for one transform size
struct PlanSet {
    window: Arc<[f32]>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

/// Hann windows and FFT plans keyed by transform size
pub struct WindowCache {
    planner: FftPlanner<f32>,
    plans: HashMap<usize, Arc<PlanSet>>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plans: HashMap::new(),
        }
    }

    fn get(&mut self, fft_size: usize) -> Arc<PlanSet> {
        if let Some(plans) = self.plans.get(&fft_size) {
            return Arc::clone(plans);
        }
        trace!("Planning FFT of size {}", fft_size);
        let plans = Arc::new(PlanSet {
            window: hann_window(fft_size).into(),
            forward: self.planner.plan_fft_forward(fft_size),
            inverse: self.planner.plan_fft_inverse(fft_size),
        });
        self.plans.insert(fft_size, Arc::clone(&plans));
        plans
    }

    /// Number of cached transform sizes
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl Default for WindowCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward and inverse STFT sharing one window/plan cache
pub struct SpectralTransform {
    cache: Mutex<WindowCache>,
}

impl SpectralTransform {
    pub fn new() -> Self {
        Self::with_cache(WindowCache::new())
    }

    pub fn with_cache(cache: WindowCache) -> Self {
        Self {
            cache: Mutex::new(cache),
        }
    }

    fn plans(&self, fft_size: usize) -> Arc<PlanSet> {
        // The cache holds no invariants a panicking holder could break
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fft_size)
    }

    /// Number of transform sizes planned so far
    pub fn cached_sizes(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Analyse a stereo buffer
    pub fn forward(
        &self,
        audio: &StereoBuffer,
        fft_size: usize,
        hop_size: usize,
    ) -> Result<StereoSpectrogram> {
        validate_resolution(fft_size, hop_size)?;
        let plans = self.plans(fft_size);
        let pad = fft_size / 2;
        let num_frames = frame_count(audio.len(), fft_size, hop_size);

        let left = stft_channel(&audio.left, &plans, pad, hop_size, num_frames);
        let right = stft_channel(&audio.right, &plans, pad, hop_size, num_frames);

        Ok(StereoSpectrogram {
            left,
            right,
            fft_size,
            hop_size,
            pad,
            original_len: audio.len(),
            sample_rate: audio.sample_rate,
        })
    }

    /// Resynthesise a stereo buffer of the original length
    pub fn inverse(&self, spectrogram: &StereoSpectrogram) -> Result<StereoBuffer> {
        validate_resolution(spectrogram.fft_size, spectrogram.hop_size)?;
        let plans = self.plans(spectrogram.fft_size);
        let left = istft_channel(&spectrogram.left, spectrogram, &plans);
        let right = istft_channel(&spectrogram.right, spectrogram, &plans);
        Ok(StereoBuffer::new(left, right, spectrogram.sample_rate))
    }
}

impl Default for SpectralTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute STFT for a single channel
fn stft_channel(
    samples: &[f32],
    plans: &PlanSet,
    pad: usize,
    hop_size: usize,
    num_frames: usize,
) -> Vec<Vec<Complex<f32>>> {
    let fft_size = plans.window.len();

    (0..num_frames)
        .into_par_iter()
        .map(|frame_idx| {
            let start = frame_idx * hop_size;
            let mut buffer = vec![Complex::new(0.0, 0.0); fft_size];

            // Padded position p maps to sample p - pad
            for (i, (slot, &w)) in buffer.iter_mut().zip(plans.window.iter()).enumerate() {
                let sample = (start + i)
                    .checked_sub(pad)
                    .and_then(|idx| samples.get(idx))
                    .copied()
                    .unwrap_or(0.0);
                *slot = Complex::new(sample * w, 0.0);
            }

            plans.forward.process(&mut buffer);
            buffer
        })
        .collect()
}

/// Compute inverse STFT for a single channel
fn istft_channel(
    frames: &[Vec<Complex<f32>>],
    geometry: &StereoSpectrogram,
    plans: &PlanSet,
) -> Vec<f32> {
    let fft_size = geometry.fft_size;
    let hop_size = geometry.hop_size;
    let scale = 1.0 / fft_size as f32;

    let time_frames: Vec<Vec<f32>> = frames
        .par_iter()
        .map(|frame| {
            let mut buffer = frame.clone();
            plans.inverse.process(&mut buffer);
            buffer
                .iter()
                .zip(plans.window.iter())
                .map(|(c, &w)| c.re * scale * w)
                .collect()
        })
        .collect();

    let ola_len = frames.len().saturating_sub(1) * hop_size + fft_size;
    let mut output = vec![0.0f32; ola_len];
    let mut window_sum = vec![0.0f32; ola_len];

    for (frame_idx, frame) in time_frames.iter().enumerate() {
        let start = frame_idx * hop_size;
        for (i, (&x, &w)) in frame.iter().zip(plans.window.iter()).enumerate() {
            output[start + i] += x;
            window_sum[start + i] += w * w;
        }
    }

    for (out, &ws) in output.iter_mut().zip(window_sum.iter()) {
        if ws > WINDOW_ENERGY_FLOOR {
            *out /= ws;
        }
    }

    let start = geometry.pad.min(ola_len);
    let end = (start + geometry.original_len).min(ola_len);
    let mut trimmed = output[start..end].to_vec();
    trimmed.resize(geometry.original_len, 0.0);
    trimmed
}

/// Generate a periodic Hann window of given size
pub fn hann_window(size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}
