//! Mixture conditioning ahead of separation
//!
//! Hot masters can peak above full scale once decoded to float. Scaling them
//! below 0.98 keeps the int16 stem renders from clipping.

use crate::types::StereoBuffer;
use tracing::debug;

/// Peak ceiling applied when normalization is requested
pub const DEFAULT_PEAK_TARGET: f32 = 0.98;

/// Outcome of [`normalize_peak`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakAdjustment {
    /// Peak of the input before scaling
    pub peak: f32,
    /// Gain that was applied (1.0 when untouched)
    pub scale: f32,
}

/// Scale the buffer down so its peak does not exceed `target`
///
/// Buffers already under the target are returned unchanged; quiet material is
/// never boosted.
pub fn normalize_peak(buffer: &StereoBuffer, target: f32) -> (StereoBuffer, PeakAdjustment) {
    let peak = buffer.peak();
    let scale = if peak.is_finite() && peak > target && target > 0.0 {
        target / peak
    } else {
        1.0
    };

    if scale == 1.0 {
        return (buffer.clone(), PeakAdjustment { peak, scale });
    }

    debug!("Normalizing mixture peak {:.3} -> {:.3} (x{:.4})", peak, target, scale);

    let left = buffer.left.iter().map(|s| s * scale).collect();
    let right = buffer.right.iter().map(|s| s * scale).collect();
    (
        StereoBuffer::new(left, right, buffer.sample_rate),
        PeakAdjustment { peak, scale },
    )
}

/// Replace NaN and infinite samples with silence; returns the count replaced
pub fn sanitize(buffer: StereoBuffer) -> (StereoBuffer, usize) {
    let mut replaced = 0;
    let mut clean = |samples: Vec<f32>| -> Vec<f32> {
        samples
            .into_iter()
            .map(|s| {
                if s.is_finite() {
                    s
                } else {
                    replaced += 1;
                    0.0
                }
            })
            .collect()
    };
    let left = clean(buffer.left);
    let right = clean(buffer.right);
    (StereoBuffer::new(left, right, buffer.sample_rate), replaced)
}
