//! Spectral separation engine
//!
//! Bottom-up: STFT analysis, per-stem masks, Wiener refinement, then the
//! redistribution heuristics that finish the stem set.

pub mod hpss;
pub mod mask;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod redistribute;
pub mod stft;
pub mod traits;
pub mod wiener;

pub use mask::{HeuristicBandMask, LearnedModelMask, StereoMask};
#[cfg(feature = "onnx")]
pub use onnx::OnnxInferenceAdapter;
pub use redistribute::Redistributor;
pub use stft::{SpectralTransform, StereoMagnitude, StereoSpectrogram, WindowCache};
pub use traits::{InferenceAdapter, MaskProvider};
pub use wiener::WienerRefiner;
