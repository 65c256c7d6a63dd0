//! ONNX Runtime inference adapter
//!
//! One session per learned model, created when the adapter is built. The
//! magnitude tensor is laid out as the model's configuration says and the
//! output is read back with the same layout.

use super::mask::StereoMask;
use super::stft::StereoMagnitude;
use super::traits::InferenceAdapter;
use crate::config::{ModelSource, ModelSpec, TensorLayout};
use crate::error::{Result, SeparationError};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Tensor dimensions for (channels, frames, bins) in a layout, batch of one
fn dims(layout: TensorLayout, frames: usize, bins: usize) -> [usize; 4] {
    match layout {
        TensorLayout::Nchw => [1, 2, bins, frames],
        TensorLayout::Nhwc => [1, bins, frames, 2],
        TensorLayout::Nfct => [1, bins, 2, frames],
        TensorLayout::Ncwh => [1, 2, frames, bins],
    }
}

/// Tensor index of (channel, frame, bin) in a layout
fn index(layout: TensorLayout, channel: usize, frame: usize, bin: usize) -> [usize; 4] {
    match layout {
        TensorLayout::Nchw => [0, channel, bin, frame],
        TensorLayout::Nhwc => [0, bin, frame, channel],
        TensorLayout::Nfct => [0, bin, channel, frame],
        TensorLayout::Ncwh => [0, channel, frame, bin],
    }
}

/// Row-major offset of an index within `dims`
fn offset(dims: [usize; 4], idx: [usize; 4]) -> usize {
    ((idx[0] * dims[1] + idx[1]) * dims[2] + idx[2]) * dims[3] + idx[3]
}

/// Inference adapter running ONNX models on the CPU execution provider
pub struct OnnxInferenceAdapter {
    /// ORT sessions keyed by model name (Mutex for interior mutability)
    sessions: HashMap<String, Mutex<Session>>,
}

impl OnnxInferenceAdapter {
    /// Create sessions for every ONNX-backed model in the list
    pub fn new(models: &[ModelSpec]) -> Result<Self> {
        let mut sessions = HashMap::new();
        for model in models {
            let ModelSource::Onnx { path } = &model.source else {
                continue;
            };
            if !model.magnitude_only {
                warn!(
                    "Model '{}' is fed magnitudes only; phase input is not provided",
                    model.name
                );
            }
            let session = Self::create_session(model, path)?;
            info!("Loaded ONNX model '{}' from {}", model.name, path.display());
            sessions.insert(model.name.clone(), Mutex::new(session));
        }
        Ok(Self { sessions })
    }

    /// Create ORT session for one model file
    fn create_session(model: &ModelSpec, path: &Path) -> Result<Session> {
        use ort::execution_providers::CPUExecutionProvider;

        Session::builder()
            .map_err(|e| {
                SeparationError::config_error(format!(
                    "Failed to create ORT session builder: {}",
                    e
                ))
            })?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| {
                SeparationError::config_error(format!("Failed to configure CPU provider: {}", e))
            })?
            .commit_from_file(path)
            .map_err(|e| {
                SeparationError::config_error(format!(
                    "Failed to load model '{}' from {}: {}",
                    model.name,
                    path.display(),
                    e
                ))
            })
    }

    /// Number of loaded sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl InferenceAdapter for OnnxInferenceAdapter {
    fn infer(&self, model: &ModelSpec, magnitude: &StereoMagnitude) -> Result<StereoMask> {
        let fail = |reason: String| SeparationError::inference_error(&model.name, reason);

        let session_mutex = self
            .sessions
            .get(&model.name)
            .ok_or_else(|| fail("no ONNX session loaded for this model".to_string()))?;
        let mut session = session_mutex
            .lock()
            .map_err(|_| fail("Failed to acquire session lock".to_string()))?;

        let frames = magnitude.num_frames();
        let bins = magnitude.num_bins();
        let shape = dims(model.layout, frames, bins);

        let mut input = Array4::<f32>::zeros(shape);
        for (channel, plane) in [&magnitude.left, &magnitude.right].into_iter().enumerate() {
            for (f, frame) in plane.iter().enumerate() {
                for (k, &m) in frame.iter().enumerate() {
                    input[index(model.layout, channel, f, k)] = m;
                }
            }
        }

        let input_tensor = Tensor::from_array(input)
            .map_err(|e| fail(format!("Failed to create input tensor: {}", e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| fail("Model has no input tensors defined".to_string()))?;

        debug!("Running '{}' on {:?} ({:?})", model.name, shape, model.layout);
        let outputs = session
            .run(ort::inputs![input_name.as_str() => input_tensor])
            .map_err(|e| fail(format!("Inference failed: {}", e)))?;

        let output = outputs
            .iter()
            .next()
            .map(|(_, v)| v)
            .ok_or_else(|| fail("No output tensor from model".to_string()))?;

        let (output_shape, output_data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| fail(format!("Failed to extract output tensor: {}", e)))?;

        let got: Vec<i64> = output_shape.iter().copied().collect();
        let expected: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
        if got != expected {
            return Err(fail(format!(
                "Expected output shape {:?}, got {:?}",
                expected, got
            )));
        }
        if output_data.len() != shape.iter().product::<usize>() {
            return Err(fail(format!(
                "Output buffer length {} doesn't match shape {:?}",
                output_data.len(),
                got
            )));
        }

        let read = |channel: usize| -> Vec<Vec<f32>> {
            (0..frames)
                .map(|f| {
                    (0..bins)
                        .map(|k| output_data[offset(shape, index(model.layout, channel, f, k))])
                        .collect()
                })
                .collect()
        };

        Ok(StereoMask {
            left: read(0),
            right: read(1),
        })
    }

    fn name(&self) -> &'static str {
        "onnx-runtime"
    }
}
