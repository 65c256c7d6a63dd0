//! Mask model configuration
//!
//! Models are described in a `models.json` file:
//!
//! ```json
//! { "models": [
//!     { "name": "vocals", "path": "builtin://vocals", "target": "Vocal",
//!       "n_fft": 4096, "hop_length": 1024, "window": "hann", "inputLayout": "NCHW" }
//! ] }
//! ```
//!
//! A `path` with the `builtin://` scheme selects the heuristic band masks. Any
//! other path names an ONNX model file, resolved against the JSON file's
//! directory. The distinction is made here, once, and carried as [`ModelSource`].

use super::settings::SeparationSettings;
use crate::error::{Result, SeparationError};
use crate::types::StemKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loader scheme for the heuristic mask models
pub const BUILTIN_SCHEME: &str = "builtin://";

/// Analysis resolution used by the builtin models
pub const DEFAULT_FFT_SIZE: usize = 4096;
pub const DEFAULT_HOP_SIZE: usize = 1024;

/// Analysis window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hann,
}

/// Tensor layout a learned model expects for its magnitude input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TensorLayout {
    /// (batch, channel, bins, frames)
    #[default]
    #[serde(rename = "NCHW")]
    Nchw,
    /// (batch, bins, frames, channel)
    #[serde(rename = "NHWC")]
    Nhwc,
    /// (batch, bins, channel, frames)
    #[serde(rename = "NFCT")]
    Nfct,
    /// (batch, channel, frames, bins)
    #[serde(rename = "NCWH")]
    Ncwh,
}

/// Where a model's masks come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Deterministic frequency-band heuristic
    Builtin { name: String },
    /// Learned model file run through an inference adapter
    Onnx { path: PathBuf },
}

impl ModelSource {
    /// Classify a loader reference, resolving relative model paths against `base_dir`
    pub fn from_loader(loader: &str, base_dir: Option<&Path>) -> Self {
        if let Some(name) = loader.strip_prefix(BUILTIN_SCHEME) {
            return ModelSource::Builtin {
                name: name.to_string(),
            };
        }
        let path = PathBuf::from(loader);
        let path = match base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        };
        ModelSource::Onnx { path }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, ModelSource::Builtin { .. })
    }
}

/// Static description of one mask model, read-only after loading
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub source: ModelSource,
    /// Stem this model estimates
    pub target: StemKind,
    pub fft_size: usize,
    pub hop_size: usize,
    pub window: WindowKind,
    pub layout: TensorLayout,
    /// Model consumes magnitudes only (no phase channels)
    pub magnitude_only: bool,
}

impl ModelSpec {
    /// Heuristic model for a stem at the default resolution
    pub fn builtin(target: StemKind) -> Self {
        let name = target.as_str().to_lowercase();
        Self {
            name: format!("builtin-{}", name),
            source: ModelSource::Builtin { name },
            target,
            fft_size: DEFAULT_FFT_SIZE,
            hop_size: DEFAULT_HOP_SIZE,
            window: WindowKind::Hann,
            layout: TensorLayout::Nchw,
            magnitude_only: true,
        }
    }

    /// Same model at a different analysis resolution
    pub fn with_resolution(mut self, fft_size: usize, hop_size: usize) -> Self {
        self.fft_size = fft_size;
        self.hop_size = hop_size;
        self
    }
}

/// Builtin heuristic models for every stem
pub fn default_models() -> Vec<ModelSpec> {
    StemKind::ALL.iter().map(|&k| ModelSpec::builtin(k)).collect()
}

/// Parsed contents of a model configuration file
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub models: Vec<ModelSpec>,
    /// Optional engine overrides carried in the same file
    pub separation: Option<SeparationSettings>,
}

/// On-disk model entry
#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
    path: String,
    target: StemKind,
    n_fft: usize,
    hop_length: usize,
    #[serde(default)]
    window: WindowKind,
    #[serde(rename = "inputLayout", default)]
    input_layout: TensorLayout,
    #[serde(rename = "magOnly", default)]
    mag_only: bool,
}

#[derive(Debug, Deserialize)]
struct ModelsFile {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default)]
    separation: Option<SeparationSettings>,
}

/// Parse model configuration JSON
pub fn parse_models(json: &str, base_dir: Option<&Path>) -> Result<ModelConfig> {
    let file: ModelsFile = serde_json::from_str(json).map_err(|e| {
        SeparationError::config_error(format!("Failed to parse model configuration: {}", e))
    })?;

    let models: Vec<ModelSpec> = file
        .models
        .into_iter()
        .map(|entry| {
            let source = ModelSource::from_loader(&entry.path, base_dir);
            debug!("Model '{}' -> {:?} for {}", entry.name, source, entry.target);
            ModelSpec {
                name: entry.name,
                source,
                target: entry.target,
                fft_size: entry.n_fft,
                hop_size: entry.hop_length,
                window: entry.window,
                layout: entry.input_layout,
                magnitude_only: entry.mag_only,
            }
        })
        .collect();

    if models.is_empty() {
        return Err(SeparationError::config_error(
            "model configuration lists no models",
        ));
    }

    Ok(ModelConfig {
        models,
        separation: file.separation,
    })
}

/// Load a `models.json` file from disk
pub fn load_models(path: &Path) -> Result<ModelConfig> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        SeparationError::config_error(format!(
            "Cannot read model configuration '{}': {}",
            path.display(),
            e
        ))
    })?;
    let config = parse_models(&json, path.parent())?;
    info!(
        "Loaded {} model(s) from {}",
        config.models.len(),
        path.display()
    );
    Ok(config)
}
