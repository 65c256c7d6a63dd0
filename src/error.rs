//! Unified error types for musicroom
//!
//! Error strategy:
//! - Format, config and inference errors abort the run; no partial output is kept
//! - Numeric degeneracies (silent bins, zero denominators) are handled in place
//!   and never surface here
//!
//! Every failed run is reported to the caller as exactly one error.

use thiserror::Error;

/// WAV encodings accepted by the parser, for error messages
pub const SUPPORTED_ENCODINGS: &str = "16-bit integer PCM, 32-bit IEEE float";

/// Top-level error type for musicroom operations
#[derive(Debug, Error)]
pub enum SeparationError {
    // =========================================================================
    // Run errors - abort the current separation
    // =========================================================================
    #[error("Invalid WAV data: {reason}\n  Supported encodings: {SUPPORTED_ENCODINGS}")]
    Format { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Mask inference failed for model '{model}': {reason}\n  Tip: Check that the model's fft size and tensor layout match its configuration")]
    Inference { model: String, reason: String },

    #[error("Failed to encode WAV output: {reason}")]
    Encode { reason: String },

    // =========================================================================
    // Host errors
    // =========================================================================
    #[error("Separation worker unavailable: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for musicroom operations
pub type Result<T> = std::result::Result<T, SeparationError>;

impl SeparationError {
    /// Create a format error for malformed or unsupported WAV input
    pub fn format_error(reason: impl Into<String>) -> Self {
        SeparationError::Format {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config_error(reason: impl Into<String>) -> Self {
        SeparationError::Config {
            reason: reason.into(),
        }
    }

    /// Create an error for a stem that could not be written as WAV
    pub fn encode_error(reason: impl Into<String>) -> Self {
        SeparationError::Encode {
            reason: reason.into(),
        }
    }

    /// Create an inference error attributed to a model
    pub fn inference_error(model: impl Into<String>, reason: impl Into<String>) -> Self {
        SeparationError::Inference {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error was caused by the input audio rather than the setup
    pub fn is_input_error(&self) -> bool {
        matches!(self, SeparationError::Format { .. })
    }
}
