//! Configuration and CLI handling

pub mod cli;
pub mod models;
pub mod settings;

pub use cli::Cli;
pub use models::{default_models, load_models, ModelConfig, ModelSource, ModelSpec, TensorLayout};
pub use settings::{SecondPassSettings, SeparationSettings, Settings, StereoMaskMode};
