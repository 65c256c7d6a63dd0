//! musicroom - Spectral Stem Separation Engine
//!
//! Splits a stereo mixture into Vocal, Bass, Drums, Piano, Guitar and Others
//! stems whose sum reconstructs the mixture.
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - `audio`: WAV byte codec and mixture conditioning
//! - `config`: CLI arguments, engine settings and model configuration
//! - `separation`: STFT, mask providers, Wiener refinement, HPSS redistribution
//! - `pipeline`: Stage orchestration, progress reporting and the worker thread
//!
//! # Example
//!
//! ```no_run
//! use musicroom::config::{default_models, SeparationSettings};
//! use musicroom::pipeline::SeparationPipeline;
//!
//! let wav = std::fs::read("mix.wav").expect("read input");
//! let pipeline = SeparationPipeline::new(SeparationSettings::default(), default_models(), None)
//!     .expect("valid configuration");
//! let stems = pipeline
//!     .run(&wav, &mut |p| println!("{} {:.0}%", p.stage, p.percent))
//!     .expect("Separation failed");
//! println!("Produced {} stems", stems.len());
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod separation;
pub mod types;

// Re-export key types at crate root
pub use error::{Result, SeparationError};
pub use types::{EncodedStem, SeparatedStems, StemKind, StemMap, StereoBuffer};
