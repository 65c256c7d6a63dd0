//! Separation pipeline and its worker thread

pub mod orchestrator;
pub mod progress;
pub mod worker;

pub use orchestrator::SeparationPipeline;
pub use progress::{Progress, ProgressTracker, Stage};
pub use worker::{
    RequestHandle, RequestId, SeparationRequest, SeparationWorker, WorkerEvent, WorkerMessage,
};
