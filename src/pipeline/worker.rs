//! Dedicated separation worker thread
//!
//! Requests are queued on a crossbeam channel and run strictly one at a time.
//! Each request gets its own response channel; every message on it carries
//! the caller's [`RequestId`] and a run ends with exactly one terminal event.

use super::orchestrator::SeparationPipeline;
use super::progress::Progress;
use crate::config::{ModelSpec, SeparationSettings};
use crate::error::{Result, SeparationError};
use crate::separation::InferenceAdapter;
use crate::types::SeparatedStems;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rayon::ThreadPool;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Caller-chosen identifier echoed on every response
pub type RequestId = u64;

/// One separation job
#[derive(Debug, Clone)]
pub struct SeparationRequest {
    /// WAV bytes of the mixture
    pub wav: Vec<u8>,
    pub models: Vec<ModelSpec>,
    pub settings: SeparationSettings,
}

/// What the worker reports about a request
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(Progress),
    Done(SeparatedStems),
    Error(String),
}

impl WorkerEvent {
    /// Done and Error end a request
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerEvent::Progress(_))
    }
}

/// A worker event tagged with its request
#[derive(Debug)]
pub struct WorkerMessage {
    pub id: RequestId,
    pub event: WorkerEvent,
}

/// Caller side of one submitted request
///
/// Dropping the handle abandons the request; the worker finishes the run and
/// discards the result.
pub struct RequestHandle {
    id: RequestId,
    events: Receiver<WorkerMessage>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Raw event stream for this request
    pub fn events(&self) -> &Receiver<WorkerMessage> {
        &self.events
    }

    /// Block until the request finishes, forwarding progress
    pub fn wait_with_progress(self, mut on_progress: impl FnMut(Progress)) -> Result<SeparatedStems> {
        for message in self.events.iter() {
            match message.event {
                WorkerEvent::Progress(p) => on_progress(p),
                WorkerEvent::Done(stems) => return Ok(stems),
                WorkerEvent::Error(reason) => return Err(SeparationError::Worker(reason)),
            }
        }
        Err(SeparationError::Worker(format!(
            "worker stopped before finishing request {}",
            self.id
        )))
    }

    /// Block until the request finishes
    pub fn wait(self) -> Result<SeparatedStems> {
        self.wait_with_progress(|_| {})
    }
}

/// Job for the worker thread
struct Job {
    id: RequestId,
    request: SeparationRequest,
    events: Sender<WorkerMessage>,
}

/// Owns the worker thread and its job queue
pub struct SeparationWorker {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl SeparationWorker {
    /// Start the worker with a rayon pool of `threads` threads
    pub fn spawn(threads: usize, adapter: Option<Arc<dyn InferenceAdapter>>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("separation-{}", i))
            .build()
            .map_err(|e| {
                SeparationError::config_error(format!("Failed to configure thread pool: {}", e))
            })?;
        debug!("Configured thread pool with {} threads", threads.max(1));

        let (tx, rx) = unbounded::<Job>();
        let handle = thread::Builder::new()
            .name("separation-worker".to_string())
            .spawn(move || worker_loop(rx, pool, adapter))?;

        Ok(Self {
            jobs: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a request without blocking
    pub fn submit(&self, id: RequestId, request: SeparationRequest) -> Result<RequestHandle> {
        let (tx, rx) = unbounded();
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| SeparationError::Worker("worker is shut down".to_string()))?;
        jobs.send(Job {
            id,
            request,
            events: tx,
        })
        .map_err(|_| SeparationError::Worker("worker thread has exited".to_string()))?;
        debug!("Queued separation request {}", id);
        Ok(RequestHandle { id, events: rx })
    }
}

impl Drop for SeparationWorker {
    fn drop(&mut self) {
        // Close the job channel to signal the worker to finish
        drop(self.jobs.take());

        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => debug!("Separation worker thread completed"),
                Err(panic_info) => {
                    error!(
                        "Separation worker thread panicked: {}",
                        panic_message(panic_info.as_ref())
                    );
                }
            }
        }
    }
}

/// Extract panic message if possible
fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker thread body: run jobs in arrival order until the queue closes
fn worker_loop(
    rx: Receiver<Job>,
    pool: ThreadPool,
    adapter: Option<Arc<dyn InferenceAdapter>>,
) {
    for job in rx {
        let start = Instant::now();
        let id = job.id;
        debug!("Starting separation request {}", id);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| run_job(&job, adapter.clone()))
        }));

        let event = match outcome {
            Ok(Ok(stems)) => {
                info!("Request {} finished in {:.1?}", id, start.elapsed());
                WorkerEvent::Done(stems)
            }
            Ok(Err(e)) => {
                warn!("Request {} failed: {}", id, e);
                WorkerEvent::Error(e.to_string())
            }
            Err(panic_info) => {
                let msg = panic_message(panic_info.as_ref());
                error!("Request {} panicked: {}", id, msg);
                WorkerEvent::Error(format!("separation panicked: {}", msg))
            }
        };

        if job.events.send(WorkerMessage { id, event }).is_err() {
            warn!("Request {} was abandoned; discarding result", id);
        }
    }
    debug!("Separation worker queue closed");
}

/// Build the pipeline for a request and run it, streaming progress
fn run_job(job: &Job, adapter: Option<Arc<dyn InferenceAdapter>>) -> Result<SeparatedStems> {
    let request = &job.request;
    let pipeline =
        SeparationPipeline::new(request.settings.clone(), request.models.clone(), adapter)?;
    pipeline.run(&request.wav, &mut |progress| {
        // A dropped handle only stops progress delivery
        let _ = job.events.send(WorkerMessage {
            id: job.id,
            event: WorkerEvent::Progress(progress),
        });
    })
}
