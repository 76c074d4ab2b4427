//! Jobs run on the decode worker.
//!
//! A job owns everything it touches: the I/O collaborator, a clone of the
//! main context and a weak reference to its target. The target is only
//! upgraded inside the task posted back to the main context, so the last
//! strong reference to a document or thumbnail job is never released on a
//! worker thread.

use crate::config::FactoryConfig;
use crate::io::ResourceIo;
use imgview_scheduler::{CancellationToken, MainContext, Worker, WorkerConfig, WorkerError};
use std::sync::{Arc, Weak};

/// Unit of work for a decode or I/O worker.
pub type DecodeJob = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Spawn a worker that runs [`DecodeJob`]s.
pub fn spawn_job_worker(name: &str) -> Result<Worker<DecodeJob>, WorkerError> {
    Worker::spawn(WorkerConfig::new(name), |job: DecodeJob, token: &CancellationToken| {
        if !token.is_cancelled() {
            job(token);
        }
    })
}

/// Post `task` to `context`; it runs only if `target` is still alive.
pub(crate) fn post_to<T, F>(context: &MainContext, target: Weak<T>, task: F)
where
    T: Send + Sync + 'static,
    F: FnOnce(&T) + Send + 'static,
{
    context.post(move || {
        if let Some(target) = target.upgrade() {
            task(&target);
        }
    });
}

/// State shared by every document of one factory.
pub(crate) struct Services {
    pub context: MainContext,
    pub worker: Worker<DecodeJob>,
    pub io: Arc<dyn ResourceIo>,
    pub config: FactoryConfig,
}

impl Services {
    pub fn new(
        context: MainContext,
        io: Arc<dyn ResourceIo>,
        config: FactoryConfig,
    ) -> Result<Self, WorkerError> {
        let worker = spawn_job_worker(&config.worker_name)?;
        Ok(Self {
            context,
            worker,
            io,
            config,
        })
    }
}
