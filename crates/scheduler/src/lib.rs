//! Image Viewer Scheduler Library
//!
//! Background execution primitives shared by the document and thumbnail
//! pipelines:
//!
//! - [`Worker`]: one dedicated thread serving a FIFO queue of jobs with
//!   cooperative cancellation and an explicit stop/join handshake.
//! - [`MainContext`]: the queue that worker results are posted to, pumped by
//!   the owner of the application state.
//! - [`FrameTimer`]: a ticker that drives animation playback independently
//!   of decode work.
//!
//! # Example
//!
//! ```
//! use imgview_scheduler::{MainContext, Worker, WorkerConfig};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let context = MainContext::new();
//! let result = Arc::new(AtomicU32::new(0));
//!
//! let reply_context = context.clone();
//! let reply = result.clone();
//! let worker = Worker::spawn(WorkerConfig::new("decoder"), move |n: u32, token| {
//!     if token.is_cancelled() {
//!         return;
//!     }
//!     let reply = reply.clone();
//!     reply_context.post(move || reply.store(n * 2, Ordering::SeqCst));
//! })
//! .unwrap();
//!
//! worker.submit(21).unwrap();
//! assert!(context.process_until(|| result.load(Ordering::SeqCst) == 42, Duration::from_secs(5)));
//! ```

mod cancel;
mod context;
mod timer;
mod worker;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use context::MainContext;
pub use timer::{FrameTimer, MIN_FRAME_DELAY};
pub use worker::{is_worker_thread, JobHandle, Worker, WorkerConfig};

/// Identifier of a job inside one worker.
pub type JobId = u64;

/// Errors raised by the scheduling primitives.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The OS refused to spawn a thread.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker was stopped and accepts no more jobs.
    #[error("worker has been stopped")]
    Stopped,

    /// A frame timer was started without frames.
    #[error("animation has no frames")]
    EmptyAnimation,
}
