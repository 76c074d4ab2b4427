//! Cancellation token system for worker jobs
//!
//! Provides cancellation tokens that allow queued or running jobs to be
//! cancelled cooperatively. A job checks its token at stage boundaries and
//! returns early once it has been cancelled.

use crate::JobId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Flag a job polls to find out it is no longer wanted.
///
/// Clones share one flag. Decode jobs test it between stages, so a
/// cancelled job stops at the next boundary rather than immediately.
///
/// # Example
///
/// ```
/// use imgview_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the job unwanted. Visible to every clone; repeat calls are no-ops.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the tokens of every job a worker has accepted but not finished.
///
/// Jobs are registered on submit and unregistered once the worker is done
/// with them, so cancelling by id reaches both queued and in-flight jobs.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a newly accepted job.
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(job_id, token.clone());
        token
    }

    /// Returns `false` when `job_id` is unknown or already finished.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked job and return how many there were.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Stop tracking a job the worker is done with.
    pub fn unregister(&self, job_id: JobId) -> bool {
        self.tokens.lock().remove(&job_id).is_some()
    }

    /// Jobs accepted but not finished.
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_flag() {
        let submitted = CancellationToken::new();
        let running = submitted.clone();

        submitted.cancel();
        assert!(running.is_cancelled());
    }

    #[test]
    fn test_cancel_twice() {
        let token = CancellationToken::default();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_known_and_unknown_ids() {
        let registry = CancellationRegistry::new();
        let token = registry.register(7);

        assert_eq!(registry.len(), 1);
        assert!(registry.cancel(7));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(999));
    }

    #[test]
    fn test_cancel_all_reaches_every_job() {
        let registry = CancellationRegistry::new();
        let a = registry.register(1);
        let b = registry.register(2);

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_finished_jobs_are_forgotten() {
        let registry = CancellationRegistry::new();
        registry.register(1);

        assert!(registry.unregister(1));
        assert!(!registry.unregister(1));
        assert!(registry.is_empty());
    }
}
