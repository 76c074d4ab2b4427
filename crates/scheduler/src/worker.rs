//! Background worker thread for decode jobs.
//!
//! A [`Worker`] owns one dedicated thread and a FIFO queue guarded by a
//! mutex and condition variable. Callers submit jobs from any thread; the
//! worker thread pops them in order and hands each one to the executor
//! together with its cancellation token. Results are never returned on the
//! caller's stack: executors post them to a [`crate::MainContext`] instead.

use crate::{CancellationRegistry, CancellationToken, JobId, WorkerError};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

thread_local! {
    static ON_WORKER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` when called from a thread owned by a [`Worker`].
///
/// Blocking waits that pump the main context must not run there.
pub fn is_worker_thread() -> bool {
    ON_WORKER_THREAD.with(Cell::get)
}

/// Marks the current thread as a worker thread.
///
/// Used by threads that are not spawned through [`Worker`] but run job
/// code anyway, such as the frame timer.
pub(crate) fn mark_worker_thread() {
    ON_WORKER_THREAD.with(|flag| flag.set(true));
}

/// Configuration for a worker thread.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name, visible in debuggers and log output.
    /// Default: "imgview-worker".
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "imgview-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with the given thread name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Set the thread name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Handle returned for every submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    token: CancellationToken,
}

impl JobHandle {
    /// Identifier of the job inside its worker.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Token shared with the executor for this job.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the job. Queued jobs are skipped, a running job sees the
    /// token at its next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

struct QueuedJob<J> {
    id: JobId,
    job: J,
    token: CancellationToken,
}

struct QueueState<J> {
    jobs: VecDeque<QueuedJob<J>>,
    current: Option<JobId>,
    stopping: bool,
}

struct Shared<J> {
    state: Mutex<QueueState<J>>,
    job_available: Condvar,
    idle: Condvar,
    registry: CancellationRegistry,
    next_id: AtomicU64,
}

/// Single-consumer background worker.
///
/// # Example
///
/// ```
/// use imgview_scheduler::{Worker, WorkerConfig};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let done = Arc::new(AtomicUsize::new(0));
/// let counter = done.clone();
/// let worker = Worker::spawn(WorkerConfig::new("doc-worker"), move |n: usize, _token| {
///     counter.fetch_add(n, Ordering::SeqCst);
/// })
/// .unwrap();
///
/// worker.submit(2).unwrap();
/// worker.submit(3).unwrap();
/// assert!(worker.wait_idle(Duration::from_secs(5)));
/// assert_eq!(done.load(Ordering::SeqCst), 5);
/// ```
pub struct Worker<J: Send + 'static> {
    name: String,
    shared: Arc<Shared<J>>,
    thread: Option<JoinHandle<()>>,
}

impl<J: Send + 'static> Worker<J> {
    /// Spawn the worker thread.
    ///
    /// The executor runs on the worker thread for every job that was not
    /// cancelled before it was dequeued. A panicking executor is logged and
    /// the worker keeps serving the queue.
    ///
    /// # Errors
    /// Returns [`WorkerError::Spawn`] if the OS refuses to create the thread.
    pub fn spawn<F>(config: WorkerConfig, executor: F) -> Result<Self, WorkerError>
    where
        F: FnMut(J, &CancellationToken) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                current: None,
                stopping: false,
            }),
            job_available: Condvar::new(),
            idle: Condvar::new(),
            registry: CancellationRegistry::new(),
            next_id: AtomicU64::new(1),
        });

        let thread_shared = shared.clone();
        let thread_name = config.name.clone();
        let thread = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || Self::run(thread_name, thread_shared, executor))
            .map_err(WorkerError::Spawn)?;

        debug!(worker = %config.name, "worker started");
        Ok(Self {
            name: config.name,
            shared,
            thread: Some(thread),
        })
    }

    /// Thread name of this worker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job at the back of the FIFO.
    ///
    /// # Errors
    /// Returns [`WorkerError::Stopped`] once [`Worker::stop`] has been called.
    pub fn submit(&self, job: J) -> Result<JobHandle, WorkerError> {
        let mut state = self.shared.state.lock();
        if state.stopping {
            return Err(WorkerError::Stopped);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shared.registry.register(id);
        state.jobs.push_back(QueuedJob {
            id,
            job,
            token: token.clone(),
        });
        trace!(worker = %self.name, job = id, queued = state.jobs.len(), "job submitted");
        drop(state);

        self.shared.job_available.notify_one();
        Ok(JobHandle { id, token })
    }

    /// Cancel a job by id.
    ///
    /// A queued job is removed from the queue; the job currently running has
    /// its token cancelled. Returns `false` if the worker does not know the id.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut state = self.shared.state.lock();
        if let Some(pos) = state.jobs.iter().position(|queued| queued.id == id) {
            if let Some(queued) = state.jobs.remove(pos) {
                queued.token.cancel();
            }
            self.shared.registry.unregister(id);
            if state.jobs.is_empty() && state.current.is_none() {
                self.shared.idle.notify_all();
            }
            return true;
        }
        drop(state);
        self.shared.registry.cancel(id)
    }

    /// Cancel every queued and running job. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.shared.state.lock();
        let mut cancelled = 0;
        for queued in state.jobs.drain(..) {
            queued.token.cancel();
            self.shared.registry.unregister(queued.id);
            cancelled += 1;
        }
        if state.current.is_none() {
            self.shared.idle.notify_all();
        }
        drop(state);
        cancelled + self.shared.registry.cancel_all()
    }

    /// Number of jobs waiting in the queue (excluding the running one).
    pub fn pending(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// Returns `true` while a job is running or waiting.
    pub fn is_busy(&self) -> bool {
        let state = self.shared.state.lock();
        state.current.is_some() || !state.jobs.is_empty()
    }

    /// Block until the queue is empty and no job is running.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.current.is_some() || (!state.jobs.is_empty() && !state.stopping) {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.current.is_none() && state.jobs.is_empty();
            }
        }
        true
    }

    /// Ask the worker to stop.
    ///
    /// No new job is dequeued after this call. The job in flight, if any,
    /// runs to completion; queued jobs are cancelled and dropped.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if state.stopping {
            return;
        }
        state.stopping = true;
        for queued in state.jobs.drain(..) {
            queued.token.cancel();
            self.shared.registry.unregister(queued.id);
        }
        drop(state);

        self.shared.job_available.notify_all();
        self.shared.idle.notify_all();
    }

    /// Returns `true` once [`Worker::stop`] has been called.
    pub fn is_stopping(&self) -> bool {
        self.shared.state.lock().stopping
    }

    fn run<F>(name: String, shared: Arc<Shared<J>>, mut executor: F)
    where
        F: FnMut(J, &CancellationToken),
    {
        mark_worker_thread();

        loop {
            let queued = {
                let mut state = shared.state.lock();
                loop {
                    if state.stopping {
                        state.current = None;
                        shared.idle.notify_all();
                        debug!(worker = %name, "worker exiting");
                        return;
                    }
                    if let Some(queued) = state.jobs.pop_front() {
                        state.current = Some(queued.id);
                        break queued;
                    }
                    shared.job_available.wait(&mut state);
                }
            };

            let QueuedJob { id, job, token } = queued;
            if token.is_cancelled() {
                trace!(worker = %name, job = id, "skipping cancelled job");
            } else {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor(job, &token)));
                if outcome.is_err() {
                    error!(worker = %name, job = id, "job panicked, worker continues");
                }
            }

            shared.registry.unregister(id);
            let mut state = shared.state.lock();
            state.current = None;
            if state.jobs.is_empty() {
                shared.idle.notify_all();
            }
        }
    }
}

impl<J: Send + 'static> Drop for Worker<J> {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                // Dropped from one of its own jobs; the loop exits on its own.
                debug!(worker = %self.name, "worker dropped from its own thread, not joining");
                return;
            }
            if thread.join().is_err() {
                error!(worker = %self.name, "worker thread terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.name, "imgview-worker");
        assert_eq!(config.with_name("decode").name, "decode");
    }

    #[test]
    fn test_worker_executes_jobs_in_fifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();
        let worker = Worker::spawn(WorkerConfig::new("fifo"), move |n: u32, _token| {
            order_clone.lock().push(n);
        })
        .unwrap();

        for n in 0..10 {
            worker.submit(n).unwrap();
        }
        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_cancel_queued_job() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let executed = Arc::new(Mutex::new(Vec::new()));
        let executed_clone = executed.clone();

        let worker = Worker::spawn(WorkerConfig::new("cancel"), move |n: u32, _token| {
            if n == 0 {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            }
            executed_clone.lock().push(n);
        })
        .unwrap();

        worker.submit(0).unwrap();
        let second = worker.submit(1).unwrap();
        worker.submit(2).unwrap();

        assert!(worker.cancel(second.id()));
        assert!(second.token().is_cancelled());
        release_tx.send(()).unwrap();

        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(*executed.lock(), vec![0, 2]);
    }

    #[test]
    fn test_worker_cancel_running_job_sets_token() {
        let (started_tx, started_rx) = mpsc::channel();
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = observed.clone();

        let worker = Worker::spawn(WorkerConfig::new("running"), move |_: (), token| {
            let _ = started_tx.send(());
            let deadline = Instant::now() + Duration::from_secs(5);
            while !token.is_cancelled() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if token.is_cancelled() {
                observed_clone.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        let handle = worker.submit(()).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(worker.cancel(handle.id()));

        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = executed.clone();
        let worker = Worker::spawn(WorkerConfig::new("panics"), move |n: u32, _token| {
            if n == 0 {
                panic!("boom");
            }
            executed_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        worker.submit(0).unwrap();
        worker.submit(1).unwrap();
        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_rejects_jobs_after_stop() {
        let worker = Worker::spawn(WorkerConfig::default(), |_: u32, _token| {}).unwrap();
        worker.stop();
        assert!(worker.is_stopping());
        assert!(matches!(worker.submit(1), Err(WorkerError::Stopped)));
    }

    #[test]
    fn test_worker_thread_flag() {
        let (tx, rx) = mpsc::channel();
        let worker = Worker::spawn(WorkerConfig::new("flag"), move |_: (), _token| {
            let _ = tx.send(is_worker_thread());
        })
        .unwrap();

        worker.submit(()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!is_worker_thread());
    }

    #[test]
    fn test_worker_drop_finishes_in_flight_job() {
        let (started_tx, started_rx) = mpsc::channel();
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = executed.clone();
        {
            let worker = Worker::spawn(WorkerConfig::new("drop"), move |_: (), _token| {
                let _ = started_tx.send(());
                thread::sleep(Duration::from_millis(20));
                executed_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            worker.submit(()).unwrap();
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }
}
