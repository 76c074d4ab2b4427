//! Main scheduling context.
//!
//! Worker threads never touch shared application state directly. They post
//! closures to a [`MainContext`], and the owner of that context runs them in
//! posting order by pumping it, usually from its event loop. All state
//! changes and event emissions therefore happen on whichever thread pumps
//! the context.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Inner {
    tasks: Mutex<VecDeque<Task>>,
    posted: Condvar,
}

/// Cloneable handle to a FIFO queue of deferred tasks.
///
/// # Example
///
/// ```
/// use imgview_scheduler::MainContext;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let context = MainContext::new();
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = ran.clone();
/// context.post(move || flag.store(true, Ordering::SeqCst));
///
/// assert!(!ran.load(Ordering::SeqCst));
/// assert_eq!(context.process_pending(), 1);
/// assert!(ran.load(Ordering::SeqCst));
/// ```
#[derive(Clone, Default)]
pub struct MainContext {
    inner: Arc<Inner>,
}

impl MainContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task. Safe to call from any thread, including from a task.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.tasks.lock().push_back(Box::new(task));
        self.inner.posted.notify_all();
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Run queued tasks until the queue is empty.
    ///
    /// Tasks posted while processing also run before this returns. The lock
    /// is released while a task runs, so tasks may post further work.
    /// Returns the number of tasks executed.
    pub fn process_pending(&self) -> usize {
        let mut executed = 0;
        loop {
            let task = self.inner.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    executed += 1;
                }
                None => break,
            }
        }
        if executed > 0 {
            trace!(executed, "main context tasks processed");
        }
        executed
    }

    /// Pump the context until `done` returns `true` or the timeout elapses.
    ///
    /// Sleeps on a condition variable between batches instead of spinning.
    /// Returns the final value of `done`.
    pub fn process_until<F>(&self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if done() {
                return true;
            }

            let mut tasks = self.inner.tasks.lock();
            if tasks.is_empty() {
                if Instant::now() >= deadline {
                    drop(tasks);
                    return done();
                }
                let _ = self.inner.posted.wait_until(&mut tasks, deadline);
            }
        }
    }
}

impl fmt::Debug for MainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainContext")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_tasks_run_in_posting_order() {
        let context = MainContext::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..5 {
            let order = order.clone();
            context.post(move || order.lock().push(n));
        }

        assert_eq!(context.pending(), 5);
        assert_eq!(context.process_pending(), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(context.pending(), 0);
    }

    #[test]
    fn test_task_can_post_follow_up() {
        let context = MainContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let inner_context = context.clone();
        let inner_count = count.clone();
        context.post(move || {
            inner_count.fetch_add(1, Ordering::SeqCst);
            let again = inner_count.clone();
            inner_context.post(move || {
                again.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(context.process_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_process_until_waits_for_other_thread() {
        let context = MainContext::new();
        let flag = Arc::new(AtomicUsize::new(0));

        let remote = context.clone();
        let remote_flag = flag.clone();
        let poster = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.post(move || remote_flag.store(1, Ordering::SeqCst));
        });

        let done = context.process_until(
            || flag.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5),
        );
        poster.join().unwrap();
        assert!(done);
    }

    #[test]
    fn test_process_until_times_out() {
        let context = MainContext::new();
        let start = Instant::now();
        assert!(!context.process_until(|| false, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
