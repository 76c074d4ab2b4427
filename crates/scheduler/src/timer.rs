//! Frame timer for animated images.
//!
//! Animation playback advances frames on its own thread so it never waits
//! behind decode jobs. The timer sleeps for the delay of the current frame
//! and then reports the index of the next one.

use crate::worker::mark_worker_thread;
use crate::WorkerError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Frame delays shorter than this are clamped up to it.
pub const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);

struct TimerState {
    stopped: bool,
}

/// Periodic frame ticker running on a dedicated thread.
pub struct FrameTimer {
    state: Arc<(Mutex<TimerState>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl FrameTimer {
    /// Start ticking through `delays`, wrapping around after the last frame.
    ///
    /// `on_tick` receives the index of the frame that should be shown next.
    ///
    /// # Errors
    /// Returns [`WorkerError::Spawn`] if the thread cannot be created and
    /// [`WorkerError::EmptyAnimation`] if there are no frames.
    pub fn start<F>(name: &str, delays: Vec<Duration>, mut on_tick: F) -> Result<Self, WorkerError>
    where
        F: FnMut(usize) + Send + 'static,
    {
        if delays.is_empty() {
            return Err(WorkerError::EmptyAnimation);
        }

        let state = Arc::new((Mutex::new(TimerState { stopped: false }), Condvar::new()));
        let thread_state = state.clone();
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                mark_worker_thread();
                let (lock, cvar) = &*thread_state;
                let mut frame = 0usize;
                loop {
                    let delay = delays[frame].max(MIN_FRAME_DELAY);
                    let deadline = Instant::now() + delay;
                    let mut guard = lock.lock();
                    while !guard.stopped {
                        if cvar.wait_until(&mut guard, deadline).timed_out() {
                            break;
                        }
                    }
                    if guard.stopped {
                        debug!(timer = %thread_name, "frame timer stopped");
                        return;
                    }
                    drop(guard);

                    frame = (frame + 1) % delays.len();
                    on_tick(frame);
                }
            })
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            state,
            thread: Some(thread),
        })
    }

    /// Returns `true` until [`FrameTimer::stop`] has been called.
    pub fn is_running(&self) -> bool {
        !self.state.0.lock().stopped
    }

    /// Stop ticking and join the timer thread.
    ///
    /// Must not be called from inside `on_tick`.
    pub fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.state;
            lock.lock().stopped = true;
            cvar.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("frame timer thread terminated abnormally");
            }
        }
    }
}

impl Drop for FrameTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_timer_wraps_around_frames() {
        let (tx, rx) = mpsc::channel();
        let mut timer = FrameTimer::start(
            "test-timer",
            vec![Duration::from_millis(1); 3],
            move |frame| {
                let _ = tx.send(frame);
            },
        )
        .unwrap();

        let frames: Vec<usize> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        timer.stop();

        assert_eq!(frames, vec![1, 2, 0, 1]);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_timer_rejects_empty_animation() {
        let result = FrameTimer::start("empty", Vec::new(), |_| {});
        assert!(matches!(result, Err(WorkerError::EmptyAnimation)));
    }

    #[test]
    fn test_timer_stop_interrupts_long_delay() {
        let mut timer =
            FrameTimer::start("slow", vec![Duration::from_secs(60)], |_| {}).unwrap();
        let start = Instant::now();
        timer.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
