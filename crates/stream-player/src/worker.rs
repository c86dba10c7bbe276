//! Decode worker thread handle with cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::decode::DecodeJob;

/// Handle to one session's decode thread.
pub struct DecodeWorker {
    cancel: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    /// Spawn `job` on a named thread.
    pub fn spawn(job: DecodeJob) -> Result<Self> {
        let cancel = job.cancel.clone();
        let complete = job.complete.clone();
        let name = format!("decode-{}", job.session);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || job.run())
            .context("spawn decode thread")?;
        Ok(Self {
            cancel,
            complete,
            handle: Some(handle),
        })
    }

    /// Thread still running.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// The stream was decoded to its natural end.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Raise the cancel flag and wait up to `timeout` for the thread to exit.
    ///
    /// A thread still running after the deadline is detached; its session id is
    /// already stale, so it can only touch its own queue.
    pub fn stop(mut self, timeout: Duration) {
        self.cancel.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "decode thread did not exit in time; detaching"
                );
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        if handle.join().is_err() {
            tracing::warn!("decode thread panicked");
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
    }
}
