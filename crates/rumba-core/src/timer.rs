//! Single-shot, replaceable delay.
//!
//! One `Timer` exists per purpose (menu hide, confirmation timeout).  Starting
//! it again aborts the pending run, so at most one callback per purpose is
//! ever outstanding.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Timer {
    purpose: &'static str,
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub fn new(purpose: &'static str) -> Self {
        Self {
            purpose,
            slot: Mutex::new(None),
        }
    }

    /// Run `task` after `delay`, cancelling whatever was scheduled before.
    pub fn start<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let prev = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(prev) = prev {
            prev.abort();
        }
        debug!("{} timer started ({:?})", self.purpose, delay);
    }

    /// Abort the pending run.  Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        let prev = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        match prev {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                debug!("{} timer cancelled", self.purpose);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(handle) = self.slot.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
