//! Single-shot, re-armable retry timers.
//!
//! A timer holds at most one pending callback. Disarming (explicitly or by
//! dropping the timer) guarantees the callback is never invoked afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Callback run when a retry timer fires.
pub type DoRetry = Box<dyn FnOnce() + Send + 'static>;

/// Timer used by the retry state to schedule the next attempt.
pub trait RetryTimer: Send {
    /// Schedule `callback` after `delay`, replacing any pending callback.
    fn arm(&mut self, delay: Duration, callback: DoRetry);

    /// Cancel the pending callback, if any.
    fn disarm(&mut self);

    fn is_armed(&self) -> bool;
}

type Slot = Arc<Mutex<Option<DoRetry>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timer backed by a task on a tokio runtime.
///
/// The callback lives in a slot shared with the task. Firing and disarming
/// both take the slot under its lock, so only one of them wins. The lock is
/// released before the callback runs, so a callback may disarm or re-arm
/// this timer; a disarm after the callback was taken is a no-op.
pub struct TokioRetryTimer {
    handle: Handle,
    pending: Option<(Slot, JoinHandle<()>)>,
}

impl TokioRetryTimer {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            pending: None,
        }
    }

    /// Timer bound to the runtime of the calling task, if there is one.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl RetryTimer for TokioRetryTimer {
    fn arm(&mut self, delay: Duration, callback: DoRetry) {
        self.disarm();
        let slot: Slot = Arc::new(Mutex::new(Some(callback)));
        let task_slot = Arc::clone(&slot);
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let callback = lock(&task_slot).take();
            if let Some(callback) = callback {
                callback();
            }
        });
        self.pending = Some((slot, task));
    }

    fn disarm(&mut self) {
        if let Some((slot, task)) = self.pending.take() {
            lock(&slot).take();
            task.abort();
        }
    }

    fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|(slot, _)| lock(slot).is_some())
    }
}

impl Drop for TokioRetryTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl std::fmt::Debug for TokioRetryTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioRetryTimer")
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[derive(Default)]
struct ManualInner {
    callback: Option<DoRetry>,
    armed: Vec<Duration>,
}

/// Timer fired explicitly by its owner, for event loops that keep their own
/// clock. Clones share state, so one clone can be handed to a retry state
/// while another drives it.
#[derive(Clone, Default)]
pub struct ManualTimer {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the pending callback. Returns false if nothing was armed.
    pub fn fire(&self) -> bool {
        // Take the callback first so it may re-arm this timer.
        let callback = lock(&self.inner).callback.take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Every delay this timer has been armed with, oldest first.
    pub fn armed_delays(&self) -> Vec<Duration> {
        lock(&self.inner).armed.clone()
    }

    pub fn last_delay(&self) -> Option<Duration> {
        lock(&self.inner).armed.last().copied()
    }
}

impl RetryTimer for ManualTimer {
    fn arm(&mut self, delay: Duration, callback: DoRetry) {
        let mut inner = lock(&self.inner);
        inner.callback = Some(callback);
        inner.armed.push(delay);
    }

    fn disarm(&mut self) {
        lock(&self.inner).callback = None;
    }

    fn is_armed(&self) -> bool {
        lock(&self.inner).callback.is_some()
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("ManualTimer")
            .field("armed", &inner.callback.is_some())
            .field("armed_delays", &inner.armed)
            .finish()
    }
}
