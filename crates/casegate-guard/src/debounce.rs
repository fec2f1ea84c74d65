//! Trailing debounce.
//!
//! Coalesces a burst of triggers for the same key into one invocation that
//! runs `delay` after the last trigger. A re-trigger before the timer fires
//! cancels the pending invocation and restarts the timer.
//!
//! Only the timer is cancellable. Once it fires, the work is detached onto
//! its own task and always runs to completion; a later trigger or
//! [`Debouncer::cancel`] cannot abort work that has already started.
//!
//! Must be used from within a tokio runtime.

use std::{collections::HashMap, future::Future, hash::Hash, sync::Mutex, time::Duration};

use casegate_types::{CasegateError, Result};
use tokio::task::JoinHandle;

/// Per-key trailing debouncer.
#[derive(Debug)]
pub struct Debouncer<K> {
    delay: Duration,
    /// `key → timer task` for invocations that have not fired yet.
    pending: Mutex<HashMap<K, JoinHandle<()>>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Create a debouncer with the given quiet period.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The quiet period.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<K, JoinHandle<()>>>> {
        self.pending
            .lock()
            .map_err(|_| CasegateError::Internal("debouncer poisoned".to_string()))
    }

    /// Schedule `work` for `key`, replacing any invocation still waiting.
    pub fn trigger<F>(&self, key: K, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(work);
        });

        let mut pending = self.lock()?;
        pending.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = pending.insert(key, timer) {
            previous.abort();
        }
        Ok(())
    }

    /// Cancel the pending invocation for `key`. Returns whether a timer was
    /// still waiting.
    pub fn cancel(&self, key: &K) -> Result<bool> {
        let mut pending = self.lock()?;
        Ok(pending.remove(key).is_some_and(|handle| {
            let waiting = !handle.is_finished();
            handle.abort();
            waiting
        }))
    }

    /// Cancel every pending invocation (owner teardown).
    pub fn cancel_all(&self) -> Result<()> {
        let mut pending = self.lock()?;
        for (_, handle) in pending.drain() {
            handle.abort();
        }
        Ok(())
    }

    /// Number of timers that have not fired yet.
    pub fn pending(&self) -> Result<usize> {
        let pending = self.lock()?;
        Ok(pending.values().filter(|h| !h.is_finished()).count())
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        if let Ok(pending) = self.pending.get_mut() {
            for (_, handle) in pending.drain() {
                handle.abort();
            }
        }
    }
}
