//! Sliding-window rate limiter.
//!
//! Tracks the timestamps of recent admissions per key. On each check,
//! timestamps that have aged out of the window are pruned; if fewer than
//! `max_requests` remain the request is admitted and recorded, otherwise it
//! is denied and nothing is recorded.
//!
//! This is a rolling counter, not a token bucket: a full window's worth of
//! requests may arrive in one burst, and admission resumes only as the
//! oldest timestamps age out.

use std::collections::{HashMap, VecDeque};

/// Per-key request counter over a trailing window.
#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    /// `key → admission timestamps (ms)`, oldest first.
    windows: HashMap<String, VecDeque<u64>>,
}

/// Whether `ts` is still inside a window ending at `now_ms`.
fn in_window(ts: u64, window_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(ts) < window_ms
}

impl SlidingWindowLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
        }
    }

    /// Admit or deny one request for `key` at `now_ms`.
    ///
    /// A request issued `window_ms` or more after an earlier one no longer
    /// counts that earlier one.
    pub fn is_allowed(&mut self, key: &str, max_requests: usize, window_ms: u64, now_ms: u64) -> bool {
        let window = self.windows.entry(key.to_string()).or_default();

        while let Some(&front) = window.front() {
            if in_window(front, window_ms, now_ms) {
                break;
            }
            window.pop_front();
        }

        if window.len() >= max_requests {
            tracing::debug!(
                key,
                count = window.len(),
                max_requests,
                window_ms,
                "Sliding window full"
            );
            return false;
        }

        window.push_back(now_ms);
        true
    }

    /// Number of admissions for `key` still inside the window. Read-only.
    #[must_use]
    pub fn recent_count(&self, key: &str, window_ms: u64, now_ms: u64) -> usize {
        self.windows.get(key).map_or(0, |window| {
            window
                .iter()
                .filter(|&&ts| in_window(ts, window_ms, now_ms))
                .count()
        })
    }

    /// Admissions left for `key` before the limiter denies. Read-only.
    #[must_use]
    pub fn remaining_requests(
        &self,
        key: &str,
        max_requests: usize,
        window_ms: u64,
        now_ms: u64,
    ) -> usize {
        max_requests.saturating_sub(self.recent_count(key, window_ms, now_ms))
    }

    /// Instant at which the oldest admission ages out, or `None` when the
    /// key has no admissions in the window. Read-only.
    #[must_use]
    pub fn reset_time(&self, key: &str, window_ms: u64, now_ms: u64) -> Option<u64> {
        self.windows.get(key).and_then(|window| {
            window
                .iter()
                .copied()
                .find(|&ts| in_window(ts, window_ms, now_ms))
                .map(|oldest| oldest.saturating_add(window_ms))
        })
    }

    /// Milliseconds until the next admission frees up (0 if one is free now).
    #[must_use]
    pub fn retry_after_ms(&self, key: &str, max_requests: usize, window_ms: u64, now_ms: u64) -> u64 {
        if self.remaining_requests(key, max_requests, window_ms, now_ms) > 0 {
            return 0;
        }
        self.reset_time(key, window_ms, now_ms)
            .map_or(0, |reset| reset.saturating_sub(now_ms))
    }

    /// Drop keys with no admissions left in the window. Returns how many
    /// keys were removed.
    pub fn sweep(&mut self, window_ms: u64, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.retain(|&ts| in_window(ts, window_ms, now_ms));
            !window.is_empty()
        });
        before - self.windows.len()
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
