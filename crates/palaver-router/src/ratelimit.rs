// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sliding-window admission control per (conversation, caller).
//!
//! Blocked calls still persist their pruned bucket so memory does not grow
//! unbounded from retries; a background sweep removes buckets with no valid
//! timestamps left.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use palaver_core::types::now_ms;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct SweeperHandle {
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Sliding-window rate limiter keyed by (conversation, caller).
pub struct RateLimiter {
    window_ms: i64,
    default_limit: usize,
    buckets: Mutex<HashMap<(String, String), Vec<i64>>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl RateLimiter {
    pub fn new(window: Duration, default_limit: usize) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
            default_limit,
            buckets: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Admits or blocks one call at `now_ms`.
    ///
    /// Prunes timestamps older than the window start, then compares the
    /// remaining count against the effective limit (`override_limit` when
    /// supplied, else the global default). Blocked calls do not record a
    /// timestamp; admitted calls do.
    pub fn is_allowed(
        &self,
        group_id: &str,
        caller_id: &str,
        override_limit: Option<usize>,
        now_ms: i64,
    ) -> bool {
        let limit = override_limit.unwrap_or(self.default_limit);
        let window_start = now_ms - self.window_ms;

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry((group_id.to_string(), caller_id.to_string()))
            .or_default();
        bucket.retain(|&ts| ts >= window_start);

        if bucket.len() >= limit {
            return false;
        }
        bucket.push(now_ms);
        true
    }

    /// Drops buckets with no timestamp inside the window. Returns how many
    /// buckets were removed.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let window_start = now_ms - self.window_ms;
        let mut buckets = self.buckets.lock().unwrap();
        let before = buckets.len();
        buckets.retain(|_, timestamps| {
            timestamps.retain(|&ts| ts >= window_start);
            !timestamps.is_empty()
        });
        before - buckets.len()
    }

    /// Number of tracked buckets (introspection and tests).
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }

    /// Starts the background sweep task. Idempotent: a second start while
    /// one is running is a no-op.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.sweeper.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let limiter = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate first tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.sweep(now_ms());
                        if removed > 0 {
                            debug!(removed, "rate limit buckets swept");
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
        *guard = Some(SweeperHandle {
            cancel,
            _handle: handle,
        });
    }

    /// Stops the background sweep task. Idempotent.
    pub fn stop_sweeper(&self) {
        if let Some(sweeper) = self.sweeper.lock().unwrap().take() {
            sweeper.cancel.cancel();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
