// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation serialized job queue with a global concurrency ceiling.
//!
//! A job for conversation C starts only when the global running count is
//! below the configured ceiling AND no other job for C is running:
//! per-conversation execution is strictly serial FIFO, while different
//! conversations run concurrently up to the ceiling. On any completion the
//! queue first retries the same conversation's head-of-line job, then sweeps
//! every other conversation with pending work to fill freed capacity.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use palaver_core::{PalaverError, SandboxFailureKind};
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace};

type JobThunk<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, PalaverError>> + Send>;

struct PendingJob<T> {
    thunk: JobThunk<T>,
    tx: oneshot::Sender<Result<T, PalaverError>>,
}

struct State<T> {
    pending: HashMap<String, VecDeque<PendingJob<T>>>,
    running: HashSet<String>,
    running_count: usize,
}

struct Inner<T> {
    limit: usize,
    state: Mutex<State<T>>,
    idle: Notify,
}

/// Handle to an enqueued job; resolves with the job's own result.
///
/// Jobs dropped by [`GroupQueue::cancel_pending`] or
/// [`GroupQueue::cancel_all`] resolve to a [`PalaverError::Sandbox`] error of
/// kind [`SandboxFailureKind::Aborted`].
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, PalaverError>>,
}

impl<T> JobHandle<T> {
    /// Waits for the job to finish (or be cancelled) and returns its result.
    pub async fn wait(self) -> Result<T, PalaverError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(PalaverError::Internal(
                "job dropped without reporting a result".to_string(),
            )),
        }
    }
}

/// Per-conversation FIFO queue with a global running ceiling.
pub struct GroupQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for GroupQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> GroupQueue<T> {
    /// Creates a queue admitting at most `limit` jobs across all conversations.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                state: Mutex::new(State {
                    pending: HashMap::new(),
                    running: HashSet::new(),
                    running_count: 0,
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Enqueues a job for the conversation and returns its handle.
    ///
    /// The job is a thunk: nothing runs until the queue admits it.
    pub fn enqueue<F, Fut>(&self, group_id: &str, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, PalaverError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().unwrap();
            state
                .pending
                .entry(group_id.to_string())
                .or_default()
                .push_back(PendingJob {
                    thunk: Box::new(move || Box::pin(job())),
                    tx,
                });
        }
        trace!(group_id, "job enqueued");
        Inner::pump(&self.inner, Some(group_id));
        JobHandle { rx }
    }

    /// Drops all not-yet-started jobs for the conversation. Returns the
    /// count dropped. A running job is not touched.
    pub fn cancel_pending(&self, group_id: &str) -> usize {
        let drained = self.inner.state.lock().unwrap().pending.remove(group_id);
        let Some(jobs) = drained else { return 0 };
        let count = jobs.len();
        for job in jobs {
            let _ = job.tx.send(Err(cancelled_error()));
        }
        if count > 0 {
            debug!(group_id, count, "pending jobs cancelled");
        }
        count
    }

    /// Drops every pending job across all conversations (shutdown path).
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, VecDeque<PendingJob<T>>)> = {
            let mut state = self.inner.state.lock().unwrap();
            state.pending.drain().collect()
        };
        let mut count = 0;
        for (_, jobs) in drained {
            count += jobs.len();
            for job in jobs {
                let _ = job.tx.send(Err(cancelled_error()));
            }
        }
        if count > 0 {
            debug!(count, "all pending jobs cancelled");
        }
        count
    }

    /// True while a job for the conversation is running.
    pub fn is_active(&self, group_id: &str) -> bool {
        self.inner.state.lock().unwrap().running.contains(group_id)
    }

    /// Number of currently running jobs across all conversations.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().unwrap().running_count
    }

    /// Number of not-yet-started jobs across all conversations.
    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .pending
            .values()
            .map(VecDeque::len)
            .sum()
    }

    /// Resolves true once the global running count reaches zero, or false
    /// when the timeout elapses first. Used to bound shutdown drain time.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking, so a completion between the check
            // and the await cannot be missed.
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().unwrap().running_count == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inner.state.lock().unwrap().running_count == 0;
            }
        }
    }
}

impl<T: Send + 'static> Inner<T> {
    /// Starts every admissible job: the preferred conversation's head first,
    /// then a sweep over all other conversations with pending work.
    fn pump(inner: &Arc<Self>, preferred: Option<&str>) {
        let mut to_start: Vec<(String, PendingJob<T>)> = Vec::new();
        {
            let mut state = inner.state.lock().unwrap();
            let mut order: Vec<String> = Vec::new();
            if let Some(group) = preferred {
                order.push(group.to_string());
            }
            order.extend(
                state
                    .pending
                    .keys()
                    .filter(|g| Some(g.as_str()) != preferred)
                    .cloned(),
            );

            for group in order {
                if state.running_count >= inner.limit {
                    break;
                }
                if state.running.contains(&group) {
                    continue;
                }
                let Some(queue) = state.pending.get_mut(&group) else {
                    continue;
                };
                let Some(job) = queue.pop_front() else {
                    continue;
                };
                if queue.is_empty() {
                    state.pending.remove(&group);
                }
                state.running.insert(group.clone());
                state.running_count += 1;
                to_start.push((group, job));
            }
        }

        for (group, job) in to_start {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                trace!(group_id = group.as_str(), "job started");
                let result = (job.thunk)().await;
                let _ = job.tx.send(result);
                Self::complete(&inner, &group);
            });
        }
    }

    fn complete(inner: &Arc<Self>, group: &str) {
        {
            let mut state = inner.state.lock().unwrap();
            state.running.remove(group);
            state.running_count -= 1;
            if state.running_count == 0 {
                inner.idle.notify_waiters();
            }
        }
        trace!(group_id = group, "job completed");
        Self::pump(inner, Some(group));
    }
}

fn cancelled_error() -> PalaverError {
    PalaverError::Sandbox {
        kind: SandboxFailureKind::Aborted,
        detail: "cancelled before start".to_string(),
    }
}
