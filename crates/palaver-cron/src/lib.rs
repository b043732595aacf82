// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cron-based task scheduler.
//!
//! A single recurring poll timer queries storage for due tasks. For each due
//! task the next run is computed and persisted BEFORE the handler is
//! invoked, so a slow or failing handler cannot cause the same due task to
//! be re-picked on the next tick. A handler failure is logged per task and
//! never stops the tick or future ticks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use palaver_core::types::{ScheduledTask, now_ms};
use palaver_core::{PalaverError, StorageAdapter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Handler invoked for each due task. Runs the same enqueue path as a live
/// message, with the task's creator as the caller identity.
pub type TaskHandler =
    Arc<dyn Fn(ScheduledTask) -> BoxFuture<'static, Result<(), PalaverError>> + Send + Sync>;

struct SchedulerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls storage for due cron tasks and dispatches them.
pub struct TaskScheduler {
    storage: Arc<dyn StorageAdapter>,
    poll_interval: Duration,
    handler: TaskHandler,
    runner: Mutex<Option<SchedulerHandle>>,
}

impl TaskScheduler {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        poll_interval: Duration,
        handler: TaskHandler,
    ) -> Self {
        Self {
            storage,
            poll_interval,
            handler,
            runner: Mutex::new(None),
        }
    }

    /// Starts the poll loop. A no-op if already started.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.runner.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let scheduler = Arc::clone(self);
        let poll_interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            // The loop task is the only place ticks run, so re-entrant ticks
            // cannot overlap.
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.tick_once().await,
                    _ = token.cancelled() => break,
                }
            }
            debug!("scheduler poll loop stopped");
        });
        *guard = Some(SchedulerHandle { cancel, handle });
        debug!(poll_interval_ms = poll_interval.as_millis() as u64, "scheduler started");
    }

    /// Cancels the poll loop and waits for it to wind down. Idempotent.
    pub async fn stop(&self) {
        let taken = self.runner.lock().unwrap().take();
        if let Some(scheduler) = taken {
            scheduler.cancel.cancel();
            let _ = scheduler.handle.await;
        }
    }

    /// True while the poll loop is running.
    pub fn is_running(&self) -> bool {
        self.runner.lock().unwrap().is_some()
    }

    /// Runs one poll tick: picks up due tasks, advances their next run, then
    /// invokes the handler for each.
    pub async fn tick_once(&self) {
        let now = now_ms();
        let due = match self.storage.due_tasks(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-task query failed");
                return;
            }
        };

        for task in due {
            // Advance next_run first so a slow or failing handler cannot
            // cause this task to be re-picked on the next tick.
            match next_occurrence(&task.cron, now) {
                Ok(next) => {
                    if let Err(e) = self.storage.set_task_next_run(task.id, next, now).await {
                        error!(task_id = task.id, error = %e, "failed to advance next run");
                        continue;
                    }
                }
                Err(e) => {
                    warn!(
                        task_id = task.id,
                        cron = task.cron.as_str(),
                        error = %e,
                        "unschedulable cron expression, deactivating task"
                    );
                    let _ = self.storage.set_task_active(task.id, false, now).await;
                    continue;
                }
            }

            if let Err(e) = (self.handler)(task.clone()).await {
                warn!(
                    task_id = task.id,
                    group_id = task.group_id.as_str(),
                    error = %e,
                    "scheduled task handler failed"
                );
            }
        }
    }
}

/// Computes the next occurrence of a cron expression strictly after
/// `after_ms`, as milliseconds since epoch.
pub fn next_occurrence(expr: &str, after_ms: i64) -> Result<i64, PalaverError> {
    let cron: croner::Cron = expr
        .parse()
        .map_err(|e| PalaverError::Config(format!("invalid cron \"{expr}\": {e}")))?;
    let after = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(after_ms)
        .ok_or_else(|| PalaverError::Internal("timestamp out of range".to_string()))?;
    let next = cron
        .find_next_occurrence(&after, false)
        .map_err(|e| PalaverError::Config(format!("no next occurrence for \"{expr}\": {e}")))?;
    Ok(next.timestamp_millis())
}
