// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level orchestrator runtime.
//!
//! The [`Orchestrator`] is the single owner of all component state: it
//! receives raw inbound messages, routes them, enqueues accepted work onto
//! the group queue, drives the sandbox executor, persists conversation
//! state, and owns the ordered shutdown sequence. One dispatch loop consumes
//! an inbound mpsc channel; per-conversation serialization is upheld by the
//! queue underneath it.

pub mod management;
pub mod shutdown;

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use palaver_config::model::PalaverConfig;
use palaver_core::traits::storage::NewMessage;
use palaver_core::types::{HistoryEntry, now_ms};
use palaver_core::{
    ChannelAdapter, ChatCommand, HealthStatus, InboundChat, MessageRole, PalaverError,
    RouteOutcome, SandboxExecutor, SandboxFailureKind, SandboxJob, StorageAdapter,
};
use palaver_cron::{TaskHandler, TaskScheduler};
use palaver_queue::GroupQueue;
use palaver_router::{
    MessageRouter, PermissionResolver, RateLimiter, TriggerConfig, TriggerMode,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source tag carried by scheduler-originated inputs; they are never
/// captured as ambient context.
pub const SOURCE_SCHEDULER: &str = "scheduler";

/// A registered shutdown hook, run in registration order during teardown.
pub type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), PalaverError>> + Send>;

/// What the orchestrator hands back to the transport for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteReply {
    /// Not addressed to the assistant; nothing to send.
    Ignored,
    /// Text to post into the conversation.
    Replied { text: String },
    /// Refused; the reason is user-facing text.
    Denied { reason: String },
}

/// Health and introspection snapshot.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub queue_active: usize,
    pub queue_pending: usize,
    pub sandbox_active: usize,
    /// (adapter name, healthy) per registered channel, sorted by name.
    pub channels: Vec<(String, bool)>,
    pub uptime_secs: u64,
}

/// The top-level runtime façade. Constructed once per process; all
/// component state lives here, never in globals.
pub struct Orchestrator {
    pub(crate) config: PalaverConfig,
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) permissions: Arc<PermissionResolver>,
    pub(crate) ratelimit: Arc<RateLimiter>,
    pub(crate) router: MessageRouter,
    pub(crate) queue: GroupQueue<String>,
    pub(crate) sandbox: Arc<dyn SandboxExecutor>,
    scheduler: OnceLock<Arc<TaskScheduler>>,
    channels: Mutex<HashMap<String, Arc<dyn ChannelAdapter>>>,
    hooks: tokio::sync::Mutex<Vec<(String, ShutdownHook)>>,
    shutting_down: AtomicBool,
    started_at: Instant,
}

impl Orchestrator {
    /// Builds the orchestrator and its leaf components from configuration.
    pub fn new(
        config: PalaverConfig,
        storage: Arc<dyn StorageAdapter>,
        sandbox: Arc<dyn SandboxExecutor>,
    ) -> Arc<Self> {
        let permissions = Arc::new(PermissionResolver::new(
            storage.clone(),
            config.permissions.seed_admins.clone(),
            config.permissions.system_callers.clone(),
        ));
        let ratelimit = Arc::new(RateLimiter::new(
            Duration::from_secs(config.ratelimit.window_secs),
            config.ratelimit.max_per_window,
        ));
        let defaults = TriggerConfig {
            patterns: config.trigger.patterns.clone(),
            mode: TriggerMode::from_str(&config.trigger.mode).unwrap_or(TriggerMode::Mention),
            case_sensitive: config.trigger.case_sensitive,
        };
        let router = MessageRouter::new(
            storage.clone(),
            permissions.clone(),
            ratelimit.clone(),
            defaults,
        );
        let queue = GroupQueue::new(config.orchestrator.max_concurrent_jobs);

        Arc::new(Self {
            config,
            storage,
            permissions,
            ratelimit,
            router,
            queue,
            sandbox,
            scheduler: OnceLock::new(),
            channels: Mutex::new(HashMap::new()),
            hooks: tokio::sync::Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    /// Wires the task scheduler to this orchestrator. Call once after
    /// construction, before [`Self::start_background`].
    pub fn init_scheduler(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handler: TaskHandler = Arc::new(move |task| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(orchestrator) = weak.upgrade() else {
                    return Err(PalaverError::Internal(
                        "orchestrator dropped before task ran".to_string(),
                    ));
                };
                orchestrator.execute_scheduled(task).await
            })
        });
        let scheduler = Arc::new(TaskScheduler::new(
            self.storage.clone(),
            Duration::from_secs(self.config.scheduler.poll_interval_secs),
            handler,
        ));
        let _ = self.scheduler.set(scheduler);
    }

    /// Starts the background tasks: the scheduler poll loop and the rate
    /// limiter sweeper. Idempotent.
    pub fn start_background(self: &Arc<Self>) {
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.start();
        }
        self.ratelimit
            .start_sweeper(Duration::from_secs(self.config.ratelimit.sweep_interval_secs));
    }

    /// Registers an outbound channel adapter under its platform name (the
    /// prefix of platform-qualified conversation ids).
    pub fn register_channel(&self, name: &str, adapter: Arc<dyn ChannelAdapter>) {
        self.channels
            .lock()
            .unwrap()
            .insert(name.to_string(), adapter);
        info!(channel = name, "channel registered");
    }

    /// Registers an external shutdown hook; hooks run in registration order
    /// during teardown, with individual failures swallowed.
    pub async fn register_shutdown_hook(&self, name: &str, hook: ShutdownHook) {
        self.hooks.lock().await.push((name.to_string(), hook));
    }

    /// Handles one raw inbound message end to end.
    pub async fn handle_raw_input(
        &self,
        inbound: InboundChat,
    ) -> Result<RouteReply, PalaverError> {
        let now = now_ms();
        self.storage
            .ensure_group(&inbound.group_id, None, now)
            .await?;

        let outcome = self.router.route(&inbound).await?;
        match outcome {
            RouteOutcome::Ignore | RouteOutcome::Denied { .. } => {
                // Untriggered (or refused) chatter in a multi-party live
                // channel is kept as ambient context for future turns.
                if !inbound.is_direct && inbound.source != SOURCE_SCHEDULER {
                    self.capture_ambient(&inbound, now).await?;
                }
                Ok(match outcome {
                    RouteOutcome::Denied { reason } => RouteReply::Denied { reason },
                    _ => RouteReply::Ignored,
                })
            }
            RouteOutcome::Command { command } => {
                let text = self.execute_command(&inbound.group_id, command).await?;
                Ok(RouteReply::Replied { text })
            }
            RouteOutcome::Assistant { prompt } => {
                self.run_assistant_turn(&inbound, prompt).await
            }
        }
    }

    /// Executes a reserved command synchronously and returns its reply text.
    pub async fn execute_command(
        &self,
        group_id: &str,
        command: ChatCommand,
    ) -> Result<String, PalaverError> {
        match command {
            ChatCommand::Stop => {
                let aborted = self.sandbox.abort(group_id).await;
                let dropped = self.queue.cancel_pending(group_id);
                if aborted || dropped > 0 {
                    info!(group_id, aborted, dropped, "run stopped by command");
                    Ok("Stopped.".to_string())
                } else {
                    Ok("No active run.".to_string())
                }
            }
            ChatCommand::Compact => match self.storage.latest_message_id(group_id).await? {
                Some(latest) => {
                    self.storage
                        .set_context_floor(group_id, latest + 1, now_ms())
                        .await?;
                    debug!(group_id, floor = latest + 1, "session boundary advanced");
                    Ok("Context compacted.".to_string())
                }
                None => Ok("Nothing to compact.".to_string()),
            },
        }
    }

    /// Runs one scheduled task through the same enqueue path as a live
    /// message, posting the result to the conversation unless silenced.
    pub async fn execute_scheduled(
        &self,
        task: palaver_core::types::ScheduledTask,
    ) -> Result<(), PalaverError> {
        let inbound = InboundChat {
            group_id: task.group_id.clone(),
            raw_text: task.prompt.clone(),
            caller_id: task.created_by.clone(),
            author_name: None,
            // The trigger is advisory for scheduler input: the prompt was
            // explicitly addressed at creation time.
            is_direct: true,
            source: SOURCE_SCHEDULER.to_string(),
            attachments: vec![],
        };

        match self.handle_raw_input(inbound).await? {
            RouteReply::Replied { text } => {
                if task.silent {
                    debug!(task_id = task.id, "silent task finished");
                } else {
                    self.post_to_channel(&task.group_id, &text).await;
                }
                Ok(())
            }
            RouteReply::Denied { reason } => {
                warn!(task_id = task.id, reason = reason.as_str(), "scheduled task denied");
                Ok(())
            }
            RouteReply::Ignored => Ok(()),
        }
    }

    /// Runs the dispatch loop until the inbound channel closes or the
    /// cancellation token fires, then performs the shutdown sequence.
    pub async fn run(
        self: &Arc<Self>,
        mut inbound_rx: mpsc::Receiver<InboundChat>,
        cancel: CancellationToken,
    ) {
        info!("orchestrator dispatch loop running");
        loop {
            tokio::select! {
                maybe = inbound_rx.recv() => {
                    match maybe {
                        Some(inbound) => {
                            let orchestrator = Arc::clone(self);
                            tokio::spawn(async move {
                                orchestrator.dispatch_one(inbound).await;
                            });
                        }
                        None => {
                            info!("inbound channel closed");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, stopping dispatch loop");
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    /// Handles one message and posts the outcome back to its channel.
    async fn dispatch_one(&self, inbound: InboundChat) {
        let group_id = inbound.group_id.clone();
        match self.handle_raw_input(inbound).await {
            Ok(RouteReply::Replied { text }) => self.post_to_channel(&group_id, &text).await,
            Ok(RouteReply::Denied { reason }) => self.post_to_channel(&group_id, &reason).await,
            Ok(RouteReply::Ignored) => {}
            Err(e) => {
                error!(group_id = group_id.as_str(), error = %e, "inbound handling failed");
                self.post_to_channel(&group_id, "Something went wrong handling that message.")
                    .await;
            }
        }
    }

    /// The ordered, idempotent shutdown sequence. A second invocation (or
    /// one after completion) is a no-op; exceeding the configured wall-clock
    /// ceiling forces process termination.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return;
        }
        info!("shutdown sequence starting");
        let ceiling = Duration::from_secs(self.config.orchestrator.shutdown_force_secs);
        if tokio::time::timeout(ceiling, self.shutdown_sequence()).await.is_err() {
            error!("shutdown ceiling exceeded, forcing process exit");
            std::process::exit(1);
        }
        info!("shutdown sequence complete");
    }

    async fn shutdown_sequence(&self) {
        // 1. Stop the scheduler so no new work arrives from cron.
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.stop().await;
            info!("scheduler stopped");
        }
        self.ratelimit.stop_sweeper();

        // 2. Cancel all pending queue work.
        let dropped = self.queue.cancel_all();
        info!(dropped, "pending queue work cancelled");

        // 3. Force-terminate running sandbox jobs.
        self.sandbox.kill_all().await;

        // 4. Bounded drain of active jobs.
        let drain = Duration::from_secs(self.config.orchestrator.shutdown_drain_secs);
        if self.queue.wait_for_idle(drain).await {
            info!("active jobs drained");
        } else {
            warn!(drain_secs = drain.as_secs(), "drain window elapsed with jobs still active");
        }

        // 5. External hooks in registration order, failures swallowed so
        // later hooks still run.
        let hooks: Vec<(String, ShutdownHook)> = {
            let mut guard = self.hooks.lock().await;
            guard.drain(..).collect()
        };
        for (name, hook) in hooks {
            match hook().await {
                Ok(()) => debug!(hook = name.as_str(), "shutdown hook finished"),
                Err(e) => warn!(hook = name.as_str(), error = %e, "shutdown hook failed"),
            }
        }

        // 6. Close persistent storage last.
        if let Err(e) = self.storage.close().await {
            warn!(error = %e, "storage close failed");
        }
    }

    /// Current health and introspection snapshot.
    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let channels: Vec<(String, Arc<dyn ChannelAdapter>)> = {
            let guard = self.channels.lock().unwrap();
            let mut entries: Vec<_> =
                guard.iter().map(|(n, a)| (n.clone(), a.clone())).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };
        let mut status = Vec::new();
        for (name, adapter) in channels {
            let healthy = matches!(adapter.health_check().await, Ok(HealthStatus::Healthy));
            status.push((name, healthy));
        }
        HealthSnapshot {
            queue_active: self.queue.active_count(),
            queue_pending: self.queue.pending_count(),
            sandbox_active: self.sandbox.active_count(),
            channels: status,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    // --- internals ---

    async fn capture_ambient(
        &self,
        inbound: &InboundChat,
        now: i64,
    ) -> Result<(), PalaverError> {
        let content = match &inbound.author_name {
            Some(author) => format!("{author}: {}", inbound.raw_text),
            None => inbound.raw_text.clone(),
        };
        self.storage
            .append_message(
                &NewMessage {
                    group_id: inbound.group_id.clone(),
                    role: MessageRole::Ambient,
                    content,
                    attachments: inbound.attachments.clone(),
                },
                now,
            )
            .await?;
        Ok(())
    }

    async fn run_assistant_turn(
        &self,
        inbound: &InboundChat,
        prompt: String,
    ) -> Result<RouteReply, PalaverError> {
        let now = now_ms();

        // History is collected before the prompt row is written: the job
        // carries prior context and the current prompt separately.
        let history = self
            .storage
            .history_since_floor(&inbound.group_id, self.config.orchestrator.history_limit)
            .await?;
        self.storage
            .append_message(
                &NewMessage {
                    group_id: inbound.group_id.clone(),
                    role: MessageRole::User,
                    content: prompt.clone(),
                    attachments: inbound.attachments.clone(),
                },
                now,
            )
            .await?;

        self.notify_typing(&inbound.group_id).await;

        let job = SandboxJob {
            group_id: inbound.group_id.clone(),
            prompt,
            caller_id: inbound.caller_id.clone(),
            history: history
                .iter()
                .map(|m| HistoryEntry {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
            attachments: inbound.attachments.clone(),
            workspace: self.workspace_for(&inbound.group_id),
        };

        let sandbox = Arc::clone(&self.sandbox);
        let handle = self
            .queue
            .enqueue(&inbound.group_id, move || async move {
                sandbox.reply(job).await
            });

        match handle.wait().await {
            Ok(reply) => {
                self.storage
                    .append_message(
                        &NewMessage {
                            group_id: inbound.group_id.clone(),
                            role: MessageRole::Assistant,
                            content: reply.clone(),
                            attachments: vec![],
                        },
                        now_ms(),
                    )
                    .await?;
                Ok(RouteReply::Replied { text: reply })
            }
            // An intentional abort is a user action, not an error.
            Err(PalaverError::Sandbox {
                kind: SandboxFailureKind::Aborted,
                ..
            }) => Ok(RouteReply::Denied {
                reason: "stopped".to_string(),
            }),
            Err(PalaverError::Sandbox { kind, detail }) => {
                error!(
                    group_id = inbound.group_id.as_str(),
                    kind = %kind,
                    detail = detail.as_str(),
                    "sandbox run failed"
                );
                Ok(RouteReply::Replied {
                    text: failure_notice(kind).to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn workspace_for(&self, group_id: &str) -> PathBuf {
        let leaf: String = group_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        PathBuf::from(&self.config.sandbox.workspace_root).join(leaf)
    }

    async fn notify_typing(&self, group_id: &str) {
        let Some(adapter) = self.channel_for(group_id) else {
            return;
        };
        if let Err(e) = adapter.start_typing(group_id).await {
            debug!(group_id, error = %e, "typing indicator failed");
        }
    }

    async fn post_to_channel(&self, group_id: &str, text: &str) {
        let Some(adapter) = self.channel_for(group_id) else {
            warn!(group_id, "no channel adapter for conversation");
            return;
        };
        if let Err(e) = adapter.post_message(group_id, text).await {
            error!(group_id, error = %e, "outbound post failed");
        }
    }

    /// Resolves the channel adapter from the platform prefix of the
    /// conversation id ("telegram:123" -> "telegram").
    fn channel_for(&self, group_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        let platform = group_id.split(':').next().unwrap_or(group_id);
        self.channels.lock().unwrap().get(platform).cloned()
    }
}

/// User-facing notice for a failed (non-aborted) sandbox run.
fn failure_notice(kind: SandboxFailureKind) -> &'static str {
    match kind {
        SandboxFailureKind::Timeout => "The run timed out. Try again.",
        SandboxFailureKind::OomKilled => "The run was killed after exhausting its memory limit.",
        SandboxFailureKind::Errored => "The run failed. Check the logs for details.",
        SandboxFailureKind::MalformedOutput => {
            "The run produced unreadable output. Check the logs for details."
        }
        SandboxFailureKind::Aborted => "stopped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_notices_are_user_facing() {
        assert!(failure_notice(SandboxFailureKind::Timeout).contains("timed out"));
        assert!(failure_notice(SandboxFailureKind::OomKilled).contains("memory"));
        assert_eq!(failure_notice(SandboxFailureKind::Aborted), "stopped");
    }
}
