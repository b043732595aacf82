// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end orchestrator tests over real SQLite storage, a mock channel,
//! and a scripted mock sandbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use palaver_config::model::PalaverConfig;
use palaver_core::types::{ScheduledTask, now_ms};
use palaver_core::{
    InboundChat, MessageRole, PalaverError, SandboxExecutor, SandboxFailureKind, StorageAdapter,
};
use palaver_runtime::management::ManagementApi;
use palaver_runtime::{Orchestrator, RouteReply};
use palaver_storage::SqliteStorage;
use palaver_test_utils::{MockChannel, MockOutcome, MockSandbox};

struct Harness {
    orchestrator: Arc<Orchestrator>,
    storage: Arc<SqliteStorage>,
    sandbox: MockSandbox,
    channel: MockChannel,
    _dir: tempfile::TempDir,
}

async fn harness_with(seed_admins: Vec<String>, sandbox: MockSandbox) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let mut config = PalaverConfig::default();
    config.trigger.patterns = vec!["@Bot".to_string(), "Bot".to_string()];
    config.trigger.mode = "mention".to_string();
    config.storage.database_path = dir
        .path()
        .join("palaver.db")
        .to_string_lossy()
        .into_owned();
    config.sandbox.workspace_root = dir
        .path()
        .join("workspaces")
        .to_string_lossy()
        .into_owned();
    config.permissions.seed_admins = seed_admins;
    config.orchestrator.shutdown_drain_secs = 1;

    let storage = Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await.unwrap();

    let orchestrator = Orchestrator::new(
        config,
        storage.clone(),
        Arc::new(sandbox.clone()),
    );
    orchestrator.init_scheduler();

    let mut channel = MockChannel::new();
    use palaver_core::ChannelAdapter;
    channel.connect().await.unwrap();
    orchestrator.register_channel("telegram", Arc::new(channel.clone()));

    Harness {
        orchestrator,
        storage,
        sandbox,
        channel,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(vec![], MockSandbox::new("Done.")).await
}

fn chat(text: &str) -> InboundChat {
    InboundChat {
        group_id: "telegram:g1".to_string(),
        raw_text: text.to_string(),
        caller_id: "telegram:u1".to_string(),
        author_name: Some("Uma".to_string()),
        is_direct: false,
        source: "telegram".to_string(),
        attachments: vec![],
    }
}

#[tokio::test]
async fn mention_runs_a_turn_and_persists_the_exchange() {
    let h = harness().await;
    h.sandbox
        .push_outcome(MockOutcome::Reply("Summary: three points".to_string()));

    let reply = h
        .orchestrator
        .handle_raw_input(chat("@Bot summarize this"))
        .await
        .unwrap();
    assert_eq!(
        reply,
        RouteReply::Replied {
            text: "Summary: three points".to_string()
        }
    );

    // The log holds the user prompt then the assistant reply, in order.
    let history = h.storage.history_since_floor("telegram:g1", 50).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[0].content, "summarize this");
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[1].content, "Summary: three points");

    // The sandbox job carried the stripped prompt, not the raw text.
    let jobs = h.sandbox.seen_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].prompt, "summarize this");
    assert_eq!(jobs[0].caller_id, "telegram:u1");
}

#[tokio::test]
async fn stop_with_no_active_run_says_so_and_leaves_the_log_alone() {
    let h = harness_with(vec!["telegram:u1".to_string()], MockSandbox::new("Done.")).await;

    let reply = h.orchestrator.handle_raw_input(chat("@Bot stop")).await.unwrap();
    assert_eq!(
        reply,
        RouteReply::Replied {
            text: "No active run.".to_string()
        }
    );
    assert!(h.storage.history_since_floor("telegram:g1", 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn stop_aborts_a_running_turn() {
    let sandbox = MockSandbox::new("never").with_delay(Duration::from_millis(300));
    let h = harness_with(vec!["telegram:admin".to_string()], sandbox).await;

    let orchestrator = h.orchestrator.clone();
    let turn = tokio::spawn(async move {
        orchestrator.handle_raw_input(chat("@Bot think hard")).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.sandbox.is_running("telegram:g1"));

    let mut stop = chat("@Bot stop");
    stop.caller_id = "telegram:admin".to_string();
    let reply = h.orchestrator.handle_raw_input(stop).await.unwrap();
    assert_eq!(
        reply,
        RouteReply::Replied {
            text: "Stopped.".to_string()
        }
    );

    // The aborted turn surfaces as a "stopped" denial, not an error.
    let turn_reply = turn.await.unwrap().unwrap();
    assert_eq!(
        turn_reply,
        RouteReply::Denied {
            reason: "stopped".to_string()
        }
    );

    // No assistant row was written for the aborted turn.
    let history = h.storage.history_since_floor("telegram:g1", 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, MessageRole::User);
}

#[tokio::test]
async fn unauthorized_stop_is_denied_with_a_reason() {
    let h = harness().await;
    let reply = h.orchestrator.handle_raw_input(chat("@Bot stop")).await.unwrap();
    assert!(
        matches!(reply, RouteReply::Denied { ref reason } if reason.contains("stop-run")),
        "got {reply:?}"
    );
}

#[tokio::test]
async fn untriggered_group_chatter_is_captured_as_ambient() {
    let h = harness().await;

    let reply = h
        .orchestrator
        .handle_raw_input(chat("nothing for the bot here"))
        .await
        .unwrap();
    assert_eq!(reply, RouteReply::Ignored);

    let history = h.storage.history_since_floor("telegram:g1", 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, MessageRole::Ambient);
    assert_eq!(history[0].content, "Uma: nothing for the bot here");
    // Nothing was posted back.
    assert_eq!(h.channel.sent_count(), 0);
}

#[tokio::test]
async fn direct_channel_text_runs_without_a_trigger() {
    let h = harness().await;
    let mut inbound = chat("plain question");
    inbound.is_direct = true;

    let reply = h.orchestrator.handle_raw_input(inbound).await.unwrap();
    assert_eq!(
        reply,
        RouteReply::Replied {
            text: "Done.".to_string()
        }
    );
}

#[tokio::test]
async fn compact_advances_the_session_boundary() {
    let h = harness().await;

    h.orchestrator.handle_raw_input(chat("@Bot first turn")).await.unwrap();
    assert!(!h.storage.history_since_floor("telegram:g1", 50).await.unwrap().is_empty());

    let reply = h.orchestrator.handle_raw_input(chat("@Bot compact")).await.unwrap();
    assert_eq!(
        reply,
        RouteReply::Replied {
            text: "Context compacted.".to_string()
        }
    );
    assert!(h.storage.history_since_floor("telegram:g1", 50).await.unwrap().is_empty());

    // The rows still exist below the boundary.
    assert!(h.storage.latest_message_id("telegram:g1").await.unwrap().is_some());
}

#[tokio::test]
async fn sandbox_timeout_surfaces_as_a_failure_notice() {
    let h = harness().await;
    h.sandbox.push_outcome(MockOutcome::Fail(
        SandboxFailureKind::Timeout,
        "exceeded 300s".to_string(),
    ));

    let reply = h.orchestrator.handle_raw_input(chat("@Bot slow thing")).await.unwrap();
    assert!(
        matches!(reply, RouteReply::Replied { ref text } if text.contains("timed out")),
        "got {reply:?}"
    );

    // Only the user row was persisted.
    let history = h.storage.history_since_floor("telegram:g1", 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, MessageRole::User);
}

#[tokio::test]
async fn history_handed_to_the_sandbox_respects_the_boundary() {
    let h = harness().await;

    h.orchestrator.handle_raw_input(chat("old chatter")).await.unwrap(); // ambient
    h.orchestrator.handle_raw_input(chat("@Bot compact")).await.unwrap();
    h.orchestrator.handle_raw_input(chat("fresh chatter")).await.unwrap(); // ambient
    h.orchestrator.handle_raw_input(chat("@Bot go")).await.unwrap();

    let jobs = h.sandbox.seen_jobs();
    assert_eq!(jobs.len(), 1);
    let contents: Vec<&str> = jobs[0].history.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["Uma: fresh chatter"]);
}

#[tokio::test]
async fn scheduled_task_posts_result_unless_silent() {
    let h = harness().await;
    h.sandbox.push_outcome(MockOutcome::Reply("digest ready".to_string()));

    let task = ScheduledTask {
        id: 1,
        group_id: "telegram:g1".to_string(),
        cron: "* * * * *".to_string(),
        prompt: "build the digest".to_string(),
        active: true,
        silent: false,
        next_run: 0,
        created_by: "telegram:u1".to_string(),
        created_at: now_ms(),
        updated_at: now_ms(),
    };
    h.orchestrator.execute_scheduled(task.clone()).await.unwrap();
    assert_eq!(
        h.channel.sent_messages(),
        vec![("telegram:g1".to_string(), "digest ready".to_string())]
    );

    // A silent task runs but posts nothing.
    h.sandbox.push_outcome(MockOutcome::Reply("quiet digest".to_string()));
    let silent_task = ScheduledTask {
        silent: true,
        ..task
    };
    h.orchestrator.execute_scheduled(silent_task).await.unwrap();
    assert_eq!(h.channel.sent_count(), 1);

    // Both runs persisted their exchanges.
    let history = h.storage.history_since_floor("telegram:g1", 50).await.unwrap();
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn shutdown_runs_hooks_exactly_once() {
    let h = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let count = calls.clone();
    h.orchestrator
        .register_shutdown_hook(
            "adapter-disconnect",
            Box::new(move || {
                let count = count.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await;
    // A failing hook must not block later hooks.
    h.orchestrator
        .register_shutdown_hook(
            "flaky",
            Box::new(|| {
                Box::pin(async { Err(PalaverError::Internal("hook down".to_string())) })
            }),
        )
        .await;
    let count = calls.clone();
    h.orchestrator
        .register_shutdown_hook(
            "after-flaky",
            Box::new(move || {
                let count = count.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await;

    h.orchestrator.shutdown().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Idempotent: a second shutdown performs the teardown zero more times.
    h.orchestrator.shutdown().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn health_snapshot_reports_channels_and_counts() {
    let h = harness().await;
    let snapshot = h.orchestrator.health_snapshot().await;
    assert_eq!(snapshot.queue_active, 0);
    assert_eq!(snapshot.queue_pending, 0);
    assert_eq!(snapshot.sandbox_active, 0);
    assert_eq!(snapshot.channels, vec![("telegram".to_string(), true)]);
}

#[tokio::test]
async fn management_api_enforces_and_round_trips_permissions() {
    let h = harness_with(vec!["telegram:admin".to_string()], MockSandbox::new("Done.")).await;
    let api = ManagementApi::new(h.orchestrator.clone());

    // A plain member cannot manage roles.
    let err = api
        .grant_role("telegram:u1", "telegram:g1", "telegram:u2", "moderator")
        .await
        .unwrap_err();
    assert!(matches!(err, PalaverError::Denied { .. }));

    // The seeded admin can.
    api.grant_role("telegram:admin", "telegram:g1", "telegram:u2", "moderator")
        .await
        .unwrap();
    api.set_role_permissions(
        "telegram:admin",
        "telegram:g1",
        "moderator",
        "send-prompt, fly-to-moon, stop-run",
    )
    .await
    .unwrap();

    // Reading back yields exactly the valid subset, unknown tokens dropped.
    let perms = api
        .get_role_permissions("telegram:admin", "telegram:g1", "moderator")
        .await
        .unwrap();
    let names: Vec<String> = perms.iter().map(|p| p.to_string()).collect();
    assert_eq!(names, vec!["send-prompt".to_string(), "stop-run".to_string()]);

    // whoami reflects the stored role.
    let identity = api.whoami("telegram:u2", "telegram:g1").await.unwrap();
    assert_eq!(identity.role, "moderator");
    assert_eq!(identity.permissions.len(), 2);
}

#[tokio::test]
async fn management_tasks_are_scoped_to_their_conversation() {
    let h = harness_with(vec!["telegram:admin".to_string()], MockSandbox::new("Done.")).await;
    let api = ManagementApi::new(h.orchestrator.clone());
    h.storage.ensure_group("telegram:other", None, now_ms()).await.unwrap();

    let task_id = api
        .create_task(
            "telegram:admin",
            "telegram:g1",
            "0 9 * * *",
            "morning digest",
            false,
        )
        .await
        .unwrap();
    assert_eq!(
        api.list_tasks("telegram:admin", "telegram:g1").await.unwrap().len(),
        1
    );

    // The same id is invisible from another conversation.
    assert!(
        !api.pause_task("telegram:admin", "telegram:other", task_id)
            .await
            .unwrap()
    );
    assert!(
        api.pause_task("telegram:admin", "telegram:g1", task_id)
            .await
            .unwrap()
    );
    assert!(
        api.delete_task("telegram:admin", "telegram:g1", task_id)
            .await
            .unwrap()
    );

    // An invalid cron expression is rejected at creation.
    let err = api
        .create_task("telegram:admin", "telegram:g1", "nope", "x", false)
        .await
        .unwrap_err();
    assert!(matches!(err, PalaverError::Config(_)));
}

#[tokio::test]
async fn dispatch_loop_posts_replies_and_drains_on_cancel() {
    let h = harness().await;
    h.sandbox.push_outcome(MockOutcome::Reply("loop reply".to_string()));

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let cancel = tokio_util::sync::CancellationToken::new();
    let orchestrator = h.orchestrator.clone();
    let loop_cancel = cancel.clone();
    let runner = tokio::spawn(async move { orchestrator.run(rx, loop_cancel).await });

    tx.send(chat("@Bot via the loop")).await.unwrap();

    // Wait for the reply to land on the channel.
    let mut waited = 0;
    while h.channel.sent_count() == 0 && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(
        h.channel.sent_messages(),
        vec![("telegram:g1".to_string(), "loop reply".to_string())]
    );

    cancel.cancel();
    runner.await.unwrap();
}
