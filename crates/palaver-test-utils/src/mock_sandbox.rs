// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock sandbox executor with scripted outcomes.
//!
//! Runs complete after a configurable delay, during which `abort` works the
//! way it does against a real container: the run ends with an `Aborted`
//! failure.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use palaver_core::{
    AdapterType, HealthStatus, PalaverError, PluginAdapter, SandboxExecutor,
    SandboxFailureKind, SandboxJob,
};

/// A scripted outcome for one mock run.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Reply(String),
    Fail(SandboxFailureKind, String),
}

/// Scripted [`SandboxExecutor`] for tests.
#[derive(Clone)]
pub struct MockSandbox {
    delay: Duration,
    outcomes: Arc<Mutex<VecDeque<MockOutcome>>>,
    default_reply: String,
    running: Arc<Mutex<HashSet<String>>>,
    aborted: Arc<Mutex<HashSet<String>>>,
    jobs: Arc<Mutex<Vec<SandboxJob>>>,
}

impl MockSandbox {
    /// A sandbox that replies instantly with `default_reply`.
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: default_reply.into(),
            running: Arc::new(Mutex::new(HashSet::new())),
            aborted: Arc::new(Mutex::new(HashSet::new())),
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes every run take `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues an outcome consumed by the next run (FIFO). When the script is
    /// empty, runs fall back to the default reply.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Every job this sandbox has executed, in order.
    pub fn seen_jobs(&self) -> Vec<SandboxJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl PluginAdapter for MockSandbox {
    fn name(&self) -> &str {
        "mock-sandbox"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Sandbox
    }

    async fn health_check(&self) -> Result<HealthStatus, PalaverError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), PalaverError> {
        self.kill_all().await;
        Ok(())
    }
}

#[async_trait]
impl SandboxExecutor for MockSandbox {
    async fn reply(&self, job: SandboxJob) -> Result<String, PalaverError> {
        let group_id = job.group_id.clone();
        self.jobs.lock().unwrap().push(job);
        self.running.lock().unwrap().insert(group_id.clone());

        // Wait out the configured delay in small steps, reacting to abort
        // the way a signalled container would.
        let mut waited = Duration::ZERO;
        let step = Duration::from_millis(5);
        let aborted = loop {
            if self.aborted.lock().unwrap().remove(&group_id) {
                break true;
            }
            if waited >= self.delay {
                break false;
            }
            tokio::time::sleep(step).await;
            waited += step;
        };

        self.running.lock().unwrap().remove(&group_id);
        if aborted {
            return Err(PalaverError::Sandbox {
                kind: SandboxFailureKind::Aborted,
                detail: "run aborted".to_string(),
            });
        }

        let scripted = self.outcomes.lock().unwrap().pop_front();
        match scripted {
            Some(MockOutcome::Reply(text)) => Ok(text),
            Some(MockOutcome::Fail(kind, detail)) => {
                Err(PalaverError::Sandbox { kind, detail })
            }
            None => Ok(self.default_reply.clone()),
        }
    }

    async fn abort(&self, group_id: &str) -> bool {
        if self.running.lock().unwrap().contains(group_id) {
            self.aborted.lock().unwrap().insert(group_id.to_string());
            true
        } else {
            false
        }
    }

    async fn kill_all(&self) {
        let groups: Vec<String> = self.running.lock().unwrap().iter().cloned().collect();
        for group_id in groups {
            self.abort(&group_id).await;
        }
    }

    fn is_running(&self, group_id: &str) -> bool {
        self.running.lock().unwrap().contains(group_id)
    }

    fn active_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    async fn cleanup_orphans(&self) -> Result<usize, PalaverError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::MessageRole;
    use palaver_core::types::HistoryEntry;
    use std::path::PathBuf;

    fn job(group_id: &str) -> SandboxJob {
        SandboxJob {
            group_id: group_id.to_string(),
            prompt: "hello".to_string(),
            caller_id: "u1".to_string(),
            history: vec![HistoryEntry {
                role: MessageRole::User,
                content: "earlier".to_string(),
            }],
            attachments: vec![],
            workspace: PathBuf::from("/tmp/ws"),
        }
    }

    #[tokio::test]
    async fn default_reply_and_scripted_outcomes() {
        let sandbox = MockSandbox::new("Done.");
        assert_eq!(sandbox.reply(job("g1")).await.unwrap(), "Done.");

        sandbox.push_outcome(MockOutcome::Reply("scripted".to_string()));
        sandbox.push_outcome(MockOutcome::Fail(
            SandboxFailureKind::Timeout,
            "too slow".to_string(),
        ));
        assert_eq!(sandbox.reply(job("g1")).await.unwrap(), "scripted");
        let err = sandbox.reply(job("g1")).await.unwrap_err();
        assert!(err.is_sandbox_kind(SandboxFailureKind::Timeout));
    }

    #[tokio::test]
    async fn abort_interrupts_a_delayed_run() {
        let sandbox = MockSandbox::new("never").with_delay(Duration::from_millis(200));
        let clone = sandbox.clone();
        let run = tokio::spawn(async move { clone.reply(job("g1")).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sandbox.is_running("g1"));
        assert!(sandbox.abort("g1").await);

        let err = run.await.unwrap().unwrap_err();
        assert!(err.is_sandbox_kind(SandboxFailureKind::Aborted));
        assert!(!sandbox.is_running("g1"));
    }

    #[tokio::test]
    async fn abort_without_a_run_reports_false() {
        let sandbox = MockSandbox::new("x");
        assert!(!sandbox.abort("g1").await);
    }
}
