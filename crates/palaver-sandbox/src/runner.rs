// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Container-backed sandbox runner.
//!
//! Each accepted job runs as one `docker run`/`podman run` subprocess: the
//! job payload goes in as a single JSON document on stdin, the reply comes
//! back as a sentinel-bracketed envelope on stdout. A per-run timer enforces
//! the wall-clock timeout; `abort` and `kill_all` escalate from a graceful
//! TERM to a forceful kill after a grace period. Exit classification order:
//! timeout, aborted, OOM (137), generic non-zero, success.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use palaver_config::model::SandboxConfig;
use palaver_core::{
    AdapterType, HealthStatus, PalaverError, PluginAdapter, SandboxExecutor,
    SandboxFailureKind, SandboxJob,
};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::envelope;

/// Label every managed container carries; orphan cleanup filters on it.
pub const MANAGED_LABEL: &str = "palaver.managed";

/// Exit code the kernel's OOM killer produces (128 + SIGKILL).
const OOM_EXIT_CODE: i32 = 137;

#[derive(Clone)]
struct RunEntry {
    run_name: String,
    timed_out: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
}

type RunMap = Arc<Mutex<HashMap<String, RunEntry>>>;

/// Removes the conversation's run entry when the run finishes, whatever the
/// exit path.
struct RunGuard {
    runs: RunMap,
    group_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.lock().unwrap().remove(&self.group_id);
    }
}

/// The payload delivered to the sandbox process on stdin. The workspace is
/// reported at its in-container mount point.
#[derive(Serialize)]
struct JobPayload<'a> {
    group_id: &'a str,
    caller_id: &'a str,
    prompt: &'a str,
    history: &'a [palaver_core::types::HistoryEntry],
    attachments: &'a [String],
    workspace: &'a str,
}

/// Container-backed implementation of [`SandboxExecutor`].
pub struct ContainerRunner {
    config: SandboxConfig,
    runs: RunMap,
}

impl ContainerRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves the credential injected into runs: process environment
    /// first, then the locally cached token file.
    fn resolve_credential(&self) -> Option<String> {
        if let Ok(token) = std::env::var(&self.config.credential_env) {
            if !token.trim().is_empty() {
                return Some(token);
            }
        }
        std::fs::read_to_string(&self.config.auth_token_file)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Sends a signal to the container by name. Errors mean the container
    /// is already gone or the runtime is unavailable.
    async fn signal_container(&self, run_name: &str, signal: &str) -> Result<(), PalaverError> {
        let status = Command::new(&self.config.runtime_binary)
            .args(["kill", "--signal", signal, run_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| PalaverError::Internal(format!("container signal failed: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(PalaverError::Internal(format!(
                "container signal {signal} to {run_name} exited with {status}"
            )))
        }
    }

    /// After the grace period, force-kills the container if the run is still
    /// tracked for the conversation.
    fn escalate_kill(&self, group_id: &str, run_name: &str) {
        let runs = Arc::clone(&self.runs);
        let binary = self.config.runtime_binary.clone();
        let group_id = group_id.to_string();
        let run_name = run_name.to_string();
        let grace = Duration::from_secs(self.config.grace_secs);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let still_tracked = runs
                .lock()
                .unwrap()
                .get(&group_id)
                .is_some_and(|entry| entry.run_name == run_name);
            if still_tracked {
                warn!(run_name = run_name.as_str(), "grace period expired, force-killing");
                let _ = Command::new(&binary)
                    .args(["kill", &run_name])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
            }
        });
    }
}

#[async_trait]
impl PluginAdapter for ContainerRunner {
    fn name(&self) -> &str {
        "container"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Sandbox
    }

    async fn health_check(&self) -> Result<HealthStatus, PalaverError> {
        let probe = Command::new(&self.config.runtime_binary)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match probe {
            Ok(status) if status.success() => Ok(HealthStatus::Healthy),
            Ok(status) => Ok(HealthStatus::Unhealthy(format!(
                "{} version exited with {status}",
                self.config.runtime_binary
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(format!(
                "{} not runnable: {e}",
                self.config.runtime_binary
            ))),
        }
    }

    async fn shutdown(&self) -> Result<(), PalaverError> {
        self.kill_all().await;
        Ok(())
    }
}

#[async_trait]
impl SandboxExecutor for ContainerRunner {
    async fn reply(&self, job: SandboxJob) -> Result<String, PalaverError> {
        let run_name = format!(
            "palaver-{}-{}",
            sanitize_name(&job.group_id),
            uuid::Uuid::new_v4().simple()
        );
        let entry = RunEntry {
            run_name: run_name.clone(),
            timed_out: Arc::new(AtomicBool::new(false)),
            aborted: Arc::new(AtomicBool::new(false)),
        };

        // One run per conversation; the group queue upholds this, the map
        // double-checks it.
        {
            let mut runs = self.runs.lock().unwrap();
            if runs.contains_key(&job.group_id) {
                return Err(PalaverError::Internal(format!(
                    "a sandbox run is already tracked for {}",
                    job.group_id
                )));
            }
            runs.insert(job.group_id.clone(), entry.clone());
        }
        let _guard = RunGuard {
            runs: Arc::clone(&self.runs),
            group_id: job.group_id.clone(),
        };

        let workspace = job.workspace.clone();
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| PalaverError::Internal(format!("workspace create failed: {e}")))?;

        let payload = serde_json::to_vec(&JobPayload {
            group_id: &job.group_id,
            caller_id: &job.caller_id,
            prompt: &job.prompt,
            history: &job.history,
            attachments: &job.attachments,
            workspace: "/workspace",
        })
        .map_err(|e| PalaverError::Internal(format!("payload encode failed: {e}")))?;

        let mut cmd = Command::new(&self.config.runtime_binary);
        cmd.arg("run")
            .arg("--rm")
            .args(["--name", &run_name])
            .args(["--label", &format!("{MANAGED_LABEL}=true")])
            .arg("-i")
            .args(["-v", &format!("{}:/shared:ro", self.config.shared_dir)])
            .args(["-v", &format!("{}:/workspace", workspace.display())])
            .args(["-w", "/workspace"]);
        if let Some(token) = self.resolve_credential() {
            cmd.args(["-e", &format!("{}={}", self.config.credential_env, token)]);
        }
        cmd.arg(&self.config.image)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            group_id = job.group_id.as_str(),
            run_name = run_name.as_str(),
            "sandbox run starting"
        );
        let mut child = cmd
            .spawn()
            .map_err(|e| PalaverError::Internal(format!("sandbox spawn failed: {e}")))?;

        // Feed the job payload and close stdin so the agent sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await.map_err(|e| {
                PalaverError::Internal(format!("sandbox stdin write failed: {e}"))
            })?;
            stdin.shutdown().await.ok();
        }

        let stdout_task = read_pipe(child.stdout.take());
        let stderr_task = read_pipe(child.stderr.take());

        // Wait for exit, arming the timeout timer once. The timer only acts
        // while the run is still registered, which it is here by
        // construction: the guard removes the entry after this loop.
        let deadline = tokio::time::sleep(Duration::from_secs(self.config.timeout_secs));
        tokio::pin!(deadline);
        let mut fired = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| {
                        PalaverError::Internal(format!("sandbox wait failed: {e}"))
                    })?;
                }
                _ = &mut deadline, if !fired => {
                    fired = true;
                }
            }
            // Timeout fired: graceful signal to the container by name,
            // falling back to a direct kill on the process handle.
            entry.timed_out.store(true, Ordering::SeqCst);
            warn!(
                run_name = run_name.as_str(),
                timeout_secs = self.config.timeout_secs,
                "sandbox run timed out"
            );
            if self.signal_container(&run_name, "TERM").await.is_err() {
                let _ = child.start_kill();
            }
            self.escalate_kill(&job.group_id, &run_name);
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        drop(_guard);

        debug!(
            run_name = run_name.as_str(),
            code = ?status.code(),
            "sandbox run exited"
        );
        classify_outcome(
            entry.timed_out.load(Ordering::SeqCst),
            entry.aborted.load(Ordering::SeqCst),
            status.code(),
            status.success(),
            &stdout,
            &stderr,
            self.config.output_limit_bytes,
        )
    }

    async fn abort(&self, group_id: &str) -> bool {
        let entry = self.runs.lock().unwrap().get(group_id).cloned();
        let Some(entry) = entry else {
            return false;
        };
        entry.aborted.store(true, Ordering::SeqCst);
        info!(
            group_id,
            run_name = entry.run_name.as_str(),
            "aborting sandbox run"
        );
        let _ = self.signal_container(&entry.run_name, "TERM").await;
        self.escalate_kill(group_id, &entry.run_name);
        true
    }

    async fn kill_all(&self) {
        let groups: Vec<String> = self.runs.lock().unwrap().keys().cloned().collect();
        for group_id in groups {
            self.abort(&group_id).await;
        }
    }

    fn is_running(&self, group_id: &str) -> bool {
        self.runs.lock().unwrap().contains_key(group_id)
    }

    fn active_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    async fn cleanup_orphans(&self) -> Result<usize, PalaverError> {
        let listed = Command::new(&self.config.runtime_binary)
            .args(["ps", "-aq", "--filter", &format!("label={MANAGED_LABEL}=true")])
            .output()
            .await
            .map_err(|e| PalaverError::Internal(format!("orphan listing failed: {e}")))?;
        if !listed.status.success() {
            return Err(PalaverError::Internal(format!(
                "orphan listing exited with {}",
                listed.status
            )));
        }

        let ids: Vec<String> = String::from_utf8_lossy(&listed.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        warn!(count = ids.len(), "removing orphaned sandbox containers");
        let removed = Command::new(&self.config.runtime_binary)
            .args(["rm", "-f"])
            .args(&ids)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| PalaverError::Internal(format!("orphan removal failed: {e}")))?;
        if !removed.success() {
            return Err(PalaverError::Internal(format!(
                "orphan removal exited with {removed}"
            )));
        }
        Ok(ids.len())
    }
}

/// Spawns a reader draining the pipe to a string.
fn read_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return String::new();
        };
        let mut buf = Vec::new();
        use tokio::io::AsyncReadExt;
        let _ = pipe.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Classifies a finished run into exactly one terminal outcome.
///
/// Priority order: timeout, externally aborted, OOM kill, generic non-zero
/// exit, success (which then parses the reply envelope).
fn classify_outcome(
    timed_out: bool,
    aborted: bool,
    code: Option<i32>,
    success: bool,
    stdout: &str,
    stderr: &str,
    output_limit: usize,
) -> Result<String, PalaverError> {
    if timed_out {
        return Err(PalaverError::Sandbox {
            kind: SandboxFailureKind::Timeout,
            detail: "run exceeded its wall-clock timeout".to_string(),
        });
    }
    if aborted {
        return Err(PalaverError::Sandbox {
            kind: SandboxFailureKind::Aborted,
            detail: "run aborted".to_string(),
        });
    }
    if code == Some(OOM_EXIT_CODE) {
        return Err(PalaverError::Sandbox {
            kind: SandboxFailureKind::OomKilled,
            detail: "run killed by the out-of-memory killer".to_string(),
        });
    }
    if !success {
        let mut combined = String::new();
        combined.push_str(stdout);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(stderr);
        }
        return Err(PalaverError::Sandbox {
            kind: SandboxFailureKind::Errored,
            detail: format!(
                "exit code {}: {}",
                code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                truncate_output(&combined, output_limit)
            ),
        });
    }
    envelope::parse_reply_envelope(stdout)
}

/// Keeps the tail of the output within `limit` bytes, on a char boundary.
fn truncate_output(output: &str, limit: usize) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - limit;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

/// Restricts a name to characters container runtimes accept.
fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
