// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandbox executor trait for isolated agent-turn execution.

use async_trait::async_trait;

use crate::error::PalaverError;
use crate::traits::adapter::PluginAdapter;
use crate::types::SandboxJob;

/// Executes one agent turn inside an isolated, time-boxed subprocess.
///
/// At most one run per conversation is ever live; the group queue enforces
/// that jointly with the executor's own tracking map. Failures surface as
/// [`PalaverError::Sandbox`] with an explicit kind.
#[async_trait]
pub trait SandboxExecutor: PluginAdapter {
    /// Runs the job to completion and returns the reply text.
    async fn reply(&self, job: SandboxJob) -> Result<String, PalaverError>;

    /// Terminates the running job for the conversation, graceful signal
    /// first, forceful kill after a short grace period. Returns true when a
    /// run was found to terminate.
    async fn abort(&self, group_id: &str) -> bool;

    /// Performs the abort sequence for every tracked run (shutdown path).
    async fn kill_all(&self);

    /// True while a run for the conversation is registered.
    fn is_running(&self, group_id: &str) -> bool;

    /// Number of currently tracked runs.
    fn active_count(&self) -> usize;

    /// Removes sandbox instances left over from a prior process, identified
    /// by the management label. Returns the number removed.
    async fn cleanup_orphans(&self) -> Result<usize, PalaverError>;
}
