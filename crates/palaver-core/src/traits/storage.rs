// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait for persistence backends.

use async_trait::async_trait;

use crate::error::PalaverError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Group, GroupConfigEntry, GroupRole, MessageRole, ScheduledTask, StoredMessage,
};

/// A message to append. The id and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub group_id: String,
    pub role: MessageRole,
    pub content: String,
    pub attachments: Vec<String>,
}

/// A scheduled task to create. The id and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub group_id: String,
    pub cron: String,
    pub prompt: String,
    pub silent: bool,
    pub next_run: i64,
    pub created_by: String,
}

/// Adapter for the persistence backend.
///
/// The schema contract lives in §3 of the design notes: conversations,
/// append-only messages, scheduled tasks, per-conversation role grants, and
/// per-conversation config overrides. The orchestrator assumes the backend
/// serializes concurrent writers adequately (single-writer embedded store).
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, pragmas).
    async fn initialize(&self) -> Result<(), PalaverError>;

    /// Closes the storage backend, flushing pending writes.
    async fn close(&self) -> Result<(), PalaverError>;

    // --- Conversations ---

    /// Creates the conversation on first sight, otherwise bumps `updated_at`
    /// (and the title, when a non-empty one is supplied).
    async fn ensure_group(
        &self,
        group_id: &str,
        title: Option<&str>,
        now: i64,
    ) -> Result<(), PalaverError>;

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, PalaverError>;

    /// Moves the conversation's session boundary. History queries exclude
    /// message ids below the floor.
    async fn set_context_floor(
        &self,
        group_id: &str,
        floor: i64,
        now: i64,
    ) -> Result<(), PalaverError>;

    // --- Messages ---

    /// Appends a message and returns its monotonic id.
    async fn append_message(&self, msg: &NewMessage, now: i64) -> Result<i64, PalaverError>;

    /// Messages at or above the conversation's context floor, oldest first,
    /// capped at `limit` most recent rows.
    async fn history_since_floor(
        &self,
        group_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, PalaverError>;

    /// Highest message id in the conversation, if any message exists.
    async fn latest_message_id(&self, group_id: &str) -> Result<Option<i64>, PalaverError>;

    // --- Scheduled tasks ---

    async fn create_task(&self, task: &NewTask, now: i64) -> Result<i64, PalaverError>;

    async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>, PalaverError>;

    async fn list_tasks(&self, group_id: &str) -> Result<Vec<ScheduledTask>, PalaverError>;

    /// Flips the active flag. Returns false when the task does not exist.
    async fn set_task_active(
        &self,
        id: i64,
        active: bool,
        now: i64,
    ) -> Result<bool, PalaverError>;

    /// Deletes the task. Returns false when the task does not exist.
    async fn delete_task(&self, id: i64) -> Result<bool, PalaverError>;

    /// Active tasks whose `next_run` is at or before `now`, oldest first.
    async fn due_tasks(&self, now: i64) -> Result<Vec<ScheduledTask>, PalaverError>;

    async fn set_task_next_run(
        &self,
        id: i64,
        next_run: i64,
        now: i64,
    ) -> Result<(), PalaverError>;

    // --- Roles ---

    async fn get_role(
        &self,
        group_id: &str,
        caller_id: &str,
    ) -> Result<Option<String>, PalaverError>;

    /// Upserts the caller's role.
    async fn set_role(
        &self,
        group_id: &str,
        caller_id: &str,
        role: &str,
        granted_by: &str,
        now: i64,
    ) -> Result<(), PalaverError>;

    /// Inserts the role only when the caller has no grant yet; never
    /// overwrites an existing role.
    async fn ensure_role(
        &self,
        group_id: &str,
        caller_id: &str,
        role: &str,
        granted_by: &str,
        now: i64,
    ) -> Result<(), PalaverError>;

    /// Removes the caller's grant. Returns false when none existed.
    async fn remove_role(&self, group_id: &str, caller_id: &str) -> Result<bool, PalaverError>;

    async fn list_roles(&self, group_id: &str) -> Result<Vec<GroupRole>, PalaverError>;

    // --- Per-conversation config overrides ---

    async fn get_config(
        &self,
        group_id: &str,
        key: &str,
    ) -> Result<Option<String>, PalaverError>;

    async fn set_config(
        &self,
        group_id: &str,
        key: &str,
        value: &str,
        updated_by: &str,
        now: i64,
    ) -> Result<(), PalaverError>;

    async fn list_config(&self, group_id: &str)
        -> Result<Vec<GroupConfigEntry>, PalaverError>;
}
