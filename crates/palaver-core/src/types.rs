// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Palaver orchestrator.
//!
//! Conversation identifiers are opaque, platform-qualified strings
//! (`"telegram:123"`). All timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use strum::{Display, EnumString};

/// Built-in role granted every permission; overridable per conversation.
pub const ROLE_ADMIN: &str = "admin";
/// Built-in default role; holds only [`Permission::SendPrompt`] unless overridden.
pub const ROLE_MEMBER: &str = "member";
/// Non-assignable internal role. Always holds every permission and never
/// touches storage during resolution.
pub const ROLE_SYSTEM: &str = "system";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fine-grained capabilities gated per role. Closed set: unknown tokens in a
/// stored permission list are silently discarded at parse time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    SendPrompt,
    StopRun,
    ManageTasks,
    ManageRoles,
    ManageConfig,
}

impl Permission {
    /// Every permission, in declaration order.
    pub fn all() -> HashSet<Permission> {
        [
            Permission::SendPrompt,
            Permission::StopRun,
            Permission::ManageTasks,
            Permission::ManageRoles,
            Permission::ManageConfig,
        ]
        .into_iter()
        .collect()
    }
}

/// Role of a stored message within a conversation.
///
/// `Ambient` marks untriggered chatter captured only for context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    Ambient,
}

/// Tagged failure kinds for a sandbox run, inspected by pattern match.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SandboxFailureKind {
    /// The wall-clock timeout timer fired while the run was still registered.
    Timeout,
    /// `abort` or `kill_all` was invoked for the conversation.
    Aborted,
    /// The process exited with the well-known OOM-kill code (137).
    OomKilled,
    /// Any other non-zero exit.
    Errored,
    /// Exit zero but the stdout envelope was missing or invalid.
    MalformedOutput,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter behind a [`crate::PluginAdapter`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Storage,
    Sandbox,
}

/// An inbound chat message handed over by a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundChat {
    /// Platform-qualified conversation id.
    pub group_id: String,
    /// Raw message text before trigger stripping.
    pub raw_text: String,
    /// External caller identity (platform-qualified).
    pub caller_id: String,
    /// Display name of the author, when the platform supplies one.
    pub author_name: Option<String>,
    /// True for one-on-one channels, where trigger matching is advisory.
    pub is_direct: bool,
    /// Name of the channel adapter that produced this message.
    pub source: String,
    /// Attachment references (paths or URLs, adapter-resolved).
    pub attachments: Vec<String>,
}

/// Reserved chat command words, matched against the lower-cased stripped prompt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatCommand {
    /// Abort the running job and drop pending work for the conversation.
    Stop,
    /// Advance the conversation's session boundary past its latest message.
    Compact,
}

/// The router's decision for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not addressed to the assistant; drop silently.
    Ignore,
    /// Run an assistant turn with the trigger-stripped prompt.
    Assistant { prompt: String },
    /// Execute a reserved command.
    Command { command: ChatCommand },
    /// Addressed to the assistant but refused; reason is user-facing.
    Denied { reason: String },
}

/// One entry of conversation history handed to the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

/// An ephemeral sandbox job. Constructed per invocation, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxJob {
    pub group_id: String,
    /// The current trigger-stripped prompt.
    pub prompt: String,
    pub caller_id: String,
    /// Ordered history since the conversation's session boundary, oldest first.
    pub history: Vec<HistoryEntry>,
    pub attachments: Vec<String>,
    /// Host path mounted as the per-conversation workspace.
    pub workspace: PathBuf,
}

// --- Persisted entities (schema-level contract, see palaver-storage) ---

/// One addressable conversation (chat thread, channel, or DM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub title: Option<String>,
    /// Session boundary: messages with id below this are excluded from context.
    pub context_floor: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One append-only message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Strictly increasing within a conversation.
    pub id: i64,
    pub group_id: String,
    pub role: MessageRole,
    pub content: String,
    pub attachments: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One cron-scheduled task belonging to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub group_id: String,
    pub cron: String,
    pub prompt: String,
    pub active: bool,
    /// Suppress posting the result back to the conversation.
    pub silent: bool,
    /// Precomputed next run, milliseconds since epoch.
    pub next_run: i64,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A role grant for one caller in one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRole {
    pub group_id: String,
    pub caller_id: String,
    pub role: String,
    pub granted_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One per-conversation configuration override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfigEntry {
    pub group_id: String,
    pub key: String,
    pub value: String,
    pub updated_by: Option<String>,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn permission_round_trips_kebab_case() {
        for perm in Permission::all() {
            let s = perm.to_string();
            assert_eq!(Permission::from_str(&s).unwrap(), perm);
        }
        assert_eq!(Permission::SendPrompt.to_string(), "send-prompt");
        assert_eq!(
            Permission::from_str("manage-roles").unwrap(),
            Permission::ManageRoles
        );
    }

    #[test]
    fn unknown_permission_token_fails_to_parse() {
        assert!(Permission::from_str("launch-missiles").is_err());
        assert!(Permission::from_str("").is_err());
    }

    #[test]
    fn permission_all_is_the_closed_set() {
        assert_eq!(Permission::all().len(), 5);
    }

    #[test]
    fn message_role_round_trips_lowercase() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Ambient,
        ] {
            let s = role.to_string();
            assert_eq!(MessageRole::from_str(&s).unwrap(), role);
        }
        assert_eq!(MessageRole::Ambient.to_string(), "ambient");
    }

    #[test]
    fn chat_command_parses_lowercase_words() {
        assert_eq!(ChatCommand::from_str("stop").unwrap(), ChatCommand::Stop);
        assert_eq!(
            ChatCommand::from_str("compact").unwrap(),
            ChatCommand::Compact
        );
        assert!(ChatCommand::from_str("Stop").is_err());
    }

    #[test]
    fn sandbox_failure_kind_display() {
        assert_eq!(SandboxFailureKind::OomKilled.to_string(), "oom-killed");
        assert_eq!(
            SandboxFailureKind::MalformedOutput.to_string(),
            "malformed-output"
        );
    }

    #[test]
    fn sandbox_job_serializes_for_stdin() {
        let job = SandboxJob {
            group_id: "telegram:1".into(),
            prompt: "hello".into(),
            caller_id: "telegram:u1".into(),
            history: vec![HistoryEntry {
                role: MessageRole::User,
                content: "earlier".into(),
            }],
            attachments: vec![],
            workspace: PathBuf::from("/tmp/ws"),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"prompt\":\"hello\""));
        assert!(json.contains("\"role\":\"user\""));
    }
}
