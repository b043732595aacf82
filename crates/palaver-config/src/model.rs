// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Palaver orchestrator.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Palaver configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PalaverConfig {
    /// Orchestrator identity and behavior settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Process-wide trigger defaults (overridable per conversation).
    #[serde(default)]
    pub trigger: TriggerDefaults,

    /// Sliding-window rate limit settings.
    #[serde(default)]
    pub ratelimit: RateLimitConfig,

    /// Sandbox container settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Scheduled-task poller settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Seed admins and system caller identities.
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

/// Orchestrator identity and behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Display name of the orchestrator.
    #[serde(default = "default_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Global ceiling on concurrently running sandbox jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Seconds to wait for active jobs to drain during shutdown.
    #[serde(default = "default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,

    /// Wall-clock ceiling on the whole shutdown sequence, in seconds.
    /// Exceeding it forces process termination.
    #[serde(default = "default_shutdown_force_secs")]
    pub shutdown_force_secs: u64,

    /// Maximum history rows handed to a sandbox job.
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            shutdown_drain_secs: default_shutdown_drain_secs(),
            shutdown_force_secs: default_shutdown_force_secs(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_name() -> String {
    "palaver".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_shutdown_drain_secs() -> u64 {
    10
}

fn default_shutdown_force_secs() -> u64 {
    30
}

fn default_history_limit() -> i64 {
    50
}

/// Process-wide trigger defaults.
///
/// Conversations override these through their config entries
/// (`trigger.patterns`, `trigger.mode`, `trigger.case_sensitive`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerDefaults {
    /// Textual patterns that address the assistant.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    /// Matching mode: "prefix", "mention", or "always".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Whether pattern matching is case sensitive.
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Default for TriggerDefaults {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            mode: default_mode(),
            case_sensitive: false,
        }
    }
}

fn default_patterns() -> Vec<String> {
    vec!["@palaver".to_string(), "palaver".to_string()]
}

fn default_mode() -> String {
    "mention".to_string()
}

/// Sliding-window rate limit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum accepted messages per (conversation, caller) per window.
    #[serde(default = "default_max_per_window")]
    pub max_per_window: usize,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Interval between background sweeps of empty buckets, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: default_max_per_window(),
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_max_per_window() -> usize {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Sandbox container configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Container runtime binary ("docker" or "podman").
    #[serde(default = "default_runtime_binary")]
    pub runtime_binary: String,

    /// Image the agent turn runs in.
    #[serde(default = "default_image")]
    pub image: String,

    /// Wall-clock timeout per run, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Grace period between the graceful stop and the forceful kill, in seconds.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Host directory mounted read-only into every run as /shared.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: String,

    /// Host directory under which per-conversation workspaces are created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    /// Environment variable holding the agent credential; injected into runs.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    /// Fallback credential file read when the environment variable is unset.
    #[serde(default = "default_auth_token_file")]
    pub auth_token_file: String,

    /// Maximum bytes of combined output preserved in failure details.
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime_binary: default_runtime_binary(),
            image: default_image(),
            timeout_secs: default_timeout_secs(),
            grace_secs: default_grace_secs(),
            shared_dir: default_shared_dir(),
            workspace_root: default_workspace_root(),
            credential_env: default_credential_env(),
            auth_token_file: default_auth_token_file(),
            output_limit_bytes: default_output_limit_bytes(),
        }
    }
}

fn default_runtime_binary() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "palaver-agent:latest".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_grace_secs() -> u64 {
    3
}

fn default_shared_dir() -> String {
    data_path("shared")
}

fn default_workspace_root() -> String {
    data_path("workspaces")
}

fn default_credential_env() -> String {
    "PALAVER_AGENT_TOKEN".to_string()
}

fn default_auth_token_file() -> String {
    data_path("auth_token")
}

fn default_output_limit_bytes() -> usize {
    2000
}

/// Scheduled-task poller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Poll interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    data_path("palaver.db")
}

fn default_wal_mode() -> bool {
    true
}

/// Seed admins and system caller identities.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionsConfig {
    /// Caller identities granted the admin role on first contact with a
    /// conversation.
    #[serde(default)]
    pub seed_admins: Vec<String>,

    /// Internal caller identities that always hold every permission.
    #[serde(default)]
    pub system_callers: Vec<String>,
}

fn data_path(leaf: &str) -> String {
    dirs::data_dir()
        .map(|p| p.join("palaver").join(leaf))
        .unwrap_or_else(|| std::path::PathBuf::from(leaf))
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = PalaverConfig::default();
        assert_eq!(config.orchestrator.name, "palaver");
        assert_eq!(config.orchestrator.max_concurrent_jobs, 4);
        assert_eq!(config.trigger.mode, "mention");
        assert!(!config.trigger.case_sensitive);
        assert_eq!(config.ratelimit.max_per_window, 10);
        assert_eq!(config.sandbox.timeout_secs, 300);
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert!(config.permissions.seed_admins.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = "[orchestrator]\nnmae = \"typo\"\n";
        let result: Result<PalaverConfig, _> = toml::from_str(toml);
        assert!(result.is_err(), "unknown key should be rejected");
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let toml = "[sandbox]\nimage = \"custom:1\"\n";
        let config: PalaverConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.sandbox.image, "custom:1");
        assert_eq!(config.sandbox.timeout_secs, 300);
    }
}
