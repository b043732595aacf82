// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./palaver.toml` > `~/.config/palaver/palaver.toml`
//! > `/etc/palaver/palaver.toml` with environment variable overrides via the
//! `PALAVER_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::PalaverConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/palaver/palaver.toml` (system-wide)
/// 3. `~/.config/palaver/palaver.toml` (user XDG config)
/// 4. `./palaver.toml` (local directory)
/// 5. `PALAVER_*` environment variables
pub fn load_config() -> Result<PalaverConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PalaverConfig::default()))
        .merge(Toml::file("/etc/palaver/palaver.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("palaver/palaver.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("palaver.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<PalaverConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PalaverConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<PalaverConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PalaverConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `PALAVER_SANDBOX_TIMEOUT_SECS` must map
/// to `sandbox.timeout_secs`, not `sandbox.timeout.secs`.
fn env_provider() -> Env {
    Env::prefixed("PALAVER_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("orchestrator_", "orchestrator.", 1)
            .replacen("trigger_", "trigger.", 1)
            .replacen("ratelimit_", "ratelimit.", 1)
            .replacen("sandbox_", "sandbox.", 1)
            .replacen("scheduler_", "scheduler.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("permissions_", "permissions.", 1)
            .to_string();
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_str_applies_overrides() {
        let config = load_config_from_str(
            "[orchestrator]\nmax_concurrent_jobs = 9\n\n[storage]\ndatabase_path = \"/tmp/p.db\"\n",
        )
        .unwrap();
        assert_eq!(config.orchestrator.max_concurrent_jobs, 9);
        assert_eq!(config.storage.database_path, "/tmp/p.db");
        // Untouched sections keep compiled defaults.
        assert_eq!(config.scheduler.poll_interval_secs, 5);
    }

    #[test]
    fn load_from_str_rejects_unknown_section_key() {
        let result = load_config_from_str("[sandbox]\nimge = \"oops\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn empty_string_yields_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.orchestrator.name, "palaver");
        assert_eq!(config.trigger.patterns.len(), 2);
    }
}
