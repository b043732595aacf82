// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Palaver orchestrator.
//!
//! Provides TOML configuration parsing with strict validation
//! (`deny_unknown_fields`), XDG file hierarchy lookup, and environment
//! variable overrides.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::PalaverConfig;

/// Load configuration from the XDG hierarchy and validate invariants the
/// type system cannot express.
pub fn load_and_validate() -> Result<PalaverConfig, figment::Error> {
    let config = loader::load_config()?;
    validate(&config).map_err(figment::Error::from)?;
    Ok(config)
}

/// Post-deserialization validation.
fn validate(config: &PalaverConfig) -> Result<(), String> {
    if config.orchestrator.max_concurrent_jobs == 0 {
        return Err("orchestrator.max_concurrent_jobs must be at least 1".to_string());
    }
    if config.ratelimit.window_secs == 0 {
        return Err("ratelimit.window_secs must be at least 1".to_string());
    }
    if config.sandbox.timeout_secs == 0 {
        return Err("sandbox.timeout_secs must be at least 1".to_string());
    }
    match config.trigger.mode.as_str() {
        "prefix" | "mention" | "always" => {}
        other => {
            return Err(format!(
                "trigger.mode must be one of prefix/mention/always, got \"{other}\""
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = PalaverConfig::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let mut config = PalaverConfig::default();
        config.orchestrator.max_concurrent_jobs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn bogus_trigger_mode_is_rejected() {
        let mut config = PalaverConfig::default();
        config.trigger.mode = "sometimes".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.contains("trigger.mode"));
    }
}
