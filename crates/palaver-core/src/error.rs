// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Palaver orchestrator.

use thiserror::Error;

use crate::types::SandboxFailureKind;

/// The primary error type used across all Palaver crates.
#[derive(Debug, Error)]
pub enum PalaverError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Channel adapter errors (connection failure, send failure).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A caller lacked a required permission. The reason is user-facing text.
    #[error("denied: {reason}")]
    Denied { reason: String },

    /// A sandbox run ended in one of the tagged failure kinds.
    ///
    /// `detail` carries truncated diagnostic output; callers branch on `kind`,
    /// never on the detail text.
    #[error("sandbox {kind}: {detail}")]
    Sandbox {
        kind: SandboxFailureKind,
        detail: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PalaverError {
    /// True when this error is the tagged sandbox failure of the given kind.
    pub fn is_sandbox_kind(&self, wanted: SandboxFailureKind) -> bool {
        matches!(self, PalaverError::Sandbox { kind, .. } if *kind == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_errors_carry_their_kind() {
        let err = PalaverError::Sandbox {
            kind: SandboxFailureKind::Timeout,
            detail: "exceeded 300s".into(),
        };
        assert!(err.is_sandbox_kind(SandboxFailureKind::Timeout));
        assert!(!err.is_sandbox_kind(SandboxFailureKind::Aborted));
        assert_eq!(err.to_string(), "sandbox timeout: exceeded 300s");
    }

    #[test]
    fn non_sandbox_errors_match_no_kind() {
        let err = PalaverError::Internal("boom".into());
        assert!(!err.is_sandbox_kind(SandboxFailureKind::Errored));
    }
}
