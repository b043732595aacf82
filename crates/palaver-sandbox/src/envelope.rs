// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandbox stdout envelope parsing.
//!
//! A successful run prints a pair of unique sentinel markers bracketing a
//! JSON object with a `reply` field. Everything outside the markers is
//! diagnostic output and ignored. Duplicate markers, malformed JSON, or a
//! non-object payload are contract violations, reported distinctly from
//! process failures.

use palaver_core::{PalaverError, SandboxFailureKind};

/// Opening sentinel marker.
pub const REPLY_BEGIN: &str = "<<<PALAVER-REPLY>>>";
/// Closing sentinel marker.
pub const REPLY_END: &str = "<<<END-PALAVER-REPLY>>>";
/// Reply used when the payload omits the `reply` field.
pub const DEFAULT_REPLY: &str = "Done.";

fn malformed(detail: impl Into<String>) -> PalaverError {
    PalaverError::Sandbox {
        kind: SandboxFailureKind::MalformedOutput,
        detail: detail.into(),
    }
}

/// Extracts the reply text from sandbox stdout.
pub fn parse_reply_envelope(output: &str) -> Result<String, PalaverError> {
    let start = output
        .find(REPLY_BEGIN)
        .ok_or_else(|| malformed("missing reply begin marker"))?;
    let end = output
        .find(REPLY_END)
        .ok_or_else(|| malformed("missing reply end marker"))?;
    if end <= start {
        return Err(malformed("reply markers out of order"));
    }
    if output[start + REPLY_BEGIN.len()..].contains(REPLY_BEGIN) {
        return Err(malformed("multiple reply begin markers"));
    }
    if output[end + REPLY_END.len()..].contains(REPLY_END) {
        return Err(malformed("multiple reply end markers"));
    }

    let json_str = output[start + REPLY_BEGIN.len()..end].trim();
    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| malformed(format!("invalid json: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("reply payload must be a JSON object"))?;

    match obj.get("reply") {
        Some(serde_json::Value::String(reply)) => Ok(reply.clone()),
        Some(_) => Err(malformed("reply field must be a string")),
        None => Ok(DEFAULT_REPLY.to_string()),
    }
}
