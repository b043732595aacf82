// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trigger matching: decides whether raw inbound text addresses the
//! assistant, and strips the address if so.
//!
//! Patterns are tried longest-first so a longer pattern ("@Name") is not
//! shadowed by a shorter substring ("Name"). Case-insensitive matching is
//! ASCII-insensitive, which covers the `@Bot`/`bot` conventions the
//! supported platforms use.

use strum::{Display, EnumString};

/// Trigger matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TriggerMode {
    /// Text must start with a pattern followed by whitespace or end-of-string.
    Prefix,
    /// A pattern must appear as a whole whitespace-bounded token anywhere.
    Mention,
    /// Any non-empty text matches; nothing is stripped.
    Always,
}

/// Per-conversation trigger configuration.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub patterns: Vec<String>,
    pub mode: TriggerMode,
    pub case_sensitive: bool,
}

/// Runs trigger matching over `text`.
///
/// Returns the stripped prompt on a match, `None` otherwise. In direct
/// (one-on-one) channels the trigger is advisory: unmatched non-empty text
/// is returned whole. In multi-party channels a match is mandatory.
pub fn match_trigger(text: &str, config: &TriggerConfig, is_direct: bool) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match config.mode {
        TriggerMode::Always => return Some(trimmed.to_string()),
        TriggerMode::Prefix => {
            for pattern in longest_first(&config.patterns) {
                if let Some(rest) = strip_prefix_pattern(trimmed, pattern, config.case_sensitive)
                {
                    return Some(rest);
                }
            }
        }
        TriggerMode::Mention => {
            for pattern in longest_first(&config.patterns) {
                if let Some((start, end)) = find_token(trimmed, pattern, config.case_sensitive) {
                    let before = trimmed[..start].trim_end();
                    let after = trimmed[end..].trim_start();
                    return Some(match (before.is_empty(), after.is_empty()) {
                        // The message was only the trigger; keep it rather
                        // than discarding the text entirely.
                        (true, true) => trimmed.to_string(),
                        (true, false) => after.to_string(),
                        (false, true) => before.to_string(),
                        (false, false) => format!("{before} {after}"),
                    });
                }
            }
        }
    }

    if is_direct {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Patterns sorted longest-first, empty patterns skipped.
fn longest_first(patterns: &[String]) -> Vec<&str> {
    let mut sorted: Vec<&str> = patterns
        .iter()
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .collect();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.len()));
    sorted
}

/// Strips `pattern` from the start of `text` when it is followed by
/// whitespace or end-of-string. Returns the remainder with leading
/// whitespace removed.
fn strip_prefix_pattern(text: &str, pattern: &str, case_sensitive: bool) -> Option<String> {
    if text.len() < pattern.len() || !text.is_char_boundary(pattern.len()) {
        return None;
    }
    let head = &text[..pattern.len()];
    let matched = if case_sensitive {
        head == pattern
    } else {
        head.eq_ignore_ascii_case(pattern)
    };
    if !matched {
        return None;
    }
    let rest = &text[pattern.len()..];
    match rest.chars().next() {
        None => Some(String::new()),
        Some(c) if c.is_whitespace() => Some(rest.trim_start().to_string()),
        Some(_) => None,
    }
}

/// Finds `pattern` as a whole token: bounded by start/whitespace on the left
/// and whitespace/end on the right. Returns the byte range of the match.
fn find_token(text: &str, pattern: &str, case_sensitive: bool) -> Option<(usize, usize)> {
    if pattern.is_empty() {
        return None;
    }
    for (i, _) in text.char_indices() {
        let end = i + pattern.len();
        if end > text.len() || !text.is_char_boundary(end) {
            continue;
        }
        let slice = &text[i..end];
        let matched = if case_sensitive {
            slice == pattern
        } else {
            slice.eq_ignore_ascii_case(pattern)
        };
        if !matched {
            continue;
        }
        let before_ok =
            i == 0 || text[..i].chars().next_back().is_some_and(char::is_whitespace);
        let after_ok =
            end == text.len() || text[end..].chars().next().is_some_and(char::is_whitespace);
        if before_ok && after_ok {
            return Some((i, end));
        }
    }
    None
}
