// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trigger matching, permission gating, rate limiting, and routing.
//!
//! The [`MessageRouter`] composes the three leaf components into a single
//! decision per inbound message: ignore, run the assistant, run a reserved
//! command, or deny with a human-readable reason.

pub mod permissions;
pub mod ratelimit;
pub mod router;
pub mod trigger;

pub use permissions::PermissionResolver;
pub use ratelimit::RateLimiter;
pub use router::{MessageRouter, command_permission};
pub use trigger::{TriggerConfig, TriggerMode, match_trigger};
