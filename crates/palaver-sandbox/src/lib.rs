// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Isolated container execution of agent turns.
//!
//! The [`ContainerRunner`] spawns one container per accepted job, enforces a
//! wall-clock timeout, supports graceful-then-forceful cancellation, and
//! classifies every exit into exactly one tagged outcome. A startup orphan
//! cleanup pass removes containers left behind by a crashed predecessor.

pub mod envelope;
pub mod runner;

pub use envelope::{DEFAULT_REPLY, REPLY_BEGIN, REPLY_END, parse_reply_envelope};
pub use runner::{ContainerRunner, MANAGED_LABEL};
