// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Palaver orchestrator.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Palaver workspace. All adapter
//! implementations (channels, storage, sandbox) implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::PalaverError;
pub use types::{
    AdapterType, ChatCommand, HealthStatus, InboundChat, MessageRole, Permission,
    RouteOutcome, SandboxFailureKind, SandboxJob,
};

// Re-export all adapter traits at crate root.
pub use traits::{
    ChannelAdapter, NewMessage, NewTask, PluginAdapter, SandboxExecutor, StorageAdapter,
};
