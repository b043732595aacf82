// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel adapter trait for messaging platform integrations.

use async_trait::async_trait;

use crate::error::PalaverError;
use crate::traits::adapter::PluginAdapter;

/// Adapter for outbound delivery to an external messaging platform.
///
/// The orchestrator depends only on this capability surface; platform wire
/// details (payload parsing, webhook verification, media download) live
/// entirely inside concrete implementations.
#[async_trait]
pub trait ChannelAdapter: PluginAdapter {
    /// Establishes a connection to the messaging platform.
    async fn connect(&mut self) -> Result<(), PalaverError>;

    /// Posts a text message into the given conversation.
    async fn post_message(&self, group_id: &str, text: &str) -> Result<(), PalaverError>;

    /// Shows a typing indicator in the given conversation, if supported.
    ///
    /// Best-effort; implementations without typing support return `Ok(())`.
    async fn start_typing(&self, group_id: &str) -> Result<(), PalaverError>;
}
