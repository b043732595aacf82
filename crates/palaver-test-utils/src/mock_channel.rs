// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel adapter for deterministic testing.
//!
//! Captures outbound messages and typing notifications for assertion.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use palaver_core::{
    AdapterType, ChannelAdapter, HealthStatus, PalaverError, PluginAdapter,
};

/// A mock messaging channel that records everything posted through it.
#[derive(Clone, Default)]
pub struct MockChannel {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    typing: Arc<Mutex<Vec<String>>>,
    connected: Arc<Mutex<bool>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// All (group_id, text) pairs posted so far.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Group ids that received a typing notification.
    pub fn typing_events(&self) -> Vec<String> {
        self.typing.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

#[async_trait]
impl PluginAdapter for MockChannel {
    fn name(&self) -> &str {
        "mock-channel"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, PalaverError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), PalaverError> {
        *self.connected.lock().unwrap() = false;
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    async fn connect(&mut self) -> Result<(), PalaverError> {
        *self.connected.lock().unwrap() = true;
        Ok(())
    }

    async fn post_message(&self, group_id: &str, text: &str) -> Result<(), PalaverError> {
        self.sent
            .lock()
            .unwrap()
            .push((group_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn start_typing(&self, group_id: &str) -> Result<(), PalaverError> {
        self.typing.lock().unwrap().push(group_id.to_string());
        Ok(())
    }
}
