// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing: composes trigger matching, rate limiting, and permission gating
//! into one decision per inbound message.
//!
//! The ordering is load-bearing: trigger before permission, command before
//! generic prompt. An unauthorized user in a multi-party channel that never
//! matches the trigger is silently ignored rather than told they lack
//! permission, so the bot's presence is not leaked.

use std::str::FromStr;
use std::sync::Arc;

use palaver_core::types::{ROLE_SYSTEM, now_ms};
use palaver_core::{ChatCommand, InboundChat, PalaverError, Permission, RouteOutcome, StorageAdapter};
use tracing::debug;

use crate::permissions::PermissionResolver;
use crate::ratelimit::RateLimiter;
use crate::trigger::{TriggerConfig, TriggerMode, match_trigger};

/// Config keys a conversation can override.
const KEY_TRIGGER_PATTERNS: &str = "trigger.patterns";
const KEY_TRIGGER_MODE: &str = "trigger.mode";
const KEY_TRIGGER_CASE: &str = "trigger.case_sensitive";
const KEY_RATELIMIT_MAX: &str = "ratelimit.max_per_window";

/// The permission required to run a reserved command.
pub fn command_permission(command: ChatCommand) -> Permission {
    match command {
        ChatCommand::Stop => Permission::StopRun,
        // Compacting only narrows the caller's own conversation context.
        ChatCommand::Compact => Permission::SendPrompt,
    }
}

/// Routes inbound messages to ignore / assistant / command / denied.
pub struct MessageRouter {
    storage: Arc<dyn StorageAdapter>,
    permissions: Arc<PermissionResolver>,
    ratelimit: Arc<RateLimiter>,
    defaults: TriggerConfig,
}

impl MessageRouter {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        permissions: Arc<PermissionResolver>,
        ratelimit: Arc<RateLimiter>,
        defaults: TriggerConfig,
    ) -> Self {
        Self {
            storage,
            permissions,
            ratelimit,
            defaults,
        }
    }

    /// Decides what to do with one inbound message.
    pub async fn route(&self, inbound: &InboundChat) -> Result<RouteOutcome, PalaverError> {
        let role = self
            .permissions
            .resolve_role(&inbound.group_id, &inbound.caller_id)
            .await?;

        let trigger = self.trigger_config_for(&inbound.group_id).await?;
        let Some(prompt) = match_trigger(&inbound.raw_text, &trigger, inbound.is_direct) else {
            return Ok(RouteOutcome::Ignore);
        };

        // Rate limiting applies only past the trigger gate, so unaddressed
        // chatter is never counted. System callers are exempt.
        if role != ROLE_SYSTEM {
            let override_limit = self.rate_limit_override(&inbound.group_id).await?;
            if !self.ratelimit.is_allowed(
                &inbound.group_id,
                &inbound.caller_id,
                override_limit,
                now_ms(),
            ) {
                debug!(
                    group_id = inbound.group_id.as_str(),
                    caller_id = inbound.caller_id.as_str(),
                    "rate limit exceeded"
                );
                return Ok(RouteOutcome::Denied {
                    reason: "Rate limit exceeded. Try again in a minute.".to_string(),
                });
            }
        }

        // Reserved command words take priority over the generic prompt path.
        let word = prompt.trim().to_lowercase();
        if let Ok(command) = ChatCommand::from_str(&word) {
            let required = command_permission(command);
            if self
                .permissions
                .has_permission(&inbound.group_id, &role, required)
                .await?
            {
                return Ok(RouteOutcome::Command { command });
            }
            return Ok(RouteOutcome::Denied {
                reason: format!("You need the '{required}' permission to run '{word}'."),
            });
        }

        if self
            .permissions
            .has_permission(&inbound.group_id, &role, Permission::SendPrompt)
            .await?
        {
            Ok(RouteOutcome::Assistant { prompt })
        } else {
            Ok(RouteOutcome::Denied {
                reason: "You need the 'send-prompt' permission to talk to the assistant."
                    .to_string(),
            })
        }
    }

    /// The conversation's trigger config: stored overrides merged over the
    /// process defaults.
    async fn trigger_config_for(&self, group_id: &str) -> Result<TriggerConfig, PalaverError> {
        let mut config = self.defaults.clone();

        if let Some(raw) = self.storage.get_config(group_id, KEY_TRIGGER_PATTERNS).await? {
            let patterns: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !patterns.is_empty() {
                config.patterns = patterns;
            }
        }
        if let Some(raw) = self.storage.get_config(group_id, KEY_TRIGGER_MODE).await? {
            if let Ok(mode) = TriggerMode::from_str(raw.trim()) {
                config.mode = mode;
            }
        }
        if let Some(raw) = self.storage.get_config(group_id, KEY_TRIGGER_CASE).await? {
            config.case_sensitive = raw.trim() == "true";
        }

        Ok(config)
    }

    async fn rate_limit_override(&self, group_id: &str) -> Result<Option<usize>, PalaverError> {
        Ok(self
            .storage
            .get_config(group_id, KEY_RATELIMIT_MAX)
            .await?
            .and_then(|v| v.trim().parse().ok()))
    }
}
