// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation role resolution and permission lookup.
//!
//! Roles are arbitrary string labels. Two built-in roles exist as defaults
//! ("admin" = all permissions, "member" = send-prompt only), overridable per
//! conversation through `permissions.<role>` config entries. The
//! non-assignable "system" role always holds every permission and never
//! touches storage.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use palaver_core::types::{ROLE_ADMIN, ROLE_MEMBER, ROLE_SYSTEM, now_ms};
use palaver_core::{PalaverError, Permission, StorageAdapter};
use tracing::debug;

/// Config marker recording that seed admins were granted for a conversation.
const SEEDED_MARKER_KEY: &str = "admin.seeded";

/// Resolves caller roles and role permission sets for conversations.
///
/// Holds all bootstrap state explicitly: the seed-admin list, the system
/// caller set, and a per-process memo of already-seeded conversations.
pub struct PermissionResolver {
    storage: Arc<dyn StorageAdapter>,
    seed_admins: Vec<String>,
    system_callers: HashSet<String>,
    seeded: Mutex<HashSet<String>>,
}

impl PermissionResolver {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        seed_admins: Vec<String>,
        system_callers: Vec<String>,
    ) -> Self {
        Self {
            storage,
            seed_admins,
            system_callers: system_callers.into_iter().collect(),
            seeded: Mutex::new(HashSet::new()),
        }
    }

    /// Resolves the caller's role in the conversation.
    ///
    /// System callers short-circuit to the "system" role. On first sight of
    /// a conversation, seed admins receive the admin role (recorded once per
    /// conversation lifetime). Everyone else is ensured a default "member"
    /// record, never downgrading an existing grant.
    pub async fn resolve_role(
        &self,
        group_id: &str,
        caller_id: &str,
    ) -> Result<String, PalaverError> {
        if self.system_callers.contains(caller_id) {
            return Ok(ROLE_SYSTEM.to_string());
        }

        self.seed_admins_once(group_id).await?;

        let now = now_ms();
        self.storage
            .ensure_role(group_id, caller_id, ROLE_MEMBER, ROLE_SYSTEM, now)
            .await?;
        let role = self
            .storage
            .get_role(group_id, caller_id)
            .await?
            .unwrap_or_else(|| ROLE_MEMBER.to_string());
        Ok(role)
    }

    /// Grants the admin role to every seed id, once per conversation.
    ///
    /// A durable config marker makes this once-per-conversation-lifetime;
    /// the in-process memo makes repeated calls cheap.
    async fn seed_admins_once(&self, group_id: &str) -> Result<(), PalaverError> {
        if self.seed_admins.is_empty() {
            return Ok(());
        }
        if self.seeded.lock().unwrap().contains(group_id) {
            return Ok(());
        }

        let already = self
            .storage
            .get_config(group_id, SEEDED_MARKER_KEY)
            .await?
            .is_some();
        if !already {
            let now = now_ms();
            for seed in &self.seed_admins {
                self.storage
                    .ensure_role(group_id, seed, ROLE_ADMIN, ROLE_SYSTEM, now)
                    .await?;
            }
            self.storage
                .set_config(group_id, SEEDED_MARKER_KEY, "true", ROLE_SYSTEM, now)
                .await?;
            debug!(
                group_id,
                seeds = self.seed_admins.len(),
                "seed admins granted"
            );
        }

        self.seeded.lock().unwrap().insert(group_id.to_string());
        Ok(())
    }

    /// The permission set a role resolves to in the conversation.
    ///
    /// "system" always yields the full set. A stored `permissions.<role>`
    /// override wins over built-in defaults and may be empty, including for
    /// a previously-default role whose override clears it.
    pub async fn role_permissions(
        &self,
        group_id: &str,
        role: &str,
    ) -> Result<HashSet<Permission>, PalaverError> {
        if role == ROLE_SYSTEM {
            return Ok(Permission::all());
        }
        let key = format!("permissions.{role}");
        if let Some(raw) = self.storage.get_config(group_id, &key).await? {
            return Ok(parse_permission_list(&raw));
        }
        Ok(default_role_permissions(role))
    }

    /// Set-membership check over [`Self::role_permissions`].
    pub async fn has_permission(
        &self,
        group_id: &str,
        role: &str,
        permission: Permission,
    ) -> Result<bool, PalaverError> {
        Ok(self
            .role_permissions(group_id, role)
            .await?
            .contains(&permission))
    }
}

/// Parses a comma list of permission tokens, silently discarding any token
/// not in the closed enumeration.
pub fn parse_permission_list(raw: &str) -> HashSet<Permission> {
    raw.split(',')
        .filter_map(|token| Permission::from_str(token.trim()).ok())
        .collect()
}

/// Built-in defaults for known roles; unknown custom roles with no override
/// resolve to the empty set.
pub fn default_role_permissions(role: &str) -> HashSet<Permission> {
    match role {
        ROLE_ADMIN => Permission::all(),
        ROLE_MEMBER => [Permission::SendPrompt].into_iter().collect(),
        _ => HashSet::new(),
    }
}
