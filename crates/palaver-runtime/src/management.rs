// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Management API surface used by the in-sandbox control plane.
//!
//! Every call is scoped by an explicit (caller, conversation) pair supplied
//! out-of-band by the transport layer and is subject to the same permission
//! checks as chat-originated commands.

use std::str::FromStr;
use std::sync::Arc;

use palaver_core::traits::storage::NewTask;
use palaver_core::types::{GroupRole, ROLE_SYSTEM, ScheduledTask, now_ms};
use palaver_core::{ChatCommand, PalaverError, Permission};
use palaver_router::TriggerMode;
use tracing::info;

use crate::Orchestrator;

/// The caller's identity within a conversation.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub caller_id: String,
    pub role: String,
    pub permissions: Vec<Permission>,
}

/// A conversation's effective trigger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSettings {
    pub patterns: Vec<String>,
    pub mode: String,
    pub case_sensitive: bool,
}

/// Caller-scoped management operations over one orchestrator instance.
pub struct ManagementApi {
    orchestrator: Arc<Orchestrator>,
}

impl ManagementApi {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Resolves the caller's role and requires `permission`, or fails with a
    /// user-facing denial.
    async fn require(
        &self,
        caller_id: &str,
        group_id: &str,
        permission: Permission,
    ) -> Result<String, PalaverError> {
        let role = self
            .orchestrator
            .permissions
            .resolve_role(group_id, caller_id)
            .await?;
        if self
            .orchestrator
            .permissions
            .has_permission(group_id, &role, permission)
            .await?
        {
            Ok(role)
        } else {
            Err(PalaverError::Denied {
                reason: format!("You need the '{permission}' permission."),
            })
        }
    }

    /// Current caller identity and permission set.
    pub async fn whoami(
        &self,
        caller_id: &str,
        group_id: &str,
    ) -> Result<CallerIdentity, PalaverError> {
        let role = self
            .orchestrator
            .permissions
            .resolve_role(group_id, caller_id)
            .await?;
        let mut permissions: Vec<Permission> = self
            .orchestrator
            .permissions
            .role_permissions(group_id, &role)
            .await?
            .into_iter()
            .collect();
        permissions.sort_by_key(|p| p.to_string());
        Ok(CallerIdentity {
            caller_id: caller_id.to_string(),
            role,
            permissions,
        })
    }

    // --- Scheduled tasks ---

    pub async fn list_tasks(
        &self,
        caller_id: &str,
        group_id: &str,
    ) -> Result<Vec<ScheduledTask>, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageTasks).await?;
        self.orchestrator.storage.list_tasks(group_id).await
    }

    /// Creates a task. The cron expression is validated by computing its
    /// first occurrence.
    pub async fn create_task(
        &self,
        caller_id: &str,
        group_id: &str,
        cron: &str,
        prompt: &str,
        silent: bool,
    ) -> Result<i64, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageTasks).await?;
        let now = now_ms();
        let next_run = palaver_cron::next_occurrence(cron, now)?;
        self.orchestrator.storage.ensure_group(group_id, None, now).await?;
        let id = self
            .orchestrator
            .storage
            .create_task(
                &NewTask {
                    group_id: group_id.to_string(),
                    cron: cron.to_string(),
                    prompt: prompt.to_string(),
                    silent,
                    next_run,
                    created_by: caller_id.to_string(),
                },
                now,
            )
            .await?;
        info!(group_id, task_id = id, cron, "scheduled task created");
        Ok(id)
    }

    pub async fn pause_task(
        &self,
        caller_id: &str,
        group_id: &str,
        task_id: i64,
    ) -> Result<bool, PalaverError> {
        self.set_task_active(caller_id, group_id, task_id, false).await
    }

    pub async fn resume_task(
        &self,
        caller_id: &str,
        group_id: &str,
        task_id: i64,
    ) -> Result<bool, PalaverError> {
        self.set_task_active(caller_id, group_id, task_id, true).await
    }

    async fn set_task_active(
        &self,
        caller_id: &str,
        group_id: &str,
        task_id: i64,
        active: bool,
    ) -> Result<bool, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageTasks).await?;
        if !self.task_in_group(task_id, group_id).await? {
            return Ok(false);
        }
        self.orchestrator
            .storage
            .set_task_active(task_id, active, now_ms())
            .await
    }

    pub async fn delete_task(
        &self,
        caller_id: &str,
        group_id: &str,
        task_id: i64,
    ) -> Result<bool, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageTasks).await?;
        if !self.task_in_group(task_id, group_id).await? {
            return Ok(false);
        }
        self.orchestrator.storage.delete_task(task_id).await
    }

    /// Tasks are scoped to their conversation; ids from other conversations
    /// are treated as nonexistent.
    async fn task_in_group(&self, task_id: i64, group_id: &str) -> Result<bool, PalaverError> {
        Ok(self
            .orchestrator
            .storage
            .get_task(task_id)
            .await?
            .is_some_and(|t| t.group_id == group_id))
    }

    // --- Trigger configuration ---

    /// Effective trigger settings: stored overrides merged over process
    /// defaults.
    pub async fn get_trigger_settings(
        &self,
        caller_id: &str,
        group_id: &str,
    ) -> Result<TriggerSettings, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageConfig).await?;
        let storage = &self.orchestrator.storage;
        let defaults = &self.orchestrator.config.trigger;

        let patterns = match storage.get_config(group_id, "trigger.patterns").await? {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.patterns.clone(),
        };
        let mode = storage
            .get_config(group_id, "trigger.mode")
            .await?
            .unwrap_or_else(|| defaults.mode.clone());
        let case_sensitive = match storage.get_config(group_id, "trigger.case_sensitive").await? {
            Some(raw) => raw.trim() == "true",
            None => defaults.case_sensitive,
        };
        Ok(TriggerSettings {
            patterns,
            mode,
            case_sensitive,
        })
    }

    pub async fn set_trigger_patterns(
        &self,
        caller_id: &str,
        group_id: &str,
        patterns: &[String],
    ) -> Result<(), PalaverError> {
        self.require(caller_id, group_id, Permission::ManageConfig).await?;
        let cleaned: Vec<&str> = patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if cleaned.is_empty() {
            return Err(PalaverError::Config(
                "at least one trigger pattern is required".to_string(),
            ));
        }
        self.orchestrator
            .storage
            .set_config(
                group_id,
                "trigger.patterns",
                &cleaned.join(","),
                caller_id,
                now_ms(),
            )
            .await
    }

    pub async fn set_trigger_mode(
        &self,
        caller_id: &str,
        group_id: &str,
        mode: &str,
    ) -> Result<(), PalaverError> {
        self.require(caller_id, group_id, Permission::ManageConfig).await?;
        let parsed = TriggerMode::from_str(mode.trim()).map_err(|_| {
            PalaverError::Config(format!(
                "trigger mode must be one of prefix/mention/always, got \"{mode}\""
            ))
        })?;
        self.orchestrator
            .storage
            .set_config(
                group_id,
                "trigger.mode",
                &parsed.to_string(),
                caller_id,
                now_ms(),
            )
            .await
    }

    pub async fn set_trigger_case_sensitivity(
        &self,
        caller_id: &str,
        group_id: &str,
        case_sensitive: bool,
    ) -> Result<(), PalaverError> {
        self.require(caller_id, group_id, Permission::ManageConfig).await?;
        self.orchestrator
            .storage
            .set_config(
                group_id,
                "trigger.case_sensitive",
                if case_sensitive { "true" } else { "false" },
                caller_id,
                now_ms(),
            )
            .await
    }

    // --- Roles ---

    pub async fn list_roles(
        &self,
        caller_id: &str,
        group_id: &str,
    ) -> Result<Vec<GroupRole>, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageRoles).await?;
        self.orchestrator.storage.list_roles(group_id).await
    }

    pub async fn grant_role(
        &self,
        caller_id: &str,
        group_id: &str,
        target_id: &str,
        role: &str,
    ) -> Result<(), PalaverError> {
        self.require(caller_id, group_id, Permission::ManageRoles).await?;
        if role == ROLE_SYSTEM {
            return Err(PalaverError::Denied {
                reason: "The 'system' role cannot be assigned.".to_string(),
            });
        }
        self.orchestrator
            .storage
            .set_role(group_id, target_id, role, caller_id, now_ms())
            .await?;
        info!(group_id, target_id, role, granted_by = caller_id, "role granted");
        Ok(())
    }

    pub async fn revoke_role(
        &self,
        caller_id: &str,
        group_id: &str,
        target_id: &str,
    ) -> Result<bool, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageRoles).await?;
        self.orchestrator.storage.remove_role(group_id, target_id).await
    }

    // --- Role permission lists ---

    /// The valid permission tokens a role currently resolves to.
    pub async fn get_role_permissions(
        &self,
        caller_id: &str,
        group_id: &str,
        role: &str,
    ) -> Result<Vec<Permission>, PalaverError> {
        self.require(caller_id, group_id, Permission::ManageRoles).await?;
        let mut permissions: Vec<Permission> = self
            .orchestrator
            .permissions
            .role_permissions(group_id, role)
            .await?
            .into_iter()
            .collect();
        permissions.sort_by_key(|p| p.to_string());
        Ok(permissions)
    }

    /// Stores a role's permission list as a comma string. Unknown tokens are
    /// silently dropped at read time.
    pub async fn set_role_permissions(
        &self,
        caller_id: &str,
        group_id: &str,
        role: &str,
        permission_list: &str,
    ) -> Result<(), PalaverError> {
        self.require(caller_id, group_id, Permission::ManageRoles).await?;
        if role == ROLE_SYSTEM {
            return Err(PalaverError::Denied {
                reason: "The 'system' role cannot be altered.".to_string(),
            });
        }
        self.orchestrator
            .storage
            .set_config(
                group_id,
                &format!("permissions.{role}"),
                permission_list,
                caller_id,
                now_ms(),
            )
            .await
    }

    // --- Run control ---

    /// Stops the active run and drops queued work for the conversation.
    pub async fn stop_run(
        &self,
        caller_id: &str,
        group_id: &str,
    ) -> Result<String, PalaverError> {
        self.require(caller_id, group_id, Permission::StopRun).await?;
        self.orchestrator
            .execute_command(group_id, ChatCommand::Stop)
            .await
    }

    /// Advances the session boundary past the latest message.
    pub async fn compact(
        &self,
        caller_id: &str,
        group_id: &str,
    ) -> Result<String, PalaverError> {
        self.require(caller_id, group_id, Permission::SendPrompt).await?;
        self.orchestrator
            .execute_command(group_id, ChatCommand::Compact)
            .await
    }
}
