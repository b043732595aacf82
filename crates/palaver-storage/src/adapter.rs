// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use palaver_config::model::StorageConfig;
use palaver_core::traits::storage::{NewMessage, NewTask};
use palaver_core::types::{Group, GroupConfigEntry, GroupRole, ScheduledTask, StoredMessage};
use palaver_core::{
    AdapterType, HealthStatus, PalaverError, PluginAdapter, StorageAdapter,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily initialized on the first
/// call to [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`StorageAdapter::initialize`]
    /// is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, PalaverError> {
        self.db.get().ok_or_else(|| PalaverError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, PalaverError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), PalaverError> {
        // Shutdown delegates to close if the DB was initialized.
        if let Some(db) = self.db.get() {
            db.close().await?;
            debug!("shutdown: storage closed");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), PalaverError> {
        let db = Database::open(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| PalaverError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), PalaverError> {
        self.db()?.close().await
    }

    // --- Conversations ---

    async fn ensure_group(
        &self,
        group_id: &str,
        title: Option<&str>,
        now: i64,
    ) -> Result<(), PalaverError> {
        queries::groups::ensure_group(self.db()?, group_id, title, now).await
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, PalaverError> {
        queries::groups::get_group(self.db()?, group_id).await
    }

    async fn set_context_floor(
        &self,
        group_id: &str,
        floor: i64,
        now: i64,
    ) -> Result<(), PalaverError> {
        queries::groups::set_context_floor(self.db()?, group_id, floor, now).await
    }

    // --- Messages ---

    async fn append_message(&self, msg: &NewMessage, now: i64) -> Result<i64, PalaverError> {
        queries::messages::append_message(self.db()?, msg, now).await
    }

    async fn history_since_floor(
        &self,
        group_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, PalaverError> {
        queries::messages::history_since_floor(self.db()?, group_id, limit).await
    }

    async fn latest_message_id(&self, group_id: &str) -> Result<Option<i64>, PalaverError> {
        queries::messages::latest_message_id(self.db()?, group_id).await
    }

    // --- Scheduled tasks ---

    async fn create_task(&self, task: &NewTask, now: i64) -> Result<i64, PalaverError> {
        queries::tasks::create_task(self.db()?, task, now).await
    }

    async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>, PalaverError> {
        queries::tasks::get_task(self.db()?, id).await
    }

    async fn list_tasks(&self, group_id: &str) -> Result<Vec<ScheduledTask>, PalaverError> {
        queries::tasks::list_tasks(self.db()?, group_id).await
    }

    async fn set_task_active(
        &self,
        id: i64,
        active: bool,
        now: i64,
    ) -> Result<bool, PalaverError> {
        queries::tasks::set_task_active(self.db()?, id, active, now).await
    }

    async fn delete_task(&self, id: i64) -> Result<bool, PalaverError> {
        queries::tasks::delete_task(self.db()?, id).await
    }

    async fn due_tasks(&self, now: i64) -> Result<Vec<ScheduledTask>, PalaverError> {
        queries::tasks::due_tasks(self.db()?, now).await
    }

    async fn set_task_next_run(
        &self,
        id: i64,
        next_run: i64,
        now: i64,
    ) -> Result<(), PalaverError> {
        queries::tasks::set_task_next_run(self.db()?, id, next_run, now).await
    }

    // --- Roles ---

    async fn get_role(
        &self,
        group_id: &str,
        caller_id: &str,
    ) -> Result<Option<String>, PalaverError> {
        queries::roles::get_role(self.db()?, group_id, caller_id).await
    }

    async fn set_role(
        &self,
        group_id: &str,
        caller_id: &str,
        role: &str,
        granted_by: &str,
        now: i64,
    ) -> Result<(), PalaverError> {
        queries::roles::set_role(self.db()?, group_id, caller_id, role, granted_by, now).await
    }

    async fn ensure_role(
        &self,
        group_id: &str,
        caller_id: &str,
        role: &str,
        granted_by: &str,
        now: i64,
    ) -> Result<(), PalaverError> {
        queries::roles::ensure_role(self.db()?, group_id, caller_id, role, granted_by, now).await
    }

    async fn remove_role(&self, group_id: &str, caller_id: &str) -> Result<bool, PalaverError> {
        queries::roles::remove_role(self.db()?, group_id, caller_id).await
    }

    async fn list_roles(&self, group_id: &str) -> Result<Vec<GroupRole>, PalaverError> {
        queries::roles::list_roles(self.db()?, group_id).await
    }

    // --- Per-conversation config overrides ---

    async fn get_config(
        &self,
        group_id: &str,
        key: &str,
    ) -> Result<Option<String>, PalaverError> {
        queries::group_config::get_config(self.db()?, group_id, key).await
    }

    async fn set_config(
        &self,
        group_id: &str,
        key: &str,
        value: &str,
        updated_by: &str,
        now: i64,
    ) -> Result<(), PalaverError> {
        queries::group_config::set_config(self.db()?, group_id, key, value, updated_by, now).await
    }

    async fn list_config(
        &self,
        group_id: &str,
    ) -> Result<Vec<GroupConfigEntry>, PalaverError> {
        queries::group_config::list_config(self.db()?, group_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::MessageRole;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn health_check_fails_when_not_initialized() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("no_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert!(storage.health_check().await.is_err());
    }

    #[tokio::test]
    async fn full_conversation_lifecycle_through_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("lifecycle.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);

        storage.ensure_group("telegram:9", Some("Ops"), 1000).await.unwrap();

        let user_id = storage
            .append_message(
                &NewMessage {
                    group_id: "telegram:9".into(),
                    role: MessageRole::User,
                    content: "summarize this".into(),
                    attachments: vec![],
                },
                1001,
            )
            .await
            .unwrap();
        let asst_id = storage
            .append_message(
                &NewMessage {
                    group_id: "telegram:9".into(),
                    role: MessageRole::Assistant,
                    content: "Summary: ...".into(),
                    attachments: vec![],
                },
                1002,
            )
            .await
            .unwrap();
        assert!(user_id < asst_id);

        let history = storage.history_since_floor("telegram:9", 50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);

        // Compact: advance the boundary past the latest message.
        let latest = storage.latest_message_id("telegram:9").await.unwrap().unwrap();
        storage.set_context_floor("telegram:9", latest + 1, 1003).await.unwrap();
        assert!(storage.history_since_floor("telegram:9", 50).await.unwrap().is_empty());

        // Roles and config overrides.
        storage.set_role("telegram:9", "u1", "admin", "system", 1004).await.unwrap();
        assert_eq!(
            storage.get_role("telegram:9", "u1").await.unwrap().as_deref(),
            Some("admin")
        );
        storage
            .set_config("telegram:9", "trigger.mode", "prefix", "u1", 1005)
            .await
            .unwrap();
        assert_eq!(
            storage.get_config("telegram:9", "trigger.mode").await.unwrap().as_deref(),
            Some("prefix")
        );

        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_checkpoints_when_initialized() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("shutdown.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();
        storage.ensure_group("g1", None, 1000).await.unwrap();

        storage.shutdown().await.unwrap();
    }
}
