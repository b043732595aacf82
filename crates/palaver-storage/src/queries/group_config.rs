// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation key/value config override operations.

use palaver_core::PalaverError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::GroupConfigEntry;

/// Fetch one override value.
pub async fn get_config(
    db: &Database,
    group_id: &str,
    key: &str,
) -> Result<Option<String>, PalaverError> {
    let group_id = group_id.to_string();
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM group_config WHERE group_id = ?1 AND key = ?2",
                    params![group_id, key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Upserts one override, recording who changed it and when.
pub async fn set_config(
    db: &Database,
    group_id: &str,
    key: &str,
    value: &str,
    updated_by: &str,
    now: i64,
) -> Result<(), PalaverError> {
    let group_id = group_id.to_string();
    let key = key.to_string();
    let value = value.to_string();
    let updated_by = updated_by.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO group_config (group_id, key, value, updated_by, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(group_id, key) DO UPDATE SET
                     value = excluded.value,
                     updated_by = excluded.updated_by,
                     updated_at = excluded.updated_at",
                params![group_id, key, value, updated_by, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All overrides for a group, sorted by key.
pub async fn list_config(
    db: &Database,
    group_id: &str,
) -> Result<Vec<GroupConfigEntry>, PalaverError> {
    let group_id = group_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, key, value, updated_by, updated_at
                 FROM group_config WHERE group_id = ?1 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(params![group_id], |row| {
                Ok(GroupConfigEntry {
                    group_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                    updated_by: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::groups::ensure_group;
    use tempfile::tempdir;

    async fn open_db_with_group() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        ensure_group(&db, "g1", None, 1000).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (db, _dir) = open_db_with_group().await;

        set_config(&db, "g1", "trigger.mode", "prefix", "u1", 1000).await.unwrap();
        assert_eq!(
            get_config(&db, "g1", "trigger.mode").await.unwrap().as_deref(),
            Some("prefix")
        );
        assert!(get_config(&db, "g1", "trigger.patterns").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_and_records_updater() {
        let (db, _dir) = open_db_with_group().await;

        set_config(&db, "g1", "permissions.member", "send-prompt", "u1", 1000)
            .await
            .unwrap();
        set_config(&db, "g1", "permissions.member", "", "u2", 2000).await.unwrap();

        let entries = list_config(&db, "g1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "");
        assert_eq!(entries[0].updated_by.as_deref(), Some("u2"));
        assert_eq!(entries[0].updated_at, 2000);
    }
}
