// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation (group) CRUD operations.

use palaver_core::PalaverError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::Group;

/// Creates the group on first sight, otherwise bumps `updated_at` and adopts
/// a non-empty title when one is supplied. Never resets the context floor.
pub async fn ensure_group(
    db: &Database,
    group_id: &str,
    title: Option<&str>,
    now: i64,
) -> Result<(), PalaverError> {
    let group_id = group_id.to_string();
    let title = title.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO groups (id, title, context_floor, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     title = COALESCE(excluded.title, groups.title),
                     updated_at = excluded.updated_at",
                params![group_id, title, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch a group by id.
pub async fn get_group(db: &Database, group_id: &str) -> Result<Option<Group>, PalaverError> {
    let group_id = group_id.to_string();
    db.connection()
        .call(move |conn| {
            let group = conn
                .query_row(
                    "SELECT id, title, context_floor, created_at, updated_at
                     FROM groups WHERE id = ?1",
                    params![group_id],
                    |row| {
                        Ok(Group {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            context_floor: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(group)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Moves the session boundary. History queries exclude ids below the floor.
pub async fn set_context_floor(
    db: &Database,
    group_id: &str,
    floor: i64,
    now: i64,
) -> Result<(), PalaverError> {
    let group_id = group_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE groups SET context_floor = ?2, updated_at = ?3 WHERE id = ?1",
                params![group_id, floor, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn ensure_group_creates_then_updates() {
        let (db, _dir) = open_db().await;

        ensure_group(&db, "telegram:1", Some("Team chat"), 1000).await.unwrap();
        let group = get_group(&db, "telegram:1").await.unwrap().unwrap();
        assert_eq!(group.title.as_deref(), Some("Team chat"));
        assert_eq!(group.created_at, 1000);
        assert_eq!(group.context_floor, 0);

        // Second sight bumps updated_at, keeps created_at and the title.
        ensure_group(&db, "telegram:1", None, 2000).await.unwrap();
        let group = get_group(&db, "telegram:1").await.unwrap().unwrap();
        assert_eq!(group.created_at, 1000);
        assert_eq!(group.updated_at, 2000);
        assert_eq!(group.title.as_deref(), Some("Team chat"));
    }

    #[tokio::test]
    async fn context_floor_round_trips() {
        let (db, _dir) = open_db().await;
        ensure_group(&db, "g1", None, 1000).await.unwrap();

        set_context_floor(&db, "g1", 42, 2000).await.unwrap();
        let group = get_group(&db, "g1").await.unwrap().unwrap();
        assert_eq!(group.context_floor, 42);
        assert_eq!(group.updated_at, 2000);
    }

    #[tokio::test]
    async fn missing_group_is_none() {
        let (db, _dir) = open_db().await;
        assert!(get_group(&db, "nope").await.unwrap().is_none());
    }
}
