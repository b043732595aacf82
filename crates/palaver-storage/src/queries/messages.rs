// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only message log operations.

use std::str::FromStr;

use palaver_core::traits::storage::NewMessage;
use palaver_core::PalaverError;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::{MessageRole, StoredMessage};

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<StoredMessage, rusqlite::Error> {
    let role_text: String = row.get(2)?;
    let role = MessageRole::from_str(&role_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let attachments_json: String = row.get(4)?;
    let attachments: Vec<String> = serde_json::from_str(&attachments_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(StoredMessage {
        id: row.get(0)?,
        group_id: row.get(1)?,
        role,
        content: row.get(3)?,
        attachments,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Appends a message and returns its monotonic id.
pub async fn append_message(
    db: &Database,
    msg: &NewMessage,
    now: i64,
) -> Result<i64, PalaverError> {
    let group_id = msg.group_id.clone();
    let role = msg.role.to_string();
    let content = msg.content.clone();
    let attachments = serde_json::to_string(&msg.attachments)
        .map_err(|e| PalaverError::Internal(format!("attachments encode: {e}")))?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO messages (group_id, role, content, attachments, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![group_id, role, content, attachments, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages at or above the group's context floor, oldest first, capped at
/// the `limit` most recent rows.
pub async fn history_since_floor(
    db: &Database,
    group_id: &str,
    limit: i64,
) -> Result<Vec<StoredMessage>, PalaverError> {
    let group_id = group_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.group_id, m.role, m.content, m.attachments,
                        m.created_at, m.updated_at
                 FROM messages m
                 JOIN groups g ON g.id = m.group_id
                 WHERE m.group_id = ?1 AND m.id >= g.context_floor
                 ORDER BY m.id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![group_id, limit], |row| row_to_message(row))?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            // The query walks newest-first to apply the cap; callers want
            // chronological order.
            messages.reverse();
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Highest message id in the group, if any message exists.
pub async fn latest_message_id(
    db: &Database,
    group_id: &str,
) -> Result<Option<i64>, PalaverError> {
    let group_id = group_id.to_string();
    db.connection()
        .call(move |conn| {
            let id = conn
                .query_row(
                    "SELECT MAX(id) FROM messages WHERE group_id = ?1",
                    params![group_id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten();
            Ok(id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::groups::{ensure_group, set_context_floor};
    use tempfile::tempdir;

    async fn open_db_with_group() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        ensure_group(&db, "g1", None, 1000).await.unwrap();
        (db, dir)
    }

    fn make_msg(role: MessageRole, content: &str) -> NewMessage {
        NewMessage {
            group_id: "g1".to_string(),
            role,
            content: content.to_string(),
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn message_ids_are_strictly_increasing() {
        let (db, _dir) = open_db_with_group().await;

        let id1 = append_message(&db, &make_msg(MessageRole::User, "one"), 1001).await.unwrap();
        let id2 = append_message(&db, &make_msg(MessageRole::Assistant, "two"), 1002)
            .await
            .unwrap();
        let id3 = append_message(&db, &make_msg(MessageRole::Ambient, "three"), 1003)
            .await
            .unwrap();
        assert!(id1 < id2 && id2 < id3);
        assert_eq!(latest_message_id(&db, "g1").await.unwrap(), Some(id3));
    }

    #[tokio::test]
    async fn history_is_chronological_and_capped() {
        let (db, _dir) = open_db_with_group().await;
        for i in 0..5 {
            append_message(&db, &make_msg(MessageRole::User, &format!("m{i}")), 1000 + i)
                .await
                .unwrap();
        }

        let all = history_since_floor(&db, "g1", 100).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "m0");
        assert_eq!(all[4].content, "m4");

        // Cap keeps the most recent rows, still oldest-first.
        let capped = history_since_floor(&db, "g1", 2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].content, "m3");
        assert_eq!(capped[1].content, "m4");
    }

    #[tokio::test]
    async fn context_floor_truncates_history_without_deleting() {
        let (db, _dir) = open_db_with_group().await;
        let id1 = append_message(&db, &make_msg(MessageRole::User, "old"), 1001).await.unwrap();
        let id2 = append_message(&db, &make_msg(MessageRole::User, "new"), 1002).await.unwrap();

        set_context_floor(&db, "g1", id2, 2000).await.unwrap();

        let history = history_since_floor(&db, "g1", 100).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "new");

        // Rows below the floor still exist.
        assert_eq!(latest_message_id(&db, "g1").await.unwrap(), Some(id2));
        assert!(id1 < id2);
    }

    #[tokio::test]
    async fn attachments_round_trip() {
        let (db, _dir) = open_db_with_group().await;
        let msg = NewMessage {
            group_id: "g1".to_string(),
            role: MessageRole::User,
            content: "see files".to_string(),
            attachments: vec!["/tmp/a.png".to_string(), "/tmp/b.pdf".to_string()],
        };
        append_message(&db, &msg, 1001).await.unwrap();

        let history = history_since_floor(&db, "g1", 10).await.unwrap();
        assert_eq!(history[0].attachments, msg.attachments);
    }

    #[tokio::test]
    async fn empty_group_has_no_latest_id() {
        let (db, _dir) = open_db_with_group().await;
        assert_eq!(latest_message_id(&db, "g1").await.unwrap(), None);
    }
}
