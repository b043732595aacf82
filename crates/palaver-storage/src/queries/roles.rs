// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-conversation role grant operations.

use palaver_core::PalaverError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::GroupRole;

/// The caller's stored role in the group, if any grant exists.
pub async fn get_role(
    db: &Database,
    group_id: &str,
    caller_id: &str,
) -> Result<Option<String>, PalaverError> {
    let group_id = group_id.to_string();
    let caller_id = caller_id.to_string();
    db.connection()
        .call(move |conn| {
            let role = conn
                .query_row(
                    "SELECT role FROM group_roles WHERE group_id = ?1 AND caller_id = ?2",
                    params![group_id, caller_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(role)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Upserts the caller's role.
pub async fn set_role(
    db: &Database,
    group_id: &str,
    caller_id: &str,
    role: &str,
    granted_by: &str,
    now: i64,
) -> Result<(), PalaverError> {
    let group_id = group_id.to_string();
    let caller_id = caller_id.to_string();
    let role = role.to_string();
    let granted_by = granted_by.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO group_roles (group_id, caller_id, role, granted_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(group_id, caller_id) DO UPDATE SET
                     role = excluded.role,
                     granted_by = excluded.granted_by,
                     updated_at = excluded.updated_at",
                params![group_id, caller_id, role, granted_by, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Inserts the role only when no grant exists yet; never overwrites.
pub async fn ensure_role(
    db: &Database,
    group_id: &str,
    caller_id: &str,
    role: &str,
    granted_by: &str,
    now: i64,
) -> Result<(), PalaverError> {
    let group_id = group_id.to_string();
    let caller_id = caller_id.to_string();
    let role = role.to_string();
    let granted_by = granted_by.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_roles
                     (group_id, caller_id, role, granted_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![group_id, caller_id, role, granted_by, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Removes the caller's grant. Returns false when none existed.
pub async fn remove_role(
    db: &Database,
    group_id: &str,
    caller_id: &str,
) -> Result<bool, PalaverError> {
    let group_id = group_id.to_string();
    let caller_id = caller_id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM group_roles WHERE group_id = ?1 AND caller_id = ?2",
                params![group_id, caller_id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All grants in a group, oldest first.
pub async fn list_roles(db: &Database, group_id: &str) -> Result<Vec<GroupRole>, PalaverError> {
    let group_id = group_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, caller_id, role, granted_by, created_at, updated_at
                 FROM group_roles WHERE group_id = ?1 ORDER BY created_at ASC, caller_id ASC",
            )?;
            let rows = stmt.query_map(params![group_id], |row| {
                Ok(GroupRole {
                    group_id: row.get(0)?,
                    caller_id: row.get(1)?,
                    role: row.get(2)?,
                    granted_by: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?;
            let mut roles = Vec::new();
            for row in rows {
                roles.push(row?);
            }
            Ok(roles)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
