// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled task CRUD and due-task selection.

use palaver_core::traits::storage::NewTask;
use palaver_core::PalaverError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::ScheduledTask;

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<ScheduledTask, rusqlite::Error> {
    Ok(ScheduledTask {
        id: row.get(0)?,
        group_id: row.get(1)?,
        cron: row.get(2)?,
        prompt: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        silent: row.get::<_, i64>(5)? != 0,
        next_run: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const TASK_COLUMNS: &str =
    "id, group_id, cron, prompt, active, silent, next_run, created_by, created_at, updated_at";

/// Creates a task and returns its id.
pub async fn create_task(db: &Database, task: &NewTask, now: i64) -> Result<i64, PalaverError> {
    let task = task.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_tasks
                     (group_id, cron, prompt, active, silent, next_run, created_by,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?7)",
                params![
                    task.group_id,
                    task.cron,
                    task.prompt,
                    task.silent as i64,
                    task.next_run,
                    task.created_by,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch a task by id.
pub async fn get_task(db: &Database, id: i64) -> Result<Option<ScheduledTask>, PalaverError> {
    db.connection()
        .call(move |conn| {
            let task = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                    params![id],
                    |row| row_to_task(row),
                )
                .optional()?;
            Ok(task)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All tasks for a group, oldest first.
pub async fn list_tasks(db: &Database, group_id: &str) -> Result<Vec<ScheduledTask>, PalaverError> {
    let group_id = group_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE group_id = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![group_id], |row| row_to_task(row))?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Flips the active flag. Returns false when the task does not exist.
pub async fn set_task_active(
    db: &Database,
    id: i64,
    active: bool,
    now: i64,
) -> Result<bool, PalaverError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE scheduled_tasks SET active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active as i64, now],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Deletes a task. Returns false when the task does not exist.
pub async fn delete_task(db: &Database, id: i64) -> Result<bool, PalaverError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Active tasks whose next_run is at or before `now`, oldest next_run first.
pub async fn due_tasks(db: &Database, now: i64) -> Result<Vec<ScheduledTask>, PalaverError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                 WHERE active = 1 AND next_run <= ?1
                 ORDER BY next_run ASC"
            ))?;
            let rows = stmt.query_map(params![now], |row| row_to_task(row))?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Persists a task's next occurrence.
pub async fn set_task_next_run(
    db: &Database,
    id: i64,
    next_run: i64,
    now: i64,
) -> Result<(), PalaverError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE scheduled_tasks SET next_run = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, next_run, now],
            )?;
            Ok(())
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

    fn make_task(next_run: i64) -> NewTask {
        NewTask {
            group_id: "g1".to_string(),
            cron: "0 9 * * *".to_string(),
            prompt: "daily digest".to_string(),
            silent: false,
            next_run,
            created_by: "telegram:u1".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_list_tasks() {
        let (db, _dir) = open_db_with_group().await;

        let id = create_task(&db, &make_task(5000), 1000).await.unwrap();
        assert!(id > 0);

        let tasks = list_tasks(&db, "g1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].cron, "0 9 * * *");
        assert!(tasks[0].active);
        assert!(!tasks[0].silent);
        assert_eq!(tasks[0].created_by, "telegram:u1");
    }

    #[tokio::test]
    async fn due_tasks_respects_active_flag_and_deadline() {
        let (db, _dir) = open_db_with_group().await;

        let due = create_task(&db, &make_task(5000), 1000).await.unwrap();
        let future = create_task(&db, &make_task(99_000), 1000).await.unwrap();
        let paused = create_task(&db, &make_task(5000), 1000).await.unwrap();
        assert!(set_task_active(&db, paused, false, 1100).await.unwrap());

        let picked = due_tasks(&db, 6000).await.unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, due);
        assert_ne!(picked[0].id, future);
    }

    #[tokio::test]
    async fn next_run_advance_removes_task_from_due_set() {
        let (db, _dir) = open_db_with_group().await;
        let id = create_task(&db, &make_task(5000), 1000).await.unwrap();

        set_task_next_run(&db, id, 90_000, 6000).await.unwrap();
        assert!(due_tasks(&db, 6000).await.unwrap().is_empty());

        let task = get_task(&db, id).await.unwrap().unwrap();
        assert_eq!(task.next_run, 90_000);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (db, _dir) = open_db_with_group().await;
        let id = create_task(&db, &make_task(5000), 1000).await.unwrap();

        assert!(delete_task(&db, id).await.unwrap());
        assert!(!delete_task(&db, id).await.unwrap());
        assert!(get_task(&db, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let (db, _dir) = open_db_with_group().await;
        let id = create_task(&db, &make_task(5000), 1000).await.unwrap();

        set_task_active(&db, id, false, 2000).await.unwrap();
        assert!(!get_task(&db, id).await.unwrap().unwrap().active);

        set_task_active(&db, id, true, 3000).await.unwrap();
        assert!(get_task(&db, id).await.unwrap().unwrap().active);
    }
}
