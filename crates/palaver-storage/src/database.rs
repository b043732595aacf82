// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use std::path::Path;

use palaver_core::PalaverError;
use tracing::debug;

use crate::migrations;

/// Handle to the SQLite database behind a tokio-rusqlite connection.
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path`, applies PRAGMAs,
    /// and runs pending migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, PalaverError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PalaverError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| PalaverError::Storage {
                source: Box::new(e),
            })?;

        let journal = if wal_mode { "WAL" } else { "DELETE" };
        let pragmas = format!(
            "PRAGMA journal_mode={journal};
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;"
        );
        conn.call(move |conn| {
            conn.execute_batch(&pragmas)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        // Run embedded migrations on the same connection thread.
        conn.call(move |conn| Ok(migrations::run_migrations(conn)))
            .await
            .map_err(map_tr_err)??;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// Returns the underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoints the WAL and releases the connection.
    pub async fn close(&self) -> Result<(), PalaverError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

/// Maps a tokio-rusqlite error into the workspace storage error.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> PalaverError {
    PalaverError::Storage {
        source: Box::new(e),
    }
}
