// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. [`Database`] is the single writer: query modules accept
//! `&Database` and run their statements inside `connection().call()`.
//! Multi-statement operations (claim a lock, reset a queue row and drop its
//! history) run inside one closure and are therefore atomic with respect to
//! every other caller. Do NOT open additional connections for writes.

use std::path::Path;

use nearby_core::NearbyError;
use tracing::{debug, info};

use crate::migrations;

/// Handle to the engine's SQLite database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database at `path` with WAL enabled and apply
    /// pending migrations.
    pub async fn open(path: &str) -> Result<Self, NearbyError> {
        Self::open_with(path, true).await
    }

    /// Open the database, choosing the journal mode explicitly.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, NearbyError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| NearbyError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| NearbyError::Storage {
                source: Box::new(e),
            })?;

        let journal = if wal_mode { "WAL" } else { "DELETE" };
        conn.call(move |conn| -> Result<(), NearbyError> {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = {journal};
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;"
            ))
            .map_err(|e| NearbyError::Storage {
                source: Box::new(e),
            })?;
            migrations::run_migrations(conn)
        })
        .await
        .map_err(flatten_call_err)?;

        info!(path, journal, "database opened");
        Ok(Self { conn })
    }

    /// Open from the storage section of the configuration.
    pub async fn open_from_config(
        config: &nearby_config::model::StorageConfig,
    ) -> Result<Self, NearbyError> {
        Self::open_with(&config.database_path, config.wal_mode).await
    }

    /// The underlying async connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Flush the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), NearbyError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint and close the connection.
    pub async fn close(self) -> Result<(), NearbyError> {
        self.checkpoint().await?;
        self.conn.close().await.map_err(|e| NearbyError::Storage {
            source: Box::new(e),
        })
    }
}

/// Map a tokio-rusqlite call error into a storage error.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> NearbyError {
    NearbyError::Storage {
        source: Box::new(e),
    }
}

/// Unwrap a closure that already produced a `NearbyError`.
pub(crate) fn flatten_call_err(e: tokio_rusqlite::Error<NearbyError>) -> NearbyError {
    match e {
        tokio_rusqlite::Error::Error(inner) => inner,
        other => NearbyError::Storage {
            source: other.to_string().into(),
        },
    }
}
