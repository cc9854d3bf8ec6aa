// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key-value state with per-key expiry.
//!
//! Backs the token buckets, quota snapshot fields, usage counters,
//! single-flight locks and processor markers. Expired rows are invisible
//! to readers and are physically removed by [`purge_expired`] or when a
//! claim needs the key.

use chrono::{DateTime, Utc};
use nearby_core::NearbyError;
use nearby_core::time::format_ts;
use rusqlite::{OptionalExtension, params};

use super::opt_ts_col;
use crate::database::{Database, map_tr_err};

/// A live state value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What an [`update`] closure wants done with the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateWrite {
    /// Leave the stored value as it is.
    Keep,
    /// Store a new value.
    Put {
        value: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Remove the key.
    Delete,
}

fn read_live(
    conn: &rusqlite::Connection,
    key: &str,
    now: &str,
) -> rusqlite::Result<Option<StateEntry>> {
    conn.query_row(
        "SELECT value, expires_at FROM state_kv
         WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        params![key, now],
        |row| {
            Ok(StateEntry {
                value: row.get(0)?,
                expires_at: opt_ts_col(row, 1)?,
            })
        },
    )
    .optional()
}

fn write(
    conn: &rusqlite::Connection,
    key: &str,
    value: &str,
    expires_at: Option<DateTime<Utc>>,
    now: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO state_kv (key, value, expires_at, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
        params![key, value, expires_at.map(format_ts), now],
    )?;
    Ok(())
}

/// Read a key, ignoring it if expired.
pub async fn get(
    db: &Database,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<StateEntry>, NearbyError> {
    let key = key.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| read_live(conn, &key, &now))
        .await
        .map_err(map_tr_err)
}

/// Write a key, with an optional absolute expiry.
pub async fn put(
    db: &Database,
    key: &str,
    value: &str,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), NearbyError> {
    let key = key.to_string();
    let value = value.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| write(conn, &key, &value, expires_at, &now))
        .await
        .map_err(map_tr_err)
}

/// Delete a key. Returns true if it existed.
pub async fn delete(db: &Database, key: &str) -> Result<bool, NearbyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute("DELETE FROM state_kv WHERE key = ?1", params![key])?;
            Ok(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Create `key` only if it is absent or expired.
///
/// Returns true when this caller now owns the key.
pub async fn try_claim(
    db: &Database,
    key: &str,
    value: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, NearbyError> {
    let key = key.to_string();
    let value = value.to_string();
    let now = format_ts(now);
    let expires_at = format_ts(expires_at);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM state_kv
                 WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![key, now],
            )?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO state_kv (key, value, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, value, expires_at, now],
            )?;
            tx.commit()?;
            Ok(inserted == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete `key` only if it still holds `value`.
///
/// Releasing a claim this way never removes a claim taken over by someone
/// else after ours expired.
pub async fn release(db: &Database, key: &str, value: &str) -> Result<bool, NearbyError> {
    let key = key.to_string();
    let value = value.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM state_kv WHERE key = ?1 AND value = ?2",
                params![key, value],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomic read-modify-write of one key.
///
/// `f` sees the live value (or `None`) and decides what to store. No other
/// storage operation can interleave between the read and the write.
pub async fn update<F, R>(
    db: &Database,
    key: &str,
    now: DateTime<Utc>,
    f: F,
) -> Result<R, NearbyError>
where
    F: FnOnce(Option<StateEntry>) -> (StateWrite, R) + Send + 'static,
    R: Send + 'static,
{
    let key = key.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current = read_live(&tx, &key, &now)?;
            let (action, result) = f(current);
            match action {
                StateWrite::Keep => {}
                StateWrite::Put { value, expires_at } => {
                    write(&tx, &key, &value, expires_at, &now)?;
                }
                StateWrite::Delete => {
                    tx.execute("DELETE FROM state_kv WHERE key = ?1", params![key])?;
                }
            }
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(map_tr_err)
}

/// Live keys starting with `prefix`, in key order.
pub async fn list_prefix(
    db: &Database,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(String, StateEntry)>, NearbyError> {
    let upper = format!("{prefix}\u{10ffff}");
    let prefix = prefix.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, expires_at FROM state_kv
                 WHERE key >= ?1 AND key < ?2
                   AND (expires_at IS NULL OR expires_at > ?3)
                 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(params![prefix, upper, now], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    StateEntry {
                        value: row.get(1)?,
                        expires_at: opt_ts_col(row, 2)?,
                    },
                ))
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Physically remove expired keys.
pub async fn purge_expired(db: &Database, now: DateTime<Utc>) -> Result<usize, NearbyError> {
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM state_kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::queries::test_support::{setup_db, t0};

    #[tokio::test]
    async fn expired_values_are_invisible() {
        let (db, _dir) = setup_db().await;
        put(&db, "k", "v", Some(t0() + Duration::seconds(10)), t0())
            .await
            .unwrap();
        assert_eq!(get(&db, "k", t0()).await.unwrap().unwrap().value, "v");
        assert!(get(&db, "k", t0() + Duration::seconds(10)).await.unwrap().is_none());

        put(&db, "forever", "1", None, t0()).await.unwrap();
        assert!(get(&db, "forever", t0() + Duration::days(365)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_expiry() {
        let (db, _dir) = setup_db().await;
        let ttl = t0() + Duration::seconds(300);
        assert!(try_claim(&db, "lock:1:poi_foot", "a", ttl, t0()).await.unwrap());
        assert!(!try_claim(&db, "lock:1:poi_foot", "b", ttl, t0()).await.unwrap());

        // A stale claim can be taken over.
        let later = t0() + Duration::seconds(301);
        assert!(
            try_claim(&db, "lock:1:poi_foot", "b", later + Duration::seconds(300), later)
                .await
                .unwrap()
        );
        // The first owner's release does not remove the new claim.
        assert!(!release(&db, "lock:1:poi_foot", "a").await.unwrap());
        assert!(release(&db, "lock:1:poi_foot", "b").await.unwrap());
    }

    #[tokio::test]
    async fn update_is_read_modify_write() {
        let (db, _dir) = setup_db().await;
        for _ in 0..3 {
            update(&db, "counter", t0(), |current| {
                let n: u32 = current.and_then(|e| e.value.parse().ok()).unwrap_or(0);
                (
                    StateWrite::Put {
                        value: (n + 1).to_string(),
                        expires_at: None,
                    },
                    n + 1,
                )
            })
            .await
            .unwrap();
        }
        assert_eq!(get(&db, "counter", t0()).await.unwrap().unwrap().value, "3");

        let seen = update(&db, "counter", t0(), |current| (StateWrite::Delete, current))
            .await
            .unwrap();
        assert_eq!(seen.unwrap().value, "3");
        assert!(get(&db, "counter", t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_prefix_and_purge() {
        let (db, _dir) = setup_db().await;
        put(&db, "lock:1", "a", Some(t0() + Duration::seconds(5)), t0()).await.unwrap();
        put(&db, "lock:2", "b", Some(t0() + Duration::seconds(50)), t0()).await.unwrap();
        put(&db, "quota:remaining", "10", None, t0()).await.unwrap();

        let later = t0() + Duration::seconds(10);
        let locks = list_prefix(&db, "lock:", later).await.unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].0, "lock:2");

        assert_eq!(purge_expired(&db, later).await.unwrap(), 1);
        assert!(delete(&db, "quota:remaining").await.unwrap());
    }
}
