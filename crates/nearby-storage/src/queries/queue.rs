// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable work queue of origins awaiting recomputation.
//!
//! One row per origin (`origin_id` is unique). Enqueueing an origin whose
//! row is completed or failed resets that row in place; enqueueing while a
//! row is pending or processing is a no-op. Every transition is a single
//! conditional statement, so concurrent callers cannot double-claim.

use chrono::{DateTime, Utc};
use nearby_core::time::format_ts;
use nearby_core::{EntityType, NearbyError, QueueItem, QueueStats, QueueStatus};
use rusqlite::{OptionalExtension, params};

use super::{enum_col, opt_ts_col, ts_col};
use crate::database::{Database, map_tr_err};

const SELECT_COLUMNS: &str = "SELECT id, origin_id, origin_type, priority, status, attempts,
        max_attempts, error_message, created_at, updated_at, processed_at
     FROM nearby_queue";

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        origin_id: row.get(1)?,
        origin_type: enum_col(row, 2)?,
        priority: row.get(3)?,
        status: enum_col(row, 4)?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        error_message: row.get(7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
        processed_at: opt_ts_col(row, 10)?,
    })
}

/// Enqueue an origin for recomputation.
///
/// Returns the queue item id when a row was created or a finished row was
/// reset to pending, and `None` when the origin already has an active item.
/// A successful enqueue also drops the origin's processed-history record.
pub async fn enqueue(
    db: &Database,
    origin_id: i64,
    origin_type: EntityType,
    priority: i32,
    max_attempts: i32,
    now: DateTime<Utc>,
) -> Result<Option<i64>, NearbyError> {
    let origin_type = origin_type.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "INSERT INTO nearby_queue
                    (origin_id, origin_type, priority, status, attempts, max_attempts,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?5)
                 ON CONFLICT(origin_id) DO UPDATE SET
                    origin_type = excluded.origin_type,
                    priority = excluded.priority,
                    status = 'pending',
                    attempts = 0,
                    max_attempts = excluded.max_attempts,
                    error_message = NULL,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    processed_at = NULL
                 WHERE nearby_queue.status IN ('completed', 'failed')",
                params![origin_id, origin_type, priority, max_attempts, now],
            )?;
            if changed == 0 {
                tx.commit()?;
                return Ok(None);
            }
            let id: i64 = tx.query_row(
                "SELECT id FROM nearby_queue WHERE origin_id = ?1",
                params![origin_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "DELETE FROM processed_history WHERE origin_id = ?1",
                params![origin_id],
            )?;
            tx.commit()?;
            Ok(Some(id))
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a queue item by id.
pub async fn get(db: &Database, id: i64) -> Result<Option<QueueItem>, NearbyError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_item,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch the queue row for an origin, whatever its status.
pub async fn find_by_origin(
    db: &Database,
    origin_id: i64,
) -> Result<Option<QueueItem>, NearbyError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE origin_id = ?1"),
                params![origin_id],
                row_to_item,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Up to `limit` pending items, highest priority first, then oldest first.
///
/// Read-only: items stay pending until claimed with [`mark_processing`].
pub async fn dequeue_batch(db: &Database, limit: usize) -> Result<Vec<QueueItem>, NearbyError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS}
                 WHERE status = 'pending'
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_item)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Claim a pending item. Returns false if it was not pending any more.
pub async fn mark_processing(
    db: &Database,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool, NearbyError> {
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE nearby_queue SET status = 'processing', updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark an item completed.
pub async fn mark_completed(db: &Database, id: i64, now: DateTime<Utc>) -> Result<(), NearbyError> {
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE nearby_queue SET status = 'completed', error_message = NULL,
                    updated_at = ?2, processed_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failed attempt.
///
/// Increments attempts. Once attempts reach max_attempts the item becomes
/// failed, otherwise it returns to pending. Returns the resulting status,
/// or `None` if the item does not exist.
pub async fn mark_failed(
    db: &Database,
    id: i64,
    error: &str,
    now: DateTime<Utc>,
) -> Result<Option<QueueStatus>, NearbyError> {
    let error = error.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let counts: Option<(i32, i32)> = tx
                .query_row(
                    "SELECT attempts, max_attempts FROM nearby_queue WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((attempts, max_attempts)) = counts else {
                return Ok(None);
            };

            let attempts = attempts + 1;
            let status = if attempts >= max_attempts {
                QueueStatus::Failed
            } else {
                QueueStatus::Pending
            };
            let processed_at = (status == QueueStatus::Failed).then(|| now.clone());
            tx.execute(
                "UPDATE nearby_queue SET status = ?2, attempts = ?3, error_message = ?4,
                    updated_at = ?5, processed_at = ?6
                 WHERE id = ?1",
                params![id, status.to_string(), attempts, error, now, processed_at],
            )?;
            tx.commit()?;
            Ok(Some(status))
        })
        .await
        .map_err(map_tr_err)
}

/// Return an item to pending without consuming an attempt.
pub async fn defer(
    db: &Database,
    id: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), NearbyError> {
    let reason = reason.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE nearby_queue SET status = 'pending', error_message = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, reason, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Fail an item immediately, regardless of remaining attempts.
pub async fn fail_permanently(
    db: &Database,
    id: i64,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), NearbyError> {
    let error = error.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE nearby_queue SET status = 'failed', attempts = attempts + 1,
                    error_message = ?2, updated_at = ?3, processed_at = ?3
                 WHERE id = ?1",
                params![id, error, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Result of a stuck-item sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub requeued: usize,
    pub failed: usize,
}

/// Recover items stuck in processing since before `cutoff`.
///
/// Each recovered item is charged one attempt, like any other failure.
pub async fn sweep_stuck(
    db: &Database,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<SweepResult, NearbyError> {
    let cutoff = format_ts(cutoff);
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let failed = tx.execute(
                "UPDATE nearby_queue SET status = 'failed', attempts = attempts + 1,
                    error_message = 'processing timed out', updated_at = ?2, processed_at = ?2
                 WHERE status = 'processing' AND updated_at < ?1
                   AND attempts + 1 >= max_attempts",
                params![cutoff, now],
            )?;
            let requeued = tx.execute(
                "UPDATE nearby_queue SET status = 'pending', attempts = attempts + 1,
                    error_message = 'processing timed out', updated_at = ?2
                 WHERE status = 'processing' AND updated_at < ?1",
                params![cutoff, now],
            )?;
            tx.commit()?;
            Ok(SweepResult { requeued, failed })
        })
        .await
        .map_err(map_tr_err)
}

/// Delete completed and failed rows last touched before `cutoff`.
pub async fn purge_finished(db: &Database, cutoff: DateTime<Utc>) -> Result<usize, NearbyError> {
    let cutoff = format_ts(cutoff);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM nearby_queue
                 WHERE status IN ('completed', 'failed') AND updated_at < ?1",
                params![cutoff],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Put every failed item back to pending with a fresh attempt budget.
pub async fn reset_failed(db: &Database, now: DateTime<Utc>) -> Result<usize, NearbyError> {
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE nearby_queue SET status = 'pending', attempts = 0, error_message = NULL,
                    updated_at = ?1, processed_at = NULL
                 WHERE status = 'failed'",
                params![now],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Number of pending items.
pub async fn pending_count(db: &Database) -> Result<u64, NearbyError> {
    db.connection()
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM nearby_queue WHERE status = 'pending'",
                [],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n.max(0) as u64)
        .map_err(map_tr_err)
}

/// Counts per status and the most recent error message.
pub async fn stats(db: &Database) -> Result<QueueStats, NearbyError> {
    db.connection()
        .call(|conn| {
            let mut stats = QueueStats::default();
            {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM nearby_queue GROUP BY status")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let status: String = row.get(0)?;
                    let count = row.get::<_, i64>(1)?.max(0) as u64;
                    match status.as_str() {
                        "pending" => stats.pending = count,
                        "processing" => stats.processing = count,
                        "completed" => stats.completed = count,
                        "failed" => stats.failed = count,
                        _ => {}
                    }
                }
            }
            stats.last_error = conn
                .query_row(
                    "SELECT error_message FROM nearby_queue
                     WHERE error_message IS NOT NULL
                     ORDER BY updated_at DESC, id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(stats)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::queries::history;
    use crate::queries::test_support::{setup_db, t0};

    #[tokio::test]
    async fn enqueue_twice_keeps_one_active_item() {
        let (db, _dir) = setup_db().await;

        let first = enqueue(&db, 42, EntityType::Poi, 5, 3, t0()).await.unwrap();
        let second = enqueue(&db, 42, EntityType::Poi, 9, 3, t0()).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let stats = stats(&db).await.unwrap();
        assert_eq!(stats.pending, 1);

        // Priority of the active item is untouched by the ignored enqueue.
        let item = find_by_origin(&db, 42).await.unwrap().unwrap();
        assert_eq!(item.priority, 5);
    }

    #[tokio::test]
    async fn enqueue_resets_finished_row_and_drops_history() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, 7, EntityType::RvSpot, 5, 3, t0())
            .await
            .unwrap()
            .unwrap();
        assert!(mark_processing(&db, id, t0()).await.unwrap());
        mark_completed(&db, id, t0()).await.unwrap();
        history::upsert(
            &db,
            &nearby_core::ProcessedRecord {
                origin_id: 7,
                origin_type: EntityType::RvSpot,
                candidate_count: 3,
                api_calls: 1,
                processing_ms: 120,
                provider: nearby_core::Provider::Routing,
                cache_bytes: 512,
                processed_at: t0(),
            },
        )
        .await
        .unwrap();

        let later = t0() + Duration::minutes(5);
        let again = enqueue(&db, 7, EntityType::RvSpot, 10, 3, later).await.unwrap();
        assert_eq!(again, Some(id));

        let item = get(&db, id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.priority, 10);
        assert_eq!(item.attempts, 0);
        assert!(item.processed_at.is_none());
        assert!(history::get(&db, 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_orders_by_priority_then_age() {
        let (db, _dir) = setup_db().await;
        enqueue(&db, 1, EntityType::Poi, 5, 3, t0()).await.unwrap();
        enqueue(&db, 2, EntityType::Poi, 10, 3, t0() + Duration::seconds(1))
            .await
            .unwrap();
        enqueue(&db, 3, EntityType::Poi, 5, 3, t0() + Duration::seconds(2))
            .await
            .unwrap();

        let batch = dequeue_batch(&db, 10).await.unwrap();
        let origins: Vec<i64> = batch.iter().map(|i| i.origin_id).collect();
        assert_eq!(origins, vec![2, 1, 3]);

        let limited = dequeue_batch(&db, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn mark_processing_is_conditional() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, 1, EntityType::Poi, 5, 3, t0())
            .await
            .unwrap()
            .unwrap();
        assert!(mark_processing(&db, id, t0()).await.unwrap());
        assert!(!mark_processing(&db, id, t0()).await.unwrap());
        assert!(dequeue_batch(&db, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_exhaust_attempts() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, 1, EntityType::Poi, 5, 2, t0())
            .await
            .unwrap()
            .unwrap();

        mark_processing(&db, id, t0()).await.unwrap();
        let status = mark_failed(&db, id, "boom", t0()).await.unwrap();
        assert_eq!(status, Some(QueueStatus::Pending));

        mark_processing(&db, id, t0()).await.unwrap();
        let status = mark_failed(&db, id, "boom again", t0()).await.unwrap();
        assert_eq!(status, Some(QueueStatus::Failed));

        let item = get(&db, id).await.unwrap().unwrap();
        assert_eq!(item.attempts, 2);
        assert_eq!(item.error_message.as_deref(), Some("boom again"));
        assert_eq!(mark_failed(&db, 999, "x", t0()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn defer_does_not_consume_attempts() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, 1, EntityType::Poi, 5, 3, t0())
            .await
            .unwrap()
            .unwrap();
        mark_processing(&db, id, t0()).await.unwrap();
        defer(&db, id, "rate_limited", t0()).await.unwrap();

        let item = get(&db, id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.error_message.as_deref(), Some("rate_limited"));
    }

    #[tokio::test]
    async fn sweep_recovers_stuck_items() {
        let (db, _dir) = setup_db().await;
        let a = enqueue(&db, 1, EntityType::Poi, 5, 3, t0())
            .await
            .unwrap()
            .unwrap();
        let b = enqueue(&db, 2, EntityType::Poi, 5, 1, t0())
            .await
            .unwrap()
            .unwrap();
        mark_processing(&db, a, t0()).await.unwrap();
        mark_processing(&db, b, t0()).await.unwrap();

        let later = t0() + Duration::minutes(20);
        let result = sweep_stuck(&db, later - Duration::minutes(10), later)
            .await
            .unwrap();
        assert_eq!(result, SweepResult { requeued: 1, failed: 1 });

        assert_eq!(get(&db, a).await.unwrap().unwrap().status, QueueStatus::Pending);
        assert_eq!(get(&db, b).await.unwrap().unwrap().status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn purge_and_reset() {
        let (db, _dir) = setup_db().await;
        let done = enqueue(&db, 1, EntityType::Poi, 5, 3, t0())
            .await
            .unwrap()
            .unwrap();
        let dead = enqueue(&db, 2, EntityType::Poi, 5, 3, t0())
            .await
            .unwrap()
            .unwrap();
        mark_completed(&db, done, t0()).await.unwrap();
        fail_permanently(&db, dead, "missing coordinates", t0())
            .await
            .unwrap();

        assert_eq!(reset_failed(&db, t0()).await.unwrap(), 1);
        assert_eq!(get(&db, dead).await.unwrap().unwrap().status, QueueStatus::Pending);

        let purged = purge_finished(&db, t0() + Duration::days(31)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(get(&db, done).await.unwrap().is_none());
        assert_eq!(pending_count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stats_report_last_error() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, 1, EntityType::Poi, 5, 3, t0())
            .await
            .unwrap()
            .unwrap();
        enqueue(&db, 2, EntityType::ChargingLocation, 5, 3, t0())
            .await
            .unwrap();
        fail_permanently(&db, id, "missing coordinates", t0())
            .await
            .unwrap();

        let stats = stats(&db).await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.last_error.as_deref(), Some("missing coordinates"));
    }
}
