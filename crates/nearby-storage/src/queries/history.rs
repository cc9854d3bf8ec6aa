// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processed-history records: the last completed computation per origin.

use chrono::{DateTime, Utc};
use nearby_core::time::format_ts;
use nearby_core::{NearbyError, ProcessedRecord};
use rusqlite::{OptionalExtension, params};

use super::{enum_col, ts_col};
use crate::database::{Database, map_tr_err};

/// Insert or replace the record for an origin.
pub async fn upsert(db: &Database, record: &ProcessedRecord) -> Result<(), NearbyError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO processed_history
                    (origin_id, origin_type, candidate_count, api_calls, processing_ms,
                     provider, cache_bytes, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(origin_id) DO UPDATE SET
                    origin_type = excluded.origin_type,
                    candidate_count = excluded.candidate_count,
                    api_calls = excluded.api_calls,
                    processing_ms = excluded.processing_ms,
                    provider = excluded.provider,
                    cache_bytes = excluded.cache_bytes,
                    processed_at = excluded.processed_at",
                params![
                    record.origin_id,
                    record.origin_type.to_string(),
                    record.candidate_count,
                    record.api_calls,
                    i64::try_from(record.processing_ms).unwrap_or(i64::MAX),
                    record.provider.to_string(),
                    i64::try_from(record.cache_bytes).unwrap_or(i64::MAX),
                    format_ts(record.processed_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch the record for an origin.
pub async fn get(db: &Database, origin_id: i64) -> Result<Option<ProcessedRecord>, NearbyError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT origin_id, origin_type, candidate_count, api_calls, processing_ms,
                        provider, cache_bytes, processed_at
                 FROM processed_history WHERE origin_id = ?1",
                params![origin_id],
                |row| {
                    Ok(ProcessedRecord {
                        origin_id: row.get(0)?,
                        origin_type: enum_col(row, 1)?,
                        candidate_count: row.get(2)?,
                        api_calls: row.get(3)?,
                        processing_ms: row.get::<_, i64>(4)?.max(0) as u64,
                        provider: enum_col(row, 5)?,
                        cache_bytes: row.get::<_, i64>(6)?.max(0) as u64,
                        processed_at: ts_col(row, 7)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete records processed before `cutoff`.
pub async fn purge_before(db: &Database, cutoff: DateTime<Utc>) -> Result<usize, NearbyError> {
    let cutoff = format_ts(cutoff);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM processed_history WHERE processed_at < ?1",
                params![cutoff],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Number of stored records.
pub async fn count(db: &Database) -> Result<u64, NearbyError> {
    db.connection()
        .call(|conn| {
            conn.query_row("SELECT COUNT(*) FROM processed_history", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .await
        .map(|n| n.max(0) as u64)
        .map_err(map_tr_err)
}
