// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cached nearby and isochrone payloads, stored as JSON text.

use chrono::{DateTime, Utc};
use nearby_core::time::format_ts;
use nearby_core::{CachePayload, IsochronePayload, NearbyError, RelationType};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};

/// Load the nearby payload for an origin and relation.
pub async fn load_nearby(
    db: &Database,
    origin_id: i64,
    relation: RelationType,
) -> Result<Option<CachePayload>, NearbyError> {
    let relation = relation.to_string();
    let raw: Option<String> = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT payload FROM nearby_cache WHERE origin_id = ?1 AND relation = ?2",
                params![origin_id, relation],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(NearbyError::from))
        .transpose()
}

/// Replace the nearby payload for an origin and relation.
///
/// Returns the serialized size in bytes.
pub async fn store_nearby(
    db: &Database,
    origin_id: i64,
    relation: RelationType,
    payload: &CachePayload,
    now: DateTime<Utc>,
) -> Result<u64, NearbyError> {
    let raw = serde_json::to_string(payload)?;
    let size = raw.len() as u64;
    let relation = relation.to_string();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO nearby_cache (origin_id, relation, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(origin_id, relation) DO UPDATE SET
                    payload = excluded.payload, updated_at = excluded.updated_at",
                params![origin_id, relation, raw, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    Ok(size)
}

/// Load the isochrone payload for an origin.
pub async fn load_isochrone(
    db: &Database,
    origin_id: i64,
) -> Result<Option<IsochronePayload>, NearbyError> {
    let raw: Option<String> = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT payload FROM isochrone_cache WHERE origin_id = ?1",
                params![origin_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(NearbyError::from))
        .transpose()
}

/// Replace the isochrone payload for an origin.
pub async fn store_isochrone(
    db: &Database,
    origin_id: i64,
    payload: &IsochronePayload,
    now: DateTime<Utc>,
) -> Result<(), NearbyError> {
    let raw = serde_json::to_string(payload)?;
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO isochrone_cache (origin_id, payload, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(origin_id) DO UPDATE SET
                    payload = excluded.payload, updated_at = excluded.updated_at",
                params![origin_id, raw, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
