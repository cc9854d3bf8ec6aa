// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entity rows: POIs, charging locations and RV spots.

use chrono::{DateTime, Utc};
use nearby_core::time::format_ts;
use nearby_core::{Coordinates, Entity, EntityType, NearbyError};
use rusqlite::{OptionalExtension, params};

use super::enum_col;
use crate::database::{Database, map_tr_err};

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let lat: Option<f64> = row.get(3)?;
    let lng: Option<f64> = row.get(4)?;
    Ok(Entity {
        id: row.get(0)?,
        entity_type: enum_col(row, 1)?,
        name: row.get(2)?,
        coordinates: lat.zip(lng).map(|(lat, lng)| Coordinates::new(lat, lng)),
        published: row.get(5)?,
    })
}

/// Insert or replace an entity.
pub async fn upsert(db: &Database, entity: &Entity, now: DateTime<Utc>) -> Result<(), NearbyError> {
    let entity = entity.clone();
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO entities (id, entity_type, name, lat, lng, published, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    entity_type = excluded.entity_type,
                    name = excluded.name,
                    lat = excluded.lat,
                    lng = excluded.lng,
                    published = excluded.published,
                    updated_at = excluded.updated_at",
                params![
                    entity.id,
                    entity.entity_type.to_string(),
                    entity.name,
                    entity.coordinates.map(|c| c.lat),
                    entity.coordinates.map(|c| c.lng),
                    entity.published,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch one entity by id.
pub async fn get(db: &Database, id: i64) -> Result<Option<Entity>, NearbyError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, entity_type, name, lat, lng, published FROM entities WHERE id = ?1",
                params![id],
                row_to_entity,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All published entities of a type, in id order.
pub async fn list_published(
    db: &Database,
    entity_type: EntityType,
) -> Result<Vec<Entity>, NearbyError> {
    let entity_type = entity_type.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_type, name, lat, lng, published FROM entities
                 WHERE entity_type = ?1 AND published = 1
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![entity_type], row_to_entity)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Remove an entity. Returns true if a row was deleted.
pub async fn delete(db: &Database, id: i64) -> Result<bool, NearbyError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::{setup_db, t0};

    fn poi(id: i64, published: bool, coords: Option<Coordinates>) -> Entity {
        Entity {
            id,
            entity_type: EntityType::Poi,
            name: Some(format!("poi {id}")),
            coordinates: coords,
            published,
        }
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let (db, _dir) = setup_db().await;
        let entity = poi(1, true, Some(Coordinates::new(50.0755, 14.4378)));
        upsert(&db, &entity, t0()).await.unwrap();
        assert_eq!(get(&db, 1).await.unwrap(), Some(entity.clone()));

        let renamed = Entity {
            name: Some("renamed".into()),
            ..entity
        };
        upsert(&db, &renamed, t0()).await.unwrap();
        assert_eq!(get(&db, 1).await.unwrap().unwrap().name.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn missing_coordinates_roundtrip_as_none() {
        let (db, _dir) = setup_db().await;
        upsert(&db, &poi(2, true, None), t0()).await.unwrap();
        let loaded = get(&db, 2).await.unwrap().unwrap();
        assert!(loaded.coordinates.is_none());
        assert!(loaded.valid_coordinates().is_none());
    }

    #[tokio::test]
    async fn list_published_filters_type_and_flag() {
        let (db, _dir) = setup_db().await;
        upsert(&db, &poi(1, true, None), t0()).await.unwrap();
        upsert(&db, &poi(2, false, None), t0()).await.unwrap();
        let charger = Entity {
            entity_type: EntityType::ChargingLocation,
            ..poi(3, true, None)
        };
        upsert(&db, &charger, t0()).await.unwrap();

        let pois = list_published(&db, EntityType::Poi).await.unwrap();
        assert_eq!(pois.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1]);

        assert!(delete(&db, 1).await.unwrap());
        assert!(!delete(&db, 1).await.unwrap());
        assert!(list_published(&db, EntityType::Poi).await.unwrap().is_empty());
    }
}
