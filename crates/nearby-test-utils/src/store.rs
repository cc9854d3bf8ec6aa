// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Temp-SQLite store with entity seeding and a manual clock.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use nearby_config::NearbyConfig;
use nearby_core::{Clock, Coordinates, Entity, EntityStore, EntityType, ManualClock, NearbyError};
use nearby_storage::{Database, SqliteStorage};
use tempfile::TempDir;

/// Where every test clock starts: 2026-03-01 12:00:00 UTC.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Defaults with a routing key set and no pause between chunks.
pub fn test_config() -> NearbyConfig {
    let mut config = NearbyConfig::default();
    config.routing.api_key = Some("test-key".to_string());
    config.routing.chunk_throttle_ms = 0;
    config
}

/// A database in a temp directory plus the storage adapter over it.
///
/// The directory is removed when the store is dropped.
pub struct TestStore {
    pub db: Database,
    pub storage: SqliteStorage,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl TestStore {
    pub async fn new() -> Result<Self, NearbyError> {
        let dir = TempDir::new().map_err(|e| NearbyError::Storage { source: e.into() })?;
        let path = dir.path().join("test.db");
        let db = Database::open(&path.to_string_lossy()).await?;
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let storage = SqliteStorage::new(db.clone(), clock.clone());
        Ok(Self {
            db,
            storage,
            clock,
            _dir: dir,
        })
    }

    /// The storage adapter as the engine sees it.
    pub fn entity_store(&self) -> Arc<dyn EntityStore> {
        Arc::new(self.storage.clone())
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Insert or replace a published entity.
    pub async fn seed(
        &self,
        id: i64,
        entity_type: EntityType,
        lat: f64,
        lng: f64,
    ) -> Result<(), NearbyError> {
        self.storage
            .upsert_entity(&Entity {
                id,
                entity_type,
                name: Some(format!("{entity_type} {id}")),
                coordinates: Some(Coordinates::new(lat, lng)),
                published: true,
            })
            .await
    }

    /// Insert or replace a published entity with no coordinates.
    pub async fn seed_without_coordinates(
        &self,
        id: i64,
        entity_type: EntityType,
    ) -> Result<(), NearbyError> {
        self.storage
            .upsert_entity(&Entity {
                id,
                entity_type,
                name: None,
                coordinates: None,
                published: true,
            })
            .await
    }

    /// Flip an existing entity to unpublished.
    pub async fn unpublish(&self, id: i64) -> Result<(), NearbyError> {
        let mut entity = self
            .storage
            .get_entity(id)
            .await?
            .ok_or_else(|| NearbyError::not_found("entity", id))?;
        entity.published = false;
        self.storage.upsert_entity(&entity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_entities_are_listed() {
        let store = TestStore::new().await.unwrap();
        store.seed(1, EntityType::Poi, 50.0, 14.0).await.unwrap();
        store.seed(2, EntityType::Poi, 50.1, 14.1).await.unwrap();
        store.unpublish(2).await.unwrap();

        let listed = store
            .entity_store()
            .list_published(EntityType::Poi)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, 1);
        assert_eq!(store.clock.now(), test_epoch());
    }

    #[test]
    fn test_config_enables_routing() {
        let config = test_config();
        assert_eq!(config.effective_provider(), nearby_core::Provider::Routing);
        assert_eq!(config.routing.chunk_throttle_ms, 0);
    }
}
