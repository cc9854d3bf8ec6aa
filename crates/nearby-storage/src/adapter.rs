// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`EntityStore`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use nearby_core::{
    CachePayload, Clock, Entity, EntityStore, EntityType, IsochronePayload, NearbyError,
    RelationType,
};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed entity store.
///
/// Wraps a [`Database`] handle and delegates to the typed query modules.
/// The same handle is shared with the queue and state store, so every
/// write still goes through the one writer thread.
#[derive(Clone)]
pub struct SqliteStorage {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteStorage {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// The underlying database handle.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Insert or update an entity.
    pub async fn upsert_entity(&self, entity: &Entity) -> Result<(), NearbyError> {
        queries::entities::upsert(&self.db, entity, self.clock.now()).await
    }

    /// Cheap liveness check.
    pub async fn health_check(&self) -> Result<(), NearbyError> {
        self.db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

#[async_trait]
impl EntityStore for SqliteStorage {
    async fn get_entity(&self, id: i64) -> Result<Option<Entity>, NearbyError> {
        queries::entities::get(&self.db, id).await
    }

    async fn list_published(&self, entity_type: EntityType) -> Result<Vec<Entity>, NearbyError> {
        queries::entities::list_published(&self.db, entity_type).await
    }

    async fn load_payload(
        &self,
        origin_id: i64,
        relation: RelationType,
    ) -> Result<Option<CachePayload>, NearbyError> {
        queries::payloads::load_nearby(&self.db, origin_id, relation).await
    }

    async fn store_payload(
        &self,
        origin_id: i64,
        relation: RelationType,
        payload: &CachePayload,
    ) -> Result<(), NearbyError> {
        let bytes =
            queries::payloads::store_nearby(&self.db, origin_id, relation, payload, self.clock.now())
                .await?;
        debug!(
            origin_id,
            %relation,
            items = payload.items.len(),
            partial = payload.partial,
            bytes,
            "nearby payload stored"
        );
        Ok(())
    }

    async fn load_isochrone(
        &self,
        origin_id: i64,
    ) -> Result<Option<IsochronePayload>, NearbyError> {
        queries::payloads::load_isochrone(&self.db, origin_id).await
    }

    async fn store_isochrone(
        &self,
        origin_id: i64,
        payload: &IsochronePayload,
    ) -> Result<(), NearbyError> {
        queries::payloads::store_isochrone(&self.db, origin_id, payload, self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use nearby_core::{Coordinates, ManualClock, Provider};
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn store_through_trait_object() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let storage = SqliteStorage::new(db, Arc::new(ManualClock::new(now)));
        storage.health_check().await.unwrap();

        storage
            .upsert_entity(&Entity {
                id: 1,
                entity_type: EntityType::RvSpot,
                name: None,
                coordinates: Some(Coordinates::new(48.1, 11.5)),
                published: true,
            })
            .await
            .unwrap();

        let store: Arc<dyn EntityStore> = Arc::new(storage);
        assert_eq!(store.list_published(EntityType::RvSpot).await.unwrap().len(), 1);

        let payload = CachePayload::empty(Provider::Basic, now);
        store
            .store_payload(1, RelationType::PoiFoot, &payload)
            .await
            .unwrap();
        assert_eq!(
            store.load_payload(1, RelationType::PoiFoot).await.unwrap(),
            Some(payload)
        );
    }
}
