// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entity store trait: coordinates, publication status, and cached blobs.

use async_trait::async_trait;

use crate::error::NearbyError;
use crate::types::{CachePayload, Entity, EntityType, IsochronePayload, RelationType};

/// Read access to entities and read/write access to their cached payloads.
///
/// Entity ids are unique across all entity types.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Look up a single entity by id.
    async fn get_entity(&self, id: i64) -> Result<Option<Entity>, NearbyError>;

    /// All published entities of a type, with or without coordinates.
    async fn list_published(&self, entity_type: EntityType) -> Result<Vec<Entity>, NearbyError>;

    /// Load the cached nearby payload for an origin.
    async fn load_payload(
        &self,
        origin_id: i64,
        relation: RelationType,
    ) -> Result<Option<CachePayload>, NearbyError>;

    /// Replace the cached nearby payload for an origin.
    async fn store_payload(
        &self,
        origin_id: i64,
        relation: RelationType,
        payload: &CachePayload,
    ) -> Result<(), NearbyError>;

    /// Load the cached isochrones for an origin.
    async fn load_isochrone(&self, origin_id: i64)
    -> Result<Option<IsochronePayload>, NearbyError>;

    /// Replace the cached isochrones for an origin.
    async fn store_isochrone(
        &self,
        origin_id: i64,
        payload: &IsochronePayload,
    ) -> Result<(), NearbyError>;
}
