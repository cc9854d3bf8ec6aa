// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common domain types used across the nearby crates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of a geolocated entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Poi,
    ChargingLocation,
    RvSpot,
}

impl EntityType {
    /// All entity types, in a stable order.
    pub const ALL: [EntityType; 3] = [
        EntityType::Poi,
        EntityType::ChargingLocation,
        EntityType::RvSpot,
    ];
}

/// Which nearby list is being computed for an origin.
///
/// The relation names the candidate type: `PoiFoot` is "points of interest
/// within walking distance", `ChargingFoot` is "charging locations within
/// walking distance".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    PoiFoot,
    ChargingFoot,
}

impl RelationType {
    /// The relation computed for an origin of the given type.
    pub fn for_origin(origin: EntityType) -> Self {
        match origin {
            EntityType::Poi => RelationType::ChargingFoot,
            EntityType::ChargingLocation | EntityType::RvSpot => RelationType::PoiFoot,
        }
    }

    /// The entity type matched as candidates.
    pub fn candidate_type(self) -> EntityType {
        match self {
            RelationType::PoiFoot => EntityType::Poi,
            RelationType::ChargingFoot => EntityType::ChargingLocation,
        }
    }

    /// Origin types whose nearby lists contain candidates of `changed`.
    pub fn origins_listing(changed: EntityType) -> Vec<EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(|t| RelationType::for_origin(*t).candidate_type() == changed)
            .collect()
    }
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside WGS84 bounds.
    /// `(0, 0)` counts as unset.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
            && !(self.lat == 0.0 && self.lng == 0.0)
    }

    /// `[lng, lat]` order used by the routing API.
    pub fn lng_lat(&self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

/// An entity as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub entity_type: EntityType,
    pub name: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub published: bool,
}

impl Entity {
    /// Coordinates, if present and usable.
    pub fn valid_coordinates(&self) -> Option<Coordinates> {
        self.coordinates.filter(Coordinates::is_valid)
    }
}

/// A nearby entity found by the straight-line pre-filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub entity_type: EntityType,
    pub coordinates: Coordinates,
    pub distance_km: f64,
}

/// How a payload was computed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Walking matrix from the routing API.
    Routing,
    /// Straight-line distance with a constant walking speed.
    Basic,
}

/// One computed relation between an origin and a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyItem {
    pub candidate_id: i64,
    pub candidate_type: EntityType,
    pub duration_s: f64,
    pub distance_m: f64,
}

/// Progress counter for partial payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Cached nearby list for one origin and relation type.
///
/// While `partial` is true the payload is a readable prefix of the final
/// result; `items` only grows until `partial` flips to false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePayload {
    pub computed_at: DateTime<Utc>,
    pub provider: Provider,
    pub items: Vec<NearbyItem>,
    pub partial: bool,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u64>,
}

impl CachePayload {
    /// A complete payload with no items.
    pub fn empty(provider: Provider, now: DateTime<Utc>) -> Self {
        Self {
            computed_at: now,
            provider,
            items: Vec::new(),
            partial: false,
            progress: Progress::default(),
            error: None,
            error_at: None,
            retry_after_s: None,
        }
    }

    /// True if the payload needs recomputing.
    ///
    /// Partial and errored payloads are always stale, as are payloads older
    /// than `ttl` or computed before `not_before` (the enqueue time).
    pub fn is_stale(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        not_before: Option<DateTime<Utc>>,
    ) -> bool {
        if self.partial || self.error.is_some() {
            return true;
        }
        if now - self.computed_at > ttl {
            return true;
        }
        matches!(not_before, Some(ts) if self.computed_at < ts)
    }
}

/// Cached walking isochrones for one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsochronePayload {
    pub profile: String,
    pub ranges_s: Vec<u32>,
    pub center: Coordinates,
    pub geojson: serde_json::Value,
    pub computed_at: DateTime<Utc>,
    pub ttl_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IsochronePayload {
    /// True if the isochrones need refetching. They must never be older
    /// than the nearby payload they accompany.
    pub fn is_stale(&self, now: DateTime<Utc>, cache_computed_at: Option<DateTime<Utc>>) -> bool {
        if self.error.is_some() {
            return true;
        }
        if now - self.computed_at > Duration::days(i64::from(self.ttl_days)) {
            return true;
        }
        matches!(cache_computed_at, Some(ts) if self.computed_at < ts)
    }
}

/// Lifecycle state of a queue item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    /// Pending and processing items block re-enqueueing.
    pub fn is_active(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

/// A row of the durable work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub origin_id: i64,
    pub origin_type: EntityType,
    pub priority: i32,
    pub status: QueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn relation(&self) -> RelationType {
        RelationType::for_origin(self.origin_type)
    }
}

/// Queue counts per status, plus the most recent error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

/// Summary of the last completed computation for an origin.
///
/// Observability only; nothing reads it to decide correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub origin_id: i64,
    pub origin_type: EntityType,
    pub candidate_count: u32,
    pub api_calls: u32,
    pub processing_ms: u64,
    pub provider: Provider,
    pub cache_bytes: u64,
    pub processed_at: DateTime<Utc>,
}

/// Routing API call categories, each with its own per-minute bucket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApiCategory {
    Matrix,
    Isochrones,
}

/// Where a quota snapshot's `remaining` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuotaSource {
    /// Reported by the provider's response headers.
    Headers,
    /// Derived from locally counted calls against the configured daily cap.
    Fallback,
}

/// Day-scoped quota view used to gate whether work starts at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_until: Option<DateTime<Utc>>,
    pub source: QuotaSource,
}

impl QuotaSnapshot {
    /// True iff calls remain and no retry window is active.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        self.remaining > 0 && self.retry_until.is_none_or(|until| until <= now)
    }
}

/// Rate-limit values lifted from a routing API response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateHeaders {
    /// Calls remaining in the provider's current window.
    pub remaining: Option<i64>,
    /// Epoch second at which the window resets.
    pub reset_epoch: Option<i64>,
    /// Seconds to wait before calling again.
    pub retry_after_s: Option<u64>,
}

impl RateHeaders {
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none() && self.reset_epoch.is_none() && self.retry_after_s.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn relation_mapping_is_complementary() {
        assert_eq!(
            RelationType::for_origin(EntityType::Poi).candidate_type(),
            EntityType::ChargingLocation
        );
        assert_eq!(
            RelationType::for_origin(EntityType::ChargingLocation).candidate_type(),
            EntityType::Poi
        );
        assert_eq!(
            RelationType::for_origin(EntityType::RvSpot),
            RelationType::PoiFoot
        );
    }

    #[test]
    fn origins_listing_finds_dependents() {
        let mut deps = RelationType::origins_listing(EntityType::Poi);
        deps.sort_by_key(|t| t.to_string());
        assert_eq!(deps, vec![EntityType::ChargingLocation, EntityType::RvSpot]);
        assert_eq!(
            RelationType::origins_listing(EntityType::ChargingLocation),
            vec![EntityType::Poi]
        );
        assert!(RelationType::origins_listing(EntityType::RvSpot).is_empty());
    }

    #[test]
    fn entity_type_parses_snake_case() {
        assert_eq!(
            EntityType::from_str("charging_location").unwrap(),
            EntityType::ChargingLocation
        );
        assert_eq!(EntityType::RvSpot.to_string(), "rv_spot");
        assert_eq!(
            serde_json::to_string(&EntityType::Poi).unwrap(),
            "\"poi\""
        );
    }

    #[test]
    fn zero_coordinates_are_invalid() {
        assert!(!Coordinates::new(0.0, 0.0).is_valid());
        assert!(!Coordinates::new(91.0, 10.0).is_valid());
        assert!(!Coordinates::new(f64::NAN, 10.0).is_valid());
        assert!(Coordinates::new(50.0755, 14.4378).is_valid());
    }

    #[test]
    fn partial_payload_is_stale() {
        let mut p = CachePayload::empty(Provider::Routing, t0());
        assert!(!p.is_stale(t0(), Duration::days(30), None));
        p.partial = true;
        assert!(p.is_stale(t0(), Duration::days(30), None));
    }

    #[test]
    fn payload_older_than_ttl_or_enqueue_is_stale() {
        let p = CachePayload::empty(Provider::Routing, t0());
        assert!(p.is_stale(t0() + Duration::days(31), Duration::days(30), None));
        assert!(p.is_stale(t0(), Duration::days(30), Some(t0() + Duration::seconds(1))));
        assert!(!p.is_stale(t0(), Duration::days(30), Some(t0() - Duration::seconds(1))));
    }

    #[test]
    fn errored_payload_is_stale() {
        let mut p = CachePayload::empty(Provider::Routing, t0());
        p.error = Some("rate_limited".into());
        assert!(p.is_stale(t0(), Duration::days(30), None));
    }

    #[test]
    fn isochrone_older_than_cache_is_stale() {
        let iso = IsochronePayload {
            profile: "foot-walking".into(),
            ranges_s: vec![300, 600],
            center: Coordinates::new(50.0, 14.0),
            geojson: serde_json::json!({"type": "FeatureCollection", "features": []}),
            computed_at: t0(),
            ttl_days: 30,
            error: None,
        };
        assert!(!iso.is_stale(t0(), Some(t0())));
        assert!(iso.is_stale(t0(), Some(t0() + Duration::minutes(1))));
        assert!(iso.is_stale(t0() + Duration::days(31), None));
    }

    #[test]
    fn snapshot_blocks_on_zero_or_retry_window() {
        let mut snap = QuotaSnapshot {
            remaining: 10,
            reset_at: None,
            retry_until: None,
            source: QuotaSource::Headers,
        };
        assert!(snap.allows(t0()));
        snap.retry_until = Some(t0() + Duration::seconds(30));
        assert!(!snap.allows(t0()));
        assert!(snap.allows(t0() + Duration::seconds(30)));
        snap.retry_until = None;
        snap.remaining = 0;
        assert!(!snap.allows(t0()));
    }

    #[test]
    fn payload_json_omits_absent_error_fields() {
        let p = CachePayload::empty(Provider::Basic, t0());
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["provider"], "basic");
        assert_eq!(json["progress"]["total"], 0);
    }
}
