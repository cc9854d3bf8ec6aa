// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Straight-line spatial pre-filter run before any routing call.

use std::sync::Arc;

use nearby_core::{Candidate, Coordinates, EntityStore, EntityType, NearbyError};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Finds published entities near a point.
#[derive(Clone)]
pub struct CandidateLocator {
    store: Arc<dyn EntityStore>,
}

impl CandidateLocator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Published entities of `wanted` within `radius_km` of `origin`,
    /// nearest first, at most `max_count` of them.
    ///
    /// Entities without usable coordinates and the entity `exclude_id`
    /// (the origin itself) are skipped. An empty result is not an error.
    pub async fn find_candidates(
        &self,
        origin: Coordinates,
        exclude_id: Option<i64>,
        wanted: EntityType,
        radius_km: f64,
        max_count: usize,
    ) -> Result<Vec<Candidate>, NearbyError> {
        let mut candidates: Vec<Candidate> = self
            .store
            .list_published(wanted)
            .await?
            .into_iter()
            .filter(|e| Some(e.id) != exclude_id)
            .filter_map(|e| {
                let coordinates = e.valid_coordinates()?;
                let distance_km = haversine_km(origin, coordinates);
                (distance_km <= radius_km).then_some(Candidate {
                    id: e.id,
                    entity_type: e.entity_type,
                    coordinates,
                    distance_km,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(max_count);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distances() {
        let prague = Coordinates::new(50.0755, 14.4378);
        assert_eq!(haversine_km(prague, prague), 0.0);

        // One degree of latitude is ~111.2 km everywhere.
        let north = Coordinates::new(51.0755, 14.4378);
        assert!((haversine_km(prague, north) - 111.19).abs() < 0.05);

        let brno = Coordinates::new(49.1951, 16.6068);
        let d = haversine_km(prague, brno);
        assert!((d - 185.0).abs() < 2.0, "got {d}");
        assert!((haversine_km(brno, prague) - d).abs() < 1e-9);
    }
}
