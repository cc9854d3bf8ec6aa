// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use std::sync::Arc;

use nearby_config::NearbyConfig;
use nearby_core::{EntityType, RoutingProvider};
use nearby_engine::{Engine, Scheduler};
use nearby_test_utils::{MockRouting, TestStore};
use tokio_util::sync::CancellationToken;

/// Prague city centre.
pub const ORIGIN: (f64, f64) = (50.0755, 14.4378);

/// Kilometres per degree of latitude on the 6371 km sphere.
pub const KM_PER_DEG_LAT: f64 = 111.19493;

pub struct Rig {
    pub engine: Engine,
    pub store: TestStore,
    pub routing: Option<Arc<MockRouting>>,
    pub scheduler: Scheduler,
}

impl Rig {
    pub fn mock(&self) -> &MockRouting {
        self.routing.as_deref().expect("rig built without routing")
    }
}

pub async fn rig(config: NearbyConfig, routing: Option<MockRouting>) -> Rig {
    let store = TestStore::new().await.unwrap();
    let routing = routing.map(Arc::new);
    let provider = routing
        .clone()
        .map(|r| r as Arc<dyn RoutingProvider>);
    let (engine, scheduler) = Engine::build(
        Arc::new(config),
        store.db.clone(),
        provider,
        store.clock(),
        CancellationToken::new(),
    );
    Rig {
        engine,
        store,
        routing,
        scheduler,
    }
}

/// Seed a POI origin at [`ORIGIN`] with id 1.
pub async fn seed_origin(store: &TestStore) {
    store
        .seed(1, EntityType::Poi, ORIGIN.0, ORIGIN.1)
        .await
        .unwrap();
}

/// Seed `n` charging locations due north of [`ORIGIN`], 100 m apart,
/// with ids 101, 102, ...
pub async fn seed_chargers(store: &TestStore, n: i64) {
    for i in 1..=n {
        let lat = ORIGIN.0 + (i as f64 * 0.1) / KM_PER_DEG_LAT;
        store
            .seed(100 + i, EntityType::ChargingLocation, lat, ORIGIN.1)
            .await
            .unwrap();
    }
}
