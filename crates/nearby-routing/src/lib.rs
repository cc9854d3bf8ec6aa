// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing provider adapter for the nearby engine.
//!
//! Implements [`RoutingProvider`] over an openrouteservice-compatible HTTP
//! API: one-to-many walking matrices and time-based isochrones.

pub mod client;
pub mod types;

use async_trait::async_trait;
use nearby_config::model::RoutingConfig;
use nearby_core::traits::routing::{MatrixRow, RoutingError, RoutingReply};
use nearby_core::{Coordinates, NearbyError, RoutingProvider};
use tracing::info;

use crate::client::OrsClient;

/// Routing provider backed by [`OrsClient`].
#[derive(Debug, Clone)]
pub struct OrsProvider {
    client: OrsClient,
}

impl OrsProvider {
    /// Build a provider from the routing configuration.
    ///
    /// Fails when no API key is configured; callers fall back to basic mode
    /// in that case rather than constructing a provider.
    pub fn from_config(config: &RoutingConfig) -> Result<Self, NearbyError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| NearbyError::Config("routing.api_key is not set".into()))?;
        let client = OrsClient::new(
            api_key,
            &config.base_url,
            &config.profile,
            config.request_timeout(),
        )?;
        info!(base_url = %config.base_url, profile = %config.profile, "routing provider ready");
        Ok(Self { client })
    }

    pub fn from_client(client: OrsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RoutingProvider for OrsProvider {
    fn name(&self) -> &str {
        "openrouteservice"
    }

    async fn matrix(
        &self,
        origin: Coordinates,
        destinations: &[Coordinates],
    ) -> Result<RoutingReply<MatrixRow>, RoutingError> {
        self.client.matrix(origin, destinations).await
    }

    async fn isochrones(
        &self,
        center: Coordinates,
        ranges_s: &[u32],
    ) -> Result<RoutingReply<serde_json::Value>, RoutingError> {
        self.client.isochrones(center, ranges_s).await
    }
}
