// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing provider trait for walking matrices and isochrones.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Coordinates, RateHeaders};

/// A successful routing response together with its rate-limit headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingReply<T> {
    pub body: T,
    pub headers: RateHeaders,
}

/// First row of a one-source matrix: values per destination, in request order.
///
/// `None` marks a destination the router could not reach.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixRow {
    pub durations: Vec<Option<f64>>,
    pub distances: Vec<Option<f64>>,
}

/// Classified routing failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    /// HTTP 429. Transient; retry after the indicated delay.
    #[error("rate limited by routing provider")]
    RateLimited {
        retry_after_s: Option<u64>,
        headers: RateHeaders,
    },

    /// HTTP 401/403. The key is broken; retrying soon will not help.
    #[error("routing provider rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Connection, timeout, or other transport failure.
    #[error("routing transport error: {0}")]
    Transport(String),

    /// 2xx with a body that could not be interpreted.
    #[error("malformed routing response: {0}")]
    Malformed(String),

    /// Any other non-success status.
    #[error("routing provider returned HTTP {status}")]
    Status { status: u16, headers: RateHeaders },
}

impl RoutingError {
    /// Short tag written into cache payloads.
    pub fn tag(&self) -> &'static str {
        match self {
            RoutingError::RateLimited { .. } => "rate_limited",
            RoutingError::Unauthorized { .. } => "unauthorized",
            RoutingError::Transport(_) | RoutingError::Status { .. } => "transport_error",
            RoutingError::Malformed(_) => "malformed_response",
        }
    }

    /// Rate-limit headers carried by the failure, if any.
    pub fn headers(&self) -> Option<&RateHeaders> {
        match self {
            RoutingError::RateLimited { headers, .. } | RoutingError::Status { headers, .. } => {
                Some(headers)
            }
            _ => None,
        }
    }
}

/// Adapter for a walking-route provider.
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Human-readable provider name for logs and processed history.
    fn name(&self) -> &str;

    /// Walking durations (s) and distances (m) from `origin` to each destination.
    async fn matrix(
        &self,
        origin: Coordinates,
        destinations: &[Coordinates],
    ) -> Result<RoutingReply<MatrixRow>, RoutingError>;

    /// Isochrone polygons around `center` as a GeoJSON FeatureCollection.
    async fn isochrones(
        &self,
        center: Coordinates,
        ranges_s: &[u32],
    ) -> Result<RoutingReply<serde_json::Value>, RoutingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_tags() {
        let rl = RoutingError::RateLimited {
            retry_after_s: Some(30),
            headers: RateHeaders::default(),
        };
        assert_eq!(rl.tag(), "rate_limited");
        assert!(rl.headers().is_some());
        assert_eq!(RoutingError::Unauthorized { status: 403 }.tag(), "unauthorized");
        assert_eq!(RoutingError::Transport("timeout".into()).tag(), "transport_error");
        assert_eq!(RoutingError::Malformed("no durations".into()).tag(), "malformed_response");
    }
}
