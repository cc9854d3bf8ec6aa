// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock routing provider for deterministic testing.
//!
//! Matrix and isochrone replies are popped from FIFO scripts. When a script
//! is empty the mock answers successfully: every destination gets the
//! default duration and distance, and isochrones come back as one empty
//! polygon feature per range.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nearby_core::traits::{MatrixRow, RoutingError, RoutingReply};
use nearby_core::{Coordinates, RateHeaders, RoutingProvider};
use serde_json::json;
use tokio::sync::Mutex;

type MatrixResult = Result<RoutingReply<MatrixRow>, RoutingError>;
type IsochroneResult = Result<RoutingReply<serde_json::Value>, RoutingError>;

/// A routing provider that returns pre-configured replies.
pub struct MockRouting {
    matrix_script: Mutex<VecDeque<MatrixResult>>,
    isochrone_script: Mutex<VecDeque<IsochroneResult>>,
    duration_s: f64,
    distance_m: f64,
    headers: RateHeaders,
    delay: Option<Duration>,
    matrix_calls: AtomicU32,
    isochrone_calls: AtomicU32,
    matrix_requests: Mutex<Vec<Vec<Coordinates>>>,
}

impl MockRouting {
    /// Every destination 300 s / 400 m away, no headers, no delay.
    pub fn new() -> Self {
        Self {
            matrix_script: Mutex::new(VecDeque::new()),
            isochrone_script: Mutex::new(VecDeque::new()),
            duration_s: 300.0,
            distance_m: 400.0,
            headers: RateHeaders::default(),
            delay: None,
            matrix_calls: AtomicU32::new(0),
            isochrone_calls: AtomicU32::new(0),
            matrix_requests: Mutex::new(Vec::new()),
        }
    }

    /// Default values for unscripted matrix calls.
    pub fn with_constant(mut self, duration_s: f64, distance_m: f64) -> Self {
        self.duration_s = duration_s;
        self.distance_m = distance_m;
        self
    }

    /// Rate headers attached to unscripted successful replies.
    pub fn with_headers(mut self, headers: RateHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a matrix result for the next unanswered call.
    pub async fn push_matrix(&self, result: MatrixResult) {
        self.matrix_script.lock().await.push_back(result);
    }

    /// Queue a successful matrix call using the defaults.
    pub async fn push_matrix_default(&self, destinations: usize) {
        let reply = self.default_matrix(destinations);
        self.push_matrix(Ok(reply)).await;
    }

    /// Queue a matrix failure.
    pub async fn push_matrix_error(&self, error: RoutingError) {
        self.push_matrix(Err(error)).await;
    }

    /// Queue an isochrone result for the next unanswered call.
    pub async fn push_isochrone(&self, result: IsochroneResult) {
        self.isochrone_script.lock().await.push_back(result);
    }

    pub fn matrix_calls(&self) -> u32 {
        self.matrix_calls.load(Ordering::SeqCst)
    }

    pub fn isochrone_calls(&self) -> u32 {
        self.isochrone_calls.load(Ordering::SeqCst)
    }

    /// Destination lists of every matrix call, in call order.
    pub async fn matrix_requests(&self) -> Vec<Vec<Coordinates>> {
        self.matrix_requests.lock().await.clone()
    }

    fn default_matrix(&self, destinations: usize) -> RoutingReply<MatrixRow> {
        RoutingReply {
            body: MatrixRow {
                durations: vec![Some(self.duration_s); destinations],
                distances: vec![Some(self.distance_m); destinations],
            },
            headers: self.headers,
        }
    }

    fn default_isochrones(&self, center: Coordinates, ranges_s: &[u32]) -> serde_json::Value {
        let features: Vec<serde_json::Value> = ranges_s
            .iter()
            .map(|range| {
                json!({
                    "type": "Feature",
                    "properties": { "value": range, "center": center.lng_lat() },
                    "geometry": { "type": "Polygon", "coordinates": [] }
                })
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockRouting {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingProvider for MockRouting {
    fn name(&self) -> &str {
        "mock-routing"
    }

    async fn matrix(
        &self,
        _origin: Coordinates,
        destinations: &[Coordinates],
    ) -> Result<RoutingReply<MatrixRow>, RoutingError> {
        self.matrix_calls.fetch_add(1, Ordering::SeqCst);
        self.matrix_requests
            .lock()
            .await
            .push(destinations.to_vec());
        self.pause().await;
        let scripted = self.matrix_script.lock().await.pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_matrix(destinations.len())))
    }

    async fn isochrones(
        &self,
        center: Coordinates,
        ranges_s: &[u32],
    ) -> Result<RoutingReply<serde_json::Value>, RoutingError> {
        self.isochrone_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let scripted = self.isochrone_script.lock().await.pop_front();
        scripted.unwrap_or_else(|| {
            Ok(RoutingReply {
                body: self.default_isochrones(center, ranges_s),
                headers: self.headers,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Coordinates {
        Coordinates::new(50.0, 14.0)
    }

    #[tokio::test]
    async fn unscripted_matrix_uses_defaults() {
        let mock = MockRouting::new().with_constant(600.0, 800.0);
        let reply = mock.matrix(point(), &[point(), point()]).await.unwrap();
        assert_eq!(reply.body.durations, vec![Some(600.0), Some(600.0)]);
        assert_eq!(reply.body.distances, vec![Some(800.0), Some(800.0)]);
        assert_eq!(mock.matrix_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_replies_come_first_in_order() {
        let mock = MockRouting::new();
        mock.push_matrix_default(1).await;
        mock.push_matrix_error(RoutingError::Unauthorized { status: 401 })
            .await;

        assert!(mock.matrix(point(), &[point()]).await.is_ok());
        let err = mock.matrix(point(), &[point()]).await.unwrap_err();
        assert_eq!(err.tag(), "unauthorized");
        assert!(mock.matrix(point(), &[point()]).await.is_ok());
        assert_eq!(mock.matrix_requests().await.len(), 3);
    }

    #[tokio::test]
    async fn default_isochrones_have_one_feature_per_range() {
        let mock = MockRouting::new();
        let reply = mock.isochrones(point(), &[300, 600]).await.unwrap();
        assert_eq!(reply.body["features"].as_array().unwrap().len(), 2);
        assert_eq!(mock.isochrone_calls(), 1);
    }
}
