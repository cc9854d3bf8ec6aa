// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for an openrouteservice-compatible routing API.
//!
//! Provides [`OrsClient`], which builds matrix and isochrone requests,
//! lifts rate-limit headers off every response, and classifies failures.
//! It never retries: the engine owns retry and backoff.

use std::time::Duration;

use nearby_core::traits::routing::{MatrixRow, RoutingError, RoutingReply};
use nearby_core::{Coordinates, NearbyError, RateHeaders};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{ApiErrorBody, IsochroneRequest, MatrixRequest, MatrixResponse};

pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// HTTP client for the routing API.
#[derive(Debug, Clone)]
pub struct OrsClient {
    client: reqwest::Client,
    base_url: String,
    profile: String,
}

impl OrsClient {
    /// Creates a client sending `api_key` in the `Authorization` header.
    pub fn new(
        api_key: &str,
        base_url: &str,
        profile: &str,
        timeout: Duration,
    ) -> Result<Self, NearbyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(api_key)
                .map_err(|e| NearbyError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(
            "accept",
            HeaderValue::from_static("application/json, application/geo+json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| NearbyError::Routing {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            profile: profile.to_string(),
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Walking durations and distances from `origin` to each destination.
    pub async fn matrix(
        &self,
        origin: Coordinates,
        destinations: &[Coordinates],
    ) -> Result<RoutingReply<MatrixRow>, RoutingError> {
        let request = MatrixRequest::one_to_many(
            origin.lng_lat(),
            destinations.iter().map(Coordinates::lng_lat),
        );
        let url = format!("{}/matrix/{}", self.base_url, self.profile);
        let (body, headers) = self.post(&url, &request).await?;

        let parsed: MatrixResponse = serde_json::from_str(&body)
            .map_err(|e| RoutingError::Malformed(format!("invalid matrix body: {e}")))?;
        let row = first_row(parsed.durations, destinations.len())
            .ok_or_else(|| RoutingError::Malformed("missing or short durations row".into()))?;
        let distances = first_row(parsed.distances, destinations.len())
            .unwrap_or_else(|| vec![None; destinations.len()]);

        Ok(RoutingReply {
            body: MatrixRow {
                durations: row,
                distances,
            },
            headers,
        })
    }

    /// Isochrone polygons around `center` for each range in seconds.
    pub async fn isochrones(
        &self,
        center: Coordinates,
        ranges_s: &[u32],
    ) -> Result<RoutingReply<serde_json::Value>, RoutingError> {
        let request = IsochroneRequest {
            locations: vec![center.lng_lat()],
            range: ranges_s.to_vec(),
            range_type: "time",
        };
        let url = format!("{}/isochrones/{}", self.base_url, self.profile);
        let (body, headers) = self.post(&url, &request).await?;

        let geojson: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| RoutingError::Malformed(format!("invalid isochrone body: {e}")))?;
        if !geojson.get("features").is_some_and(serde_json::Value::is_array) {
            return Err(RoutingError::Malformed(
                "isochrone body is not a FeatureCollection".into(),
            ));
        }
        Ok(RoutingReply {
            body: geojson,
            headers,
        })
    }

    /// POST a JSON body and return the raw success body with its headers.
    async fn post<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(String, RateHeaders), RoutingError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RoutingError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let headers = rate_headers(response.headers());
        debug!(%status, url, remaining = ?headers.remaining, "routing response received");

        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| RoutingError::Transport(format!("failed to read body: {e}")))?;
            return Ok((text, headers));
        }

        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|b| b.message())
            .unwrap_or(text);
        Err(classify(status, headers, &detail))
    }
}

fn classify(status: StatusCode, headers: RateHeaders, detail: &str) -> RoutingError {
    match status.as_u16() {
        429 => {
            warn!(retry_after = ?headers.retry_after_s, "routing provider rate limited the request");
            RoutingError::RateLimited {
                retry_after_s: headers.retry_after_s,
                headers,
            }
        }
        code @ (401 | 403) => {
            warn!(status = code, detail, "routing provider rejected the API key");
            RoutingError::Unauthorized { status: code }
        }
        code => {
            warn!(status = code, detail, "routing provider returned an error");
            RoutingError::Status {
                status: code,
                headers,
            }
        }
    }
}

/// Lift rate-limit values off a response. Unparseable values are ignored.
pub fn rate_headers(headers: &HeaderMap) -> RateHeaders {
    let number = |name: &str| -> Option<f64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };
    RateHeaders {
        remaining: number(HEADER_REMAINING).map(|v| v.floor() as i64),
        reset_epoch: number(HEADER_RESET).map(|v| v.floor() as i64),
        retry_after_s: number(HEADER_RETRY_AFTER)
            .filter(|v| *v >= 0.0)
            .map(|v| v.ceil() as u64),
    }
}

fn first_row(matrix: Option<Vec<Vec<Option<f64>>>>, expected: usize) -> Option<Vec<Option<f64>>> {
    let row = matrix?.into_iter().next()?;
    (row.len() == expected).then_some(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> OrsClient {
        OrsClient::new("test-key", base_url, "foot-walking", Duration::from_secs(5)).unwrap()
    }

    fn prague() -> Coordinates {
        Coordinates::new(50.0755, 14.4378)
    }

    #[tokio::test]
    async fn matrix_success_reads_row_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/matrix/foot-walking"))
            .and(header("authorization", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "sources": [0],
                "destinations": [1, 2],
                "locations": [[14.4378, 50.0755], [14.44, 50.08], [14.45, 50.09]]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining", "499")
                    .insert_header("x-ratelimit-reset", "1772409600")
                    .set_body_json(serde_json::json!({
                        "durations": [[600.0, null]],
                        "distances": [[800.0, null]]
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let reply = client
            .matrix(
                prague(),
                &[Coordinates::new(50.08, 14.44), Coordinates::new(50.09, 14.45)],
            )
            .await
            .unwrap();
        assert_eq!(reply.body.durations, vec![Some(600.0), None]);
        assert_eq!(reply.body.distances, vec![Some(800.0), None]);
        assert_eq!(reply.headers.remaining, Some(499));
        assert_eq!(reply.headers.reset_epoch, Some(1_772_409_600));
    }

    #[tokio::test]
    async fn matrix_429_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/matrix/foot-walking"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "42")
                    .set_body_json(serde_json::json!({"error": "Rate limit exceeded"})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .matrix(prague(), &[Coordinates::new(50.08, 14.44)])
            .await
            .unwrap_err();
        match err {
            RoutingError::RateLimited { retry_after_s, .. } => assert_eq!(retry_after_s, Some(42)),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forbidden_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({"error": "Access to this API has been disallowed"})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .matrix(prague(), &[Coordinates::new(50.08, 14.44)])
            .await
            .unwrap_err();
        assert_eq!(err, RoutingError::Unauthorized { status: 403 });
        assert_eq!(err.tag(), "unauthorized");
    }

    #[tokio::test]
    async fn server_error_is_transport_tagged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .matrix(prague(), &[Coordinates::new(50.08, 14.44)])
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Status { status: 502, .. }));
        assert_eq!(err.tag(), "transport_error");
    }

    #[tokio::test]
    async fn short_durations_row_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"durations": [[1.0]]})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .matrix(
                prague(),
                &[Coordinates::new(50.08, 14.44), Coordinates::new(50.09, 14.45)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Malformed(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is not serving HTTP.
        let client = test_client("http://127.0.0.1:9");
        let err = client
            .matrix(prague(), &[Coordinates::new(50.08, 14.44)])
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Transport(_)));
    }

    #[tokio::test]
    async fn isochrones_require_feature_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/isochrones/foot-walking"))
            .and(body_partial_json(serde_json::json!({
                "range": [300, 600],
                "range_type": "time"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "FeatureCollection",
                "features": [{"type": "Feature", "properties": {"value": 300}}]
            })))
            .mount(&server)
            .await;

        let reply = test_client(&server.uri())
            .isochrones(prague(), &[300, 600])
            .await
            .unwrap();
        assert_eq!(reply.body["features"].as_array().unwrap().len(), 1);

        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&bad)
            .await;
        let err = test_client(&bad.uri())
            .isochrones(prague(), &[300])
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Malformed(_)));
    }

    #[test]
    fn header_parsing_tolerates_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, HeaderValue::from_static("12"));
        headers.insert(HEADER_RESET, HeaderValue::from_static("soon"));
        headers.insert(HEADER_RETRY_AFTER, HeaderValue::from_static("1.5"));
        let parsed = rate_headers(&headers);
        assert_eq!(parsed.remaining, Some(12));
        assert_eq!(parsed.reset_epoch, None);
        assert_eq!(parsed.retry_after_s, Some(2));
    }
}
