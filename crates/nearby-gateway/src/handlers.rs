// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers.
//!
//! Handles GET /health, GET /metrics, POST /v1/trigger,
//! POST /v1/entities/{type}/{id}/changed and GET /v1/status.

use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use nearby_core::{EntityStore, EntityType, NearbyError};
use nearby_engine::Job;
use serde::Serialize;

use crate::server::GatewayState;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Response body for POST /v1/trigger.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// False when an already-waiting batch absorbed this trigger.
    pub queued: bool,
}

/// Response body for POST /v1/entities/{type}/{id}/changed.
#[derive(Debug, Serialize)]
pub struct ChangedResponse {
    /// Origins put on the queue by the ripple.
    pub enqueued: usize,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn engine_error(e: NearbyError) -> Response {
    match e {
        NearbyError::NotFound { .. } => error(StatusCode::NOT_FOUND, e.to_string()),
        other => {
            tracing::error!(error = %other, "request failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// GET /health
///
/// Unauthenticated liveness check. Reports 503 when the database is unreachable.
pub async fn get_health(State(state): State<GatewayState>) -> Response {
    let healthy = state.engine.storage.health_check().await.is_ok();
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// GET /metrics
///
/// Prometheus text exposition of the installed recorder.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.metrics_render {
        Some(render) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// POST /v1/trigger
///
/// Dispatches a batch run and returns at once; the work happens on the
/// scheduler worker.
pub async fn post_trigger(State(state): State<GatewayState>) -> Response {
    let queued = state.engine.scheduler.trigger(Job::ProcessBatch);
    tracing::info!(queued, "batch trigger received");
    (StatusCode::ACCEPTED, Json(TriggerResponse { queued })).into_response()
}

/// POST /v1/entities/{type}/{id}/changed
///
/// Ripple-enqueues the entity and its neighbours, then triggers a batch.
pub async fn post_entity_changed(
    State(state): State<GatewayState>,
    Path((kind, id)): Path<(String, i64)>,
) -> Response {
    let Ok(entity_type) = EntityType::from_str(&kind) else {
        return error(
            StatusCode::BAD_REQUEST,
            format!("unknown entity type: {kind}"),
        );
    };

    match state.engine.storage.get_entity(id).await {
        Ok(Some(entity)) if entity.entity_type == entity_type => {}
        Ok(_) => return engine_error(NearbyError::not_found(&kind, id)),
        Err(e) => return engine_error(e),
    }

    match state.engine.queue.enqueue_affected(id).await {
        Ok(enqueued) => {
            if enqueued > 0 {
                state.engine.scheduler.trigger(Job::ProcessBatch);
            }
            (StatusCode::ACCEPTED, Json(ChangedResponse { enqueued })).into_response()
        }
        Err(e) => engine_error(e),
    }
}

/// GET /v1/status
pub async fn get_status(State(state): State<GatewayState>) -> Response {
    match state.engine.status().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => engine_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_serializes() {
        let resp = ErrorResponse {
            error: "something went wrong".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"error":"something went wrong"}"#);
    }

    #[test]
    fn trigger_response_serializes() {
        let json = serde_json::to_string(&TriggerResponse { queued: true }).unwrap();
        assert!(json.contains("\"queued\":true"));
    }
}
