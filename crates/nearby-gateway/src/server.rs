// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use nearby_core::NearbyError;
use nearby_engine::Engine;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

/// Renders the installed metrics recorder as Prometheus text.
pub type MetricsRender = Arc<dyn Fn() -> String + Send + Sync>;

/// Process-level facts for the public endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub start_time: std::time::Instant,
    /// Absent when no recorder is installed; `/metrics` then answers 404.
    pub metrics_render: Option<MetricsRender>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Engine,
    pub auth: AuthConfig,
    pub health: HealthState,
}

/// Where to listen and which token to accept.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

impl GatewayState {
    pub fn new(engine: Engine, config: &ServerConfig) -> Self {
        Self {
            engine,
            auth: AuthConfig {
                bearer_token: config.bearer_token.clone(),
            },
            health: HealthState {
                start_time: std::time::Instant::now(),
                metrics_render: None,
            },
        }
    }

    /// Serve `render` on `GET /metrics`.
    pub fn with_metrics(mut self, render: MetricsRender) -> Self {
        self.health.metrics_render = Some(render);
        self
    }
}

/// Build the router:
/// - GET /health (public)
/// - GET /metrics (public)
/// - POST /v1/trigger (with auth)
/// - POST /v1/entities/{type}/{id}/changed (with auth)
/// - GET /v1/status (with auth)
pub fn router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/trigger", post(handlers::post_trigger))
        .route(
            "/v1/entities/{type}/{id}/changed",
            post(handlers::post_entity_changed),
        )
        .route("/v1/status", get(handlers::get_status))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), NearbyError> {
    if config.bearer_token.as_deref().is_none_or(str::is_empty) {
        tracing::warn!("trigger token not set; every authenticated route will answer 401");
    }
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| NearbyError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| NearbyError::Internal(format!("gateway server error: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use nearby_core::EntityType;
    use nearby_engine::Scheduler;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use nearby_test_utils::{MockRouting, TestStore, test_config};
    use tower::ServiceExt;

    use super::*;

    struct App {
        router: Router,
        store: TestStore,
        engine: Engine,
        config: ServerConfig,
        _scheduler: Scheduler,
    }

    async fn app(token: Option<&str>) -> App {
        let store = TestStore::new().await.unwrap();
        let (engine, scheduler) = Engine::build(
            Arc::new(test_config()),
            store.db.clone(),
            Some(Arc::new(MockRouting::new())),
            store.clock(),
            CancellationToken::new(),
        );
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            bearer_token: token.map(str::to_string),
        };
        App {
            router: router(GatewayState::new(engine.clone(), &config)),
            store,
            engine,
            config,
            _scheduler: scheduler,
        }
    }

    fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app(Some("secret")).await;
        let response = app
            .router
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_are_public_once_a_recorder_is_wired() {
        let app = app(Some("secret")).await;
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/metrics", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            nearby_engine::metrics::record_item("completed");
        });
        let state = GatewayState::new(app.engine.clone(), &app.config)
            .with_metrics(Arc::new(move || handle.render()));
        let response = router(state)
            .oneshot(request("GET", "/metrics", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("nearby_items_processed_total"));
        assert!(body.contains("outcome=\"completed\""));
    }

    #[tokio::test]
    async fn trigger_requires_the_right_token() {
        let app = app(Some("secret")).await;
        for token in [None, Some("wrong")] {
            let response = app
                .router
                .clone()
                .oneshot(request("POST", "/v1/trigger", token))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = app
            .router
            .clone()
            .oneshot(request("POST", "/v1/trigger", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json(response).await["queued"], true);

        // A second trigger folds into the waiting one.
        let response = app
            .router
            .oneshot(request("POST", "/v1/trigger", Some("secret")))
            .await
            .unwrap();
        assert_eq!(json(response).await["queued"], false);
    }

    #[tokio::test]
    async fn missing_token_config_fails_closed() {
        let app = app(None).await;
        let response = app
            .router
            .oneshot(request("GET", "/v1/status", Some("")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_reports_queue_and_quota() {
        let app = app(Some("secret")).await;
        let response = app
            .router
            .oneshot(request("GET", "/v1/status", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["provider"], "routing");
        assert_eq!(body["queue"]["pending"], 0);
        assert!(body["matrix"]["snapshot"]["remaining"].is_number());
    }

    #[tokio::test]
    async fn entity_change_ripples_into_the_queue() {
        let app = app(Some("secret")).await;
        app.store
            .seed(1, EntityType::Poi, 50.0755, 14.4378)
            .await
            .unwrap();
        app.store
            .seed(2, EntityType::ChargingLocation, 50.0765, 14.4378)
            .await
            .unwrap();

        let response = app
            .router
            .clone()
            .oneshot(request("POST", "/v1/entities/poi/1/changed", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        // The POI itself and the charging location that lists it.
        assert_eq!(json(response).await["enqueued"], 2);

        let response = app
            .router
            .clone()
            .oneshot(request(
                "POST",
                "/v1/entities/rv_spot/1/changed",
                Some("secret"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .router
            .oneshot(request(
                "POST",
                "/v1/entities/castle/1/changed",
                Some("secret"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
