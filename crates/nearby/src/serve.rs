// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `nearby serve` command implementation.
//!
//! Runs the scheduler worker, which sweeps stuck items, resumes the auto
//! processor when it is due and executes delayed retries. When the trigger
//! gateway is enabled it serves HTTP, including `/metrics` from the
//! Prometheus recorder installed here, until shutdown.

use std::sync::Arc;

use nearby_config::NearbyConfig;
use nearby_core::NearbyError;
use nearby_engine::metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use nearby_gateway::{GatewayState, MetricsRender, ServerConfig, start_server};
use tracing::{info, warn};

use crate::commands::open_engine;
use crate::shutdown;

/// Runs the `nearby serve` command until SIGINT or SIGTERM.
pub async fn run_serve(config: NearbyConfig) -> Result<(), NearbyError> {
    info!(name = %config.service.name, "starting nearby serve");

    let cancel = shutdown::install_signal_handler();
    let config = Arc::new(config);
    let (engine, scheduler) = open_engine(config.clone(), cancel.clone()).await?;
    let prometheus = install_prometheus()?;
    metrics::register_metrics();

    let worker = tokio::spawn(scheduler.run());

    let served = if config.trigger.enabled {
        let server_config = ServerConfig {
            host: config.trigger.host.clone(),
            port: config.trigger.port,
            bearer_token: config.trigger.token.clone(),
        };
        let state = GatewayState::new(engine.clone(), &server_config)
            .with_metrics(Arc::new(move || prometheus.render()) as MetricsRender);
        let result = start_server(&server_config, state, cancel.clone()).await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    } else {
        info!("trigger gateway disabled");
        cancel.cancelled().await;
        Ok(())
    };

    if let Err(e) = worker.await {
        warn!(error = %e, "scheduler worker ended abnormally");
    }
    if let Err(e) = engine.storage.db().checkpoint().await {
        warn!(error = %e, "final WAL checkpoint failed");
    }
    info!("nearby serve stopped");
    served
}

/// Install the process-wide Prometheus recorder. Only one can exist.
fn install_prometheus() -> Result<PrometheusHandle, NearbyError> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        NearbyError::Internal(format!("failed to install Prometheus recorder: {e}"))
    })?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}
