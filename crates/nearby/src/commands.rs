// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot CLI commands.
//!
//! Each command opens the database, does its work against a freshly wired
//! [`Engine`] and returns a serializable report for `main` to print.

use std::path::Path;
use std::sync::Arc;

use nearby_config::NearbyConfig;
use nearby_core::{Entity, EntityStore, EntityType, NearbyError, Provider, RoutingProvider, SystemClock};
use nearby_engine::{AutoReport, BatchReport, Engine, PurgeReport, Scheduler, StatusReport};
use nearby_routing::OrsProvider;
use nearby_storage::Database;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of `nearby enqueue`.
#[derive(Debug, Serialize)]
pub struct EnqueueReport {
    pub origin_id: i64,
    /// False when the origin was already queued or has nothing nearby.
    pub queued: bool,
}

/// Result of `nearby changed`.
#[derive(Debug, Serialize)]
pub struct ChangedReport {
    pub entity_id: i64,
    pub enqueued: usize,
}

/// Result of `nearby import`.
#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub entities: usize,
    pub enqueued: usize,
}

/// Result of `nearby sweep`.
#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
}

/// Result of `nearby reset-failed`.
#[derive(Debug, Serialize)]
pub struct ResetReport {
    pub reset: usize,
}

/// The routing provider for the effective mode, or `None` in basic mode.
pub fn routing_provider(
    config: &NearbyConfig,
) -> Result<Option<Arc<dyn RoutingProvider>>, NearbyError> {
    match config.effective_provider() {
        Provider::Routing => Ok(Some(Arc::new(OrsProvider::from_config(&config.routing)?))),
        Provider::Basic => {
            if config.routing.provider == Provider::Routing {
                warn!("routing.api_key is not set, using straight-line distances");
            }
            Ok(None)
        }
    }
}

/// Open the configured database and wire an engine on the system clock.
pub async fn open_engine(
    config: Arc<NearbyConfig>,
    cancel: CancellationToken,
) -> Result<(Engine, Scheduler), NearbyError> {
    let db = Database::open_from_config(&config.storage).await?;
    let routing = routing_provider(&config)?;
    Ok(Engine::build(config, db, routing, Arc::new(SystemClock), cancel))
}

/// Work the queue once, or in auto mode until it drains or halts.
pub async fn run_batch(
    engine: &Engine,
    max_items: Option<usize>,
) -> Result<BatchReport, NearbyError> {
    let max_items = max_items.unwrap_or(engine.config.auto.items_per_batch);
    let report = engine.batch.process_batch(max_items).await?;
    info!(
        processed = report.processed,
        errors = report.errors,
        deferred = report.deferred,
        "batch finished"
    );
    Ok(report)
}

pub async fn run_auto(engine: &Engine) -> Result<AutoReport, NearbyError> {
    engine.auto.run().await
}

/// Queue one origin, checking that it exists with the stated type.
pub async fn enqueue(
    engine: &Engine,
    entity_type: EntityType,
    id: i64,
    priority: Option<i32>,
) -> Result<EnqueueReport, NearbyError> {
    expect_entity(engine, entity_type, id).await?;
    let queued = engine.queue.enqueue(id, entity_type, priority).await?;
    Ok(EnqueueReport {
        origin_id: id,
        queued,
    })
}

/// Ripple-enqueue after an entity changed.
pub async fn changed(
    engine: &Engine,
    entity_type: EntityType,
    id: i64,
) -> Result<ChangedReport, NearbyError> {
    expect_entity(engine, entity_type, id).await?;
    let enqueued = engine.queue.enqueue_affected(id).await?;
    Ok(ChangedReport {
        entity_id: id,
        enqueued,
    })
}

/// Upsert entities from a JSON array file, then ripple each of them.
///
/// All rows are written before any ripple runs so neighbours imported in
/// the same file are already visible to the candidate search.
pub async fn import(engine: &Engine, path: &Path) -> Result<ImportReport, NearbyError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        NearbyError::Internal(format!("cannot read {}: {e}", path.display()))
    })?;
    let entities: Vec<Entity> = serde_json::from_str(&raw)?;

    for entity in &entities {
        engine.storage.upsert_entity(entity).await?;
    }
    let mut enqueued = 0;
    for entity in &entities {
        enqueued += engine.queue.enqueue_affected(entity.id).await?;
    }
    info!(entities = entities.len(), enqueued, "import finished");
    Ok(ImportReport {
        entities: entities.len(),
        enqueued,
    })
}

pub async fn status(engine: &Engine) -> Result<StatusReport, NearbyError> {
    engine.status().await
}

pub async fn sweep(engine: &Engine) -> Result<SweepReport, NearbyError> {
    let swept = engine.queue.sweep_stuck().await?;
    Ok(SweepReport {
        requeued: swept.requeued,
        failed: swept.failed,
    })
}

pub async fn reset_failed(engine: &Engine) -> Result<ResetReport, NearbyError> {
    let reset = engine.queue.reset_failed().await?;
    Ok(ResetReport { reset })
}

pub async fn purge(engine: &Engine) -> Result<PurgeReport, NearbyError> {
    engine.queue.purge_finished().await
}

async fn expect_entity(
    engine: &Engine,
    entity_type: EntityType,
    id: i64,
) -> Result<(), NearbyError> {
    match engine.storage.get_entity(id).await? {
        Some(entity) if entity.entity_type == entity_type => Ok(()),
        _ => Err(NearbyError::not_found(&entity_type.to_string(), id)),
    }
}
