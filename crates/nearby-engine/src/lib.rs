// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Proximity computation engine.
//!
//! Ties the pieces together: the candidate locator narrows the search,
//! the recompute engine turns candidates into cached walking times under
//! the rate limiter's control, the queue manager holds the durable work
//! list, and the batch and auto processors drain it. [`Engine::build`]
//! wires everything from one validated config.

pub mod auto;
pub mod batch;
pub mod locator;
pub mod lock;
pub mod metrics;
pub mod outcome;
pub mod queue;
pub mod recompute;
pub mod scheduler;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use nearby_config::NearbyConfig;
use nearby_core::{Clock, EntityStore, RoutingProvider};
use nearby_quota::RateLimiter;
use nearby_storage::{Database, SqliteStorage};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use auto::{AutoProcessor, AutoReport, AutoStop};
pub use batch::BatchProcessor;
pub use locator::{CandidateLocator, haversine_km};
pub use lock::SingleFlight;
pub use outcome::{BatchReport, HaltReason, PartialReason, RecomputeOutcome, RecomputeSummary};
pub use queue::{PurgeReport, QueueManager};
pub use recompute::RecomputeEngine;
pub use scheduler::{Job, Scheduler, SchedulerHandle};
pub use status::StatusReport;

/// Every engine component, wired to one database and one config.
#[derive(Clone)]
pub struct Engine {
    pub config: Arc<NearbyConfig>,
    pub storage: SqliteStorage,
    pub limiter: RateLimiter,
    pub recompute: Arc<RecomputeEngine>,
    pub queue: QueueManager,
    pub batch: BatchProcessor,
    pub auto: AutoProcessor,
    pub scheduler: SchedulerHandle,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Wire the engine. `routing` of `None` selects basic mode.
    ///
    /// Returns the scheduler worker alongside; spawn [`Scheduler::run`] to
    /// have triggers and delayed retries actually execute.
    pub fn build(
        config: Arc<NearbyConfig>,
        db: Database,
        routing: Option<Arc<dyn RoutingProvider>>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> (Self, Scheduler) {
        let storage = SqliteStorage::new(db.clone(), clock.clone());
        let store: Arc<dyn EntityStore> = Arc::new(storage.clone());
        let limiter = RateLimiter::new(db.clone(), &config.quota, clock.clone());
        let locks = SingleFlight::new(db.clone(), clock.clone(), config.queue.lock_ttl_secs);
        let (handle, jobs) = SchedulerHandle::channel(cancel);

        let recompute = Arc::new(
            RecomputeEngine::new(
                config.clone(),
                store.clone(),
                routing,
                limiter.clone(),
                locks,
                clock.clone(),
            )
            .with_scheduler(handle.clone()),
        );
        let queue = QueueManager::new(db.clone(), store.clone(), config.clone(), clock.clone());
        let batch = BatchProcessor::new(
            queue.clone(),
            recompute.clone(),
            limiter.clone(),
            store,
            db.clone(),
            config.clone(),
            clock.clone(),
        );
        let auto = AutoProcessor::new(
            batch.clone(),
            queue.clone(),
            db,
            config.clone(),
            clock.clone(),
        );
        let scheduler = Scheduler::new(
            auto.clone(),
            recompute.clone(),
            queue.clone(),
            handle.clone(),
            jobs,
            clock.clone(),
            Duration::from_secs(config.auto.idle_poll_secs),
        );
        info!(provider = %recompute.provider(), "engine ready");

        let engine = Self {
            config,
            storage,
            limiter,
            recompute,
            queue,
            batch,
            auto,
            scheduler: handle,
            clock,
        };
        (engine, scheduler)
    }
}

/// Upper bound for configured delays, far below chrono's overflow range.
const MAX_DELAY_SECS: u64 = 100 * 365 * 86_400;

/// Seconds as a chrono duration, clamped so date arithmetic cannot panic.
pub(crate) fn seconds(n: u64) -> chrono::Duration {
    chrono::Duration::seconds(n.min(MAX_DELAY_SECS) as i64)
}
