// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch processor: drains a bounded number of queue items per call.

use std::sync::Arc;
use std::time::Instant;

use nearby_config::NearbyConfig;
use nearby_core::{
    ApiCategory, Clock, EntityStore, NearbyError, ProcessedRecord, Provider, QueueItem,
};
use nearby_quota::RateLimiter;
use nearby_storage::Database;
use nearby_storage::queries::history;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::outcome::{BatchReport, HaltReason, PartialReason, RecomputeOutcome};
use crate::queue::QueueManager;
use crate::recompute::{MISSING_COORDINATES, RecomputeEngine};

/// How one item counts in the batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally {
    Processed,
    Error,
    Deferred,
}

/// Runs queue items through the recompute engine.
#[derive(Clone)]
pub struct BatchProcessor {
    queue: QueueManager,
    engine: Arc<RecomputeEngine>,
    limiter: RateLimiter,
    store: Arc<dyn EntityStore>,
    db: Database,
    config: Arc<NearbyConfig>,
    clock: Arc<dyn Clock>,
}

impl BatchProcessor {
    pub fn new(
        queue: QueueManager,
        engine: Arc<RecomputeEngine>,
        limiter: RateLimiter,
        store: Arc<dyn EntityStore>,
        db: Database,
        config: Arc<NearbyConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            engine,
            limiter,
            store,
            db,
            config,
            clock,
        }
    }

    /// Process up to `max_items` pending items.
    ///
    /// With routing quota spent the call returns at once with a halted
    /// report and dequeues nothing. Per-item failures are recorded on the
    /// queue item and never abort the batch. A throttle, a 429, a rejected
    /// key or quota running out mid-run stops it after the current item.
    pub async fn process_batch(&self, max_items: usize) -> Result<BatchReport, NearbyError> {
        if self.engine.provider() == Provider::Routing && !self.limiter.can_proceed().await? {
            let resume_at = self.limiter.resume_at(ApiCategory::Matrix).await?;
            warn!(%resume_at, "routing quota exhausted, batch skipped");
            return Ok(BatchReport::halted(HaltReason::QuotaExhausted { resume_at }));
        }

        let items = self.queue.dequeue_batch(max_items).await?;
        let mut report = BatchReport::default();

        for item in items {
            if !self.queue.mark_processing(item.id).await? {
                debug!(id = item.id, "item claimed elsewhere, skipping");
                continue;
            }

            let (tally, halt) = match self.process_item(&item).await {
                Ok(result) => result,
                Err(e) => {
                    error!(id = item.id, origin_id = item.origin_id, error = %e, "recompute failed");
                    self.queue.mark_failed(item.id, &e.to_string()).await?;
                    metrics::record_item("error");
                    (Tally::Error, None)
                }
            };
            match tally {
                Tally::Processed => report.processed += 1,
                Tally::Error => report.errors += 1,
                Tally::Deferred => report.deferred += 1,
            }
            if let Some(reason) = halt {
                warn!(resume_at = %reason.resume_at(), ?reason, "batch halted");
                report.halted = Some(reason);
                break;
            }
        }

        info!(
            processed = report.processed,
            errors = report.errors,
            deferred = report.deferred,
            halted = report.halted.is_some(),
            "batch finished"
        );
        Ok(report)
    }

    async fn process_item(
        &self,
        item: &QueueItem,
    ) -> Result<(Tally, Option<HaltReason>), NearbyError> {
        if self.is_fresh(item).await? {
            debug!(origin_id = item.origin_id, "payload fresh, no recompute needed");
            self.queue.mark_completed(item.id).await?;
            metrics::record_item("fresh");
            return Ok((Tally::Processed, None));
        }

        let started = Instant::now();
        let outcome = self
            .engine
            .recompute(item.origin_id, item.origin_type)
            .await?;
        let elapsed = started.elapsed();
        metrics::record_recompute_latency(elapsed.as_secs_f64());
        let processing_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            RecomputeOutcome::Completed(summary) => {
                self.queue.mark_completed(item.id).await?;
                self.record_history(
                    item,
                    summary.candidates,
                    summary.api_calls,
                    summary.provider,
                    summary.cache_bytes,
                    processing_ms,
                )
                .await?;
                metrics::record_item("completed");
                (Tally::Processed, None)
            }
            RecomputeOutcome::NoCandidates => {
                self.queue.mark_completed(item.id).await?;
                self.record_history(item, 0, 0, self.engine.provider(), 0, processing_ms)
                    .await?;
                metrics::record_item("no_candidates");
                (Tally::Processed, None)
            }
            RecomputeOutcome::MissingCoordinates => {
                self.queue
                    .fail_permanently(item.id, MISSING_COORDINATES)
                    .await?;
                metrics::record_item("missing_coordinates");
                (Tally::Error, None)
            }
            RecomputeOutcome::Busy => {
                self.queue.defer(item.id, "busy").await?;
                metrics::record_item("busy");
                (Tally::Deferred, None)
            }
            RecomputeOutcome::Partial { reason, .. } => self.handle_partial(item, reason).await?,
        };
        Ok(result)
    }

    async fn handle_partial(
        &self,
        item: &QueueItem,
        reason: PartialReason,
    ) -> Result<(Tally, Option<HaltReason>), NearbyError> {
        let now = self.clock.now();
        metrics::record_item(reason.tag());
        if reason.is_deferrable() {
            self.queue.defer(item.id, reason.tag()).await?;
        } else {
            self.queue.mark_failed(item.id, reason.tag()).await?;
        }

        let result = match reason {
            PartialReason::Throttled { wait_secs } => (
                Tally::Deferred,
                Some(HaltReason::Throttled {
                    resume_at: now + crate::seconds(wait_secs),
                }),
            ),
            PartialReason::RateLimited { .. } => {
                let resume_at = self.limiter.resume_at(ApiCategory::Matrix).await?;
                (Tally::Deferred, Some(HaltReason::RateLimited { resume_at }))
            }
            PartialReason::QuotaExhausted => {
                let resume_at = self.limiter.resume_at(ApiCategory::Matrix).await?;
                (Tally::Deferred, Some(HaltReason::QuotaExhausted { resume_at }))
            }
            PartialReason::Unauthorized => {
                let resume_at = self.limiter.resume_at(ApiCategory::Matrix).await?;
                (Tally::Error, Some(HaltReason::Unauthorized { resume_at }))
            }
            PartialReason::Transport | PartialReason::Malformed => (Tally::Error, None),
        };
        Ok(result)
    }

    /// Fresh means no recompute is owed: a clean payload newer than both
    /// the TTL and the enqueue time, from the provider now in use, with
    /// current isochrones when routing.
    async fn is_fresh(&self, item: &QueueItem) -> Result<bool, NearbyError> {
        let now = self.clock.now();
        let Some(payload) = self
            .store
            .load_payload(item.origin_id, item.relation())
            .await?
        else {
            return Ok(false);
        };
        if payload.is_stale(now, self.config.cache.ttl(), Some(item.created_at)) {
            return Ok(false);
        }
        let provider = self.engine.provider();
        if payload.provider != provider {
            return Ok(false);
        }
        if provider == Provider::Routing && !payload.items.is_empty() {
            let fresh_iso = self
                .store
                .load_isochrone(item.origin_id)
                .await?
                .is_some_and(|iso| !iso.is_stale(now, Some(payload.computed_at)));
            return Ok(fresh_iso);
        }
        Ok(true)
    }

    async fn record_history(
        &self,
        item: &QueueItem,
        candidate_count: u32,
        api_calls: u32,
        provider: Provider,
        cache_bytes: u64,
        processing_ms: u64,
    ) -> Result<(), NearbyError> {
        let record = ProcessedRecord {
            origin_id: item.origin_id,
            origin_type: item.origin_type,
            candidate_count,
            api_calls,
            processing_ms,
            provider,
            cache_bytes,
            processed_at: self.clock.now(),
        };
        history::upsert(&self.db, &record).await
    }
}
