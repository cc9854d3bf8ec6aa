// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue manager: the durable work list of origins awaiting recompute.
//!
//! Thin policy over `nearby_storage::queries::queue`. The storage layer
//! owns the atomic transitions; this layer decides what deserves a queue
//! row (an origin with something nearby) and which neighbours a change
//! ripples out to.

use std::sync::Arc;

use chrono::Duration;
use nearby_config::NearbyConfig;
use nearby_core::{
    CachePayload, Clock, EntityStore, EntityType, NearbyError, QueueItem, QueueStats, QueueStatus,
    RelationType,
};
use nearby_storage::Database;
use nearby_storage::queries::queue::SweepResult;
use nearby_storage::queries::{history, queue, state};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::locator::CandidateLocator;
use crate::metrics;

/// Rows removed by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub queue_rows: usize,
    pub history_rows: usize,
    pub state_keys: usize,
}

/// Enqueue, transition and housekeep queue items.
#[derive(Clone)]
pub struct QueueManager {
    db: Database,
    store: Arc<dyn EntityStore>,
    locator: CandidateLocator,
    config: Arc<NearbyConfig>,
    clock: Arc<dyn Clock>,
}

impl QueueManager {
    pub fn new(
        db: Database,
        store: Arc<dyn EntityStore>,
        config: Arc<NearbyConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locator: CandidateLocator::new(store.clone()),
            db,
            store,
            config,
            clock,
        }
    }

    /// Queue an origin for recompute.
    ///
    /// Returns false when the origin already has an active item, or when
    /// nothing lies within its search radius. Origins without usable
    /// coordinates are queued anyway so the run records the problem.
    pub async fn enqueue(
        &self,
        origin_id: i64,
        origin_type: EntityType,
        priority: Option<i32>,
    ) -> Result<bool, NearbyError> {
        if let Some(existing) = queue::find_by_origin(&self.db, origin_id).await? {
            if existing.status.is_active() {
                debug!(origin_id, status = %existing.status, "already queued");
                return Ok(false);
            }
        }

        let relation = RelationType::for_origin(origin_type);
        let origin = self
            .store
            .get_entity(origin_id)
            .await?
            .and_then(|e| e.valid_coordinates());
        if let Some(origin) = origin {
            let nearest = self
                .locator
                .find_candidates(
                    origin,
                    Some(origin_id),
                    relation.candidate_type(),
                    self.config.search.radius_km(relation),
                    1,
                )
                .await?;
            if nearest.is_empty() {
                debug!(origin_id, %relation, "nothing in range, not queuing");
                self.clear_stale_items(origin_id, relation).await?;
                return Ok(false);
            }
        }

        let priority = priority.unwrap_or(self.config.queue.default_priority);
        let id = queue::enqueue(
            &self.db,
            origin_id,
            origin_type,
            priority,
            self.config.queue.max_attempts,
            self.clock.now(),
        )
        .await?;
        match id {
            Some(id) => {
                debug!(origin_id, id, priority, "queued");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// An origin whose last neighbour disappeared still has the old list
    /// cached. Replace it with an empty one; no API call is needed for that.
    async fn clear_stale_items(
        &self,
        origin_id: i64,
        relation: RelationType,
    ) -> Result<(), NearbyError> {
        let Some(existing) = self.store.load_payload(origin_id, relation).await? else {
            return Ok(());
        };
        if existing.items.is_empty() && !existing.partial && existing.error.is_none() {
            return Ok(());
        }
        let payload = CachePayload::empty(self.config.effective_provider(), self.clock.now());
        self.store.store_payload(origin_id, relation, &payload).await
    }

    /// Ripple a change out from `changed_id`.
    ///
    /// Queues the entity itself when it is published, then every published
    /// origin within `search.affected_radius_km` whose nearby list could
    /// include it, at ripple priority. Returns how many items were queued.
    pub async fn enqueue_affected(&self, changed_id: i64) -> Result<usize, NearbyError> {
        let Some(changed) = self.store.get_entity(changed_id).await? else {
            return Err(NearbyError::not_found("entity", changed_id));
        };

        let mut queued = 0;
        if changed.published && self.enqueue(changed.id, changed.entity_type, None).await? {
            queued += 1;
        }

        let Some(center) = changed.valid_coordinates() else {
            warn!(changed_id, "changed entity has no usable coordinates, no ripple");
            return Ok(queued);
        };

        let ripple = self.config.queue.ripple_priority;
        for origin_type in RelationType::origins_listing(changed.entity_type) {
            let neighbours = self
                .locator
                .find_candidates(
                    center,
                    Some(changed_id),
                    origin_type,
                    self.config.search.affected_radius_km,
                    usize::MAX,
                )
                .await?;
            for neighbour in neighbours {
                if self
                    .enqueue(neighbour.id, neighbour.entity_type, Some(ripple))
                    .await?
                {
                    queued += 1;
                }
            }
        }

        info!(changed_id, queued, "ripple enqueue");
        Ok(queued)
    }

    /// Pending items, highest priority first, oldest first within a priority.
    pub async fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueItem>, NearbyError> {
        queue::dequeue_batch(&self.db, limit).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueItem>, NearbyError> {
        queue::get(&self.db, id).await
    }

    /// Returns false when another worker claimed the item first.
    pub async fn mark_processing(&self, id: i64) -> Result<bool, NearbyError> {
        queue::mark_processing(&self.db, id, self.clock.now()).await
    }

    pub async fn mark_completed(&self, id: i64) -> Result<(), NearbyError> {
        queue::mark_completed(&self.db, id, self.clock.now()).await
    }

    /// Charge an attempt. Returns the resulting status: `Pending` while
    /// attempts remain, `Failed` once they are used up.
    pub async fn mark_failed(
        &self,
        id: i64,
        error: &str,
    ) -> Result<Option<QueueStatus>, NearbyError> {
        queue::mark_failed(&self.db, id, error, self.clock.now()).await
    }

    /// Back to pending without charging an attempt.
    pub async fn defer(&self, id: i64, reason: &str) -> Result<(), NearbyError> {
        queue::defer(&self.db, id, reason, self.clock.now()).await
    }

    /// Straight to failed, whatever the attempt count.
    pub async fn fail_permanently(&self, id: i64, error: &str) -> Result<(), NearbyError> {
        queue::fail_permanently(&self.db, id, error, self.clock.now()).await
    }

    /// Return items stuck in `processing` past the configured timeout.
    pub async fn sweep_stuck(&self) -> Result<SweepResult, NearbyError> {
        let now = self.clock.now();
        let timeout = crate::seconds(self.config.queue.processing_timeout_secs);
        let result = queue::sweep_stuck(&self.db, now - timeout, now).await?;
        if result.requeued + result.failed > 0 {
            warn!(
                requeued = result.requeued,
                failed = result.failed,
                "swept stuck queue items"
            );
        }
        Ok(result)
    }

    /// Drop finished rows and history past the retention window, along
    /// with expired state keys.
    pub async fn purge_finished(&self) -> Result<PurgeReport, NearbyError> {
        let now = self.clock.now();
        let cutoff = now - Duration::days(i64::from(self.config.queue.retention_days));
        let report = PurgeReport {
            queue_rows: queue::purge_finished(&self.db, cutoff).await?,
            history_rows: history::purge_before(&self.db, cutoff).await?,
            state_keys: state::purge_expired(&self.db, now).await?,
        };
        info!(
            queue_rows = report.queue_rows,
            history_rows = report.history_rows,
            state_keys = report.state_keys,
            "retention purge"
        );
        Ok(report)
    }

    /// Give terminal failures a fresh set of attempts.
    pub async fn reset_failed(&self) -> Result<usize, NearbyError> {
        let n = queue::reset_failed(&self.db, self.clock.now()).await?;
        info!(count = n, "reset failed queue items");
        Ok(n)
    }

    pub async fn pending_count(&self) -> Result<u64, NearbyError> {
        let n = queue::pending_count(&self.db).await?;
        metrics::set_queue_pending(n);
        Ok(n)
    }

    pub async fn stats(&self) -> Result<QueueStats, NearbyError> {
        let stats = queue::stats(&self.db).await?;
        metrics::set_queue_pending(stats.pending);
        Ok(stats)
    }
}
