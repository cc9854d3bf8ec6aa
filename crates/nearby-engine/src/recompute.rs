// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The recompute engine: builds one origin's nearby payload.
//!
//! A routing run walks the candidate list in chunks sized by the rate
//! limiter, calling the matrix endpoint once per chunk. After every chunk
//! but the last it writes a `partial` payload, so readers always see a
//! growing prefix and an interrupted run can pick up where it stopped.
//! Basic mode (no API key) derives everything from straight-line distance
//! in a single step and never touches the limiter.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nearby_config::NearbyConfig;
use nearby_core::traits::routing::RoutingError;
use nearby_core::{
    ApiCategory, CachePayload, Candidate, Clock, Coordinates, EntityStore, EntityType,
    IsochronePayload, NearbyError, NearbyItem, Progress, Provider, RelationType, RoutingProvider,
};
use nearby_quota::RateLimiter;
use tracing::{debug, error, info, warn};

use crate::locator::CandidateLocator;
use crate::lock::SingleFlight;
use crate::outcome::{PartialReason, RecomputeOutcome, RecomputeSummary};
use crate::scheduler::{Job, SchedulerHandle};

/// Error tag written when the origin has no usable coordinates.
pub const MISSING_COORDINATES: &str = "missing_coordinates";

/// Retry delay after a 429 that carried no `retry-after`.
const DEFAULT_RATE_LIMIT_RETRY_SECS: u64 = 60;

/// Computes and stores nearby and isochrone payloads.
pub struct RecomputeEngine {
    config: Arc<NearbyConfig>,
    store: Arc<dyn EntityStore>,
    routing: Option<Arc<dyn RoutingProvider>>,
    limiter: RateLimiter,
    locks: SingleFlight,
    locator: CandidateLocator,
    clock: Arc<dyn Clock>,
    scheduler: Option<SchedulerHandle>,
}

impl RecomputeEngine {
    /// Without a routing provider the engine runs in basic mode.
    pub fn new(
        config: Arc<NearbyConfig>,
        store: Arc<dyn EntityStore>,
        routing: Option<Arc<dyn RoutingProvider>>,
        limiter: RateLimiter,
        locks: SingleFlight,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locator: CandidateLocator::new(store.clone()),
            config,
            store,
            routing,
            limiter,
            locks,
            clock,
            scheduler: None,
        }
    }

    /// Deliver delayed retries after a 429 through `scheduler`.
    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Which provider produces payloads.
    pub fn provider(&self) -> Provider {
        if self.routing.is_some() {
            Provider::Routing
        } else {
            Provider::Basic
        }
    }

    /// Recompute the nearby payload for an origin.
    ///
    /// Returns [`RecomputeOutcome::Busy`] without side effects when another
    /// run holds the origin's lock. Safe to re-run at any time.
    pub async fn recompute(
        &self,
        origin_id: i64,
        origin_type: EntityType,
    ) -> Result<RecomputeOutcome, NearbyError> {
        let relation = RelationType::for_origin(origin_type);
        let outcome = self
            .locks
            .run_exclusive(
                origin_id,
                relation,
                self.run(origin_id, origin_type, relation),
            )
            .await?;
        Ok(outcome.unwrap_or(RecomputeOutcome::Busy))
    }

    async fn run(
        &self,
        origin_id: i64,
        origin_type: EntityType,
        relation: RelationType,
    ) -> Result<RecomputeOutcome, NearbyError> {
        let now = self.clock.now();
        let origin = self
            .store
            .get_entity(origin_id)
            .await?
            .and_then(|e| e.valid_coordinates());

        let Some(origin) = origin else {
            warn!(origin_id, %relation, "origin has no usable coordinates");
            let mut payload = CachePayload::empty(self.provider(), now);
            payload.error = Some(MISSING_COORDINATES.to_string());
            payload.error_at = Some(now);
            self.store.store_payload(origin_id, relation, &payload).await?;
            return Ok(RecomputeOutcome::MissingCoordinates);
        };

        let search = &self.config.search;
        let candidates = self
            .locator
            .find_candidates(
                origin,
                Some(origin_id),
                relation.candidate_type(),
                search.radius_km(relation),
                search.max_candidates,
            )
            .await?;

        if candidates.is_empty() {
            info!(origin_id, %relation, "no candidates in range");
            let payload = CachePayload::empty(self.provider(), now);
            self.store.store_payload(origin_id, relation, &payload).await?;
            return Ok(RecomputeOutcome::NoCandidates);
        }

        match &self.routing {
            None => self.run_basic(origin_id, relation, &candidates).await,
            Some(routing) => {
                self.run_routing(
                    routing.as_ref(),
                    origin_id,
                    origin_type,
                    relation,
                    origin,
                    &candidates,
                )
                .await
            }
        }
    }

    async fn run_basic(
        &self,
        origin_id: i64,
        relation: RelationType,
        candidates: &[Candidate],
    ) -> Result<RecomputeOutcome, NearbyError> {
        let speed_mps = self.config.routing.walking_speed_kmh / 3.6;
        let mut items: Vec<NearbyItem> = candidates
            .iter()
            .map(|c| {
                let distance_m = (c.distance_km * 1000.0).round();
                NearbyItem {
                    candidate_id: c.id,
                    candidate_type: c.entity_type,
                    duration_s: (distance_m / speed_mps).round(),
                    distance_m,
                }
            })
            .collect();
        sort_items(&mut items);

        let total = candidates.len();
        let payload = CachePayload {
            items,
            progress: Progress { done: total, total },
            ..CachePayload::empty(Provider::Basic, self.clock.now())
        };
        self.store.store_payload(origin_id, relation, &payload).await?;
        info!(origin_id, %relation, items = payload.items.len(), "basic nearby payload written");

        Ok(RecomputeOutcome::Completed(RecomputeSummary {
            candidates: count(total),
            items: count(payload.items.len()),
            api_calls: 0,
            provider: Provider::Basic,
            cache_bytes: payload_size(&payload),
        }))
    }

    async fn run_routing(
        &self,
        routing: &dyn RoutingProvider,
        origin_id: i64,
        origin_type: EntityType,
        relation: RelationType,
        origin: Coordinates,
        candidates: &[Candidate],
    ) -> Result<RecomputeOutcome, NearbyError> {
        let total = candidates.len();
        let mut items: Vec<NearbyItem> = Vec::new();
        let mut done = 0usize;

        if let Some(existing) = self.store.load_payload(origin_id, relation).await? {
            if let Some(resume_at) = resumable(&existing, candidates) {
                info!(origin_id, %relation, done = resume_at, total, "resuming partial payload");
                items = existing.items;
                done = resume_at;
            }
        }

        let mut api_calls = 0u32;
        let mut chunk_no = 0u32;
        while done < total {
            if !self.limiter.can_proceed().await? {
                warn!(
                    origin_id,
                    %relation, done, total, "routing quota unavailable mid-run, saving progress"
                );
                self.write_partial(origin_id, relation, &items, done, total, None)
                    .await?;
                return Ok(RecomputeOutcome::Partial {
                    reason: PartialReason::QuotaExhausted,
                    done: count(done),
                    total: count(total),
                    api_calls,
                });
            }
            let size = self
                .limiter
                .recommended_batch_size(Some(total - done))
                .await?;
            let acquire = self.limiter.try_acquire(ApiCategory::Matrix, true).await?;
            if !acquire.allowed {
                let wait_secs = acquire.wait_secs.unwrap_or(nearby_quota::bucket::MIN_WAIT_SECS);
                debug!(origin_id, %relation, wait_secs, "matrix bucket empty, saving progress");
                self.write_partial(origin_id, relation, &items, done, total, None)
                    .await?;
                return Ok(RecomputeOutcome::Partial {
                    reason: PartialReason::Throttled { wait_secs },
                    done: count(done),
                    total: count(total),
                    api_calls,
                });
            }

            let chunk = &candidates[done..(done + size).min(total)];
            let destinations: Vec<Coordinates> = chunk.iter().map(|c| c.coordinates).collect();
            api_calls += 1;
            chunk_no += 1;

            match routing.matrix(origin, &destinations).await {
                Ok(reply) => {
                    self.limiter
                        .record_response_headers(ApiCategory::Matrix, &reply.headers)
                        .await?;
                    for (i, candidate) in chunk.iter().enumerate() {
                        let Some(duration_s) = reply.body.durations.get(i).copied().flatten()
                        else {
                            continue;
                        };
                        let distance_m = reply
                            .body
                            .distances
                            .get(i)
                            .copied()
                            .flatten()
                            .unwrap_or(candidate.distance_km * 1000.0);
                        items.push(NearbyItem {
                            candidate_id: candidate.id,
                            candidate_type: candidate.entity_type,
                            duration_s,
                            distance_m,
                        });
                    }
                    done += chunk.len();
                    debug!(origin_id, %relation, chunk = chunk_no, done, total, "matrix chunk merged");

                    if done < total {
                        self.write_partial(origin_id, relation, &items, done, total, None)
                            .await?;
                        let throttle = self.config.routing.chunk_throttle();
                        if !throttle.is_zero() {
                            tokio::time::sleep(throttle).await;
                        }
                    }
                }
                Err(err) => {
                    let reason = self
                        .handle_matrix_error(&err, origin_id, origin_type, relation)
                        .await?;
                    let retry_after_s = match reason {
                        PartialReason::RateLimited { retry_after_s } => Some(retry_after_s),
                        PartialReason::Unauthorized => {
                            Some(self.config.cache.unauthorized_retry_after_secs)
                        }
                        _ => None,
                    };
                    self.write_partial(
                        origin_id,
                        relation,
                        &items,
                        done,
                        total,
                        Some((err.tag(), retry_after_s)),
                    )
                    .await?;
                    return Ok(RecomputeOutcome::Partial {
                        reason,
                        done: count(done),
                        total: count(total),
                        api_calls,
                    });
                }
            }
        }

        sort_items(&mut items);
        let payload = CachePayload {
            items,
            progress: Progress { done: total, total },
            ..CachePayload::empty(Provider::Routing, self.clock.now())
        };
        self.store.store_payload(origin_id, relation, &payload).await?;
        info!(
            origin_id,
            %relation,
            items = payload.items.len(),
            api_calls,
            "nearby payload complete"
        );

        let isochrone_calls = self
            .refresh_isochrones(routing, origin_id, origin, payload.computed_at)
            .await?;

        Ok(RecomputeOutcome::Completed(RecomputeSummary {
            candidates: count(total),
            items: count(payload.items.len()),
            api_calls: api_calls + isochrone_calls,
            provider: Provider::Routing,
            cache_bytes: payload_size(&payload),
        }))
    }

    /// Log, record headers, arm retries; returns the partial reason.
    async fn handle_matrix_error(
        &self,
        err: &RoutingError,
        origin_id: i64,
        origin_type: EntityType,
        relation: RelationType,
    ) -> Result<PartialReason, NearbyError> {
        if let Some(headers) = err.headers() {
            self.limiter
                .record_response_headers(ApiCategory::Matrix, headers)
                .await?;
        }
        let reason = match err {
            RoutingError::RateLimited { retry_after_s, .. } => {
                let retry_after_s = retry_after_s.unwrap_or(DEFAULT_RATE_LIMIT_RETRY_SECS);
                warn!(origin_id, %relation, retry_after_s, "matrix call rate limited");
                self.limiter
                    .note_rate_limited(ApiCategory::Matrix, retry_after_s)
                    .await?;
                if let Some(scheduler) = &self.scheduler {
                    scheduler.schedule_after(
                        std::time::Duration::from_secs(retry_after_s),
                        Job::Recompute {
                            origin_id,
                            origin_type,
                        },
                    );
                }
                PartialReason::RateLimited { retry_after_s }
            }
            RoutingError::Unauthorized { status } => {
                error!(
                    origin_id,
                    status, "routing API key rejected; check routing.api_key"
                );
                self.limiter
                    .note_unauthorized(
                        ApiCategory::Matrix,
                        self.config.cache.unauthorized_retry_after_secs,
                    )
                    .await?;
                PartialReason::Unauthorized
            }
            RoutingError::Malformed(detail) => {
                warn!(origin_id, %relation, detail, "malformed matrix response");
                PartialReason::Malformed
            }
            RoutingError::Transport(_) | RoutingError::Status { .. } => {
                warn!(origin_id, %relation, error = %err, "matrix call failed");
                PartialReason::Transport
            }
        };
        Ok(reason)
    }

    /// Save progress of an interrupted run.
    ///
    /// With nothing computed yet, whatever payload is stored stays in place
    /// for readers. A complete one only gains the error fields.
    async fn write_partial(
        &self,
        origin_id: i64,
        relation: RelationType,
        items: &[NearbyItem],
        done: usize,
        total: usize,
        error: Option<(&str, Option<u64>)>,
    ) -> Result<(), NearbyError> {
        let now = self.clock.now();
        if done == 0 {
            if let Some(mut previous) = self.store.load_payload(origin_id, relation).await? {
                let Some((tag, retry_after_s)) = error else {
                    return Ok(());
                };
                if !previous.partial {
                    previous.error = Some(tag.to_string());
                    previous.error_at = Some(now);
                    previous.retry_after_s = retry_after_s;
                    return self.store.store_payload(origin_id, relation, &previous).await;
                }
            }
        }
        let mut payload = CachePayload {
            items: items.to_vec(),
            partial: true,
            progress: Progress { done, total },
            ..CachePayload::empty(Provider::Routing, now)
        };
        if let Some((tag, retry_after_s)) = error {
            payload.error = Some(tag.to_string());
            payload.error_at = Some(now);
            payload.retry_after_s = retry_after_s;
        }
        self.store.store_payload(origin_id, relation, &payload).await
    }

    /// Fetch isochrones when the stored ones are older than the nearby
    /// payload. Returns the number of API calls made. Failures are written
    /// into the isochrone payload and never touch the nearby payload.
    async fn refresh_isochrones(
        &self,
        routing: &dyn RoutingProvider,
        origin_id: i64,
        center: Coordinates,
        cache_computed_at: DateTime<Utc>,
    ) -> Result<u32, NearbyError> {
        let now = self.clock.now();
        let existing = self.store.load_isochrone(origin_id).await?;
        if existing
            .as_ref()
            .is_some_and(|iso| !iso.is_stale(now, Some(cache_computed_at)))
        {
            return Ok(0);
        }
        if !self.limiter.can_proceed_for(ApiCategory::Isochrones).await? {
            debug!(origin_id, "isochrone quota unavailable, skipping");
            return Ok(0);
        }
        let acquire = self
            .limiter
            .try_acquire(ApiCategory::Isochrones, true)
            .await?;
        if !acquire.allowed {
            debug!(origin_id, wait_secs = ?acquire.wait_secs, "isochrone bucket empty, skipping");
            return Ok(0);
        }

        let routing_config = &self.config.routing;
        let mut payload = IsochronePayload {
            profile: routing_config.profile.clone(),
            ranges_s: routing_config.isochrone_ranges_s.clone(),
            center,
            geojson: serde_json::Value::Null,
            computed_at: now,
            ttl_days: self.config.cache.isochrone_ttl_days,
            error: None,
        };

        match routing.isochrones(center, &routing_config.isochrone_ranges_s).await {
            Ok(reply) => {
                self.limiter
                    .record_response_headers(ApiCategory::Isochrones, &reply.headers)
                    .await?;
                payload.geojson = reply.body;
            }
            Err(err) => {
                if let Some(headers) = err.headers() {
                    self.limiter
                        .record_response_headers(ApiCategory::Isochrones, headers)
                        .await?;
                }
                match &err {
                    RoutingError::RateLimited { retry_after_s, .. } => {
                        self.limiter
                            .note_rate_limited(
                                ApiCategory::Isochrones,
                                retry_after_s.unwrap_or(DEFAULT_RATE_LIMIT_RETRY_SECS),
                            )
                            .await?;
                    }
                    RoutingError::Unauthorized { .. } => {
                        self.limiter
                            .note_unauthorized(
                                ApiCategory::Isochrones,
                                self.config.cache.unauthorized_retry_after_secs,
                            )
                            .await?;
                    }
                    _ => {}
                }
                warn!(origin_id, error = %err, "isochrone fetch failed");
                if let Some(previous) = existing {
                    payload.geojson = previous.geojson;
                }
                payload.error = Some(err.tag().to_string());
            }
        }
        self.store.store_isochrone(origin_id, &payload).await?;
        Ok(1)
    }
}

/// Where a stored partial payload can be continued from, if at all.
///
/// The payload must come from an interrupted routing run over the same
/// candidate list: same total, and every stored item among the first
/// `done` candidates. Payloads stopped by a rejected key start over.
fn resumable(existing: &CachePayload, candidates: &[Candidate]) -> Option<usize> {
    if !existing.partial
        || existing.provider != Provider::Routing
        || existing.error.as_deref() == Some("unauthorized")
    {
        return None;
    }
    let done = existing.progress.done;
    if existing.progress.total != candidates.len() || done == 0 || done > candidates.len()
    {
        return None;
    }
    let leading: HashSet<i64> = candidates[..done].iter().map(|c| c.id).collect();
    existing
        .items
        .iter()
        .all(|item| leading.contains(&item.candidate_id))
        .then_some(done)
}

/// Ascending by duration, ties by candidate id, so the order is stable
/// across writes and reads.
pub fn sort_items(items: &mut [NearbyItem]) {
    items.sort_by(|a, b| {
        a.duration_s
            .total_cmp(&b.duration_s)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn payload_size(payload: &CachePayload) -> u64 {
    serde_json::to_vec(payload).map_or(0, |v| v.len() as u64)
}
