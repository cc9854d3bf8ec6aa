// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rate limiter every routing call goes through.
//!
//! Combines the per-category token buckets (call timing) with the
//! day-scoped quota snapshot (whether to start at all). The limiter owns
//! all bucket and snapshot state; other components only ask it questions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use nearby_config::model::QuotaConfig;
use nearby_core::{ApiCategory, Clock, NearbyError, QuotaSnapshot, QuotaSource, RateHeaders};
use nearby_storage::queries::state;
use nearby_storage::{Database, StateWrite};
use tracing::{debug, warn};

use crate::bucket::{Acquire, TokenBucket};
use crate::snapshot::SnapshotStore;
use crate::tracker::{QuotaCategory, QuotaLimits, QuotaTracker, SharedRouting, UsageReport};

/// Idle buckets are dropped after this long; a missing bucket reads as full.
const BUCKET_TTL_SECS: i64 = 600;

/// Daily budgets: one shared by all categories, or one per category.
#[derive(Debug, Clone)]
enum DailyBudget {
    Shared(QuotaTracker<SharedRouting>),
    PerCategory {
        matrix: QuotaTracker<ApiCategory>,
        isochrones: QuotaTracker<ApiCategory>,
    },
}

impl DailyBudget {
    fn from_config(db: &Database, config: &QuotaConfig) -> Self {
        let limits = |category: ApiCategory| QuotaLimits {
            daily: config.daily(category),
            monthly: config.monthly(category),
            buffer: config.daily_buffer,
        };
        if config.shared_daily_budget {
            DailyBudget::Shared(QuotaTracker::new(
                db.clone(),
                SharedRouting,
                limits(ApiCategory::Matrix),
            ))
        } else {
            DailyBudget::PerCategory {
                matrix: QuotaTracker::new(
                    db.clone(),
                    ApiCategory::Matrix,
                    limits(ApiCategory::Matrix),
                ),
                isochrones: QuotaTracker::new(
                    db.clone(),
                    ApiCategory::Isochrones,
                    limits(ApiCategory::Isochrones),
                ),
            }
        }
    }

    fn scope(&self, category: ApiCategory) -> &'static str {
        match self {
            DailyBudget::Shared(t) => t.category().key(),
            DailyBudget::PerCategory { .. } => category.key(),
        }
    }

    async fn usage(
        &self,
        category: ApiCategory,
        now: DateTime<Utc>,
    ) -> Result<UsageReport, NearbyError> {
        match (self, category) {
            (DailyBudget::Shared(t), _) => t.usage(now).await,
            (DailyBudget::PerCategory { matrix, .. }, ApiCategory::Matrix) => {
                matrix.usage(now).await
            }
            (DailyBudget::PerCategory { isochrones, .. }, ApiCategory::Isochrones) => {
                isochrones.usage(now).await
            }
        }
    }

    async fn record(&self, category: ApiCategory, now: DateTime<Utc>) -> Result<(), NearbyError> {
        match (self, category) {
            (DailyBudget::Shared(t), _) => t.record(1, now).await?,
            (DailyBudget::PerCategory { matrix, .. }, ApiCategory::Matrix) => {
                matrix.record(1, now).await?
            }
            (DailyBudget::PerCategory { isochrones, .. }, ApiCategory::Isochrones) => {
                isochrones.record(1, now).await?
            }
        };
        Ok(())
    }

    async fn check(&self, category: ApiCategory, now: DateTime<Utc>) -> Result<bool, NearbyError> {
        match (self, category) {
            (DailyBudget::Shared(t), _) => t.check(now).await,
            (DailyBudget::PerCategory { matrix, .. }, ApiCategory::Matrix) => {
                matrix.check(now).await
            }
            (DailyBudget::PerCategory { isochrones, .. }, ApiCategory::Isochrones) => {
                isochrones.check(now).await
            }
        }
    }

    async fn resets_at(
        &self,
        category: ApiCategory,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, NearbyError> {
        match (self, category) {
            (DailyBudget::Shared(t), _) => t.resets_at(now).await,
            (DailyBudget::PerCategory { matrix, .. }, ApiCategory::Matrix) => {
                matrix.resets_at(now).await
            }
            (DailyBudget::PerCategory { isochrones, .. }, ApiCategory::Isochrones) => {
                isochrones.resets_at(now).await
            }
        }
    }
}

/// Shared gatekeeper for routing API calls.
#[derive(Clone)]
pub struct RateLimiter {
    db: Database,
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
    snapshots: SnapshotStore,
    budget: DailyBudget,
}

impl RateLimiter {
    pub fn new(db: Database, config: &QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshots: SnapshotStore::new(
                db.clone(),
                config.remaining_ttl_secs,
                config.reset_ttl_secs,
            ),
            budget: DailyBudget::from_config(&db, config),
            db,
            config: config.clone(),
            clock,
        }
    }

    /// Refill the category's bucket and take a token if one is available.
    ///
    /// With `consume` false this only reports whether a call could go now.
    /// A consumed token is also counted against the daily budget.
    pub async fn try_acquire(
        &self,
        category: ApiCategory,
        consume: bool,
    ) -> Result<Acquire, NearbyError> {
        let now = self.clock.now();
        let capacity = self.config.per_minute(category);
        let expires_at = now + Duration::seconds(BUCKET_TTL_SECS);
        let key = format!("bucket:{category}");

        let acquire = state::update(&self.db, &key, now, move |current| {
            let mut bucket = current
                .and_then(|entry| serde_json::from_str::<TokenBucket>(&entry.value).ok())
                .unwrap_or_else(|| TokenBucket::full(capacity, now));
            bucket.resize(capacity);
            let acquire = bucket.try_acquire(now, consume);
            let write = if acquire.allowed && consume {
                match serde_json::to_string(&bucket) {
                    Ok(value) => StateWrite::Put {
                        value,
                        expires_at: Some(expires_at),
                    },
                    Err(_) => StateWrite::Keep,
                }
            } else {
                StateWrite::Keep
            };
            (write, acquire)
        })
        .await?;

        if acquire.allowed && consume {
            self.budget.record(category, now).await?;
            metrics::counter!("nearby_api_calls_total", "category" => category.to_string())
                .increment(1);
            debug!(%category, tokens = acquire.tokens_remaining, "routing token acquired");
        } else if !acquire.allowed {
            debug!(%category, wait_secs = ?acquire.wait_secs, "routing bucket empty");
        }
        Ok(acquire)
    }

    /// Update the quota snapshot from a routing response's headers.
    pub async fn record_response_headers(
        &self,
        category: ApiCategory,
        headers: &RateHeaders,
    ) -> Result<(), NearbyError> {
        if headers.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        if headers.remaining == Some(0) {
            warn!(%category, "routing provider reports no calls remaining");
        }
        self.snapshots
            .record(self.budget.scope(category), headers, now)
            .await
    }

    /// Current quota view for a category.
    ///
    /// `remaining` comes from the provider's headers while they are fresh,
    /// and otherwise from the locally counted daily budget. An exhausted
    /// monthly cap forces it to zero either way.
    pub async fn snapshot(&self, category: ApiCategory) -> Result<QuotaSnapshot, NearbyError> {
        let now = self.clock.now();
        let scope = self.budget.scope(category);
        let header = self.snapshots.read(scope, now).await?;
        let usage = self.budget.usage(category, now).await?;
        let monthly_spent = usage
            .limits
            .monthly
            .is_some_and(|monthly| usage.used_month >= monthly);

        let (remaining, source) = match header.remaining {
            Some(_) if monthly_spent => (0, QuotaSource::Headers),
            Some(remaining) => (remaining, QuotaSource::Headers),
            None => (usage.remaining, QuotaSource::Fallback),
        };
        let reset_at = match header.reset_at {
            Some(reset_at) => reset_at,
            None => self.budget.resets_at(category, now).await?,
        };

        Ok(QuotaSnapshot {
            remaining,
            reset_at: Some(reset_at),
            retry_until: header.retry_until,
            source,
        })
    }

    /// True if matrix work may start now.
    pub async fn can_proceed(&self) -> Result<bool, NearbyError> {
        self.can_proceed_for(ApiCategory::Matrix).await
    }

    /// True if the category's quota has calls left and no retry window is active.
    pub async fn can_proceed_for(&self, category: ApiCategory) -> Result<bool, NearbyError> {
        let snapshot = self.snapshot(category).await?;
        let allowed = snapshot.allows(self.clock.now());
        if allowed && snapshot.source == QuotaSource::Fallback {
            // Only for the 80% warnings; the snapshot already reflects the counts.
            self.budget.check(category, self.clock.now()).await?;
        }
        Ok(allowed)
    }

    /// Chunk size for the next matrix call:
    /// `min(batch_size, hard_cap, remaining, requested)`, at least 1.
    pub async fn recommended_batch_size(
        &self,
        requested: Option<usize>,
    ) -> Result<usize, NearbyError> {
        let snapshot = self.snapshot(ApiCategory::Matrix).await?;
        let remaining = usize::try_from(snapshot.remaining.max(0)).unwrap_or(usize::MAX);
        let size = self
            .config
            .batch_size
            .min(self.config.hard_cap)
            .min(remaining)
            .min(requested.unwrap_or(usize::MAX));
        Ok(size.max(1))
    }

    /// Block a category after a 429 until `retry_after_s` has passed.
    pub async fn note_rate_limited(
        &self,
        category: ApiCategory,
        retry_after_s: u64,
    ) -> Result<(), NearbyError> {
        let now = self.clock.now();
        let until = now + crate::snapshot::secs(retry_after_s);
        self.snapshots
            .set_retry_until(self.budget.scope(category), until, now)
            .await
    }

    /// Block a category after the provider rejected the API key.
    ///
    /// Shares the retry window with 429s, so batches and scheduled retries
    /// stop calling the broken key until `backoff_s` has passed.
    pub async fn note_unauthorized(
        &self,
        category: ApiCategory,
        backoff_s: u64,
    ) -> Result<(), NearbyError> {
        warn!(%category, backoff_s, "routing key rejected, blocking calls");
        self.note_rate_limited(category, backoff_s).await
    }

    /// Earliest time a blocked category is worth retrying.
    pub async fn resume_at(&self, category: ApiCategory) -> Result<DateTime<Utc>, NearbyError> {
        let now = self.clock.now();
        let snapshot = self.snapshot(category).await?;
        let mut resume = now;
        if let Some(until) = snapshot.retry_until {
            resume = resume.max(until);
        }
        if snapshot.remaining <= 0 {
            resume = resume.max(snapshot.reset_at.unwrap_or(now));
        }
        Ok(resume)
    }

    /// Usage counters for a category's budget scope.
    pub async fn usage(&self, category: ApiCategory) -> Result<UsageReport, NearbyError> {
        self.budget.usage(category, self.clock.now()).await
    }
}
