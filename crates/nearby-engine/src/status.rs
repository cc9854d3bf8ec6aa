// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Point-in-time status for the CLI and the `/v1/status` endpoint.

use chrono::{DateTime, Utc};
use nearby_core::{ApiCategory, NearbyError, Provider, QueueStats, QuotaSnapshot};
use nearby_quota::UsageReport;
use nearby_storage::queries::history;
use serde::Serialize;

use crate::Engine;

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStatus {
    pub snapshot: QuotaSnapshot,
    pub usage: UsageReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoStatus {
    pub enabled: bool,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub provider: Provider,
    pub queue: QueueStats,
    pub processed_origins: u64,
    pub matrix: CategoryStatus,
    pub isochrones: CategoryStatus,
    pub auto: AutoStatus,
}

impl Engine {
    /// Gather queue counts, quota state and the auto processor's markers.
    pub async fn status(&self) -> Result<StatusReport, NearbyError> {
        Ok(StatusReport {
            generated_at: self.clock.now(),
            provider: self.recompute.provider(),
            queue: self.queue.stats().await?,
            processed_origins: history::count(self.storage.db()).await?,
            matrix: self.category_status(ApiCategory::Matrix).await?,
            isochrones: self.category_status(ApiCategory::Isochrones).await?,
            auto: AutoStatus {
                enabled: self.config.auto.enabled,
                running: self.auto.is_running().await?,
                next_run: self.auto.next_run().await?,
            },
        })
    }

    async fn category_status(&self, category: ApiCategory) -> Result<CategoryStatus, NearbyError> {
        Ok(CategoryStatus {
            snapshot: self.limiter.snapshot(category).await?,
            usage: self.limiter.usage(category).await?,
        })
    }
}
