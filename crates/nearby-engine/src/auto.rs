// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Auto processor: a bounded, self-rescheduling batch driver.
//!
//! One invocation runs at most `auto.max_iterations` batches and then says
//! what should happen next. It never loops forever and never sleeps; the
//! scheduler acts on the returned [`AutoStop`].
//!
//! Overlap protection is an `auto:running` marker in the state store with
//! a watchdog TTL, so a crashed run cannot block the next one for long.
//! The next planned resume time is kept under `auto:next_run`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nearby_config::NearbyConfig;
use nearby_core::time::{format_ts, parse_ts};
use nearby_core::{Clock, NearbyError};
use nearby_storage::Database;
use nearby_storage::queries::state;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::BatchProcessor;
use crate::queue::QueueManager;

pub const RUNNING_KEY: &str = "auto:running";
pub const NEXT_RUN_KEY: &str = "auto:next_run";

/// Why an auto run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum AutoStop {
    /// `auto.enabled` is false.
    Disabled,
    /// Another run holds the marker.
    AlreadyRunning,
    /// Nothing pending.
    QueueEmpty,
    /// Quota or the provider stopped work until `resume_at`.
    Halted { resume_at: DateTime<Utc> },
    /// Iterations used up with work left; run again right away.
    Retrigger,
    /// Pending items made no progress; poll again at `next_run`.
    Idle { next_run: DateTime<Utc> },
}

/// Totals for one auto run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoReport {
    pub iterations: u32,
    pub processed: u32,
    pub errors: u32,
    pub deferred: u32,
    pub stop: AutoStop,
}

impl AutoReport {
    fn stopped(stop: AutoStop) -> Self {
        Self {
            iterations: 0,
            processed: 0,
            errors: 0,
            deferred: 0,
            stop,
        }
    }
}

#[derive(Clone)]
pub struct AutoProcessor {
    batch: BatchProcessor,
    queue: QueueManager,
    db: Database,
    config: Arc<NearbyConfig>,
    clock: Arc<dyn Clock>,
}

impl AutoProcessor {
    pub fn new(
        batch: BatchProcessor,
        queue: QueueManager,
        db: Database,
        config: Arc<NearbyConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            batch,
            queue,
            db,
            config,
            clock,
        }
    }

    /// Run up to `auto.max_iterations` batches.
    pub async fn run(&self) -> Result<AutoReport, NearbyError> {
        if !self.config.auto.enabled {
            return Ok(AutoReport::stopped(AutoStop::Disabled));
        }

        let now = self.clock.now();
        let token = Uuid::new_v4().to_string();
        let watchdog = crate::seconds(self.config.auto.watchdog_ttl_secs);
        if !state::try_claim(&self.db, RUNNING_KEY, &token, now + watchdog, now).await? {
            debug!("auto processor already running");
            return Ok(AutoReport::stopped(AutoStop::AlreadyRunning));
        }

        let result = self.drive().await;
        if let Err(e) = state::release(&self.db, RUNNING_KEY, &token).await {
            warn!(error = %e, "failed to release auto marker");
        }
        let report = result?;
        info!(
            iterations = report.iterations,
            processed = report.processed,
            errors = report.errors,
            deferred = report.deferred,
            stop = ?report.stop,
            "auto run finished"
        );
        Ok(report)
    }

    async fn drive(&self) -> Result<AutoReport, NearbyError> {
        let mut report = AutoReport::stopped(AutoStop::QueueEmpty);

        while report.iterations < self.config.auto.max_iterations {
            if self.queue.pending_count().await? == 0 {
                state::delete(&self.db, NEXT_RUN_KEY).await?;
                report.stop = AutoStop::QueueEmpty;
                return Ok(report);
            }

            let batch = self
                .batch
                .process_batch(self.config.auto.items_per_batch)
                .await?;
            report.iterations += 1;
            report.processed += batch.processed;
            report.errors += batch.errors;
            report.deferred += batch.deferred;

            if let Some(halt) = batch.halted {
                let resume_at = halt.resume_at();
                self.set_next_run(resume_at).await?;
                report.stop = AutoStop::Halted { resume_at };
                return Ok(report);
            }
            if batch.processed + batch.errors == 0 {
                let next_run = self.clock.now() + crate::seconds(self.config.auto.idle_poll_secs);
                self.set_next_run(next_run).await?;
                report.stop = AutoStop::Idle { next_run };
                return Ok(report);
            }
        }

        report.stop = if self.queue.pending_count().await? == 0 {
            state::delete(&self.db, NEXT_RUN_KEY).await?;
            AutoStop::QueueEmpty
        } else if report.processed + report.errors > 0 {
            AutoStop::Retrigger
        } else {
            let next_run = self.clock.now() + crate::seconds(self.config.auto.idle_poll_secs);
            self.set_next_run(next_run).await?;
            AutoStop::Idle { next_run }
        };
        Ok(report)
    }

    async fn set_next_run(&self, at: DateTime<Utc>) -> Result<(), NearbyError> {
        let now = self.clock.now();
        // Kept a day past its due time so status can still show it.
        let expires_at = at + chrono::Duration::days(1);
        state::put(&self.db, NEXT_RUN_KEY, &format_ts(at), Some(expires_at), now).await
    }

    /// Planned resume time, if one is recorded.
    pub async fn next_run(&self) -> Result<Option<DateTime<Utc>>, NearbyError> {
        let entry = state::get(&self.db, NEXT_RUN_KEY, self.clock.now()).await?;
        Ok(entry.and_then(|e| parse_ts(&e.value)))
    }

    /// True when no resume time is recorded or it has passed.
    pub async fn is_due(&self) -> Result<bool, NearbyError> {
        let now = self.clock.now();
        Ok(self.next_run().await?.is_none_or(|at| at <= now))
    }

    /// True while a run holds the marker.
    pub async fn is_running(&self) -> Result<bool, NearbyError> {
        Ok(state::get(&self.db, RUNNING_KEY, self.clock.now())
            .await?
            .is_some())
    }
}
