// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process job scheduler: an mpsc channel drained by one worker task.
//!
//! Anything may hold a [`SchedulerHandle`] and submit jobs, now or after a
//! delay. Duplicate `ProcessBatch` triggers collapse into one while a
//! batch job is waiting. The worker also wakes every `auto.idle_poll_secs`
//! to sweep stuck items and kick the auto processor when it is due.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nearby_core::{Clock, EntityType};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::auto::{AutoProcessor, AutoStop};
use crate::outcome::RecomputeOutcome;
use crate::queue::QueueManager;
use crate::recompute::RecomputeEngine;

/// Work the scheduler knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// One auto-processor run.
    ProcessBatch,
    /// Recompute a single origin outside the queue, e.g. after a 429.
    Recompute {
        origin_id: i64,
        origin_type: EntityType,
    },
    /// Requeue stuck items and purge old rows.
    Sweep,
}

/// Cloneable submission side of the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Job>,
    batch_pending: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Receiving side, consumed by [`Scheduler::new`].
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl SchedulerHandle {
    /// Create a handle and the receiver its jobs arrive on.
    pub fn channel(cancel: CancellationToken) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            batch_pending: Arc::new(AtomicBool::new(false)),
            cancel,
        };
        (handle, JobReceiver { rx })
    }

    /// Submit a job now. Returns false if it was coalesced into a waiting
    /// batch job or the worker has stopped.
    pub fn trigger(&self, job: Job) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let is_batch = job == Job::ProcessBatch;
        if is_batch && self.batch_pending.swap(true, Ordering::AcqRel) {
            debug!("batch already pending, trigger coalesced");
            return false;
        }
        if self.tx.send(job).is_err() {
            if is_batch {
                self.batch_pending.store(false, Ordering::Release);
            }
            return false;
        }
        true
    }

    /// Submit `job` once `delay` has passed, unless shutdown comes first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_after(&self, delay: Duration, job: Job) {
        debug!(?job, delay_secs = delay.as_secs(), "job scheduled");
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    handle.trigger(job);
                }
            }
        });
    }

    /// Submit `job` at an absolute time.
    pub fn schedule_at(&self, at: DateTime<Utc>, now: DateTime<Utc>, job: Job) {
        let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
        self.schedule_after(delay, job);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn batch_started(&self) {
        self.batch_pending.store(false, Ordering::Release);
    }
}

/// The worker that runs jobs one at a time.
pub struct Scheduler {
    auto: AutoProcessor,
    engine: Arc<RecomputeEngine>,
    queue: QueueManager,
    handle: SchedulerHandle,
    jobs: JobReceiver,
    clock: Arc<dyn Clock>,
    poll_every: Duration,
}

impl Scheduler {
    pub fn new(
        auto: AutoProcessor,
        engine: Arc<RecomputeEngine>,
        queue: QueueManager,
        handle: SchedulerHandle,
        jobs: JobReceiver,
        clock: Arc<dyn Clock>,
        poll_every: Duration,
    ) -> Self {
        Self {
            auto,
            engine,
            queue,
            handle,
            jobs,
            clock,
            poll_every: poll_every.max(Duration::from_secs(1)),
        }
    }

    /// Run until the cancellation token fires or every handle is dropped.
    pub async fn run(mut self) {
        info!(poll_secs = self.poll_every.as_secs(), "scheduler running");
        let cancel = self.handle.cancel.clone();
        let mut poll = tokio::time::interval(self.poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, stopping scheduler");
                    break;
                }
                job = self.jobs.rx.recv() => {
                    match job {
                        Some(job) => self.execute(job).await,
                        None => break,
                    }
                }
                _ = poll.tick() => self.poll().await,
            }
        }
    }

    async fn execute(&self, job: Job) {
        debug!(?job, "running job");
        match job {
            Job::ProcessBatch => {
                self.handle.batch_started();
                match self.auto.run().await {
                    Ok(report) => match report.stop {
                        AutoStop::Halted { resume_at } => {
                            info!(%resume_at, "auto processor halted, resuming later");
                            self.handle
                                .schedule_at(resume_at, self.clock.now(), Job::ProcessBatch);
                        }
                        AutoStop::Retrigger => {
                            self.handle.trigger(Job::ProcessBatch);
                        }
                        _ => {}
                    },
                    Err(e) => error!(error = %e, "auto run failed"),
                }
            }
            Job::Recompute {
                origin_id,
                origin_type,
            } => match self.engine.recompute(origin_id, origin_type).await {
                Ok(outcome) => {
                    info!(origin_id, ?outcome, "scheduled recompute finished");
                    if matches!(
                        outcome,
                        RecomputeOutcome::Completed(_) | RecomputeOutcome::NoCandidates
                    ) {
                        // Lets the batch processor settle the deferred queue item.
                        self.handle.trigger(Job::ProcessBatch);
                    }
                }
                Err(e) => error!(origin_id, error = %e, "scheduled recompute failed"),
            },
            Job::Sweep => {
                if let Err(e) = self.queue.sweep_stuck().await {
                    error!(error = %e, "sweep failed");
                }
                if let Err(e) = self.queue.purge_finished().await {
                    error!(error = %e, "purge failed");
                }
            }
        }
    }

    async fn poll(&self) {
        if let Err(e) = self.queue.sweep_stuck().await {
            error!(error = %e, "sweep failed");
            return;
        }
        let due = match self.auto.is_due().await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "could not read auto schedule");
                return;
            }
        };
        match self.queue.pending_count().await {
            Ok(pending) if due && pending > 0 => {
                debug!(pending, "poll found due work");
                self.handle.trigger(Job::ProcessBatch);
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "could not count pending items"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_triggers_coalesce_until_started() {
        let (handle, mut jobs) = SchedulerHandle::channel(CancellationToken::new());
        assert!(handle.trigger(Job::ProcessBatch));
        assert!(!handle.trigger(Job::ProcessBatch));
        assert!(handle.trigger(Job::Sweep));

        assert_eq!(jobs.rx.recv().await, Some(Job::ProcessBatch));
        handle.batch_started();
        assert!(handle.trigger(Job::ProcessBatch));
        assert_eq!(jobs.rx.recv().await, Some(Job::Sweep));
        assert_eq!(jobs.rx.recv().await, Some(Job::ProcessBatch));
    }

    #[tokio::test]
    async fn recompute_jobs_are_never_coalesced() {
        let (handle, mut jobs) = SchedulerHandle::channel(CancellationToken::new());
        let job = Job::Recompute {
            origin_id: 7,
            origin_type: EntityType::Poi,
        };
        assert!(handle.trigger(job));
        assert!(handle.trigger(job));
        assert_eq!(jobs.rx.recv().await, Some(job));
        assert_eq!(jobs.rx.recv().await, Some(job));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_arrives_after_delay() {
        let (handle, mut jobs) = SchedulerHandle::channel(CancellationToken::new());
        handle.schedule_after(Duration::from_secs(30), Job::Sweep);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(jobs.rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(jobs.rx.recv().await, Some(Job::Sweep));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drops_delayed_jobs() {
        let cancel = CancellationToken::new();
        let (handle, mut jobs) = SchedulerHandle::channel(cancel.clone());
        handle.schedule_after(Duration::from_secs(5), Job::Sweep);
        cancel.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(jobs.rx.try_recv().is_err());
        assert!(!handle.trigger(Job::Sweep));
    }
}
