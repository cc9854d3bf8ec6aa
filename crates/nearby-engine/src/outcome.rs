// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result types for recompute runs and batches.
//!
//! Rate limiting, broken keys and empty neighbourhoods are ordinary
//! outcomes here, not errors. `NearbyError` is reserved for failures
//! nobody can absorb, such as storage going away.

use chrono::{DateTime, Utc};
use nearby_core::Provider;
use serde::Serialize;

/// Why a routing recompute stopped before every candidate had a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PartialReason {
    /// The per-minute bucket was empty; try again after `wait_secs`.
    Throttled { wait_secs: u64 },
    /// The provider answered 429.
    RateLimited { retry_after_s: u64 },
    /// The daily quota ran out between chunks, or a retry window opened.
    QuotaExhausted,
    /// The provider rejected the API key.
    Unauthorized,
    /// Network failure or a non-success status.
    Transport,
    /// A success status with an unusable body.
    Malformed,
}

impl PartialReason {
    /// Transient reasons are retried without charging an attempt.
    pub fn is_deferrable(self) -> bool {
        matches!(
            self,
            PartialReason::Throttled { .. }
                | PartialReason::RateLimited { .. }
                | PartialReason::QuotaExhausted
        )
    }

    pub fn tag(self) -> &'static str {
        match self {
            PartialReason::Throttled { .. } => "throttled",
            PartialReason::RateLimited { .. } => "rate_limited",
            PartialReason::QuotaExhausted => "quota_exhausted",
            PartialReason::Unauthorized => "unauthorized",
            PartialReason::Transport => "transport_error",
            PartialReason::Malformed => "malformed_response",
        }
    }
}

/// Figures from a completed recompute, for processed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecomputeSummary {
    pub candidates: u32,
    pub items: u32,
    pub api_calls: u32,
    pub provider: Provider,
    pub cache_bytes: u64,
}

/// What one recompute run achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    /// Final, non-partial payload written.
    Completed(RecomputeSummary),
    /// Partial payload written; the run stopped early.
    Partial {
        reason: PartialReason,
        done: u32,
        total: u32,
        api_calls: u32,
    },
    /// No candidates in range; an empty, complete payload was written.
    NoCandidates,
    /// The origin has no usable coordinates; an error payload was written.
    MissingCoordinates,
    /// Another run holds the lock for this origin and relation.
    Busy,
}

/// Why a batch stopped before working through its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "halt", rename_all = "snake_case")]
pub enum HaltReason {
    /// The day's quota is spent, or a retry window is open.
    QuotaExhausted { resume_at: DateTime<Utc> },
    /// The per-minute bucket ran dry mid-batch.
    Throttled { resume_at: DateTime<Utc> },
    /// The provider answered 429 mid-batch.
    RateLimited { resume_at: DateTime<Utc> },
    /// The provider rejected the API key.
    Unauthorized { resume_at: DateTime<Utc> },
}

impl HaltReason {
    pub fn resume_at(&self) -> DateTime<Utc> {
        match *self {
            HaltReason::QuotaExhausted { resume_at }
            | HaltReason::Throttled { resume_at }
            | HaltReason::RateLimited { resume_at }
            | HaltReason::Unauthorized { resume_at } => resume_at,
        }
    }
}

/// Result of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Items completed, whether recomputed or found fresh.
    pub processed: u32,
    /// Items that failed this attempt.
    pub errors: u32,
    /// Items returned to pending without using an attempt.
    pub deferred: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<HaltReason>,
}

impl BatchReport {
    pub fn halted(reason: HaltReason) -> Self {
        Self {
            halted: Some(reason),
            ..Self::default()
        }
    }
}
