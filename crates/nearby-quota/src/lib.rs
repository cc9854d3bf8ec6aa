// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rate limiting and quota tracking for routing API calls.
//!
//! Two independent gates protect the provider's limits. A per-category
//! token bucket spaces calls out under the per-minute ceiling, and a
//! day-scoped [`QuotaSnapshot`](nearby_core::QuotaSnapshot), fed by
//! response headers with a locally counted fallback, stops work from
//! starting once the daily ceiling is reached. All state lives in the
//! storage crate's key-value store so every caller shares it.

pub mod bucket;
pub mod limiter;
pub mod snapshot;
pub mod tracker;

pub use bucket::{Acquire, TokenBucket};
pub use limiter::RateLimiter;
pub use tracker::{QuotaCategory, QuotaLimits, QuotaTracker, SharedRouting, UsageReport};
