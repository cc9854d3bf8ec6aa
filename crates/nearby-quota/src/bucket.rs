// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-minute token bucket.
//!
//! Pure value type: the limiter loads it from the state store, calls
//! [`TokenBucket::try_acquire`], and writes it back inside one atomic
//! update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shortest wait ever reported to a denied caller.
pub const MIN_WAIT_SECS: u64 = 3;
/// Longest wait ever reported to a denied caller.
pub const MAX_WAIT_SECS: u64 = 60;

/// Continuously refilling bucket holding up to `capacity` tokens.
///
/// Refills at `capacity / 60` tokens per second, so a full bucket is
/// restored one minute after being drained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
    pub capacity: f64,
    pub tokens: f64,
    pub last_refill: DateTime<Utc>,
}

/// Result of asking a bucket for a token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acquire {
    pub allowed: bool,
    /// Seconds to wait before asking again; set only when denied.
    pub wait_secs: Option<u64>,
    /// Tokens left after this request.
    pub tokens_remaining: f64,
}

impl TokenBucket {
    /// A bucket at full capacity.
    pub fn full(capacity: u32, now: DateTime<Utc>) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.capacity / 60.0
    }

    /// Adopt a new capacity, keeping the current fill level within bounds.
    pub fn resize(&mut self, capacity: u32) {
        self.capacity = f64::from(capacity.max(1));
        self.tokens = self.tokens.clamp(0.0, self.capacity);
    }

    /// Add the tokens earned since the last refill.
    ///
    /// A clock that moved backwards adds nothing.
    pub fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill).num_milliseconds().max(0);
        let earned = elapsed_ms as f64 / 1000.0 * self.refill_rate();
        self.tokens = (self.tokens + earned).clamp(0.0, self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then take one token if available and `consume` is set.
    pub fn try_acquire(&mut self, now: DateTime<Utc>, consume: bool) -> Acquire {
        self.refill(now);
        if self.tokens >= 1.0 {
            if consume {
                self.tokens -= 1.0;
            }
            Acquire {
                allowed: true,
                wait_secs: None,
                tokens_remaining: self.tokens,
            }
        } else {
            Acquire {
                allowed: false,
                wait_secs: Some(self.wait_secs()),
                tokens_remaining: self.tokens,
            }
        }
    }

    /// Seconds until one whole token is available, clamped to 3..=60.
    pub fn wait_secs(&self) -> u64 {
        let rate = self.refill_rate();
        if rate <= 0.0 {
            return MAX_WAIT_SECS;
        }
        let needed = ((1.0 - self.tokens).max(0.0) / rate).ceil();
        (needed as u64).clamp(MIN_WAIT_SECS, MAX_WAIT_SECS)
    }
}
