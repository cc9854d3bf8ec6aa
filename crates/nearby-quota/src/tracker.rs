// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Daily and monthly usage counters with caps and a safety buffer.
//!
//! One [`QuotaTracker`] exists per budget scope. Counters are stored under
//! date-stamped keys (`usage:{scope}:day:2026-03-01`), so a new day or month
//! starts from zero without an explicit reset, and old counters expire on
//! their own. Emits `tracing::warn` at 80% of either cap.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use nearby_core::{ApiCategory, NearbyError};
use nearby_storage::queries::state;
use nearby_storage::{Database, StateWrite};
use serde::Serialize;
use tracing::warn;

/// A budget scope with its own counters.
pub trait QuotaCategory: Copy + Send + Sync + 'static {
    /// Key fragment naming the scope in the state store.
    fn key(&self) -> &'static str;
}

impl QuotaCategory for ApiCategory {
    fn key(&self) -> &'static str {
        match self {
            ApiCategory::Matrix => "matrix",
            ApiCategory::Isochrones => "isochrones",
        }
    }
}

/// One daily budget shared by every routing call category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SharedRouting;

impl QuotaCategory for SharedRouting {
    fn key(&self) -> &'static str {
        "routing"
    }
}

/// Caps for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaLimits {
    pub daily: u32,
    /// `None` means no monthly ceiling.
    pub monthly: Option<u32>,
    /// Calls held back from the daily cap.
    pub buffer: u32,
}

/// Usage figures for one scope at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub used_today: u32,
    pub used_month: u32,
    pub limits: QuotaLimits,
    /// Calls still allowed today after the buffer and the monthly cap.
    pub remaining: i64,
}

impl UsageReport {
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

/// Usage counters for a budget scope.
#[derive(Debug, Clone)]
pub struct QuotaTracker<C: QuotaCategory> {
    db: Database,
    category: C,
    limits: QuotaLimits,
}

impl<C: QuotaCategory> QuotaTracker<C> {
    pub fn new(db: Database, category: C, limits: QuotaLimits) -> Self {
        Self {
            db,
            category,
            limits,
        }
    }

    pub fn category(&self) -> C {
        self.category
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    fn day_key(&self, now: DateTime<Utc>) -> String {
        format!("usage:{}:day:{}", self.category.key(), now.format("%Y-%m-%d"))
    }

    fn month_key(&self, now: DateTime<Utc>) -> String {
        format!("usage:{}:month:{}", self.category.key(), now.format("%Y-%m"))
    }

    /// Add `calls` to today's and this month's counters.
    ///
    /// Returns today's new total.
    pub async fn record(&self, calls: u32, now: DateTime<Utc>) -> Result<u32, NearbyError> {
        let day_expiry = next_day_start(now) + Duration::days(1);
        let month_expiry = next_month_start(now) + Duration::days(1);
        bump(&self.db, &self.month_key(now), calls, month_expiry, now).await?;
        bump(&self.db, &self.day_key(now), calls, day_expiry, now).await
    }

    pub async fn used_today(&self, now: DateTime<Utc>) -> Result<u32, NearbyError> {
        read_counter(&self.db, &self.day_key(now), now).await
    }

    pub async fn used_month(&self, now: DateTime<Utc>) -> Result<u32, NearbyError> {
        read_counter(&self.db, &self.month_key(now), now).await
    }

    /// Current usage and what remains.
    pub async fn usage(&self, now: DateTime<Utc>) -> Result<UsageReport, NearbyError> {
        let used_today = self.used_today(now).await?;
        let used_month = self.used_month(now).await?;
        let daily_left = i64::from(self.limits.daily)
            - i64::from(self.limits.buffer)
            - i64::from(used_today);
        let remaining = match self.limits.monthly {
            Some(monthly) => daily_left.min(i64::from(monthly) - i64::from(used_month)),
            None => daily_left,
        };
        Ok(UsageReport {
            used_today,
            used_month,
            limits: self.limits,
            remaining: remaining.max(0),
        })
    }

    /// Calls still allowed today.
    pub async fn remaining_today(&self, now: DateTime<Utc>) -> Result<i64, NearbyError> {
        Ok(self.usage(now).await?.remaining)
    }

    /// True if another call fits in the budget. Warns at 80% of a cap.
    pub async fn check(&self, now: DateTime<Utc>) -> Result<bool, NearbyError> {
        let usage = self.usage(now).await?;
        let scope = self.category.key();

        let daily = self.limits.daily;
        if daily > 0 && f64::from(usage.used_today) >= f64::from(daily) * 0.8 {
            warn!(
                scope,
                used_today = usage.used_today,
                daily_cap = daily,
                "approaching daily routing quota (80%+)"
            );
        }
        if let Some(monthly) = self.limits.monthly {
            if monthly > 0 && f64::from(usage.used_month) >= f64::from(monthly) * 0.8 {
                warn!(
                    scope,
                    used_month = usage.used_month,
                    monthly_cap = monthly,
                    "approaching monthly routing quota (80%+)"
                );
            }
        }
        Ok(!usage.is_exhausted())
    }

    /// True when this month's ceiling (if any) is used up.
    pub async fn monthly_exhausted(&self, now: DateTime<Utc>) -> Result<bool, NearbyError> {
        match self.limits.monthly {
            Some(monthly) => Ok(self.used_month(now).await? >= monthly),
            None => Ok(false),
        }
    }

    /// When the counter that is currently limiting resets.
    pub async fn resets_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, NearbyError> {
        if self.monthly_exhausted(now).await? {
            Ok(next_month_start(now))
        } else {
            Ok(next_day_start(now))
        }
    }
}

async fn read_counter(db: &Database, key: &str, now: DateTime<Utc>) -> Result<u32, NearbyError> {
    Ok(state::get(db, key, now)
        .await?
        .and_then(|entry| entry.value.parse().ok())
        .unwrap_or(0))
}

async fn bump(
    db: &Database,
    key: &str,
    calls: u32,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u32, NearbyError> {
    state::update(db, key, now, move |current| {
        let used: u32 = current
            .and_then(|entry| entry.value.parse().ok())
            .unwrap_or(0);
        let total = used.saturating_add(calls);
        (
            StateWrite::Put {
                value: total.to_string(),
                expires_at: Some(expires_at),
            },
            total,
        )
    })
    .await
}

/// Midnight UTC after `now`.
pub fn next_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(NaiveDate::MAX);
    tomorrow.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// First instant of the next UTC month.
pub fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or(NaiveDate::MAX)
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    use super::*;

    async fn setup() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("q.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 31, 22, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn counts_accumulate_and_respect_buffer() {
        let (db, _dir) = setup().await;
        let tracker = QuotaTracker::new(
            db,
            ApiCategory::Matrix,
            QuotaLimits {
                daily: 10,
                monthly: None,
                buffer: 2,
            },
        );
        assert_eq!(tracker.record(3, t0()).await.unwrap(), 3);
        assert_eq!(tracker.record(4, t0()).await.unwrap(), 7);
        assert_eq!(tracker.remaining_today(t0()).await.unwrap(), 1);
        assert!(tracker.check(t0()).await.unwrap());

        tracker.record(1, t0()).await.unwrap();
        assert!(!tracker.check(t0()).await.unwrap());
    }

    #[tokio::test]
    #[traced_test]
    async fn warns_from_eighty_percent() {
        let (db, _dir) = setup().await;
        let tracker = QuotaTracker::new(
            db,
            ApiCategory::Matrix,
            QuotaLimits {
                daily: 10,
                monthly: None,
                buffer: 0,
            },
        );
        tracker.record(7, t0()).await.unwrap();
        tracker.check(t0()).await.unwrap();
        assert!(!logs_contain("approaching daily routing quota"));

        tracker.record(1, t0()).await.unwrap();
        assert!(tracker.check(t0()).await.unwrap());
        assert!(logs_contain("approaching daily routing quota"));
    }

    #[tokio::test]
    async fn monthly_cap_limits_daily_remaining() {
        let (db, _dir) = setup().await;
        let tracker = QuotaTracker::new(
            db,
            SharedRouting,
            QuotaLimits {
                daily: 100,
                monthly: Some(12),
                buffer: 0,
            },
        );
        tracker.record(10, t0()).await.unwrap();

        let later_same_day = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 0).unwrap();
        assert_eq!(tracker.used_month(later_same_day).await.unwrap(), 10);
        assert_eq!(tracker.remaining_today(later_same_day).await.unwrap(), 2);

        let next_month = Utc.with_ymd_and_hms(2026, 4, 1, 0, 30, 0).unwrap();
        assert_eq!(tracker.used_today(next_month).await.unwrap(), 0);
        assert_eq!(tracker.used_month(next_month).await.unwrap(), 0);
        assert_eq!(tracker.remaining_today(next_month).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let (db, _dir) = setup().await;
        let limits = QuotaLimits {
            daily: 5,
            monthly: None,
            buffer: 0,
        };
        let matrix = QuotaTracker::new(db.clone(), ApiCategory::Matrix, limits);
        let iso = QuotaTracker::new(db, ApiCategory::Isochrones, limits);
        matrix.record(5, t0()).await.unwrap();
        assert!(!matrix.check(t0()).await.unwrap());
        assert!(iso.check(t0()).await.unwrap());
    }

    #[tokio::test]
    async fn reset_times() {
        let (db, _dir) = setup().await;
        let tracker = QuotaTracker::new(
            db,
            ApiCategory::Matrix,
            QuotaLimits {
                daily: 100,
                monthly: Some(1),
                buffer: 0,
            },
        );
        assert_eq!(
            tracker.resets_at(t0()).await.unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
        );
        tracker.record(1, t0()).await.unwrap();
        assert!(tracker.monthly_exhausted(t0()).await.unwrap());
        assert_eq!(
            next_month_start(Utc.with_ymd_and_hms(2026, 12, 15, 0, 0, 0).unwrap()),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()
        );
    }
}
