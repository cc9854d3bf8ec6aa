// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Header-reported quota fields, each cached under its own TTL.

use chrono::{DateTime, Duration, Utc};
use nearby_core::time::{format_ts, parse_ts};
use nearby_core::{NearbyError, RateHeaders};
use nearby_storage::Database;
use nearby_storage::queries::state;

/// Reset values below this are read as "seconds from now" rather than an
/// epoch timestamp.
const RELATIVE_RESET_THRESHOLD: i64 = 1_000_000_000;

/// Quota fields last reported by the provider. Every field is optional:
/// a field is absent when no header carried it or its TTL has passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderQuota {
    pub remaining: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_until: Option<DateTime<Utc>>,
}

/// Reads and writes header-derived quota fields in the state store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    db: Database,
    remaining_ttl: Duration,
    reset_ttl: Duration,
}

fn key(scope: &str, field: &str) -> String {
    format!("quota:{scope}:{field}")
}

impl SnapshotStore {
    pub fn new(db: Database, remaining_ttl_secs: u64, reset_ttl_secs: u64) -> Self {
        Self {
            db,
            remaining_ttl: secs(remaining_ttl_secs),
            reset_ttl: secs(reset_ttl_secs),
        }
    }

    /// Store whatever the headers carried. Absent headers leave the
    /// previous values alone.
    pub async fn record(
        &self,
        scope: &str,
        headers: &RateHeaders,
        now: DateTime<Utc>,
    ) -> Result<(), NearbyError> {
        if let Some(remaining) = headers.remaining {
            state::put(
                &self.db,
                &key(scope, "remaining"),
                &remaining.max(0).to_string(),
                Some(now + self.remaining_ttl),
                now,
            )
            .await?;
        }
        if let Some(reset) = headers.reset_epoch {
            if let Some(reset_at) = reset_time(reset, now) {
                state::put(
                    &self.db,
                    &key(scope, "reset_at"),
                    &format_ts(reset_at),
                    Some(now + self.reset_ttl),
                    now,
                )
                .await?;
            }
        }
        if let Some(retry_after) = headers.retry_after_s {
            let until = now + secs(retry_after);
            self.set_retry_until(scope, until, now).await?;
        }
        Ok(())
    }

    /// Block calls in `scope` until `until`. The marker expires exactly then.
    pub async fn set_retry_until(
        &self,
        scope: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), NearbyError> {
        if until <= now {
            return Ok(());
        }
        state::put(
            &self.db,
            &key(scope, "retry_until"),
            &format_ts(until),
            Some(until),
            now,
        )
        .await
    }

    /// Live header fields for `scope`.
    pub async fn read(&self, scope: &str, now: DateTime<Utc>) -> Result<HeaderQuota, NearbyError> {
        let remaining = state::get(&self.db, &key(scope, "remaining"), now)
            .await?
            .and_then(|e| e.value.parse().ok());
        let reset_at = state::get(&self.db, &key(scope, "reset_at"), now)
            .await?
            .and_then(|e| parse_ts(&e.value));
        let retry_until = state::get(&self.db, &key(scope, "retry_until"), now)
            .await?
            .and_then(|e| parse_ts(&e.value));
        Ok(HeaderQuota {
            remaining,
            reset_at,
            retry_until,
        })
    }
}

/// Seconds as a chrono duration, saturating far beyond any real TTL.
pub(crate) fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(u64::from(u32::MAX)) as i64)
}

fn reset_time(value: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if value < 0 {
        return None;
    }
    if value < RELATIVE_RESET_THRESHOLD {
        return Some(now + Duration::seconds(value));
    }
    DateTime::from_timestamp(value, 0)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    async fn store() -> (SnapshotStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        (SnapshotStore::new(db, 900, 3600), dir)
    }

    #[tokio::test]
    async fn fields_expire_independently() {
        let (store, _dir) = store().await;
        let reset_epoch = (t0() + Duration::hours(6)).timestamp();
        store
            .record(
                "routing",
                &RateHeaders {
                    remaining: Some(42),
                    reset_epoch: Some(reset_epoch),
                    retry_after_s: Some(30),
                },
                t0(),
            )
            .await
            .unwrap();

        let fresh = store.read("routing", t0()).await.unwrap();
        assert_eq!(fresh.remaining, Some(42));
        assert_eq!(fresh.reset_at, Some(t0() + Duration::hours(6)));
        assert_eq!(fresh.retry_until, Some(t0() + Duration::seconds(30)));

        let after_retry = store.read("routing", t0() + Duration::seconds(30)).await.unwrap();
        assert_eq!(after_retry.retry_until, None);
        assert_eq!(after_retry.remaining, Some(42));

        let after_remaining = store.read("routing", t0() + Duration::minutes(15)).await.unwrap();
        assert_eq!(after_remaining.remaining, None);
        assert!(after_remaining.reset_at.is_some());

        let after_reset = store.read("routing", t0() + Duration::minutes(60)).await.unwrap();
        assert_eq!(after_reset, HeaderQuota::default());
    }

    #[tokio::test]
    async fn absent_headers_keep_previous_values() {
        let (store, _dir) = store().await;
        store
            .record(
                "matrix",
                &RateHeaders {
                    remaining: Some(5),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap();
        store
            .record("matrix", &RateHeaders::default(), t0())
            .await
            .unwrap();
        assert_eq!(store.read("matrix", t0()).await.unwrap().remaining, Some(5));
        assert_eq!(store.read("isochrones", t0()).await.unwrap().remaining, None);
    }

    #[test]
    fn small_reset_values_are_relative() {
        assert_eq!(reset_time(60, t0()), Some(t0() + Duration::seconds(60)));
        assert_eq!(reset_time(-1, t0()), None);
        let epoch = t0().timestamp();
        assert_eq!(reset_time(epoch, t0()), Some(t0()));
    }
}
