// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-flight locks per (origin, relation type).
//!
//! A lock is a state-store key with a TTL. Holders release it explicitly
//! when done; a holder that crashes leaves a marker that simply expires.

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use nearby_core::{Clock, NearbyError, RelationType};
use nearby_storage::Database;
use nearby_storage::queries::state;
use tracing::{debug, warn};
use uuid::Uuid;

/// Issues and releases single-flight locks.
#[derive(Clone)]
pub struct SingleFlight {
    db: Database,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

/// Proof of holding a lock.
#[derive(Debug)]
#[must_use = "a held lock must be released"]
pub struct LockGuard {
    key: String,
    token: String,
}

pub fn lock_key(origin_id: i64, relation: RelationType) -> String {
    format!("lock:{origin_id}:{relation}")
}

impl SingleFlight {
    pub fn new(db: Database, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            db,
            clock,
            ttl: Duration::seconds(ttl_secs.min(u64::from(u32::MAX)) as i64),
        }
    }

    /// Take the lock, or `None` if someone else holds it.
    pub async fn try_acquire(
        &self,
        origin_id: i64,
        relation: RelationType,
    ) -> Result<Option<LockGuard>, NearbyError> {
        let key = lock_key(origin_id, relation);
        let token = Uuid::new_v4().to_string();
        let now = self.clock.now();
        if state::try_claim(&self.db, &key, &token, now + self.ttl, now).await? {
            debug!(%key, "single-flight lock acquired");
            Ok(Some(LockGuard { key, token }))
        } else {
            debug!(%key, "single-flight lock busy");
            Ok(None)
        }
    }

    /// Release a lock we hold. A lock that expired and was re-taken by
    /// another caller is left alone.
    pub async fn release(&self, guard: LockGuard) -> Result<(), NearbyError> {
        if !state::release(&self.db, &guard.key, &guard.token).await? {
            warn!(key = %guard.key, "lock expired before release");
        }
        Ok(())
    }

    /// Run `work` while holding the lock, releasing it however `work` ends.
    ///
    /// Returns `None` without running `work` when the lock is held.
    pub async fn run_exclusive<F, T>(
        &self,
        origin_id: i64,
        relation: RelationType,
        work: F,
    ) -> Result<Option<T>, NearbyError>
    where
        F: Future<Output = Result<T, NearbyError>>,
    {
        let Some(guard) = self.try_acquire(origin_id, relation).await? else {
            return Ok(None);
        };
        let result = work.await;
        let released = self.release(guard).await;
        let value = result?;
        released?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use nearby_core::ManualClock;
    use tempfile::tempdir;

    use super::*;

    async fn setup() -> (SingleFlight, Arc<ManualClock>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("lock.db").to_str().unwrap())
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        ));
        (SingleFlight::new(db, clock.clone(), 300), clock, dir)
    }

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let (locks, _clock, _dir) = setup().await;
        let guard = locks.try_acquire(1, RelationType::PoiFoot).await.unwrap().unwrap();
        assert!(locks.try_acquire(1, RelationType::PoiFoot).await.unwrap().is_none());

        // Different relation is a different lock.
        let other = locks.try_acquire(1, RelationType::ChargingFoot).await.unwrap();
        assert!(other.is_some());

        locks.release(guard).await.unwrap();
        assert!(locks.try_acquire(1, RelationType::PoiFoot).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_lock_self_heals() {
        let (locks, clock, _dir) = setup().await;
        let _abandoned = locks.try_acquire(7, RelationType::PoiFoot).await.unwrap().unwrap();
        clock.advance(Duration::seconds(301));
        assert!(locks.try_acquire(7, RelationType::PoiFoot).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_exclusive_releases_on_error() {
        let (locks, _clock, _dir) = setup().await;
        let result: Result<Option<()>, _> = locks
            .run_exclusive(3, RelationType::PoiFoot, async {
                Err(NearbyError::Internal("boom".into()))
            })
            .await;
        assert!(result.is_err());

        let ran = locks
            .run_exclusive(3, RelationType::PoiFoot, async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(ran, Some(5));
    }
}
