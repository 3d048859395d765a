use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest lease a lock may be taken for: one week.
pub const MAX_LOCK_TTL_MINUTES: u64 = 7 * 24 * 60;

/// A row in `ingestion_locks`. Returned to the winner of `acquire` as its lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionLock {
    pub lock_name: String,
    pub locked_by: String,
    /// Random per-acquisition token; release must present it.
    pub token: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IngestionLock {
    /// Build a fresh lease. `None` when `now + ttl` is not a representable instant.
    pub fn new(
        lock_name: impl Into<String>,
        locked_by: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<Self> {
        // Stored with millisecond precision.
        let locked_at = now.trunc_subsecs(3);
        let expires_at = locked_at.checked_add_signed(ttl)?.trunc_subsecs(3);
        Some(Self {
            lock_name: lock_name.into(),
            locked_by: locked_by.into(),
            token: Uuid::new_v4().to_string(),
            locked_at,
            expires_at,
        })
    }

    /// A lock is live until the instant it expires.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_liveness_boundary() {
        let now = Utc::now();
        let lock =
            IngestionLock::new("feed:disney", "worker-1", now, Duration::minutes(30)).unwrap();
        assert!(lock.is_live_at(now));
        assert!(lock.is_live_at(now + Duration::minutes(29)));
        assert!(!lock.is_live_at(now + Duration::minutes(30)));
        assert_eq!(lock.remaining_at(now + Duration::minutes(40)), Duration::zero());
    }

    #[test]
    fn test_tokens_are_unique_per_acquisition() {
        let now = Utc::now();
        let a = IngestionLock::new("feed", "w", now, Duration::minutes(1)).unwrap();
        let b = IngestionLock::new("feed", "w", now, Duration::minutes(1)).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_unrepresentable_expiry_is_rejected() {
        // roughly 273,000 years, past the last representable instant
        let forever = Duration::days(100_000_000);
        assert!(IngestionLock::new("feed", "w", Utc::now(), forever).is_none());

        let last = DateTime::<Utc>::MAX_UTC;
        assert!(IngestionLock::new("feed", "w", last, Duration::minutes(1)).is_none());
    }
}
