use chrono::{DateTime, Duration, Utc};
use dropwatch_core::{
    ConnectionPool, IngestionLock, LockRepository, Repository, SqliteLockRepository,
};
use serde::Serialize;

use crate::error::{DedupError, Result};

/// Result of work guarded by a named lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome<T> {
    /// Another holder had the lock; nothing was done.
    Skipped { held_by: Option<IngestionLock> },
    Completed(T),
}

impl<T> RunOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped { .. })
    }

    pub fn completed(self) -> Option<T> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            RunOutcome::Skipped { .. } => None,
        }
    }
}

/// Named, expiring mutual exclusion backed by the `ingestion_locks` table.
///
/// Exclusion comes from the table's primary key, so it holds across
/// processes sharing the same database file.
pub struct LockManager<'p> {
    pool: &'p ConnectionPool,
}

impl<'p> LockManager<'p> {
    pub fn new(pool: &'p ConnectionPool) -> Self {
        Self { pool }
    }

    /// Try to take `lock_name` for `ttl`. `None` means someone else holds it.
    pub fn acquire(
        &self,
        lock_name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<IngestionLock>> {
        self.acquire_at(lock_name, holder, ttl, Utc::now())
    }

    pub fn acquire_at(
        &self,
        lock_name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<IngestionLock>> {
        if lock_name.trim().is_empty() {
            return Err(DedupError::InvalidLockRequest("lock name is empty".into()));
        }
        if ttl <= Duration::zero() {
            return Err(DedupError::InvalidLockRequest(format!(
                "ttl must be positive, got {}s",
                ttl.num_seconds()
            )));
        }

        let lease = IngestionLock::new(lock_name, holder, now, ttl).ok_or_else(|| {
            DedupError::InvalidLockRequest(format!(
                "ttl of {} minutes runs past the last representable instant",
                ttl.num_minutes()
            ))
        })?;

        let repo = self.repository()?;
        let swept = repo.sweep_expired(now)?;
        if swept > 0 {
            tracing::info!(swept, "removed expired ingestion locks");
        }

        if repo.insert_if_absent(&lease)? {
            tracing::info!(
                lock = lock_name,
                holder,
                expires_at = %lease.expires_at,
                "lock acquired"
            );
            Ok(Some(lease))
        } else {
            tracing::debug!(lock = lock_name, holder, "lock is held elsewhere");
            Ok(None)
        }
    }

    /// Give back a lease. False when the lease had already expired and been
    /// taken over, or was force-released.
    pub fn release(&self, lease: &IngestionLock) -> Result<bool> {
        let released = self
            .repository()?
            .delete_with_token(&lease.lock_name, &lease.token)?;
        if released {
            tracing::info!(lock = %lease.lock_name, "lock released");
        } else {
            tracing::warn!(lock = %lease.lock_name, "lease no longer held at release");
        }
        Ok(released)
    }

    /// Delete the named lock whoever holds it.
    pub fn force_release(&self, lock_name: &str) -> Result<bool> {
        let released = self.repository()?.delete(lock_name)?;
        if released {
            tracing::warn!(lock = lock_name, "lock force-released");
        }
        Ok(released)
    }

    pub fn status(&self, lock_name: &str) -> Result<Option<IngestionLock>> {
        self.status_at(lock_name, Utc::now())
    }

    /// The live lock under `lock_name`, ignoring rows that have expired.
    pub fn status_at(&self, lock_name: &str, now: DateTime<Utc>) -> Result<Option<IngestionLock>> {
        let lock = self.repository()?.find_by_id(&lock_name.to_string())?;
        Ok(lock.filter(|l| l.is_live_at(now)))
    }

    /// Every lock row, including expired ones not yet swept.
    pub fn list(&self) -> Result<Vec<IngestionLock>> {
        Ok(self.repository()?.list()?)
    }

    /// Run `work` while holding `lock_name`, releasing it afterwards.
    ///
    /// When `work` fails the lease is left in place and lapses by TTL.
    pub fn run_exclusive<T, F>(
        &self,
        lock_name: &str,
        holder: &str,
        ttl: Duration,
        work: F,
    ) -> Result<RunOutcome<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let Some(lease) = self.acquire(lock_name, holder, ttl)? else {
            let held_by = self.status(lock_name)?;
            tracing::warn!(
                lock = lock_name,
                held_by = held_by.as_ref().map(|l| l.locked_by.as_str()),
                "lock held elsewhere, skipping run"
            );
            return Ok(RunOutcome::Skipped { held_by });
        };

        match work() {
            Ok(value) => {
                self.release(&lease)?;
                Ok(RunOutcome::Completed(value))
            }
            Err(e) => {
                tracing::error!(
                    lock = lock_name,
                    expires_at = %lease.expires_at,
                    error = %e,
                    "run failed, lock left to expire"
                );
                Err(e)
            }
        }
    }

    fn repository(&self) -> Result<SqliteLockRepository<'p>> {
        Ok(SqliteLockRepository::new(self.pool.get_connection()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropwatch_core::{open_database, open_in_memory, AppConfig};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn ttl() -> Duration {
        Duration::minutes(30)
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);

        let lease = locks.acquire("feed:disney", "worker-a", ttl()).unwrap();
        assert!(lease.is_some());
        assert!(locks.acquire("feed:disney", "worker-b", ttl()).unwrap().is_none());

        // other names are independent
        assert!(locks.acquire("feed:universal", "worker-b", ttl()).unwrap().is_some());
    }

    #[test]
    fn test_expired_lock_is_taken_over() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);
        let start = Utc::now();

        let stale = locks
            .acquire_at("feed:disney", "crashed", ttl(), start)
            .unwrap()
            .unwrap();
        assert!(
            locks
                .acquire_at("feed:disney", "worker", ttl(), start + Duration::minutes(29))
                .unwrap()
                .is_none()
        );

        let fresh = locks
            .acquire_at("feed:disney", "worker", ttl(), start + Duration::minutes(31))
            .unwrap()
            .unwrap();
        assert_eq!(fresh.locked_by, "worker");
        assert_ne!(fresh.token, stale.token);

        // the crashed holder can no longer release what it lost
        assert!(!locks.release(&stale).unwrap());
        let held = locks
            .status_at("feed:disney", start + Duration::minutes(32))
            .unwrap()
            .unwrap();
        assert_eq!(held, fresh);
    }

    #[test]
    fn test_lock_expiring_exactly_now_is_free() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);
        let lease = locks.acquire("feed", "a", ttl()).unwrap().unwrap();

        assert!(locks.status_at("feed", lease.expires_at).unwrap().is_none());
        assert!(locks.acquire_at("feed", "b", ttl(), lease.expires_at).unwrap().is_some());
    }

    #[test]
    fn test_release_then_reacquire() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);

        let lease = locks.acquire("feed", "a", ttl()).unwrap().unwrap();
        assert!(locks.release(&lease).unwrap());
        assert!(locks.status("feed").unwrap().is_none());
        assert!(locks.acquire("feed", "b", ttl()).unwrap().is_some());
    }

    #[test]
    fn test_force_release_ignores_token() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);
        let lease = locks.acquire("feed", "a", ttl()).unwrap().unwrap();

        assert!(locks.force_release("feed").unwrap());
        assert!(!locks.force_release("feed").unwrap());
        assert!(!locks.release(&lease).unwrap());
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);

        assert!(matches!(
            locks.acquire("  ", "a", ttl()),
            Err(DedupError::InvalidLockRequest(_))
        ));
        assert!(matches!(
            locks.acquire("feed", "a", Duration::zero()),
            Err(DedupError::InvalidLockRequest(_))
        ));
        assert!(locks.list().unwrap().is_empty());
    }

    #[test]
    fn test_overlong_ttl_fails_closed() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);

        let mut config = AppConfig::default();
        config.lock.ttl_minutes = 10_000_000_000_000;
        assert!(config.validate().is_err());

        let forever = Duration::days(100_000_000);
        assert!(matches!(
            locks.acquire("feed", "a", forever),
            Err(DedupError::InvalidLockRequest(_))
        ));
        assert!(locks.list().unwrap().is_empty());

        // the capped config value still yields a usable lease
        let lease = locks.acquire("feed", "a", config.lock_ttl()).unwrap().unwrap();
        assert_eq!(lease.expires_at - lease.locked_at, Duration::days(7));
    }

    #[test]
    fn test_store_failure_fails_closed() {
        let pool = open_in_memory().unwrap();
        pool.get_connection()
            .unwrap()
            .execute("DROP TABLE ingestion_locks", [])
            .unwrap();

        let err = LockManager::new(&pool).acquire("feed", "a", ttl()).unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_run_exclusive_releases_on_success() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);

        let outcome = locks.run_exclusive("feed", "a", ttl(), || Ok(7)).unwrap();
        assert_eq!(outcome, RunOutcome::Completed(7));
        assert!(locks.status("feed").unwrap().is_none());
    }

    #[test]
    fn test_run_exclusive_skips_when_held() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);
        let lease = locks.acquire("feed", "other", ttl()).unwrap().unwrap();

        let mut ran = false;
        let outcome = locks
            .run_exclusive("feed", "me", ttl(), || {
                ran = true;
                Ok(())
            })
            .unwrap();
        assert!(!ran);
        assert_eq!(outcome, RunOutcome::Skipped { held_by: Some(lease) });
    }

    #[test]
    fn test_run_exclusive_keeps_lock_on_failure() {
        let pool = open_in_memory().unwrap();
        let locks = LockManager::new(&pool);

        let result: Result<RunOutcome<()>> = locks.run_exclusive("feed", "a", ttl(), || {
            Err(DedupError::InvalidLockRequest("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(locks.status("feed").unwrap().unwrap().locked_by, "a");
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropwatch.db");
        open_database(&path).unwrap();

        let contenders = 4;
        let barrier = Arc::new(Barrier::new(contenders));
        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let pool = open_database(&path).unwrap();
                    barrier.wait();
                    LockManager::new(&pool)
                        .acquire("feed:disney", &format!("worker-{i}"), Duration::minutes(30))
                        .unwrap()
                })
            })
            .collect();

        let winners: Vec<IngestionLock> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);

        let pool = open_database(&path).unwrap();
        let held = LockManager::new(&pool).status("feed:disney").unwrap().unwrap();
        assert_eq!(held, winners[0]);
    }
}
