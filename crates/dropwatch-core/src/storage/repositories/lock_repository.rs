use std::sync::MutexGuard;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::IngestionLock;

use super::{conversion_error, Repository};

pub trait LockRepository: Repository<Entity = IngestionLock, Id = String> {
    /// Delete every lock, of any name, that expired at or before `now`.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Insert unless a row with the same name exists. True when inserted.
    fn insert_if_absent(&self, lock: &IngestionLock) -> Result<bool>;

    fn delete(&self, lock_name: &str) -> Result<bool>;
    fn delete_with_token(&self, lock_name: &str, token: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<IngestionLock>>;
}

pub struct SqliteLockRepository<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> SqliteLockRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn row_to_lock(row: &rusqlite::Row) -> rusqlite::Result<IngestionLock> {
        Ok(IngestionLock {
            lock_name: row.get(0)?,
            locked_by: row.get(1)?,
            token: row.get(2)?,
            locked_at: from_millis(3, row.get(3)?)?,
            expires_at: from_millis(4, row.get(4)?)?,
        })
    }
}

fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        conversion_error(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {millis}"),
            ),
        )
    })
}

impl<'a> Repository for SqliteLockRepository<'a> {
    type Entity = IngestionLock;
    type Id = String;

    fn find_by_id(&self, lock_name: &Self::Id) -> Result<Option<Self::Entity>> {
        let lock = self
            .conn
            .query_row(
                "SELECT lock_name, locked_by, token, locked_at, expires_at
                 FROM ingestion_locks WHERE lock_name = ?1",
                params![lock_name],
                Self::row_to_lock,
            )
            .optional()?;
        Ok(lock)
    }
}

impl<'a> LockRepository for SqliteLockRepository<'a> {
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM ingestion_locks WHERE expires_at <= ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }

    fn insert_if_absent(&self, lock: &IngestionLock) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO ingestion_locks (lock_name, locked_by, token, locked_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(lock_name) DO NOTHING",
            params![
                lock.lock_name,
                lock.locked_by,
                lock.token,
                lock.locked_at.timestamp_millis(),
                lock.expires_at.timestamp_millis(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn delete(&self, lock_name: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM ingestion_locks WHERE lock_name = ?1",
            params![lock_name],
        )?;
        Ok(removed > 0)
    }

    fn delete_with_token(&self, lock_name: &str, token: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM ingestion_locks WHERE lock_name = ?1 AND token = ?2",
            params![lock_name, token],
        )?;
        Ok(removed > 0)
    }

    fn list(&self) -> Result<Vec<IngestionLock>> {
        let mut stmt = self.conn.prepare(
            "SELECT lock_name, locked_by, token, locked_at, expires_at
             FROM ingestion_locks ORDER BY lock_name",
        )?;
        let rows = stmt.query_map([], Self::row_to_lock)?;
        let mut locks = Vec::new();
        for row in rows {
            locks.push(row?);
        }
        Ok(locks)
    }
}
