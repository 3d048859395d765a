use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 3;

/// Milliseconds a writer waits on another connection's lock before failing.
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    Ok(())
}

pub fn create_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_releases_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS releases (
            id                  TEXT PRIMARY KEY,
            title               TEXT NOT NULL,
            title_normalized    TEXT NOT NULL DEFAULT '',
            source_url          TEXT,
            image_url           TEXT,
            source_product_hash TEXT NOT NULL,
            merged_into_id      TEXT REFERENCES releases(id),
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            CHECK (merged_into_id IS NULL OR merged_into_id <> id)
        );

        CREATE INDEX IF NOT EXISTS idx_releases_hash       ON releases(source_product_hash);
        CREATE INDEX IF NOT EXISTS idx_releases_url_title  ON releases(source_url, title_normalized);
        CREATE INDEX IF NOT EXISTS idx_releases_image      ON releases(image_url);
        CREATE INDEX IF NOT EXISTS idx_releases_merged     ON releases(merged_into_id);
        ",
    )?;
    Ok(())
}

pub fn create_locks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ingestion_locks (
            lock_name  TEXT PRIMARY KEY,
            locked_by  TEXT NOT NULL,
            token      TEXT NOT NULL,
            locked_at  INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ingestion_locks_expires ON ingestion_locks(expires_at);
        ",
    )?;
    Ok(())
}

/// Enforces one active release per fingerprint; merged rows are exempt.
pub fn create_active_hash_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_releases_active_hash
            ON releases(source_product_hash)
            WHERE merged_into_id IS NULL;
        ",
    )?;
    Ok(())
}
