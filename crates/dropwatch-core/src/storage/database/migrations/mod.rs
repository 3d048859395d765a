mod v1_releases;
mod v2_ingestion_locks;
mod v3_active_hash_unique;

use chrono::Utc;
use rusqlite::Connection;

use super::schema;
use crate::error::Result;

pub trait Migration {
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up(&self, conn: &Connection) -> Result<()>;
}

fn record_migration(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn is_migration_applied(conn: &Connection, version: u32) -> Result<bool> {
    let applied: bool = conn
        .prepare("SELECT 1 FROM schema_migrations WHERE version = ?1")?
        .exists(rusqlite::params![version])?;
    Ok(applied)
}

fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(v1_releases::V1Releases),
        Box::new(v2_ingestion_locks::V2IngestionLocks),
        Box::new(v3_active_hash_unique::V3ActiveHashUnique),
    ]
}

/// Apply every pending migration, each inside its own transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    schema::create_migrations_table(conn)?;

    for migration in all_migrations() {
        if is_migration_applied(conn, migration.version())? {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        migration.up(&tx)?;
        record_migration(&tx, migration.version())?;
        tx.commit()?;
        tracing::debug!(
            version = migration.version(),
            description = migration.description(),
            "applied migration"
        );
    }

    Ok(())
}

pub fn get_applied_versions(conn: &Connection) -> Result<Vec<u32>> {
    let has_table: bool = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'")?
        .exists([])?;

    if !has_table {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}
