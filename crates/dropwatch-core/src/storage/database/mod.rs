mod connection;
mod migrations;
mod schema;

pub use connection::ConnectionPool;
pub use migrations::{get_applied_versions, run_migrations, Migration};
pub use schema::{BUSY_TIMEOUT_MS, SCHEMA_VERSION};

use std::path::Path;

use crate::error::Result;

/// Open (or create) the database file and bring its schema up to date.
pub fn open_database(path: &Path) -> Result<ConnectionPool> {
    let pool = ConnectionPool::open(path)?;
    {
        let conn = pool.get_connection()?;
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = ConnectionPool::open_in_memory()?;
    {
        let conn = pool.get_connection()?;
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory_runs_migrations() {
        let pool = open_in_memory().unwrap();
        let conn = pool.get_connection().unwrap();
        let versions = get_applied_versions(&conn).unwrap();
        assert_eq!(versions.last().copied(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropwatch.db");
        drop(open_database(&path).unwrap());
        let pool = open_database(&path).unwrap();
        let conn = pool.get_connection().unwrap();
        assert_eq!(get_applied_versions(&conn).unwrap().len(), SCHEMA_VERSION as usize);
    }
}
