use rusqlite::Connection;

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;

pub struct V2IngestionLocks;

impl Migration for V2IngestionLocks {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Named TTL locks serializing ingestion runs"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        schema::create_locks_table(conn)
    }
}
