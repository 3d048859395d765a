use rusqlite::Connection;

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;

pub struct V1Releases;

impl Migration for V1Releases {
    fn version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Releases table with normalized title, fingerprint and merge pointer"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        schema::create_releases_table(conn)
    }
}
