use rusqlite::{params, Connection};

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;
use crate::storage::repositories::flatten_chains;

pub struct V3ActiveHashUnique;

impl Migration for V3ActiveHashUnique {
    fn version(&self) -> u32 {
        3
    }

    fn description(&self) -> &'static str {
        "Unique fingerprint among active releases"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        // Rows written before the index existed may collide. The earliest
        // row of each fingerprint stays active; the rest are merged into it.
        let merged = conn.execute(
            "UPDATE releases
                SET merged_into_id = (
                        SELECT MIN(keep.id) FROM releases keep
                         WHERE keep.source_product_hash = releases.source_product_hash
                           AND keep.merged_into_id IS NULL
                    ),
                    updated_at = ?1
              WHERE merged_into_id IS NULL
                AND id > (
                        SELECT MIN(keep.id) FROM releases keep
                         WHERE keep.source_product_hash = releases.source_product_hash
                           AND keep.merged_into_id IS NULL
                    )",
            params![chrono::Utc::now().to_rfc3339()],
        )?;
        // Rows that already pointed at a now-merged row must follow it.
        let repointed = flatten_chains(conn)?;
        if merged > 0 {
            tracing::warn!(
                merged,
                repointed,
                "merged releases sharing a fingerprint before adding unique index"
            );
        }
        schema::create_active_hash_index(conn)
    }
}
