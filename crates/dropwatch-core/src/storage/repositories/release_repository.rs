use std::sync::MutexGuard;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::{DropwatchError, Result};
use crate::models::{ReleaseCandidate, ReleaseId, ReleaseRecord};
use crate::text::{fingerprint, Normalizer};

use super::{conversion_error, is_unique_violation, parse_timestamp, Repository};

const RELEASE_COLUMNS: &str = "id, title, title_normalized, source_url, image_url, \
     source_product_hash, merged_into_id, created_at, updated_at";

/// Upper bound on chain-flattening passes; each pass shortens every chain by one hop.
const MAX_FLATTEN_PASSES: usize = 32;

/// The record store consulted by the duplicate resolver.
///
/// All `find_active_*` lookups and `scan_active` exclude merged rows and
/// return results ordered by id.
pub trait ReleaseRepository: Repository<Entity = ReleaseRecord, Id = ReleaseId> {
    /// The normalizer applied on every write; callers must key lookups with it.
    fn normalizer(&self) -> &Normalizer;

    fn find_active_by_hash(&self, hash: &str) -> Result<Vec<ReleaseRecord>>;
    fn find_active_by_url_and_title(
        &self,
        source_url: &str,
        title_normalized: &str,
    ) -> Result<Vec<ReleaseRecord>>;
    fn find_active_by_image(&self, image_url: &str) -> Result<Vec<ReleaseRecord>>;
    fn scan_active(&self) -> Result<Vec<ReleaseRecord>>;

    /// Insert a new release, deriving its normalized title and fingerprint.
    fn insert(&self, candidate: &ReleaseCandidate) -> Result<ReleaseRecord>;

    /// Change title and source URL, recomputing the derived columns.
    fn update_source(
        &self,
        id: &ReleaseId,
        title: &str,
        source_url: Option<&str>,
    ) -> Result<ReleaseRecord>;

    /// Mark `duplicate` as superseded. Returns the id it now points at,
    /// which is `canonical` or, if that is itself merged, its target.
    fn mark_merged(&self, duplicate: &ReleaseId, canonical: &ReleaseId) -> Result<ReleaseId>;

    /// Re-point rows whose merge target is itself merged. Returns rows updated.
    fn flatten_merge_chains(&self) -> Result<usize>;

    fn count_active(&self) -> Result<usize>;
    fn count_merged(&self) -> Result<usize>;
}

/// Re-point every row whose merge target is itself merged at that target's
/// target, until no chain remains. Returns rows updated.
pub(crate) fn flatten_chains(conn: &Connection) -> Result<usize> {
    let mut total = 0;
    for _ in 0..MAX_FLATTEN_PASSES {
        let updated = conn.execute(
            "UPDATE releases
                SET merged_into_id = (
                        SELECT parent.merged_into_id FROM releases parent
                         WHERE parent.id = releases.merged_into_id
                    ),
                    updated_at = ?1
              WHERE merged_into_id IN (
                        SELECT id FROM releases WHERE merged_into_id IS NOT NULL
                    )",
            params![Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            break;
        }
        total += updated;
    }
    Ok(total)
}

pub struct SqliteReleaseRepository<'a> {
    conn: MutexGuard<'a, Connection>,
    normalizer: &'a Normalizer,
}

impl<'a> SqliteReleaseRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>, normalizer: &'a Normalizer) -> Self {
        Self { conn, normalizer }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ReleaseRecord> {
        let id: String = row.get(0)?;
        let merged_into: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;

        Ok(ReleaseRecord {
            id: id.parse().map_err(|e| conversion_error(0, e))?,
            title: row.get(1)?,
            title_normalized: row.get(2)?,
            source_url: row.get(3)?,
            image_url: row.get(4)?,
            source_product_hash: row.get(5)?,
            merged_into_id: merged_into
                .map(|raw| raw.parse().map_err(|e| conversion_error(6, e)))
                .transpose()?,
            created_at: parse_timestamp(7, &created_at)?,
            updated_at: parse_timestamp(8, &updated_at)?,
        })
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ReleaseRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn fetch(conn: &Connection, id: &ReleaseId) -> Result<Option<ReleaseRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {RELEASE_COLUMNS} FROM releases WHERE id = ?1"),
                params![id.to_string()],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn fetch_required(conn: &Connection, id: &ReleaseId) -> Result<ReleaseRecord> {
        Self::fetch(conn, id)?.ok_or_else(|| DropwatchError::RecordNotFound(id.to_string()))
    }
}

impl<'a> Repository for SqliteReleaseRepository<'a> {
    type Entity = ReleaseRecord;
    type Id = ReleaseId;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        Self::fetch(&self.conn, id)
    }
}

impl<'a> ReleaseRepository for SqliteReleaseRepository<'a> {
    fn normalizer(&self) -> &Normalizer {
        self.normalizer
    }

    fn find_active_by_hash(&self, hash: &str) -> Result<Vec<ReleaseRecord>> {
        Self::query_records(
            &self.conn,
            &format!(
                "SELECT {RELEASE_COLUMNS} FROM releases
                 WHERE source_product_hash = ?1 AND merged_into_id IS NULL
                 ORDER BY id"
            ),
            params![hash],
        )
    }

    fn find_active_by_url_and_title(
        &self,
        source_url: &str,
        title_normalized: &str,
    ) -> Result<Vec<ReleaseRecord>> {
        Self::query_records(
            &self.conn,
            &format!(
                "SELECT {RELEASE_COLUMNS} FROM releases
                 WHERE source_url = ?1 AND title_normalized = ?2 AND merged_into_id IS NULL
                 ORDER BY id"
            ),
            params![source_url, title_normalized],
        )
    }

    fn find_active_by_image(&self, image_url: &str) -> Result<Vec<ReleaseRecord>> {
        Self::query_records(
            &self.conn,
            &format!(
                "SELECT {RELEASE_COLUMNS} FROM releases
                 WHERE image_url = ?1 AND merged_into_id IS NULL
                 ORDER BY id"
            ),
            params![image_url],
        )
    }

    fn scan_active(&self) -> Result<Vec<ReleaseRecord>> {
        Self::query_records(
            &self.conn,
            &format!(
                "SELECT {RELEASE_COLUMNS} FROM releases
                 WHERE merged_into_id IS NULL
                 ORDER BY id"
            ),
            [],
        )
    }

    fn insert(&self, candidate: &ReleaseCandidate) -> Result<ReleaseRecord> {
        let title_normalized = self.normalizer.normalize(&candidate.title);
        let source_product_hash = fingerprint(candidate.source_url.as_deref(), &title_normalized);
        let now = Utc::now();

        let record = ReleaseRecord {
            id: ReleaseId::new(),
            title: candidate.title.clone(),
            title_normalized,
            source_url: candidate.source_url.clone(),
            image_url: candidate.image_url.clone(),
            source_product_hash,
            merged_into_id: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.conn.execute(
            "INSERT INTO releases
                (id, title, title_normalized, source_url, image_url,
                 source_product_hash, merged_into_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?7)",
            params![
                record.id.to_string(),
                record.title,
                record.title_normalized,
                record.source_url,
                record.image_url,
                record.source_product_hash,
                now.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => Ok(record),
            Err(e) if is_unique_violation(&e) => {
                Err(DropwatchError::DuplicateFingerprint(record.source_product_hash))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_source(
        &self,
        id: &ReleaseId,
        title: &str,
        source_url: Option<&str>,
    ) -> Result<ReleaseRecord> {
        let mut record = Self::fetch_required(&self.conn, id)?;
        let title_normalized = self.normalizer.normalize(title);
        let source_product_hash = fingerprint(source_url, &title_normalized);
        let now = Utc::now();

        let updated = self.conn.execute(
            "UPDATE releases
                SET title = ?2, source_url = ?3, title_normalized = ?4,
                    source_product_hash = ?5, updated_at = ?6
              WHERE id = ?1",
            params![
                id.to_string(),
                title,
                source_url,
                title_normalized,
                source_product_hash,
                now.to_rfc3339(),
            ],
        );
        match updated {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(DropwatchError::DuplicateFingerprint(source_product_hash));
            }
            Err(e) => return Err(e.into()),
        }

        record.title = title.to_string();
        record.source_url = source_url.map(str::to_string);
        record.title_normalized = title_normalized;
        record.source_product_hash = source_product_hash;
        record.updated_at = now;
        Ok(record)
    }

    fn mark_merged(&self, duplicate: &ReleaseId, canonical: &ReleaseId) -> Result<ReleaseId> {
        if duplicate == canonical {
            return Err(DropwatchError::InvalidMerge(format!(
                "release {duplicate} cannot be merged into itself"
            )));
        }

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let dup = Self::fetch_required(&tx, duplicate)?;
        if let Some(existing) = dup.merged_into_id {
            return Err(DropwatchError::InvalidMerge(format!(
                "release {duplicate} is already merged into {existing}"
            )));
        }

        let target = Self::fetch_required(&tx, canonical)?;
        let final_target = target.merged_into_id.unwrap_or(target.id);
        if final_target == *duplicate {
            return Err(DropwatchError::InvalidMerge(format!(
                "release {canonical} is already merged into {duplicate}"
            )));
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE releases SET merged_into_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![duplicate.to_string(), final_target.to_string(), now],
        )?;
        // Rows that pointed at the duplicate follow it to the final target.
        tx.execute(
            "UPDATE releases SET merged_into_id = ?2, updated_at = ?3 WHERE merged_into_id = ?1",
            params![duplicate.to_string(), final_target.to_string(), now],
        )?;
        tx.commit()?;

        tracing::info!(
            duplicate = %duplicate,
            canonical = %final_target,
            "merged release"
        );
        Ok(final_target)
    }

    fn flatten_merge_chains(&self) -> Result<usize> {
        let total = flatten_chains(&self.conn)?;
        if total > 0 {
            tracing::warn!(rows = total, "flattened merge chains");
        }
        Ok(total)
    }

    fn count_active(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM releases WHERE merged_into_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_merged(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM releases WHERE merged_into_id IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
