//! Catalogue cleanup: folds duplicates that slipped into the store (from
//! older keying rules, manual inserts or imports) into their earliest twin.

use chrono::Duration;
use dropwatch_core::{
    AppConfig, ConnectionPool, Normalizer, ReleaseId, ReleaseRepository, SqliteReleaseRepository,
};
use serde::Serialize;

use crate::error::Result;
use crate::lock::{LockManager, RunOutcome};
use crate::resolver::{DuplicateResolver, MatchReason, Scope};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedMerge {
    pub duplicate: ReleaseId,
    pub canonical: ReleaseId,
    pub title: String,
    pub reason: MatchReason,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub examined: usize,
    pub merges: Vec<PlannedMerge>,
    /// Always zero on a dry run.
    pub chains_flattened: usize,
}

pub struct Cleanup<'p> {
    pool: &'p ConnectionPool,
    normalizer: Normalizer,
    resolver: DuplicateResolver,
    ttl: Duration,
}

impl<'p> Cleanup<'p> {
    pub fn new(pool: &'p ConnectionPool, config: &AppConfig) -> Self {
        Self {
            pool,
            normalizer: Normalizer::from_config(&config.dedup),
            resolver: DuplicateResolver::from_config(&config.dedup),
            ttl: config.lock_ttl(),
        }
    }

    /// Holds `lock_name` for the duration so cleanup never races ingestion.
    pub fn run(
        &self,
        lock_name: &str,
        holder: &str,
        dry_run: bool,
    ) -> Result<RunOutcome<CleanupReport>> {
        LockManager::new(self.pool)
            .run_exclusive(lock_name, holder, self.ttl, || self.sweep(dry_run))
    }

    fn sweep(&self, dry_run: bool) -> Result<CleanupReport> {
        let repo = SqliteReleaseRepository::new(self.pool.get_connection()?, &self.normalizer);
        let records = repo.scan_active()?;
        let mut report = CleanupReport {
            dry_run,
            examined: records.len(),
            ..CleanupReport::default()
        };

        // Merged ids are tracked here too so that a dry run plans the same
        // merges a real run would perform.
        let mut scope = Scope::all();
        for record in &records {
            scope.before = Some(record.id);
            let verdict = self
                .resolver
                .resolve_in(&repo, &record.as_candidate(), &scope)?;
            let (Some(canonical), Some(reason)) = (verdict.matched_id, verdict.reason) else {
                continue;
            };

            if !dry_run {
                repo.mark_merged(&record.id, &canonical)?;
            }
            tracing::info!(
                duplicate = %record.id,
                %canonical,
                %reason,
                score = verdict.score,
                dry_run,
                "merging duplicate release"
            );
            scope.excluded.insert(record.id);
            report.merges.push(PlannedMerge {
                duplicate: record.id,
                canonical,
                title: record.title.clone(),
                reason,
                score: verdict.score,
            });
        }

        if !dry_run {
            report.chains_flattened = repo.flatten_merge_chains()?;
        }

        tracing::info!(
            examined = report.examined,
            merges = report.merges.len(),
            chains_flattened = report.chains_flattened,
            dry_run,
            "cleanup finished"
        );
        Ok(report)
    }
}
