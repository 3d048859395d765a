use chrono::Duration;
use dropwatch_core::{
    AppConfig, ConnectionPool, Normalizer, ReleaseCandidate, ReleaseId, ReleaseRepository,
    SqliteReleaseRepository,
};
use serde::Serialize;

use crate::error::Result;
use crate::lock::{LockManager, RunOutcome};
use crate::resolver::{DuplicateResolver, DuplicateVerdict};

/// What happened to one candidate of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IngestDecision {
    Inserted {
        title: String,
        id: ReleaseId,
    },
    Duplicate {
        title: String,
        verdict: DuplicateVerdict,
    },
}

impl IngestDecision {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestDecision::Duplicate { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub decisions: Vec<IngestDecision>,
}

impl IngestReport {
    fn record(&mut self, decision: IngestDecision) {
        if decision.is_duplicate() {
            self.duplicates += 1;
        } else {
            self.inserted += 1;
        }
        self.decisions.push(decision);
    }
}

/// Runs a batch of scraped candidates through the resolver under a lock.
pub struct Ingestor<'p> {
    pool: &'p ConnectionPool,
    normalizer: Normalizer,
    resolver: DuplicateResolver,
    ttl: Duration,
}

impl<'p> Ingestor<'p> {
    pub fn new(pool: &'p ConnectionPool, config: &AppConfig) -> Self {
        Self {
            pool,
            normalizer: Normalizer::from_config(&config.dedup),
            resolver: DuplicateResolver::from_config(&config.dedup),
            ttl: config.lock_ttl(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Ingest `candidates` in order. Each candidate sees the ones inserted
    /// before it, so near-duplicates within a batch collapse to the first.
    pub fn run(
        &self,
        lock_name: &str,
        holder: &str,
        candidates: &[ReleaseCandidate],
    ) -> Result<RunOutcome<IngestReport>> {
        LockManager::new(self.pool).run_exclusive(lock_name, holder, self.ttl, || {
            self.ingest(candidates)
        })
    }

    fn ingest(&self, candidates: &[ReleaseCandidate]) -> Result<IngestReport> {
        let repo = SqliteReleaseRepository::new(self.pool.get_connection()?, &self.normalizer);
        let mut report = IngestReport::default();

        for candidate in candidates {
            let verdict = self.resolver.resolve(&repo, candidate)?;
            let decision = if verdict.is_duplicate {
                IngestDecision::Duplicate {
                    title: candidate.title.clone(),
                    verdict,
                }
            } else {
                let record = repo.insert(candidate)?;
                IngestDecision::Inserted {
                    title: record.title,
                    id: record.id,
                }
            };
            report.record(decision);
        }

        tracing::info!(
            candidates = candidates.len(),
            inserted = report.inserted,
            duplicates = report.duplicates,
            "ingestion batch finished"
        );
        Ok(report)
    }
}
