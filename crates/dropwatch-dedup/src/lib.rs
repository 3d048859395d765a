//! dropwatch dedup: decides whether scraped releases are already known,
//! serializes ingestion runs behind expiring locks and folds stray
//! duplicates back into the catalogue.

pub mod cleanup;
pub mod error;
pub mod ingest;
pub mod lock;
pub mod resolver;
pub mod similarity;

pub use cleanup::{Cleanup, CleanupReport, PlannedMerge};
pub use error::{DedupError, Result};
pub use ingest::{IngestDecision, IngestReport, Ingestor};
pub use lock::{LockManager, RunOutcome};
pub use resolver::{DuplicateResolver, DuplicateVerdict, MatchReason, ResolverSettings, Scope};
pub use similarity::{trigram_similarity, word_overlap};
