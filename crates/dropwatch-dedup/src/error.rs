use dropwatch_core::{DropwatchError, ReleaseId};
use thiserror::Error;

use crate::resolver::MatchReason;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error(transparent)]
    Core(#[from] DropwatchError),

    /// More than one active release satisfies an exact tier. The store's
    /// uniqueness guarantee has already been broken upstream.
    #[error("ambiguous {reason} match: {} active releases ({})", .ids.len(), join_ids(.ids))]
    AmbiguousMerge {
        reason: MatchReason,
        ids: Vec<ReleaseId>,
    },

    #[error("invalid lock request: {0}")]
    InvalidLockRequest(String),
}

impl DedupError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, DedupError::Core(e) if e.is_store_unavailable())
    }
}

fn join_ids(ids: &[ReleaseId]) -> String {
    ids.iter().map(ReleaseId::to_string).collect::<Vec<_>>().join(", ")
}

pub type Result<T> = std::result::Result<T, DedupError>;
