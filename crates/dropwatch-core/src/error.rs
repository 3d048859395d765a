use thiserror::Error;

/// All errors that can occur in dropwatch-core.
#[derive(Debug, Error)]
pub enum DropwatchError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] rusqlite::Error),

    #[error("Store unavailable: connection mutex poisoned")]
    StorePoisoned,

    #[error("Release not found: {0}")]
    RecordNotFound(String),

    #[error("Active release already has fingerprint {0}")]
    DuplicateFingerprint(String),

    #[error("Invalid merge: {0}")]
    InvalidMerge(String),

    #[error("Invalid record id: {0}")]
    InvalidId(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<rusqlite::Error> for DropwatchError {
    fn from(e: rusqlite::Error) -> Self {
        DropwatchError::StoreUnavailable(e)
    }
}

impl DropwatchError {
    /// True when the failure came from the backing store rather than from
    /// the caller's input. Ingestion treats these as retryable.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            DropwatchError::StoreUnavailable(_) | DropwatchError::StorePoisoned
        )
    }
}

/// Exit codes used by the `dropwatch` binary.
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    LockContended = 2,
}

pub type Result<T> = std::result::Result<T, DropwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rusqlite_errors_are_store_unavailable() {
        let err: DropwatchError = rusqlite::Error::InvalidQuery.into();
        assert!(err.is_store_unavailable());
        assert!(err.to_string().starts_with("Store unavailable"));
    }

    #[test]
    fn test_domain_errors_are_not_store_unavailable() {
        assert!(!DropwatchError::InvalidMerge("self".into()).is_store_unavailable());
        assert!(!DropwatchError::RecordNotFound("x".into()).is_store_unavailable());
        assert!(DropwatchError::StorePoisoned.is_store_unavailable());
    }
}
