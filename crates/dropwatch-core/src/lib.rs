//! dropwatch core: release models, title keys, SQLite storage and config.

pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod text;

pub use config::{AppConfig, CoreConfig, DedupConfig, LockConfig};
pub use error::{DropwatchError, ExitCode, Result};
pub use models::*;
pub use text::{fingerprint, normalize_title, Normalizer};

pub use storage::database::{open_database, open_in_memory, ConnectionPool};
pub use storage::repositories::{
    LockRepository, ReleaseRepository, Repository, SqliteLockRepository,
    SqliteReleaseRepository,
};
