// turing-core/src/error.rs
//! Typed failures surfaced by the library. Binaries wrap these in `anyhow`.

use thiserror::Error;

/// Durable-store failure. Treated as transient by the commit path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("malformed stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("corpus for channel `{0}` is not loaded")]
    NotLoaded(String),
}

/// Why a sentence could not be produced. Never expressed as an empty string.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no admissible data for the requested channel set")]
    EmptyCorpus,
    #[error("could not satisfy length bounds within {attempts} attempts")]
    Exhausted { attempts: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}
