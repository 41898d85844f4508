use thiserror::Error;

/// Errors surfaced by the durable store.
///
/// Mirrors the teacher lineage's `TaskManagerError`: a thin wrapper around
/// the underlying engine's error plus a couple of store-level invariants
/// that don't map to a single SQL error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("store invariant violated: {0}")]
    Invariant(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
