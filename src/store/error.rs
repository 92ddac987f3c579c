//! Error types for the source store.

use thiserror::Error;

/// Errors produced by store operations.
///
/// Every store operation runs in its own transaction; on error the whole
/// batch is rolled back and the error surfaces here, never a partial commit.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure (constraint violation, I/O, lock timeout).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
