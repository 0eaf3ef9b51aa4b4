//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `pool()` was called before `init()` or after `close()`.
    #[error("store is not initialized or it is already closed")]
    NotInitialized,

    /// The pool could not be opened.
    #[error("Failed to connect to MySQL at {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: sqlx::Error,
    },

    /// Applying the bundled migrations failed.
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Any other database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
