//! Error types for ledger storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// The backing table or database is not available (closed, mid-migration).
    #[error("storage unavailable")]
    Unavailable,

    /// Waiting for a row lock exceeded the configured timeout.
    #[error("timed out waiting for row lock")]
    LockTimeout,

    /// The transaction conflicted with a concurrent writer.
    #[error("write conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::Conflict(_) | Self::Unavailable)
    }
}
