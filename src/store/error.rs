//! Error types for document store operations.
//!
//! Store errors are split into transient failures (safe to retry, because
//! every mutation is an all-or-nothing batch) and permanent ones.

use thiserror::Error;

/// Error type for document store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Field data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store is temporarily unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete in time.
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// A batch precondition did not hold. Nothing was written.
    #[error("Precondition failed for {path}")]
    PreconditionFailed {
        /// The document whose existence check failed.
        path: String,
    },

    /// Malformed document or collection path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Stored data has an unexpected shape.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Failed to acquire the store lock.
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StoreError {
    /// Returns whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_error_display() {
        let err = StoreError::Unavailable("connection reset".to_string());
        assert_eq!(err.to_string(), "Store unavailable: connection reset");
    }

    #[test]
    fn precondition_error_display() {
        let err = StoreError::PreconditionFailed {
            path: "connections/a/friends/b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Precondition failed for connections/a/friends/b"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::Unavailable(String::new()).is_transient());
        assert!(StoreError::Timeout(String::new()).is_transient());
        assert!(!StoreError::InvalidPath(String::new()).is_transient());
        assert!(!StoreError::PreconditionFailed {
            path: String::new()
        }
        .is_transient());
    }
}
