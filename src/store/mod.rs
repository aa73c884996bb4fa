//! Document store collaborator.
//!
//! The access-control and proximity engines persist everything through the
//! [`DocumentStore`] trait: point reads and writes, ordered range scans,
//! field filters and all-or-nothing write batches.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: in-process maps, serializable batches
//! - [`SqliteStore`]: `SQLite` database, one transaction per batch
//!
//! # Layout
//!
//! ```text
//! users/{uid}                                  user record (location, geohash, profile)
//! connections/{uid}/friends/{peer}             accepted friend edge
//! connections/{uid}/trackers/{peer}            accepted tracker edge
//! connections/{uid}/outgoingRequests/{peer}    pending friend request sent
//! connections/{uid}/incomingRequests/{peer}    pending friend request received
//! connections/{uid}/outgoingTrackerRequests/{peer}
//! connections/{uid}/incomingTrackerRequests/{peer}
//! ```

mod error;
mod memory;
mod sqlite;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
    BatchOp, CollectionPath, DocPath, Document, FieldValue, Fields, WhereOp, WriteBatch,
};

/// Minimal document database interface.
///
/// All methods are asynchronous so remote backends can be plugged in;
/// implementations are expected to enforce their own I/O timeouts and to
/// report them as [`StoreError::Timeout`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a single document. Returns `None` if it does not exist.
    async fn get_document(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Writes a document, replacing it or merging top-level fields into it.
    async fn set_document(&self, path: &DocPath, fields: Fields, merge: bool) -> Result<()>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete_document(&self, path: &DocPath) -> Result<()>;

    /// Returns up to `limit` documents of `collection` whose string field
    /// `order_by` lies in `start..=end`, in ascending order of that field.
    ///
    /// Documents without the field are never returned.
    async fn query_range(
        &self,
        collection: &CollectionPath,
        order_by: &str,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Returns all documents of `collection` whose `field` satisfies
    /// `field <op> value`, ordered by document id.
    async fn query_where(
        &self,
        collection: &CollectionPath,
        field: &str,
        op: WhereOp,
        value: &Value,
    ) -> Result<Vec<Document>>;

    /// Applies every operation of `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PreconditionFailed`] if a verify or create check
    /// fails; in that case nothing is written.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}

/// Returns the current time in epoch milliseconds, used for server timestamps.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Validates a field name used in a query.
///
/// Field names are restricted to ASCII alphanumerics and `_` so they can be
/// embedded in JSON paths.
pub(crate) fn validate_field(field: &str) -> Result<()> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidPath(format!("invalid field name: {field}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_field_accepts_identifiers() {
        assert!(validate_field("geohash").is_ok());
        assert!(validate_field("created_at").is_ok());
        assert!(validate_field("").is_err());
        assert!(validate_field("a.b").is_err());
        assert!(validate_field("x') OR 1=1 --").is_err());
    }
}
