//! `SQLite` storage for documents.
//!
//! Every document is one row of the `documents` table, keyed by its
//! collection path and id, with its fields stored as a JSON object. Write
//! batches run inside a single transaction, so a failed precondition rolls
//! back every write of the batch.

// SQLite operations need to hold the lock for the duration of the operation.
// Dropping the guard earlier would require restructuring all methods.
#![allow(clippy::significant_drop_tightening)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::error::{Result, StoreError};
use super::types::{BatchOp, CollectionPath, DocPath, Document, Fields, WhereOp, WriteBatch};
use super::{now_millis, validate_field, DocumentStore};

/// `SQLite`-based [`DocumentStore`].
///
/// Thread-safe wrapper around a `SQLite` connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// Creates the database file and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn new(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening document store");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire database lock: {e}")))
    }

    /// Initializes the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (collection, doc_id)
            );
            ",
        )?;

        Ok(())
    }
}

/// Reads the fields of one document.
fn read_document(conn: &Connection, path: &DocPath) -> Result<Option<Map<String, Value>>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![path.collection().as_str(), path.id()],
            |row| row.get(0),
        )
        .optional()?;

    data.map(|json| decode_object(&json)).transpose()
}

/// Writes the fields of one document, replacing any existing row.
fn write_document(conn: &Connection, path: &DocPath, data: &Map<String, Value>) -> Result<()> {
    let json = serde_json::to_string(data)?;
    conn.execute(
        r"
        INSERT INTO documents (collection, doc_id, data)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(collection, doc_id) DO UPDATE SET
            data = excluded.data
        ",
        params![path.collection().as_str(), path.id(), &json],
    )?;
    Ok(())
}

fn decode_object(json: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(json)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidData(format!(
            "document data is not an object: {other}"
        ))),
    }
}

fn rows_to_documents(
    collection: &CollectionPath,
    rows: Vec<(String, String)>,
) -> Result<Vec<Document>> {
    rows.into_iter()
        .map(|(doc_id, json)| {
            Ok(Document {
                path: collection.doc(&doc_id)?,
                data: decode_object(&json)?,
            })
        })
        .collect()
}

/// Applies one batch operation inside an open transaction.
fn apply_op(conn: &Connection, op: &BatchOp, now: i64) -> Result<()> {
    match op {
        BatchOp::Verify { path, exists } => {
            if read_document(conn, path)?.is_some() != *exists {
                return Err(StoreError::PreconditionFailed {
                    path: path.to_string(),
                });
            }
        }
        BatchOp::Create { path, fields } => {
            if read_document(conn, path)?.is_some() {
                return Err(StoreError::PreconditionFailed {
                    path: path.to_string(),
                });
            }
            write_document(conn, path, &fields.resolve(now))?;
        }
        BatchOp::Set {
            path,
            fields,
            merge,
        } => {
            let mut data = if *merge {
                read_document(conn, path)?.unwrap_or_default()
            } else {
                Map::new()
            };
            data.extend(fields.resolve(now));
            write_document(conn, path, &data)?;
        }
        BatchOp::Delete { path } => {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
                params![path.collection().as_str(), path.id()],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_document(&self, path: &DocPath) -> Result<Option<Document>> {
        let conn = self.lock()?;
        Ok(read_document(&conn, path)?.map(|data| Document {
            path: path.clone(),
            data,
        }))
    }

    async fn set_document(&self, path: &DocPath, fields: Fields, merge: bool) -> Result<()> {
        let mut batch = WriteBatch::new();
        if merge {
            batch.merge(path.clone(), fields);
        } else {
            batch.set(path.clone(), fields);
        }
        self.commit(batch).await
    }

    async fn delete_document(&self, path: &DocPath) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(path.clone());
        self.commit(batch).await
    }

    async fn query_range(
        &self,
        collection: &CollectionPath,
        order_by: &str,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<Document>> {
        validate_field(order_by)?;
        let json_path = format!("$.{order_by}");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r"
            SELECT doc_id, data
            FROM documents
            WHERE collection = ?1
              AND json_type(data, ?2) = 'text'
              AND json_extract(data, ?2) >= ?3
              AND json_extract(data, ?2) <= ?4
            ORDER BY json_extract(data, ?2), doc_id
            LIMIT ?5
            ",
        )?;

        let rows = stmt
            .query_map(
                params![collection.as_str(), &json_path, start, end, limit],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows_to_documents(collection, rows)
    }

    async fn query_where(
        &self,
        collection: &CollectionPath,
        field: &str,
        op: WhereOp,
        value: &Value,
    ) -> Result<Vec<Document>> {
        validate_field(field)?;
        let json_path = format!("$.{field}");
        let conn = self.lock()?;

        // Narrow to documents carrying the field; the typed comparison runs
        // in Rust so both stores share the same semantics.
        let mut stmt = conn.prepare(
            r"
            SELECT doc_id, data
            FROM documents
            WHERE collection = ?1
              AND json_type(data, ?2) IS NOT NULL
            ORDER BY doc_id
            ",
        )?;

        let rows = stmt
            .query_map(params![collection.as_str(), &json_path], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows_to_documents(collection, rows)?
            .into_iter()
            .filter(|doc| {
                doc.data
                    .get(field)
                    .is_some_and(|field_value| op.matches(field_value, value))
            })
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = now_millis();

        for op in batch.ops() {
            // Returning early drops `tx`, which rolls the transaction back.
            apply_op(&tx, op, now)?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> DocPath {
        DocPath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn save_and_get_document() {
        let store = SqliteStore::in_memory().unwrap();
        let p = path("users/alice");
        store
            .set_document(
                &p,
                Fields::new()
                    .with("driverName", "Alice")
                    .with("location", json!({"latitude": 1.5, "longitude": 2.5})),
                false,
            )
            .await
            .unwrap();

        let doc = store.get_document(&p).await.unwrap().unwrap();
        assert_eq!(doc.get_str("driverName"), Some("Alice"));
        assert_eq!(doc.data["location"]["latitude"], json!(1.5));
    }

    #[tokio::test]
    async fn get_nonexistent_document_returns_none() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_document(&path("users/x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_batch_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch
            .set(path("c/a"), Fields::new().with("x", 1))
            .verify_exists(path("c/missing"));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed { .. }));
        assert!(store.get_document(&path("c/a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn merge_keeps_existing_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let p = path("users/alice");
        store
            .set_document(&p, Fields::new().with("driverName", "Alice"), false)
            .await
            .unwrap();
        store
            .set_document(&p, Fields::new().with("geohash", "9q8yy"), true)
            .await
            .unwrap();

        let doc = store.get_document(&p).await.unwrap().unwrap();
        assert_eq!(doc.get_str("driverName"), Some("Alice"));
        assert_eq!(doc.get_str("geohash"), Some("9q8yy"));
    }

    #[tokio::test]
    async fn query_range_orders_by_field() {
        let store = SqliteStore::in_memory().unwrap();
        let users = CollectionPath::parse("users").unwrap();
        for (id, hash) in [("a", "9q8yy1"), ("b", "9q8yy0"), ("c", "9q9")] {
            store
                .set_document(&users.doc(id).unwrap(), Fields::new().with("geohash", hash), false)
                .await
                .unwrap();
        }
        store
            .set_document(&users.doc("d").unwrap(), Fields::new().with("geohash", 5), false)
            .await
            .unwrap();

        let docs = store
            .query_range(&users, "geohash", "9q8yy", "9q8yy~", 10)
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(Document::id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn query_where_matches_memory_semantics() {
        let store = SqliteStore::in_memory().unwrap();
        let friends = CollectionPath::parse("connections/alice/friends").unwrap();
        store
            .set_document(&friends.doc("bob").unwrap(), Fields::new().with("status", "accepted"), false)
            .await
            .unwrap();
        store
            .set_document(&friends.doc("carol").unwrap(), Fields::new().with("status", "pending"), false)
            .await
            .unwrap();
        store
            .set_document(&friends.doc("dave").unwrap(), Fields::new(), false)
            .await
            .unwrap();

        let accepted = store
            .query_where(&friends, "status", WhereOp::Eq, &json!("accepted"))
            .await
            .unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].id(), "bob");

        let not_accepted = store
            .query_where(&friends, "status", WhereOp::NotEq, &json!("accepted"))
            .await
            .unwrap();
        assert_eq!(not_accepted.len(), 1);
        assert_eq!(not_accepted[0].id(), "carol");
    }

    #[tokio::test]
    async fn delete_document_removes_row() {
        let store = SqliteStore::in_memory().unwrap();
        let p = path("c/a");
        store.set_document(&p, Fields::new(), false).await.unwrap();
        store.delete_document(&p).await.unwrap();
        assert!(store.get_document(&p).await.unwrap().is_none());
        store.delete_document(&p).await.unwrap();
    }
}
