//! Core types for the document store.
//!
//! Documents live at `/`-separated paths. A collection path has an odd
//! number of segments (`users`, `connections/{uid}/friends`) and a document
//! path an even number (`users/{uid}`). Document data is a JSON object.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::error::{Result, StoreError};

/// Validates a single path segment (a collection name or document id).
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(StoreError::InvalidPath("empty path segment".to_string()));
    }
    if segment.contains('/') {
        return Err(StoreError::InvalidPath(format!(
            "segment contains '/': {segment}"
        )));
    }
    Ok(())
}

/// Path of a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Parses a collection path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path has an even number of
    /// segments or any segment is empty.
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<&str> = path.split('/').collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        if segments.len() % 2 == 0 {
            return Err(StoreError::InvalidPath(format!(
                "not a collection path: {path}"
            )));
        }
        Ok(Self(path.to_string()))
    }

    /// Returns the path of the document `id` inside this collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if `id` is empty or contains `/`.
    pub fn doc(&self, id: &str) -> Result<DocPath> {
        validate_segment(id)?;
        Ok(DocPath {
            full: format!("{}/{id}", self.0),
            split: self.0.len(),
        })
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    full: String,
    /// Byte offset of the `/` separating collection and id.
    split: usize,
}

impl DocPath {
    /// Parses a document path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path has an odd number of
    /// segments or any segment is empty.
    pub fn parse(path: &str) -> Result<Self> {
        let Some(split) = path.rfind('/') else {
            return Err(StoreError::InvalidPath(format!(
                "not a document path: {path}"
            )));
        };
        CollectionPath::parse(&path[..split])?.doc(&path[split + 1..])
    }

    /// Returns the collection containing this document.
    #[must_use]
    pub fn collection(&self) -> CollectionPath {
        CollectionPath(self.full[..self.split].to_string())
    }

    /// Returns the document id (last path segment).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.full[self.split + 1..]
    }

    /// Returns the full path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// A value to be written into a document field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A literal JSON value.
    Value(Value),
    /// Replaced by the store's clock (epoch milliseconds) at commit time.
    ServerTimestamp,
}

/// Field values for a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    /// Creates an empty field set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a literal field value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), FieldValue::Value(value.into()));
        self
    }

    /// Adds a field set to the commit time.
    #[must_use]
    pub fn with_server_timestamp(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), FieldValue::ServerTimestamp);
        self
    }

    /// Inserts a field value, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.0.insert(name.into(), value);
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves server timestamps against `now_millis` and returns the
    /// JSON object to store.
    #[must_use]
    pub fn resolve(&self, now_millis: i64) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    FieldValue::Value(v) => v.clone(),
                    FieldValue::ServerTimestamp => Value::from(now_millis),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

/// A document read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Full path of the document.
    pub path: DocPath,
    /// Document fields.
    pub data: Map<String, Value>,
}

impl Document {
    /// Returns the document id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.path.id()
    }

    /// Returns a string field, if present and a string.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Returns an integer field, if present and an integer.
    #[must_use]
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.data.get(field).and_then(Value::as_i64)
    }

    /// Deserializes the document data into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the data does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

/// Comparison operator for [`query_where`](super::DocumentStore::query_where).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereOp {
    /// Field equals value.
    Eq,
    /// Field is present and differs from value.
    NotEq,
    /// Field is less than value.
    Lt,
    /// Field is less than or equal to value.
    Le,
    /// Field is greater than value.
    Gt,
    /// Field is greater than or equal to value.
    Ge,
}

impl WhereOp {
    /// Evaluates `field_value <op> value`.
    ///
    /// Ordering comparisons only hold between values of the same JSON type
    /// (strings, numbers or booleans).
    #[must_use]
    pub fn matches(self, field_value: &Value, value: &Value) -> bool {
        match self {
            Self::Eq => compare_values(field_value, value) == Some(Ordering::Equal),
            Self::NotEq => compare_values(field_value, value) != Some(Ordering::Equal),
            Self::Lt => compare_values(field_value, value) == Some(Ordering::Less),
            Self::Le => matches!(
                compare_values(field_value, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Gt => compare_values(field_value, value) == Some(Ordering::Greater),
            Self::Ge => matches!(
                compare_values(field_value, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Orders two JSON values of the same scalar type.
///
/// Returns `None` for mismatched types, nulls, arrays and objects (except
/// that structurally equal values compare `Equal`).
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// One operation in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Write fields, replacing the document or merging into it.
    Set {
        /// Target document.
        path: DocPath,
        /// Fields to write.
        fields: Fields,
        /// Merge into an existing document instead of replacing it.
        merge: bool,
    },
    /// Write a new document; fails the batch if it already exists.
    Create {
        /// Target document.
        path: DocPath,
        /// Fields to write.
        fields: Fields,
    },
    /// Delete a document; a missing document is not an error.
    Delete {
        /// Target document.
        path: DocPath,
    },
    /// Fail the batch unless the document's existence matches `exists`.
    Verify {
        /// Document to check.
        path: DocPath,
        /// Expected existence.
        exists: bool,
    },
}

/// A set of writes committed as one all-or-nothing unit.
///
/// Operations are evaluated in order against the state produced by the
/// preceding operations of the same batch. If any verify or create check
/// fails, none of the writes are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the document at `path` with `fields`.
    pub fn set(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.ops.push(BatchOp::Set {
            path,
            fields,
            merge: false,
        });
        self
    }

    /// Merges `fields` into the document at `path`, creating it if needed.
    pub fn merge(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.ops.push(BatchOp::Set {
            path,
            fields,
            merge: true,
        });
        self
    }

    /// Creates the document at `path`; the batch fails if it exists.
    pub fn create(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.ops.push(BatchOp::Create { path, fields });
        self
    }

    /// Deletes the document at `path`.
    pub fn delete(&mut self, path: DocPath) -> &mut Self {
        self.ops.push(BatchOp::Delete { path });
        self
    }

    /// Requires the document at `path` to exist.
    pub fn verify_exists(&mut self, path: DocPath) -> &mut Self {
        self.ops.push(BatchOp::Verify { path, exists: true });
        self
    }

    /// Requires the document at `path` to be absent.
    pub fn verify_absent(&mut self, path: DocPath) -> &mut Self {
        self.ops.push(BatchOp::Verify {
            path,
            exists: false,
        });
        self
    }

    /// Returns the queued operations.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
