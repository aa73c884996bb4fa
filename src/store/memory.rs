//! In-process document store.
//!
//! All documents live in ordered maps behind a single lock. A batch is
//! staged and applied while holding the lock, so concurrent batches are
//! serialized and each one is observed either completely or not at all.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::{Result, StoreError};
use super::types::{BatchOp, CollectionPath, DocPath, Document, Fields, WhereOp, WriteBatch};
use super::{now_millis, validate_field, DocumentStore};

type Collections = BTreeMap<CollectionPath, BTreeMap<String, Map<String, Value>>>;

/// In-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
    /// Number of upcoming commits that fail with [`StoreError::Unavailable`].
    injected_failures: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a transient error without
    /// applying anything.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_next_commits(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Returns the paths of all stored documents, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn paths(&self) -> Result<Vec<String>> {
        let collections = self.lock()?;
        Ok(collections
            .iter()
            .flat_map(|(collection, docs)| {
                docs.keys().map(move |id| format!("{collection}/{id}"))
            })
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.collections
            .lock()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire store lock: {e}")))
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Looks a document up in the staged writes first, then in the committed state.
fn lookup<'a>(
    staged: &'a BTreeMap<DocPath, Option<Map<String, Value>>>,
    collections: &'a Collections,
    path: &DocPath,
) -> Option<&'a Map<String, Value>> {
    match staged.get(path) {
        Some(entry) => entry.as_ref(),
        None => collections
            .get(&path.collection())
            .and_then(|docs| docs.get(path.id())),
    }
}

/// Stages every op of `batch`, then applies them only if all checks passed.
fn apply_batch(collections: &mut Collections, batch: &WriteBatch, now: i64) -> Result<()> {
    let mut staged: BTreeMap<DocPath, Option<Map<String, Value>>> = BTreeMap::new();

    for op in batch.ops() {
        match op {
            BatchOp::Verify { path, exists } => {
                if lookup(&staged, collections, path).is_some() != *exists {
                    return Err(StoreError::PreconditionFailed {
                        path: path.to_string(),
                    });
                }
            }
            BatchOp::Create { path, fields } => {
                if lookup(&staged, collections, path).is_some() {
                    return Err(StoreError::PreconditionFailed {
                        path: path.to_string(),
                    });
                }
                staged.insert(path.clone(), Some(fields.resolve(now)));
            }
            BatchOp::Set {
                path,
                fields,
                merge,
            } => {
                let mut data = if *merge {
                    lookup(&staged, collections, path)
                        .cloned()
                        .unwrap_or_default()
                } else {
                    Map::new()
                };
                data.extend(fields.resolve(now));
                staged.insert(path.clone(), Some(data));
            }
            BatchOp::Delete { path } => {
                staged.insert(path.clone(), None);
            }
        }
    }

    for (path, data) in staged {
        let collection = path.collection();
        match data {
            Some(data) => {
                collections
                    .entry(collection)
                    .or_default()
                    .insert(path.id().to_string(), data);
            }
            None => {
                if let Some(docs) = collections.get_mut(&collection) {
                    docs.remove(path.id());
                    if docs.is_empty() {
                        collections.remove(&collection);
                    }
                }
            }
        }
    }

    Ok(())
}

fn to_document(collection: &CollectionPath, id: &str, data: &Map<String, Value>) -> Result<Document> {
    Ok(Document {
        path: collection.doc(id)?,
        data: data.clone(),
    })
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, path: &DocPath) -> Result<Option<Document>> {
        let collections = self.lock()?;
        Ok(collections
            .get(&path.collection())
            .and_then(|docs| docs.get(path.id()))
            .map(|data| Document {
                path: path.clone(),
                data: data.clone(),
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
        let collections = self.lock()?;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(&str, &String, &Map<String, Value>)> = docs
            .iter()
            .filter_map(|(id, data)| {
                let key = data.get(order_by)?.as_str()?;
                (start..=end).contains(&key).then_some((key, id, data))
            })
            .collect();
        hits.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));

        hits.into_iter()
            .take(limit)
            .map(|(_, id, data)| to_document(collection, id, data))
            .collect()
    }

    async fn query_where(
        &self,
        collection: &CollectionPath,
        field: &str,
        op: WhereOp,
        value: &Value,
    ) -> Result<Vec<Document>> {
        validate_field(field)?;
        let collections = self.lock()?;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        docs.iter()
            .filter(|(_, data)| {
                data.get(field)
                    .is_some_and(|field_value| op.matches(field_value, value))
            })
            .map(|(id, data)| to_document(collection, id, data))
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let mut collections = self.lock()?;
        apply_batch(&mut collections, &batch, now_millis())
    }
}
