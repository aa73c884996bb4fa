//! Proximity search over geohash-indexed user records.
//!
//! A query is answered in three steps:
//!
//! 1. [`GeoIndex::query_bounds`] turns `(center, radius)` into a handful of
//!    geohash key ranges whose union covers the search circle.
//! 2. One range scan per key range runs concurrently against the `users`
//!    collection, each capped at the configured page size and deadline.
//! 3. The merged candidates are deduplicated, measured exactly and anything
//!    outside the radius is dropped.
//!
//! Results are sorted by ascending distance, ties broken by uid, so the
//! same input always produces the same output.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use super::error::{LocationError, Result};
use super::geohash::{GeoIndex, KeyRange};
use super::types::{GeoLocation, GeoPoint};
use crate::config::ProximityConfig;
use crate::store::{CollectionPath, DocPath, Document, DocumentStore, Fields};
use crate::user::{UserRecord, USERS_COLLECTION};

/// Field holding the geohash sort key on user records.
pub const GEOHASH_FIELD: &str = "geohash";

/// A user found near the query center.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyUser {
    /// The user's id.
    pub uid: String,
    /// The raw user record. Filter it before showing it to anyone.
    pub record: UserRecord,
    /// Great-circle distance from the query center.
    pub distance_meters: f64,
}

/// Finds users near a point and maintains their indexed locations.
pub struct ProximityService {
    store: Arc<dyn DocumentStore>,
    index: GeoIndex,
    config: ProximityConfig,
}

impl std::fmt::Debug for ProximityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityService")
            .field("index", &self.index)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProximityService {
    /// Creates a service reading and writing `users/{uid}` through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, index: GeoIndex, config: ProximityConfig) -> Self {
        Self {
            store,
            index,
            config,
        }
    }

    /// Returns the geohash index in use.
    #[must_use]
    pub const fn index(&self) -> &GeoIndex {
        &self.index
    }

    /// Records a user's new position.
    ///
    /// Merges `location`, `geohash` and a server-assigned `updatedAt` into
    /// `users/{uid}`; other fields of the record are left as they are.
    ///
    /// # Errors
    ///
    /// Returns an error if the point is invalid, the uid is not a valid
    /// document id, or the write fails.
    pub async fn update_location(&self, uid: &str, point: GeoPoint) -> Result<GeoLocation> {
        let key = self.index.encode(point)?;
        let path = user_path(uid)?;

        let fields = Fields::new()
            .with(
                "location",
                serde_json::json!({
                    "latitude": point.latitude,
                    "longitude": point.longitude,
                }),
            )
            .with(GEOHASH_FIELD, key.clone())
            .with_server_timestamp("updatedAt");
        self.store.set_document(&path, fields, true).await?;

        tracing::debug!(uid = %uid, "location updated");
        Ok(GeoLocation {
            point,
            geohash: key,
            updated_at: chrono::Utc::now(),
        })
    }

    /// Finds users within the configured default radius of `center`.
    ///
    /// # Errors
    ///
    /// See [`find_nearby`](Self::find_nearby).
    pub async fn find_nearby_default(
        &self,
        center: GeoPoint,
        exclude_uid: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NearbyUser>> {
        self.find_nearby(center, self.config.default_radius_meters, exclude_uid, cancel)
            .await
    }

    /// Finds users within `radius_meters` of `center`.
    ///
    /// Users without a valid location, with undecodable records, or with
    /// location sharing turned off are skipped. `exclude_uid` (usually the
    /// caller) is never returned.
    ///
    /// # Errors
    ///
    /// - [`LocationError::InvalidCoordinates`] / [`LocationError::InvalidRadius`]
    ///   for bad input
    /// - [`LocationError::Cancelled`] if `cancel` fires before all scans finish;
    ///   outstanding scans are dropped
    /// - [`LocationError::Timeout`] if a scan exceeds the scan deadline
    /// - [`LocationError::Store`] if a scan fails
    pub async fn find_nearby(
        &self,
        center: GeoPoint,
        radius_meters: f64,
        exclude_uid: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NearbyUser>> {
        let bounds = self.index.query_bounds(center, radius_meters)?;
        let collection = CollectionPath::parse(USERS_COLLECTION)?;

        let scans = try_join_all(bounds.iter().map(|range| self.scan(&collection, range)));
        let pages = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("proximity query cancelled");
                return Err(LocationError::Cancelled);
            }
            pages = scans => pages?,
        };

        let mut seen = HashSet::new();
        let mut nearby = Vec::new();
        for doc in pages.into_iter().flatten() {
            let uid = doc.id().to_string();
            if exclude_uid == Some(uid.as_str()) || !seen.insert(uid.clone()) {
                continue;
            }
            let Some((record, point)) = decode_candidate(&doc) else {
                continue;
            };
            if !record.privacy().share_location {
                continue;
            }
            let distance_meters = self.index.distance_meters(center, point);
            if distance_meters <= radius_meters {
                nearby.push(NearbyUser {
                    uid,
                    record,
                    distance_meters,
                });
            }
        }

        nearby.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.uid.cmp(&b.uid))
        });

        tracing::debug!(
            bounds = bounds.len(),
            candidates = seen.len(),
            results = nearby.len(),
            radius_meters,
            "proximity query finished"
        );
        Ok(nearby)
    }

    async fn scan(&self, collection: &CollectionPath, range: &KeyRange) -> Result<Vec<Document>> {
        let limit = self.config.page_size;
        let query =
            self.store
                .query_range(collection, GEOHASH_FIELD, &range.start, &range.end, limit);
        let docs = tokio::time::timeout(self.config.scan_timeout(), query)
            .await
            .map_err(|_| LocationError::Timeout(self.config.scan_timeout_ms))??;

        if docs.len() >= limit {
            tracing::warn!(
                start = %range.start,
                end = %range.end,
                limit,
                "range scan hit page size, results may be incomplete"
            );
        }
        Ok(docs)
    }
}

fn user_path(uid: &str) -> Result<DocPath> {
    Ok(CollectionPath::parse(USERS_COLLECTION)?.doc(uid)?)
}

/// Decodes a scanned document, skipping records without a usable location.
fn decode_candidate(doc: &Document) -> Option<(UserRecord, GeoPoint)> {
    let record: UserRecord = match doc.decode() {
        Ok(record) => record,
        Err(err) => {
            tracing::debug!(uid = %doc.id(), error = %err, "skipping undecodable user record");
            return None;
        }
    };
    let point = record.location.filter(GeoPoint::is_valid)?;
    Some((record, point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> (Arc<MemoryStore>, ProximityService) {
        let store = Arc::new(MemoryStore::new());
        let service = ProximityService::new(
            store.clone(),
            GeoIndex::default(),
            ProximityConfig::default(),
        );
        (store, service)
    }

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint::new(latitude, longitude).unwrap()
    }

    #[tokio::test]
    async fn update_location_writes_indexed_fields() {
        let (store, service) = service();
        let location = service
            .update_location("alice", point(37.7749, -122.4194))
            .await
            .unwrap();
        assert_eq!(location.geohash.len(), 10);
        assert!(location.geohash.starts_with("9q8yy"));

        let doc = store
            .get_document(&user_path("alice").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get_str("geohash"), Some(location.geohash.as_str()));
        assert_eq!(doc.data["location"]["latitude"], json!(37.7749));
        assert!(doc.get_i64("updatedAt").is_some());
    }

    #[tokio::test]
    async fn update_location_keeps_profile_fields() {
        let (store, service) = service();
        let path = user_path("alice").unwrap();
        store
            .set_document(&path, Fields::new().with("driverName", "Alice"), false)
            .await
            .unwrap();

        service
            .update_location("alice", point(10.0, 10.0))
            .await
            .unwrap();

        let doc = store.get_document(&path).await.unwrap().unwrap();
        assert_eq!(doc.get_str("driverName"), Some("Alice"));
    }

    #[tokio::test]
    async fn update_location_rejects_bad_uid() {
        let (_, service) = service();
        let result = service.update_location("a/b", point(0.0, 0.0)).await;
        assert!(matches!(result, Err(LocationError::Store(_))));
    }

    #[tokio::test]
    async fn find_nearby_rejects_bad_radius() {
        let (_, service) = service();
        let result = service
            .find_nearby(point(0.0, 0.0), 0.0, None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LocationError::InvalidRadius(_))));
    }

    #[tokio::test]
    async fn find_nearby_on_empty_store() {
        let (_, service) = service();
        let result = service
            .find_nearby_default(point(0.0, 0.0), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn pre_cancelled_query_fails() {
        let (_, service) = service();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = service
            .find_nearby(point(0.0, 0.0), 500.0, None, &cancel)
            .await;
        assert!(matches!(result, Err(LocationError::Cancelled)));
    }

    #[tokio::test]
    async fn results_sorted_by_distance_then_uid() {
        let (_, service) = service();
        let center = point(51.5007, -0.1246);
        service.update_location("far", point(51.5050, -0.1246)).await.unwrap();
        service.update_location("b-near", point(51.5010, -0.1246)).await.unwrap();
        service.update_location("a-near", point(51.5010, -0.1246)).await.unwrap();

        let uids: Vec<String> = service
            .find_nearby(center, 1_000.0, None, &CancellationToken::new())
            .await
            .unwrap()
            .into_iter()
            .map(|user| user.uid)
            .collect();
        assert_eq!(uids, vec!["a-near", "b-near", "far"]);
    }

    #[test]
    fn decode_candidate_skips_invalid_location() {
        let doc = Document {
            path: user_path("bob").unwrap(),
            data: json!({"location": {"latitude": 123.0, "longitude": 0.0}, "geohash": "s0"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        assert!(decode_candidate(&doc).is_none());
    }
}
