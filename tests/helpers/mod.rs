//! Reusable test helpers for access and proximity integration tests.
//!
//! Every helper works on a fresh `MemoryStore`, so tests are isolated
//! without any on-disk state.

#![allow(dead_code)]

use std::sync::Arc;

use convoy_core::access::{AccessControlService, Session};
use convoy_core::config::{ProximityConfig, RetryConfig};
use convoy_core::location::{GeoIndex, GeoPoint, ProximityService};
use convoy_core::retry::RetryPolicy;
use convoy_core::store::{CollectionPath, DocPath, DocumentStore, Fields, MemoryStore};
use convoy_core::user::USERS_COLLECTION;
use serde_json::Value;

/// Retry policy with millisecond backoff so retry tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::from(&RetryConfig {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        jitter: false,
    })
}

/// Creates an access service over a fresh in-memory store.
pub fn access_service() -> (Arc<MemoryStore>, AccessControlService) {
    let store = Arc::new(MemoryStore::new());
    let service = AccessControlService::new(store.clone(), fast_retry(3));
    (store, service)
}

/// Creates a proximity service over a fresh in-memory store.
pub fn proximity_service() -> (Arc<MemoryStore>, ProximityService) {
    let store = Arc::new(MemoryStore::new());
    let service =
        ProximityService::new(store.clone(), GeoIndex::default(), ProximityConfig::default());
    (store, service)
}

/// Path of a user record.
pub fn user_path(uid: &str) -> DocPath {
    CollectionPath::parse(USERS_COLLECTION)
        .and_then(|users| users.doc(uid))
        .expect("valid user path")
}

/// Writes the top-level fields of `record` to `users/{uid}`, replacing it.
pub async fn seed_user(store: &MemoryStore, uid: &str, record: Value) {
    let mut fields = Fields::new();
    for (name, value) in record.as_object().expect("record must be an object") {
        fields = fields.with(name.clone(), value.clone());
    }
    store
        .set_document(&user_path(uid), fields, false)
        .await
        .expect("should seed user");
}

/// Shorthand for a valid point.
pub fn point(latitude: f64, longitude: f64) -> GeoPoint {
    GeoPoint::new(latitude, longitude).expect("valid point")
}

/// Makes `a` and `b` friends through the public request/accept flow.
pub async fn make_friends(service: &AccessControlService, a: &Session, b: &Session) {
    service
        .send_friend_request(a, b.uid())
        .await
        .expect("friend request should succeed");
    service
        .accept_friend_request(b, a.uid())
        .await
        .expect("friend accept should succeed");
}

/// Makes `a` and `b` friends and then trackers.
pub async fn make_trackers(service: &AccessControlService, a: &Session, b: &Session) {
    make_friends(service, a, b).await;
    service
        .send_tracker_request(a, b.uid())
        .await
        .expect("tracker request should succeed");
    service
        .accept_tracker_request(b, a.uid())
        .await
        .expect("tracker accept should succeed");
}

/// Paths of every relationship document in the store.
pub fn connection_paths(store: &MemoryStore) -> Vec<String> {
    store
        .paths()
        .expect("store lock")
        .into_iter()
        .filter(|path| path.starts_with("connections/"))
        .collect()
}
