//! Per-session caches for the signed-in user.
//!
//! A [`Session`] belongs to one authenticated user and lives as long as
//! their sign-in. It remembers the last known tier of each peer and which
//! peers have an outstanding tracker request from this user, so the UI can
//! ask synchronously. The store stays the source of truth; dropping the
//! session on sign-out discards everything.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use super::types::UserCategory;

/// Cached relationship state of one signed-in user.
#[derive(Debug)]
pub struct Session {
    uid: String,
    categories: RwLock<HashMap<String, UserCategory>>,
    pending_trackers: RwLock<HashSet<String>>,
}

impl Session {
    /// Creates an empty session for `uid`.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            categories: RwLock::new(HashMap::new()),
            pending_trackers: RwLock::new(HashSet::new()),
        }
    }

    /// The signed-in user's id.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Cached tier of `peer`; strangers when unknown.
    #[must_use]
    pub fn category(&self, peer: &str) -> UserCategory {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
            .unwrap_or_default()
    }

    /// Caches the tier of `peer`.
    pub fn set_category(&self, peer: &str, category: UserCategory) {
        let mut categories = self
            .categories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if category == UserCategory::Stranger {
            categories.remove(peer);
        } else {
            categories.insert(peer.to_string(), category);
        }
    }

    /// Replaces the whole tier cache.
    pub fn replace_categories(&self, categories: HashMap<String, UserCategory>) {
        *self
            .categories
            .write()
            .unwrap_or_else(PoisonError::into_inner) = categories;
    }

    /// Number of peers with a cached non-stranger tier.
    #[must_use]
    pub fn known_peers(&self) -> usize {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether this user has an outstanding tracker request to `peer`.
    #[must_use]
    pub fn has_pending_tracker(&self, peer: &str) -> bool {
        self.pending_trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer)
    }

    /// Marks or clears an outstanding tracker request to `peer`.
    pub fn set_pending_tracker(&self, peer: &str, pending: bool) {
        let mut pending_trackers = self
            .pending_trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if pending {
            pending_trackers.insert(peer.to_string());
        } else {
            pending_trackers.remove(peer);
        }
    }

    /// Replaces the outstanding tracker request set.
    pub fn replace_pending_trackers(&self, peers: HashSet<String>) {
        *self
            .pending_trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = peers;
    }
}
