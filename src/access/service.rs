//! Access-control façade used by the UI layer.
//!
//! [`AccessControlService`] combines the relationship store with the
//! permission table. Reads (`get_user_category`, `get_permissions`,
//! `get_filtered_user_data`, ...) answer synchronously from the caller's
//! [`Session`] cache. Mutations go to the store, are retried on transient
//! failures, and update the session cache only after they succeed.

use std::collections::HashSet;
use std::sync::Arc;

use super::error::{Precondition, Result};
use super::permissions::{filter_record, permissions_for, permissions_for_viewer};
use super::permissions::{Capability, PermissionSet};
use super::relationships::{validate_pair, RelationshipStore, RequestOutcome};
use super::session::Session;
use super::types::{Direction, RelationshipKind, UserCategory};
use crate::location::NearbyUser;
use crate::retry::{with_backoff, RetryPolicy};
use crate::store::{CollectionPath, DocumentStore};
use crate::user::{UserRecord, USERS_COLLECTION};

/// Relationship transitions and permission checks for a signed-in user.
pub struct AccessControlService {
    store: Arc<dyn DocumentStore>,
    relationships: RelationshipStore,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AccessControlService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControlService")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AccessControlService {
    /// Creates a service on top of `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self {
            relationships: RelationshipStore::new(store.clone()),
            store,
            retry,
        }
    }

    /// The underlying relationship store.
    #[must_use]
    pub const fn relationships(&self) -> &RelationshipStore {
        &self.relationships
    }

    /// Fills the session caches from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the session uid is invalid or the store fails.
    pub async fn load_session(&self, session: &Session) -> Result<()> {
        let uid = session.uid();
        let categories =
            with_backoff(&self.retry, || self.relationships.load_categories(uid)).await?;
        let pending: HashSet<String> = with_backoff(&self.retry, || {
            self.relationships.pending_requests(
                uid,
                RelationshipKind::Tracker,
                Direction::Outgoing,
            )
        })
        .await?
        .into_iter()
        .map(|edge| edge.peer)
        .collect();

        tracing::debug!(
            uid = %uid,
            peers = categories.len(),
            pending_trackers = pending.len(),
            "session loaded"
        );
        session.replace_categories(categories);
        session.replace_pending_trackers(pending);
        Ok(())
    }

    /// Cached tier of `peer`. Unknown peers are strangers.
    #[must_use]
    pub fn get_user_category(&self, session: &Session, peer: &str) -> UserCategory {
        session.category(peer)
    }

    /// Re-reads the tier of `peer` from the store and caches it.
    ///
    /// # Errors
    ///
    /// Returns an error if a uid is invalid or the store fails.
    pub async fn refresh_category(&self, session: &Session, peer: &str) -> Result<UserCategory> {
        let category = with_backoff(&self.retry, || {
            self.relationships.category_of(session.uid(), peer)
        })
        .await?;
        session.set_category(peer, category);
        Ok(category)
    }

    /// Permissions from the tier table for the cached tier of `peer`.
    ///
    /// The mobile number flag is always off here; use
    /// [`permissions_for_record`](Self::permissions_for_record) when the
    /// peer's record is at hand.
    #[must_use]
    pub fn get_permissions(&self, session: &Session, peer: &str) -> PermissionSet {
        permissions_for(session.category(peer))
    }

    /// Permissions over `peer`, applying the privacy settings in `record`.
    #[must_use]
    pub fn permissions_for_record(
        &self,
        session: &Session,
        peer: &str,
        record: &UserRecord,
    ) -> PermissionSet {
        permissions_for_viewer(session.category(peer), &record.privacy())
    }

    /// Whether the session user may use `capability` on `peer`.
    ///
    /// Answers from the tier table alone, so
    /// [`Capability::SeeMobileNumber`] is always refused; use
    /// [`can_use_feature_on_record`](Self::can_use_feature_on_record) for
    /// that.
    #[must_use]
    pub fn can_use_feature(&self, session: &Session, peer: &str, capability: Capability) -> bool {
        self.get_permissions(session, peer).allows(capability)
    }

    /// Whether the session user may use `capability` on `peer`, honouring
    /// the opt-ins in `record`.
    #[must_use]
    pub fn can_use_feature_on_record(
        &self,
        session: &Session,
        peer: &str,
        record: &UserRecord,
        capability: Capability,
    ) -> bool {
        self.permissions_for_record(session, peer, record).allows(capability)
    }

    /// Returns `record` (belonging to `peer`) redacted for the session user.
    #[must_use]
    pub fn get_filtered_user_data(
        &self,
        session: &Session,
        peer: &str,
        record: &UserRecord,
    ) -> UserRecord {
        filter_record(record, &self.permissions_for_record(session, peer, record))
    }

    /// Redacts every proximity result for the session user.
    #[must_use]
    pub fn filter_nearby(&self, session: &Session, results: Vec<NearbyUser>) -> Vec<NearbyUser> {
        results
            .into_iter()
            .map(|mut user| {
                user.record = self.get_filtered_user_data(session, &user.uid, &user.record);
                user
            })
            .collect()
    }

    /// Whether the session user has an outstanding tracker request to `peer`.
    #[must_use]
    pub fn has_pending_tracker_request(&self, session: &Session, peer: &str) -> bool {
        session.has_pending_tracker(peer)
    }

    /// Sends a friend request to `peer`, or accepts theirs if they asked first.
    ///
    /// # Errors
    ///
    /// - [`Precondition::RequestsDisabled`] if `peer` turned friend requests off
    /// - any error of [`RelationshipStore::request_friend`]
    pub async fn send_friend_request(
        &self,
        session: &Session,
        peer: &str,
    ) -> Result<RequestOutcome> {
        let uid = session.uid();
        validate_pair(uid, peer)?;
        self.ensure_accepts(peer, RelationshipKind::Friend).await?;

        let outcome =
            with_backoff(&self.retry, || self.relationships.request_friend(uid, peer)).await?;
        if outcome == RequestOutcome::Accepted {
            upgrade(session, peer, UserCategory::Friend);
        }
        Ok(outcome)
    }

    /// Sends a tracker request to `peer`, or accepts theirs if they asked first.
    ///
    /// # Errors
    ///
    /// - [`Precondition::RequestsDisabled`] if `peer` turned tracker requests off
    /// - any error of [`RelationshipStore::request_tracker`]
    pub async fn send_tracker_request(
        &self,
        session: &Session,
        peer: &str,
    ) -> Result<RequestOutcome> {
        let uid = session.uid();
        validate_pair(uid, peer)?;
        self.ensure_accepts(peer, RelationshipKind::Tracker).await?;

        let outcome =
            with_backoff(&self.retry, || self.relationships.request_tracker(uid, peer)).await?;
        match outcome {
            RequestOutcome::Sent => session.set_pending_tracker(peer, true),
            RequestOutcome::Accepted => {
                upgrade(session, peer, UserCategory::Tracker);
                session.set_pending_tracker(peer, false);
            }
        }
        Ok(outcome)
    }

    /// Accepts the friend request `requester` sent to the session user.
    ///
    /// # Errors
    ///
    /// See [`RelationshipStore::accept_request`].
    pub async fn accept_friend_request(&self, session: &Session, requester: &str) -> Result<()> {
        self.accept(session, requester, RelationshipKind::Friend)
            .await
    }

    /// Accepts the tracker request `requester` sent to the session user.
    ///
    /// # Errors
    ///
    /// See [`RelationshipStore::accept_request`].
    pub async fn accept_tracker_request(&self, session: &Session, requester: &str) -> Result<()> {
        self.accept(session, requester, RelationshipKind::Tracker)
            .await
    }

    /// Rejects the `kind` request `requester` sent to the session user.
    /// Rejecting a request that is gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a uid is invalid or the store fails.
    pub async fn reject_request(
        &self,
        session: &Session,
        requester: &str,
        kind: RelationshipKind,
    ) -> Result<()> {
        let uid = session.uid();
        with_backoff(&self.retry, || {
            self.relationships.reject_request(uid, requester, kind)
        })
        .await
    }

    /// Withdraws the session user's `kind` request to `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if a uid is invalid or the store fails.
    pub async fn cancel_request(
        &self,
        session: &Session,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<()> {
        let uid = session.uid();
        with_backoff(&self.retry, || {
            self.relationships.cancel_request(uid, peer, kind)
        })
        .await?;
        if kind == RelationshipKind::Tracker {
            session.set_pending_tracker(peer, false);
        }
        Ok(())
    }

    /// Ends the friendship with `peer`, including any tracker relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if a uid is invalid or the store fails.
    pub async fn remove_friend(&self, session: &Session, peer: &str) -> Result<()> {
        let uid = session.uid();
        with_backoff(&self.retry, || {
            self.relationships
                .remove_edge(uid, peer, RelationshipKind::Friend)
        })
        .await?;
        session.set_category(peer, UserCategory::Stranger);
        session.set_pending_tracker(peer, false);
        Ok(())
    }

    /// Ends the tracker relationship with `peer`; the friendship stays.
    ///
    /// # Errors
    ///
    /// Returns an error if a uid is invalid or the store fails.
    pub async fn remove_tracker(&self, session: &Session, peer: &str) -> Result<()> {
        let uid = session.uid();
        with_backoff(&self.retry, || {
            self.relationships
                .remove_edge(uid, peer, RelationshipKind::Tracker)
        })
        .await?;
        if session.category(peer) == UserCategory::Tracker {
            session.set_category(peer, UserCategory::Friend);
        }
        Ok(())
    }

    async fn accept(&self, session: &Session, requester: &str, kind: RelationshipKind) -> Result<()> {
        let uid = session.uid();
        with_backoff(&self.retry, || {
            self.relationships.accept_request(uid, requester, kind)
        })
        .await?;
        upgrade(session, requester, kind.category());
        if kind == RelationshipKind::Tracker {
            session.set_pending_tracker(requester, false);
        }
        Ok(())
    }

    /// Fails if `peer`'s privacy settings refuse requests of `kind`.
    /// Peers without a user record accept everything.
    async fn ensure_accepts(&self, peer: &str, kind: RelationshipKind) -> Result<()> {
        let Some(record) = with_backoff(&self.retry, || self.user_record(peer)).await? else {
            return Ok(());
        };
        let privacy = record.privacy();
        let allowed = match kind {
            RelationshipKind::Friend => privacy.allow_friend_requests,
            RelationshipKind::Tracker => privacy.allow_tracker_requests,
        };
        if allowed {
            Ok(())
        } else {
            tracing::warn!(peer = %peer, kind = %kind, "peer does not accept requests");
            Err(Precondition::RequestsDisabled.into())
        }
    }

    async fn user_record(&self, uid: &str) -> Result<Option<UserRecord>> {
        let path = CollectionPath::parse(USERS_COLLECTION)?.doc(uid)?;
        match self.store.get_document(&path).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }
}

/// Raises the cached tier of `peer` to at least `category`.
fn upgrade(session: &Session, peer: &str, category: UserCategory) {
    session.set_category(peer, session.category(peer).max(category));
}
