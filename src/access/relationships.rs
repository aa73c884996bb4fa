//! Persisted relationship edges.
//!
//! Every relationship is stored twice, once in each user's namespace, and
//! every transition writes both copies in one [`WriteBatch`]:
//!
//! ```text
//! request   create out(actor→peer), create in(peer←actor)
//! accept    delete both pending docs, set accepted(actor), set accepted(peer)
//! reject    delete both pending docs
//! remove    delete both accepted docs (friend removal also drops trackers)
//! ```
//!
//! Rules ("not already connected", "friends before trackers") are verify
//! operations inside the same batch, so they are checked atomically with
//! the write. When a batch is refused the current state is re-read to tell
//! the caller which rule failed; if the state moved on in between, the
//! transition is attempted again.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::error::{AccessError, Precondition, Result};
use super::types::{Direction, EdgeStatus, RelationshipEdge, RelationshipKind, UserCategory};
use crate::store::{
    CollectionPath, DocPath, Document, DocumentStore, Fields, StoreError, WhereOp, WriteBatch,
};

/// Root collection of the per-user relationship namespaces.
pub const CONNECTIONS_COLLECTION: &str = "connections";

/// How often a transition is re-attempted when its batch is refused but no
/// rule explains the refusal.
const CONFLICT_ATTEMPTS: usize = 3;

/// Result of a successful friend or tracker request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new pending request was created.
    Sent,
    /// The peer had already asked the actor; that request was accepted.
    Accepted,
}

/// What to do after a refused batch.
enum Conflict {
    Fail(AccessError),
    AcceptReciprocal,
    Retry,
}

/// Relationship edges stored under `connections/{uid}/...`.
pub struct RelationshipStore {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for RelationshipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipStore").finish_non_exhaustive()
    }
}

impl RelationshipStore {
    /// Creates a relationship store on top of `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Returns the tier of `peer` as seen by `actor`.
    ///
    /// Tracker wins over friend when both edges exist.
    ///
    /// # Errors
    ///
    /// Returns an error if either uid is invalid or a read fails.
    pub async fn category_of(&self, actor: &str, peer: &str) -> Result<UserCategory> {
        validate_uid(actor)?;
        validate_uid(peer)?;
        if actor == peer {
            return Ok(UserCategory::Stranger);
        }

        for kind in [RelationshipKind::Tracker, RelationshipKind::Friend] {
            if self.exists(&accepted_path(actor, peer, kind)?).await? {
                return Ok(kind.category());
            }
        }
        Ok(UserCategory::Stranger)
    }

    /// Sends a friend request from `actor` to `peer`.
    ///
    /// If `peer` already asked `actor`, that request is accepted instead.
    ///
    /// # Errors
    ///
    /// - [`Precondition::SelfRelationship`] if `actor == peer`
    /// - [`Precondition::AlreadyConnected`] if they are already friends
    /// - [`Precondition::AlreadyPending`] if `actor` already asked `peer`
    /// - [`AccessError::Store`] if the store fails
    pub async fn request_friend(&self, actor: &str, peer: &str) -> Result<RequestOutcome> {
        self.request(actor, peer, RelationshipKind::Friend).await
    }

    /// Sends a tracker request from `actor` to `peer`.
    ///
    /// The two users must already be friends. If `peer` already asked
    /// `actor`, that request is accepted instead.
    ///
    /// # Errors
    ///
    /// - [`Precondition::SelfRelationship`] if `actor == peer`
    /// - [`Precondition::NotFriends`] if they are not friends
    /// - [`Precondition::AlreadyTracking`] if a tracker edge exists
    /// - [`Precondition::AlreadyPending`] if `actor` already asked `peer`
    /// - [`AccessError::Store`] if the store fails
    pub async fn request_tracker(&self, actor: &str, peer: &str) -> Result<RequestOutcome> {
        self.request(actor, peer, RelationshipKind::Tracker).await
    }

    /// Accepts the pending `kind` request that `peer` sent to `actor`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NoPendingRequest`] if there is nothing to accept
    /// - [`Precondition::NotFriends`] if accepting a tracker request after the
    ///   friendship was removed
    /// - [`AccessError::Store`] if the store fails
    pub async fn accept_request(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<()> {
        validate_pair(actor, peer)?;

        for _ in 0..CONFLICT_ATTEMPTS {
            let incoming = pending_path(actor, peer, kind, Direction::Incoming)?;
            let mut batch = WriteBatch::new();
            batch.verify_exists(incoming.clone());
            if kind == RelationshipKind::Tracker {
                batch.verify_exists(accepted_path(actor, peer, RelationshipKind::Friend)?);
            }
            batch
                .delete(incoming)
                .delete(pending_path(peer, actor, kind, Direction::Outgoing)?)
                .set(accepted_path(actor, peer, kind)?, edge_fields(EdgeStatus::Accepted))
                .set(accepted_path(peer, actor, kind)?, edge_fields(EdgeStatus::Accepted));

            match self.store.commit(batch).await {
                Ok(()) => {
                    tracing::info!(actor = %actor, peer = %peer, kind = %kind, "request accepted");
                    return Ok(());
                }
                Err(StoreError::PreconditionFailed { .. }) => {
                    match self.classify_accept(actor, peer, kind).await? {
                        Conflict::Fail(err) => return Err(err),
                        Conflict::AcceptReciprocal | Conflict::Retry => {}
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(conflict_exhausted(actor, peer, kind))
    }

    /// Rejects the pending `kind` request that `peer` sent to `actor`.
    ///
    /// Rejecting a request that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if either uid is invalid or the store fails.
    pub async fn reject_request(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<()> {
        self.delete_pending(actor, peer, kind, Direction::Incoming)
            .await?;
        tracing::info!(actor = %actor, peer = %peer, kind = %kind, "request rejected");
        Ok(())
    }

    /// Withdraws the pending `kind` request that `actor` sent to `peer`.
    ///
    /// Cancelling a request that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if either uid is invalid or the store fails.
    pub async fn cancel_request(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<()> {
        self.delete_pending(actor, peer, kind, Direction::Outgoing)
            .await?;
        tracing::info!(actor = %actor, peer = %peer, kind = %kind, "request cancelled");
        Ok(())
    }

    /// Removes the accepted `kind` relationship between `actor` and `peer`.
    ///
    /// Removing a friendship also removes any tracker relationship and
    /// pending tracker requests between the two users. Removing a tracker
    /// relationship leaves the friendship in place. Removing a relationship
    /// that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if either uid is invalid or the store fails.
    pub async fn remove_edge(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<()> {
        validate_pair(actor, peer)?;

        let mut batch = WriteBatch::new();
        batch
            .delete(accepted_path(actor, peer, kind)?)
            .delete(accepted_path(peer, actor, kind)?);
        if kind == RelationshipKind::Friend {
            let tracker = RelationshipKind::Tracker;
            batch
                .delete(accepted_path(actor, peer, tracker)?)
                .delete(accepted_path(peer, actor, tracker)?);
            for (owner, other) in [(actor, peer), (peer, actor)] {
                for direction in [Direction::Incoming, Direction::Outgoing] {
                    batch.delete(pending_path(owner, other, tracker, direction)?);
                }
            }
        }
        self.store.commit(batch).await?;

        tracing::info!(actor = %actor, peer = %peer, kind = %kind, "relationship removed");
        Ok(())
    }

    /// Returns whether `actor` has a pending `kind` request out to `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if either uid is invalid or the read fails.
    pub async fn has_pending_outgoing(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<bool> {
        validate_pair(actor, peer)?;
        self.exists(&pending_path(actor, peer, kind, Direction::Outgoing)?)
            .await
    }

    /// Returns whether `peer` has a pending `kind` request out to `actor`.
    ///
    /// # Errors
    ///
    /// Returns an error if either uid is invalid or the read fails.
    pub async fn has_pending_incoming(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<bool> {
        validate_pair(actor, peer)?;
        self.exists(&pending_path(actor, peer, kind, Direction::Incoming)?)
            .await
    }

    /// Lists `actor`'s accepted relationships of `kind`, ordered by peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the uid is invalid or the query fails.
    pub async fn connections(
        &self,
        actor: &str,
        kind: RelationshipKind,
    ) -> Result<Vec<RelationshipEdge>> {
        validate_uid(actor)?;
        let collection = namespace(actor, kind.accepted_collection())?;
        let docs = self
            .store
            .query_where(
                &collection,
                "status",
                WhereOp::Eq,
                &Value::from(EdgeStatus::Accepted.as_str()),
            )
            .await?;
        Ok(docs
            .iter()
            .map(|doc| edge_from_doc(doc, kind, EdgeStatus::Accepted, None))
            .collect())
    }

    /// Lists `actor`'s pending `kind` requests in `direction`, ordered by peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the uid is invalid or the query fails.
    pub async fn pending_requests(
        &self,
        actor: &str,
        kind: RelationshipKind,
        direction: Direction,
    ) -> Result<Vec<RelationshipEdge>> {
        validate_uid(actor)?;
        let collection = namespace(actor, kind.pending_collection(direction))?;
        let docs = self
            .store
            .query_where(
                &collection,
                "status",
                WhereOp::Eq,
                &Value::from(EdgeStatus::Pending.as_str()),
            )
            .await?;
        Ok(docs
            .iter()
            .map(|doc| edge_from_doc(doc, kind, EdgeStatus::Pending, Some(direction)))
            .collect())
    }

    /// Returns the tier of every user `actor` has an accepted relationship
    /// with. Users missing from the map are strangers.
    ///
    /// # Errors
    ///
    /// Returns an error if the uid is invalid or a query fails.
    pub async fn load_categories(&self, actor: &str) -> Result<HashMap<String, UserCategory>> {
        let mut categories = HashMap::new();
        for kind in [RelationshipKind::Friend, RelationshipKind::Tracker] {
            for edge in self.connections(actor, kind).await? {
                let category = categories.entry(edge.peer).or_insert(UserCategory::Stranger);
                *category = (*category).max(kind.category());
            }
        }
        tracing::debug!(actor = %actor, count = categories.len(), "loaded categories");
        Ok(categories)
    }

    async fn request(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<RequestOutcome> {
        validate_pair(actor, peer)?;

        for _ in 0..CONFLICT_ATTEMPTS {
            let mut batch = WriteBatch::new();
            if kind == RelationshipKind::Tracker {
                batch.verify_exists(accepted_path(actor, peer, RelationshipKind::Friend)?);
            }
            batch
                .verify_absent(accepted_path(actor, peer, kind)?)
                .verify_absent(pending_path(actor, peer, kind, Direction::Incoming)?)
                .create(
                    pending_path(actor, peer, kind, Direction::Outgoing)?,
                    edge_fields(EdgeStatus::Pending),
                )
                .create(
                    pending_path(peer, actor, kind, Direction::Incoming)?,
                    edge_fields(EdgeStatus::Pending),
                );

            match self.store.commit(batch).await {
                Ok(()) => {
                    tracing::info!(actor = %actor, peer = %peer, kind = %kind, "request sent");
                    return Ok(RequestOutcome::Sent);
                }
                Err(StoreError::PreconditionFailed { .. }) => {
                    match self.classify_request(actor, peer, kind).await? {
                        Conflict::Fail(err) => {
                            tracing::warn!(
                                actor = %actor,
                                peer = %peer,
                                kind = %kind,
                                error = %err,
                                "request refused"
                            );
                            return Err(err);
                        }
                        Conflict::AcceptReciprocal => {
                            match self.accept_request(actor, peer, kind).await {
                                Ok(()) => return Ok(RequestOutcome::Accepted),
                                Err(AccessError::NoPendingRequest { .. }) => {}
                                Err(err) => return Err(err),
                            }
                        }
                        Conflict::Retry => {}
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(conflict_exhausted(actor, peer, kind))
    }

    /// Works out why a request batch was refused.
    async fn classify_request(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<Conflict> {
        if kind == RelationshipKind::Tracker
            && !self
                .exists(&accepted_path(actor, peer, RelationshipKind::Friend)?)
                .await?
        {
            return Ok(Conflict::Fail(Precondition::NotFriends.into()));
        }
        if self.exists(&accepted_path(actor, peer, kind)?).await? {
            let precondition = match kind {
                RelationshipKind::Friend => Precondition::AlreadyConnected,
                RelationshipKind::Tracker => Precondition::AlreadyTracking,
            };
            return Ok(Conflict::Fail(precondition.into()));
        }
        if self
            .exists(&pending_path(actor, peer, kind, Direction::Incoming)?)
            .await?
        {
            return Ok(Conflict::AcceptReciprocal);
        }
        if self
            .exists(&pending_path(actor, peer, kind, Direction::Outgoing)?)
            .await?
        {
            return Ok(Conflict::Fail(Precondition::AlreadyPending.into()));
        }
        Ok(Conflict::Retry)
    }

    /// Works out why an accept batch was refused.
    async fn classify_accept(
        &self,
        actor: &str,
        peer: &str,
        kind: RelationshipKind,
    ) -> Result<Conflict> {
        if !self
            .exists(&pending_path(actor, peer, kind, Direction::Incoming)?)
            .await?
        {
            return Ok(Conflict::Fail(AccessError::NoPendingRequest {
                peer: peer.to_string(),
                kind: kind.as_str(),
            }));
        }
        if kind == RelationshipKind::Tracker
            && !self
                .exists(&accepted_path(actor, peer, RelationshipKind::Friend)?)
                .await?
        {
            return Ok(Conflict::Fail(Precondition::NotFriends.into()));
        }
        Ok(Conflict::Retry)
    }

    async fn delete_pending(
        &self,
        owner: &str,
        other: &str,
        kind: RelationshipKind,
        direction: Direction,
    ) -> Result<()> {
        validate_pair(owner, other)?;
        let mut batch = WriteBatch::new();
        batch
            .delete(pending_path(owner, other, kind, direction)?)
            .delete(pending_path(other, owner, kind, direction.reverse())?);
        self.store.commit(batch).await?;
        Ok(())
    }

    async fn exists(&self, path: &DocPath) -> Result<bool> {
        Ok(self.store.get_document(path).await?.is_some())
    }
}

pub(crate) fn validate_uid(uid: &str) -> Result<()> {
    if uid.is_empty() || uid.contains('/') || uid.trim() != uid {
        return Err(AccessError::InvalidUid(uid.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_pair(actor: &str, peer: &str) -> Result<()> {
    validate_uid(actor)?;
    validate_uid(peer)?;
    if actor == peer {
        return Err(Precondition::SelfRelationship.into());
    }
    Ok(())
}

fn namespace(owner: &str, collection: &str) -> Result<CollectionPath> {
    Ok(CollectionPath::parse(&format!(
        "{CONNECTIONS_COLLECTION}/{owner}/{collection}"
    ))?)
}

fn accepted_path(owner: &str, other: &str, kind: RelationshipKind) -> Result<DocPath> {
    Ok(namespace(owner, kind.accepted_collection())?.doc(other)?)
}

fn pending_path(
    owner: &str,
    other: &str,
    kind: RelationshipKind,
    direction: Direction,
) -> Result<DocPath> {
    Ok(namespace(owner, kind.pending_collection(direction))?.doc(other)?)
}

fn edge_fields(status: EdgeStatus) -> Fields {
    Fields::new()
        .with("status", status.as_str())
        .with_server_timestamp("createdAt")
}

fn edge_from_doc(
    doc: &Document,
    kind: RelationshipKind,
    status: EdgeStatus,
    direction: Option<Direction>,
) -> RelationshipEdge {
    RelationshipEdge {
        peer: doc.id().to_string(),
        kind,
        status,
        direction,
        created_at: doc.get_i64("createdAt"),
    }
}

fn conflict_exhausted(actor: &str, peer: &str, kind: RelationshipKind) -> AccessError {
    tracing::warn!(actor = %actor, peer = %peer, kind = %kind, "gave up after repeated conflicts");
    AccessError::Conflict {
        peer: peer.to_string(),
        kind: kind.as_str(),
    }
}
