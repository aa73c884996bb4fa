//! Error types for relationship and access-control operations.
//!
//! Business-rule violations are ordinary `Err` values carrying a
//! [`Precondition`], so callers can match on them and show a message. They
//! are never retried.

use thiserror::Error;

use crate::store::StoreError;

/// A relationship rule that blocked a request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precondition {
    /// Actor and peer are the same user.
    #[error("cannot create a relationship with yourself")]
    SelfRelationship,

    /// An accepted edge of this kind already exists.
    #[error("already connected")]
    AlreadyConnected,

    /// A pending request of this kind already exists from the actor.
    #[error("a request is already pending")]
    AlreadyPending,

    /// Tracker requests need an accepted friendship.
    #[error("users are not friends")]
    NotFriends,

    /// The pair is already in a tracker relationship.
    #[error("already tracking")]
    AlreadyTracking,

    /// The peer does not accept requests of this kind.
    #[error("the user does not accept these requests")]
    RequestsDisabled,
}

/// Error type for access-control operations.
#[derive(Error, Debug)]
pub enum AccessError {
    /// The requested transition is not allowed.
    #[error("Precondition failed: {0}")]
    Precondition(Precondition),

    /// There is no pending incoming request to accept.
    #[error("No pending {kind} request from {peer}")]
    NoPendingRequest {
        /// The user who would have sent the request.
        peer: String,
        /// Relationship kind (`friend` or `tracker`).
        kind: &'static str,
    },

    /// Concurrent writers kept invalidating the transition's batch.
    #[error("Gave up on {kind} transition with {peer} after repeated conflicts")]
    Conflict {
        /// The other user in the transition.
        peer: String,
        /// Relationship kind (`friend` or `tracker`).
        kind: &'static str,
    },

    /// A user id is empty or not a valid document id.
    #[error("Invalid uid: {0:?}")]
    InvalidUid(String),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccessError {
    /// Returns whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Conflict { .. } => true,
            _ => false,
        }
    }

    /// Returns the violated precondition, if that is what this error is.
    #[must_use]
    pub const fn precondition(&self) -> Option<Precondition> {
        match self {
            Self::Precondition(precondition) => Some(*precondition),
            _ => None,
        }
    }
}

impl From<Precondition> for AccessError {
    fn from(precondition: Precondition) -> Self {
        Self::Precondition(precondition)
    }
}

/// Result type alias for access-control operations.
pub type Result<T> = std::result::Result<T, AccessError>;
