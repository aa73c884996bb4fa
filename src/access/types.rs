//! Relationship tiers and edge bookkeeping types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Trust tier of one user as seen by another.
///
/// Ordered by trust: `Stranger < Friend < Tracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserCategory {
    /// No accepted relationship.
    #[default]
    Stranger,
    /// Accepted friend edge.
    Friend,
    /// Accepted tracker edge.
    Tracker,
}

impl UserCategory {
    /// Every category, lowest trust first.
    pub const ALL: [Self; 3] = [Self::Stranger, Self::Friend, Self::Tracker];

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stranger => "stranger",
            Self::Friend => "friend",
            Self::Tracker => "tracker",
        }
    }
}

impl fmt::Display for UserCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// Friendship.
    Friend,
    /// Trusted tracker.
    Tracker,
}

impl RelationshipKind {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Tracker => "tracker",
        }
    }

    /// Collection holding accepted edges of this kind.
    #[must_use]
    pub const fn accepted_collection(self) -> &'static str {
        match self {
            Self::Friend => "friends",
            Self::Tracker => "trackers",
        }
    }

    /// Collection holding pending requests of this kind in `direction`.
    #[must_use]
    pub const fn pending_collection(self, direction: Direction) -> &'static str {
        match (self, direction) {
            (Self::Friend, Direction::Outgoing) => "outgoingRequests",
            (Self::Friend, Direction::Incoming) => "incomingRequests",
            (Self::Tracker, Direction::Outgoing) => "outgoingTrackerRequests",
            (Self::Tracker, Direction::Incoming) => "incomingTrackerRequests",
        }
    }

    /// Category granted by an accepted edge of this kind.
    #[must_use]
    pub const fn category(self) -> UserCategory {
        match self {
            Self::Friend => UserCategory::Friend,
            Self::Tracker => UserCategory::Tracker,
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a pending request relative to the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent to the actor.
    Incoming,
    /// Sent by the actor.
    Outgoing,
}

impl Direction {
    /// The same request seen from the other side.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Incoming => Self::Outgoing,
            Self::Outgoing => Self::Incoming,
        }
    }
}

/// Status of an edge document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    /// Request sent, not yet resolved.
    Pending,
    /// Relationship established.
    Accepted,
}

impl EdgeStatus {
    /// Returns the stored value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }
}

/// One edge document from the actor's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipEdge {
    /// The other user.
    pub peer: String,
    /// Friend or tracker.
    pub kind: RelationshipKind,
    /// Pending or accepted.
    pub status: EdgeStatus,
    /// Set for pending edges only.
    pub direction: Option<Direction>,
    /// Server-assigned creation time, epoch milliseconds.
    pub created_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_ordered_by_trust() {
        assert!(UserCategory::Stranger < UserCategory::Friend);
        assert!(UserCategory::Friend < UserCategory::Tracker);
        assert_eq!(UserCategory::default(), UserCategory::Stranger);
        assert_eq!(
            UserCategory::Friend.max(UserCategory::Tracker),
            UserCategory::Tracker
        );
    }

    #[test]
    fn collection_names() {
        assert_eq!(RelationshipKind::Friend.accepted_collection(), "friends");
        assert_eq!(RelationshipKind::Tracker.accepted_collection(), "trackers");
        assert_eq!(
            RelationshipKind::Friend.pending_collection(Direction::Incoming),
            "incomingRequests"
        );
        assert_eq!(
            RelationshipKind::Tracker.pending_collection(Direction::Outgoing),
            "outgoingTrackerRequests"
        );
    }

    #[test]
    fn direction_reverse() {
        assert_eq!(Direction::Incoming.reverse(), Direction::Outgoing);
        assert_eq!(Direction::Outgoing.reverse(), Direction::Incoming);
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_string(&UserCategory::Tracker).unwrap(),
            "\"tracker\""
        );
        let status: EdgeStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(status, EdgeStatus::Pending);
        assert_eq!(EdgeStatus::Accepted.as_str(), "accepted");
    }
}
