//! Graded-visibility access control.
//!
//! Every pair of users is in one of three tiers, derived from the
//! relationship edges in the store:
//!
//! ```text
//! stranger ──request/accept──▶ friend ──request/accept──▶ tracker
//!    ▲                           │  ▲                        │
//!    └──────── remove friend ────┘  └───── remove tracker ───┘
//! ```
//!
//! The tier selects a fixed [`PermissionSet`], and records are redacted
//! through it before they reach another user.
//!
//! # Architecture
//!
//! ```text
//! AccessControlService (façade, session cache, retries)
//!     ├── RelationshipStore (atomic edge transitions)
//!     └── permissions (pure tier table and record filter)
//! ```

mod error;
pub mod permissions;
mod relationships;
mod service;
mod session;
pub mod types;

pub use error::{AccessError, Precondition, Result};
pub use permissions::{
    capability_for, filter_record, permissions_for, permissions_for_viewer, Capability,
    PermissionSet,
};
pub use relationships::{RelationshipStore, RequestOutcome, CONNECTIONS_COLLECTION};
pub use service::AccessControlService;
pub use session::Session;
pub use types::{Direction, EdgeStatus, RelationshipEdge, RelationshipKind, UserCategory};
