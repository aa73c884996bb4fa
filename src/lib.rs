//! Convoy Core Library
//!
//! Graded-visibility access control and geohash proximity search for a
//! location-based ride-sharing app. Users are strangers, friends or
//! trackers to each other; the tier decides which profile fields and
//! features another user gets, and nearby-user searches run through the
//! same filter before anything is shown.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

mod api;
pub mod access;
pub mod config;
pub mod location;
pub mod retry;
pub mod store;
pub mod user;

pub use api::{ConvoyCore, OpenError};
pub use config::{ConfigError, CoreConfig};
