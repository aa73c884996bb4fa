//! Location indexing and proximity search.
//!
//! - [`GeoIndex`]: geohash keys, covering key ranges for a search circle and
//!   haversine distance
//! - [`ProximityService`]: stores user locations and answers "who is near
//!   this point" with exact distances
//!
//! # Example
//!
//! ```
//! use convoy_core::location::{GeoIndex, GeoPoint};
//!
//! let index = GeoIndex::default();
//! let center = GeoPoint::new(37.7749, -122.4194).unwrap();
//! let nearby = GeoPoint::new(37.7755, -122.4190).unwrap();
//!
//! let distance = index.distance_meters(center, nearby);
//! assert!((distance - 75.0).abs() < 5.0);
//!
//! let key = index.encode(nearby).unwrap();
//! let bounds = index.query_bounds(center, 2_000.0).unwrap();
//! assert!(bounds.iter().any(|range| range.contains(&key)));
//! ```

pub mod error;
pub mod geohash;
pub mod proximity;
pub mod types;

pub use self::error::{LocationError, Result};
pub use self::geohash::{GeoIndex, KeyRange};
pub use self::proximity::{NearbyUser, ProximityService};
pub use self::types::{GeoLocation, GeoPoint};
