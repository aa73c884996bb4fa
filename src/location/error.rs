//! Error types for location and proximity operations.

use thiserror::Error;

use crate::store::StoreError;

/// Error type for location operations.
#[derive(Error, Debug)]
pub enum LocationError {
    /// Coordinates are not finite or out of range.
    #[error("Invalid coordinates: ({latitude}, {longitude})")]
    InvalidCoordinates {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },

    /// Search radius is not a positive finite number.
    #[error("Invalid radius: {0}")]
    InvalidRadius(f64),

    /// Geohash length outside `1..=12`.
    #[error("Invalid geohash precision: {0}")]
    InvalidPrecision(usize),

    /// The caller cancelled the query.
    #[error("Proximity query cancelled")]
    Cancelled,

    /// A range scan did not finish in time.
    #[error("Range scan timed out after {0} ms")]
    Timeout(u64),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LocationError {
    /// Returns whether retrying the same query may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for location operations.
pub type Result<T> = std::result::Result<T, LocationError>;
