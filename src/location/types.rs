//! Location data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{LocationError, Result};

/// A latitude/longitude pair in degrees.
///
/// Serialized as `{"latitude": .., "longitude": ..}`, the shape stored in
/// the `location` field of a user record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude, -90.0 to 90.0
    pub latitude: f64,
    /// Longitude, -180.0 to 180.0
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a validated point.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::InvalidCoordinates`] if either coordinate is
    /// NaN, infinite or out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use convoy_core::location::GeoPoint;
    ///
    /// assert!(GeoPoint::new(37.7749, -122.4194).is_ok());
    /// assert!(GeoPoint::new(91.0, 0.0).is_err());
    /// ```
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let point = Self {
            latitude,
            longitude,
        };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(LocationError::InvalidCoordinates {
                latitude,
                longitude,
            })
        }
    }

    /// Returns whether both coordinates are finite and in range.
    ///
    /// Points deserialized from stored records bypass [`GeoPoint::new`], so
    /// readers check this before using them.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A user's last known location with its sortable key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Last known position.
    pub point: GeoPoint,
    /// Geohash of `point`, the range-scan sort key.
    pub geohash: String,
    /// When the position was recorded (UTC).
    pub updated_at: DateTime<Utc>,
}
