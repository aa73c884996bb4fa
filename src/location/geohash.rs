//! Geohash keys, range bounds and great-circle distance.
//!
//! Locations are indexed by their geohash string. A radius query is
//! answered by scanning a handful of contiguous key ranges whose union
//! covers the search circle, then discarding false positives by exact
//! distance.
//!
//! # Geohash Precision Table
//!
//! | Length | Cell Width | Cell Height |
//! |--------|-----------|-------------|
//! | 5      | ±2.4 km   | ±2.4 km     |
//! | 6      | ±0.61 km  | ±0.61 km    |
//! | 7      | ±0.076 km | ±0.15 km    |
//! | 8      | ±0.019 km | ±0.019 km   |
//! | 10     | ±0.6 m    | ±0.6 m      |

use std::f64::consts::PI;

use super::error::{LocationError, Result};
use super::types::GeoPoint;

/// Geohash length used for stored location keys.
pub const DEFAULT_KEY_PRECISION: usize = 10;

/// Longest geohash the encoder supports.
pub const MAX_KEY_PRECISION: usize = 12;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const BITS_PER_CHAR: u32 = 5;
#[allow(clippy::cast_possible_truncation)]
const MAX_QUERY_BITS: u32 = MAX_KEY_PRECISION as u32 * BITS_PER_CHAR;

/// Sorts after every base32 character, closing a prefix range.
const RANGE_END: char = '~';

const EARTH_MERIDIONAL_CIRCUMFERENCE: f64 = 40_007_860.0;
const METERS_PER_DEGREE_LATITUDE: f64 = 110_574.0;
const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;
const EARTH_ECCENTRICITY_SQUARED: f64 = 0.006_694_478_197_99;
const EPSILON: f64 = 1e-12;

/// Longitude spans come from the WGS84 ellipsoid while distances use a
/// sphere, which differ by up to half a percent; query boxes are widened
/// by this factor so they still enclose the whole circle.
const BOUNDS_MARGIN: f64 = 1.01;

/// Polar bands are tiled with two-character cells: 32 columns of 11.25
/// degrees by 32 rows of 5.625 degrees.
const BAND_PRECISION: usize = 2;
const BAND_CELLS: usize = 32;
const BAND_COLUMN_DEGREES: f64 = 360.0 / 32.0;
const BAND_ROW_DEGREES: f64 = 180.0 / 32.0;
const MAX_BAND_ROWS: usize = 2;

/// An inclusive range of geohash keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyRange {
    /// First key of the range.
    pub start: String,
    /// Last key of the range.
    pub end: String,
}

impl KeyRange {
    /// Returns whether `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.start.as_str() <= key && key <= self.end.as_str()
    }
}

/// Encodes a point as a geohash of `precision` characters.
///
/// # Errors
///
/// Returns an error if the point is invalid or `precision` is outside
/// `1..=12`.
///
/// # Examples
///
/// ```
/// use convoy_core::location::{geohash, GeoPoint};
///
/// let point = GeoPoint::new(37.7749, -122.4194).unwrap();
/// let key = geohash::encode(point, 8).unwrap();
/// assert_eq!(key.len(), 8);
/// assert!(key.starts_with("9q8yy"));
/// ```
pub fn encode(point: GeoPoint, precision: usize) -> Result<String> {
    if !(1..=MAX_KEY_PRECISION).contains(&precision) {
        return Err(LocationError::InvalidPrecision(precision));
    }
    if !point.is_valid() {
        return Err(LocationError::InvalidCoordinates {
            latitude: point.latitude,
            longitude: point.longitude,
        });
    }
    ::geohash::encode(
        ::geohash::Coord {
            x: point.longitude,
            y: point.latitude,
        },
        precision,
    )
    .map_err(|_| LocationError::InvalidCoordinates {
        latitude: point.latitude,
        longitude: point.longitude,
    })
}

/// Decodes a geohash to the center of its cell.
///
/// Returns `None` for empty or malformed keys.
#[must_use]
pub fn decode(key: &str) -> Option<GeoPoint> {
    ::geohash::decode(key)
        .ok()
        .map(|(coord, _, _)| GeoPoint {
            latitude: coord.y,
            longitude: coord.x,
        })
}

/// Great-circle distance between two points, in meters (haversine).
///
/// # Examples
///
/// ```
/// use convoy_core::location::{geohash, GeoPoint};
///
/// let a = GeoPoint::new(37.7749, -122.4194).unwrap();
/// let b = GeoPoint::new(37.7755, -122.4190).unwrap();
/// let d = geohash::distance_meters(a, b);
/// assert!((d - 75.0).abs() < 5.0);
/// assert_eq!(geohash::distance_meters(a, a), 0.0);
/// ```
#[must_use]
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let half_dlat = (b.latitude - a.latitude).to_radians() / 2.0;
    let half_dlon = (b.longitude - a.longitude).to_radians() / 2.0;

    let h = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlon.sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Computes key ranges whose union contains every point within
/// `radius_meters` of `center`.
///
/// The ranges over-approximate the circle: they cover whole geohash cells
/// around it, so callers must filter candidates by exact distance.
/// Returned ranges are sorted and non-overlapping.
///
/// A circle that reaches a pole, or whose box spans half the globe in
/// longitude, is covered by its whole latitude band at every longitude.
/// Bands taller than two cell rows fall back to the full key space.
///
/// # Errors
///
/// Returns an error if `center` is invalid or the radius is not a positive
/// finite number.
pub fn query_bounds(center: GeoPoint, radius_meters: f64) -> Result<Vec<KeyRange>> {
    if !radius_meters.is_finite() || radius_meters <= 0.0 {
        return Err(LocationError::InvalidRadius(radius_meters));
    }
    if !center.is_valid() {
        return Err(LocationError::InvalidCoordinates {
            latitude: center.latitude,
            longitude: center.longitude,
        });
    }

    let box_radius = radius_meters * BOUNDS_MARGIN;
    if let Some(band) = polar_band(center, box_radius) {
        return Ok(band_ranges(band));
    }

    let query_bits = bounding_box_bits(center, box_radius);
    let precision = query_bits.div_ceil(BITS_PER_CHAR) as usize;

    let mut ranges = bounding_box_coordinates(center, box_radius)
        .into_iter()
        .map(|corner| encode(corner, precision).map(|key| key_range(&key, query_bits)))
        .collect::<Result<Vec<_>>>()?;

    ranges.sort();
    Ok(merge_ranges(ranges))
}

/// Latitude band, as `(south, north)`, of a box that cannot be sampled by
/// its corners. `None` when the box stays clear of both poles and spans
/// less than half the globe in longitude.
fn polar_band(center: GeoPoint, radius: f64) -> Option<(f64, f64)> {
    let lat_delta = radius / METERS_PER_DEGREE_LATITUDE;
    let north = center.latitude + lat_delta;
    let south = center.latitude - lat_delta;
    let lat_north = north.min(90.0);
    let lat_south = south.max(-90.0);
    let long_degrees = meters_to_longitude_degrees(radius, lat_north)
        .max(meters_to_longitude_degrees(radius, lat_south));

    (north >= 90.0 || south <= -90.0 || long_degrees >= 180.0).then_some((lat_south, lat_north))
}

/// Ranges covering every two-character cell whose rows intersect the band.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn band_ranges((south, north): (f64, f64)) -> Vec<KeyRange> {
    let row = |latitude: f64| {
        (((latitude + 90.0) / BAND_ROW_DEGREES).floor() as usize).min(BAND_CELLS - 1)
    };
    let (first_row, last_row) = (row(south), row(north));
    if last_row - first_row + 1 > MAX_BAND_ROWS {
        return vec![KeyRange {
            start: char::from(BASE32[0]).to_string(),
            end: RANGE_END.to_string(),
        }];
    }

    let mut ranges = Vec::with_capacity((last_row - first_row + 1) * BAND_CELLS);
    for lat_row in first_row..=last_row {
        let latitude = -90.0 + (lat_row as f64 + 0.5) * BAND_ROW_DEGREES;
        for lon_column in 0..BAND_CELLS {
            let longitude = -180.0 + (lon_column as f64 + 0.5) * BAND_COLUMN_DEGREES;
            let cell = GeoPoint {
                latitude,
                longitude,
            };
            if let Ok(key) = encode(cell, BAND_PRECISION) {
                ranges.push(key_range(&key, BAND_PRECISION as u32 * BITS_PER_CHAR));
            }
        }
    }
    ranges.sort();
    merge_ranges(ranges)
}

/// Collapses sorted ranges that overlap or repeat.
fn merge_ranges(sorted: Vec<KeyRange>) -> Vec<KeyRange> {
    let mut merged: Vec<KeyRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Range of keys sharing the first `bits` bits of `key`.
fn key_range(key: &str, bits: u32) -> KeyRange {
    let precision = bits.div_ceil(BITS_PER_CHAR) as usize;
    if key.len() < precision {
        return KeyRange {
            start: key.to_string(),
            end: format!("{key}{RANGE_END}"),
        };
    }

    let base = &key[..precision - 1];
    let last_value = key
        .as_bytes()
        .get(precision - 1)
        .and_then(|c| BASE32.iter().position(|b| b == c))
        .unwrap_or(0);
    #[allow(clippy::cast_possible_truncation)]
    let significant_bits = bits - (base.len() as u32) * BITS_PER_CHAR;
    let unused_bits = BITS_PER_CHAR - significant_bits;

    let start_value = (last_value >> unused_bits) << unused_bits;
    let end_value = start_value + (1 << unused_bits);
    let start = format!("{base}{}", char::from(BASE32[start_value]));

    if end_value > 31 {
        KeyRange {
            start,
            end: format!("{base}{RANGE_END}"),
        }
    } else {
        KeyRange {
            start,
            end: format!("{base}{}", char::from(BASE32[end_value])),
        }
    }
}

/// Number of geohash bits whose cells are at least `size` meters across
/// around `center`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bounding_box_bits(center: GeoPoint, size: f64) -> u32 {
    let lat_delta = size / METERS_PER_DEGREE_LATITUDE;
    let lat_north = (center.latitude + lat_delta).min(90.0);
    let lat_south = (center.latitude - lat_delta).max(-90.0);

    let bits_lat = latitude_bits_for_resolution(size).floor() * 2.0;
    let bits_long_north = longitude_bits_for_resolution(size, lat_north).floor() * 2.0 - 1.0;
    let bits_long_south = longitude_bits_for_resolution(size, lat_south).floor() * 2.0 - 1.0;

    let bits = bits_lat
        .min(bits_long_north)
        .min(bits_long_south)
        .min(f64::from(MAX_QUERY_BITS));
    bits.max(1.0) as u32
}

fn latitude_bits_for_resolution(resolution: f64) -> f64 {
    (EARTH_MERIDIONAL_CIRCUMFERENCE / 2.0 / resolution)
        .log2()
        .min(f64::from(MAX_QUERY_BITS))
}

fn longitude_bits_for_resolution(resolution: f64, latitude: f64) -> f64 {
    let degrees = meters_to_longitude_degrees(resolution, latitude);
    if degrees.abs() > 0.000_001 {
        (360.0 / degrees).log2().max(1.0)
    } else {
        1.0
    }
}

/// Degrees of longitude spanned by `distance` meters at `latitude`.
fn meters_to_longitude_degrees(distance: f64, latitude: f64) -> f64 {
    let radians = latitude.to_radians();
    let numerator = radians.cos() * EARTH_EQUATORIAL_RADIUS * PI / 180.0;
    let denominator = 1.0 / (1.0 - EARTH_ECCENTRICITY_SQUARED * radians.sin().powi(2)).sqrt();
    let delta_degrees = numerator * denominator;
    if delta_degrees < EPSILON {
        if distance > 0.0 {
            360.0
        } else {
            0.0
        }
    } else {
        (distance / delta_degrees).min(360.0)
    }
}

/// Center plus the eight corners and edge midpoints of the box around it.
fn bounding_box_coordinates(center: GeoPoint, radius: f64) -> [GeoPoint; 9] {
    let lat_degrees = radius / METERS_PER_DEGREE_LATITUDE;
    let lat_north = (center.latitude + lat_degrees).min(90.0);
    let lat_south = (center.latitude - lat_degrees).max(-90.0);
    let long_degrees = meters_to_longitude_degrees(radius, lat_north)
        .max(meters_to_longitude_degrees(radius, lat_south));

    let west = wrap_longitude(center.longitude - long_degrees);
    let east = wrap_longitude(center.longitude + long_degrees);
    let point = |latitude, longitude| GeoPoint {
        latitude,
        longitude,
    };

    [
        point(center.latitude, center.longitude),
        point(center.latitude, west),
        point(center.latitude, east),
        point(lat_north, center.longitude),
        point(lat_north, west),
        point(lat_north, east),
        point(lat_south, center.longitude),
        point(lat_south, west),
        point(lat_south, east),
    ]
}

/// Wraps a longitude into `-180.0..=180.0`.
fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

/// Geohash index configured with the key length used for stored locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoIndex {
    key_precision: usize,
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self {
            key_precision: DEFAULT_KEY_PRECISION,
        }
    }
}

impl GeoIndex {
    /// Creates an index producing keys of `key_precision` characters.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::InvalidPrecision`] if the precision is
    /// outside `1..=12`.
    pub fn new(key_precision: usize) -> Result<Self> {
        if !(1..=MAX_KEY_PRECISION).contains(&key_precision) {
            return Err(LocationError::InvalidPrecision(key_precision));
        }
        Ok(Self { key_precision })
    }

    /// Returns the configured key length.
    #[must_use]
    pub const fn key_precision(&self) -> usize {
        self.key_precision
    }

    /// Encodes a point at the configured key length.
    ///
    /// # Errors
    ///
    /// Returns an error if the point is invalid.
    pub fn encode(&self, point: GeoPoint) -> Result<String> {
        encode(point, self.key_precision)
    }

    /// See [`query_bounds`].
    ///
    /// # Errors
    ///
    /// Returns an error if `center` or the radius is invalid.
    pub fn query_bounds(&self, center: GeoPoint, radius_meters: f64) -> Result<Vec<KeyRange>> {
        query_bounds(center, radius_meters)
    }

    /// See [`distance_meters`].
    #[must_use]
    pub fn distance_meters(&self, a: GeoPoint, b: GeoPoint) -> f64 {
        distance_meters(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint::new(latitude, longitude).unwrap()
    }

    #[test]
    fn encode_has_requested_length() {
        let key = encode(point(37.7749, -122.4194), 10).unwrap();
        assert_eq!(key.len(), 10);
        assert!(key.starts_with("9q8yy"));
    }

    #[test]
    fn encode_rejects_bad_precision() {
        assert!(matches!(
            encode(point(0.0, 0.0), 0),
            Err(LocationError::InvalidPrecision(0))
        ));
        assert!(encode(point(0.0, 0.0), 13).is_err());
    }

    #[test]
    fn encode_rejects_invalid_point() {
        let bad = GeoPoint {
            latitude: f64::NAN,
            longitude: 0.0,
        };
        assert!(encode(bad, 8).is_err());
    }

    #[test]
    fn decode_accuracy() {
        let original = point(37.7749, -122.4194);
        let decoded = decode(&encode(original, 8).unwrap()).unwrap();
        assert!((decoded.latitude - original.latitude).abs() < 0.0002);
        assert!((decoded.longitude - original.longitude).abs() < 0.0002);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode("").is_none());
        assert!(decode("ailo").is_none());
    }

    #[test]
    fn longer_keys_extend_shorter_ones() {
        let p = point(37.7749, -122.4194);
        let geo5 = encode(p, 5).unwrap();
        let geo10 = encode(p, 10).unwrap();
        assert!(geo10.starts_with(&geo5));
    }

    #[test]
    fn distance_zero_for_identical_points() {
        let p = point(37.7749, -122.4194);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn distance_san_francisco_example() {
        let center = point(37.7749, -122.4194);
        let near = point(37.7755, -122.4190);
        let far = point(38.0, -122.0);

        let d_near = distance_meters(center, near);
        assert!((d_near - 75.0).abs() < 5.0, "got {d_near}");

        let d_far = distance_meters(center, far);
        assert!(d_far > 40_000.0 && d_far < 50_000.0, "got {d_far}");
    }

    #[test]
    fn distance_quarter_meridian() {
        let d = distance_meters(point(0.0, 0.0), point(90.0, 0.0));
        let expected = EARTH_RADIUS_METERS * PI / 2.0;
        assert!((d - expected).abs() < 1.0);
    }

    #[test]
    fn query_bounds_rejects_bad_input() {
        let center = point(0.0, 0.0);
        assert!(matches!(
            query_bounds(center, 0.0),
            Err(LocationError::InvalidRadius(_))
        ));
        assert!(query_bounds(center, -5.0).is_err());
        assert!(query_bounds(center, f64::NAN).is_err());
        assert!(query_bounds(
            GeoPoint {
                latitude: 100.0,
                longitude: 0.0
            },
            10.0
        )
        .is_err());
    }

    #[test]
    fn query_bounds_cover_center_key() {
        let center = point(37.7749, -122.4194);
        let key = encode(center, DEFAULT_KEY_PRECISION).unwrap();
        let bounds = query_bounds(center, 2000.0).unwrap();
        assert!(!bounds.is_empty());
        assert!(bounds.iter().any(|r| r.contains(&key)));
    }

    #[test]
    fn query_bounds_cover_nearby_point() {
        let center = point(37.7749, -122.4194);
        let near = point(37.7755, -122.4190);
        let key = encode(near, DEFAULT_KEY_PRECISION).unwrap();
        let bounds = query_bounds(center, 2000.0).unwrap();
        assert!(bounds.iter().any(|r| r.contains(&key)));
    }

    #[test]
    fn query_bounds_are_sorted_and_disjoint() {
        let bounds = query_bounds(point(51.5074, -0.1278), 5000.0).unwrap();
        for pair in bounds.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }

    #[test]
    fn query_bounds_handle_poles_and_dateline() {
        assert!(!query_bounds(point(90.0, 0.0), 1000.0).unwrap().is_empty());
        assert!(!query_bounds(point(-89.9, 179.99), 50_000.0).unwrap().is_empty());
        assert!(!query_bounds(point(0.0, -180.0), 20_000_000.0).unwrap().is_empty());
    }

    /// The point `distance` meters from `origin` along `bearing` (radians),
    /// with longitude wrapped into range.
    fn destination(origin: GeoPoint, bearing: f64, distance: f64) -> GeoPoint {
        let angular = distance / EARTH_RADIUS_METERS;
        let lat1 = origin.latitude.to_radians();
        let lon1 = origin.longitude.to_radians();
        let lat2 =
            (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
        let lon2 = lon1
            + (bearing.sin() * angular.sin() * lat1.cos())
                .atan2(angular.cos() - lat1.sin() * lat2.sin());
        GeoPoint {
            latitude: lat2.to_degrees().clamp(-90.0, 90.0),
            longitude: wrap_longitude(lon2.to_degrees()),
        }
    }

    #[test]
    fn query_bounds_cover_circles_over_the_poles() {
        for center in [point(89.5, 0.0), point(-89.5, 120.0), point(88.0, 179.5)] {
            let radius = 200_000.0;
            let bounds = query_bounds(center, radius).unwrap();
            for step in 0..72 {
                let bearing = f64::from(step) * 5.0_f64.to_radians();
                for fraction in [0.25, 0.5, 0.99] {
                    let target = destination(center, bearing, radius * fraction);
                    if !target.is_valid() || distance_meters(center, target) > radius {
                        continue;
                    }
                    let key = encode(target, DEFAULT_KEY_PRECISION).unwrap();
                    assert!(
                        bounds.iter().any(|r| r.contains(&key)),
                        "{target:?} ({key}) missed around {center:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn polar_band_stays_within_two_rows() {
        let bounds = query_bounds(point(89.5, 0.0), 200_000.0).unwrap();
        assert!(bounds.len() <= 2 * BAND_CELLS);
        assert!(bounds.iter().all(|r| r.start.len() == BAND_PRECISION));
        assert!(bounds.iter().any(|r| r.contains("gzv8nc7x7z")));
    }

    #[test]
    fn query_bounds_fall_back_to_every_key_for_huge_circles() {
        let bounds = query_bounds(point(0.0, -180.0), 20_000_000.0).unwrap();
        assert_eq!(bounds.len(), 1);
        assert!(bounds[0].contains("0"));
        assert!(bounds[0].contains("zzzzzzzzzz"));
    }

    #[test]
    fn key_range_masks_unused_bits() {
        // 'd' is index 12 (0b01100); keeping 3 bits of it gives 0b01100..0b10000.
        let range = key_range("9q8yd", 23);
        assert_eq!(range.start, "9q8yd");
        assert_eq!(range.end, "9q8yh");

        let full = key_range("9q8yz", 25);
        assert_eq!(full.start, "9q8yz");
        assert_eq!(full.end, "9q8y~");
    }

    #[test]
    fn key_range_short_key_uses_prefix() {
        let range = key_range("9q", 25);
        assert_eq!(range.start, "9q");
        assert_eq!(range.end, "9q~");
    }

    #[test]
    fn merge_ranges_collapses_overlaps() {
        let r = |s: &str, e: &str| KeyRange {
            start: s.to_string(),
            end: e.to_string(),
        };
        let merged = merge_ranges(vec![r("a", "c"), r("a", "c"), r("b", "d"), r("f", "g")]);
        assert_eq!(merged, vec![r("a", "d"), r("f", "g")]);
    }

    #[test]
    fn wrap_longitude_values() {
        assert_eq!(wrap_longitude(170.0), 170.0);
        assert!((wrap_longitude(190.0) - -170.0).abs() < 1e-9);
        assert!((wrap_longitude(-190.0) - 170.0).abs() < 1e-9);
    }

    #[test]
    fn geo_index_validates_precision() {
        assert!(GeoIndex::new(0).is_err());
        assert!(GeoIndex::new(13).is_err());
        let index = GeoIndex::new(9).unwrap();
        assert_eq!(index.encode(point(1.0, 1.0)).unwrap().len(), 9);
        assert_eq!(GeoIndex::default().key_precision(), DEFAULT_KEY_PRECISION);
    }
}
