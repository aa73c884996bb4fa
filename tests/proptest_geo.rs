//! Property-based tests for geohash indexing and proximity search.
//!
//! These tests verify:
//! - G1: `distance_meters` is zero for identical points and symmetric
//! - G2: `query_bounds` covers every point inside the radius, including
//!   circles that reach a pole or straddle the antimeridian
//! - G3: `find_nearby` never returns a user outside the radius, the
//!   excluded uid, or a uid twice

mod helpers;

use convoy_core::location::{geohash, GeoIndex, GeoPoint};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use helpers::proximity_service;

fn point_strategy() -> impl Strategy<Value = GeoPoint> {
    (-90.0..=90.0_f64, -180.0..=180.0_f64).prop_map(|(latitude, longitude)| GeoPoint {
        latitude,
        longitude,
    })
}

/// Points away from the poles and the antimeridian, where a small search
/// circle fits in one longitude span.
fn mid_latitude_point() -> impl Strategy<Value = GeoPoint> {
    (-80.0..=80.0_f64, -179.0..=179.0_f64).prop_map(|(latitude, longitude)| GeoPoint {
        latitude,
        longitude,
    })
}

/// Points within ten degrees of a pole or one degree of the antimeridian.
fn near_pole_or_antimeridian() -> impl Strategy<Value = GeoPoint> {
    prop_oneof![
        (80.0..=90.0_f64, -180.0..=180.0_f64),
        (-90.0..=-80.0_f64, -180.0..=180.0_f64),
        (-90.0..=90.0_f64, 179.0..=180.0_f64),
        (-90.0..=90.0_f64, -180.0..=-179.0_f64),
    ]
    .prop_map(|(latitude, longitude)| GeoPoint {
        latitude,
        longitude,
    })
}

/// The point `distance` meters from `origin` along `bearing` (radians),
/// with longitude wrapped into `-180.0..180.0`.
fn destination(origin: GeoPoint, bearing: f64, distance: f64) -> GeoPoint {
    let angular = distance / geohash::EARTH_RADIUS_METERS;
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    GeoPoint {
        latitude: lat2.to_degrees(),
        longitude: (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn g1_distance_to_self_is_zero(p in point_strategy()) {
        prop_assert!(geohash::distance_meters(p, p).abs() < 1e-9);
    }

    #[test]
    fn g1_distance_is_symmetric(a in point_strategy(), b in point_strategy()) {
        let ab = geohash::distance_meters(a, b);
        let ba = geohash::distance_meters(b, a);
        prop_assert!((ab - ba).abs() < 1e-6, "{} != {}", ab, ba);
        prop_assert!(ab >= 0.0);
    }

    #[test]
    fn g2_bounds_cover_points_in_radius(
        center in mid_latitude_point(),
        radius in 10.0..20_000.0_f64,
        bearing in 0.0..std::f64::consts::TAU,
        fraction in 0.0..=1.0_f64,
    ) {
        let target = destination(center, bearing, radius * fraction);
        prop_assume!(target.is_valid());
        prop_assume!(geohash::distance_meters(center, target) <= radius);

        let index = GeoIndex::default();
        let key = index.encode(target).unwrap();
        let bounds = index.query_bounds(center, radius).unwrap();

        prop_assert!(
            bounds.iter().any(|range| range.contains(&key)),
            "key {} not covered by {:?}",
            key,
            bounds
        );
    }

    #[test]
    fn g2_bounds_cover_points_near_poles_and_antimeridian(
        center in near_pole_or_antimeridian(),
        radius in 1_000.0..300_000.0_f64,
        bearing in 0.0..std::f64::consts::TAU,
        fraction in 0.0..=1.0_f64,
    ) {
        let target = destination(center, bearing, radius * fraction);
        prop_assume!(target.is_valid());
        prop_assume!(geohash::distance_meters(center, target) <= radius);

        let index = GeoIndex::default();
        let key = index.encode(target).unwrap();
        let bounds = index.query_bounds(center, radius).unwrap();
        prop_assert!(
            bounds.iter().any(|range| range.contains(&key)),
            "key {} for {:?} not covered around {:?}",
            key,
            target,
            center
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn g3_find_nearby_post_filter(
        center in mid_latitude_point(),
        radius in 100.0..5_000.0_f64,
        offsets in prop::collection::vec((0.0..std::f64::consts::TAU, 0.0..2.0_f64), 1..12),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (_, service) = proximity_service();
            for (i, (bearing, fraction)) in offsets.iter().enumerate() {
                let target = destination(center, *bearing, radius * fraction);
                if target.is_valid() {
                    service.update_location(&format!("user-{i}"), target).await.unwrap();
                }
            }

            let results = service
                .find_nearby(center, radius, Some("user-0"), &CancellationToken::new())
                .await
                .unwrap();

            let mut seen = std::collections::HashSet::new();
            for user in &results {
                prop_assert!(user.distance_meters <= radius);
                prop_assert!(user.uid != "user-0");
                prop_assert!(seen.insert(user.uid.clone()), "duplicate {}", user.uid);
            }
            Ok(())
        })?;
    }
}
