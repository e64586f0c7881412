//! # Geographic Utilities
//!
//! Geographic computations shared by the reconciler and the progress split.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`polyline_length`] | Total length of a track in meters |
//! | [`compute_bounds`] | Bounding box of a track |
//! | [`pad_bounds`] | Grow a bounding box by a margin in meters |
//!
//! ## Example
//!
//! ```rust
//! use shipment_tracker::{GeoPoint, geo_utils};
//!
//! let track = vec![
//!     GeoPoint::new(53.5511, 9.9937),  // Hamburg
//!     GeoPoint::new(53.0793, 8.8017),  // Bremen
//! ];
//!
//! let length = geo_utils::polyline_length(&track);
//! assert!(length > 90_000.0 && length < 100_000.0);
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a spherical Earth (mean radius
//! ~6,371 km), via [`geo::Haversine`]. All coordinates are WGS84 degrees.

use geo::{Distance, Haversine, Point};
use crate::{Bounds, GeoPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two points in meters.
///
/// ```rust
/// use shipment_tracker::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a polyline in meters. Empty or single-point tracks return 0.0.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a set of points, or `None` when empty.
///
/// ```rust
/// use shipment_tracker::{GeoPoint, geo_utils};
///
/// let bounds = geo_utils::compute_bounds(&[
///     GeoPoint::new(51.50, -0.13),
///     GeoPoint::new(51.51, -0.12),
/// ]).unwrap();
/// assert_eq!(bounds.min_lat, 51.50);
/// assert_eq!(bounds.max_lng, -0.12);
/// ```
pub fn compute_bounds(points: &[GeoPoint]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }

    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Some(Bounds { min_lat, max_lat, min_lng, max_lng })
}

/// Grow a bounding box by `margin_meters` on every side, clamped to valid
/// coordinate ranges. Used to give map viewports a margin around the route.
///
/// The longitude margin is scaled at the box's widest latitude (the edge
/// closest to a pole) so the east/west margin is never narrower than asked.
pub fn pad_bounds(bounds: &Bounds, margin_meters: f64) -> Bounds {
    let margin = margin_meters.max(0.0);
    let lat_margin = margin / METERS_PER_DEGREE;

    let widest = bounds.min_lat.abs().max(bounds.max_lat.abs()).min(90.0);
    // cos(84.26°) = 0.1; past that one degree of longitude is tiny and the
    // margin would cover the whole globe
    let lng_scale = widest.to_radians().cos().max(0.1);
    let lng_margin = margin / (METERS_PER_DEGREE * lng_scale);

    Bounds {
        min_lat: (bounds.min_lat - lat_margin).max(-90.0),
        max_lat: (bounds.max_lat + lat_margin).min(90.0),
        min_lng: (bounds.min_lng - lng_margin).max(-180.0),
        max_lng: (bounds.max_lng + lng_margin).min(180.0),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
