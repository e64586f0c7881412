//! # Shipment Tracker
//!
//! Live route and telemetry reconciliation for shipment tracking dashboards.
//!
//! This library provides:
//! - A reconciler that merges a historical batch and a live feed into a
//!   deduplicated GPS track and per-metric telemetry series
//! - Planned-route progress splitting (completed vs remaining)
//! - Normalization of loosely-shaped backend records and feed messages
//! - A caller-owned geocode cache and live feed subscriptions
//!
//! ## Features
//!
//! - **`http`** (default) - HTTP client for the shipment data service
//!
//! ## Quick Start
//!
//! ```rust
//! use shipment_tracker::{FeedMessage, GeoPoint, RouteTelemetryReconciler};
//!
//! let mut reconciler = RouteTelemetryReconciler::new();
//!
//! let message = FeedMessage::from_json(
//!     r#"{"trackerId": "t-1", "ts": 1709294400, "location": {"lat": 0.0, "lng": 0.9},
//!         "telemetry": {"temperature": 4.5}}"#,
//! ).unwrap();
//! reconciler.ingest_feed_message(&message);
//!
//! let planned = vec![
//!     GeoPoint::new(0.0, 0.0),
//!     GeoPoint::new(0.0, 1.0),
//!     GeoPoint::new(0.0, 2.0),
//! ];
//! let split = reconciler.compute_progress(&planned);
//! println!("{} points done, {} to go", split.completed.len(), split.remaining.len());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrackerError};

// Geographic utilities (distance, bounds, center calculations)
pub mod geo_utils;

// Metric time series
pub mod telemetry;
pub use telemetry::{metric, MetricSample, MetricSeries, MetricSummary, Timestamp};

// Planned-route progress
pub mod progress;
pub use progress::{split_route_progress, RouteProgressSplit};

// Live track and telemetry state
pub mod reconciler;
pub use reconciler::{LiveEvent, RouteTelemetryReconciler};

// Backend payload normalization
pub mod records;
pub use records::{
    normalize_history, parse_history, FeedMessage, Geolocation, HistoricalBatch,
    HistoricalRecord, OperationKind,
};

// Shipment and tracker models
pub mod shipment;
pub use shipment::{Leg, Location, NewShipment, Shipment, ShipmentStatus, Tracker};

// Address lookup memo
pub mod geocode;
pub use geocode::{GeocodeCache, GeocodeCacheConfig};

// Live feed subscriptions
pub mod feed;
pub use feed::{FeedConfig, FeedHub, SelectionGuard, Subscription};

// HTTP client for the shipment data service
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{ServiceConfig, ShipmentClient};

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate with latitude and longitude in degrees.
///
/// Equality is coordinate-wise, which is what track deduplication uses.
///
/// # Example
/// ```
/// use shipment_tracker::GeoPoint;
/// let point = GeoPoint::new(53.5511, 9.9937); // Hamburg
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has finite, in-range coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box, e.g. for fitting a map viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(53.5511, 9.9937).is_valid());
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_geo_point_aliases() {
        let p: GeoPoint = serde_json::from_str(r#"{"lat": 1.5, "lng": 2.5}"#).unwrap();
        assert_eq!(p, GeoPoint::new(1.5, 2.5));
    }

    #[test]
    fn test_bounds_center_and_contains() {
        let b = Bounds { min_lat: 50.0, max_lat: 52.0, min_lng: 8.0, max_lng: 10.0 };
        assert_eq!(b.center(), GeoPoint::new(51.0, 9.0));
        assert!(b.contains(&GeoPoint::new(51.0, 9.5)));
        assert!(!b.contains(&GeoPoint::new(49.9, 9.5)));
    }
}
