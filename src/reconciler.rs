//! Live route and telemetry state for one selected shipment or tracker.
//!
//! The reconciler is seeded from a historical batch, then fed one live event
//! at a time. It keeps:
//! - the GPS track, with consecutive duplicate positions collapsed
//! - per-metric telemetry series, deduplicated by timestamp
//!
//! and answers "where is it now" and "how much of the plan is done".
//!
//! None of the operations fail. Malformed input is dropped field by field
//! and logged so that a bad message never stalls the feed.
//!
//! ```rust
//! use shipment_tracker::{GeoPoint, LiveEvent, RouteTelemetryReconciler, Timestamp};
//!
//! let mut reconciler = RouteTelemetryReconciler::new();
//! reconciler.ingest_live_event(
//!     LiveEvent::new(Timestamp::from_millis(1_000))
//!         .with_position(GeoPoint::new(0.0, 0.9))
//!         .with_metric("temperature", 4.5),
//! );
//!
//! let planned = vec![
//!     GeoPoint::new(0.0, 0.0),
//!     GeoPoint::new(0.0, 1.0),
//!     GeoPoint::new(0.0, 2.0),
//! ];
//! let split = reconciler.compute_progress(&planned);
//! assert_eq!(split.completed, vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 0.9)]);
//! ```

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::geo_utils::{compute_bounds, pad_bounds, polyline_length};
use crate::progress::{split_route_progress, RouteProgressSplit};
use crate::records::{FeedMessage, HistoricalBatch};
use crate::telemetry::{MetricSample, MetricSeries, MetricSummary, Timestamp};
use crate::{Bounds, GeoPoint};

/// One normalized message from the live telemetry feed.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub timestamp: Timestamp,
    pub position: Option<GeoPoint>,
    pub metrics: Option<IndexMap<String, f64>>,
}

impl LiveEvent {
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp, position: None, metrics: None }
    }

    pub fn with_position(mut self, position: GeoPoint) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), value);
        self
    }
}

/// Track and telemetry state for the active selection.
///
/// One instance per selection; call [`reset`](Self::reset) when the
/// selection changes or the feed disconnects.
#[derive(Debug, Clone, Default)]
pub struct RouteTelemetryReconciler {
    track: Vec<GeoPoint>,
    series: MetricSeries,
}

impl RouteTelemetryReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the track and all metric series.
    pub fn reset(&mut self) {
        debug!(
            "[Reconciler] Reset ({} points, {} samples discarded)",
            self.track.len(),
            self.series.sample_count()
        );
        self.track.clear();
        self.series.clear();
    }

    /// Replace the current state with a historical batch.
    ///
    /// Loading the same batch twice leaves the same state as loading it once.
    pub fn load_historical<I, S>(&mut self, points: &[GeoPoint], samples: I)
    where
        I: IntoIterator<Item = (S, Vec<MetricSample>)>,
        S: Into<String>,
    {
        self.track.clear();
        for point in points {
            self.push_point(*point);
        }
        self.series = MetricSeries::from_samples(samples);

        info!(
            "[Reconciler] Loaded history: {} points ({} given), {} metrics, {} samples",
            self.track.len(),
            points.len(),
            self.series.len(),
            self.series.sample_count()
        );
    }

    /// [`load_historical`](Self::load_historical) from a normalized record batch.
    pub fn load_batch(&mut self, batch: HistoricalBatch) {
        self.load_historical(&batch.points, batch.samples);
    }

    /// Apply one live event.
    pub fn ingest_live_event(&mut self, event: LiveEvent) {
        if let Some(point) = event.position {
            self.push_point(point);
        }

        if let Some(metrics) = event.metrics {
            for (name, value) in metrics {
                self.series.insert(&name, MetricSample::new(event.timestamp, value));
            }
        }
    }

    /// Normalize a raw feed message and apply it.
    ///
    /// Messages that carry no usable data (deletes, no timestamp) are skipped.
    pub fn ingest_feed_message(&mut self, message: &FeedMessage) {
        match message.to_live_event() {
            Some(event) => self.ingest_live_event(event),
            None => debug!(
                "[Reconciler] Feed message {:?} for {} carried no event",
                message.operation, message.id
            ),
        }
    }

    /// Last received position, if any.
    pub fn current_position(&self) -> Option<GeoPoint> {
        self.track.last().copied()
    }

    /// Split `planned` into completed and remaining parts around the current
    /// position. With no position or fewer than two planned points the whole
    /// plan is returned as remaining.
    pub fn compute_progress(&self, planned: &[GeoPoint]) -> RouteProgressSplit {
        match self.current_position() {
            Some(current) if planned.len() >= 2 => split_route_progress(planned, &current),
            _ => RouteProgressSplit::untouched(planned),
        }
    }

    pub fn track(&self) -> &[GeoPoint] {
        &self.track
    }

    pub fn series(&self) -> &MetricSeries {
        &self.series
    }

    pub fn metric(&self, name: &str) -> &[MetricSample] {
        self.series.get(name)
    }

    pub fn metric_summary(&self, name: &str) -> Option<MetricSummary> {
        self.series.summary(name)
    }

    /// Length of the received track in meters.
    pub fn distance_travelled(&self) -> f64 {
        polyline_length(&self.track)
    }

    /// Bounding box of the track together with a planned route, for fitting
    /// a map viewport. `None` when both are empty.
    pub fn bounds(&self, planned: &[GeoPoint]) -> Option<Bounds> {
        let all: Vec<GeoPoint> = self.track.iter().chain(planned).copied().collect();
        compute_bounds(&all)
    }

    /// [`bounds`](Self::bounds) grown by `margin_meters` on every side, so
    /// markers at the edges are not cut off by the map frame.
    pub fn viewport(&self, planned: &[GeoPoint], margin_meters: f64) -> Option<Bounds> {
        self.bounds(planned).map(|b| pad_bounds(&b, margin_meters))
    }

    fn push_point(&mut self, point: GeoPoint) -> bool {
        if !point.is_valid() {
            warn!(
                "[Reconciler] Dropping invalid position ({}, {})",
                point.latitude, point.longitude
            );
            return false;
        }
        if self.track.last() == Some(&point) {
            return false;
        }
        self.track.push(point);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::geo_utils::haversine_distance;

    fn at(ts: i64) -> LiveEvent {
        LiveEvent::new(Timestamp::from_millis(ts))
    }

    fn planned() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(0.0, 2.0),
        ]
    }

    #[test]
    fn test_identical_positions_collapse() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(10.0, 20.0)));
        r.ingest_live_event(at(2).with_position(GeoPoint::new(10.0, 20.0)));
        assert_eq!(r.track().len(), 1);
    }

    #[test]
    fn test_non_consecutive_repeat_kept() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(10.0, 20.0)));
        r.ingest_live_event(at(2).with_position(GeoPoint::new(10.5, 20.0)));
        r.ingest_live_event(at(3).with_position(GeoPoint::new(10.0, 20.0)));
        assert_eq!(r.track().len(), 3);
    }

    #[test]
    fn test_invalid_position_dropped_metrics_kept() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(
            at(1)
                .with_position(GeoPoint::new(f64::NAN, 20.0))
                .with_metric("temperature", 3.0),
        );
        r.ingest_live_event(at(2).with_position(GeoPoint::new(95.0, 20.0)));

        assert!(r.current_position().is_none());
        assert_eq!(r.metric("temperature").len(), 1);
    }

    #[test]
    fn test_metric_duplicate_timestamp_first_wins() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(5).with_metric("humidity", 40.0));
        r.ingest_live_event(at(5).with_metric("humidity", 99.0));

        let humidity = r.metric("humidity");
        assert_eq!(humidity.len(), 1);
        assert_eq!(humidity[0].value, 40.0);
    }

    #[test]
    fn test_bad_metric_value_does_not_block_others() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(
            at(5)
                .with_metric("speed", f64::NAN)
                .with_metric("battery", 77.0),
        );
        assert!(r.metric("speed").is_empty());
        assert_eq!(r.metric("battery").len(), 1);
    }

    #[test]
    fn test_progress_on_empty_track() {
        let r = RouteTelemetryReconciler::new();
        let split = r.compute_progress(&planned());
        assert!(split.completed.is_empty());
        assert_eq!(split.remaining, planned());
    }

    #[test]
    fn test_progress_with_position() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(0.0, 0.9)));

        let split = r.compute_progress(&planned());
        assert_eq!(split.completed, vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 0.9)]);
        assert_eq!(
            split.remaining,
            vec![GeoPoint::new(0.0, 0.9), GeoPoint::new(0.0, 1.0), GeoPoint::new(0.0, 2.0)]
        );
    }

    #[test]
    fn test_progress_single_point_plan() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(0.0, 0.9)));

        let plan = vec![GeoPoint::new(0.0, 0.0)];
        let split = r.compute_progress(&plan);
        assert!(split.completed.is_empty());
        assert_eq!(split.remaining, plan);
    }

    #[test]
    fn test_load_historical_replaces_state() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(5.0, 5.0)).with_metric("speed", 10.0));

        let points = vec![GeoPoint::new(1.0, 1.0), GeoPoint::new(1.0, 1.0), GeoPoint::new(1.1, 1.0)];
        let mut samples = HashMap::new();
        samples.insert(
            "temperature".to_string(),
            vec![MetricSample::new(Timestamp(1), 2.0), MetricSample::new(Timestamp(2), 2.5)],
        );

        r.load_historical(&points, samples.clone());
        r.load_historical(&points, samples);

        assert_eq!(r.track(), &[GeoPoint::new(1.0, 1.0), GeoPoint::new(1.1, 1.0)]);
        assert!(r.metric("speed").is_empty());
        assert_eq!(r.metric("temperature").len(), 2);
    }

    #[test]
    fn test_load_historical_empty() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(5.0, 5.0)));
        r.load_historical(&[], Vec::<(String, Vec<MetricSample>)>::new());
        assert!(r.current_position().is_none());
        assert!(r.series().is_empty());
    }

    #[test]
    fn test_reset_behaves_like_new() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(0.0, 0.9)).with_metric("speed", 12.0));
        r.reset();

        let fresh = RouteTelemetryReconciler::new();
        assert_eq!(r.current_position(), fresh.current_position());
        assert_eq!(r.compute_progress(&planned()), fresh.compute_progress(&planned()));
        assert!(r.series().is_empty());
        assert_eq!(r.distance_travelled(), 0.0);
    }

    #[test]
    fn test_distance_and_bounds() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(0.0, 0.0)));
        r.ingest_live_event(at(2).with_position(GeoPoint::new(0.0, 0.5)));

        assert!((r.distance_travelled() - 55_597.0).abs() < 100.0);

        let bounds = r.bounds(&planned()).unwrap();
        assert_eq!(bounds.min_lng, 0.0);
        assert_eq!(bounds.max_lng, 2.0);
        assert!(RouteTelemetryReconciler::new().bounds(&[]).is_none());
    }

    #[test]
    fn test_viewport_frames_track_and_plan() {
        let mut r = RouteTelemetryReconciler::new();
        r.ingest_live_event(at(1).with_position(GeoPoint::new(0.4, 0.5)));
        let plan = planned();

        let tight = r.bounds(&plan).unwrap();
        let view = r.viewport(&plan, 5_000.0).unwrap();
        for p in r.track().iter().chain(&plan) {
            assert!(view.contains(p));
        }

        // The margin keeps points just outside the tight box in frame
        let outside = GeoPoint::new(tight.max_lat + 0.02, tight.max_lng + 0.02);
        assert!(!tight.contains(&outside));
        assert!(view.contains(&outside));
        assert!(!view.contains(&GeoPoint::new(tight.max_lat + 0.1, 1.0)));
        let drift = haversine_distance(&view.center(), &tight.center());
        assert!(drift < 1.0);

        assert!(RouteTelemetryReconciler::new().viewport(&[], 5_000.0).is_none());
    }
}
