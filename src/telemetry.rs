//! Telemetry time series.
//!
//! Sensor readings arrive as `(timestamp, value)` samples grouped by metric
//! name. [`MetricSeries`] keeps one insertion-ordered stream per metric and
//! drops any sample whose timestamp is already present in that stream, so
//! re-delivered feed messages never double up on a chart.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Well-known metric names produced by the record adapters.
pub mod metric {
    pub const TEMPERATURE: &str = "temperature";
    pub const HUMIDITY: &str = "humidity";
    pub const BATTERY: &str = "battery";
    pub const SPEED: &str = "speed";

    /// All metrics the adapters know how to extract, in chart order.
    pub const ALL: [&str; 4] = [TEMPERATURE, HUMIDITY, BATTERY, SPEED];
}

// Integers below this are taken as epoch seconds, above as epoch millis.
// 1e11 seconds is the year 5138; 1e11 millis is early 1973.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// Opaque, comparable sample timestamp (milliseconds since the Unix epoch).
///
/// Serializes as integer millis. Deserializes from anything
/// [`Timestamp::from_json`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Build from an integer that may be epoch seconds or epoch millis.
    pub fn from_epoch(value: i64) -> Self {
        if (-SECONDS_CUTOFF..SECONDS_CUTOFF).contains(&value) {
            Self(value * 1000)
        } else {
            Self(value)
        }
    }

    /// Build from a possibly fractional epoch value, keeping sub-second
    /// precision when it is in seconds. Out-of-range values saturate.
    pub fn from_epoch_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        if value.abs() < SECONDS_CUTOFF as f64 {
            Some(Self((value * 1000.0).round() as i64))
        } else {
            Some(Self(value.round() as i64))
        }
    }

    /// Parse an RFC 3339 date-time or a numeric epoch string.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(epoch) = raw.parse::<i64>() {
            return Some(Self::from_epoch(epoch));
        }
        if let Ok(epoch) = raw.parse::<f64>() {
            return Self::from_epoch_f64(epoch);
        }
        match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(Self(dt.timestamp_millis())),
            Err(e) => {
                debug!("[Timestamp] Unparseable timestamp '{}': {}", raw, e);
                None
            }
        }
    }

    /// Extract a timestamp from a loosely-typed JSON value.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::from_epoch(i)),
                None => n.as_f64().and_then(Self::from_epoch_f64),
            },
            serde_json::Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Timestamp::from_json(&raw)
            .ok_or_else(|| de::Error::custom(format!("expected epoch number or RFC 3339 string, got {}", raw)))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

/// One reading of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl MetricSample {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Summary of one metric stream, for chart headers and list badges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    /// Value of the most recently inserted sample
    pub latest: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
struct Stream {
    samples: Vec<MetricSample>,
    seen: HashSet<Timestamp>,
}

/// Per-metric time series, insertion-ordered, deduplicated by timestamp.
#[derive(Debug, Clone, Default)]
pub struct MetricSeries {
    streams: IndexMap<String, Stream>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from a batch, applying the same dedup as [`insert`](Self::insert).
    pub fn from_samples<I, S>(batch: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<MetricSample>)>,
        S: Into<String>,
    {
        let mut series = Self::new();
        for (name, samples) in batch {
            let name = name.into();
            for sample in samples {
                series.insert(&name, sample);
            }
        }
        series
    }

    /// Append a sample to `metric` unless one with the same timestamp exists.
    ///
    /// Returns `true` if the sample was stored. Non-finite values are dropped.
    pub fn insert(&mut self, metric: &str, sample: MetricSample) -> bool {
        if !sample.value.is_finite() {
            warn!(
                "[MetricSeries] Dropping non-finite {} sample at {}",
                metric,
                sample.timestamp.as_millis()
            );
            return false;
        }

        let stream = self.streams.entry(metric.to_string()).or_default();
        if !stream.seen.insert(sample.timestamp) {
            debug!(
                "[MetricSeries] Duplicate {} sample at {} ignored",
                metric,
                sample.timestamp.as_millis()
            );
            return false;
        }
        stream.samples.push(sample);
        true
    }

    /// Samples of one metric in insertion order (empty if unknown).
    pub fn get(&self, metric: &str) -> &[MetricSample] {
        self.streams
            .get(metric)
            .map(|s| s.samples.as_slice())
            .unwrap_or(&[])
    }

    /// Metric names in first-seen order.
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MetricSample])> {
        self.streams
            .iter()
            .map(|(name, s)| (name.as_str(), s.samples.as_slice()))
    }

    /// Number of metric streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Total samples across all metrics.
    pub fn sample_count(&self) -> usize {
        self.streams.values().map(|s| s.samples.len()).sum()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }

    pub fn summary(&self, metric: &str) -> Option<MetricSummary> {
        let samples = self.get(metric);
        let latest = samples.last()?.value;

        let (min, max) = samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
            (lo.min(s.value), hi.max(s.value))
        });

        Some(MetricSummary { latest, min, max, count: samples.len() })
    }
}
