//! Normalization of loosely-shaped backend payloads.
//!
//! Historical tracker records and live feed messages come from several
//! sources that disagree on field names (`lat` vs `latitude` vs `Latitude`)
//! and on types (numbers vs numeric strings). Everything is deserialized into
//! permissive structs here and converted into the reconciler's typed inputs.
//! A field that cannot be read as a finite number counts as absent.

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::reconciler::LiveEvent;
use crate::telemetry::{metric, MetricSample, Timestamp};
use crate::GeoPoint;

// Accepted names per field, most specific first
const TIMESTAMP_KEYS: [&str; 6] = ["timestamp", "time", "ts", "createdAt", "created_at", "Timestamp"];
const LATITUDE_KEYS: [&str; 3] = ["latitude", "lat", "Latitude"];
const LONGITUDE_KEYS: [&str; 5] = ["longitude", "lng", "lon", "long", "Longitude"];
const TEMPERATURE_KEYS: [&str; 3] = ["temperature", "temp", "Temperature"];
const HUMIDITY_KEYS: [&str; 2] = ["humidity", "Humidity"];
const BATTERY_KEYS: [&str; 4] = ["battery", "Battery", "batteryLevel", "battery_level"];
const SPEED_KEYS: [&str; 2] = ["speed", "Speed"];
const ID_KEYS: [&str; 8] = [
    "trackerId", "tracker_id", "shipmentId", "shipment_id", "deviceId", "device_id", "id", "_id",
];
const OPERATION_KEYS: [&str; 3] = ["operation", "operationType", "op"];
const GEOLOCATION_KEYS: [&str; 3] = ["geolocation", "location", "position"];
const METRICS_KEYS: [&str; 3] = ["metrics", "telemetry", "sensors"];

/// Read a JSON value as a finite `f64`. Numeric strings are accepted.
pub fn lenient_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

fn point_from_values(lat: Option<&Value>, lng: Option<&Value>) -> Option<GeoPoint> {
    let point = GeoPoint::new(lenient_number(lat?)?, lenient_number(lng?)?);
    if point.is_valid() {
        Some(point)
    } else {
        debug!("[Records] Out-of-range position ({}, {})", point.latitude, point.longitude);
        None
    }
}

/// Value of the first listed key that is present and not null.
fn first_key<'a>(map: &'a IndexMap<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Historical records
// =============================================================================

/// One historical tracker record as returned by the data service.
///
/// Built from the raw JSON object. When a record carries several names for
/// one field (`timestamp` and `createdAt`), the first name in the accepted
/// list wins and the others are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, Value>")]
pub struct HistoricalRecord {
    pub timestamp: Option<Value>,
    pub latitude: Option<Value>,
    pub longitude: Option<Value>,
    pub temperature: Option<Value>,
    pub humidity: Option<Value>,
    pub battery: Option<Value>,
    pub speed: Option<Value>,
}

impl From<IndexMap<String, Value>> for HistoricalRecord {
    fn from(raw: IndexMap<String, Value>) -> Self {
        Self {
            timestamp: first_key(&raw, &TIMESTAMP_KEYS).cloned(),
            latitude: first_key(&raw, &LATITUDE_KEYS).cloned(),
            longitude: first_key(&raw, &LONGITUDE_KEYS).cloned(),
            temperature: first_key(&raw, &TEMPERATURE_KEYS).cloned(),
            humidity: first_key(&raw, &HUMIDITY_KEYS).cloned(),
            battery: first_key(&raw, &BATTERY_KEYS).cloned(),
            speed: first_key(&raw, &SPEED_KEYS).cloned(),
        }
    }
}

impl HistoricalRecord {
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp.as_ref().and_then(Timestamp::from_json)
    }

    /// Position if both coordinates are present, numeric and in range.
    pub fn position(&self) -> Option<GeoPoint> {
        point_from_values(self.latitude.as_ref(), self.longitude.as_ref())
    }

    /// Numeric value of one of the well-known metrics.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let raw = match name {
            metric::TEMPERATURE => self.temperature.as_ref(),
            metric::HUMIDITY => self.humidity.as_ref(),
            metric::BATTERY => self.battery.as_ref(),
            metric::SPEED => self.speed.as_ref(),
            _ => None,
        };
        raw.and_then(lenient_number)
    }
}

/// Historical records converted into reconciler inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalBatch {
    pub points: Vec<GeoPoint>,
    pub samples: IndexMap<String, Vec<MetricSample>>,
}

/// Convert records (in the order given) into a track and metric samples.
///
/// Records without a usable timestamp still contribute their position but
/// no metric samples.
pub fn normalize_history(records: &[HistoricalRecord]) -> HistoricalBatch {
    let mut batch = HistoricalBatch::default();
    let mut untimed = 0usize;

    for record in records {
        if let Some(point) = record.position() {
            batch.points.push(point);
        }

        let Some(ts) = record.timestamp() else {
            untimed += 1;
            continue;
        };

        for name in metric::ALL {
            if let Some(value) = record.metric(name) {
                batch
                    .samples
                    .entry(name.to_string())
                    .or_default()
                    .push(MetricSample::new(ts, value));
            }
        }
    }

    if untimed > 0 {
        warn!("[Records] {} of {} historical records had no usable timestamp", untimed, records.len());
    }
    debug!(
        "[Records] Normalized {} records into {} points and {} metrics",
        records.len(),
        batch.points.len(),
        batch.samples.len()
    );

    batch
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryEnvelope {
    List(Vec<HistoricalRecord>),
    Wrapped {
        #[serde(alias = "records", alias = "items")]
        data: Vec<HistoricalRecord>,
    },
}

/// Parse a history response body: either a bare array or an object wrapping
/// the array under `data`, `records` or `items`.
pub fn parse_history(bytes: &[u8]) -> Result<Vec<HistoricalRecord>> {
    let envelope: HistoryEnvelope = serde_json::from_slice(bytes)?;
    Ok(match envelope {
        HistoryEnvelope::List(records) => records,
        HistoryEnvelope::Wrapped { data } => data,
    })
}

// =============================================================================
// Live feed messages
// =============================================================================

/// Kind of change a feed message reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    Insert,
    #[default]
    Update,
    Replace,
    Delete,
    Other(String),
}

impl From<String> for OperationKind {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "insert" | "create" | "created" => OperationKind::Insert,
            "update" | "updated" => OperationKind::Update,
            "replace" => OperationKind::Replace,
            "delete" | "deleted" | "remove" => OperationKind::Delete,
            _ => OperationKind::Other(raw),
        }
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Insert => "insert".to_string(),
            OperationKind::Update => "update".to_string(),
            OperationKind::Replace => "replace".to_string(),
            OperationKind::Delete => "delete".to_string(),
            OperationKind::Other(raw) => raw,
        }
    }
}

/// Position payload of a feed message: GeoJSON point or a lat/lng object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, try_from = "IndexMap<String, Value>")]
pub enum Geolocation {
    /// GeoJSON order: `[longitude, latitude]`
    GeoJson { coordinates: Vec<Value> },
    LatLng {
        latitude: Option<Value>,
        longitude: Option<Value>,
    },
}

impl TryFrom<IndexMap<String, Value>> for Geolocation {
    type Error = String;

    fn try_from(raw: IndexMap<String, Value>) -> std::result::Result<Self, Self::Error> {
        if let Some(Value::Array(coordinates)) = raw.get("coordinates") {
            return Ok(Geolocation::GeoJson { coordinates: coordinates.clone() });
        }

        let latitude = first_key(&raw, &LATITUDE_KEYS).cloned();
        let longitude = first_key(&raw, &LONGITUDE_KEYS).cloned();
        if latitude.is_none() && longitude.is_none() {
            return Err("location has neither coordinates nor latitude/longitude".to_string());
        }
        Ok(Geolocation::LatLng { latitude, longitude })
    }
}

impl Geolocation {
    pub fn to_point(&self) -> Option<GeoPoint> {
        match self {
            Geolocation::GeoJson { coordinates } => {
                point_from_values(coordinates.get(1), coordinates.first())
            }
            Geolocation::LatLng { latitude, longitude } => {
                point_from_values(latitude.as_ref(), longitude.as_ref())
            }
        }
    }
}

/// One raw message from the live telemetry feed.
///
/// Built from the raw JSON object. Only a missing id rejects the message;
/// any other field that cannot be read is treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, Value>")]
pub struct FeedMessage {
    pub operation: OperationKind,
    pub id: String,
    pub geolocation: Option<Geolocation>,
    pub metrics: Option<IndexMap<String, Value>>,
    pub timestamp: Option<Value>,
}

impl TryFrom<IndexMap<String, Value>> for FeedMessage {
    type Error = String;

    fn try_from(raw: IndexMap<String, Value>) -> std::result::Result<Self, Self::Error> {
        let id = ID_KEYS
            .iter()
            .filter_map(|k| raw.get(*k))
            .find_map(id_string)
            .ok_or_else(|| "feed message has no tracker or shipment id".to_string())?;

        let operation = match first_key(&raw, &OPERATION_KEYS) {
            Some(Value::String(op)) => OperationKind::from(op.clone()),
            _ => OperationKind::default(),
        };

        let geolocation = first_key(&raw, &GEOLOCATION_KEYS).and_then(|v| {
            serde_json::from_value::<Geolocation>(v.clone())
                .map_err(|e| debug!("[Feed {}] Ignoring unreadable location: {}", id, e))
                .ok()
        });

        let metrics = match first_key(&raw, &METRICS_KEYS) {
            Some(Value::Object(record)) => Some(
                record
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<IndexMap<String, Value>>(),
            ),
            Some(other) => {
                debug!("[Feed {}] Ignoring non-object metric record: {}", id, other);
                None
            }
            None => None,
        };

        Ok(Self {
            operation,
            id,
            geolocation,
            metrics,
            timestamp: first_key(&raw, &TIMESTAMP_KEYS).cloned(),
        })
    }
}

impl FeedMessage {
    /// Parse one JSON feed message.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Convert into a [`LiveEvent`].
    ///
    /// Returns `None` for deletes and for messages with neither a position
    /// nor any metric. Position and metric fields are also looked up inside
    /// the metric record when the top-level fields are absent. Without a
    /// usable timestamp the position is kept but metrics are dropped, since
    /// they could not be deduplicated.
    pub fn to_live_event(&self) -> Option<LiveEvent> {
        if self.operation == OperationKind::Delete {
            return None;
        }

        let record = self.metrics.as_ref();

        let timestamp = self
            .timestamp
            .as_ref()
            .or_else(|| record.and_then(|m| first_key(m, &TIMESTAMP_KEYS)))
            .and_then(Timestamp::from_json);

        let position = match &self.geolocation {
            Some(geo) => geo.to_point(),
            None => record.and_then(|m| {
                point_from_values(first_key(m, &LATITUDE_KEYS), first_key(m, &LONGITUDE_KEYS))
            }),
        };

        let mut metrics = IndexMap::new();
        if let Some(record) = record {
            // Identifiers and position/time fields are never telemetry
            let reserved: Vec<&str> = TIMESTAMP_KEYS
                .iter()
                .chain(&LATITUDE_KEYS)
                .chain(&LONGITUDE_KEYS)
                .chain(&ID_KEYS)
                .chain(&OPERATION_KEYS)
                .copied()
                .collect();

            for (name, raw) in record {
                if reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                    continue;
                }
                match lenient_number(raw) {
                    Some(value) => {
                        metrics.insert(name.to_ascii_lowercase(), value);
                    }
                    None => debug!("[Feed {}] Dropping non-numeric {} = {}", self.id, name, raw),
                }
            }
        }

        if timestamp.is_none() && !metrics.is_empty() {
            warn!(
                "[Feed {}] No usable timestamp, dropping {} metric values",
                self.id,
                metrics.len()
            );
            metrics.clear();
        }

        if position.is_none() && metrics.is_empty() {
            return None;
        }

        Some(LiveEvent {
            timestamp: timestamp.unwrap_or_else(|| Timestamp::from(Utc::now())),
            position,
            metrics: (!metrics.is_empty()).then_some(metrics),
        })
    }
}
