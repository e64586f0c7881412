//! Shipment and tracker models as served by the shipment data service.
//!
//! A shipment runs from an origin through optional intermediate stops to a
//! destination. Each consecutive pair of locations is a [`Leg`]; the resolved
//! coordinates of all locations, in order, form the planned route that
//! progress is measured against.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::telemetry::Timestamp;
use crate::GeoPoint;

/// Lifecycle state of a shipment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    #[default]
    Planned,
    InTransit,
    Delivered,
    Cancelled,
}

/// An address with its geocoded coordinates, if resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    #[serde(default)]
    pub point: Option<GeoPoint>,
}

impl Location {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), point: None }
    }

    pub fn resolved(address: impl Into<String>, point: GeoPoint) -> Self {
        Self { address: address.into(), point: Some(point) }
    }
}

/// One origin-to-stop (or stop-to-stop, stop-to-destination) segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg<'a> {
    pub from: &'a Location,
    pub to: &'a Location,
}

/// A shipment as listed by the data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: ShipmentStatus,
    #[serde(default)]
    pub tracker_id: Option<String>,
    pub origin: Location,
    pub destination: Location,
    #[serde(default)]
    pub stops: Vec<Location>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl Shipment {
    /// Origin, stops and destination in travel order.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        std::iter::once(&self.origin)
            .chain(self.stops.iter())
            .chain(std::iter::once(&self.destination))
    }

    /// Consecutive location pairs.
    pub fn legs(&self) -> Vec<Leg<'_>> {
        let locations: Vec<&Location> = self.locations().collect();
        locations
            .windows(2)
            .map(|w| Leg { from: w[0], to: w[1] })
            .collect()
    }

    /// Coordinates of all resolved locations, in travel order.
    ///
    /// Unresolved locations are skipped, so the result may be shorter than
    /// the number of locations (and shorter than 2).
    pub fn planned_route(&self) -> Vec<GeoPoint> {
        self.locations().filter_map(|l| l.point).collect()
    }

    /// Addresses that still need geocoding.
    pub fn unresolved_addresses(&self) -> Vec<&str> {
        self.locations()
            .filter(|l| l.point.is_none())
            .map(|l| l.address.as_str())
            .collect()
    }
}

/// Payload for creating a shipment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShipment {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<String>,
    pub origin: Location,
    pub destination: Location,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stops: Vec<Location>,
}

impl NewShipment {
    /// Check the fields the create form requires.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TrackerError::InvalidShipment("name is required".to_string()));
        }
        if self.origin.address.trim().is_empty() {
            return Err(TrackerError::InvalidShipment("origin address is required".to_string()));
        }
        if self.destination.address.trim().is_empty() {
            return Err(TrackerError::InvalidShipment("destination address is required".to_string()));
        }
        if let Some(i) = self.stops.iter().position(|s| s.address.trim().is_empty()) {
            return Err(TrackerError::InvalidShipment(format!("stop {} has no address", i + 1)));
        }
        for location in std::iter::once(&self.origin)
            .chain(self.stops.iter())
            .chain(std::iter::once(&self.destination))
        {
            if let Some(p) = location.point {
                if !p.is_valid() {
                    return Err(TrackerError::InvalidShipment(format!(
                        "invalid coordinates for '{}'",
                        location.address
                    )));
                }
            }
        }
        Ok(())
    }
}

/// An IoT tracker registered with the data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracker {
    #[serde(alias = "_id", alias = "trackerId")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub battery: Option<f64>,
    #[serde(default)]
    pub last_seen: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shipment() -> Shipment {
        Shipment {
            id: "s-1".to_string(),
            name: "Vaccines".to_string(),
            status: ShipmentStatus::InTransit,
            tracker_id: Some("t-1".to_string()),
            origin: Location::resolved("Hamburg", GeoPoint::new(53.55, 9.99)),
            destination: Location::resolved("Munich", GeoPoint::new(48.14, 11.58)),
            stops: vec![
                Location::resolved("Hanover", GeoPoint::new(52.37, 9.73)),
                Location::new("Kassel"),
            ],
            created_at: None,
        }
    }

    #[test]
    fn test_planned_route_order() {
        let route = shipment().planned_route();
        assert_eq!(
            route,
            vec![
                GeoPoint::new(53.55, 9.99),
                GeoPoint::new(52.37, 9.73),
                GeoPoint::new(48.14, 11.58),
            ]
        );
    }

    #[test]
    fn test_legs_and_unresolved() {
        let s = shipment();
        let legs = s.legs();
        assert_eq!(legs.len(), 3);
        assert_eq!(legs[0].from.address, "Hamburg");
        assert_eq!(legs[2].to.address, "Munich");
        assert_eq!(s.unresolved_addresses(), vec!["Kassel"]);
    }

    #[test]
    fn test_shipment_deserialize() {
        let s: Shipment = serde_json::from_value(json!({
            "_id": "abc",
            "name": "Flowers",
            "status": "delivered",
            "origin": { "address": "Amsterdam", "point": { "latitude": 52.37, "longitude": 4.9 } },
            "destination": { "address": "Berlin" }
        }))
        .unwrap();
        assert_eq!(s.id, "abc");
        assert_eq!(s.status, ShipmentStatus::Delivered);
        assert!(s.stops.is_empty());
        assert_eq!(s.planned_route().len(), 1);
    }

    #[test]
    fn test_created_at_and_last_seen_accept_rfc3339_and_seconds() {
        let base = json!({
            "id": "s-2",
            "name": "Flowers",
            "origin": { "address": "Amsterdam" },
            "destination": { "address": "Berlin" }
        });
        let expected = Some(Timestamp(1_709_294_400_000));

        for created_at in [json!("2024-03-01T12:00:00Z"), json!(1_709_294_400), json!(1_709_294_400_000_i64)] {
            let mut raw = base.clone();
            raw["createdAt"] = created_at;
            let s: Shipment = serde_json::from_value(raw).unwrap();
            assert_eq!(s.created_at, expected);
        }

        let tracker: Tracker = serde_json::from_value(json!({
            "trackerId": "t-9", "lastSeen": "2024-03-01T13:00:00+01:00"
        }))
        .unwrap();
        assert_eq!(tracker.last_seen, expected);

        let tracker: Tracker = serde_json::from_value(json!({ "id": "t-9", "lastSeen": 1_709_294_400.5 })).unwrap();
        assert_eq!(tracker.last_seen, Some(Timestamp(1_709_294_400_500)));
    }

    #[test]
    fn test_new_shipment_validation() {
        let mut new = NewShipment {
            name: "Parts".to_string(),
            tracker_id: None,
            origin: Location::new("Lyon"),
            destination: Location::new("Turin"),
            stops: vec![],
        };
        assert!(new.validate().is_ok());

        new.stops.push(Location::new("  "));
        assert!(matches!(new.validate(), Err(TrackerError::InvalidShipment(_))));

        new.stops.clear();
        new.origin.point = Some(GeoPoint::new(120.0, 0.0));
        assert!(new.validate().is_err());

        new.origin.point = None;
        new.name = String::new();
        assert!(new.validate().is_err());
    }
}
