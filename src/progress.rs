//! Planned-route progress estimation.
//!
//! Splits a planned route into a completed and a remaining part around the
//! shipment's current position. The split point is chosen by a nearest-segment
//! heuristic: every consecutive pair of planned points is scored by the
//! distance from the current position to the closer of its two endpoints, and
//! the lowest-scoring segment wins (earliest segment on ties).
//!
//! This is not path-accumulated progress. A track that loops back near an
//! earlier segment can be classified as being on that earlier segment.

use serde::Serialize;

use crate::geo_utils::haversine_distance;
use crate::GeoPoint;

/// Planned route partitioned around the current position.
///
/// When a position is known, `completed` ends with it and `remaining` starts
/// with it, so both halves draw as connected polylines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteProgressSplit {
    pub completed: Vec<GeoPoint>,
    pub remaining: Vec<GeoPoint>,
}

impl RouteProgressSplit {
    /// The "nothing done yet" split: no completed part, the whole plan remaining.
    pub fn untouched(planned: &[GeoPoint]) -> Self {
        Self {
            completed: Vec::new(),
            remaining: planned.to_vec(),
        }
    }
}

/// Index of the planned segment closest to `current`.
///
/// Returns `None` for routes with fewer than two points.
pub fn nearest_segment(planned: &[GeoPoint], current: &GeoPoint) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    for (i, w) in planned.windows(2).enumerate() {
        let score = haversine_distance(current, &w[0]).min(haversine_distance(current, &w[1]));
        // Strict comparison keeps the earliest segment on ties
        match best {
            Some((_, best_score)) if score >= best_score => {}
            _ => best = Some((i, score)),
        }
    }

    best.map(|(i, _)| i)
}

/// Split `planned` at the segment nearest to `current`.
///
/// For the winning segment index `i`:
/// `completed = planned[..=i] + [current]` and
/// `remaining = [current] + planned[i + 1..]`.
pub fn split_route_progress(planned: &[GeoPoint], current: &GeoPoint) -> RouteProgressSplit {
    let Some(i) = nearest_segment(planned, current) else {
        return RouteProgressSplit::untouched(planned);
    };

    let mut completed = Vec::with_capacity(i + 2);
    completed.extend_from_slice(&planned[..=i]);
    completed.push(*current);

    let mut remaining = Vec::with_capacity(planned.len() - i);
    remaining.push(*current);
    remaining.extend_from_slice(&planned[i + 1..]);

    RouteProgressSplit { completed, remaining }
}
