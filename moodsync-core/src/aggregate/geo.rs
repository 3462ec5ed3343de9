use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{Coordinate, MoodEntry};

/// Deepest zoom honored; finer levels reuse its cell size.
pub const MAX_ZOOM: u8 = 24;

/// Geographic rectangle in degrees. Does not wrap the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        (self.south..=self.north).contains(&c.latitude)
            && (self.west..=self.east).contains(&c.longitude)
    }
}

/// Entries that fell into one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoCluster {
    pub centroid: Coordinate,
    pub count: usize,
    /// Distance from the centroid to the farthest member.
    pub radius_m: f64,
}

/// Grid cell edge in degrees: the whole globe at zoom 0, halving per level.
pub fn cell_size_degrees(zoom: u8) -> f64 {
    360.0 / f64::from(1u32 << zoom.min(MAX_ZOOM))
}

fn cell_of(c: &Coordinate, cell: f64) -> (i64, i64) {
    (
        ((c.latitude + 90.0) / cell).floor() as i64,
        ((c.longitude + 180.0) / cell).floor() as i64,
    )
}

/// Bucket the geo-tagged entries inside `bbox` into grid cells.
///
/// Output is ordered by cell, so repeated calls over the same entries
/// return identical results.
pub fn cluster<'a>(
    entries: impl IntoIterator<Item = &'a MoodEntry>,
    bbox: &BoundingBox,
    zoom: u8,
) -> Vec<GeoCluster> {
    let cell = cell_size_degrees(zoom);
    let mut cells: BTreeMap<(i64, i64), Vec<Coordinate>> = BTreeMap::new();
    for entry in entries {
        let Some(c) = entry.coordinate.filter(|c| c.is_valid()) else {
            continue;
        };
        if entry.deleted || !bbox.contains(&c) {
            continue;
        }
        cells.entry(cell_of(&c, cell)).or_default().push(c);
    }

    cells
        .into_values()
        .map(|members| {
            let n = members.len() as f64;
            let centroid = Coordinate::new(
                members.iter().map(|c| c.latitude).sum::<f64>() / n,
                members.iter().map(|c| c.longitude).sum::<f64>() / n,
            );
            let radius_m = members
                .iter()
                .map(|c| centroid.distance_m(c))
                .fold(0.0, f64::max);
            GeoCluster {
                centroid,
                count: members.len(),
                radius_m,
            }
        })
        .collect()
}
