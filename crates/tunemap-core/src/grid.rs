//! Fixed lat/lon grid and the TTL cache of map pins keyed by grid cell.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tunemap_proto::protocol::{Coordinates, PointFeature, ViewportBounds};

/// A cell of the map grid, addressed by `floor(coordinate / cell_size)` on
/// each axis.  Integer indices keep keys stable under float noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub lat: i64,
    pub lon: i64,
}

impl GridCell {
    pub fn containing(at: Coordinates, cell_size: f64) -> Self {
        Self {
            lat: (at.latitude / cell_size).floor() as i64,
            lon: (at.longitude / cell_size).floor() as i64,
        }
    }

    pub fn bounds(&self, cell_size: f64) -> ViewportBounds {
        let south = self.lat as f64 * cell_size;
        let west = self.lon as f64 * cell_size;
        ViewportBounds {
            north: south + cell_size,
            east: west + cell_size,
            south,
            west,
        }
    }
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

/// Every cell that shares area with `bounds`, south-west first, row by row.
/// Empty for a cell size that is not a positive number.
pub fn cells_covering(bounds: &ViewportBounds, cell_size: f64) -> Vec<GridCell> {
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Vec::new();
    }
    let south_west = GridCell::containing(Coordinates::new(bounds.south, bounds.west), cell_size);
    let north_east = GridCell::containing(Coordinates::new(bounds.north, bounds.east), cell_size);

    let mut cells = Vec::new();
    for lat in south_west.lat..=north_east.lat {
        for lon in south_west.lon..=north_east.lon {
            let cell = GridCell { lat, lon };
            // the floored range can include an edge row that only touches the viewport
            if cell.bounds(cell_size).intersects(bounds) {
                cells.push(cell);
            }
        }
    }
    cells
}

struct Entry {
    data: Vec<PointFeature>,
    stored_at: Instant,
}

pub struct GridCache {
    ttl: Duration,
    entries: HashMap<GridCell, Entry>,
}

impl GridCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Cached pins for `cell`, unless older than the TTL.  Expired entries
    /// stay in the map until overwritten.
    pub fn get(&self, cell: &GridCell) -> Option<&[PointFeature]> {
        let entry = self.entries.get(cell)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(&entry.data)
        } else {
            None
        }
    }

    pub fn set(&mut self, cell: GridCell, data: Vec<PointFeature>) {
        self.entries.insert(
            cell,
            Entry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
