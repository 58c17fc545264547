//! Coordinate to cell index mapping with boundary correction.

use serde::Serialize;
use tracing::{debug, warn};

use crate::geometry::GridGeometry;

/// Clamped (row, column) position within a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CellIndex {
    pub lat: usize,
    pub lon: usize,
}

/// Which boundary, if any, an index was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Clamp {
    None,
    Low,
    High,
}

/// Result of mapping one coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedIndex {
    pub index: CellIndex,
    pub lat_clamp: Clamp,
    pub lon_clamp: Clamp,
}

impl MappedIndex {
    pub fn is_clamped(&self) -> bool {
        self.lat_clamp != Clamp::None || self.lon_clamp != Clamp::None
    }
}

/// One out-of-range mapping and the index it would have produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correction {
    pub lat: f64,
    pub lon: f64,
    pub raw_lat_index: i64,
    pub raw_lon_index: i64,
    pub corrected: CellIndex,
}

/// Count of corrections plus the first one seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionLog {
    pub count: usize,
    pub first: Option<Correction>,
}

/// Maps lat/lon pairs onto the cells of one grid.
///
/// Indices are measured from the first coordinate of each axis using the
/// signed resolution, so descending axes map the same way as ascending ones.
#[derive(Debug)]
pub struct IndexMapper<'a> {
    grid: &'a GridGeometry,
    corrections: CorrectionLog,
}

impl<'a> IndexMapper<'a> {
    pub fn new(grid: &'a GridGeometry) -> Self {
        Self {
            grid,
            corrections: CorrectionLog::default(),
        }
    }

    pub fn grid(&self) -> &GridGeometry {
        self.grid
    }

    /// Nearest cell to `(lat, lon)`, clamped into the grid.
    ///
    /// A point exactly halfway between two cells rounds away from zero
    /// (`f64::round`), so 0.5 maps to index 1 and -0.5 to index -1 before clamping.
    pub fn map(&mut self, lat: f64, lon: f64) -> CellIndex {
        self.map_with_clamp(lat, lon).index
    }

    /// As [`map`](Self::map), also reporting which boundaries were applied.
    pub fn map_with_clamp(&mut self, lat: f64, lon: f64) -> MappedIndex {
        let raw_lat = raw_index(lat, self.grid.latitudes()[0], self.grid.resol_lat());
        let raw_lon = raw_index(lon, self.grid.longitudes()[0], self.grid.resol_lon());

        let (lat_index, lat_clamp) = clamp_index(raw_lat, self.grid.nlat() - 1);
        let (lon_index, lon_clamp) = clamp_index(raw_lon, self.grid.nlon() - 1);

        let mapped = MappedIndex {
            index: CellIndex {
                lat: lat_index,
                lon: lon_index,
            },
            lat_clamp,
            lon_clamp,
        };

        if mapped.is_clamped() {
            debug!(
                lat,
                lon,
                raw_lat_index = raw_lat,
                raw_lon_index = raw_lon,
                "Index out of bounds, corrected"
            );
            self.corrections.count += 1;
            self.corrections.first.get_or_insert(Correction {
                lat,
                lon,
                raw_lat_index: raw_lat,
                raw_lon_index: raw_lon,
                corrected: mapped.index,
            });
        }

        mapped
    }

    pub fn corrections(&self) -> &CorrectionLog {
        &self.corrections
    }

    /// Log a summary of corrections made so far and reset the log.
    pub fn flush_corrections(&mut self, context: &str) -> CorrectionLog {
        let log = std::mem::take(&mut self.corrections);
        if let Some(first) = &log.first {
            warn!(
                context,
                count = log.count,
                first_lat = first.lat,
                first_lon = first.lon,
                first_raw_lat_index = first.raw_lat_index,
                first_raw_lon_index = first.raw_lon_index,
                "Corrected out-of-bounds indices"
            );
        }
        log
    }
}

fn raw_index(coord: f64, origin: f64, resol: f64) -> i64 {
    ((coord - origin) / resol).round() as i64
}

fn clamp_index(raw: i64, max_index: usize) -> (usize, Clamp) {
    if raw < 0 {
        (0, Clamp::Low)
    } else if raw as u64 > max_index as u64 {
        (max_index, Clamp::High)
    } else {
        (raw as usize, Clamp::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_4x4() -> GridGeometry {
        GridGeometry::from_coords(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn test_map_inside_grid() {
        let grid = grid_4x4();
        let mut mapper = IndexMapper::new(&grid);

        assert_eq!(mapper.map(0.0, 0.0), CellIndex { lat: 0, lon: 0 });
        assert_eq!(mapper.map(2.4, 0.6), CellIndex { lat: 2, lon: 1 });
        assert_eq!(mapper.map(3.0, 3.0), CellIndex { lat: 3, lon: 3 });
        assert_eq!(mapper.corrections().count, 0);
    }

    #[test]
    fn test_map_clamps_and_records() {
        let grid = grid_4x4();
        let mut mapper = IndexMapper::new(&grid);

        let mapped = mapper.map_with_clamp(-5.0, 10.0);
        assert_eq!(mapped.index, CellIndex { lat: 0, lon: 3 });
        assert_eq!(mapped.lat_clamp, Clamp::Low);
        assert_eq!(mapped.lon_clamp, Clamp::High);

        mapper.map(100.0, 1.0);
        let log = mapper.corrections();
        assert_eq!(log.count, 2);
        let first = log.first.unwrap();
        assert_eq!(first.raw_lat_index, -5);
        assert_eq!(first.raw_lon_index, 10);

        let flushed = mapper.flush_corrections("test");
        assert_eq!(flushed.count, 2);
        assert_eq!(mapper.corrections().count, 0);
    }

    #[test]
    fn test_map_half_cell_rounds_away_from_zero() {
        let grid = grid_4x4();
        let mut mapper = IndexMapper::new(&grid);

        assert_eq!(mapper.map(0.5, 1.5), CellIndex { lat: 1, lon: 2 });
        assert_eq!(mapper.map(2.5, 2.5), CellIndex { lat: 3, lon: 3 });
        assert_eq!(mapper.corrections().count, 0);

        let mapped = mapper.map_with_clamp(-0.5, 0.0);
        assert_eq!(mapped.index, CellIndex { lat: 0, lon: 0 });
        assert_eq!(mapped.lat_clamp, Clamp::Low);
        assert_eq!(mapper.corrections().first.unwrap().raw_lat_index, -1);
    }

    #[test]
    fn test_map_descending_axis() {
        let grid =
            GridGeometry::from_coords(vec![0.0, 1.0, 2.0], vec![3.0, 2.0, 1.0, 0.0]).unwrap();
        let mut mapper = IndexMapper::new(&grid);

        assert_eq!(mapper.map(3.0, 0.0).lat, 0);
        assert_eq!(mapper.map(0.0, 0.0).lat, 3);
        assert_eq!(mapper.map(0.9, 0.0).lat, 2);
    }

    #[test]
    fn test_every_point_maps_inside() {
        let grid = grid_4x4();
        let mut mapper = IndexMapper::new(&grid);

        let mut lat = -2.0;
        while lat <= 6.0 {
            let mut lon = -2.0;
            while lon <= 6.0 {
                let idx = mapper.map(lat, lon);
                assert!(idx.lat < grid.nlat() && idx.lon < grid.nlon());
                lon += 0.37;
            }
            lat += 0.41;
        }
    }
}
