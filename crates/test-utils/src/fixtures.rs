//! Common test fixtures for the reorganisation tests.

/// Common bounding boxes as `(min_lon, min_lat, max_lon, max_lat)`.
pub mod bbox {
    /// Global bounding box
    pub const GLOBAL: (f64, f64, f64, f64) = (-180.0, -90.0, 180.0, 90.0);

    /// Extent of the HARMONIE clone grid at 0.125 degrees
    pub const HARMONIE: (f64, f64, f64, f64) = (-24.9375, 35.0625, 44.9375, 72.9375);

    /// Extent of the ECLIPS template grid (Ireland and Britain)
    pub const ECLIPS: (f64, f64, f64, f64) = (-10.5, 51.4, -5.4, 55.4);

    /// Single point (degenerate bbox)
    pub const POINT: (f64, f64, f64, f64) = (0.0, 0.0, 0.0, 0.0);
}

/// Common grid specifications.
pub mod grid {
    /// Regular grid given by its first coordinates, step and size.
    #[derive(Debug, Clone, Copy)]
    pub struct GridSpec {
        pub nlon: usize,
        pub nlat: usize,
        pub lon0: f64,
        pub lat0: f64,
        pub resol: f64,
    }

    impl GridSpec {
        /// Returns the total number of grid cells.
        pub fn size(&self) -> usize {
            self.nlon * self.nlat
        }

        pub fn longitudes(&self) -> Vec<f64> {
            crate::axis(self.lon0, self.resol, self.nlon)
        }

        pub fn latitudes(&self) -> Vec<f64> {
            crate::axis(self.lat0, self.resol, self.nlat)
        }

        /// Bounding box of the cell centres.
        pub fn bbox(&self) -> (f64, f64, f64, f64) {
            (
                self.lon0,
                self.lat0,
                self.lon0 + (self.nlon - 1) as f64 * self.resol,
                self.lat0 + (self.nlat - 1) as f64 * self.resol,
            )
        }
    }

    /// 4x4 source grid at 1 degree, bbox (0, 0, 3, 3)
    pub const SOURCE_4X4: GridSpec = GridSpec {
        nlon: 4,
        nlat: 4,
        lon0: 0.0,
        lat0: 0.0,
        resol: 1.0,
    };

    /// 2x2 target grid at 2 degrees with centres at 1 and 3
    pub const TARGET_2X2: GridSpec = GridSpec {
        nlon: 2,
        nlat: 2,
        lon0: 1.0,
        lat0: 1.0,
        resol: 2.0,
    };

    /// HARMONIE clone grid
    pub const HARMONIE: GridSpec = GridSpec {
        nlon: 560,
        nlat: 304,
        lon0: -24.9375,
        lat0: 35.0625,
        resol: 0.125,
    };
}

/// Decade codes and year spans.
pub mod periods {
    /// First year of the target time axis
    pub const DATA_START_YEAR: i32 = 1961;

    /// Last year of the target time axis
    pub const DATA_END_YEAR: i32 = 2100;

    pub const HISTORIC: [&str; 2] = ["196190", "199110"];

    pub const FUTURE: [&str; 3] = ["201140", "204170", "207100"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_spec_size() {
        assert_eq!(grid::HARMONIE.size(), 560 * 304);
        assert_eq!(grid::TARGET_2X2.size(), 4);
    }

    #[test]
    fn test_grid_spec_coords() {
        assert_eq!(grid::TARGET_2X2.longitudes(), vec![1.0, 3.0]);
        assert_eq!(grid::SOURCE_4X4.bbox(), (0.0, 0.0, 3.0, 3.0));

        let (min_lon, min_lat, max_lon, max_lat) = grid::HARMONIE.bbox();
        assert_eq!((min_lon, min_lat), (bbox::HARMONIE.0, bbox::HARMONIE.1));
        assert!((max_lon - bbox::HARMONIE.2).abs() < 1e-9);
        assert!((max_lat - bbox::HARMONIE.3).abs() < 1e-9);
    }
}
