//! Regular latitude/longitude grid descriptions.

use grid_common::BoundingBox;
use tracing::warn;

use crate::error::{GridProcessorError, Result};
use crate::store::GridStore;

/// Coordinate variable names tried, in order, when reading a latitude axis.
pub const LATITUDE_NAMES: [&str; 3] = ["lat", "latitude", "y"];

/// Coordinate variable names tried, in order, when reading a longitude axis.
pub const LONGITUDE_NAMES: [&str; 3] = ["lon", "longitude", "x"];

/// A regular lat/lon grid: extent, spacing and coordinate lists.
///
/// Axes may be ascending or descending; resolutions carry the sign of the
/// axis direction. Built once per dataset and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    bbox: BoundingBox,
    resol_lat: f64,
    resol_lon: f64,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
}

impl GridGeometry {
    /// Build from coordinate arrays. Each axis needs at least two finite values.
    pub fn from_coords(longitudes: Vec<f64>, latitudes: Vec<f64>) -> Result<Self> {
        let resol_lon = axis_resolution("longitude", &longitudes)?;
        let resol_lat = axis_resolution("latitude", &latitudes)?;

        let (min_lon, max_lon) = min_max(&longitudes);
        let (min_lat, max_lat) = min_max(&latitudes);

        Ok(Self {
            bbox: BoundingBox::new(min_lon, min_lat, max_lon, max_lat),
            resol_lat,
            resol_lon,
            latitudes,
            longitudes,
        })
    }

    /// Ascending axes `ll, ll + r, ...` stopping before `ur`.
    pub fn arange(lon_ll: f64, lat_ll: f64, lon_ur: f64, lat_ur: f64, resol: f64) -> Result<Self> {
        if !(resol.is_finite() && resol > 0.0) {
            return Err(GridProcessorError::invalid_region(format!(
                "resolution {resol} must be positive"
            )));
        }
        Self::from_coords(arange(lon_ll, lon_ur, resol), arange(lat_ll, lat_ur, resol))
    }

    /// Read the coordinate axes of a dataset.
    ///
    /// Resolution problems are logged and do not prevent construction.
    pub fn from_store(store: &dyn GridStore, tolerance: f64) -> Result<Self> {
        let latitudes = read_axis(store, &LATITUDE_NAMES)?;
        let longitudes = read_axis(store, &LONGITUDE_NAMES)?;
        let geometry = Self::from_coords(longitudes, latitudes)?;

        if let Err(e) = geometry.check_resolution(tolerance) {
            warn!(
                path = %store.path().display(),
                error = %e,
                "Using latitude resolution as authoritative"
            );
        }
        if let Err(e) = geometry.check_uniform_spacing(tolerance) {
            warn!(path = %store.path().display(), error = %e, "Irregular coordinate spacing");
        }

        Ok(geometry)
    }

    /// Fails when `|resol_lat|` and `|resol_lon|` differ by more than `tolerance`.
    pub fn check_resolution(&self, tolerance: f64) -> Result<()> {
        if (self.resol_lat.abs() - self.resol_lon.abs()).abs() > tolerance {
            return Err(GridProcessorError::InconsistentResolution {
                resol_lat: self.resol_lat,
                resol_lon: self.resol_lon,
            });
        }
        Ok(())
    }

    /// Fails when consecutive coordinates deviate from the mean spacing, or the
    /// axis length disagrees with extent / resolution by more than one cell.
    pub fn check_uniform_spacing(&self, tolerance: f64) -> Result<()> {
        for (name, coords, resol) in [
            ("latitude", &self.latitudes, self.resol_lat),
            ("longitude", &self.longitudes, self.resol_lon),
        ] {
            // relative to the step so fine grids are not held to an absolute bound
            let limit = tolerance.max(resol.abs() * 1e-3);
            if let Some(step) = coords
                .windows(2)
                .map(|w| w[1] - w[0])
                .find(|step| (step - resol).abs() > limit)
            {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "{name} step {step} differs from resolution {resol}"
                )));
            }

            let (lo, hi) = min_max(coords);
            let expected = ((hi - lo) / resol.abs()).round() as i64 + 1;
            if (expected - coords.len() as i64).abs() > 1 {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "{name} axis has {} points, extent implies {expected}",
                    coords.len()
                )));
            }
        }
        Ok(())
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Signed latitude step.
    pub fn resol_lat(&self) -> f64 {
        self.resol_lat
    }

    /// Signed longitude step.
    pub fn resol_lon(&self) -> f64 {
        self.resol_lon
    }

    /// Cell size in degrees. Latitude spacing is authoritative.
    pub fn resolution(&self) -> f64 {
        self.resol_lat.abs()
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    pub fn nlat(&self) -> usize {
        self.latitudes.len()
    }

    pub fn nlon(&self) -> usize {
        self.longitudes.len()
    }

    pub fn cell_count(&self) -> usize {
        self.nlat() * self.nlon()
    }
}

fn axis_resolution(name: &str, coords: &[f64]) -> Result<f64> {
    if coords.len() < 2 {
        return Err(GridProcessorError::invalid_metadata(format!(
            "{name} axis needs at least two points, found {}",
            coords.len()
        )));
    }
    if coords.iter().any(|c| !c.is_finite()) {
        return Err(GridProcessorError::invalid_metadata(format!(
            "{name} axis contains non-finite coordinates"
        )));
    }

    let first = coords[0];
    let last = coords[coords.len() - 1];
    let resol = (last - first) / (coords.len() - 1) as f64;
    if resol == 0.0 {
        return Err(GridProcessorError::invalid_region(format!(
            "{name} axis has zero resolution"
        )));
    }
    Ok(resol)
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// `start, start + step, ...` for values below `stop`.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let n = ((stop - start) / step - 1e-9).ceil().max(0.0) as usize;
    (0..n).map(|i| start + i as f64 * step).collect()
}

fn read_axis(store: &dyn GridStore, names: &[&str]) -> Result<Vec<f64>> {
    for name in names {
        if store.has_variable(name) {
            return store.read_coordinate_axis(name);
        }
    }
    Err(GridProcessorError::VariableNotFound(format!(
        "{} in {}",
        names.join("/"),
        store.path().display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_from_ascending_coords() {
        let grid = GridGeometry::from_coords(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0]).unwrap();
        assert_eq!(grid.bbox(), &BoundingBox::new(0.0, 0.0, 3.0, 2.0));
        assert_eq!(grid.resol_lon(), 1.0);
        assert_eq!(grid.resol_lat(), 1.0);
        assert_eq!(grid.cell_count(), 12);
    }

    #[test]
    fn test_geometry_from_descending_latitudes() {
        let grid = GridGeometry::from_coords(vec![10.0, 10.5, 11.0], vec![50.0, 49.5, 49.0]).unwrap();
        assert_eq!(grid.resol_lat(), -0.5);
        assert_eq!(grid.resolution(), 0.5);
        assert_eq!(grid.bbox().min_lat, 49.0);
        assert_eq!(grid.bbox().max_lat, 50.0);
    }

    #[test]
    fn test_inconsistent_resolution_reported() {
        let grid = GridGeometry::from_coords(vec![0.0, 2.0, 4.0], vec![0.0, 1.0, 2.0]).unwrap();
        assert!(matches!(
            grid.check_resolution(1e-6),
            Err(GridProcessorError::InconsistentResolution { .. })
        ));

        let grid = GridGeometry::from_coords(vec![0.0, 1.0], vec![0.0, 1.0 + 1e-9]).unwrap();
        assert!(grid.check_resolution(1e-6).is_ok());
    }

    #[test]
    fn test_irregular_spacing_detected() {
        let grid = GridGeometry::from_coords(vec![0.0, 1.0, 3.0], vec![0.0, 1.0, 2.0]).unwrap();
        assert!(grid.check_uniform_spacing(1e-6).is_err());

        let grid = GridGeometry::from_coords(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 2.0]).unwrap();
        assert!(grid.check_uniform_spacing(1e-6).is_ok());
    }

    #[test]
    fn test_degenerate_axes_rejected() {
        assert!(GridGeometry::from_coords(vec![0.0], vec![0.0, 1.0]).is_err());
        assert!(GridGeometry::from_coords(vec![1.0, 1.0], vec![0.0, 1.0]).is_err());
        assert!(GridGeometry::from_coords(vec![0.0, f64::NAN], vec![0.0, 1.0]).is_err());
    }

    #[test]
    fn test_arange() {
        assert_eq!(arange(0.0, 1.0, 0.25), vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(arange(1.0, 1.0, 0.25), Vec::<f64>::new());

        // HARMONIE extent at 0.125 degrees
        assert_eq!(arange(-24.9375, 45.0625, 0.125).len(), 560);
        assert_eq!(arange(35.0625, 73.0625, 0.125).len(), 304);
    }
}
