//! Geographic area of lat/lon bounding boxes.
//!
//! Uses the exact area of a graticule quadrilateral on a sphere:
//! `R² · Δλ · |sin φ₂ − sin φ₁|`. Cells shrink toward the poles, so per-cell
//! quantities must be normalised row by row.

use crate::bbox::BoundingBox;

/// Mean Earth radius (IUGG), kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Hectares per square kilometre.
pub const KM2_TO_HECTARES: f64 = 100.0;

/// Area calculator on a sphere of fixed radius.
#[derive(Debug, Clone, Copy)]
pub struct AreaEstimator {
    radius_km: f64,
}

impl Default for AreaEstimator {
    fn default() -> Self {
        Self {
            radius_km: EARTH_RADIUS_KM,
        }
    }
}

impl AreaEstimator {
    pub fn with_radius(radius_km: f64) -> Self {
        Self { radius_km }
    }

    /// Area of `bbox` in km². Degenerate boxes have zero area.
    pub fn area_km2(&self, bbox: &BoundingBox) -> f64 {
        let d_lon = bbox.width().abs().to_radians();
        let lat_lo = bbox.min_lat.clamp(-90.0, 90.0).to_radians();
        let lat_hi = bbox.max_lat.clamp(-90.0, 90.0).to_radians();

        self.radius_km * self.radius_km * d_lon * (lat_hi.sin() - lat_lo.sin()).abs()
    }

    /// Area in hectares.
    pub fn area_hectares(&self, bbox: &BoundingBox) -> f64 {
        self.area_km2(bbox) * KM2_TO_HECTARES
    }

    /// Area in hectares of the cell centred on `lat` spanning `min_lon..max_lon`.
    ///
    /// All cells of a regular grid row share this value.
    pub fn row_cell_hectares(&self, lat: f64, min_lon: f64, max_lon: f64, resol: f64) -> f64 {
        let half = resol / 2.0;
        self.area_hectares(&BoundingBox::new(min_lon, lat - half, max_lon, lat + half))
    }
}

/// Area of `bbox` in km² on the mean Earth sphere.
pub fn area_km2(bbox: &BoundingBox) -> f64 {
    AreaEstimator::default().area_km2(bbox)
}

/// Convert an absolute per-cell quantity to a per-hectare density.
///
/// Returns `None` when the area is not a positive finite number.
pub fn density_per_hectare(value: f64, area_km2: f64) -> Option<f64> {
    let hectares = area_km2 * KM2_TO_HECTARES;
    (hectares.is_finite() && hectares > 0.0).then(|| value / hectares)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_cell_at_equator() {
        // roughly 111.2 km on a side
        let area = area_km2(&BoundingBox::new(0.0, -0.5, 1.0, 0.5));
        assert!((area - 12_364.0).abs() < 10.0, "area = {area}");
    }

    #[test]
    fn test_area_shrinks_toward_poles() {
        let equator = area_km2(&BoundingBox::new(10.0, 0.0, 11.0, 1.0));
        let mid = area_km2(&BoundingBox::new(10.0, 45.0, 11.0, 46.0));
        let south = area_km2(&BoundingBox::new(10.0, -46.0, 11.0, -45.0));
        let polar = area_km2(&BoundingBox::new(10.0, 89.0, 11.0, 90.0));

        assert!(equator > mid);
        assert!(mid > polar);
        assert!((mid - south).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_box_has_no_area() {
        assert_eq!(area_km2(&BoundingBox::new(5.0, 5.0, 5.0, 6.0)), 0.0);
        assert_eq!(density_per_hectare(10.0, 0.0), None);
    }

    #[test]
    fn test_density_per_hectare() {
        let estimator = AreaEstimator::default();
        let bbox = BoundingBox::new(0.0, 50.0, 0.5, 50.5);
        let km2 = estimator.area_km2(&bbox);

        let density = density_per_hectare(1000.0, km2).unwrap();
        assert!((density * estimator.area_hectares(&bbox) - 1000.0).abs() < 1e-9);
        assert!(
            (estimator.row_cell_hectares(50.25, 0.0, 0.5, 0.5) - estimator.area_hectares(&bbox))
                .abs()
                < 1e-9
        );
    }
}
