//! Core types for grid processing.

use serde::{Deserialize, Serialize};

use crate::error::{GridProcessorError, Result};

/// A single cell as seen through the storage boundary.
///
/// Stores decide what counts as missing (fill value, NaN, declared missing
/// marker); everything downstream only sees these three cases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// No data, e.g. an ocean cell of a land-only metric.
    Missing,
    /// A finite number.
    Value(f64),
    /// Neither a finite number nor a recognised missing marker.
    Malformed,
}

impl CellValue {
    /// Classify a raw value. NaN and the declared missing marker are missing,
    /// infinities are malformed.
    pub fn from_raw(raw: f64, missing_marker: Option<f64>) -> Self {
        if raw.is_nan() {
            return CellValue::Missing;
        }
        if let Some(marker) = missing_marker {
            if raw == marker || (raw as f32) == (marker as f32) {
                return CellValue::Missing;
            }
        }
        if raw.is_finite() {
            CellValue::Value(raw)
        } else {
            CellValue::Malformed
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            CellValue::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    /// Encoding used by NaN-filled float arrays.
    pub fn to_f32(&self) -> f32 {
        match self {
            CellValue::Value(v) => *v as f32,
            _ => f32::NAN,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            CellValue::Value(v) => *v,
            _ => f64::NAN,
        }
    }
}

impl From<Option<f64>> for CellValue {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) => CellValue::from_raw(v, None),
            None => CellValue::Missing,
        }
    }
}

/// A 2-D (lat, lon) layer held in memory, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSlice {
    nlat: usize,
    nlon: usize,
    values: Vec<CellValue>,
}

impl GridSlice {
    /// A layer with every cell missing.
    pub fn missing(nlat: usize, nlon: usize) -> Self {
        Self {
            nlat,
            nlon,
            values: vec![CellValue::Missing; nlat * nlon],
        }
    }

    pub fn from_values(nlat: usize, nlon: usize, values: Vec<CellValue>) -> Result<Self> {
        if values.len() != nlat * nlon {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{} values for a {}x{} layer",
                values.len(),
                nlat,
                nlon
            )));
        }
        Ok(Self { nlat, nlon, values })
    }

    pub fn nlat(&self) -> usize {
        self.nlat
    }

    pub fn nlon(&self) -> usize {
        self.nlon
    }

    pub fn get(&self, lat_index: usize, lon_index: usize) -> Option<CellValue> {
        if lat_index >= self.nlat || lon_index >= self.nlon {
            return None;
        }
        self.values.get(lat_index * self.nlon + lon_index).copied()
    }

    pub fn set(&mut self, lat_index: usize, lon_index: usize, value: CellValue) -> Result<()> {
        if lat_index >= self.nlat || lon_index >= self.nlon {
            return Err(GridProcessorError::shape_mismatch(format!(
                "cell ({lat_index}, {lon_index}) outside {}x{} layer",
                self.nlat, self.nlon
            )));
        }
        self.values[lat_index * self.nlon + lon_index] = value;
        Ok(())
    }

    /// Cells of the half-open rectangle `lat_range × lon_range`, row by row.
    pub fn window(
        &self,
        lat_range: std::ops::Range<usize>,
        lon_range: std::ops::Range<usize>,
    ) -> impl Iterator<Item = CellValue> + '_ {
        let lon_end = lon_range.end.min(self.nlon);
        let lon_start = lon_range.start.min(lon_end);
        lat_range
            .filter(move |&row| row < self.nlat)
            .flat_map(move |row| {
                let base = row * self.nlon;
                self.values[base + lon_start..base + lon_end].iter().copied()
            })
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<CellValue> {
        self.values
    }

    /// Number of cells holding a value.
    pub fn count_valid(&self) -> usize {
        self.values.iter().filter(|v| v.value().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_classification() {
        assert_eq!(CellValue::from_raw(f64::NAN, None), CellValue::Missing);
        assert_eq!(CellValue::from_raw(-999.0, Some(-999.0)), CellValue::Missing);
        assert_eq!(CellValue::from_raw(-999.0, None), CellValue::Value(-999.0));
        assert_eq!(CellValue::from_raw(f64::INFINITY, None), CellValue::Malformed);
        assert_eq!(CellValue::from_raw(2.5, Some(-999.0)), CellValue::Value(2.5));
    }

    #[test]
    fn test_missing_marker_matches_after_f32_storage() {
        // markers written through a float32 array come back widened
        let stored = 1.0e20_f32 as f64;
        assert_eq!(CellValue::from_raw(stored, Some(1.0e20)), CellValue::Missing);
    }

    #[test]
    fn test_encoding() {
        assert!(CellValue::Missing.to_f32().is_nan());
        assert!(CellValue::Malformed.to_f64().is_nan());
        assert_eq!(CellValue::Value(1.5).to_f32(), 1.5);
    }

    #[test]
    fn test_slice_window() {
        let values = (0..12).map(|v| CellValue::Value(v as f64)).collect();
        let slice = GridSlice::from_values(3, 4, values).unwrap();

        let window: Vec<f64> = slice.window(1..3, 1..3).filter_map(|v| v.value()).collect();
        assert_eq!(window, vec![5.0, 6.0, 9.0, 10.0]);

        assert_eq!(slice.window(0..0, 0..4).count(), 0);
        assert_eq!(slice.get(2, 3), Some(CellValue::Value(11.0)));
        assert_eq!(slice.get(3, 0), None);
    }

    #[test]
    fn test_slice_shape_checked() {
        assert!(GridSlice::from_values(2, 2, vec![CellValue::Missing; 3]).is_err());

        let mut slice = GridSlice::missing(2, 2);
        assert!(slice.set(2, 0, CellValue::Value(1.0)).is_err());
        slice.set(1, 1, CellValue::Value(1.0)).unwrap();
        assert_eq!(slice.count_valid(), 1);
    }
}
