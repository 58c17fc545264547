//! Storage abstraction over multi-dimensional array containers.
//!
//! The aggregation core only needs to read and write index ranges of named
//! variables and to read coordinate axes. Everything format specific lives
//! behind [`GridStore`] and [`StoreBackend`].

mod memory;
#[cfg(feature = "netcdf")]
mod netcdf_store;
mod zarr;

pub use memory::{MemoryBackend, MemoryDataset, MemoryStore};
#[cfg(feature = "netcdf")]
pub use netcdf_store::{silence_hdf5_errors, NetcdfBackend, NetcdfStore};
pub use zarr::{ZarrBackend, ZarrStore};

use std::ops::Range;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{GridProcessorError, Result};
use crate::types::{CellValue, GridSlice};

/// Access mode for target datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Append,
}

/// Element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// 64-bit coordinates and bounds.
    Coordinate,
    /// 32-bit data layers, NaN filled.
    Data,
}

/// Declaration of one variable of a new dataset.
#[derive(Debug, Clone)]
pub struct VariableSpec {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub kind: ValueKind,
    pub attributes: Map<String, Value>,
    /// Initial contents, row-major. `None` leaves the variable missing.
    pub values: Option<Vec<f64>>,
}

impl VariableSpec {
    pub fn coordinate(name: &str, values: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            dims: vec![name.to_string()],
            shape: vec![values.len()],
            kind: ValueKind::Coordinate,
            attributes: Map::new(),
            values: Some(values),
        }
    }

    pub fn data(name: &str, dims: &[&str], shape: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            shape,
            kind: ValueKind::Data,
            attributes: Map::new(),
            values: None,
        }
    }

    pub fn with_values(mut self, values: Vec<f64>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_dims(mut self, dims: &[&str]) -> Self {
        self.dims = dims.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    pub fn attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Declaration of a new dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetSchema {
    pub attributes: Map<String, Value>,
    pub variables: Vec<VariableSpec>,
}

impl DatasetSchema {
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for var in &self.variables {
            if !seen.insert(var.name.as_str()) {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "variable {} declared twice",
                    var.name
                )));
            }
            if var.dims.len() != var.shape.len() {
                return Err(GridProcessorError::shape_mismatch(format!(
                    "{}: {} dimensions for shape {:?}",
                    var.name,
                    var.dims.len(),
                    var.shape
                )));
            }
            if let Some(values) = &var.values {
                if values.len() != var.len() {
                    return Err(GridProcessorError::shape_mismatch(format!(
                        "{}: {} initial values for shape {:?}",
                        var.name,
                        values.len(),
                        var.shape
                    )));
                }
            }
        }
        Ok(())
    }
}

/// An open dataset.
pub trait GridStore {
    /// Location of the dataset.
    fn path(&self) -> &Path;

    fn variable_names(&self) -> Vec<String>;

    fn has_variable(&self, name: &str) -> bool {
        self.variable_names().iter().any(|v| v == name)
    }

    fn shape(&self, variable: &str) -> Result<Vec<usize>>;

    /// Full contents of a 1-D coordinate variable.
    fn read_coordinate_axis(&self, axis: &str) -> Result<Vec<f64>>;

    /// Values of `variable` inside `ranges`, row-major.
    fn read_region(&self, variable: &str, ranges: &[Range<usize>]) -> Result<Vec<CellValue>>;

    /// Overwrite `ranges` of `variable`. Missing and malformed cells are written
    /// as the store's missing marker.
    fn write_region(
        &mut self,
        variable: &str,
        ranges: &[Range<usize>],
        values: &[CellValue],
    ) -> Result<()>;

    /// Flush and release the dataset.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens and creates datasets of one container format.
pub trait StoreBackend: Send + Sync {
    /// Short format name for logs.
    fn name(&self) -> &'static str;

    /// File name extension of datasets, without the dot.
    fn extension(&self) -> &'static str;

    fn open_source(&self, path: &Path) -> Result<Box<dyn GridStore>>;

    fn open_target(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn GridStore>>;

    /// Create a dataset, failing if one already exists at `path`.
    fn create(&self, path: &Path, schema: &DatasetSchema) -> Result<Box<dyn GridStore>>;

    fn exists(&self, path: &Path) -> bool;

    fn remove(&self, path: &Path) -> Result<()>;
}

/// Check `ranges` against `shape` and return the number of cells covered.
pub fn region_len(variable: &str, shape: &[usize], ranges: &[Range<usize>]) -> Result<usize> {
    if ranges.len() != shape.len() {
        return Err(GridProcessorError::shape_mismatch(format!(
            "{variable}: {} ranges for {} dimensions",
            ranges.len(),
            shape.len()
        )));
    }
    for (range, &dim) in ranges.iter().zip(shape) {
        if range.start > range.end || range.end > dim {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{variable}: range {range:?} outside dimension of length {dim}"
            )));
        }
    }
    Ok(ranges.iter().map(|r| r.len()).product())
}

/// Ranges selecting the `(lat, lon)` layer at `time_index` (or the whole
/// variable when it is 2-D).
pub fn layer_ranges(
    variable: &str,
    shape: &[usize],
    time_index: Option<usize>,
) -> Result<Vec<Range<usize>>> {
    match (shape, time_index) {
        ([nlat, nlon], None) => Ok(vec![0..*nlat, 0..*nlon]),
        ([nt, nlat, nlon], Some(t)) if t < *nt => Ok(vec![t..t + 1, 0..*nlat, 0..*nlon]),
        // single time step sources are read without an explicit index
        ([1, nlat, nlon], None) => Ok(vec![0..1, 0..*nlat, 0..*nlon]),
        _ => Err(GridProcessorError::shape_mismatch(format!(
            "{variable}: cannot select layer {time_index:?} of shape {shape:?}"
        ))),
    }
}

/// Read one `(lat, lon)` layer.
pub fn read_layer(
    store: &dyn GridStore,
    variable: &str,
    time_index: Option<usize>,
) -> Result<GridSlice> {
    let shape = store.shape(variable)?;
    let ranges = layer_ranges(variable, &shape, time_index)?;
    let nlat = shape[shape.len() - 2];
    let nlon = shape[shape.len() - 1];
    GridSlice::from_values(nlat, nlon, store.read_region(variable, &ranges)?)
}

/// Write one `(lat, lon)` layer.
pub fn write_layer(
    store: &mut dyn GridStore,
    variable: &str,
    time_index: Option<usize>,
    layer: &GridSlice,
) -> Result<()> {
    let shape = store.shape(variable)?;
    let ranges = layer_ranges(variable, &shape, time_index)?;
    if shape[shape.len() - 2] != layer.nlat() || shape[shape.len() - 1] != layer.nlon() {
        return Err(GridProcessorError::shape_mismatch(format!(
            "{variable}: layer {}x{} does not fit shape {shape:?}",
            layer.nlat(),
            layer.nlon()
        )));
    }
    store.write_region(variable, &ranges, layer.values())
}

/// Row-major strides of `shape`.
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Flat offsets of every cell in `ranges`, row-major.
pub(crate) fn region_offsets(shape: &[usize], ranges: &[Range<usize>]) -> Vec<usize> {
    let strides = strides(shape);
    let mut offsets = vec![0usize];
    for (range, stride) in ranges.iter().zip(&strides) {
        offsets = offsets
            .iter()
            .flat_map(|base| range.clone().map(move |i| base + i * stride))
            .collect();
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_len_checks_bounds() {
        assert_eq!(region_len("v", &[3, 4], &[0..2, 1..4]).unwrap(), 6);
        assert_eq!(region_len("v", &[3, 4], &[1..1, 0..4]).unwrap(), 0);
        assert!(region_len("v", &[3, 4], &[0..4, 0..4]).is_err());
        assert!(region_len("v", &[3, 4], &[0..1]).is_err());
    }

    #[test]
    fn test_layer_ranges() {
        assert_eq!(layer_ranges("v", &[3, 4], None).unwrap(), vec![0..3, 0..4]);
        assert_eq!(
            layer_ranges("v", &[12, 3, 4], Some(5)).unwrap(),
            vec![5..6, 0..3, 0..4]
        );
        assert_eq!(
            layer_ranges("v", &[1, 3, 4], None).unwrap(),
            vec![0..1, 0..3, 0..4]
        );
        assert!(layer_ranges("v", &[12, 3, 4], Some(12)).is_err());
        assert!(layer_ranges("v", &[12, 3, 4], None).is_err());
    }

    #[test]
    fn test_region_offsets() {
        assert_eq!(strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(region_offsets(&[3, 4], &[1..3, 2..4]), vec![6, 7, 10, 11]);
        assert_eq!(region_offsets(&[2, 2, 2], &[1..2, 0..1, 0..2]), vec![4, 5]);
    }

    #[test]
    fn test_schema_validation() {
        let mut schema = DatasetSchema::default();
        schema.variables.push(VariableSpec::coordinate("lat", vec![0.0, 1.0]));
        schema
            .variables
            .push(VariableSpec::data("lsmask", &["lat", "lon"], vec![2, 2]));
        assert!(schema.validate().is_ok());

        schema
            .variables
            .push(VariableSpec::data("bad", &["lat"], vec![2, 2]));
        assert!(schema.validate().is_err());
    }
}
