//! NetCDF-4 datasets through the native netcdf library.
//!
//! Sources are read as float64 regardless of their stored type. Cells equal
//! to the `_FillValue` or `missing_value` attribute are missing. Targets are
//! written through the library's numeric conversion, with non-values stored
//! as the configured missing marker.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Once;

use serde_json::Value;
use tracing::debug;

use super::{region_len, DatasetSchema, GridStore, OpenMode, StoreBackend, ValueKind};
use crate::config::GridProcessorConfig;
use crate::error::{GridProcessorError, Result};
use crate::types::CellValue;

/// Silence HDF5's automatic error printing to stderr.
///
/// HDF5 reports lookups of optional attributes as errors even though the
/// caller handles them. Call once early in `main()`; repeated calls are no-ops.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 accepts null handlers to disable automatic printing.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Backend for `.nc` files.
#[derive(Debug, Clone, Default)]
pub struct NetcdfBackend {
    config: GridProcessorConfig,
}

impl NetcdfBackend {
    pub fn new(config: GridProcessorConfig) -> Self {
        silence_hdf5_errors();
        Self { config }
    }
}

impl StoreBackend for NetcdfBackend {
    fn name(&self) -> &'static str {
        "netcdf"
    }

    fn extension(&self) -> &'static str {
        "nc"
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn GridStore>> {
        Ok(Box::new(NetcdfStore::open(path, OpenMode::Read, &self.config)?))
    }

    fn open_target(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn GridStore>> {
        Ok(Box::new(NetcdfStore::open(path, mode, &self.config)?))
    }

    fn create(&self, path: &Path, schema: &DatasetSchema) -> Result<Box<dyn GridStore>> {
        schema.validate()?;
        if path.exists() {
            return Err(GridProcessorError::store_open(path, "dataset already exists"));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GridProcessorError::store_open(path, e.to_string()))?;
        }

        let mut file =
            netcdf::create(path).map_err(|e| GridProcessorError::store_open(path, e.to_string()))?;

        for (key, value) in &schema.attributes {
            put_global_attribute(&mut file, key, value)?;
        }

        let mut dims: BTreeMap<&str, usize> = BTreeMap::new();
        for spec in &schema.variables {
            for (dim, &len) in spec.dims.iter().zip(&spec.shape) {
                match dims.get(dim.as_str()) {
                    Some(&existing) if existing != len => {
                        return Err(GridProcessorError::shape_mismatch(format!(
                            "dimension {dim} declared with lengths {existing} and {len}"
                        )))
                    }
                    Some(_) => {}
                    None => {
                        file.add_dimension(dim, len).map_err(write_error)?;
                        dims.insert(dim.as_str(), len);
                    }
                }
            }
        }

        let missing = self.config.missing_value;
        for spec in &schema.variables {
            let dim_names: Vec<&str> = spec.dims.iter().map(String::as_str).collect();
            let mut var = match spec.kind {
                ValueKind::Coordinate => file.add_variable::<f64>(&spec.name, &dim_names),
                ValueKind::Data => file.add_variable::<f32>(&spec.name, &dim_names),
            }
            .map_err(write_error)?;

            if spec.kind == ValueKind::Data {
                var.put_attribute("_FillValue", missing as f32)
                    .map_err(write_error)?;
                if !spec.attributes.contains_key("missing_value") {
                    var.put_attribute("missing_value", missing as f32)
                        .map_err(write_error)?;
                }
            }
            for (key, value) in &spec.attributes {
                put_variable_attribute(&mut var, key, value)?;
            }

            if let Some(values) = &spec.values {
                let extents = extents(&spec.shape.iter().map(|&d| 0..d).collect::<Vec<_>>());
                var.put_values::<f64, _>(values, extents).map_err(write_error)?;
            }
        }
        drop(file);

        debug!(path = %path.display(), variables = schema.variables.len(), "Created NetCDF dataset");

        Ok(Box::new(NetcdfStore::open(path, OpenMode::Append, &self.config)?))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| GridProcessorError::store_open(path, e.to_string()))?;
        }
        Ok(())
    }
}

enum Handle {
    Read(netcdf::File),
    Append(netcdf::FileMut),
}

/// An open NetCDF file.
pub struct NetcdfStore {
    path: PathBuf,
    handle: Handle,
    missing_value: f64,
}

impl NetcdfStore {
    pub fn open(path: &Path, mode: OpenMode, config: &GridProcessorConfig) -> Result<Self> {
        if !path.is_file() {
            return Err(GridProcessorError::store_open(path, "no such file"));
        }
        let handle = match mode {
            OpenMode::Read => Handle::Read(
                netcdf::open(path).map_err(|e| GridProcessorError::store_open(path, e.to_string()))?,
            ),
            OpenMode::Append => Handle::Append(
                netcdf::append(path)
                    .map_err(|e| GridProcessorError::store_open(path, e.to_string()))?,
            ),
        };
        Ok(Self {
            path: path.to_path_buf(),
            handle,
            missing_value: config.missing_value,
        })
    }

    fn file(&self) -> &netcdf::File {
        match &self.handle {
            Handle::Read(file) => file,
            Handle::Append(file) => file,
        }
    }

    fn variable(&self, name: &str) -> Result<netcdf::Variable<'_>> {
        self.file()
            .variable(name)
            .ok_or_else(|| GridProcessorError::VariableNotFound(name.to_string()))
    }
}

impl GridStore for NetcdfStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn variable_names(&self) -> Vec<String> {
        self.file().variables().map(|v| v.name()).collect()
    }

    fn has_variable(&self, name: &str) -> bool {
        self.file().variable(name).is_some()
    }

    fn shape(&self, variable: &str) -> Result<Vec<usize>> {
        Ok(self
            .variable(variable)?
            .dimensions()
            .iter()
            .map(|d| d.len())
            .collect())
    }

    fn read_coordinate_axis(&self, axis: &str) -> Result<Vec<f64>> {
        let var = self.variable(axis)?;
        if var.dimensions().len() != 1 {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{axis} is not one-dimensional"
            )));
        }
        var.get_values::<f64, _>(..)
            .map_err(|e| GridProcessorError::read_failed(format!("{axis}: {e}")))
    }

    fn read_region(&self, variable: &str, ranges: &[Range<usize>]) -> Result<Vec<CellValue>> {
        let shape = self.shape(variable)?;
        if region_len(variable, &shape, ranges)? == 0 {
            return Ok(Vec::new());
        }
        let var = self.variable(variable)?;
        let fill = get_f64_attr(&var, "_FillValue");
        let missing = get_f64_attr(&var, "missing_value");
        let scale = get_f64_attr(&var, "scale_factor").unwrap_or(1.0);
        let offset = get_f64_attr(&var, "add_offset").unwrap_or(0.0);

        let raw = var
            .get_values::<f64, _>(extents(ranges))
            .map_err(|e| GridProcessorError::read_failed(format!("{variable}: {e}")))?;

        Ok(raw
            .into_iter()
            .map(|v| match CellValue::from_raw(v, fill) {
                CellValue::Value(v) => CellValue::from_raw(v, missing),
                other => other,
            })
            .map(|cell| match cell {
                CellValue::Value(v) => CellValue::Value(v * scale + offset),
                other => other,
            })
            .collect())
    }

    fn write_region(
        &mut self,
        variable: &str,
        ranges: &[Range<usize>],
        values: &[CellValue],
    ) -> Result<()> {
        let shape = self.shape(variable)?;
        let len = region_len(variable, &shape, ranges)?;
        if len != values.len() {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{variable}: {} values for a region of {len} cells",
                values.len()
            )));
        }
        if len == 0 {
            return Ok(());
        }

        let marker = {
            let var = self.variable(variable)?;
            get_f64_attr(&var, "missing_value")
                .or_else(|| get_f64_attr(&var, "_FillValue"))
                .unwrap_or(self.missing_value)
        };
        let data: Vec<f64> = values
            .iter()
            .map(|v| v.value().unwrap_or(marker))
            .collect();

        let Handle::Append(file) = &mut self.handle else {
            return Err(GridProcessorError::write_failed(format!(
                "{} opened read-only",
                self.path.display()
            )));
        };
        let mut var = file
            .variable_mut(variable)
            .ok_or_else(|| GridProcessorError::VariableNotFound(variable.to_string()))?;
        var.put_values::<f64, _>(&data, extents(ranges))
            .map_err(|e| GridProcessorError::write_failed(format!("{variable}: {e}")))
    }

    fn close(self: Box<Self>) -> Result<()> {
        // the library flushes and closes the file on drop
        drop(self);
        Ok(())
    }
}

fn extents(ranges: &[Range<usize>]) -> netcdf::Extents {
    let extents: Vec<netcdf::Extent> = ranges.iter().cloned().map(Into::into).collect();
    netcdf::Extents::from(extents)
}

fn write_error(e: netcdf::Error) -> GridProcessorError {
    GridProcessorError::write_failed(e.to_string())
}

/// Check if a variable has an attribute with the given name.
/// Avoids HDF5 error output when probing optional attributes.
fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}

fn put_global_attribute(file: &mut netcdf::FileMut, key: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => file.add_attribute(key, s.as_str()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => file.add_attribute(key, i),
            None => file.add_attribute(key, n.as_f64().unwrap_or(f64::NAN)),
        },
        other => file.add_attribute(key, other.to_string().as_str()),
    }
    .map(|_| ())
    .map_err(write_error)
}

fn put_variable_attribute(var: &mut netcdf::VariableMut, key: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => var.put_attribute(key, s.as_str()),
        // numeric variable attributes follow the f32 data type
        Value::Number(n) => var.put_attribute(key, n.as_f64().unwrap_or(f64::NAN) as f32),
        other => var.put_attribute(key, other.to_string().as_str()),
    }
    .map(|_| ())
    .map_err(write_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_layer, VariableSpec};

    fn schema() -> DatasetSchema {
        let mut attributes = serde_json::Map::new();
        attributes.insert("title".to_string(), Value::from("test"));
        DatasetSchema {
            attributes,
            variables: vec![
                VariableSpec::coordinate("lat", vec![0.0, 1.0]),
                VariableSpec::coordinate("lon", vec![0.0, 1.0, 2.0]),
                VariableSpec::data("tas", &["time", "lat", "lon"], vec![2, 2, 3]),
            ],
        }
    }

    #[test]
    fn test_create_write_and_read_back() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tas.nc");
        let backend = NetcdfBackend::new(GridProcessorConfig::default());

        let mut store = backend.create(&path, &schema()).unwrap();
        store
            .write_region(
                "tas",
                &[1..2, 0..1, 0..3],
                &[CellValue::Value(2.5), CellValue::Missing, CellValue::Value(-1.0)],
            )
            .unwrap();
        store.close().unwrap();

        let store = backend.open_source(&path).unwrap();
        assert_eq!(store.read_coordinate_axis("lon").unwrap(), vec![0.0, 1.0, 2.0]);
        let layer = read_layer(store.as_ref(), "tas", Some(1)).unwrap();
        assert_eq!(layer.get(0, 0), Some(CellValue::Value(2.5)));
        assert_eq!(layer.get(0, 1), Some(CellValue::Missing));
        assert_eq!(layer.get(1, 2), Some(CellValue::Missing));
    }

    #[test]
    fn test_source_cannot_be_written() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tas.nc");
        let backend = NetcdfBackend::new(GridProcessorConfig::default());
        backend.create(&path, &schema()).unwrap().close().unwrap();

        let mut store = backend.open_source(&path).unwrap();
        assert!(store
            .write_region("tas", &[0..1, 0..1, 0..1], &[CellValue::Value(1.0)])
            .is_err());
    }
}
