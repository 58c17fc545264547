//! Zarr V3 datasets on the local filesystem.
//!
//! A dataset is a directory holding a root group plus one array per
//! variable (`/lat`, `/lon`, `/time`, `/lsmask`, ...). Coordinates are
//! float64, data layers float32 with a NaN fill value. Dimension names are
//! recorded in the `_ARRAY_DIMENSIONS` attribute.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use super::{region_len, DatasetSchema, GridStore, OpenMode, StoreBackend, ValueKind, VariableSpec};
use crate::config::{GridProcessorConfig, ZarrCompression};
use crate::error::{GridProcessorError, Result};
use crate::types::CellValue;

/// Backend creating and opening Zarr V3 directories.
#[derive(Debug, Clone, Default)]
pub struct ZarrBackend {
    config: GridProcessorConfig,
}

impl ZarrBackend {
    /// Create a new ZarrBackend with the given configuration.
    pub fn new(config: GridProcessorConfig) -> Self {
        Self { config }
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(
        &self,
        typesize: usize,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.zarr_compression_level)
            .map_err(|_| GridProcessorError::Config("Invalid compression level".to_string()))?;

        let shuffle = if self.config.zarr_shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = self.config.zarr_shuffle.then_some(typesize);

        let compressor = match self.config.zarr_compression {
            ZarrCompression::None => {
                return Err(GridProcessorError::Config(
                    "No compression configured".to_string(),
                ))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| GridProcessorError::Config(e.to_string()))?;

        Ok(Arc::new(codec))
    }

    fn chunk_shape(&self, spec: &VariableSpec) -> Vec<u64> {
        let chunk = self.config.zarr_chunk_size;
        let n = spec.shape.len();
        spec.shape
            .iter()
            .enumerate()
            .map(|(i, &dim)| {
                let size = match spec.kind {
                    ValueKind::Coordinate => dim,
                    // one time step per chunk, square spatial tiles
                    ValueKind::Data if n == 3 && i == 0 => 1,
                    ValueKind::Data => dim.min(chunk),
                };
                size.max(1) as u64
            })
            .collect()
    }

    fn build_array(
        &self,
        store: Arc<FilesystemStore>,
        spec: &VariableSpec,
    ) -> Result<Array<FilesystemStore>> {
        let mut attrs = spec.attributes.clone();
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(spec.dims));
        if spec.kind == ValueKind::Data {
            attrs
                .entry("missing_value".to_string())
                .or_insert(json!(self.config.missing_value));
        }

        let (data_type, fill_value, typesize) = match spec.kind {
            ValueKind::Coordinate => (DataType::Float64, FillValue::from(f64::NAN), 8),
            ValueKind::Data => (DataType::Float32, FillValue::from(f32::NAN), 4),
        };

        let chunk_grid: zarrs::array::ChunkGrid = self
            .chunk_shape(spec)
            .try_into()
            .map_err(|e| GridProcessorError::Config(format!("{:?}", e)))?;

        let shape = spec.shape.iter().map(|&d| d as u64).collect();
        let mut binding = ArrayBuilder::new(shape, data_type, chunk_grid, fill_value);
        let mut builder = binding.attributes(attrs);

        if self.config.zarr_compression != ZarrCompression::None {
            let codec = self.create_compression_codec(typesize)?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        let array = builder
            .build(store, &node_path(&spec.name))
            .map_err(|e| GridProcessorError::write_failed(e.to_string()))?;
        array
            .store_metadata()
            .map_err(|e| GridProcessorError::write_failed(e.to_string()))?;
        Ok(array)
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn GridStore>> {
        Ok(Box::new(ZarrStore::open(path, mode)?))
    }
}

impl StoreBackend for ZarrBackend {
    fn name(&self) -> &'static str {
        "zarr"
    }

    fn extension(&self) -> &'static str {
        "zarr"
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn GridStore>> {
        self.open(path, OpenMode::Read)
    }

    fn open_target(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn GridStore>> {
        self.open(path, mode)
    }

    fn create(&self, path: &Path, schema: &DatasetSchema) -> Result<Box<dyn GridStore>> {
        schema.validate()?;
        if path.exists() {
            return Err(GridProcessorError::store_open(path, "dataset already exists"));
        }

        std::fs::create_dir_all(path).map_err(|e| GridProcessorError::store_open(path, e.to_string()))?;
        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| GridProcessorError::store_open(path, e.to_string()))?,
        );

        let mut group_builder = GroupBuilder::new();
        group_builder.attributes(schema.attributes.clone());
        group_builder
            .build(store.clone(), "/")
            .map_err(|e| GridProcessorError::write_failed(e.to_string()))?
            .store_metadata()
            .map_err(|e| GridProcessorError::write_failed(e.to_string()))?;

        let mut arrays = BTreeMap::new();
        for spec in &schema.variables {
            let array = self.build_array(store.clone(), spec)?;
            if let Some(values) = &spec.values {
                let ranges: Vec<Range<usize>> = spec.shape.iter().map(|&d| 0..d).collect();
                let cells: Vec<CellValue> =
                    values.iter().map(|&v| CellValue::from_raw(v, None)).collect();
                write_array(&array, &spec.name, &ranges, &cells)?;
            }
            let missing = missing_marker(&array);
            arrays.insert(spec.name.clone(), ZarrVariable { array, missing });
        }

        debug!(path = %path.display(), variables = arrays.len(), "Created Zarr dataset");

        Ok(Box::new(ZarrStore {
            path: path.to_path_buf(),
            mode: OpenMode::Append,
            arrays,
        }))
    }

    fn exists(&self, path: &Path) -> bool {
        path.join("zarr.json").exists()
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)
                .map_err(|e| GridProcessorError::store_open(path, e.to_string()))?;
        }
        Ok(())
    }
}

struct ZarrVariable {
    array: Array<FilesystemStore>,
    missing: Option<f64>,
}

/// An open Zarr dataset.
pub struct ZarrStore {
    path: PathBuf,
    mode: OpenMode,
    arrays: BTreeMap<String, ZarrVariable>,
}

impl ZarrStore {
    /// Open every array directly below the dataset root.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        if !path.is_dir() {
            return Err(GridProcessorError::store_open(path, "not a directory"));
        }
        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| GridProcessorError::store_open(path, e.to_string()))?,
        );

        let entries =
            std::fs::read_dir(path).map_err(|e| GridProcessorError::store_open(path, e.to_string()))?;

        let mut arrays = BTreeMap::new();
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if !entry_path.join("zarr.json").is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // nested groups are not variables
            let Ok(array) = Array::open(store.clone(), &node_path(&name)) else {
                continue;
            };
            let missing = missing_marker(&array);
            arrays.insert(name, ZarrVariable { array, missing });
        }

        if arrays.is_empty() {
            return Err(GridProcessorError::store_open(path, "no arrays found"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            arrays,
        })
    }

    fn variable(&self, name: &str) -> Result<&ZarrVariable> {
        self.arrays
            .get(name)
            .ok_or_else(|| GridProcessorError::VariableNotFound(name.to_string()))
    }

    /// Attributes of one variable.
    pub fn attributes(&self, name: &str) -> Result<&serde_json::Map<String, serde_json::Value>> {
        Ok(self.variable(name)?.array.attributes())
    }
}

impl GridStore for ZarrStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn variable_names(&self) -> Vec<String> {
        self.arrays.keys().cloned().collect()
    }

    fn has_variable(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    fn shape(&self, variable: &str) -> Result<Vec<usize>> {
        Ok(self
            .variable(variable)?
            .array
            .shape()
            .iter()
            .map(|&d| d as usize)
            .collect())
    }

    fn read_coordinate_axis(&self, axis: &str) -> Result<Vec<f64>> {
        let shape = self.shape(axis)?;
        if shape.len() != 1 {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{axis} is not one-dimensional"
            )));
        }
        let var = self.variable(axis)?;
        read_array(&var.array, axis, &[0..shape[0]])?
            .into_iter()
            .map(|v| {
                if v.is_finite() {
                    Ok(v)
                } else {
                    Err(GridProcessorError::invalid_metadata(format!(
                        "{axis} has missing entries"
                    )))
                }
            })
            .collect()
    }

    fn read_region(&self, variable: &str, ranges: &[Range<usize>]) -> Result<Vec<CellValue>> {
        let var = self.variable(variable)?;
        Ok(read_array(&var.array, variable, ranges)?
            .into_iter()
            .map(|v| CellValue::from_raw(v, var.missing))
            .collect())
    }

    fn write_region(
        &mut self,
        variable: &str,
        ranges: &[Range<usize>],
        values: &[CellValue],
    ) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(GridProcessorError::write_failed(format!(
                "{} opened read-only",
                self.path.display()
            )));
        }
        let var = self.variable(variable)?;
        write_array(&var.array, variable, ranges, values)
    }

    fn close(self: Box<Self>) -> Result<()> {
        // chunks are written through on every store call
        Ok(())
    }
}

fn node_path(name: &str) -> String {
    format!("/{name}")
}

fn missing_marker(array: &Array<FilesystemStore>) -> Option<f64> {
    array.attributes().get("missing_value").and_then(|v| v.as_f64())
}

fn subset_for(
    variable: &str,
    array: &Array<FilesystemStore>,
    ranges: &[Range<usize>],
) -> Result<Option<ArraySubset>> {
    let shape: Vec<usize> = array.shape().iter().map(|&d| d as usize).collect();
    if region_len(variable, &shape, ranges)? == 0 {
        return Ok(None);
    }
    let subset = ArraySubset::new_with_start_shape(
        ranges.iter().map(|r| r.start as u64).collect(),
        ranges.iter().map(|r| r.len() as u64).collect(),
    )
    .map_err(|e| GridProcessorError::read_failed(e.to_string()))?;
    Ok(Some(subset))
}

fn read_array(
    array: &Array<FilesystemStore>,
    variable: &str,
    ranges: &[Range<usize>],
) -> Result<Vec<f64>> {
    let Some(subset) = subset_for(variable, array, ranges)? else {
        return Ok(Vec::new());
    };

    match array.data_type() {
        DataType::Float32 => Ok(array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| GridProcessorError::read_failed(e.to_string()))?
            .into_iter()
            .map(f64::from)
            .collect()),
        DataType::Float64 => array
            .retrieve_array_subset_elements::<f64>(&subset)
            .map_err(|e| GridProcessorError::read_failed(e.to_string())),
        DataType::Int16 => Ok(array
            .retrieve_array_subset_elements::<i16>(&subset)
            .map_err(|e| GridProcessorError::read_failed(e.to_string()))?
            .into_iter()
            .map(f64::from)
            .collect()),
        other => Err(GridProcessorError::invalid_metadata(format!(
            "{variable}: unsupported data type {other:?}"
        ))),
    }
}

fn write_array(
    array: &Array<FilesystemStore>,
    variable: &str,
    ranges: &[Range<usize>],
    values: &[CellValue],
) -> Result<()> {
    let shape: Vec<usize> = array.shape().iter().map(|&d| d as usize).collect();
    let len = region_len(variable, &shape, ranges)?;
    if len != values.len() {
        return Err(GridProcessorError::shape_mismatch(format!(
            "{variable}: {} values for a region of {len} cells",
            values.len()
        )));
    }
    let Some(subset) = subset_for(variable, array, ranges)? else {
        return Ok(());
    };

    match array.data_type() {
        DataType::Float32 => {
            let data: Vec<f32> = values.iter().map(CellValue::to_f32).collect();
            array.store_array_subset_elements(&subset, &data)
        }
        DataType::Float64 => {
            let data: Vec<f64> = values.iter().map(CellValue::to_f64).collect();
            array.store_array_subset_elements(&subset, &data)
        }
        other => {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{variable}: cannot write data type {other:?}"
            )))
        }
    }
    .map_err(|e| GridProcessorError::write_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_layer, VariableSpec};

    fn uncompressed() -> ZarrBackend {
        ZarrBackend::new(GridProcessorConfig {
            zarr_compression: ZarrCompression::None,
            zarr_chunk_size: 2,
            ..Default::default()
        })
    }

    fn schema() -> DatasetSchema {
        DatasetSchema {
            attributes: serde_json::Map::new(),
            variables: vec![
                VariableSpec::coordinate("lat", vec![0.0, 1.0, 2.0]),
                VariableSpec::coordinate("lon", vec![10.0, 11.0]),
                VariableSpec::data("tas", &["time", "lat", "lon"], vec![4, 3, 2]),
            ],
        }
    }

    #[test]
    fn test_create_and_reopen() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tas.zarr");
        let backend = uncompressed();

        let mut store = backend.create(&path, &schema()).unwrap();
        store
            .write_region("tas", &[1..2, 0..1, 0..2], &[CellValue::Value(1.5), CellValue::Missing])
            .unwrap();
        store.close().unwrap();

        assert!(backend.exists(&path));
        let store = backend.open_source(&path).unwrap();
        assert_eq!(store.read_coordinate_axis("lon").unwrap(), vec![10.0, 11.0]);
        assert_eq!(store.shape("tas").unwrap(), vec![4, 3, 2]);

        let layer = read_layer(store.as_ref(), "tas", Some(1)).unwrap();
        assert_eq!(layer.get(0, 0), Some(CellValue::Value(1.5)));
        assert_eq!(layer.get(0, 1), Some(CellValue::Missing));
        assert_eq!(layer.get(2, 1), Some(CellValue::Missing));
    }

    #[test]
    fn test_create_refuses_existing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tas.zarr");
        let backend = uncompressed();

        backend.create(&path, &schema()).unwrap().close().unwrap();
        assert!(backend.create(&path, &schema()).is_err());

        backend.remove(&path).unwrap();
        assert!(!backend.exists(&path));
    }

    #[test]
    fn test_missing_value_attribute_recognised() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("ppt.zarr");
        let backend = uncompressed();

        let mut schema = schema();
        schema.variables[2] = VariableSpec::data("tas", &["lat", "lon"], vec![3, 2])
            .attribute("missing_value", -999.0)
            .with_values(vec![1.0, -999.0, 3.0, 4.0, 5.0, 6.0]);
        backend.create(&path, &schema).unwrap().close().unwrap();

        let store = backend.open_source(&path).unwrap();
        let values = store.read_region("tas", &[0..1, 0..2]).unwrap();
        assert_eq!(values, vec![CellValue::Value(1.0), CellValue::Missing]);
    }

    #[test]
    fn test_compressed_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("c.zarr");
        let backend = ZarrBackend::new(GridProcessorConfig::default());

        let mut store = backend.create(&path, &schema()).unwrap();
        let values: Vec<CellValue> = (0..6).map(|v| CellValue::Value(v as f64)).collect();
        store.write_region("tas", &[3..4, 0..3, 0..2], &values).unwrap();

        let read = store.read_region("tas", &[3..4, 0..3, 0..2]).unwrap();
        assert_eq!(read, values);
    }

    #[test]
    fn test_open_missing_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = ZarrStore::open(&temp_dir.path().join("absent.zarr"), OpenMode::Read)
            .err()
            .unwrap();
        assert!(matches!(err, GridProcessorError::StoreOpen { .. }));
    }
}
