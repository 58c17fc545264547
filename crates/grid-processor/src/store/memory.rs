//! In-memory datasets for tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

use super::{region_len, region_offsets, DatasetSchema, GridStore, OpenMode, StoreBackend};
use crate::error::{GridProcessorError, Result};
use crate::types::CellValue;

#[derive(Debug, Clone)]
struct MemoryVariable {
    shape: Vec<usize>,
    values: Vec<CellValue>,
    attributes: Map<String, Value>,
}

/// A dataset held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataset {
    attributes: Map<String, Value>,
    variables: BTreeMap<String, MemoryVariable>,
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_schema(schema: &DatasetSchema) -> Result<Self> {
        schema.validate()?;
        let mut dataset = Self {
            attributes: schema.attributes.clone(),
            variables: BTreeMap::new(),
        };
        for spec in &schema.variables {
            let values = match &spec.values {
                Some(values) => values.iter().map(|&v| CellValue::from_raw(v, None)).collect(),
                None => vec![CellValue::Missing; spec.len()],
            };
            dataset.variables.insert(
                spec.name.clone(),
                MemoryVariable {
                    shape: spec.shape.clone(),
                    values,
                    attributes: spec.attributes.clone(),
                },
            );
        }
        Ok(dataset)
    }

    /// Add `lat` and `lon` coordinate variables.
    pub fn with_grid(self, longitudes: &[f64], latitudes: &[f64]) -> Self {
        self.with_raw("lat", vec![latitudes.len()], latitudes)
            .with_raw("lon", vec![longitudes.len()], longitudes)
    }

    /// Add a variable from raw numbers; NaN marks missing cells.
    pub fn with_raw(self, name: &str, shape: Vec<usize>, values: &[f64]) -> Self {
        let cells = values.iter().map(|&v| CellValue::from_raw(v, None)).collect();
        self.with_cells(name, shape, cells)
    }

    /// Add a variable from classified cells.
    ///
    /// The value count is not checked here; mismatches surface on first access.
    pub fn with_cells(mut self, name: &str, shape: Vec<usize>, values: Vec<CellValue>) -> Self {
        self.variables.insert(
            name.to_string(),
            MemoryVariable {
                shape,
                values,
                attributes: Map::new(),
            },
        );
        self
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn variable_attributes(&self, name: &str) -> Option<&Map<String, Value>> {
        self.variables.get(name).map(|v| &v.attributes)
    }

    pub fn values(&self, name: &str) -> Option<&[CellValue]> {
        self.variables.get(name).map(|v| v.values.as_slice())
    }

    pub fn shape(&self, name: &str) -> Option<&[usize]> {
        self.variables.get(name).map(|v| v.shape.as_slice())
    }

    fn variable(&self, name: &str) -> Result<&MemoryVariable> {
        let var = self
            .variables
            .get(name)
            .ok_or_else(|| GridProcessorError::VariableNotFound(name.to_string()))?;
        if var.values.len() != var.shape.iter().product::<usize>() {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{name}: {} values for shape {:?}",
                var.values.len(),
                var.shape
            )));
        }
        Ok(var)
    }
}

type Datasets = Arc<Mutex<HashMap<PathBuf, MemoryDataset>>>;

fn lock(datasets: &Datasets) -> Result<MutexGuard<'_, HashMap<PathBuf, MemoryDataset>>> {
    datasets
        .lock()
        .map_err(|_| GridProcessorError::read_failed("memory store lock poisoned"))
}

/// Backend keeping every dataset in a shared map keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    datasets: Datasets,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset, replacing any previous one at `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, dataset: MemoryDataset) -> Result<()> {
        lock(&self.datasets)?.insert(path.into(), dataset);
        Ok(())
    }

    /// Copy of the dataset at `path`.
    pub fn snapshot(&self, path: impl AsRef<Path>) -> Option<MemoryDataset> {
        lock(&self.datasets).ok()?.get(path.as_ref()).cloned()
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn GridStore>> {
        if !lock(&self.datasets)?.contains_key(path) {
            return Err(GridProcessorError::store_open(path, "no such dataset"));
        }
        Ok(Box::new(MemoryStore {
            path: path.to_path_buf(),
            mode,
            datasets: self.datasets.clone(),
        }))
    }
}

impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn extension(&self) -> &'static str {
        "mem"
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn GridStore>> {
        self.open(path, OpenMode::Read)
    }

    fn open_target(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn GridStore>> {
        self.open(path, mode)
    }

    fn create(&self, path: &Path, schema: &DatasetSchema) -> Result<Box<dyn GridStore>> {
        let dataset = MemoryDataset::from_schema(schema)?;
        {
            let mut datasets = lock(&self.datasets)?;
            if datasets.contains_key(path) {
                return Err(GridProcessorError::store_open(path, "dataset already exists"));
            }
            datasets.insert(path.to_path_buf(), dataset);
        }
        self.open(path, OpenMode::Append)
    }

    fn exists(&self, path: &Path) -> bool {
        lock(&self.datasets)
            .map(|d| d.contains_key(path))
            .unwrap_or(false)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        lock(&self.datasets)?.remove(path);
        Ok(())
    }
}

/// Handle on one dataset of a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    mode: OpenMode,
    datasets: Datasets,
}

impl MemoryStore {
    fn with_dataset<T>(&self, f: impl FnOnce(&MemoryDataset) -> Result<T>) -> Result<T> {
        let datasets = lock(&self.datasets)?;
        let dataset = datasets
            .get(&self.path)
            .ok_or_else(|| GridProcessorError::store_open(&self.path, "dataset removed"))?;
        f(dataset)
    }
}

impl GridStore for MemoryStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn variable_names(&self) -> Vec<String> {
        self.with_dataset(|d| Ok(d.variables.keys().cloned().collect()))
            .unwrap_or_default()
    }

    fn shape(&self, variable: &str) -> Result<Vec<usize>> {
        self.with_dataset(|d| Ok(d.variable(variable)?.shape.clone()))
    }

    fn read_coordinate_axis(&self, axis: &str) -> Result<Vec<f64>> {
        self.with_dataset(|d| {
            let var = d.variable(axis)?;
            if var.shape.len() != 1 {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "{axis} is not one-dimensional"
                )));
            }
            var.values
                .iter()
                .map(|v| {
                    v.value().ok_or_else(|| {
                        GridProcessorError::invalid_metadata(format!("{axis} has missing entries"))
                    })
                })
                .collect()
        })
    }

    fn read_region(&self, variable: &str, ranges: &[Range<usize>]) -> Result<Vec<CellValue>> {
        self.with_dataset(|d| {
            let var = d.variable(variable)?;
            region_len(variable, &var.shape, ranges)?;
            Ok(region_offsets(&var.shape, ranges)
                .into_iter()
                .map(|i| var.values[i])
                .collect())
        })
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

        let mut datasets = lock(&self.datasets)?;
        let dataset = datasets
            .get_mut(&self.path)
            .ok_or_else(|| GridProcessorError::store_open(&self.path, "dataset removed"))?;
        let var = dataset
            .variables
            .get_mut(variable)
            .ok_or_else(|| GridProcessorError::VariableNotFound(variable.to_string()))?;

        let len = region_len(variable, &var.shape, ranges)?;
        if len != values.len() {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{variable}: {} values for a region of {len} cells",
                values.len()
            )));
        }

        for (offset, value) in region_offsets(&var.shape, ranges).into_iter().zip(values) {
            // stored the way a NaN-filled array would hold it
            var.values[offset] = match value {
                CellValue::Value(v) => CellValue::Value(*v),
                _ => CellValue::Missing,
            };
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_with_grid() -> (MemoryBackend, PathBuf) {
        let backend = MemoryBackend::new();
        let path = PathBuf::from("/mem/source");
        let dataset = MemoryDataset::new()
            .with_grid(&[0.0, 1.0, 2.0], &[10.0, 11.0])
            .with_raw("Band1", vec![2, 3], &[1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0]);
        backend.insert(&path, dataset).unwrap();
        (backend, path)
    }

    #[test]
    fn test_read_region_and_axes() {
        let (backend, path) = backend_with_grid();
        let store = backend.open_source(&path).unwrap();

        assert_eq!(store.read_coordinate_axis("lat").unwrap(), vec![10.0, 11.0]);
        assert_eq!(store.shape("Band1").unwrap(), vec![2, 3]);
        assert_eq!(
            store.read_region("Band1", &[0..2, 1..3]).unwrap(),
            vec![
                CellValue::Value(2.0),
                CellValue::Missing,
                CellValue::Value(5.0),
                CellValue::Value(6.0)
            ]
        );
        assert!(store.read_region("Band1", &[0..3, 0..1]).is_err());
        assert!(store.read_region("nope", &[0..1, 0..1]).is_err());
    }

    #[test]
    fn test_source_is_read_only() {
        let (backend, path) = backend_with_grid();
        let mut store = backend.open_source(&path).unwrap();
        assert!(store
            .write_region("Band1", &[0..1, 0..1], &[CellValue::Value(0.0)])
            .is_err());
    }

    #[test]
    fn test_write_region_visible_to_other_handles() {
        let (backend, path) = backend_with_grid();
        let mut target = backend.open_target(&path, OpenMode::Append).unwrap();
        target
            .write_region(
                "Band1",
                &[1..2, 0..2],
                &[CellValue::Value(9.0), CellValue::Malformed],
            )
            .unwrap();
        target.close().unwrap();

        let snapshot = backend.snapshot(&path).unwrap();
        let values = snapshot.values("Band1").unwrap();
        assert_eq!(values[3], CellValue::Value(9.0));
        assert_eq!(values[4], CellValue::Missing);
    }

    #[test]
    fn test_open_missing_dataset_fails() {
        let backend = MemoryBackend::new();
        let err = backend.open_source(Path::new("/nowhere")).err().expect("expected open_source to fail");
        assert!(matches!(err, GridProcessorError::StoreOpen { .. }));
        assert!(err.is_task_fatal());
    }
}
