//! Creation of empty target datasets and land-sea mask transfer.

use std::path::Path;

use chrono::Utc;
use grid_common::{BoundingBox, Metric, YearRange};
use serde_json::json;
use tracing::{info, warn};

use crate::config::GridProcessorConfig;
use crate::error::{GridProcessorError, Result};
use crate::geometry::GridGeometry;
use crate::index::IndexMapper;
use crate::store::{DatasetSchema, GridStore, StoreBackend, VariableSpec};
use crate::types::CellValue;

/// Grow a template extent outward to whole cells of `resol`.
///
/// Corners snap to the cell grid (truncating toward zero) and move half a
/// cell outward; the upper corner gains one extra cell so the coordinate
/// axes cover the template's last row and column. Latitudes are clipped to
/// the clone grid.
pub fn expand_bbox(template: &BoundingBox, clone: &BoundingBox, resol: f64) -> BoundingBox {
    let half = resol / 2.0;
    let lon_ll = resol * (template.min_lon / resol).trunc() - half;
    let lat_ll = (resol * (template.min_lat / resol).trunc() - half).max(clone.min_lat);
    let lon_ur = resol * (template.max_lon / resol).trunc() + resol + half;
    let lat_ur = (resol * (template.max_lat / resol).trunc() + resol + half).min(clone.max_lat);
    BoundingBox::new(lon_ll, lat_ll, lon_ur, lat_ur)
}

/// Name, without extension, of the target dataset of `metric`.
pub fn target_stem(metric: Metric, scenario: &str, years: YearRange) -> String {
    format!(
        "{}_{}_{}_{}",
        metric.input_prefix(),
        scenario,
        years.start,
        years.end
    )
}

/// Layout of one metric's target dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDefinition {
    pub metric: Metric,
    /// Scenario label used in the dataset name, e.g. `RCP45`.
    pub scenario: String,
    pub years: YearRange,
    pub resolution: f64,
    /// Expanded extent; axes run from the lower corner up to, not including,
    /// the upper one.
    pub bbox: BoundingBox,
}

impl TargetDefinition {
    pub fn new(
        metric: Metric,
        scenario: impl Into<String>,
        years: YearRange,
        resolution: f64,
        template: &BoundingBox,
        clone: &BoundingBox,
    ) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(GridProcessorError::Config(format!(
                "target resolution {resolution} must be positive"
            )));
        }
        Ok(Self {
            metric,
            scenario: scenario.into(),
            years,
            resolution,
            bbox: expand_bbox(template, clone, resolution),
        })
    }

    /// Dataset name without extension, e.g. `Tave_RCP45_1961_2100`.
    pub fn file_stem(&self) -> String {
        target_stem(self.metric, &self.scenario, self.years)
    }

    pub fn num_months(&self) -> usize {
        self.years.num_years() * 12
    }

    pub fn variable(&self) -> &'static str {
        self.metric.target_variable()
    }

    pub fn geometry(&self) -> Result<GridGeometry> {
        GridGeometry::arange(
            self.bbox.min_lon,
            self.bbox.min_lat,
            self.bbox.max_lon,
            self.bbox.max_lat,
            self.resolution,
        )
    }

    /// Variables and attributes of the empty dataset.
    pub fn schema(&self, config: &GridProcessorConfig) -> Result<DatasetSchema> {
        let geometry = self.geometry()?;
        let builder = config.time_axis_builder();
        let axis = builder.build_monthly(self.years.start, self.num_months())?;
        let nt = axis.len();
        let (nlat, nlon) = (geometry.nlat(), geometry.nlon());

        let mut attributes = serde_json::Map::new();
        attributes.insert(
            "attribution".to_string(),
            json!(format!("Created at {}", Utc::now().format("%H:%M %d-%m-%Y"))),
        );
        attributes.insert("history".to_string(), json!("grid reorganisation"));
        attributes.insert("scenario".to_string(), json!(self.scenario));
        attributes.insert("years".to_string(), json!(self.years.to_string()));

        let resol = self.resolution;
        let variables = vec![
            VariableSpec::coordinate("lat", geometry.latitudes().to_vec())
                .attribute(
                    "description",
                    format!("degrees of latitude North to South in {resol} degree steps"),
                )
                .attribute("units", "degrees_north")
                .attribute("long_name", "latitude")
                .attribute("axis", "Y"),
            VariableSpec::coordinate("lon", geometry.longitudes().to_vec())
                .attribute(
                    "description",
                    format!("degrees of longitude West to East in {resol} degree steps"),
                )
                .attribute("units", "degrees_east")
                .attribute("long_name", "longitude")
                .attribute("axis", "X"),
            VariableSpec::coordinate("time", axis.values().iter().map(|&d| d as f64).collect())
                .attribute("units", builder.units())
                .attribute("calendar", "standard")
                .attribute("axis", "T")
                .attribute("bounds", "time_bnds"),
            VariableSpec::coordinate("time_bnds", axis.flat_bounds())
                .with_dims(&["time", "bnds"])
                .with_shape(vec![nt, 2]),
            VariableSpec::data(&config.lsmask_var, &["lat", "lon"], vec![nlat, nlon])
                .attribute("long_name", "land-sea mask")
                .attribute("units", "1")
                .attribute("comment", "1 over land, 0 over sea"),
            VariableSpec::data(self.variable(), &["time", "lat", "lon"], vec![nt, nlat, nlon])
                .attribute("long_name", self.metric.description())
                .attribute("units", self.metric.units())
                .attribute("alignment", "cell centre")
                .attribute("missing_value", config.missing_value),
        ];

        Ok(DatasetSchema {
            attributes,
            variables,
        })
    }
}

/// Whether [`create_target_dataset`] built a new dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Created,
    Reused,
}

/// Create the empty target dataset for `defn` at `path`.
///
/// An existing dataset is removed first when `delete_existing` is set and
/// reused untouched otherwise.
pub fn create_target_dataset(
    backend: &dyn StoreBackend,
    path: &Path,
    defn: &TargetDefinition,
    config: &GridProcessorConfig,
    delete_existing: bool,
) -> Result<TargetStatus> {
    if backend.exists(path) {
        if !delete_existing {
            warn!(path = %path.display(), "Target already exists, reusing");
            return Ok(TargetStatus::Reused);
        }
        backend.remove(path)?;
        info!(path = %path.display(), "Deleted existing target");
    }

    let schema = defn.schema(config)?;
    let store = backend.create(path, &schema)?;
    store.close()?;

    info!(
        path = %path.display(),
        backend = backend.name(),
        metric = defn.variable(),
        months = defn.num_months(),
        "Created target dataset"
    );
    Ok(TargetStatus::Created)
}

/// Copy the land-sea mask under the target's extent from a clone dataset.
///
/// The clone rectangle runs from the cell holding the target's lower corner
/// to the cell holding its upper corner, inclusive. Where its size differs
/// from the target mask only the overlap is copied. Returns the number of
/// land cells written.
pub fn copy_land_sea_mask(
    clone: &dyn GridStore,
    clone_grid: &GridGeometry,
    target: &mut dyn GridStore,
    target_bbox: &BoundingBox,
    lsmask_var: &str,
) -> Result<usize> {
    let mut mapper = IndexMapper::new(clone_grid);
    let a = mapper.map(target_bbox.min_lat, target_bbox.min_lon);
    let b = mapper.map(target_bbox.max_lat, target_bbox.max_lon);
    mapper.flush_corrections("land-sea mask");

    let lat = a.lat.min(b.lat)..(a.lat.max(b.lat) + 1).min(clone_grid.nlat());
    let lon = a.lon.min(b.lon)..(a.lon.max(b.lon) + 1).min(clone_grid.nlon());
    let (rows, cols) = (lat.len(), lon.len());
    let mask = clone.read_region(lsmask_var, &[lat, lon])?;

    let target_shape = target.shape(lsmask_var)?;
    let [nlat, nlon] = target_shape[..] else {
        return Err(GridProcessorError::shape_mismatch(format!(
            "{lsmask_var}: expected a (lat, lon) mask, found {target_shape:?}"
        )));
    };
    if (rows, cols) != (nlat, nlon) {
        warn!(
            clone_rows = rows,
            clone_cols = cols,
            target_rows = nlat,
            target_cols = nlon,
            "Land-sea mask sizes differ, copying overlap"
        );
    }

    let (rows_used, cols_used) = (rows.min(nlat), cols.min(nlon));
    let values: Vec<CellValue> = (0..rows_used)
        .flat_map(|r| mask[r * cols..r * cols + cols_used].iter().copied())
        .collect();
    target.write_region(lsmask_var, &[0..rows_used, 0..cols_used], &values)?;

    let land = values
        .iter()
        .filter(|v| matches!(v, CellValue::Value(x) if *x == 1.0))
        .count();
    info!(path = %target.path().display(), land_cells = land, "Copied land-sea mask");
    Ok(land)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_layer, MemoryBackend, MemoryDataset, OpenMode};

    #[test]
    fn test_expand_bbox() {
        let template = BoundingBox::new(-10.4, 51.4, -5.5, 55.4);
        let clone = BoundingBox::new(-25.0, 35.0, 45.0, 73.0);
        let bbox = expand_bbox(&template, &clone, 0.125);

        assert!((bbox.min_lon - (-10.375 - 0.0625)).abs() < 1e-9);
        assert!((bbox.min_lat - (51.375 - 0.0625)).abs() < 1e-9);
        assert!((bbox.max_lon - (-5.5 + 0.125 + 0.0625)).abs() < 1e-9);
        assert!((bbox.max_lat - (55.375 + 0.125 + 0.0625)).abs() < 1e-9);
    }

    #[test]
    fn test_expand_bbox_clips_latitude() {
        let template = BoundingBox::new(0.0, 34.9, 1.0, 73.5);
        let clone = BoundingBox::new(-25.0, 35.0, 45.0, 73.0);
        let bbox = expand_bbox(&template, &clone, 0.5);
        assert_eq!(bbox.min_lat, 35.0);
        assert_eq!(bbox.max_lat, 73.0);
    }

    fn definition() -> TargetDefinition {
        TargetDefinition::new(
            Metric::Temperature,
            "RCP45",
            YearRange::new(1961, 1962).unwrap(),
            1.0,
            &BoundingBox::new(0.0, 0.0, 2.0, 1.0),
            &BoundingBox::new(-10.0, -10.0, 10.0, 10.0),
        )
        .unwrap()
    }

    #[test]
    fn test_target_definition_layout() {
        let defn = definition();
        assert_eq!(defn.file_stem(), "Tave_RCP45_1961_1962");
        assert_eq!(defn.num_months(), 24);

        let geometry = defn.geometry().unwrap();
        assert_eq!(geometry.longitudes(), &[-0.5, 0.5, 1.5, 2.5]);
        assert_eq!(geometry.latitudes(), &[-0.5, 0.5, 1.5]);
    }

    #[test]
    fn test_create_target_dataset() {
        let backend = MemoryBackend::new();
        let path = Path::new("/mem/Tave_RCP45_1961_1962");
        let config = GridProcessorConfig::default();
        let defn = definition();

        let status = create_target_dataset(&backend, path, &defn, &config, false).unwrap();
        assert_eq!(status, TargetStatus::Created);

        let store = backend.open_source(path).unwrap();
        assert_eq!(store.shape("Tairalign").unwrap(), vec![24, 3, 4]);
        assert_eq!(store.shape("time_bnds").unwrap(), vec![24, 2]);
        assert_eq!(store.shape("lsmask").unwrap(), vec![3, 4]);
        let layer = read_layer(store.as_ref(), "Tairalign", Some(23)).unwrap();
        assert_eq!(layer.count_valid(), 0);

        // January 1961 starts 22280 days after 1900-01-01
        let time = store.read_coordinate_axis("time").unwrap();
        assert_eq!(time.len(), 24);
        let bounds = store.read_region("time_bnds", &[0..1, 0..2]).unwrap();
        assert_eq!(bounds[0], CellValue::Value(22280.0));
        assert_eq!(bounds[1], CellValue::Value(22310.0));

        let status = create_target_dataset(&backend, path, &defn, &config, false).unwrap();
        assert_eq!(status, TargetStatus::Reused);
        let status = create_target_dataset(&backend, path, &defn, &config, true).unwrap();
        assert_eq!(status, TargetStatus::Created);
    }

    #[test]
    fn test_copy_land_sea_mask() {
        let backend = MemoryBackend::new();
        let clone_path = Path::new("/mem/clone");
        let coords: Vec<f64> = (0..6).map(|v| v as f64).collect();
        let mask: Vec<f64> = (0..36).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        backend
            .insert(
                clone_path,
                MemoryDataset::new()
                    .with_grid(&coords, &coords)
                    .with_raw("lsmask", vec![6, 6], &mask),
            )
            .unwrap();
        let target_path = Path::new("/mem/target");
        backend
            .insert(
                target_path,
                MemoryDataset::new().with_raw("lsmask", vec![3, 3], &[f64::NAN; 9]),
            )
            .unwrap();

        let clone = backend.open_source(clone_path).unwrap();
        let clone_grid = GridGeometry::from_coords(coords.clone(), coords).unwrap();
        let mut target = backend.open_target(target_path, OpenMode::Append).unwrap();

        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let land =
            copy_land_sea_mask(clone.as_ref(), &clone_grid, target.as_mut(), &bbox, "lsmask").unwrap();

        let copied = read_layer(target.as_ref(), "lsmask", None).unwrap();
        // clone rows 2..5, columns 1..4; even flat indices are land
        assert_eq!(copied.get(0, 0), Some(CellValue::Value(0.0)));
        assert_eq!(copied.get(0, 1), Some(CellValue::Value(1.0)));
        assert_eq!(land, 3);
    }
}
