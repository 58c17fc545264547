//! Conversion of absolute per-cell quantities to per-hectare densities.
//!
//! Used for livestock nitrogen layers: every `n_available_<animal>` layer is
//! divided by the area of its cell and written into `N<animal>` of one
//! combined dataset.

use std::path::Path;

use grid_common::{density_per_hectare, AreaEstimator, KM2_TO_HECTARES};
use tracing::{info, warn};

use crate::config::GridProcessorConfig;
use crate::error::{GridProcessorError, Result};
use crate::geometry::GridGeometry;
use crate::progress::{ProgressState, ProgressTracker};
use crate::store::{read_layer, write_layer, DatasetSchema, GridStore, VariableSpec};
use crate::types::{CellValue, GridSlice};

/// Variable holding the absolute quantity in single-layer sources.
pub const DENSITY_SOURCE_VAR: &str = "Band1";

/// `N<animal>` for a file named `..._<animal>.nc`.
pub fn density_variable_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let animal = stem.rsplit('_').next().filter(|a| !a.is_empty() && *a != stem)?;
    Some(format!("N{animal}"))
}

/// Cell area in km² of every row of `grid`.
///
/// Cells of one row share an area; the width is the first longitude step.
pub fn row_areas_km2(grid: &GridGeometry, estimator: &AreaEstimator) -> Vec<f64> {
    let lons = grid.longitudes();
    let resol = grid.resolution();
    grid.latitudes()
        .iter()
        .map(|&lat| estimator.row_cell_hectares(lat, lons[0], lons[1], resol) / KM2_TO_HECTARES)
        .collect()
}

/// Schema of a combined dataset holding one 2-D layer per variable.
pub fn density_schema(
    grid: &GridGeometry,
    variables: &[String],
    config: &GridProcessorConfig,
) -> DatasetSchema {
    let mut schema = DatasetSchema::default();
    schema.attributes.insert(
        "history".to_string(),
        serde_json::json!("livestock nitrogen per hectare"),
    );
    schema
        .variables
        .push(VariableSpec::coordinate("lat", grid.latitudes().to_vec()).attribute("units", "degrees_north"));
    schema
        .variables
        .push(VariableSpec::coordinate("lon", grid.longitudes().to_vec()).attribute("units", "degrees_east"));
    for name in variables {
        schema.variables.push(
            VariableSpec::data(name, &["lat", "lon"], vec![grid.nlat(), grid.nlon()])
                .attribute("units", "kg N/ha")
                .attribute("missing_value", config.missing_value),
        );
    }
    schema
}

/// Divides layers by their cell areas.
#[derive(Debug, Clone)]
pub struct DensityConverter {
    estimator: AreaEstimator,
    tracker: ProgressTracker,
}

impl DensityConverter {
    pub fn new(config: &GridProcessorConfig) -> Self {
        Self {
            estimator: AreaEstimator::default(),
            tracker: ProgressTracker::new(config.progress_interval()),
        }
    }

    /// Convert `source_var` of `source` into `target_var` of `target`.
    ///
    /// Both datasets share `grid`. Missing cells stay missing; malformed
    /// values are counted as unknown and written as missing.
    pub fn convert(
        &self,
        source: &dyn GridStore,
        source_var: &str,
        target: &mut dyn GridStore,
        target_var: &str,
        grid: &GridGeometry,
    ) -> Result<ProgressState> {
        let layer = read_layer(source, source_var, None)?;
        if layer.nlat() != grid.nlat() || layer.nlon() != grid.nlon() {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{source_var}: layer {}x{} does not match grid {}x{}",
                layer.nlat(),
                layer.nlon(),
                grid.nlat(),
                grid.nlon()
            )));
        }

        let areas = row_areas_km2(grid, &self.estimator);
        let mut out = GridSlice::missing(grid.nlat(), grid.nlon());
        let mut state = ProgressState::new(grid.cell_count());

        for (lat_index, &area) in areas.iter().enumerate() {
            for lon_index in 0..grid.nlon() {
                match layer.get(lat_index, lon_index) {
                    Some(CellValue::Value(v)) => match density_per_hectare(v, area) {
                        Some(density) => {
                            out.set(lat_index, lon_index, CellValue::Value(density))?;
                            state.valid += 1;
                        }
                        None => state.out_of_area += 1,
                    },
                    Some(CellValue::Malformed) => {
                        if state.unknown == 0 {
                            warn!(
                                variable = source_var,
                                lat_index,
                                lon_index,
                                "Unrecognised value, writing missing"
                            );
                        }
                        state.unknown += 1;
                    }
                    _ => state.masked += 1,
                }
                self.tracker.tick(&mut state);
            }
        }

        write_layer(target, target_var, None, &out)?;
        info!(
            source = %source.path().display(),
            variable = target_var,
            valid = state.valid,
            masked = state.masked,
            unknown = state.unknown,
            "Converted to per-hectare density"
        );
        Ok(state)
    }
}
