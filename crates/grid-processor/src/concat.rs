//! Stacking of yearly layers into one time series dataset.

use std::ops::Range;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::config::GridProcessorConfig;
use crate::error::{GridProcessorError, Result};
use crate::geometry::GridGeometry;
use crate::store::{region_len, DatasetSchema, GridStore, VariableSpec};
use crate::types::CellValue;

/// Fertiliser variables carried by each yearly file.
pub const FERTILISER_VARIABLES: [&str; 3] = ["Ndep", "Nmanure", "Nmineral"];

/// Split `era_fert_1990.nc` into the combined dataset stem and the year.
pub fn parse_yearly_name(path: &Path) -> Option<(String, i32)> {
    let stem = path.file_stem()?.to_str()?;
    let (prefix, year) = stem.rsplit_once('_')?;
    let year = year.parse().ok()?;
    (!prefix.is_empty()).then(|| (prefix.to_string(), year))
}

/// Schema of the stacked dataset: one yearly time step per source file.
pub fn concat_schema(
    grid: &GridGeometry,
    start_year: i32,
    num_years: usize,
    variables: &[&str],
    config: &GridProcessorConfig,
) -> Result<DatasetSchema> {
    let builder = config.time_axis_builder();
    let axis = builder.build_yearly(start_year, num_years)?;

    let mut schema = DatasetSchema::default();
    schema.attributes.insert(
        "history".to_string(),
        serde_json::json!(format!("yearly layers from {start_year}")),
    );
    schema.variables.extend([
        VariableSpec::coordinate("lat", grid.latitudes().to_vec()).attribute("units", "degrees_north"),
        VariableSpec::coordinate("lon", grid.longitudes().to_vec()).attribute("units", "degrees_east"),
        VariableSpec::coordinate("time", axis.values().iter().map(|&d| d as f64).collect())
            .attribute("units", builder.units())
            .attribute("calendar", "standard")
            .attribute("bounds", "time_bnds"),
        VariableSpec::coordinate("time_bnds", axis.flat_bounds())
            .with_dims(&["time", "bnds"])
            .with_shape(vec![axis.len(), 2]),
    ]);
    for name in variables {
        schema.variables.push(
            VariableSpec::data(name, &["time", "lat", "lon"], vec![axis.len(), grid.nlat(), grid.nlon()])
                .attribute("units", "kg N/ha")
                .attribute("missing_value", config.missing_value),
        );
    }
    Ok(schema)
}

/// Whole contents of a variable whose leading dimensions are all 1.
fn read_single_layer(store: &dyn GridStore, variable: &str) -> Result<(usize, usize, Vec<CellValue>)> {
    let shape = store.shape(variable)?;
    let n = shape.len();
    if n < 2 || shape[..n - 2].iter().any(|&d| d != 1) {
        return Err(GridProcessorError::shape_mismatch(format!(
            "{variable}: expected a single (lat, lon) layer, found {shape:?}"
        )));
    }
    let ranges: Vec<Range<usize>> = shape.iter().map(|&d| 0..d).collect();
    Ok((shape[n - 2], shape[n - 1], store.read_region(variable, &ranges)?))
}

/// Copy each variable of `source` into time step `time_index` of `target`.
pub fn stack_layer(
    source: &dyn GridStore,
    target: &mut dyn GridStore,
    time_index: usize,
    variables: &[&str],
) -> Result<()> {
    for &variable in variables {
        let (nlat, nlon, values) = read_single_layer(source, variable)?;
        let ranges = [time_index..time_index + 1, 0..nlat, 0..nlon];
        region_len(variable, &target.shape(variable)?, &ranges)?;
        target.write_region(variable, &ranges, &values)?;
    }
    info!(
        source = %source.path().display(),
        time_index,
        "Stacked yearly layer"
    );
    Ok(())
}

/// Cells of one variable with and without any non-zero value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZeroMaskSummary {
    pub with_data: usize,
    pub without_data: usize,
}

/// Replace every cell whose time series holds no non-zero value with missing.
pub fn mask_zero_series(target: &mut dyn GridStore, variable: &str) -> Result<ZeroMaskSummary> {
    let shape = target.shape(variable)?;
    let [nt, nlat, nlon] = shape[..] else {
        return Err(GridProcessorError::shape_mismatch(format!(
            "{variable}: expected (time, lat, lon), found {shape:?}"
        )));
    };
    let ranges = [0..nt, 0..nlat, 0..nlon];
    let mut values = target.read_region(variable, &ranges)?;

    let cells = nlat * nlon;
    let mut summary = ZeroMaskSummary::default();
    for cell in 0..cells {
        let has_data = (0..nt).any(|t| matches!(values[t * cells + cell], CellValue::Value(v) if v != 0.0));
        if has_data {
            summary.with_data += 1;
        } else {
            summary.without_data += 1;
            for t in 0..nt {
                values[t * cells + cell] = CellValue::Missing;
            }
        }
    }

    target.write_region(variable, &ranges, &values)?;
    info!(
        variable,
        with_data = summary.with_data,
        without_data = summary.without_data,
        "Masked all-zero cells"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, MemoryDataset, OpenMode, StoreBackend};

    #[test]
    fn test_parse_yearly_name() {
        assert_eq!(
            parse_yearly_name(Path::new("/fert/1990/era_fert_1990.nc")),
            Some(("era_fert".to_string(), 1990))
        );
        assert_eq!(parse_yearly_name(Path::new("era_fert.nc")), None);
        assert_eq!(parse_yearly_name(Path::new("_1990.nc")), None);
    }

    #[test]
    fn test_stack_and_mask() {
        let backend = MemoryBackend::new();
        for (year, values) in [(1990, [0.0, 1.0, 0.0, f64::NAN]), (1991, [0.0, 0.0, 2.0, 0.0])] {
            backend
                .insert(
                    format!("/mem/era_{year}"),
                    MemoryDataset::new().with_raw("Ndep", vec![1, 1, 2, 2], &values),
                )
                .unwrap();
        }
        let target_path = Path::new("/mem/era");
        backend
            .insert(
                target_path,
                MemoryDataset::new().with_raw("Ndep", vec![2, 2, 2], &[f64::NAN; 8]),
            )
            .unwrap();
        let mut target = backend.open_target(target_path, OpenMode::Append).unwrap();

        for (t, year) in [1990, 1991].into_iter().enumerate() {
            let source = backend
                .open_source(Path::new(&format!("/mem/era_{year}")))
                .unwrap();
            stack_layer(source.as_ref(), target.as_mut(), t, &["Ndep"]).unwrap();
        }

        let summary = mask_zero_series(target.as_mut(), "Ndep").unwrap();
        assert_eq!(summary, ZeroMaskSummary { with_data: 2, without_data: 2 });

        let values = target.read_region("Ndep", &[0..2, 0..2, 0..2]).unwrap();
        assert_eq!(values[0], CellValue::Missing);
        assert_eq!(values[4], CellValue::Missing);
        assert_eq!(values[1], CellValue::Value(1.0));
        assert_eq!(values[6], CellValue::Value(2.0));
        assert_eq!(values[3], CellValue::Missing);
    }
}
