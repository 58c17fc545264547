//! Standalone layer jobs: livestock densities and fertiliser time series.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use grid_processor::{
    concat_schema, density_schema, density_variable_name, mask_zero_series, parse_yearly_name,
    stack_layer, DensityConverter, GridGeometry, GridProcessorConfig, RunSummary, StoreBackend,
    TaskSummary, ZeroMaskSummary, DENSITY_SOURCE_VAR, FERTILISER_VARIABLES,
};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::sources::list_datasets;

/// Prefix of per-animal nitrogen layers.
pub const LIVESTOCK_PREFIX: &str = "n_available_";

/// Stem of the combined livestock dataset.
pub const LIVESTOCK_OUTPUT: &str = "n_available_livestock";

/// Prefix of yearly fertiliser files.
pub const FERTILISER_PREFIX: &str = "era";

/// Subdirectory receiving the stacked fertiliser dataset.
pub const CONCAT_DIR: &str = "concat_dset";

/// Returns true when an existing output may be replaced, deleting it first.
fn clear_output(backend: &dyn StoreBackend, path: &Path, delete_existing: bool) -> Result<bool> {
    if !backend.exists(path) {
        return Ok(true);
    }
    if !delete_existing {
        warn!(path = %path.display(), "Output already exists, rerun with --delete to replace it");
        return Ok(false);
    }
    backend
        .remove(path)
        .with_context(|| format!("deleting {}", path.display()))?;
    info!(path = %path.display(), "Deleted existing output");
    Ok(true)
}

/// Combine every `n_available_<animal>` layer of `dir` into per-hectare
/// densities `N<animal>` of `n_available_livestock`.
pub fn integrate_livestock(
    backend: &dyn StoreBackend,
    dir: &Path,
    delete_existing: bool,
    config: &GridProcessorConfig,
) -> Result<RunSummary> {
    let ext = backend.extension();
    let output = dir.join(format!("{LIVESTOCK_OUTPUT}.{ext}"));
    let output_name = format!("{LIVESTOCK_OUTPUT}.{ext}");

    let inputs = list_datasets(dir, ext, |name| {
        name.starts_with(LIVESTOCK_PREFIX) && name != output_name
    });
    let Some(last) = inputs.last() else {
        bail!("no {LIVESTOCK_PREFIX}* datasets in {}", dir.display());
    };

    let mut summary = RunSummary::default();
    if !clear_output(backend, &output, delete_existing)? {
        return Ok(summary);
    }

    let mut layers = Vec::with_capacity(inputs.len());
    for path in &inputs {
        match density_variable_name(path) {
            Some(variable) => layers.push((path.clone(), variable)),
            None => summary.skip("livestock", &path.display().to_string(), "no animal name"),
        }
    }
    let variables: Vec<String> = layers.iter().map(|(_, v)| v.clone()).collect();

    let grid = {
        let store = backend.open_source(last)?;
        let grid = GridGeometry::from_store(store.as_ref(), config.resolution_tolerance)?;
        store.close()?;
        grid
    };
    info!(
        inputs = layers.len(),
        nlat = grid.nlat(),
        nlon = grid.nlon(),
        output = %output.display(),
        "Integrating livestock layers"
    );

    let mut target = backend
        .create(&output, &density_schema(&grid, &variables, config))
        .with_context(|| format!("creating {}", output.display()))?;
    let converter = DensityConverter::new(config);

    for (path, variable) in &layers {
        let converted = backend.open_source(path).and_then(|source| {
            let state = converter.convert(source.as_ref(), DENSITY_SOURCE_VAR, target.as_mut(), variable, &grid)?;
            source.close()?;
            Ok(state)
        });
        match converted {
            Ok(state) => summary.record(TaskSummary {
                metric: "livestock".to_string(),
                label: variable.clone(),
                source: path.clone(),
                target_time_index: 0,
                replicated: 0,
                corrections: 0,
                state,
            }),
            Err(e) => summary.skip("livestock", variable, e),
        }
    }

    target.close()?;
    summary.add_output(&output);
    Ok(summary)
}

/// Outcome of a fertiliser concatenation.
#[derive(Debug, Clone, Serialize)]
pub struct ConcatSummary {
    pub output: PathBuf,
    pub start_year: i32,
    pub end_year: i32,
    pub layers: usize,
    /// Years in range with no file; their time steps stay missing.
    pub missing_years: Vec<i32>,
    /// Further files for a year already stacked, left out.
    pub duplicates: Vec<PathBuf>,
    pub masks: Vec<(String, ZeroMaskSummary)>,
}

impl fmt::Display for ConcatSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Stacked {} yearly layers from {} to {} into {}",
            self.layers,
            self.start_year,
            self.end_year,
            self.output.display()
        )?;
        if !self.missing_years.is_empty() {
            writeln!(f, "Missing years: {:?}", self.missing_years)?;
        }
        for path in &self.duplicates {
            writeln!(f, "Duplicate year skipped: {}", path.display())?;
        }
        for (variable, mask) in &self.masks {
            writeln!(
                f,
                "{variable}: {} cells with data, {} without",
                mask.with_data, mask.without_data
            )?;
        }
        Ok(())
    }
}

/// Yearly fertiliser files one directory below `dir` with their years,
/// sorted by year then path. Files without a trailing year are ignored.
pub fn yearly_files(dir: &Path, extension: &str) -> Vec<(i32, PathBuf)> {
    let suffix = format!(".{extension}");
    let mut files: Vec<(i32, PathBuf)> = WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .filter_entry(|entry| entry.depth() != 1 || entry.file_name() != CONCAT_DIR)
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 2 && name.starts_with(FERTILISER_PREFIX) && name.ends_with(&suffix)
        })
        .filter_map(|entry| {
            let path = entry.into_path();
            match parse_yearly_name(&path) {
                Some((_, year)) => Some((year, path)),
                None => {
                    warn!(path = %path.display(), "No year in file name, ignoring");
                    None
                }
            }
        })
        .collect();
    files.sort();
    files
}

/// Stack the yearly fertiliser layers under `dir` into `<dir>/concat_dset/<stem>`,
/// one time step per year from the earliest to the latest year found, then
/// mask all-zero cells.
///
/// Each file lands at its own year's time step. Years without a file stay
/// missing; a second file for the same year is skipped. Both are reported
/// in the summary.
///
/// Returns `None` when the output exists and `delete_existing` is unset.
pub fn concat_fertiliser(
    backend: &dyn StoreBackend,
    dir: &Path,
    delete_existing: bool,
    config: &GridProcessorConfig,
) -> Result<Option<ConcatSummary>> {
    let ext = backend.extension();
    let files = yearly_files(dir, ext);
    let (Some((start_year, first)), Some((end_year, _))) = (files.first(), files.last()) else {
        bail!("no {FERTILISER_PREFIX}*_<year> datasets under {}", dir.display());
    };
    let (start_year, end_year) = (*start_year, *end_year);
    let Some((stem, _)) = parse_yearly_name(first) else {
        bail!("cannot read a year from {}", first.display());
    };

    let mut stacked: Vec<(usize, &PathBuf)> = Vec::with_capacity(files.len());
    let mut duplicates = Vec::new();
    let mut previous = None;
    for (year, path) in &files {
        if previous == Some(*year) {
            warn!(year, path = %path.display(), "Duplicate year, skipping");
            duplicates.push(path.clone());
            continue;
        }
        previous = Some(*year);
        stacked.push(((year - start_year) as usize, path));
    }
    let num_years = (end_year - start_year) as usize + 1;
    let missing_years: Vec<i32> = (start_year..=end_year)
        .filter(|year| files.binary_search_by_key(year, |(y, _)| *y).is_err())
        .collect();
    if !missing_years.is_empty() {
        warn!(?missing_years, "Gaps in yearly fertiliser files");
    }

    let out_dir = dir.join(CONCAT_DIR);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let output = out_dir.join(format!("{stem}.{ext}"));
    if !clear_output(backend, &output, delete_existing)? {
        return Ok(None);
    }

    let grid = {
        let store = backend.open_source(first)?;
        let grid = GridGeometry::from_store(store.as_ref(), config.resolution_tolerance)?;
        store.close()?;
        grid
    };
    let schema = concat_schema(&grid, start_year, num_years, &FERTILISER_VARIABLES, config)?;
    let mut target = backend
        .create(&output, &schema)
        .with_context(|| format!("creating {}", output.display()))?;

    for &(time_index, path) in &stacked {
        let source = backend.open_source(path)?;
        stack_layer(source.as_ref(), target.as_mut(), time_index, &FERTILISER_VARIABLES)
            .with_context(|| format!("stacking {}", path.display()))?;
        source.close()?;
    }

    let mut masks = Vec::with_capacity(FERTILISER_VARIABLES.len());
    for variable in FERTILISER_VARIABLES {
        masks.push((variable.to_string(), mask_zero_series(target.as_mut(), variable)?));
    }
    target.close()?;

    Ok(Some(ConcatSummary {
        output,
        start_year,
        end_year,
        layers: stacked.len(),
        missing_years,
        duplicates,
        masks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{scratch_dir, touch_files};

    #[test]
    fn test_yearly_files_skip_output_dir() {
        let root = scratch_dir();
        touch_files(
            root.path(),
            &[
                "a/era_fert_1991.nc",
                "b/era_fert_1990.nc",
                "b/other_1990.nc",
                "era_fert_1989.nc",
                "concat_dset/era_fert.nc",
            ],
        );
        let files = yearly_files(root.path(), "nc");
        let names: Vec<(i32, String)> = files
            .iter()
            .map(|(year, p)| (*year, p.strip_prefix(root.path()).unwrap().display().to_string()))
            .collect();
        assert_eq!(
            names,
            vec![(1990, "b/era_fert_1990.nc".to_string()), (1991, "a/era_fert_1991.nc".to_string())]
        );
    }

    #[test]
    fn test_yearly_files_ignore_names_without_year() {
        let root = scratch_dir();
        touch_files(root.path(), &["x/era_fert_1990.nc", "x/era_fert_final.nc"]);
        let files = yearly_files(root.path(), "nc");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, 1990);
    }
}
