//! Discovery of weather datasets and decadal input files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use grid_common::{Cadence, Metric, ResourceTable, Scenario, WeatherResource, YearRange};
use grid_processor::{GridGeometry, GridProcessorConfig, GridStore, PeriodSource, StoreBackend};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory prefix of ECLIPS 2.0 inputs, e.g. `ECLIPS2_0_196190`.
pub const ECLIPS_PREFIX: &str = "ECLIPS2_0_";

/// Cadence directories every resource must provide.
const CADENCES: [Cadence; 2] = [Cadence::Monthly, Cadence::Daily];

/// Two datasets of one resource and cadence, plus the grid they share.
#[derive(Debug, Clone)]
pub struct WeatherSet {
    pub resource: WeatherResource,
    pub cadence: Cadence,
    pub base_dir: PathBuf,
    pub precip_path: PathBuf,
    pub precip_var: String,
    pub tas_path: PathBuf,
    pub tas_var: String,
    pub geometry: GridGeometry,
    /// Span of the time axis, when the dataset has one.
    pub years: Option<YearRange>,
}

impl WeatherSet {
    /// Key such as `HARMONIE_Mnth`.
    pub fn key(&self) -> String {
        set_key(self.resource, self.cadence)
    }

    pub fn path_for(&self, metric: Metric) -> &Path {
        match metric {
            Metric::Precipitation => &self.precip_path,
            Metric::Temperature => &self.tas_path,
        }
    }

    pub fn variable_for(&self, metric: Metric) -> &str {
        match metric {
            Metric::Precipitation => &self.precip_var,
            Metric::Temperature => &self.tas_var,
        }
    }
}

fn set_key(resource: WeatherResource, cadence: Cadence) -> String {
    format!("{}_{}", resource.short_name(), cadence.abbrev())
}

/// Every weather set found under a root directory.
#[derive(Debug, Clone, Default)]
pub struct WeatherSets {
    sets: BTreeMap<String, WeatherSet>,
    /// Resources with a usable dataset pair for every cadence.
    pub valid_resources: Vec<WeatherResource>,
}

impl WeatherSets {
    pub fn get(&self, resource: WeatherResource, cadence: Cadence) -> Result<&WeatherSet> {
        let key = set_key(resource, cadence);
        self.sets
            .get(&key)
            .ok_or_else(|| anyhow!("weather set {key} must be present"))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Datasets directly inside `dir` whose names pass `accept`, sorted by name.
pub fn list_datasets(dir: &Path, extension: &str, accept: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let suffix = format!(".{extension}");
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.ends_with(&suffix) && accept(&name)
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Survey `<weather_root>/<resource>/<cadence>` for every resource of `table`.
///
/// A cadence directory needs at least two datasets matching the resource's
/// file tokens: the first supplies precipitation, the second temperature.
/// Grid and year span are read from the first.
pub fn discover_weather_sets(
    weather_root: &Path,
    table: &ResourceTable,
    backend: &dyn StoreBackend,
    config: &GridProcessorConfig,
) -> WeatherSets {
    let mut found = WeatherSets::default();

    for (resource, defn) in table.iter() {
        let mut resource_valid = true;

        for cadence in CADENCES {
            let dir = weather_root.join(resource.dir_name()).join(cadence.dir_name());
            if !dir.is_dir() {
                info!(resource = %resource, dir = %dir.display(), "Cadence directory does not exist");
                resource_valid = false;
                break;
            }

            let datasets = list_datasets(&dir, backend.extension(), |name| defn.matches(name));
            if datasets.len() < 2 {
                warn!(
                    resource = %resource,
                    cadence = %cadence,
                    found = datasets.len(),
                    dir = %dir.display(),
                    "Two datasets must be present"
                );
                resource_valid = false;
                continue;
            }

            match read_set_details(&datasets[0], backend, config) {
                Ok((geometry, years)) => {
                    let set = WeatherSet {
                        resource,
                        cadence,
                        base_dir: dir,
                        precip_path: datasets[0].clone(),
                        precip_var: defn.precip_var.clone(),
                        tas_path: datasets[1].clone(),
                        tas_var: defn.tas_var.clone(),
                        geometry,
                        years,
                    };
                    debug!(key = %set.key(), nlat = set.geometry.nlat(), nlon = set.geometry.nlon(), "Found weather set");
                    found.sets.insert(set.key(), set);
                }
                Err(e) => {
                    warn!(resource = %resource, cadence = %cadence, error = %e, "Unreadable weather set");
                    resource_valid = false;
                }
            }
        }

        if resource_valid {
            found.valid_resources.push(resource);
        }
    }

    found.valid_resources.sort();
    info!(
        sets = found.len(),
        valid = ?found.valid_resources,
        "Weather set discovery complete"
    );
    found
}

fn read_set_details(
    path: &Path,
    backend: &dyn StoreBackend,
    config: &GridProcessorConfig,
) -> Result<(GridGeometry, Option<YearRange>)> {
    let store = backend.open_source(path)?;
    let geometry = GridGeometry::from_store(store.as_ref(), config.resolution_tolerance)?;
    let years = read_year_span(store.as_ref(), config)?;
    store.close()?;
    Ok((geometry, years))
}

fn read_year_span(store: &dyn GridStore, config: &GridProcessorConfig) -> Result<Option<YearRange>> {
    if !store.has_variable("time") {
        return Ok(None);
    }
    let days = store.read_coordinate_axis("time")?;
    let (Some(first), Some(last)) = (days.first(), days.last()) else {
        return Ok(None);
    };
    let builder = config.time_axis_builder();
    let years = YearRange::new(builder.year_of(*first as i64)?, builder.year_of(*last as i64)?)?;
    Ok(Some(years))
}

/// `<eclips_dir>/ECLIPS2_0_<decade>`
pub fn historic_dir(eclips_dir: &Path, decade: &str) -> PathBuf {
    eclips_dir.join(format!("{ECLIPS_PREFIX}{decade}"))
}

/// `<eclips_dir>/ECLIPS2_0_<scenario>/<gcm><scenario suffix>`
pub fn future_dir(eclips_dir: &Path, scenario: Scenario, gcm: &str) -> PathBuf {
    eclips_dir
        .join(format!("{ECLIPS_PREFIX}{}", scenario.name()))
        .join(format!("{gcm}{}", scenario.suffix()))
}

/// Monthly inputs of one historic decade: `<prefix>*.<ext>`.
pub fn historic_files(eclips_dir: &Path, decade: &str, prefix: &str, extension: &str) -> Vec<PathBuf> {
    let dir = historic_dir(eclips_dir, decade);
    let files = list_datasets(&dir, extension, |name| name.starts_with(prefix));
    info!(prefix, files = files.len(), dir = %dir.display(), "Historic inputs");
    files
}

/// Monthly inputs of one future decade: `<prefix>*<decade>.<ext>`.
pub fn future_files(dir: &Path, decade: &str, prefix: &str, extension: &str) -> Vec<PathBuf> {
    let stem_end = format!("{decade}.{extension}");
    let files = list_datasets(dir, extension, |name| {
        name.starts_with(prefix) && name.ends_with(&stem_end)
    });
    info!(prefix, decade, files = files.len(), dir = %dir.display(), "Future inputs");
    files
}

/// Period sources of one decade, in file name order.
///
/// A file whose month cannot be read ends the list with an error.
pub fn decade_periods(files: &[PathBuf], prefix: &str, decade: &str) -> Result<Vec<PeriodSource>> {
    let period = YearRange::from_decade_code(decade)?;
    files
        .iter()
        .map(|path| {
            PeriodSource::from_file(path, prefix, period)
                .with_context(|| format!("reading month of {}", path.display()))
        })
        .collect()
}

/// Fail unless the future input directory exists.
pub fn require_future_dir(eclips_dir: &Path, scenario: Scenario, gcm: &str) -> Result<PathBuf> {
    let dir = future_dir(eclips_dir, scenario, gcm);
    if !dir.is_dir() {
        bail!("{} does not exist", dir.display());
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{scratch_dir, touch_files};

    #[test]
    fn test_future_dir_layout() {
        let dir = future_dir(Path::new("/in"), Scenario::Rcp45, "DMI_HIRAM");
        assert_eq!(dir, PathBuf::from("/in/ECLIPS2_0_RCP45/DMI_HIRAM_4.5"));
        assert_eq!(historic_dir(Path::new("/in"), "196190"), PathBuf::from("/in/ECLIPS2_0_196190"));
    }

    #[test]
    fn test_historic_and_future_files() {
        let root = scratch_dir();
        touch_files(
            root.path(),
            &[
                "ECLIPS2_0_196190/Tave02_196190.nc",
                "ECLIPS2_0_196190/Tave01_196190.nc",
                "ECLIPS2_0_196190/PPT01_196190.nc",
                "ECLIPS2_0_196190/Tave01_196190.txt",
                "ECLIPS2_0_RCP45/DMI_HIRAM_4.5/Tave01_201120.nc",
                "ECLIPS2_0_RCP45/DMI_HIRAM_4.5/Tave01_202140.nc",
            ],
        );

        let files = historic_files(root.path(), "196190", "Tave", "nc");
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Tave01_196190.nc", "Tave02_196190.nc"]);

        let periods = decade_periods(&files, "Tave", "196190").unwrap();
        assert_eq!(periods[1].month, 2);
        assert_eq!(periods[1].period, YearRange::new(1961, 1990).unwrap());

        let dir = require_future_dir(root.path(), Scenario::Rcp45, "DMI_HIRAM").unwrap();
        assert_eq!(future_files(&dir, "202140", "Tave", "nc").len(), 1);
        assert!(require_future_dir(root.path(), Scenario::Rcp85, "DMI_HIRAM").is_err());
    }

    #[test]
    fn test_bad_month_is_an_error() {
        let files = vec![PathBuf::from("Tave01_196190.nc"), PathBuf::from("Tavex_196190.nc")];
        assert!(decade_periods(&files, "Tave", "196190").is_err());
    }
}
