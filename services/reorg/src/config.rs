//! Run configuration for the reorganisation driver.
//!
//! Loaded from a YAML file with `${VAR}` / `${VAR:-default}` substitution,
//! then adjusted by command line flags, then validated once.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use grid_common::{Metric, ResourceTable, Scenario, YearRange};
use grid_processor::GridProcessorConfig;
use serde::{Deserialize, Serialize};

/// Container format of target datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Zarr,
    Netcdf,
}

impl FromStr for StorageFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zarr" => Ok(Self::Zarr),
            "netcdf" | "nc" => Ok(Self::Netcdf),
            other => bail!("unknown storage format '{other}', expected zarr or netcdf"),
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zarr => f.write_str("zarr"),
            Self::Netcdf => f.write_str("netcdf"),
        }
    }
}

/// Everything one reorganisation run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Root holding one directory per weather resource.
    pub weather_root: PathBuf,

    /// Root of the ECLIPS 2.0 decadal inputs.
    pub eclips_dir: PathBuf,

    /// Where target datasets are written; `<weather_root>/ECLIPS2/Monthly` when unset.
    pub output_dir: Option<PathBuf>,

    pub scenario: Scenario,

    /// Climate model whose future projections are read.
    pub gcm: String,

    pub historic_decades: Vec<String>,
    pub future_decades: Vec<String>,

    /// First and last year of the target time axis.
    pub data_start_year: i32,
    pub data_end_year: i32,

    /// Target resolution in degrees.
    pub resolution: f64,

    pub metrics: Vec<Metric>,

    pub populate_historic: bool,
    pub populate_future: bool,
    pub temperature_only: bool,

    /// Remove existing targets before creating them.
    pub delete_existing: bool,

    pub storage_format: StorageFormat,

    /// Metrics processed concurrently.
    pub workers: usize,

    pub resources: ResourceTable,

    pub processor: GridProcessorConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            weather_root: PathBuf::from("/data/weather"),
            eclips_dir: PathBuf::from("/data/ECLIPS2.0_ncs"),
            output_dir: None,
            scenario: Scenario::Rcp45,
            gcm: "CLMcom_CCLM".to_string(),
            historic_decades: vec!["196190".to_string(), "199110".to_string()],
            future_decades: ["201120", "202140", "204160", "206180", "208100"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            data_start_year: 1961,
            data_end_year: 2100,
            resolution: 0.125,
            metrics: Metric::ALL.to_vec(),
            populate_historic: true,
            populate_future: true,
            temperature_only: false,
            delete_existing: false,
            storage_format: StorageFormat::Zarr,
            workers: 2,
            resources: ResourceTable::default(),
            processor: GridProcessorConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a YAML file, expanding environment variables first.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run config from {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid run config {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        serde_yaml::from_str(&expanded).context("Failed to parse run config YAML")
    }

    /// Check the configuration before any work starts.
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            bail!("resolution must be a positive number of degrees");
        }
        YearRange::new(self.data_start_year, self.data_end_year)
            .context("data_end_year must not precede data_start_year")?;
        if self.metrics.is_empty() {
            bail!("at least one metric must be configured");
        }
        if self.workers == 0 {
            bail!("workers must be > 0");
        }
        if self.gcm.trim().is_empty() && self.populate_future {
            bail!("gcm must be set to populate future data");
        }
        for code in &self.historic_decades {
            let period = YearRange::from_decade_code(code)?;
            if period.start < self.data_start_year {
                bail!("historic decade {code} starts before data_start_year {}", self.data_start_year);
            }
        }
        for code in &self.future_decades {
            let period = YearRange::from_decade_code(code)?;
            if period.end > self.data_end_year {
                bail!("future decade {code} ends after data_end_year {}", self.data_end_year);
            }
        }
        self.resources.validate()?;
        self.processor
            .validate()
            .map_err(|e| anyhow::anyhow!("processor: {e}"))?;
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.weather_root.join("ECLIPS2").join("Monthly"))
    }

    pub fn years(&self) -> Result<YearRange> {
        Ok(YearRange::new(self.data_start_year, self.data_end_year)?)
    }

    /// Metrics to process, honouring `temperature_only`.
    pub fn active_metrics(&self) -> Vec<Metric> {
        self.metrics
            .iter()
            .copied()
            .filter(|m| !self.temperature_only || *m == Metric::Temperature)
            .collect()
    }
}

/// Command line adjustments applied on top of the YAML file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub weather_root: Option<PathBuf>,
    pub eclips_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub scenario: Option<Scenario>,
    pub gcm: Option<String>,
    pub storage_format: Option<StorageFormat>,
    pub workers: Option<usize>,
    pub skip_historic: bool,
    pub skip_future: bool,
    pub temperature_only: bool,
    pub delete_existing: bool,
}

impl RunOverrides {
    pub fn apply(self, config: &mut RunConfig) {
        if let Some(dir) = self.weather_root {
            config.weather_root = dir;
        }
        if let Some(dir) = self.eclips_dir {
            config.eclips_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = Some(dir);
        }
        if let Some(scenario) = self.scenario {
            config.scenario = scenario;
        }
        if let Some(gcm) = self.gcm {
            config.gcm = gcm;
        }
        if let Some(format) = self.storage_format {
            config.storage_format = format;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.skip_historic {
            config.populate_historic = false;
        }
        if self.skip_future {
            config.populate_future = false;
        }
        config.temperature_only |= self.temperature_only;
        config.delete_existing |= self.delete_existing;
    }
}

/// Expand environment variables in YAML content.
/// Supports ${VAR} and ${VAR:-default} syntax.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }

            result.push_str(&resolve_var_expr(&var_expr)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("REORG_TEST_VAR", "test_value");
        let result = expand_env_vars("prefix_${REORG_TEST_VAR}_suffix").unwrap();
        assert_eq!(result, "prefix_test_value_suffix");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("REORG_NONEXISTENT_VAR");
        let result = expand_env_vars("value_${REORG_NONEXISTENT_VAR:-default}_end").unwrap();
        assert_eq!(result, "value_default_end");
    }

    #[test]
    fn test_expand_env_vars_missing_required() {
        std::env::remove_var("REORG_REQUIRED_VAR");
        assert!(expand_env_vars("${REORG_REQUIRED_VAR}").is_err());
        assert!(expand_env_vars("${UNCLOSED").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.output_dir(), PathBuf::from("/data/weather/ECLIPS2/Monthly"));
        assert_eq!(config.active_metrics().len(), 2);
    }

    #[test]
    fn test_partial_yaml() {
        let config = RunConfig::from_yaml(
            r#"
weather_root: ${REORG_YAML_ROOT:-/srv/weather}
scenario: RCP85
gcm: DMI_HIRAM
temperature_only: true
storage_format: netcdf
processor:
  lsmask_var: landmask
resources:
  HARMONIE_V2:
    precip_var: Precipalign
    tas_var: Tairalign
    file_tokens: [cruhar_v3_1_19]
"#,
        )
        .unwrap();

        assert_eq!(config.weather_root, PathBuf::from("/srv/weather"));
        assert_eq!(config.scenario, Scenario::Rcp85);
        assert_eq!(config.storage_format, StorageFormat::Netcdf);
        assert_eq!(config.processor.lsmask_var, "landmask");
        assert_eq!(config.processor.missing_value, -999.0);
        assert_eq!(config.resources.len(), 1);
        assert_eq!(config.active_metrics(), vec![Metric::Temperature]);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_failures() {
        let mut config = RunConfig::default();
        config.resolution = 0.0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.historic_decades = vec!["195160".to_string()];
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.future_decades = vec!["2081x0".to_string()];
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = RunConfig::default();
        RunOverrides {
            gcm: Some("DMI_HIRAM".to_string()),
            storage_format: Some(StorageFormat::Netcdf),
            skip_future: true,
            temperature_only: true,
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.gcm, "DMI_HIRAM");
        assert_eq!(config.storage_format, StorageFormat::Netcdf);
        assert!(!config.populate_future);
        assert!(config.populate_historic);
        assert!(config.temperature_only);
    }

    #[test]
    fn test_storage_format_from_str() {
        assert_eq!("ZARR".parse::<StorageFormat>().unwrap(), StorageFormat::Zarr);
        assert_eq!("nc".parse::<StorageFormat>().unwrap(), StorageFormat::Netcdf);
        assert!("hdf".parse::<StorageFormat>().is_err());
    }
}
