//! Configuration for the grid processor.

use std::time::Duration;

use chrono::NaiveDate;
use grid_common::TimeAxisBuilder;
use serde::{Deserialize, Serialize};

/// Configuration for the grid processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridProcessorConfig {
    /// Seconds between progress reports during a traversal.
    pub progress_interval_secs: u64,

    /// Reference date of all time coordinates.
    pub time_epoch: NaiveDate,

    /// Largest accepted difference between latitude and longitude spacing.
    pub resolution_tolerance: f64,

    /// Land-sea mask variable in clone and target datasets.
    pub lsmask_var: String,

    /// Missing marker recorded in dataset attributes and recognised on read.
    pub missing_value: f64,

    /// Spatial chunk dimension for Zarr arrays (square chunks, one time step deep).
    pub zarr_chunk_size: usize,

    /// Compression codec for Zarr arrays.
    pub zarr_compression: ZarrCompression,

    /// Compression level (1-9).
    pub zarr_compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub zarr_shuffle: bool,
}

impl Default for GridProcessorConfig {
    fn default() -> Self {
        Self {
            progress_interval_secs: 5,
            time_epoch: TimeAxisBuilder::default().epoch(),
            resolution_tolerance: 1e-6,
            lsmask_var: "lsmask".to_string(),
            missing_value: -999.0,
            zarr_chunk_size: 256,
            zarr_compression: ZarrCompression::BloscZstd,
            zarr_compression_level: 1,
            zarr_shuffle: true,
        }
    }
}

impl GridProcessorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PROGRESS_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.progress_interval_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("TIME_EPOCH") {
            if let Ok(date) = NaiveDate::parse_from_str(&val, "%Y-%m-%d") {
                config.time_epoch = date;
            }
        }

        if let Ok(val) = std::env::var("RESOLUTION_TOLERANCE") {
            if let Ok(tol) = val.parse() {
                config.resolution_tolerance = tol;
            }
        }

        if let Ok(val) = std::env::var("LSMASK_VAR") {
            config.lsmask_var = val;
        }

        if let Ok(val) = std::env::var("MISSING_VALUE") {
            if let Ok(missing) = val.parse() {
                config.missing_value = missing;
            }
        }

        if let Ok(val) = std::env::var("ZARR_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.zarr_chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            config.zarr_compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.zarr_compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            config.zarr_shuffle = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.progress_interval_secs == 0 {
            return Err("progress_interval_secs must be > 0".to_string());
        }

        if !(self.resolution_tolerance.is_finite() && self.resolution_tolerance >= 0.0) {
            return Err("resolution_tolerance must be a non-negative number".to_string());
        }

        if self.lsmask_var.trim().is_empty() {
            return Err("lsmask_var must not be empty".to_string());
        }

        if !self.missing_value.is_finite() {
            return Err("missing_value must be finite".to_string());
        }

        if self.zarr_chunk_size == 0 {
            return Err("zarr_chunk_size must be > 0".to_string());
        }

        if self.zarr_compression_level == 0 || self.zarr_compression_level > 9 {
            return Err("zarr_compression_level must be 1-9".to_string());
        }

        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn time_axis_builder(&self) -> TimeAxisBuilder {
        TimeAxisBuilder::new(self.time_epoch)
    }
}

/// Compression codec for Zarr arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" | "blosc_lz4" => Self::BloscLz4,
            _ => Self::BloscZstd,
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GridProcessorConfig::default();
        assert_eq!(config.progress_interval(), Duration::from_secs(5));
        assert_eq!(config.time_epoch, NaiveDate::from_ymd_opt(1900, 1, 1).unwrap());
        assert_eq!(config.lsmask_var, "lsmask");
        assert_eq!(config.missing_value, -999.0);
        assert_eq!(config.zarr_compression, ZarrCompression::BloscZstd);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = GridProcessorConfig::default();
        config.progress_interval_secs = 0;
        assert!(config.validate().is_err());

        config = GridProcessorConfig::default();
        config.zarr_chunk_size = 0;
        assert!(config.validate().is_err());

        config = GridProcessorConfig::default();
        config.zarr_compression_level = 10;
        assert!(config.validate().is_err());

        config = GridProcessorConfig::default();
        config.missing_value = f64::NAN;
        assert!(config.validate().is_err());

        config = GridProcessorConfig::default();
        config.resolution_tolerance = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zarr_compression_from_str() {
        assert_eq!(ZarrCompression::from_str("none"), ZarrCompression::None);
        assert_eq!(ZarrCompression::from_str("LZ4"), ZarrCompression::BloscLz4);
        assert_eq!(
            ZarrCompression::from_str("blosc_zstd"),
            ZarrCompression::BloscZstd
        );
        assert_eq!(
            ZarrCompression::from_str("invalid"),
            ZarrCompression::BloscZstd
        );
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: GridProcessorConfig =
            serde_json::from_str(r#"{"progress_interval_secs": 10, "lsmask_var": "mask"}"#)
                .unwrap();
        assert_eq!(config.progress_interval_secs, 10);
        assert_eq!(config.lsmask_var, "mask");
        assert_eq!(config.zarr_chunk_size, 256);
    }
}
