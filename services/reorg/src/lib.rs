//! Reorganisation driver: run configuration, dataset discovery and the
//! passes that populate the target datasets.

pub mod config;
pub mod layers;
pub mod passes;
pub mod sources;

use anyhow::Result;
use grid_processor::{GridProcessorConfig, StoreBackend, ZarrBackend};

use config::StorageFormat;

/// Backend for the configured storage format.
pub fn create_backend(
    format: StorageFormat,
    config: &GridProcessorConfig,
) -> Result<Box<dyn StoreBackend>> {
    match format {
        StorageFormat::Zarr => Ok(Box::new(ZarrBackend::new(config.clone()))),
        #[cfg(feature = "netcdf")]
        StorageFormat::Netcdf => Ok(Box::new(grid_processor::NetcdfBackend::new(config.clone()))),
        #[cfg(not(feature = "netcdf"))]
        StorageFormat::Netcdf => Err(anyhow::anyhow!(
            "NetCDF support not compiled in, rebuild with --features netcdf"
        )),
    }
}
