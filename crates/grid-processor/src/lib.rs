//! Grid alignment and aggregation engine.
//!
//! This crate moves monthly climate and land-use layers from their native
//! grids onto one regular lat/lon target grid and lays them out on a single
//! monthly time axis. It enables:
//!
//! - **Index mapping**: nearest source index for any coordinate, clamped to the grid
//! - **Mask-aware aggregation**: mean of the source cells under each land cell
//! - **Temporal replication**: one decadal climatology copied to every year of its decade
//! - **Pluggable storage**: Zarr V3 by default, NetCDF behind the `netcdf` feature
//!
//! # Architecture
//!
//! ```text
//! PeriodSource (one month of one decade)
//!      │
//!      ▼
//! PeriodPipeline::run_period
//!      │
//!      ├─► GridGeometry::from_store (source axes)
//!      │
//!      ├─► RegionAggregator::run
//!      │         │
//!      │         ├─► IndexMapper: target corners -> source index ranges
//!      │         │
//!      │         └─► reduce_mean over valid values, land cells only
//!      │
//!      └─► TemporalReplicator::replicate
//!               │
//!               ▼
//!          same month of every other year in the period
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grid_processor::{GridProcessorConfig, MetricJob, PeriodPipeline, ZarrBackend};
//!
//! let config = GridProcessorConfig::default();
//! let backend = ZarrBackend::new(config.clone());
//! let pipeline = PeriodPipeline::new(&backend, &config);
//!
//! let summary = pipeline.run_metric(&job);
//! println!("{summary}");
//! ```

pub mod aggregate;
pub mod concat;
pub mod config;
pub mod dataset;
pub mod density;
pub mod error;
pub mod geometry;
pub mod index;
pub mod pipeline;
pub mod progress;
pub mod replicate;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use aggregate::{AggregateResult, AggregationTask, RegionAggregator, SourceRegion, TraversalSummary};
pub use concat::{
    concat_schema, mask_zero_series, parse_yearly_name, stack_layer, ZeroMaskSummary,
    FERTILISER_VARIABLES,
};
pub use config::{GridProcessorConfig, ZarrCompression};
pub use dataset::{
    copy_land_sea_mask, create_target_dataset, expand_bbox, target_stem, TargetDefinition,
    TargetStatus,
};
pub use density::{density_schema, density_variable_name, DensityConverter, DENSITY_SOURCE_VAR};
pub use error::{GridProcessorError, Result};
pub use geometry::GridGeometry;
pub use index::{CellIndex, Clamp, CorrectionLog, IndexMapper, MappedIndex};
pub use pipeline::{MetricJob, PeriodPipeline, PeriodSource, RunSummary, SkippedTask, TaskSummary};
pub use progress::{ProgressReport, ProgressState, ProgressTracker};
pub use replicate::{ReplicationTask, TemporalReplicator};
#[cfg(feature = "netcdf")]
pub use store::{NetcdfBackend, NetcdfStore};
pub use store::{
    DatasetSchema, GridStore, MemoryBackend, MemoryDataset, OpenMode, StoreBackend, VariableSpec,
    ZarrBackend, ZarrStore,
};
pub use types::{CellValue, GridSlice};
