//! Common types and utilities shared across the grid reorganisation crates.

pub mod area;
pub mod bbox;
pub mod error;
pub mod period;
pub mod resource;
pub mod time;

pub use area::{area_km2, density_per_hectare, AreaEstimator, EARTH_RADIUS_KM, KM2_TO_HECTARES};
pub use bbox::{BboxParseError, BoundingBox};
pub use error::{CommonError, CommonResult};
pub use period::{month_from_filename, target_time_index, YearRange};
pub use resource::{Metric, ResourceDefinition, ResourceTable, Scenario, WeatherResource};
pub use time::{
    daily_to_monthly, Cadence, DailyReduction, TimeAxis, TimeAxisBuilder, NOLEAP_MONTH_DAYS,
};
