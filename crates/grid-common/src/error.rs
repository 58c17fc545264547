//! Error types shared by the grid reorganisation crates.

use thiserror::Error;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

/// Errors raised while parsing or validating common grid descriptors.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Invalid year range code '{0}': expected six digits such as 199110")]
    InvalidYearRange(String),

    #[error("Cannot derive month from file name '{name}' using prefix '{prefix}'")]
    InvalidMonth { name: String, prefix: String },

    #[error("Invalid calendar date {year}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },

    #[error("Year {year} precedes the first year of the data set ({data_start})")]
    YearBeforeDataStart { year: i32, data_start: i32 },

    #[error("Unknown weather resource: {0}")]
    UnknownResource(String),

    #[error("Invalid resource definition for {resource}: {message}")]
    InvalidResource { resource: String, message: String },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Cannot average daily values for month {month}: no values")]
    EmptyMonth { month: usize },

    #[error("Day offset {day} from {epoch} is outside the supported calendar")]
    DayOutOfRange { day: i64, epoch: String },
}
