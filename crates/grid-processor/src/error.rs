//! Error types for grid processing.

use grid_common::CommonError;
use thiserror::Error;

/// Errors that can occur while aligning, aggregating or storing grids.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// A source or target store could not be opened (missing file, permissions).
    #[error("failed to open store {path}: {message}")]
    StoreOpen { path: String, message: String },

    /// Latitude and longitude spacing differ.
    #[error("inconsistent resolution: lat {resol_lat} vs lon {resol_lon}")]
    InconsistentResolution { resol_lat: f64, resol_lon: f64 },

    /// An overlap rectangle with no extent.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// A value that is neither a number nor a recognised missing marker.
    #[error("unknown value type at {location}: {value}")]
    UnknownValueType { location: String, value: String },

    /// Variable or coordinate axis not present in the store.
    #[error("variable not found: {0}")]
    VariableNotFound(String),

    /// Index ranges or value buffers do not match a variable's shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Failed to read data from a store.
    #[error("failed to read grid data: {0}")]
    ReadFailed(String),

    /// Failed to write data to a store.
    #[error("failed to write grid data: {0}")]
    WriteFailed(String),

    /// Invalid metadata in a dataset.
    #[error("invalid grid metadata: {0}")]
    InvalidMetadata(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the shared grid types.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl GridProcessorError {
    /// Create a StoreOpen error.
    pub fn store_open(path: impl AsRef<std::path::Path>, msg: impl Into<String>) -> Self {
        Self::StoreOpen {
            path: path.as_ref().display().to_string(),
            message: msg.into(),
        }
    }

    /// Create a ReadFailed error.
    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    /// Create a WriteFailed error.
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Create an InvalidRegion error.
    pub fn invalid_region(msg: impl Into<String>) -> Self {
        Self::InvalidRegion(msg.into())
    }

    /// Create a ShapeMismatch error.
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// True for errors that end the current (metric, period) task.
    ///
    /// Per-cell conditions are counted by the traversal and never abort it.
    pub fn is_task_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InconsistentResolution { .. }
                | Self::InvalidRegion(_)
                | Self::UnknownValueType { .. }
        )
    }
}

impl From<std::io::Error> for GridProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::ReadFailed(err.to_string())
    }
}

impl From<serde_json::Error> for GridProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_fatal_classification() {
        assert!(GridProcessorError::store_open("/tmp/x.zarr", "denied").is_task_fatal());
        assert!(GridProcessorError::read_failed("eof").is_task_fatal());
        assert!(!GridProcessorError::invalid_region("zero area").is_task_fatal());
        assert!(!GridProcessorError::InconsistentResolution {
            resol_lat: 0.1,
            resol_lon: 0.2
        }
        .is_task_fatal());
    }

    #[test]
    fn test_store_open_message() {
        let err = GridProcessorError::store_open("/data/PPT.nc", "permission denied");
        assert_eq!(
            err.to_string(),
            "failed to open store /data/PPT.nc: permission denied"
        );
    }
}
