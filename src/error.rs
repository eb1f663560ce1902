//! Crate-level error type and `Result` alias.
//! Converts underlying I/O, GDAL, CSV and JSON errors, and provides semantic
//! variants for configuration mistakes and grid/geometry inconsistencies.
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] crate::io::GdalError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Raster grids differ: {reference:?} vs {other:?} ({detail})")]
    GridMismatch {
        reference: PathBuf,
        other: PathBuf,
        detail: String,
    },

    #[error("External command `{program}` failed with status {status}")]
    ExternalCommand { program: String, status: String },

    #[error("Geometry error: {0}")]
    Geometry(String),
}
