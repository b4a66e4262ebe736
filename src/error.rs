//! Error types for rust_sigrank

use thiserror::Error;

/// Main error type for signature pipeline operations
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Missing required column '{column}' in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("{what} not found: {path}")]
    FileNotFound { what: String, path: String },

    #[error("Invalid matrix store {path}: {reason}")]
    InvalidStore { path: String, reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error(
        "Insufficient disk space at {path}: need {required_gb:.2} GB, only {available_gb:.2} GB available"
    )]
    InsufficientDiskSpace {
        path: String,
        required_gb: f64,
        available_gb: f64,
    },

    #[error("Extraction worker failed on chunk {chunk}: {reason}")]
    WorkerFailed { chunk: usize, reason: String },

    #[error("Stage '{stage}' cannot be skipped: {reason}")]
    StageIncomplete { stage: String, reason: String },

    #[error("Invalid signature table: {reason}")]
    InvalidSignature { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5Error(#[from] hdf5::Error),
}

impl SignatureError {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        SignatureError::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Result type alias for signature pipeline operations
pub type Result<T> = std::result::Result<T, SignatureError>;
