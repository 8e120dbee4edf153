//! Error types for pulse calibration

use thiserror::Error;

/// Errors that can occur while building pairs, fitting or applying models
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("No data: {0}")]
    NoData(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("No suitable model: {0}")]
    NoSuitableModel(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid bin size: {0}")]
    InvalidBinSize(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
