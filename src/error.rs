//! Error types for the forecast_engine crate

use polars::prelude::PolarsError;
use thiserror::Error;

/// Custom error types for the forecast_engine crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Too few observations for a model's minimum requirement
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Predict or evaluate called before train, or a loaded artifact is unusable
    #[error("Model not trained: {0}")]
    NotTrained(String),

    /// Registry lookup miss for a (symbol, model kind) pair
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Every ensemble member failed to produce a prediction
    #[error("No valid predictions: {0}")]
    NoValidPredictions(String),

    /// Invalid configuration, e.g. a weight key set that does not match the members
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// Error from mathematical operations
    #[error("Math error: {0}")]
    MathError(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from artifact encoding/decoding
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<polars::prelude::PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for ForecastError {
    fn from(err: bincode::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}
