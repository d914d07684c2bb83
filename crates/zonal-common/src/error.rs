//! Error types for zonal-timeseries services.

use thiserror::Error;

/// Result type alias using ZonalError.
pub type ZonalResult<T> = Result<T, ZonalError>;

/// Primary error type for zonal statistics and ingestion operations.
#[derive(Debug, Error)]
pub enum ZonalError {
    // === Request/Parameter Errors ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    // === Data Errors ===
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Remote evaluation failed: {0}")]
    ComputeError(String),

    #[error("Fetch failed: {0}")]
    FetchError(String),

    // === Storage Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    // === Infrastructure Errors ===
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Request timeout")]
    Timeout,
}

impl ZonalError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            ZonalError::MissingParameter(_)
            | ZonalError::InvalidParameter { .. }
            | ZonalError::InvalidDate(_)
            | ZonalError::InvalidGeometry(_) => 400,

            ZonalError::UnknownRegion(_)
            | ZonalError::UnknownDataset(_)
            | ZonalError::UnknownVariable(_) => 404,

            ZonalError::ComputeError(_) | ZonalError::FetchError(_) => 502,

            ZonalError::Timeout => 504,

            _ => 500,
        }
    }
}

// Conversion from common error types
impl From<std::io::Error> for ZonalError {
    fn from(err: std::io::Error) -> Self {
        ZonalError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for ZonalError {
    fn from(err: serde_json::Error) -> Self {
        ZonalError::InternalError(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for ZonalError {
    fn from(err: sqlx::Error) -> Self {
        ZonalError::DatabaseError(err.to_string())
    }
}

impl From<reqwest::Error> for ZonalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ZonalError::Timeout
        } else {
            ZonalError::FetchError(err.to_string())
        }
    }
}
