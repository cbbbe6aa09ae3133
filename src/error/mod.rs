use serde::Serialize;
use thiserror::Error;

use crate::bulk::BulkError;
use crate::cache::CacheError;
use crate::telemetry::TelemetryError;
use crate::template::ParseError;
use crate::tracker::TrackerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Template error: {0}")]
    Template(#[from] ParseError),

    #[error("Bulk error: {0}")]
    Bulk(#[from] BulkError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Invalid job file: {0}")]
    InvalidJob(#[source] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable error code for machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::Template(_) => "TEMPLATE_ERROR",
            AppError::Bulk(BulkError::Template(_)) => "TEMPLATE_ERROR",
            AppError::Bulk(_) => "BULK_ERROR",
            AppError::Tracker(_) => "TRACKER_ERROR",
            AppError::Telemetry(_) => "TELEMETRY_ERROR",
            AppError::InvalidJob(_) => "JOB_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
        }
    }

    /// Error body for JSON output
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, AppError>;
