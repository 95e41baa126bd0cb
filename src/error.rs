//! Error types for the collection pipeline.
//!
//! This module provides structured error handling with:
//! - `AppError`: Domain-specific errors for pipeline operations
//! - `Result<T>`: Type alias for Results using AppError

use thiserror::Error;

/// Domain-specific errors for pipeline operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// Failed to parse a response body or page content
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Browser automation failed
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// CSV read/write failed
    #[error("CSV error: {0}")]
    CsvError(String),

    /// File system operation failed
    #[error("I/O error: {0}")]
    IoError(String),

    /// A required column is missing from an input file
    #[error("Missing column '{column}' in {file}")]
    MissingColumn { file: String, column: &'static str },

    /// The cookie file is absent or empty
    #[error("No cookies available: {0}")]
    MissingCookies(String),

    /// Stage-level error (geocoder, endpoints, collector, ...)
    #[error("Service error ({service}): {message}")]
    ServiceError {
        service: &'static str,
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a browser error
    pub fn browser(msg: impl Into<String>) -> Self {
        Self::BrowserError(msg.into())
    }

    /// Create a service error
    pub fn service(service: &'static str, msg: impl Into<String>) -> Self {
        Self::ServiceError {
            service,
            message: msg.into(),
        }
    }

    /// Create a missing-column error
    pub fn missing_column(file: impl Into<String>, column: &'static str) -> Self {
        Self::MissingColumn {
            file: file.into(),
            column,
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(error: csv::Error) -> Self {
        Self::CsvError(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error.to_string())
    }
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;
