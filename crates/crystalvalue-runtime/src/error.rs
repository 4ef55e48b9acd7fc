//! Runtime error types

use crystalvalue_core::CoreError;
use thiserror::Error;

/// Runtime error
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Schema/value error from the core crate
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No classifiable feature columns remain after ignoring columns
    #[error("No features detected in table {0}")]
    NoFeaturesDetected(String),

    /// A column type that cannot be used as a feature
    #[error("Column {column} has unsupported type {column_type} (ignore it or list it explicitly)")]
    UnsupportedColumn { column: String, column_type: String },

    /// Required columns are absent from a table schema
    #[error("Required columns missing from {table}: {}", columns.join(", "))]
    MissingColumns { table: String, columns: Vec<String> },

    /// Query source precondition violated
    #[error("Invalid query source: {0}")]
    InvalidQuerySource(String),

    /// Invalid configuration or arguments
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Data checks failed
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Non-success HTTP status from a cloud service
    #[error("Service returned {status}: {body}")]
    Service { status: u16, body: String },

    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A warehouse job or long-running operation reported failure
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// A long-running operation did not finish in time
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Response did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;
