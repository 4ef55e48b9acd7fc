//! Error types for CrystalValue Core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown column type: {0}")]
    UnknownColumnType(String),

    #[error("Invalid column name: {0:?}")]
    InvalidColumnName(String),

    #[error("Column {column} is listed under both {first} and {second}")]
    DuplicateFeature {
        column: String,
        first: String,
        second: String,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
