//! CrystalValue Core - Core types and definitions for the CrystalValue LTV pipeline
//!
//! This crate provides the fundamental types shared by the pipeline crates:
//! - Value types for warehouse rows
//! - Table schema definitions
//! - Feature type maps
//! - Error types

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::CoreError;
pub use types::{
    Column, ColumnMode, ColumnType, FeatureType, FeatureTypes, Row, TableSchema, Value,
};
