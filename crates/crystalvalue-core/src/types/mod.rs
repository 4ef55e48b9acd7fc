//! Type system for CrystalValue
//!
//! This module contains:
//! - Value types
//! - Warehouse table schemas
//! - Feature type maps

pub mod features;
pub mod schema;
pub mod value;

pub use features::{FeatureType, FeatureTypes};
pub use schema::{validate_identifier, Column, ColumnMode, ColumnType, TableSchema};
pub use value::{Row, Value};
