//! Feature type detection
//!
//! Columns are classified by their declared warehouse type. `INTEGER` and
//! `STRING` columns are ambiguous: when their sampled non-null values form a
//! recognised two-valued boolean pair they are classified as boolean.

use crate::error::{Result, RuntimeError};
use crate::warehouse::WarehouseClient;
use crystalvalue_core::{Column, ColumnMode, ColumnType, FeatureType, FeatureTypes, Row};
use std::collections::BTreeSet;

/// Lower-cased value pairs that mark a two-valued column as boolean
const BOOLEAN_PAIRS: [[&str; 2]; 5] = [
    ["false", "true"],
    ["f", "t"],
    ["no", "yes"],
    ["n", "y"],
    ["0", "1"],
];

/// Classifies transaction columns into feature types
#[derive(Debug, Clone)]
pub struct FeatureTypeDetector {
    sample_size: usize,
}

impl FeatureTypeDetector {
    pub fn new() -> Self {
        Self { sample_size: 1000 }
    }

    /// Number of rows sampled to resolve ambiguous columns
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Read a table's schema (and a sample when needed) and classify its columns
    pub async fn detect_table(
        &self,
        warehouse: &dyn WarehouseClient,
        dataset_id: &str,
        table_id: &str,
        ignore_columns: &[String],
    ) -> Result<FeatureTypes> {
        let schema = warehouse.get_schema(dataset_id, table_id).await?;

        let needs_sample = schema.columns.iter().any(|c| {
            !ignore_columns.contains(&c.name)
                && matches!(c.column_type, ColumnType::Integer | ColumnType::String)
        });
        let sample = if needs_sample && self.sample_size > 0 {
            warehouse
                .sample_rows(dataset_id, table_id, self.sample_size)
                .await?
        } else {
            Vec::new()
        };

        self.detect(&schema.columns, &sample, ignore_columns, table_id)
    }

    /// Classify every non-ignored column.
    ///
    /// Fails if a column cannot be used as a feature, or if nothing is left
    /// to classify.
    pub fn detect(
        &self,
        columns: &[Column],
        sample: &[Row],
        ignore_columns: &[String],
        table_name: &str,
    ) -> Result<FeatureTypes> {
        for ignored in ignore_columns {
            if !columns.iter().any(|c| &c.name == ignored) {
                tracing::warn!("Ignored column {} is not in table {}", ignored, table_name);
            }
        }

        let mut features = FeatureTypes::new();
        for column in columns.iter().filter(|c| !ignore_columns.contains(&c.name)) {
            let feature_type = classify(column, sample)?;
            tracing::debug!(
                "Column {} ({}) classified as {}",
                column.name,
                column.column_type,
                feature_type
            );
            features.push(feature_type, column.name.clone());
        }

        if features.is_empty() {
            return Err(RuntimeError::NoFeaturesDetected(table_name.to_string()));
        }
        Ok(features)
    }
}

impl Default for FeatureTypeDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(column: &Column, sample: &[Row]) -> Result<FeatureType> {
    if column.mode == ColumnMode::Repeated {
        return Err(RuntimeError::UnsupportedColumn {
            column: column.name.clone(),
            column_type: format!("REPEATED {}", column.column_type),
        });
    }

    let feature_type = match column.column_type {
        ColumnType::Boolean => FeatureType::Boolean,
        ColumnType::Integer | ColumnType::String if is_two_valued_boolean(&column.name, sample) => {
            FeatureType::Boolean
        }
        ColumnType::Integer | ColumnType::Float | ColumnType::Numeric | ColumnType::BigNumeric => {
            FeatureType::Numeric
        }
        ColumnType::String
        | ColumnType::Bytes
        | ColumnType::Date
        | ColumnType::Datetime
        | ColumnType::Timestamp
        | ColumnType::Time
        | ColumnType::Geography
        | ColumnType::Json => FeatureType::StringOrCategorical,
        ColumnType::Record => {
            return Err(RuntimeError::UnsupportedColumn {
                column: column.name.clone(),
                column_type: column.column_type.to_string(),
            })
        }
    };
    Ok(feature_type)
}

fn is_two_valued_boolean(column: &str, sample: &[Row]) -> bool {
    let distinct: BTreeSet<String> = sample
        .iter()
        .filter_map(|row| row.get(column))
        .filter_map(|value| value.as_text())
        .map(|text| text.trim().to_ascii_lowercase())
        .collect();

    if distinct.len() != 2 {
        return false;
    }
    let pair: Vec<&str> = distinct.iter().map(String::as_str).collect();
    BOOLEAN_PAIRS.iter().any(|known| known[..] == pair[..])
}
