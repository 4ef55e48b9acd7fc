//! Feature type maps
//!
//! A [`FeatureTypes`] value assigns every feature column of a transaction
//! table to exactly one [`FeatureType`]. It serializes as
//!
//! ```yaml
//! numeric: [value, number_products]
//! boolean: [is_registered]
//! string_or_categorical: [product_type]
//! ```

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Category of a feature column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Numeric,
    Boolean,
    StringOrCategorical,
}

impl FeatureType {
    pub const ALL: [FeatureType; 3] = [
        FeatureType::Numeric,
        FeatureType::Boolean,
        FeatureType::StringOrCategorical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Numeric => "numeric",
            FeatureType::Boolean => "boolean",
            FeatureType::StringOrCategorical => "string_or_categorical",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from feature type to the columns of that type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTypes {
    #[serde(default)]
    pub numeric: Vec<String>,

    #[serde(default)]
    pub boolean: Vec<String>,

    #[serde(default)]
    pub string_or_categorical: Vec<String>,
}

impl FeatureTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns of one feature type
    pub fn columns(&self, feature_type: FeatureType) -> &[String] {
        match feature_type {
            FeatureType::Numeric => &self.numeric,
            FeatureType::Boolean => &self.boolean,
            FeatureType::StringOrCategorical => &self.string_or_categorical,
        }
    }

    /// Append a column under a feature type
    pub fn push(&mut self, feature_type: FeatureType, column: impl Into<String>) {
        let column = column.into();
        match feature_type {
            FeatureType::Numeric => self.numeric.push(column),
            FeatureType::Boolean => self.boolean.push(column),
            FeatureType::StringOrCategorical => self.string_or_categorical.push(column),
        }
    }

    /// Builder-style variant of [`FeatureTypes::push`]
    pub fn with(mut self, feature_type: FeatureType, column: impl Into<String>) -> Self {
        self.push(feature_type, column);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of classified columns
    pub fn len(&self) -> usize {
        self.numeric.len() + self.boolean.len() + self.string_or_categorical.len()
    }

    /// All `(type, column)` pairs, grouped by type
    pub fn iter(&self) -> impl Iterator<Item = (FeatureType, &str)> + '_ {
        FeatureType::ALL.into_iter().flat_map(move |feature_type| {
            self.columns(feature_type)
                .iter()
                .map(move |column| (feature_type, column.as_str()))
        })
    }

    /// All classified column names
    pub fn all_columns(&self) -> Vec<&str> {
        self.iter().map(|(_, column)| column).collect()
    }

    /// Feature type of a column, if classified
    pub fn feature_type_of(&self, column: &str) -> Option<FeatureType> {
        self.iter()
            .find(|(_, name)| *name == column)
            .map(|(feature_type, _)| feature_type)
    }

    /// Check that no column is listed more than once
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<&str, FeatureType> = HashMap::new();
        for (feature_type, column) in self.iter() {
            if let Some(first) = seen.insert(column, feature_type) {
                return Err(CoreError::DuplicateFeature {
                    column: column.to_string(),
                    first: first.to_string(),
                    second: feature_type.to_string(),
                });
            }
        }
        Ok(())
    }
}
