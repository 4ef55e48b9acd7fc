//! Warehouse table schema definitions
//!
//! The serialized shape matches the BigQuery REST representation
//! (`{"fields": [{"name": ..., "type": ..., "mode": ...}]}`) so schemas
//! can be read straight from a `tables.get` response.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema of a warehouse table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in declaration order
    #[serde(default, rename = "fields")]
    pub columns: Vec<Column>,
}

/// A column in a table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Declared column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Column mode
    #[serde(default)]
    pub mode: ColumnMode,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared warehouse column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    String,
    Bytes,
    Integer,
    Float,
    Numeric,
    BigNumeric,
    Boolean,
    Date,
    Datetime,
    Timestamp,
    Time,
    Geography,
    Json,
    Record,
}

/// Column mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

impl TableSchema {
    /// Create a schema from columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Add a column
    pub fn add_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names from `required` that are not present in the schema
    pub fn missing_columns<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|name| !self.has_column(name))
            .map(str::to_string)
            .collect()
    }
}

impl Column {
    /// Create a nullable column
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode: ColumnMode::Nullable,
            description: None,
        }
    }

    /// Mark column as required
    pub fn required(mut self) -> Self {
        self.mode = ColumnMode::Required;
        self
    }

    /// Mark column as repeated
    pub fn repeated(mut self) -> Self {
        self.mode = ColumnMode::Repeated;
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl ColumnType {
    /// Canonical (legacy SQL) type name, as returned by `tables.get`
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Bytes => "BYTES",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::BigNumeric => "BIGNUMERIC",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Time => "TIME",
            ColumnType::Geography => "GEOGRAPHY",
            ColumnType::Json => "JSON",
            ColumnType::Record => "RECORD",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Float | ColumnType::Numeric | ColumnType::BigNumeric
        )
    }

    pub fn is_date_like(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp
        )
    }
}

impl FromStr for ColumnType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRING" => Ok(ColumnType::String),
            "BYTES" => Ok(ColumnType::Bytes),
            "INTEGER" | "INT64" => Ok(ColumnType::Integer),
            "FLOAT" | "FLOAT64" => Ok(ColumnType::Float),
            "NUMERIC" | "DECIMAL" => Ok(ColumnType::Numeric),
            "BIGNUMERIC" | "BIGDECIMAL" => Ok(ColumnType::BigNumeric),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "DATE" => Ok(ColumnType::Date),
            "DATETIME" => Ok(ColumnType::Datetime),
            "TIMESTAMP" => Ok(ColumnType::Timestamp),
            "TIME" => Ok(ColumnType::Time),
            "GEOGRAPHY" => Ok(ColumnType::Geography),
            "JSON" => Ok(ColumnType::Json),
            "RECORD" | "STRUCT" => Ok(ColumnType::Record),
            other => Err(CoreError::UnknownColumnType(other.to_string())),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.type_name().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Check that a column or table identifier is safe to splice into SQL.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidColumnName(name.to_string()))
    }
}
