//! Warehouse Layer
//!
//! This module provides the SQL warehouse boundary used by every pipeline stage:
//! - Schema introspection and row sampling
//! - Query jobs that materialize results into destination tables
//! - Table creation and row streaming for loaded datasets
//!
//! [`BigQueryClient`] talks to the BigQuery REST API; tests substitute
//! in-memory implementations of [`WarehouseClient`].

mod bigquery;
pub mod config;
pub mod executor;

pub use bigquery::BigQueryClient;
pub use config::WarehouseConfig;
pub use executor::{QueryExecutor, QuerySource};

use crate::error::Result;
use crystalvalue_core::{Row, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully qualified table reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// Backtick-quoted form for use in Standard SQL
    pub fn sql(&self) -> String {
        format!("`{}`", self)
    }

    /// `bq://project.dataset.table` form used by Vertex AI
    pub fn bq_uri(&self) -> String {
        format!("bq://{}", self)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// What to do when a destination table already holds data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteDisposition {
    #[default]
    #[serde(rename = "WRITE_TRUNCATE")]
    Truncate,
    #[serde(rename = "WRITE_APPEND")]
    Append,
    #[serde(rename = "WRITE_EMPTY")]
    Empty,
}

/// A query job submitted to the warehouse
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Standard SQL text
    pub sql: String,

    /// Destination for the results, if they should be materialized
    pub destination: Option<TableRef>,

    /// Write disposition for the destination
    pub write_disposition: WriteDisposition,

    /// Processing location (e.g. "europe-west4")
    pub location: String,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            destination: None,
            write_disposition: WriteDisposition::Truncate,
            location: location.into(),
        }
    }

    pub fn with_destination(mut self, destination: TableRef) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_write_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.write_disposition = disposition;
        self
    }
}

/// Rows returned by a query, with their schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub schema: TableSchema,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Operations the pipeline needs from a SQL warehouse
#[async_trait::async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Project that owns the datasets this client works with
    fn project_id(&self) -> &str;

    /// Read a table's schema
    async fn get_schema(&self, dataset_id: &str, table_id: &str) -> Result<TableSchema>;

    /// Read up to `limit` rows of a table
    async fn sample_rows(&self, dataset_id: &str, table_id: &str, limit: usize) -> Result<Vec<Row>>;

    /// Run a query and wait for it; returns the result rows
    async fn run_query(&self, request: &QueryRequest) -> Result<QueryResult>;

    /// Create a table, dropping an existing one first when `replace` is set
    async fn create_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        schema: &TableSchema,
        replace: bool,
    ) -> Result<()>;

    /// Stream rows into an existing table
    async fn insert_rows(&self, dataset_id: &str, table_id: &str, rows: &[Row]) -> Result<()>;

    /// Reference to a table in this client's project
    fn table_ref(&self, dataset_id: &str, table_id: &str) -> TableRef {
        TableRef::new(self.project_id(), dataset_id, table_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_forms() {
        let table = TableRef::new("proj", "ltv", "training_data");
        assert_eq!(table.to_string(), "proj.ltv.training_data");
        assert_eq!(table.sql(), "`proj.ltv.training_data`");
        assert_eq!(table.bq_uri(), "bq://proj.ltv.training_data");
    }

    #[test]
    fn test_write_disposition_wire_names() {
        assert_eq!(
            serde_json::to_string(&WriteDisposition::Truncate).unwrap(),
            "\"WRITE_TRUNCATE\""
        );
        assert_eq!(
            serde_json::to_string(&WriteDisposition::Append).unwrap(),
            "\"WRITE_APPEND\""
        );
    }

    #[test]
    fn test_query_request_builder() {
        let request = QueryRequest::new("SELECT 1", "EU")
            .with_destination(TableRef::new("p", "d", "t"))
            .with_write_disposition(WriteDisposition::Append);

        assert_eq!(request.location, "EU");
        assert_eq!(request.write_disposition, WriteDisposition::Append);
        assert_eq!(request.destination.unwrap().table_id, "t");
    }
}
