//! Query execution into destination tables

use super::{QueryRequest, QueryResult, WarehouseClient, WriteDisposition};
use crate::error::{Result, RuntimeError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the SQL text of a query comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    /// Literal SQL text
    Sql(String),
    /// Path to a file holding the SQL text
    File(PathBuf),
}

impl QuerySource {
    /// Resolve a query source from two optional inputs.
    ///
    /// Exactly one of `query_sql` and `query_file` must be provided.
    pub fn from_options(query_sql: Option<&str>, query_file: Option<&Path>) -> Result<Self> {
        match (query_sql, query_file) {
            (Some(sql), None) => Ok(QuerySource::Sql(sql.to_string())),
            (None, Some(path)) => Ok(QuerySource::File(path.to_path_buf())),
            (Some(_), Some(_)) => Err(RuntimeError::InvalidQuerySource(
                "only one of query_sql or query_file may be provided".to_string(),
            )),
            (None, None) => Err(RuntimeError::InvalidQuerySource(
                "one of query_sql or query_file must be provided".to_string(),
            )),
        }
    }

    /// Load the SQL text
    pub async fn load(&self) -> Result<String> {
        match self {
            QuerySource::Sql(sql) => Ok(sql.clone()),
            QuerySource::File(path) => {
                tracing::info!("Reading query from {}", path.display());
                Ok(tokio::fs::read_to_string(path).await?)
            }
        }
    }
}

/// Runs queries in one dataset and location, materializing their results
#[derive(Clone)]
pub struct QueryExecutor {
    warehouse: Arc<dyn WarehouseClient>,
    dataset_id: String,
    location: String,
}

impl QueryExecutor {
    pub fn new(
        warehouse: Arc<dyn WarehouseClient>,
        dataset_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            warehouse,
            dataset_id: dataset_id.into(),
            location: location.into(),
        }
    }

    /// Run a query given as SQL text or a file path, writing the results to
    /// `destination_table_name` (truncating it) and returning them.
    pub async fn run_query(
        &self,
        destination_table_name: &str,
        query_sql: Option<&str>,
        query_file: Option<&Path>,
    ) -> Result<QueryResult> {
        let source = QuerySource::from_options(query_sql, query_file)?;
        self.run_source(&source, destination_table_name, WriteDisposition::Truncate)
            .await
    }

    /// Run a resolved query source with an explicit write disposition
    pub async fn run_source(
        &self,
        source: &QuerySource,
        destination_table_name: &str,
        write_disposition: WriteDisposition,
    ) -> Result<QueryResult> {
        let sql = source.load().await?;
        let destination = self
            .warehouse
            .table_ref(&self.dataset_id, destination_table_name);

        tracing::info!(
            "Running query into {} (location: {})",
            destination,
            self.location
        );

        let request = QueryRequest::new(sql, self.location.clone())
            .with_destination(destination)
            .with_write_disposition(write_disposition);
        let result = self.warehouse.run_query(&request).await?;

        tracing::info!("Query returned {} rows", result.len());
        Ok(result)
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn warehouse(&self) -> &Arc<dyn WarehouseClient> {
        &self.warehouse
    }
}
