//! BigQuery Client Implementation
//!
//! Talks to the BigQuery v2 REST API: `tables.get`, `tabledata.list`,
//! `jobs.insert`/`jobs.get`/`jobs.getQueryResults`, `tables.insert`
//! and `tabledata.insertAll`.

use super::config::WarehouseConfig;
use super::{QueryRequest, QueryResult, WarehouseClient};
use crate::error::{Result, RuntimeError};
use crate::http::{segment, CloudHttpClient, PollSchedule};
use chrono::DateTime;
use crystalvalue_core::{Column, ColumnMode, ColumnType, Row, TableSchema, Value};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// BigQuery REST client
pub struct BigQueryClient {
    config: WarehouseConfig,
    http: CloudHttpClient,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    schema: TableSchema,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableDataList {
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultsPage {
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<serde_json::Value>,
}

impl BigQueryClient {
    /// Create a new BigQuery client
    pub fn new(config: WarehouseConfig) -> Result<Self> {
        tracing::info!("Initializing BigQuery client for project {}", config.project_id);
        let http = CloudHttpClient::new(config.timeout_ms, config.access_token.clone())?;
        Ok(Self { config, http })
    }

    fn project_url(&self) -> String {
        format!(
            "{}/projects/{}",
            self.config.base_url.trim_end_matches('/'),
            segment(&self.config.project_id)
        )
    }

    fn table_url(&self, dataset_id: &str, table_id: &str) -> String {
        format!(
            "{}/datasets/{}/tables/{}",
            self.project_url(),
            segment(dataset_id),
            segment(table_id)
        )
    }

    fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            interval: Duration::from_millis(self.config.poll_interval_ms),
            timeout: Duration::from_secs(self.config.job_timeout_secs),
        }
    }

    /// Submit a query job
    async fn insert_job(&self, request: &QueryRequest) -> Result<JobResource> {
        let job_id = format!("crystalvalue_{}", uuid::Uuid::new_v4().simple());

        let mut query = json!({
            "query": request.sql,
            "useLegacySql": false,
        });
        if let Some(destination) = &request.destination {
            query["destinationTable"] = serde_json::to_value(destination)?;
            query["writeDisposition"] = serde_json::to_value(request.write_disposition)?;
            query["createDisposition"] = json!("CREATE_IF_NEEDED");
        }

        let body = json!({
            "jobReference": {
                "projectId": self.config.project_id,
                "jobId": job_id,
                "location": request.location,
            },
            "configuration": { "query": query },
        });

        self.http
            .post_json(&format!("{}/jobs", self.project_url()), &body)
            .await
    }

    /// Wait until a job reaches the DONE state
    async fn wait_for_job(&self, job_id: &str, location: &str) -> Result<()> {
        let url = format!(
            "{}/jobs/{}?location={}",
            self.project_url(),
            segment(job_id),
            segment(location)
        );

        let http = &self.http;
        self.poll_schedule()
            .run(&format!("query job {}", job_id), || {
                let url = url.as_str();
                async move {
                    let job: JobResource = http.get_json(url).await?;
                    job_outcome(job)
                }
            })
            .await
    }

    /// Read every page of a finished query's results
    async fn fetch_results(&self, job_id: &str, location: &str) -> Result<QueryResult> {
        let base = format!(
            "{}/queries/{}?location={}&maxResults={}",
            self.project_url(),
            segment(job_id),
            segment(location),
            self.config.page_size
        );

        let mut schema = TableSchema::default();
        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = match &page_token {
                Some(token) => format!("{}&pageToken={}", base, segment(token)),
                None => base.clone(),
            };
            let page: QueryResultsPage = self.http.get_json(&url).await?;
            if let Some(page_schema) = page.schema {
                schema = page_schema;
            }
            for row in page.rows {
                rows.push(decode_row(&schema, row)?);
            }
            match page.page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(QueryResult { schema, rows })
    }
}

#[async_trait::async_trait]
impl WarehouseClient for BigQueryClient {
    fn project_id(&self) -> &str {
        &self.config.project_id
    }

    async fn get_schema(&self, dataset_id: &str, table_id: &str) -> Result<TableSchema> {
        let table: TableResource = self
            .http
            .get_json(&self.table_url(dataset_id, table_id))
            .await?;
        Ok(table.schema)
    }

    async fn sample_rows(&self, dataset_id: &str, table_id: &str, limit: usize) -> Result<Vec<Row>> {
        let schema = self.get_schema(dataset_id, table_id).await?;
        let url = format!(
            "{}/data?maxResults={}",
            self.table_url(dataset_id, table_id),
            limit
        );
        let data: TableDataList = self.http.get_json(&url).await?;
        data.rows
            .into_iter()
            .map(|row| decode_row(&schema, row))
            .collect()
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryResult> {
        tracing::debug!("Executing BigQuery query: {}", request.sql);

        let job = self.insert_job(request).await?;
        let job_id = job.job_reference.job_id.clone();
        let location = job
            .job_reference
            .location
            .clone()
            .unwrap_or_else(|| request.location.clone());

        if job_outcome(job)?.is_none() {
            self.wait_for_job(&job_id, &location).await?;
        }

        if let Some(destination) = &request.destination {
            tracing::info!("Query results written to {}", destination);
        }

        self.fetch_results(&job_id, &location).await
    }

    async fn create_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        schema: &TableSchema,
        replace: bool,
    ) -> Result<()> {
        if replace {
            self.http.delete(&self.table_url(dataset_id, table_id)).await?;
        }

        let body = json!({
            "tableReference": self.table_ref(dataset_id, table_id),
            "schema": schema,
        });
        let url = format!("{}/datasets/{}/tables", self.project_url(), segment(dataset_id));
        let _: serde_json::Value = self.http.post_json(&url, &body).await?;
        tracing::info!("Created table {}.{}", dataset_id, table_id);
        Ok(())
    }

    async fn insert_rows(&self, dataset_id: &str, table_id: &str, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let body = json!({
            "rows": rows
                .iter()
                .map(|row| json!({ "json": Value::Object(row.clone()).to_json() }))
                .collect::<Vec<_>>(),
        });
        let url = format!("{}/insertAll", self.table_url(dataset_id, table_id));
        let response: InsertAllResponse = self.http.post_json(&url, &body).await?;

        if !response.insert_errors.is_empty() {
            return Err(RuntimeError::OperationFailed(format!(
                "{} rows rejected by insertAll into {}.{}: {}",
                response.insert_errors.len(),
                dataset_id,
                table_id,
                serde_json::Value::Array(response.insert_errors)
            )));
        }
        Ok(())
    }
}

/// `Some(())` once a job is done, an error if it failed, `None` while running
fn job_outcome(job: JobResource) -> Result<Option<()>> {
    match job.status {
        Some(status) if status.state == "DONE" => match status.error_result {
            Some(error) => Err(RuntimeError::OperationFailed(format!(
                "BigQuery job {} failed ({}): {}",
                job.job_reference.job_id, error.reason, error.message
            ))),
            None => Ok(Some(())),
        },
        _ => Ok(None),
    }
}

fn decode_row(schema: &TableSchema, row: TableRow) -> Result<Row> {
    if row.f.len() != schema.columns.len() {
        return Err(RuntimeError::UnexpectedResponse(format!(
            "row has {} cells but schema has {} columns",
            row.f.len(),
            schema.columns.len()
        )));
    }

    Ok(schema
        .columns
        .iter()
        .zip(row.f)
        .map(|(column, cell)| (column.name.clone(), decode_cell(column, cell.v)))
        .collect())
}

/// BigQuery returns every scalar as a string; convert using the declared type.
fn decode_cell(column: &Column, raw: serde_json::Value) -> Value {
    if column.mode == ColumnMode::Repeated {
        return match raw {
            serde_json::Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| {
                        let inner = item.get("v").cloned().unwrap_or(serde_json::Value::Null);
                        decode_scalar(column.column_type, inner)
                    })
                    .collect(),
            ),
            other => Value::from(other),
        };
    }
    decode_scalar(column.column_type, raw)
}

fn decode_scalar(column_type: ColumnType, raw: serde_json::Value) -> Value {
    let text = match raw {
        serde_json::Value::Null => return Value::Null,
        serde_json::Value::String(s) => s,
        other => return Value::from(other),
    };

    match column_type {
        ColumnType::Integer | ColumnType::Float | ColumnType::Numeric | ColumnType::BigNumeric => {
            text.parse::<f64>().map(Value::Number).unwrap_or(Value::String(text))
        }
        ColumnType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        ColumnType::Timestamp => text
            .parse::<f64>()
            .ok()
            .and_then(|secs| {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round() as u32;
                DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
            })
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}
