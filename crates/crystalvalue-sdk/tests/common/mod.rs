//! Common test utilities for SDK integration tests
//!
//! In-memory doubles of the warehouse and AutoML clients. Query results are
//! scripted by SQL fragment; everything else is kept in plain maps.

#![allow(dead_code)]

use async_trait::async_trait;
use crystalvalue_core::{Column, ColumnType, Row, TableSchema, Value};
use crystalvalue_runtime::{
    AutoMlClient, BatchPredictionOutput, BatchPredictionRequest, DeployRequest, DeployedModel,
    QueryRequest, QueryResult, Result, RuntimeError, TableRef, TrainingRequest, WarehouseClient,
    WriteDisposition,
};
use crystalvalue_sdk::{Pipeline, PipelineBuilder, PipelineConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const PROJECT: &str = "proj";
pub const DATASET: &str = "ltv";

#[derive(Debug, Clone, Default)]
struct StoredTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

/// Warehouse double holding tables in memory
#[derive(Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<HashMap<String, StoredTable>>,
    responses: Mutex<Vec<(String, QueryResult)>>,
    queries: Mutex<Vec<QueryRequest>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with rows
    pub fn with_table(self, table_id: &str, schema: TableSchema, rows: Vec<Row>) -> Self {
        self.tables
            .lock()
            .unwrap()
            .insert(table_id.to_string(), StoredTable { schema, rows });
        self
    }

    /// Return `result` for any query whose SQL contains `fragment`
    pub fn respond_to(self, fragment: &str, result: QueryResult) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((fragment.to_string(), result));
        self
    }

    /// Queries run so far
    pub fn queries(&self) -> Vec<QueryRequest> {
        self.queries.lock().unwrap().clone()
    }

    pub fn has_table(&self, table_id: &str) -> bool {
        self.tables.lock().unwrap().contains_key(table_id)
    }

    pub fn table_rows(&self, table_id: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table_id)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn not_found(table_id: &str) -> RuntimeError {
        RuntimeError::Service {
            status: 404,
            body: format!("Not found: Table {}:{}.{}", PROJECT, DATASET, table_id),
        }
    }
}

#[async_trait]
impl WarehouseClient for InMemoryWarehouse {
    fn project_id(&self) -> &str {
        PROJECT
    }

    async fn get_schema(&self, _dataset_id: &str, table_id: &str) -> Result<TableSchema> {
        self.tables
            .lock()
            .unwrap()
            .get(table_id)
            .map(|t| t.schema.clone())
            .ok_or_else(|| Self::not_found(table_id))
    }

    async fn sample_rows(&self, _dataset_id: &str, table_id: &str, limit: usize) -> Result<Vec<Row>> {
        self.tables
            .lock()
            .unwrap()
            .get(table_id)
            .map(|t| t.rows.iter().take(limit).cloned().collect())
            .ok_or_else(|| Self::not_found(table_id))
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryResult> {
        self.queries.lock().unwrap().push(request.clone());

        let result = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| request.sql.contains(fragment.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default();

        if let Some(destination) = &request.destination {
            let mut tables = self.tables.lock().unwrap();
            let table = tables.entry(destination.table_id.clone()).or_default();
            table.schema = result.schema.clone();
            match request.write_disposition {
                WriteDisposition::Append => table.rows.extend(result.rows.iter().cloned()),
                _ => table.rows = result.rows.clone(),
            }
        }
        Ok(result)
    }

    async fn create_table(
        &self,
        _dataset_id: &str,
        table_id: &str,
        schema: &TableSchema,
        replace: bool,
    ) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(table_id) && !replace {
            return Err(RuntimeError::Service {
                status: 409,
                body: format!("Already Exists: Table {}", table_id),
            });
        }
        tables.insert(
            table_id.to_string(),
            StoredTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert_rows(&self, _dataset_id: &str, table_id: &str, rows: &[Row]) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(table_id)
            .ok_or_else(|| Self::not_found(table_id))?;
        table.rows.extend(rows.iter().cloned());
        Ok(())
    }
}

/// AutoML double recording every call.
///
/// Online predictions are the instance's `sum_value`.
pub struct FakeAutoMl {
    calls: Mutex<Vec<String>>,
    training_requests: Mutex<Vec<TrainingRequest>>,
    deploy_requests: Mutex<Vec<DeployRequest>>,
    batch_requests: Mutex<Vec<BatchPredictionRequest>>,
    predict_batches: Mutex<Vec<usize>>,
}

impl FakeAutoMl {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            training_requests: Mutex::new(Vec::new()),
            deploy_requests: Mutex::new(Vec::new()),
            batch_requests: Mutex::new(Vec::new()),
            predict_batches: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn training_requests(&self) -> Vec<TrainingRequest> {
        self.training_requests.lock().unwrap().clone()
    }

    pub fn deploy_requests(&self) -> Vec<DeployRequest> {
        self.deploy_requests.lock().unwrap().clone()
    }

    pub fn batch_requests(&self) -> Vec<BatchPredictionRequest> {
        self.batch_requests.lock().unwrap().clone()
    }

    /// Size of each online prediction request
    pub fn predict_batches(&self) -> Vec<usize> {
        self.predict_batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutoMlClient for FakeAutoMl {
    async fn create_dataset(&self, display_name: &str, source: &TableRef) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create_dataset {} {}", display_name, source));
        Ok("projects/proj/locations/europe-west4/datasets/111".to_string())
    }

    async fn train_model(&self, request: &TrainingRequest) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("train_model {}", request.model_display_name));
        self.training_requests.lock().unwrap().push(request.clone());
        Ok("projects/proj/locations/europe-west4/models/777".to_string())
    }

    async fn deploy_model(&self, request: &DeployRequest) -> Result<DeployedModel> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("deploy_model {}", request.model));
        self.deploy_requests.lock().unwrap().push(request.clone());
        Ok(DeployedModel {
            endpoint: "projects/proj/locations/europe-west4/endpoints/42".to_string(),
            deployed_model_id: "9001".to_string(),
        })
    }

    async fn predict(&self, endpoint: &str, instances: &[Row]) -> Result<Vec<f64>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("predict {}", endpoint));
        self.predict_batches.lock().unwrap().push(instances.len());
        Ok(instances
            .iter()
            .map(|row| {
                row.get("sum_value")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
            })
            .collect())
    }

    async fn batch_predict(&self, request: &BatchPredictionRequest) -> Result<BatchPredictionOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("batch_predict {}", request.model));
        self.batch_requests.lock().unwrap().push(request.clone());
        Ok(BatchPredictionOutput {
            job: "projects/proj/locations/europe-west4/batchPredictionJobs/8".to_string(),
            output_dataset: "bq://proj.prediction_crystalvalue_model_2021_06_01".to_string(),
            output_table: "predictions".to_string(),
        })
    }
}

/// Schema of the `transactions` test table
pub fn transactions_schema() -> TableSchema {
    TableSchema::new(vec![
        Column::new("customer_id", ColumnType::String).required(),
        Column::new("date", ColumnType::Date).required(),
        Column::new("value", ColumnType::Float),
        Column::new("number_products", ColumnType::Integer),
        Column::new("is_registered", ColumnType::Boolean),
        Column::new("newsletter", ColumnType::String),
        Column::new("product_type", ColumnType::String),
    ])
}

/// A few transactions with a two-valued `newsletter` column
pub fn transaction_rows() -> Vec<Row> {
    let products = ["shoes", "bags", "hats", "socks"];
    (0..40)
        .map(|i| {
            let mut row = Row::new();
            row.insert("customer_id".to_string(), Value::from(format!("c{}", i % 8)));
            row.insert(
                "date".to_string(),
                Value::from(format!("2020-{:02}-{:02}", 1 + i % 12, 1 + i % 28)),
            );
            row.insert("value".to_string(), Value::Number(10.0 + i as f64));
            row.insert("number_products".to_string(), Value::Number((1 + i % 5) as f64));
            row.insert("is_registered".to_string(), Value::Bool(i % 3 == 0));
            row.insert(
                "newsletter".to_string(),
                Value::from(if i % 2 == 0 { "yes" } else { "no" }),
            );
            row.insert(
                "product_type".to_string(),
                Value::from(products[i % products.len()]),
            );
            row
        })
        .collect()
}

/// Schema of the training table written by the train query
pub fn training_schema() -> TableSchema {
    TableSchema::new(vec![
        Column::new("customer_id", ColumnType::String),
        Column::new("window_date", ColumnType::Date),
        Column::new("number_transactions", ColumnType::Integer),
        Column::new("sum_value", ColumnType::Float),
        Column::new("most_frequent_product_type", ColumnType::String),
        Column::new("future_value", ColumnType::Float),
        Column::new("predefined_split_column", ColumnType::String),
    ])
}

/// `count` TEST rows whose `future_value` equals `sum_value`
pub fn holdout_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let mut row = Row::new();
            row.insert("customer_id".to_string(), Value::from(format!("c{}", i)));
            row.insert("window_date".to_string(), Value::from("2020-06-30"));
            row.insert("number_transactions".to_string(), Value::Number(3.0));
            row.insert("sum_value".to_string(), Value::Number(i as f64 * 10.0));
            row.insert("future_value".to_string(), Value::Number(i as f64 * 10.0));
            row.insert("predefined_split_column".to_string(), Value::from("TEST"));
            row
        })
        .collect()
}

/// Pipeline over the given doubles
pub fn pipeline(
    config: PipelineConfig,
    warehouse: Arc<InMemoryWarehouse>,
    automl: Arc<FakeAutoMl>,
) -> Pipeline {
    PipelineBuilder::new(config)
        .with_warehouse(warehouse)
        .with_automl(automl)
        .build()
        .expect("Failed to build pipeline")
}
