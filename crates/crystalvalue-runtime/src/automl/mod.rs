//! Managed ML Layer
//!
//! AutoML tabular regression on Vertex AI:
//! - Datasets created from warehouse tables
//! - Training pipelines with a predefined split column
//! - Endpoint deployment and online prediction
//! - Batch prediction from and into the warehouse
//!
//! [`VertexAiClient`] talks to the Vertex AI REST API; tests substitute
//! in-memory implementations of [`AutoMlClient`].

pub mod config;
mod vertex;

pub use config::AutoMlConfig;
pub use vertex::VertexAiClient;

use crate::error::Result;
use crate::warehouse::TableRef;
use crystalvalue_core::types::validate_identifier;
use crystalvalue_core::Row;
use serde::{Deserialize, Serialize};

/// AutoML tabular training job parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    /// Dataset resource name returned by [`AutoMlClient::create_dataset`]
    pub dataset: String,

    pub model_display_name: String,

    /// Column to predict
    pub target_column: String,

    /// Column with TRAIN / VALIDATE / TEST values
    pub split_column: String,

    /// e.g. "minimize-rmse", "minimize-mae", "minimize-rmsle"
    pub optimization_objective: String,

    /// 1000 milli node hours is one node hour
    pub budget_milli_node_hours: u64,

    /// Input columns, each with automatic transformation
    pub feature_columns: Vec<String>,
}

/// Endpoint deployment parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Model resource name or id
    pub model: String,

    pub endpoint_display_name: String,

    #[serde(default = "default_machine_type")]
    pub machine_type: String,

    #[serde(default = "default_replica_count")]
    pub min_replica_count: u32,

    #[serde(default = "default_replica_count")]
    pub max_replica_count: u32,
}

impl DeployRequest {
    pub fn new(model: impl Into<String>, endpoint_display_name: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            endpoint_display_name: endpoint_display_name.into(),
            machine_type: default_machine_type(),
            min_replica_count: default_replica_count(),
            max_replica_count: default_replica_count(),
        }
    }
}

fn default_machine_type() -> String {
    "n1-standard-2".to_string()
}

fn default_replica_count() -> u32 {
    1
}

/// A model deployed to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedModel {
    /// Endpoint resource name
    pub endpoint: String,

    /// Id of the deployment within the endpoint
    pub deployed_model_id: String,
}

impl DeployedModel {
    /// Last path segment of the endpoint resource name
    pub fn endpoint_id(&self) -> &str {
        resource_id(&self.endpoint)
    }
}

/// Batch prediction job parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPredictionRequest {
    /// Model resource name or id
    pub model: String,

    pub job_display_name: String,

    /// Table with one feature row per instance
    pub input_table: TableRef,

    /// Project in which the service creates the output dataset
    pub output_project: String,
}

/// Where a batch prediction job wrote its results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPredictionOutput {
    /// Job resource name
    pub job: String,

    /// Output dataset, as `bq://project.dataset`
    pub output_dataset: String,

    /// Output table within the dataset
    pub output_table: String,
}

impl BatchPredictionOutput {
    /// Output table as a table reference
    pub fn table_ref(&self) -> Option<TableRef> {
        let dataset = self.output_dataset.strip_prefix("bq://")?;
        let (project, dataset) = dataset.split_once('.')?;
        Some(TableRef::new(project, dataset, self.output_table.clone()))
    }
}

/// Operations the pipeline needs from the managed ML platform
#[async_trait::async_trait]
pub trait AutoMlClient: Send + Sync {
    /// Create a tabular dataset backed by a warehouse table; returns its resource name
    async fn create_dataset(&self, display_name: &str, source: &TableRef) -> Result<String>;

    /// Train an AutoML regression model and wait for it; returns the model resource name
    async fn train_model(&self, request: &TrainingRequest) -> Result<String>;

    /// Create an endpoint and deploy a model to it
    async fn deploy_model(&self, request: &DeployRequest) -> Result<DeployedModel>;

    /// Online prediction, one value per instance
    async fn predict(&self, endpoint: &str, instances: &[Row]) -> Result<Vec<f64>>;

    /// Run a batch prediction job and wait for it
    async fn batch_predict(&self, request: &BatchPredictionRequest) -> Result<BatchPredictionOutput>;
}

/// Last path segment of a resource name (`projects/p/locations/l/models/123` -> `123`)
pub fn resource_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// SQL that copies batch predictions into a results table, flattening the
/// predicted value and tagging rows with the model name and load time.
pub fn predictions_load_query(
    output: &BatchPredictionOutput,
    target_column: &str,
    model_name: &str,
) -> Result<String> {
    validate_identifier(target_column)?;
    let table = output.table_ref().ok_or_else(|| {
        crate::error::RuntimeError::UnexpectedResponse(format!(
            "cannot parse batch prediction output {}",
            output.output_dataset
        ))
    })?;
    let predicted = format!("predicted_{}", target_column);

    Ok(format!(
        "SELECT\n  * EXCEPT (`{predicted}`),\n  `{predicted}`.value AS `{predicted}`,\n  '{model}' AS model_name,\n  CURRENT_TIMESTAMP() AS prediction_time\nFROM {table}\n",
        predicted = predicted,
        model = model_name.replace('\\', "\\\\").replace('\'', "\\'"),
        table = table.sql(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id() {
        assert_eq!(resource_id("projects/p/locations/l/endpoints/42"), "42");
        assert_eq!(resource_id("42"), "42");
    }

    #[test]
    fn test_batch_output_table_ref() {
        let output = BatchPredictionOutput {
            job: "projects/p/locations/l/batchPredictionJobs/1".to_string(),
            output_dataset: "bq://proj.prediction_crystalvalue_model_2021".to_string(),
            output_table: "predictions".to_string(),
        };
        assert_eq!(
            output.table_ref().unwrap().to_string(),
            "proj.prediction_crystalvalue_model_2021.predictions"
        );

        let sql = predictions_load_query(&output, "future_value", "crystalvalue_model").unwrap();
        assert!(sql.contains("* EXCEPT (`predicted_future_value`)"));
        assert!(sql.contains("`predicted_future_value`.value AS `predicted_future_value`"));
        assert!(sql.contains("'crystalvalue_model' AS model_name"));
        assert!(sql.contains("FROM `proj.prediction_crystalvalue_model_2021.predictions`"));

        let unparsable = BatchPredictionOutput {
            output_dataset: "gs://bucket".to_string(),
            ..output
        };
        assert!(predictions_load_query(&unparsable, "future_value", "m").is_err());
    }

    #[test]
    fn test_deploy_request_defaults() {
        let request: DeployRequest = serde_json::from_str(
            r#"{"model": "123", "endpoint_display_name": "crystalvalue_endpoint"}"#,
        )
        .unwrap();
        assert_eq!(request, DeployRequest::new("123", "crystalvalue_endpoint"));
        assert_eq!(request.machine_type, "n1-standard-2");
    }
}
