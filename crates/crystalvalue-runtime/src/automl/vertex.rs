//! Vertex AI Client Implementation
//!
//! Uses the `datasets`, `trainingPipelines`, `endpoints` and
//! `batchPredictionJobs` collections of the Vertex AI v1 REST API. Creation
//! calls return either a long-running operation or a resource with a state;
//! both are polled until they finish.

use super::config::AutoMlConfig;
use super::{
    AutoMlClient, BatchPredictionOutput, BatchPredictionRequest, DeployRequest, DeployedModel,
    TrainingRequest,
};
use crate::error::{Result, RuntimeError};
use crate::http::{CloudHttpClient, PollSchedule};
use crate::warehouse::TableRef;
use crystalvalue_core::Row;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const TABULAR_DATASET_SCHEMA: &str =
    "gs://google-cloud-aiplatform/schema/dataset/metadata/tabular_1.0.0.yaml";
const AUTOML_TABULAR_DEFINITION: &str =
    "gs://google-cloud-aiplatform/schema/trainingjob/definition/automl_tabular_1.0.0.yaml";

/// Vertex AI REST client
pub struct VertexAiClient {
    config: AutoMlConfig,
    http: CloudHttpClient,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<Status>,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Training pipeline or batch prediction job
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<Status>,
    #[serde(default)]
    model_to_upload: Option<NamedResource>,
    #[serde(default)]
    output_info: Option<OutputInfo>,
}

#[derive(Debug, Deserialize)]
struct NamedResource {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputInfo {
    #[serde(default)]
    bigquery_output_dataset: String,
    #[serde(default)]
    bigquery_output_table: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<serde_json::Value>,
}

impl VertexAiClient {
    /// Create a new Vertex AI client
    pub fn new(config: AutoMlConfig) -> Result<Self> {
        tracing::info!(
            "Initializing Vertex AI client for project {} in {}",
            config.project_id,
            config.location
        );
        let http = CloudHttpClient::new(config.timeout_ms, config.access_token.clone())?;
        Ok(Self { config, http })
    }

    fn parent(&self) -> String {
        format!(
            "projects/{}/locations/{}",
            self.config.project_id, self.config.location
        )
    }

    /// Accept either a full resource name or a bare id
    fn resource_name(&self, collection: &str, id: &str) -> String {
        if id.contains('/') {
            id.to_string()
        } else {
            format!("{}/{}/{}", self.parent(), collection, id)
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.config.api_base_url(), resource)
    }

    fn schedule(&self, timeout_secs: u64) -> PollSchedule {
        PollSchedule {
            interval: Duration::from_millis(self.config.poll_interval_ms),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Poll a long-running operation and return its response
    async fn wait_for_operation(&self, operation: Operation) -> Result<serde_json::Value> {
        if let Some(response) = operation_outcome(&operation)? {
            return Ok(response);
        }

        let url = self.url(&operation.name);
        let http = &self.http;
        self.schedule(self.config.operation_timeout_secs)
            .run(&format!("operation {}", operation.name), || {
                let url = url.as_str();
                async move {
                    let operation: Operation = http.get_json(url).await?;
                    operation_outcome(&operation)
                }
            })
            .await
    }

    /// Poll a training pipeline or batch job until it reaches a terminal state
    async fn wait_for_job(&self, job: JobResource, timeout_secs: u64) -> Result<JobResource> {
        let name = job.name.clone();
        if job_finished(&job)? {
            return Ok(job);
        }

        let url = self.url(&name);
        let http = &self.http;
        self.schedule(timeout_secs)
            .run(&name, || {
                let url = url.as_str();
                async move {
                    let job: JobResource = http.get_json(url).await?;
                    tracing::debug!("{} is {}", job.name, job.state);
                    finished(job)
                }
            })
            .await
    }

    async fn create_endpoint(&self, display_name: &str) -> Result<String> {
        let url = self.url(&format!("{}/endpoints", self.parent()));
        let operation: Operation = self
            .http
            .post_json(&url, &json!({ "displayName": display_name }))
            .await?;
        let endpoint = self.wait_for_operation(operation).await?;
        response_name(&endpoint, "endpoint")
    }
}

#[async_trait::async_trait]
impl AutoMlClient for VertexAiClient {
    async fn create_dataset(&self, display_name: &str, source: &TableRef) -> Result<String> {
        let body = json!({
            "displayName": display_name,
            "metadataSchemaUri": TABULAR_DATASET_SCHEMA,
            "metadata": {
                "inputConfig": {
                    "bigquerySource": { "uri": source.bq_uri() }
                }
            },
        });
        let url = self.url(&format!("{}/datasets", self.parent()));
        let operation: Operation = self.http.post_json(&url, &body).await?;
        let dataset = self.wait_for_operation(operation).await?;
        let name = response_name(&dataset, "dataset")?;

        tracing::info!("Created dataset {} from {}", name, source);
        Ok(name)
    }

    async fn train_model(&self, request: &TrainingRequest) -> Result<String> {
        let transformations: Vec<serde_json::Value> = request
            .feature_columns
            .iter()
            .map(|column| json!({ "auto": { "columnName": column } }))
            .collect();

        let body = json!({
            "displayName": request.model_display_name,
            "trainingTaskDefinition": AUTOML_TABULAR_DEFINITION,
            "trainingTaskInputs": {
                "targetColumn": request.target_column,
                "predictionType": "regression",
                "optimizationObjective": request.optimization_objective,
                "trainBudgetMilliNodeHours": request.budget_milli_node_hours.to_string(),
                "transformations": transformations,
            },
            "inputDataConfig": {
                "datasetId": super::resource_id(&request.dataset),
                "predefinedSplit": { "key": request.split_column },
            },
            "modelToUpload": { "displayName": request.model_display_name },
        });

        let url = self.url(&format!("{}/trainingPipelines", self.parent()));
        let pipeline: JobResource = self.http.post_json(&url, &body).await?;
        tracing::info!(
            "Started training pipeline {} (budget {} milli node hours)",
            pipeline.name,
            request.budget_milli_node_hours
        );

        let pipeline = self
            .wait_for_job(pipeline, self.config.training_timeout_secs)
            .await?;
        let model = pipeline
            .model_to_upload
            .map(|m| m.name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                RuntimeError::UnexpectedResponse(format!(
                    "training pipeline {} finished without a model",
                    pipeline.name
                ))
            })?;

        tracing::info!("Trained model {}", model);
        Ok(model)
    }

    async fn deploy_model(&self, request: &DeployRequest) -> Result<DeployedModel> {
        let model = self.resource_name("models", &request.model);
        let endpoint = self.create_endpoint(&request.endpoint_display_name).await?;
        tracing::info!("Created endpoint {}", endpoint);

        let body = json!({
            "deployedModel": {
                "model": model,
                "displayName": request.endpoint_display_name,
                "dedicatedResources": {
                    "machineSpec": { "machineType": request.machine_type },
                    "minReplicaCount": request.min_replica_count,
                    "maxReplicaCount": request.max_replica_count,
                },
            },
            "trafficSplit": { "0": 100 },
        });
        let url = self.url(&format!("{}:deployModel", endpoint));
        let operation: Operation = self.http.post_json(&url, &body).await?;
        let response = self.wait_for_operation(operation).await?;

        let deployed_model_id = response
            .pointer("/deployedModel/id")
            .and_then(|id| id.as_str())
            .unwrap_or_default()
            .to_string();

        tracing::info!("Deployed model {} to endpoint {}", model, endpoint);
        Ok(DeployedModel {
            endpoint,
            deployed_model_id,
        })
    }

    async fn predict(&self, endpoint: &str, instances: &[Row]) -> Result<Vec<f64>> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = self.resource_name("endpoints", endpoint);
        let body = json!({
            "instances": instances.iter().map(instance).collect::<Vec<_>>(),
        });
        let url = self.url(&format!("{}:predict", endpoint));
        let response: PredictResponse = self.http.post_json(&url, &body).await?;

        if response.predictions.len() != instances.len() {
            return Err(RuntimeError::UnexpectedResponse(format!(
                "{} predictions for {} instances",
                response.predictions.len(),
                instances.len()
            )));
        }
        response.predictions.iter().map(prediction_value).collect()
    }

    async fn batch_predict(&self, request: &BatchPredictionRequest) -> Result<BatchPredictionOutput> {
        let body = json!({
            "displayName": request.job_display_name,
            "model": self.resource_name("models", &request.model),
            "inputConfig": {
                "instancesFormat": "bigquery",
                "bigquerySource": { "inputUri": request.input_table.bq_uri() },
            },
            "outputConfig": {
                "predictionsFormat": "bigquery",
                "bigqueryDestination": { "outputUri": format!("bq://{}", request.output_project) },
            },
        });

        let url = self.url(&format!("{}/batchPredictionJobs", self.parent()));
        let job: JobResource = self.http.post_json(&url, &body).await?;
        tracing::info!("Started batch prediction job {}", job.name);

        let job = self
            .wait_for_job(job, self.config.batch_prediction_timeout_secs)
            .await?;
        let output = job.output_info.ok_or_else(|| {
            RuntimeError::UnexpectedResponse(format!(
                "batch prediction job {} finished without output info",
                job.name
            ))
        })?;

        Ok(BatchPredictionOutput {
            job: job.name,
            output_dataset: output.bigquery_output_dataset,
            output_table: output.bigquery_output_table,
        })
    }
}

/// `Some(response)` once done, an error if the operation failed, `None` while running
fn operation_outcome(operation: &Operation) -> Result<Option<serde_json::Value>> {
    if !operation.done {
        return Ok(None);
    }
    if let Some(error) = &operation.error {
        return Err(RuntimeError::OperationFailed(format!(
            "operation {} failed ({}): {}",
            operation.name, error.code, error.message
        )));
    }
    Ok(Some(operation.response.clone().unwrap_or_else(|| json!({}))))
}

/// Whether a pipeline or job reached a terminal state; failed states are errors
fn job_finished(job: &JobResource) -> Result<bool> {
    let state = job.state.as_str();
    if state.ends_with("_SUCCEEDED") {
        return Ok(true);
    }
    if state.ends_with("_FAILED") || state.ends_with("_CANCELLED") || state.ends_with("_EXPIRED") {
        let message = job
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        return Err(RuntimeError::OperationFailed(format!(
            "{} ended in {}: {}",
            job.name, state, message
        )));
    }
    Ok(false)
}

fn finished(job: JobResource) -> Result<Option<JobResource>> {
    Ok(job_finished(&job)?.then_some(job))
}

fn response_name(response: &serde_json::Value, what: &str) -> Result<String> {
    response
        .get("name")
        .and_then(|name| name.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RuntimeError::UnexpectedResponse(format!("{} operation returned no resource name", what))
        })
}

/// Tabular AutoML models take every instance value as a string
fn instance(row: &Row) -> serde_json::Value {
    let fields: serde_json::Map<String, serde_json::Value> = row
        .iter()
        .map(|(column, value)| {
            let rendered = value
                .as_text()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
            (column.clone(), rendered)
        })
        .collect();
    serde_json::Value::Object(fields)
}

/// Regression predictions come back as `{"value": x, ...}`
fn prediction_value(prediction: &serde_json::Value) -> Result<f64> {
    let value = match prediction {
        serde_json::Value::Object(fields) => fields.get("value"),
        other => Some(other),
    };
    value
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| {
            RuntimeError::UnexpectedResponse(format!("cannot read prediction {}", prediction))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crystalvalue_core::Value;

    #[test]
    fn test_instance_renders_strings() {
        let row: Row = [
            ("number_transactions", Value::Number(3.0)),
            ("avg_value", Value::Number(12.5)),
            ("any_is_registered", Value::Bool(true)),
            ("most_frequent_product_type", Value::Null),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let rendered = instance(&row);
        assert_eq!(rendered["number_transactions"], json!("3"));
        assert_eq!(rendered["avg_value"], json!("12.5"));
        assert_eq!(rendered["any_is_registered"], json!("true"));
        assert_eq!(rendered["most_frequent_product_type"], json!(null));
    }

    #[test]
    fn test_prediction_value_shapes() {
        assert_eq!(
            prediction_value(&json!({"value": 42.5, "lower_bound": 1.0})).unwrap(),
            42.5
        );
        assert_eq!(prediction_value(&json!(7.0)).unwrap(), 7.0);
        assert_eq!(prediction_value(&json!({"value": "3.25"})).unwrap(), 3.25);
        assert!(prediction_value(&json!({"scores": [1.0]})).is_err());
    }

    #[test]
    fn test_job_states() {
        let job = |state: &str| JobResource {
            name: "projects/p/locations/l/trainingPipelines/1".to_string(),
            state: state.to_string(),
            error: Some(Status {
                code: 3,
                message: "bad column".to_string(),
            }),
            model_to_upload: None,
            output_info: None,
        };
        assert!(!job_finished(&job("PIPELINE_STATE_RUNNING")).unwrap());
        assert!(job_finished(&job("PIPELINE_STATE_SUCCEEDED")).unwrap());
        assert!(job_finished(&job("JOB_STATE_SUCCEEDED")).unwrap());
        let err = job_finished(&job("PIPELINE_STATE_FAILED")).unwrap_err();
        assert!(err.to_string().contains("bad column"));
    }

    #[test]
    fn test_operation_outcome() {
        let running = Operation {
            name: "op".to_string(),
            done: false,
            error: None,
            response: None,
        };
        assert!(operation_outcome(&running).unwrap().is_none());

        let failed = Operation {
            done: true,
            error: Some(Status {
                code: 7,
                message: "permission denied".to_string(),
            }),
            ..running
        };
        assert!(matches!(
            operation_outcome(&failed),
            Err(RuntimeError::OperationFailed(_))
        ));
    }

    #[test]
    fn test_resource_names() {
        let client = VertexAiClient::new(AutoMlConfig::new("proj", "europe-west4")).unwrap();
        assert_eq!(
            client.resource_name("models", "123"),
            "projects/proj/locations/europe-west4/models/123"
        );
        assert_eq!(
            client.resource_name("models", "projects/x/locations/y/models/9"),
            "projects/x/locations/y/models/9"
        );
    }
}
