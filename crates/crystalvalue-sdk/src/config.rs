//! Configuration types for the CrystalValue pipeline

use crate::error::{Result, SdkError};
use crystalvalue_core::types::validate_identifier;
use crystalvalue_core::FeatureTypes;
use crystalvalue_runtime::{
    AutoMlConfig, TransactionColumns, WarehouseConfig, SPLIT_COLUMN, TARGET_COLUMN,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline configuration, fixed for the lifetime of a [`Pipeline`](crate::Pipeline)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Google Cloud project id
    pub project_id: String,

    /// Warehouse dataset holding every table the pipeline reads and writes
    pub dataset_id: String,

    /// Table created by the training feature query
    #[serde(default = "default_training_table_name")]
    pub training_table_name: String,

    /// Table created by the prediction feature query
    #[serde(default = "default_predict_table_name")]
    pub predict_table_name: String,

    #[serde(default = "default_customer_id_column")]
    pub customer_id_column: String,

    #[serde(default = "default_date_column")]
    pub date_column: String,

    /// Transaction value summed into the label
    #[serde(default = "default_value_column")]
    pub value_column: String,

    /// Explicit feature types; detected from the transaction table when unset
    #[serde(default)]
    pub features_types: Option<FeatureTypes>,

    /// Columns never used as features (the customer id and date columns are
    /// always ignored)
    #[serde(default)]
    pub ignore_columns: Vec<String>,

    /// Warehouse and Vertex AI region
    #[serde(default = "default_location")]
    pub location: String,

    /// Days of history aggregated into features
    #[serde(default = "default_days")]
    pub days_lookback: u32,

    /// Days of future value summed into the label
    #[serde(default = "default_days")]
    pub days_lookahead: u32,

    /// Step between training reference dates; a single reference date when unset
    #[serde(default)]
    pub window_step_days: Option<u32>,

    /// Model to use when none is trained in this run
    #[serde(default)]
    pub model_id: Option<String>,

    /// Endpoint to use when no model is deployed in this run
    #[serde(default)]
    pub endpoint_id: Option<String>,

    /// REST API settings
    #[serde(default)]
    pub api: CloudApiConfig,
}

/// Connection settings shared by the BigQuery and Vertex AI clients
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CloudApiConfig {
    /// OAuth2 access token
    #[serde(default)]
    pub access_token: Option<String>,

    /// Override for the BigQuery REST base URL
    #[serde(default)]
    pub bigquery_base_url: Option<String>,

    /// Override for the Vertex AI REST base URL
    #[serde(default)]
    pub vertex_base_url: Option<String>,

    /// Interval between status checks of jobs and operations
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Limit for AutoML training, in seconds
    #[serde(default)]
    pub training_timeout_secs: Option<u64>,
}

impl fmt::Debug for CloudApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudApiConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("bigquery_base_url", &self.bigquery_base_url)
            .field("vertex_base_url", &self.vertex_base_url)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("training_timeout_secs", &self.training_timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            training_table_name: default_training_table_name(),
            predict_table_name: default_predict_table_name(),
            customer_id_column: default_customer_id_column(),
            date_column: default_date_column(),
            value_column: default_value_column(),
            features_types: None,
            ignore_columns: Vec::new(),
            location: default_location(),
            days_lookback: default_days(),
            days_lookahead: default_days(),
            window_step_days: None,
            model_id: None,
            endpoint_id: None,
            api: CloudApiConfig::default(),
        }
    }

    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SdkError::ConfigError(format!("Failed to parse pipeline config: {}", e)))
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_days(mut self, days_lookback: u32, days_lookahead: u32) -> Self {
        self.days_lookback = days_lookback;
        self.days_lookahead = days_lookahead;
        self
    }

    pub fn with_features_types(mut self, features_types: FeatureTypes) -> Self {
        self.features_types = Some(features_types);
        self
    }

    pub fn with_ignore_columns(mut self, columns: Vec<String>) -> Self {
        self.ignore_columns = columns;
        self
    }

    /// Key column names as used by the feature queries
    pub fn transaction_columns(&self) -> TransactionColumns {
        TransactionColumns {
            customer_id: self.customer_id_column.clone(),
            date: self.date_column.clone(),
            value: self.value_column.clone(),
        }
    }

    /// Configured ignore list plus the customer id and date columns
    pub fn effective_ignore_columns(&self) -> Vec<String> {
        let mut columns = self.ignore_columns.clone();
        for key in [&self.customer_id_column, &self.date_column] {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        columns
    }

    /// BigQuery client settings
    pub fn warehouse_config(&self) -> WarehouseConfig {
        let mut config = WarehouseConfig::new(self.project_id.clone());
        if let Some(url) = &self.api.bigquery_base_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(token) = &self.api.access_token {
            config = config.with_access_token(token.clone());
        }
        if let Some(interval) = self.api.poll_interval_ms {
            config = config.with_poll_interval_ms(interval);
        }
        config
    }

    /// Vertex AI client settings
    pub fn automl_config(&self) -> AutoMlConfig {
        let mut config = AutoMlConfig::new(self.project_id.clone(), self.location.clone());
        if let Some(url) = &self.api.vertex_base_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(token) = &self.api.access_token {
            config = config.with_access_token(token.clone());
        }
        if let Some(interval) = self.api.poll_interval_ms {
            config = config.with_poll_interval_ms(interval);
        }
        if let Some(timeout) = self.api.training_timeout_secs {
            config.training_timeout_secs = timeout;
        }
        config
    }

    /// Check names and windows before any call is made
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(SdkError::ConfigError("project_id is required".to_string()));
        }
        if self.dataset_id.trim().is_empty() {
            return Err(SdkError::ConfigError("dataset_id is required".to_string()));
        }

        for name in [
            &self.dataset_id,
            &self.training_table_name,
            &self.predict_table_name,
            &self.customer_id_column,
            &self.date_column,
            &self.value_column,
        ] {
            validate_identifier(name)?;
        }

        if self.days_lookback == 0 || self.days_lookahead == 0 {
            return Err(SdkError::ConfigError(
                "days_lookback and days_lookahead must be at least 1".to_string(),
            ));
        }
        if self.window_step_days == Some(0) {
            return Err(SdkError::ConfigError(
                "window_step_days must be at least 1".to_string(),
            ));
        }
        if let Some(features) = &self.features_types {
            features.validate()?;
            if features.is_empty() {
                return Err(SdkError::ConfigError(
                    "features_types is set but lists no columns".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Options for [`Pipeline::run_data_checks`](crate::Pipeline::run_data_checks)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCheckOptions {
    #[serde(default = "default_summary_table_name")]
    pub summary_table_name: String,

    #[serde(default = "default_round_decimal_places")]
    pub round_decimal_places: u32,
}

impl Default for DataCheckOptions {
    fn default() -> Self {
        Self {
            summary_table_name: default_summary_table_name(),
            round_decimal_places: default_round_decimal_places(),
        }
    }
}

/// Options for [`Pipeline::train`](crate::Pipeline::train)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    #[serde(default = "default_dataset_display_name")]
    pub dataset_display_name: String,

    #[serde(default = "default_model_display_name")]
    pub model_display_name: String,

    #[serde(default = "default_split_column")]
    pub predefined_split_column_name: String,

    #[serde(default = "default_target_column")]
    pub target_column: String,

    /// "minimize-rmse", "minimize-mae" or "minimize-rmsle"
    #[serde(default = "default_optimization_objective")]
    pub optimization_objective: String,

    #[serde(default = "default_budget")]
    pub budget_milli_node_hours: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            dataset_display_name: default_dataset_display_name(),
            model_display_name: default_model_display_name(),
            predefined_split_column_name: default_split_column(),
            target_column: default_target_column(),
            optimization_objective: default_optimization_objective(),
            budget_milli_node_hours: default_budget(),
        }
    }
}

/// Options for [`Pipeline::deploy_model`](crate::Pipeline::deploy_model)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOptions {
    #[serde(default = "default_endpoint_display_name")]
    pub endpoint_display_name: String,

    #[serde(default = "default_machine_type")]
    pub machine_type: String,

    #[serde(default = "default_replica_count")]
    pub min_replica_count: u32,

    #[serde(default = "default_replica_count")]
    pub max_replica_count: u32,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            endpoint_display_name: default_endpoint_display_name(),
            machine_type: default_machine_type(),
            min_replica_count: default_replica_count(),
            max_replica_count: default_replica_count(),
        }
    }
}

/// Options for [`Pipeline::batch_predict`](crate::Pipeline::batch_predict)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictOptions {
    /// Recorded with every prediction row
    #[serde(default = "default_model_display_name")]
    pub model_name: String,

    /// Table the predictions are appended to
    #[serde(default = "default_predictions_table")]
    pub destination_table: String,

    #[serde(default = "default_target_column")]
    pub target_column: String,
}

impl Default for BatchPredictOptions {
    fn default() -> Self {
        Self {
            model_name: default_model_display_name(),
            destination_table: default_predictions_table(),
            target_column: default_target_column(),
        }
    }
}

/// Options for [`Pipeline::evaluate_model`](crate::Pipeline::evaluate_model)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateOptions {
    /// Table the evaluation rows are appended to
    #[serde(default = "default_evaluation_table")]
    pub table_evaluation_stats: String,

    #[serde(default = "default_number_bins")]
    pub number_bins: usize,

    /// Instances sent per online prediction request
    #[serde(default = "default_prediction_batch_size")]
    pub prediction_batch_size: usize,

    #[serde(default = "default_target_column")]
    pub target_column: String,

    #[serde(default = "default_split_column")]
    pub predefined_split_column_name: String,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            table_evaluation_stats: default_evaluation_table(),
            number_bins: default_number_bins(),
            prediction_batch_size: default_prediction_batch_size(),
            target_column: default_target_column(),
            predefined_split_column_name: default_split_column(),
        }
    }
}

// Default value functions
fn default_training_table_name() -> String {
    "training_data".to_string()
}

fn default_predict_table_name() -> String {
    "predict_features_data".to_string()
}

fn default_customer_id_column() -> String {
    "customer_id".to_string()
}

fn default_date_column() -> String {
    "date".to_string()
}

fn default_value_column() -> String {
    "value".to_string()
}

fn default_location() -> String {
    "europe-west4".to_string()
}

fn default_days() -> u32 {
    365
}

fn default_summary_table_name() -> String {
    "crystalvalue_data_statistics".to_string()
}

fn default_round_decimal_places() -> u32 {
    2
}

fn default_dataset_display_name() -> String {
    "crystalvalue_dataset".to_string()
}

fn default_model_display_name() -> String {
    "crystalvalue_model".to_string()
}

fn default_split_column() -> String {
    SPLIT_COLUMN.to_string()
}

fn default_target_column() -> String {
    TARGET_COLUMN.to_string()
}

fn default_optimization_objective() -> String {
    "minimize-rmse".to_string()
}

fn default_budget() -> u64 {
    1000
}

fn default_endpoint_display_name() -> String {
    "crystalvalue_endpoint".to_string()
}

fn default_machine_type() -> String {
    "n1-standard-2".to_string()
}

fn default_replica_count() -> u32 {
    1
}

fn default_predictions_table() -> String {
    "crystalvalue_predictions".to_string()
}

fn default_evaluation_table() -> String {
    "crystalvalue_evaluation".to_string()
}

fn default_number_bins() -> usize {
    10
}

fn default_prediction_batch_size() -> usize {
    500
}
