//! Managed ML Configuration

use serde::{Deserialize, Serialize};

/// Vertex AI client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMlConfig {
    /// Google Cloud project id
    pub project_id: String,

    /// Region for datasets, models and endpoints
    #[serde(default = "default_location")]
    pub location: String,

    /// REST API base URL; derived from the location when unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// OAuth2 access token sent as a bearer token
    #[serde(default)]
    pub access_token: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Interval between status checks of long-running operations
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Limit for dataset, endpoint and deployment operations, in seconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Limit for training pipelines, in seconds
    #[serde(default = "default_training_timeout")]
    pub training_timeout_secs: u64,

    /// Limit for batch prediction jobs, in seconds
    #[serde(default = "default_batch_timeout")]
    pub batch_prediction_timeout_secs: u64,
}

impl AutoMlConfig {
    pub fn new(project_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
            base_url: None,
            access_token: None,
            timeout_ms: default_timeout(),
            poll_interval_ms: default_poll_interval(),
            operation_timeout_secs: default_operation_timeout(),
            training_timeout_secs: default_training_timeout(),
            batch_prediction_timeout_secs: default_batch_timeout(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Regional API endpoint, e.g. `https://europe-west4-aiplatform.googleapis.com/v1`
    pub fn api_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com/v1", self.location),
        }
    }
}

// Default value functions
fn default_location() -> String {
    "europe-west4".to_string()
}

fn default_timeout() -> u64 {
    60000
}

fn default_poll_interval() -> u64 {
    30000
}

fn default_operation_timeout() -> u64 {
    3600
}

fn default_training_timeout() -> u64 {
    86400
}

fn default_batch_timeout() -> u64 {
    21600
}
