//! Warehouse Configuration

use serde::{Deserialize, Serialize};

/// BigQuery client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Google Cloud project id
    pub project_id: String,

    /// REST API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth2 access token sent as a bearer token
    #[serde(default)]
    pub access_token: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Interval between job status checks in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum time to wait for a query job in seconds
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Page size when reading query results
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl WarehouseConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            base_url: default_base_url(),
            access_token: None,
            timeout_ms: default_timeout(),
            poll_interval_ms: default_poll_interval(),
            job_timeout_secs: default_job_timeout(),
            page_size: default_page_size(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
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
}

// Default value functions
fn default_base_url() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_timeout() -> u64 {
    60_000 // 1 minute
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_job_timeout() -> u64 {
    6 * 3600 // 6 hours
}

fn default_page_size() -> u32 {
    10_000
}
