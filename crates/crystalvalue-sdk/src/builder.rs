//! Builder pattern for Pipeline

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crystalvalue_runtime::{AutoMlClient, BigQueryClient, VertexAiClient, WarehouseClient};
use std::sync::Arc;

/// Builder for Pipeline
///
/// # Example
///
/// ```rust,ignore
/// use crystalvalue_sdk::{PipelineBuilder, PipelineConfig};
///
/// // BigQuery and Vertex AI clients built from the config
/// let pipeline = PipelineBuilder::new(PipelineConfig::new("my-project", "ltv"))
///     .build()?;
///
/// // Custom clients (for testing)
/// let pipeline = PipelineBuilder::new(config)
///     .with_warehouse(Arc::new(warehouse))
///     .with_automl(Arc::new(automl))
///     .build()?;
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    warehouse: Option<Arc<dyn WarehouseClient>>,
    automl: Option<Arc<dyn AutoMlClient>>,
}

impl PipelineBuilder {
    /// Create a new builder
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            warehouse: None,
            automl: None,
        }
    }

    /// Use a custom warehouse client instead of BigQuery
    pub fn with_warehouse(mut self, warehouse: Arc<dyn WarehouseClient>) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    /// Use a custom AutoML client instead of Vertex AI
    pub fn with_automl(mut self, automl: Arc<dyn AutoMlClient>) -> Self {
        self.automl = Some(automl);
        self
    }

    /// Validate the configuration and build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        tracing::info!(
            "Building CrystalValue pipeline for {}.{} (location: {}, lookback: {} days, lookahead: {} days)",
            self.config.project_id,
            self.config.dataset_id,
            self.config.location,
            self.config.days_lookback,
            self.config.days_lookahead,
        );

        let warehouse = match self.warehouse {
            Some(warehouse) => warehouse,
            None => Arc::new(BigQueryClient::new(self.config.warehouse_config())?),
        };
        let automl = match self.automl {
            Some(automl) => automl,
            None => Arc::new(VertexAiClient::new(self.config.automl_config())?),
        };

        Ok(Pipeline::new(self.config, warehouse, automl))
    }
}
