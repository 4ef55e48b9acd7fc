//! CrystalValue SDK
//!
//! High-level API for running the customer lifetime value pipeline:
//! synthetic data, data checks, feature engineering, AutoML training and
//! deployment, batch prediction and evaluation.

pub mod builder;
pub mod config;
pub mod error;
pub mod pipeline;

// Re-export main types
pub use builder::PipelineBuilder;
pub use config::{
    BatchPredictOptions, CloudApiConfig, DataCheckOptions, DeployOptions, EvaluateOptions,
    PipelineConfig, TrainOptions,
};
pub use error::{Result, SdkError};
pub use pipeline::{Pipeline, RunState};

// Re-export commonly used types from dependencies
pub use crystalvalue_core::{FeatureType, FeatureTypes, Row, Value};
pub use crystalvalue_runtime::{
    DataSummary, EvaluationReport, QueryResult, QueryType, SyntheticDataConfig,
};
