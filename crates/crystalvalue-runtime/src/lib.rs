//! CrystalValue Runtime - Warehouse, feature engineering and AutoML plumbing
//!
//! This crate provides the building blocks the pipeline sequences: the
//! warehouse and managed-ML clients, feature type detection, feature query
//! generation, data checks, synthetic data and model evaluation.

pub mod automl;
pub mod error;
pub mod evaluation;
pub mod feature;
pub(crate) mod http;
pub mod synthetic;
pub mod warehouse;

// Re-export main types
pub use automl::{
    AutoMlClient, AutoMlConfig, BatchPredictionOutput, BatchPredictionRequest, DeployRequest,
    DeployedModel, TrainingRequest, VertexAiClient,
};
pub use error::{Result, RuntimeError};
pub use evaluation::{evaluate, BinMetrics, EvaluationReport, PredictionPair};
pub use feature::query_builder::{SPLIT_COLUMN, TARGET_COLUMN, WINDOW_DATE_COLUMN};
pub use feature::{
    DataChecks, DataSummary, FeatureTypeDetector, QueryBuilder, QueryType, TransactionColumns,
};
pub use synthetic::{SyntheticDataConfig, SyntheticDataGenerator};
pub use warehouse::{
    BigQueryClient, QueryExecutor, QueryRequest, QueryResult, QuerySource, TableRef,
    WarehouseClient, WarehouseConfig, WriteDisposition,
};
