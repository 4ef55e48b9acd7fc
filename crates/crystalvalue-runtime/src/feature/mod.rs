//! Feature engineering for LTV training and prediction
//!
//! - [`detector`]: classify transaction columns into feature types
//! - [`query_builder`]: generate windowed aggregation SQL
//! - [`data_checks`]: validate a transaction table before feature engineering

pub mod data_checks;
pub mod detector;
pub mod query_builder;

pub use data_checks::{DataChecks, DataSummary};
pub use detector::FeatureTypeDetector;
pub use query_builder::{QueryBuilder, QueryType, TransactionColumns};
