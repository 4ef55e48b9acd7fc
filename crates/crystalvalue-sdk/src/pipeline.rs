//! CrystalValue pipeline - sequences the LTV workflow stages
//!
//! Each stage awaits its warehouse or AutoML calls before returning. The
//! identifiers produced by training and deployment are kept in [`RunState`]
//! and used by later stages when no explicit id is passed.

use crate::config::{
    BatchPredictOptions, DataCheckOptions, DeployOptions, EvaluateOptions, PipelineConfig,
    TrainOptions,
};
use crate::error::{Result, SdkError};
use crystalvalue_core::types::validate_identifier;
use crystalvalue_core::{FeatureTypes, Row, TableSchema};
use crystalvalue_runtime::automl::predictions_load_query;
use crystalvalue_runtime::{
    evaluate, AutoMlClient, BatchPredictionRequest, DataChecks, DataSummary, DeployRequest,
    DeployedModel, EvaluationReport, FeatureTypeDetector, PredictionPair, QueryBuilder,
    QueryExecutor, QueryRequest, QueryResult, QuerySource, QueryType, RuntimeError,
    SyntheticDataConfig, SyntheticDataGenerator, TableRef, TrainingRequest, WarehouseClient,
    WriteDisposition, WINDOW_DATE_COLUMN,
};
use std::path::Path;
use std::sync::Arc;

/// Identifiers and detected features recorded during a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    /// Resource name of the model trained (or configured) for this run
    pub model_id: Option<String>,

    /// Id of the endpoint the model was deployed to
    pub endpoint_id: Option<String>,

    /// Feature types detected from the transaction table
    pub features_types: Option<FeatureTypes>,
}

/// One CrystalValue run against one dataset
pub struct Pipeline {
    config: PipelineConfig,
    executor: QueryExecutor,
    automl: Arc<dyn AutoMlClient>,
    state: RunState,
}

impl Pipeline {
    pub(crate) fn new(
        config: PipelineConfig,
        warehouse: Arc<dyn WarehouseClient>,
        automl: Arc<dyn AutoMlClient>,
    ) -> Self {
        let executor = QueryExecutor::new(
            warehouse,
            config.dataset_id.clone(),
            config.location.clone(),
        );
        let state = RunState {
            model_id: config.model_id.clone(),
            endpoint_id: config.endpoint_id.clone(),
            features_types: None,
        };
        Self {
            config,
            executor,
            automl,
            state,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn warehouse(&self) -> &dyn WarehouseClient {
        self.executor.warehouse().as_ref()
    }

    fn table_ref(&self, table_name: &str) -> TableRef {
        self.warehouse()
            .table_ref(&self.config.dataset_id, table_name)
    }

    // ========== Data ==========

    /// Generate synthetic transactions and load them into `table_name`
    pub async fn create_synthetic_data(
        &self,
        table_name: &str,
        synthetic: SyntheticDataConfig,
    ) -> Result<Vec<Row>> {
        validate_identifier(table_name)?;
        let rows = SyntheticDataGenerator::new(synthetic)
            .load(self.warehouse(), &self.config.dataset_id, table_name)
            .await?;
        Ok(rows)
    }

    /// Check that the transaction table can be used for feature engineering
    pub async fn run_data_checks(
        &self,
        transaction_table_name: &str,
        options: &DataCheckOptions,
    ) -> Result<DataSummary> {
        validate_identifier(&options.summary_table_name)?;
        let checks = DataChecks::new(
            self.table_ref(transaction_table_name),
            self.config.transaction_columns(),
        )
        .with_days(self.config.days_lookback, self.config.days_lookahead)
        .with_round_decimal_places(options.round_decimal_places);

        Ok(checks
            .run(&self.executor, &options.summary_table_name)
            .await?)
    }

    // ========== Features ==========

    /// Feature types to use for `transaction_table_name`.
    ///
    /// Configured types win; otherwise the table is inspected once and the
    /// result kept for later stages.
    pub async fn detect_feature_types(
        &mut self,
        transaction_table_name: &str,
    ) -> Result<FeatureTypes> {
        if let Some(features) = &self.config.features_types {
            return Ok(features.clone());
        }
        if let Some(features) = &self.state.features_types {
            return Ok(features.clone());
        }

        let features = FeatureTypeDetector::new()
            .detect_table(
                self.warehouse(),
                &self.config.dataset_id,
                transaction_table_name,
                &self.config.effective_ignore_columns(),
            )
            .await?;

        for (feature_type, column) in features.iter() {
            tracing::info!("Detected {} feature: {}", feature_type, column);
        }

        self.state.features_types = Some(features.clone());
        Ok(features)
    }

    /// Build the train or predict feature query for `transaction_table_name`
    /// and materialize it into the training or prediction table.
    ///
    /// When `write_executed_query_file` is set, the generated SQL is also
    /// written there.
    pub async fn feature_engineer(
        &mut self,
        transaction_table_name: &str,
        query_type: QueryType,
        write_executed_query_file: Option<&Path>,
    ) -> Result<QueryResult> {
        let features = self.detect_feature_types(transaction_table_name).await?;
        let schema = self
            .warehouse()
            .get_schema(&self.config.dataset_id, transaction_table_name)
            .await?;

        let sql = QueryBuilder::new(
            self.table_ref(transaction_table_name),
            self.config.transaction_columns(),
        )
        .with_days_lookback(self.config.days_lookback)
        .with_days_lookahead(self.config.days_lookahead)
        .with_window_step_days(self.config.window_step_days)
        .build_and_write(query_type, &schema, &features, write_executed_query_file)
        .await?;
        tracing::debug!("Generated {}:\n{}", query_type, sql);

        let destination = match query_type {
            QueryType::Train => &self.config.training_table_name,
            QueryType::Predict => &self.config.predict_table_name,
        };
        Ok(self
            .executor
            .run_source(&QuerySource::Sql(sql), destination, WriteDisposition::Truncate)
            .await?)
    }

    /// Run a query given as SQL text or as a file (exactly one) into
    /// `destination_table_name`
    pub async fn run_query(
        &self,
        destination_table_name: &str,
        query_sql: Option<&str>,
        query_file: Option<&Path>,
    ) -> Result<QueryResult> {
        validate_identifier(destination_table_name)?;
        Ok(self
            .executor
            .run_query(destination_table_name, query_sql, query_file)
            .await?)
    }

    // ========== Model ==========

    /// Train an AutoML regression model on the training table. Returns the
    /// model resource name, which is also recorded in the run state.
    pub async fn train(&mut self, options: &TrainOptions) -> Result<String> {
        let training_table = &self.config.training_table_name;
        let schema = self
            .warehouse()
            .get_schema(&self.config.dataset_id, training_table)
            .await?;

        let missing = schema.missing_columns([
            options.target_column.as_str(),
            options.predefined_split_column_name.as_str(),
        ]);
        if !missing.is_empty() {
            return Err(RuntimeError::MissingColumns {
                table: training_table.clone(),
                columns: missing,
            }
            .into());
        }

        let feature_columns = model_feature_columns(
            &schema,
            &[
                self.config.customer_id_column.as_str(),
                WINDOW_DATE_COLUMN,
                options.target_column.as_str(),
                options.predefined_split_column_name.as_str(),
            ],
        );
        if feature_columns.is_empty() {
            return Err(RuntimeError::NoFeaturesDetected(training_table.clone()).into());
        }

        let dataset = self
            .automl
            .create_dataset(
                &options.dataset_display_name,
                &self.table_ref(training_table),
            )
            .await?;
        tracing::info!("Created dataset {}", dataset);

        let request = TrainingRequest {
            dataset,
            model_display_name: options.model_display_name.clone(),
            target_column: options.target_column.clone(),
            split_column: options.predefined_split_column_name.clone(),
            optimization_objective: options.optimization_objective.clone(),
            budget_milli_node_hours: options.budget_milli_node_hours,
            feature_columns,
        };
        let model = self.automl.train_model(&request).await?;
        tracing::info!("Trained model {}", model);

        self.state.model_id = Some(model.clone());
        Ok(model)
    }

    /// Deploy a model to a new endpoint and record the endpoint id
    pub async fn deploy_model(
        &mut self,
        model_id: Option<&str>,
        options: &DeployOptions,
    ) -> Result<DeployedModel> {
        let model = self.resolve_model_id(model_id)?;
        let request = DeployRequest {
            model,
            endpoint_display_name: options.endpoint_display_name.clone(),
            machine_type: options.machine_type.clone(),
            min_replica_count: options.min_replica_count,
            max_replica_count: options.max_replica_count,
        };
        let deployed = self.automl.deploy_model(&request).await?;
        tracing::info!(
            "Deployed model {} to endpoint {}",
            request.model,
            deployed.endpoint
        );

        self.state.endpoint_id = Some(deployed.endpoint_id().to_string());
        Ok(deployed)
    }

    /// Score `input_table_name` with a batch prediction job and append the
    /// predictions to `options.destination_table`
    pub async fn batch_predict(
        &self,
        input_table_name: &str,
        model_id: Option<&str>,
        options: &BatchPredictOptions,
    ) -> Result<QueryResult> {
        let model = self.resolve_model_id(model_id)?;
        validate_identifier(&options.destination_table)?;

        let request = BatchPredictionRequest {
            model,
            job_display_name: format!("{}_batch_prediction", options.model_name),
            input_table: self.table_ref(input_table_name),
            output_project: self.config.project_id.clone(),
        };
        let output = self.automl.batch_predict(&request).await?;
        tracing::info!(
            "Batch prediction {} wrote {}.{}",
            output.job,
            output.output_dataset,
            output.output_table
        );

        let sql = predictions_load_query(&output, &options.target_column, &options.model_name)?;
        Ok(self
            .executor
            .run_source(
                &QuerySource::Sql(sql),
                &options.destination_table,
                WriteDisposition::Append,
            )
            .await?)
    }

    /// Score the TEST split of the training table against the endpoint,
    /// compute bin and ranking metrics and append them to
    /// `options.table_evaluation_stats`
    pub async fn evaluate_model(
        &self,
        endpoint_id: Option<&str>,
        options: &EvaluateOptions,
    ) -> Result<EvaluationReport> {
        let endpoint = self.resolve_endpoint_id(endpoint_id)?;
        if options.prediction_batch_size == 0 {
            return Err(SdkError::ConfigError(
                "prediction_batch_size must be at least 1".to_string(),
            ));
        }
        validate_identifier(&options.predefined_split_column_name)?;
        validate_identifier(&options.table_evaluation_stats)?;

        let sql = format!(
            "SELECT * FROM {} WHERE `{}` = 'TEST'",
            self.table_ref(&self.config.training_table_name).sql(),
            options.predefined_split_column_name
        );
        let holdout = self
            .warehouse()
            .run_query(&QueryRequest::new(sql, self.config.location.clone()))
            .await?;
        if holdout.is_empty() {
            return Err(RuntimeError::InsufficientData(format!(
                "no TEST rows in {}",
                self.config.training_table_name
            ))
            .into());
        }

        let excluded = [
            self.config.customer_id_column.as_str(),
            WINDOW_DATE_COLUMN,
            options.target_column.as_str(),
            options.predefined_split_column_name.as_str(),
        ];
        let instances: Vec<Row> = holdout
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter(|(name, _)| !excluded.contains(&name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .collect();

        let mut predictions = Vec::with_capacity(instances.len());
        for batch in instances.chunks(options.prediction_batch_size) {
            predictions.extend(self.automl.predict(&endpoint, batch).await?);
        }

        let pairs: Vec<PredictionPair> = holdout
            .rows
            .iter()
            .zip(predictions)
            .map(|(row, predicted)| {
                let actual = row.get(&options.target_column).and_then(|v| v.as_f64());
                PredictionPair::new(predicted, actual)
            })
            .collect();

        let report = evaluate(&pairs, options.number_bins)?;
        if report.excluded_pairs > 0 {
            tracing::warn!(
                "Excluded {} of {} holdout rows without an actual value",
                report.excluded_pairs,
                report.total_pairs
            );
        }
        tracing::info!(
            "Evaluation on {} customers: spearman {:?}, normalized gini {:?}",
            report.total_pairs - report.excluded_pairs,
            report.spearman_correlation,
            report.gini_normalized
        );

        self.ensure_table(
            &options.table_evaluation_stats,
            &EvaluationReport::table_schema(),
        )
        .await?;
        let time_run = chrono::Utc::now().to_rfc3339();
        let rows = report.to_rows(self.state.model_id.as_deref().unwrap_or(""), &time_run);
        self.warehouse()
            .insert_rows(&self.config.dataset_id, &options.table_evaluation_stats, &rows)
            .await?;
        tracing::info!(
            "Appended {} rows to {}",
            rows.len(),
            self.table_ref(&options.table_evaluation_stats)
        );

        Ok(report)
    }

    // ========== Helpers ==========

    /// Create `table_name` unless it already exists
    async fn ensure_table(&self, table_name: &str, schema: &TableSchema) -> Result<()> {
        match self
            .warehouse()
            .get_schema(&self.config.dataset_id, table_name)
            .await
        {
            Ok(_) => Ok(()),
            Err(RuntimeError::Service { status: 404, .. }) => {
                tracing::info!("Creating table {}", self.table_ref(table_name));
                self.warehouse()
                    .create_table(&self.config.dataset_id, table_name, schema, false)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Explicit model id, else the one recorded in the run state
    fn resolve_model_id(&self, model_id: Option<&str>) -> Result<String> {
        model_id
            .filter(|id| !id.is_empty())
            .or(self.state.model_id.as_deref())
            .map(str::to_string)
            .ok_or(SdkError::MissingModel)
    }

    /// Explicit endpoint id, else the one recorded in the run state
    fn resolve_endpoint_id(&self, endpoint_id: Option<&str>) -> Result<String> {
        endpoint_id
            .filter(|id| !id.is_empty())
            .or(self.state.endpoint_id.as_deref())
            .map(str::to_string)
            .ok_or(SdkError::MissingEndpoint)
    }
}

/// Columns of the training table the model learns from
fn model_feature_columns(schema: &TableSchema, excluded: &[&str]) -> Vec<String> {
    schema
        .column_names()
        .into_iter()
        .filter(|name| !excluded.contains(name))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crystalvalue_core::{Column, ColumnType};

    #[test]
    fn test_model_feature_columns_skip_keys_and_label() {
        let schema = TableSchema::new(vec![
            Column::new("customer_id", ColumnType::String),
            Column::new("window_date", ColumnType::Date),
            Column::new("sum_value", ColumnType::Float),
            Column::new("most_frequent_product_type", ColumnType::String),
            Column::new("future_value", ColumnType::Float),
            Column::new("predefined_split_column", ColumnType::String),
        ]);

        let columns = model_feature_columns(
            &schema,
            &[
                "customer_id",
                WINDOW_DATE_COLUMN,
                "future_value",
                "predefined_split_column",
            ],
        );
        assert_eq!(columns, vec!["sum_value", "most_frequent_product_type"]);
    }
}
