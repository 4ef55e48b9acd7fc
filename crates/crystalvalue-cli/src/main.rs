//! CrystalValue command line runner
//!
//! Runs single pipeline stages or the whole LTV workflow against BigQuery
//! and Vertex AI.

mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crystalvalue_sdk::{
    BatchPredictOptions, DataCheckOptions, DeployOptions, EvaluateOptions, Pipeline,
    PipelineBuilder, QueryType, SyntheticDataConfig, TrainOptions,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crystalvalue")]
#[command(about = "Customer lifetime value modeling on BigQuery and Vertex AI", version)]
struct Cli {
    /// Pipeline config file (default: config/crystalvalue.{yaml,toml} if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic transactions and load them into the warehouse
    SyntheticData {
        /// Destination table
        #[arg(short, long, default_value = "synthetic_data")]
        table: String,

        /// Number of transactions
        #[arg(short, long, default_value = "100000")]
        rows: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Check a transaction table before feature engineering
    CheckData {
        /// Transaction table
        #[arg(short, long)]
        table: String,

        /// Table the summary statistics are written to
        #[arg(long, default_value = "crystalvalue_data_statistics")]
        summary_table: String,
    },

    /// Build and run the train or predict feature query
    FeatureEngineer {
        /// Transaction table
        #[arg(short, long)]
        table: String,

        /// train_query or predict_query
        #[arg(short, long, default_value = "train_query")]
        query_type: String,

        /// Also write the generated SQL to this file
        #[arg(short, long)]
        write_query: Option<PathBuf>,
    },

    /// Run a query into a destination table
    RunQuery {
        /// Destination table
        #[arg(short, long)]
        destination: String,

        /// SQL text
        #[arg(long, conflicts_with = "file")]
        sql: Option<String>,

        /// File holding the SQL text
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Train an AutoML model on the training table
    Train {
        /// minimize-rmse, minimize-mae or minimize-rmsle
        #[arg(long, default_value = "minimize-rmse")]
        objective: String,

        /// Training budget in milli node hours
        #[arg(long, default_value = "1000")]
        budget: u64,

        /// Display name of the model
        #[arg(long, default_value = "crystalvalue_model")]
        model_name: String,
    },

    /// Deploy a model to a new endpoint
    Deploy {
        /// Model resource name (default: model_id from the config)
        #[arg(short, long)]
        model_id: Option<String>,

        #[arg(long, default_value = "n1-standard-2")]
        machine_type: String,
    },

    /// Score a feature table with a batch prediction job
    BatchPredict {
        /// Table with one feature row per customer
        #[arg(short, long)]
        input_table: String,

        /// Model resource name (default: model_id from the config)
        #[arg(short, long)]
        model_id: Option<String>,

        /// Table the predictions are appended to
        #[arg(short, long, default_value = "crystalvalue_predictions")]
        destination: String,
    },

    /// Evaluate a deployed model on the TEST split of the training table
    Evaluate {
        /// Endpoint id (default: endpoint_id from the config)
        #[arg(short, long)]
        endpoint_id: Option<String>,

        /// Number of bins customers are ranked into
        #[arg(short, long, default_value = "10")]
        bins: usize,
    },

    /// Run every stage: checks, features, train, deploy, evaluate, predict
    RunAll {
        /// Transaction table
        #[arg(short, long)]
        table: String,

        /// Generate synthetic transactions into the table first
        #[arg(long)]
        synthetic: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing()?;

    let cli = Cli::parse();

    // Load configuration
    let config = config::load(cli.config.as_deref())?;
    info!("Loaded configuration: {:?}", config);

    let mut pipeline = PipelineBuilder::new(config).build()?;

    match cli.command {
        Commands::SyntheticData { table, rows, seed } => {
            let synthetic = SyntheticDataConfig {
                row_count: rows,
                seed,
                ..SyntheticDataConfig::default()
            };
            let rows = pipeline.create_synthetic_data(&table, synthetic).await?;
            info!("✓ Loaded {} transactions into {}", rows.len(), table);
        }
        Commands::CheckData {
            table,
            summary_table,
        } => {
            let options = DataCheckOptions {
                summary_table_name: summary_table,
                ..DataCheckOptions::default()
            };
            let summary = pipeline.run_data_checks(&table, &options).await?;
            print_json(&summary)?;
        }
        Commands::FeatureEngineer {
            table,
            query_type,
            write_query,
        } => {
            let query_type: QueryType = query_type.parse()?;
            let result = pipeline
                .feature_engineer(&table, query_type, write_query.as_deref())
                .await?;
            info!("✓ {} produced {} rows", query_type, result.len());
        }
        Commands::RunQuery {
            destination,
            sql,
            file,
        } => {
            let result = pipeline
                .run_query(&destination, sql.as_deref(), file.as_deref())
                .await?;
            info!("✓ Wrote {} rows to {}", result.len(), destination);
        }
        Commands::Train {
            objective,
            budget,
            model_name,
        } => {
            let options = TrainOptions {
                optimization_objective: objective,
                budget_milli_node_hours: budget,
                model_display_name: model_name,
                ..TrainOptions::default()
            };
            let model = pipeline.train(&options).await?;
            println!("{}", model);
        }
        Commands::Deploy {
            model_id,
            machine_type,
        } => {
            let options = DeployOptions {
                machine_type,
                ..DeployOptions::default()
            };
            let deployed = pipeline.deploy_model(model_id.as_deref(), &options).await?;
            println!("{}", deployed.endpoint_id());
        }
        Commands::BatchPredict {
            input_table,
            model_id,
            destination,
        } => {
            let options = BatchPredictOptions {
                destination_table: destination,
                ..BatchPredictOptions::default()
            };
            pipeline
                .batch_predict(&input_table, model_id.as_deref(), &options)
                .await?;
            info!("✓ Predictions appended to {}", options.destination_table);
        }
        Commands::Evaluate { endpoint_id, bins } => {
            let options = EvaluateOptions {
                number_bins: bins,
                ..EvaluateOptions::default()
            };
            let report = pipeline
                .evaluate_model(endpoint_id.as_deref(), &options)
                .await?;
            print_json(&report)?;
        }
        Commands::RunAll { table, synthetic } => {
            run_all(&mut pipeline, &table, synthetic).await?;
        }
    }

    Ok(())
}

/// Every stage in order, each using the ids recorded by the previous ones
async fn run_all(pipeline: &mut Pipeline, table: &str, synthetic: bool) -> Result<()> {
    if synthetic {
        pipeline
            .create_synthetic_data(table, SyntheticDataConfig::default())
            .await?;
    }

    pipeline
        .run_data_checks(table, &DataCheckOptions::default())
        .await?;
    pipeline
        .feature_engineer(table, QueryType::Train, None)
        .await?;

    let model = pipeline.train(&TrainOptions::default()).await?;
    info!("✓ Model: {}", model);

    let deployed = pipeline
        .deploy_model(None, &DeployOptions::default())
        .await?;
    info!("✓ Endpoint: {}", deployed.endpoint);

    let report = pipeline
        .evaluate_model(None, &EvaluateOptions::default())
        .await?;
    print_json(&report)?;

    pipeline
        .feature_engineer(table, QueryType::Predict, None)
        .await?;
    let predict_table = pipeline.config().predict_table_name.clone();
    let options = BatchPredictOptions::default();
    pipeline
        .batch_predict(&predict_table, None, &options)
        .await?;
    info!("✓ Predictions appended to {}", options.destination_table);

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "crystalvalue_cli=info,crystalvalue_sdk=info,crystalvalue_runtime=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_feature_engineer() {
        let cli = Cli::parse_from([
            "crystalvalue",
            "--config",
            "ltv.yaml",
            "feature-engineer",
            "--table",
            "transactions",
            "--query-type",
            "predict_query",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("ltv.yaml")));
        match cli.command {
            Commands::FeatureEngineer {
                table, query_type, ..
            } => {
                assert_eq!(table, "transactions");
                assert_eq!(query_type.parse::<QueryType>().unwrap(), QueryType::Predict);
            }
            _ => panic!("expected feature-engineer"),
        }
    }

    #[test]
    fn test_run_query_sources_conflict() {
        let result = Cli::try_parse_from([
            "crystalvalue",
            "run-query",
            "--destination",
            "customers",
            "--sql",
            "SELECT 1",
            "--file",
            "query.sql",
        ]);
        assert!(result.is_err());
    }
}
