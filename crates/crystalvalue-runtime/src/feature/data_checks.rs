//! Transaction table checks
//!
//! Verifies the key columns before feature engineering and materializes a
//! one-row summary of the table (row and customer counts, date range, value
//! statistics) for review.

use super::query_builder::TransactionColumns;
use crate::error::{Result, RuntimeError};
use crate::warehouse::{QueryExecutor, QuerySource, TableRef, WriteDisposition};
use crystalvalue_core::types::validate_identifier;
use crystalvalue_core::{Row, TableSchema, Value};
use serde::{Deserialize, Serialize};

/// Below this many customers models tend to be unreliable
const MIN_RECOMMENDED_CUSTOMERS: u64 = 1000;

/// Summary statistics of a transaction table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub number_rows: u64,
    pub number_customers: u64,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub days_of_data: i64,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub avg_value: Option<f64>,
    pub sum_value: Option<f64>,
    pub share_negative_values: Option<f64>,
    pub number_null_values: u64,
    pub transactions_per_customer: Option<f64>,
}

impl DataSummary {
    /// Parse the single row returned by the summary query
    pub fn from_row(row: &Row) -> Result<Self> {
        let count = |name: &str| -> Result<u64> {
            row.get(name)
                .and_then(Value::as_f64)
                .map(|v| v.max(0.0) as u64)
                .ok_or_else(|| {
                    RuntimeError::UnexpectedResponse(format!("summary is missing {}", name))
                })
        };
        let number = |name: &str| row.get(name).and_then(Value::as_f64);
        let text = |name: &str| row.get(name).and_then(Value::as_text);

        Ok(Self {
            number_rows: count("number_rows")?,
            number_customers: count("number_customers")?,
            first_date: text("first_date"),
            last_date: text("last_date"),
            days_of_data: number("days_of_data").map(|d| d as i64).unwrap_or(0),
            min_value: number("min_value"),
            max_value: number("max_value"),
            avg_value: number("avg_value"),
            sum_value: number("sum_value"),
            share_negative_values: number("share_negative_values"),
            number_null_values: number("number_null_values").map(|n| n as u64).unwrap_or(0),
            transactions_per_customer: number("transactions_per_customer"),
        })
    }
}

/// Checks a transaction table against the windowing configuration
#[derive(Debug, Clone)]
pub struct DataChecks {
    source: TableRef,
    columns: TransactionColumns,
    days_lookback: u32,
    days_lookahead: u32,
    round_decimal_places: u32,
}

impl DataChecks {
    pub fn new(source: TableRef, columns: TransactionColumns) -> Self {
        Self {
            source,
            columns,
            days_lookback: 365,
            days_lookahead: 365,
            round_decimal_places: 2,
        }
    }

    pub fn with_days(mut self, days_lookback: u32, days_lookahead: u32) -> Self {
        self.days_lookback = days_lookback;
        self.days_lookahead = days_lookahead;
        self
    }

    /// Decimal places the summary statistics are rounded to
    pub fn with_round_decimal_places(mut self, places: u32) -> Self {
        self.round_decimal_places = places;
        self
    }

    /// Check the schema, compute the summary into `summary_table_name` and
    /// judge whether there is enough history.
    pub async fn run(
        &self,
        executor: &QueryExecutor,
        summary_table_name: &str,
    ) -> Result<DataSummary> {
        let schema = executor
            .warehouse()
            .get_schema(&self.source.dataset_id, &self.source.table_id)
            .await?;
        self.check_schema(&schema)?;

        let source = QuerySource::Sql(self.summary_query()?);
        let result = executor
            .run_source(&source, summary_table_name, WriteDisposition::Truncate)
            .await?;
        let row = result.rows.first().ok_or_else(|| {
            RuntimeError::UnexpectedResponse("summary query returned no rows".to_string())
        })?;
        let summary = DataSummary::from_row(row)?;

        tracing::info!(
            "Data summary for {}: {} rows, {} customers, {} days ({} to {})",
            self.source,
            summary.number_rows,
            summary.number_customers,
            summary.days_of_data,
            summary.first_date.as_deref().unwrap_or("-"),
            summary.last_date.as_deref().unwrap_or("-"),
        );

        self.evaluate(&summary)?;
        Ok(summary)
    }

    /// Required columns exist, the value column is numeric and the date
    /// column holds dates or timestamps
    pub fn check_schema(&self, schema: &TableSchema) -> Result<()> {
        let required = [
            self.columns.customer_id.as_str(),
            self.columns.date.as_str(),
            self.columns.value.as_str(),
        ];
        let missing = schema.missing_columns(required);
        if !missing.is_empty() {
            return Err(RuntimeError::MissingColumns {
                table: self.source.to_string(),
                columns: missing,
            });
        }

        if let Some(column) = schema.get_column(&self.columns.value) {
            if !column.column_type.is_numeric() {
                return Err(RuntimeError::InvalidInput(format!(
                    "value column {} has type {}, expected a numeric type",
                    column.name, column.column_type
                )));
            }
        }
        if let Some(column) = schema.get_column(&self.columns.date) {
            if !column.column_type.is_date_like() {
                return Err(RuntimeError::InvalidInput(format!(
                    "date column {} has type {}, expected DATE, DATETIME or TIMESTAMP",
                    column.name, column.column_type
                )));
            }
        }
        Ok(())
    }

    /// SQL computing the one-row table summary
    pub fn summary_query(&self) -> Result<String> {
        validate_identifier(&self.columns.customer_id)?;
        validate_identifier(&self.columns.date)?;
        validate_identifier(&self.columns.value)?;

        Ok(format!(
            "SELECT
  COUNT(*) AS number_rows,
  COUNT(DISTINCT `{customer}`) AS number_customers,
  CAST(MIN(DATE(`{date}`)) AS STRING) AS first_date,
  CAST(MAX(DATE(`{date}`)) AS STRING) AS last_date,
  DATE_DIFF(MAX(DATE(`{date}`)), MIN(DATE(`{date}`)), DAY) AS days_of_data,
  ROUND(MIN(`{value}`), {places}) AS min_value,
  ROUND(MAX(`{value}`), {places}) AS max_value,
  ROUND(AVG(`{value}`), {places}) AS avg_value,
  ROUND(SUM(`{value}`), {places}) AS sum_value,
  ROUND(SAFE_DIVIDE(COUNTIF(`{value}` < 0), COUNT(*)), {places}) AS share_negative_values,
  COUNTIF(`{value}` IS NULL) AS number_null_values,
  ROUND(SAFE_DIVIDE(COUNT(*), COUNT(DISTINCT `{customer}`)), {places}) AS transactions_per_customer
FROM {source}
",
            customer = self.columns.customer_id,
            date = self.columns.date,
            value = self.columns.value,
            source = self.source.sql(),
            places = self.round_decimal_places,
        ))
    }

    /// Fail when the table cannot produce a single training window; warn on
    /// conditions that usually hurt model quality.
    pub fn evaluate(&self, summary: &DataSummary) -> Result<()> {
        if summary.number_rows == 0 {
            return Err(RuntimeError::InsufficientData(format!(
                "table {} has no transactions",
                self.source
            )));
        }

        let required_days = i64::from(self.days_lookback) + i64::from(self.days_lookahead);
        if summary.days_of_data < required_days {
            return Err(RuntimeError::InsufficientData(format!(
                "table {} spans {} days but days_lookback + days_lookahead = {}",
                self.source, summary.days_of_data, required_days
            )));
        }

        if summary.number_customers < MIN_RECOMMENDED_CUSTOMERS {
            tracing::warn!(
                "Only {} customers in {}; at least {} are recommended",
                summary.number_customers,
                self.source,
                MIN_RECOMMENDED_CUSTOMERS
            );
        }
        if summary.share_negative_values.unwrap_or(0.0) > 0.0 {
            tracing::warn!(
                "{} of the values in {} are negative (e.g. refunds)",
                summary.share_negative_values.unwrap_or(0.0),
                self.source
            );
        }
        if summary.number_null_values > 0 {
            tracing::warn!(
                "{} transactions in {} have no value",
                summary.number_null_values,
                self.source
            );
        }
        Ok(())
    }
}
