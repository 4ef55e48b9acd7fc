//! Feature engineering SQL generation
//!
//! Builds BigQuery Standard SQL that aggregates transactions into one row
//! per customer and reference date ("window date"):
//!
//! - features cover the `days_lookback` days up to and including the window date
//! - for training, `future_value` sums the value column over the
//!   `days_lookahead` days after the window date
//!
//! Customers only appear for a window when they have at least one
//! transaction inside its lookback period.

use crate::error::{Result, RuntimeError};
use crate::warehouse::TableRef;
use crystalvalue_core::types::validate_identifier;
use crystalvalue_core::{ColumnType, FeatureType, FeatureTypes, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::path::Path;
use std::str::FromStr;

/// Label column produced by the training query
pub const TARGET_COLUMN: &str = "future_value";

/// Column holding TRAIN / VALIDATE / TEST assignments
pub const SPLIT_COLUMN: &str = "predefined_split_column";

/// Reference date of each feature row
pub const WINDOW_DATE_COLUMN: &str = "window_date";

const TRANSACTION_DATE_ALIAS: &str = "cv_transaction_date";
const LABEL_VALUE_ALIAS: &str = "cv_label_value";

/// Share of customers (in percent) assigned to the test split
const TEST_PERCENT: u32 = 15;
/// Share of customers (in percent) assigned to the validation split
const VALIDATE_PERCENT: u32 = 15;

/// Kind of feature query to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    /// Features plus `future_value` label and split column
    #[serde(rename = "train_query")]
    Train,
    /// Features only, as of the latest transaction date
    #[serde(rename = "predict_query")]
    Predict,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Train => "train_query",
            QueryType::Predict => "predict_query",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train_query" | "train" => Ok(QueryType::Train),
            "predict_query" | "predict" => Ok(QueryType::Predict),
            other => Err(RuntimeError::InvalidConfig(format!(
                "unknown query type {:?} (expected train_query or predict_query)",
                other
            ))),
        }
    }
}

/// Names of the key columns of a transaction table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionColumns {
    #[serde(default = "default_customer_id_column")]
    pub customer_id: String,

    #[serde(default = "default_date_column")]
    pub date: String,

    #[serde(default = "default_value_column")]
    pub value: String,
}

impl Default for TransactionColumns {
    fn default() -> Self {
        Self {
            customer_id: default_customer_id_column(),
            date: default_date_column(),
            value: default_value_column(),
        }
    }
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

/// Generates train and predict feature queries for one transaction table
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    source: TableRef,
    columns: TransactionColumns,
    days_lookback: u32,
    days_lookahead: u32,
    window_step_days: Option<u32>,
}

impl QueryBuilder {
    pub fn new(source: TableRef, columns: TransactionColumns) -> Self {
        Self {
            source,
            columns,
            days_lookback: 365,
            days_lookahead: 365,
            window_step_days: None,
        }
    }

    pub fn with_days_lookback(mut self, days: u32) -> Self {
        self.days_lookback = days;
        self
    }

    pub fn with_days_lookahead(mut self, days: u32) -> Self {
        self.days_lookahead = days;
        self
    }

    /// Generate a reference date every `days` days instead of a single one
    pub fn with_window_step_days(mut self, days: Option<u32>) -> Self {
        self.window_step_days = days;
        self
    }

    /// Build the query and optionally write it to `write_executed_query_file`
    /// for review.
    pub async fn build_and_write(
        &self,
        query_type: QueryType,
        schema: &TableSchema,
        features: &FeatureTypes,
        write_executed_query_file: Option<&Path>,
    ) -> Result<String> {
        let sql = self.build(query_type, schema, features)?;
        if let Some(path) = write_executed_query_file {
            tokio::fs::write(path, &sql).await?;
            tracing::info!("Wrote {} to {}", query_type, path.display());
        }
        Ok(sql)
    }

    /// Build the SQL text for `query_type`
    pub fn build(
        &self,
        query_type: QueryType,
        schema: &TableSchema,
        features: &FeatureTypes,
    ) -> Result<String> {
        self.validate(query_type, schema, features)?;

        let mut sql = String::new();
        let _ = writeln!(sql, "-- CrystalValue {}", query_type);
        let _ = writeln!(sql, "-- Source: {}", self.source.sql());
        let _ = writeln!(
            sql,
            "-- Lookback: {} days, lookahead: {} days",
            self.days_lookback, self.days_lookahead
        );
        sql.push_str("WITH\n");
        sql.push_str(&self.transactions_cte(schema, features)?);
        sql.push_str(",\n");
        match query_type {
            QueryType::Train => {
                sql.push_str(&self.train_windows_cte());
            }
            QueryType::Predict => {
                sql.push_str(&format!(
                    "  DateWindows AS (\n    SELECT MAX({date}) AS {window}\n    FROM Transactions\n  )",
                    date = TRANSACTION_DATE_ALIAS,
                    window = WINDOW_DATE_COLUMN,
                ));
            }
        }
        sql.push_str(",\n");
        sql.push_str(&self.lookback_cte());
        sql.push_str(",\n");
        sql.push_str(&self.features_cte(features));

        match query_type {
            QueryType::Train => {
                sql.push_str(",\n");
                sql.push_str(&self.labels_cte());
                sql.push('\n');
                sql.push_str(&self.train_select());
            }
            QueryType::Predict => {
                sql.push_str("\nSELECT *\nFROM Features\n");
            }
        }

        Ok(sql)
    }

    fn validate(
        &self,
        query_type: QueryType,
        schema: &TableSchema,
        features: &FeatureTypes,
    ) -> Result<()> {
        validate_identifier(&self.columns.customer_id)?;
        validate_identifier(&self.columns.date)?;
        validate_identifier(&self.columns.value)?;
        features.validate()?;

        if self.days_lookback == 0 {
            return Err(RuntimeError::InvalidConfig(
                "days_lookback must be at least 1".to_string(),
            ));
        }
        if query_type == QueryType::Train && self.days_lookahead == 0 {
            return Err(RuntimeError::InvalidConfig(
                "days_lookahead must be at least 1".to_string(),
            ));
        }
        if self.window_step_days == Some(0) {
            return Err(RuntimeError::InvalidConfig(
                "window_step_days must be at least 1".to_string(),
            ));
        }

        let reserved = [
            self.columns.customer_id.as_str(),
            self.columns.date.as_str(),
            TRANSACTION_DATE_ALIAS,
            LABEL_VALUE_ALIAS,
            WINDOW_DATE_COLUMN,
        ];
        for column in features.all_columns() {
            validate_identifier(column)?;
            if reserved.contains(&column) {
                return Err(RuntimeError::InvalidConfig(format!(
                    "column {} cannot be used as a feature",
                    column
                )));
            }
        }

        let required = [
            self.columns.customer_id.as_str(),
            self.columns.date.as_str(),
            self.columns.value.as_str(),
        ];
        let missing = schema.missing_columns(required.into_iter().chain(features.all_columns()));
        if !missing.is_empty() {
            return Err(RuntimeError::MissingColumns {
                table: self.source.to_string(),
                columns: missing,
            });
        }

        let value_type = schema
            .get_column(&self.columns.value)
            .map(|c| c.column_type);
        if !value_type.map(|t| t.is_numeric()).unwrap_or(false) {
            return Err(RuntimeError::InvalidConfig(format!(
                "value column {} must be numeric",
                self.columns.value
            )));
        }

        Ok(())
    }

    fn transactions_cte(&self, schema: &TableSchema, features: &FeatureTypes) -> Result<String> {
        let mut select = vec![
            format!(
                "CAST(`{0}` AS STRING) AS `{0}`",
                self.columns.customer_id
            ),
            format!("DATE(`{}`) AS {}", self.columns.date, TRANSACTION_DATE_ALIAS),
            format!(
                "CAST(`{}` AS FLOAT64) AS {}",
                self.columns.value, LABEL_VALUE_ALIAS
            ),
        ];

        for (feature_type, column) in features.iter() {
            let column_type = schema
                .get_column(column)
                .map(|c| c.column_type)
                .ok_or_else(|| RuntimeError::MissingColumns {
                    table: self.source.to_string(),
                    columns: vec![column.to_string()],
                })?;
            let expr = input_expression(feature_type, column, column_type)?;
            select.push(format!("{} AS `{}`", expr, column));
        }

        Ok(format!(
            "  Transactions AS (\n    SELECT\n      {}\n    FROM {}\n    WHERE `{}` IS NOT NULL AND `{}` IS NOT NULL\n  )",
            select.join(",\n      "),
            self.source.sql(),
            self.columns.customer_id,
            self.columns.date
        ))
    }

    fn train_windows_cte(&self) -> String {
        let bounds = format!(
            "  Bounds AS (\n    SELECT\n      DATE_SUB(MAX({date}), INTERVAL {ahead} DAY) AS latest_window,\n      DATE_ADD(MIN({date}), INTERVAL {back} DAY) AS earliest_window\n    FROM Transactions\n  ),\n",
            date = TRANSACTION_DATE_ALIAS,
            ahead = self.days_lookahead,
            back = self.days_lookback,
        );

        let windows = match self.window_step_days {
            None => format!(
                "  DateWindows AS (\n    SELECT latest_window AS {window}\n    FROM Bounds\n    WHERE latest_window >= earliest_window\n  )",
                window = WINDOW_DATE_COLUMN,
            ),
            Some(step) => format!(
                "  DateWindows AS (\n    SELECT {window}\n    FROM Bounds,\n      UNNEST(GENERATE_DATE_ARRAY(latest_window, earliest_window, INTERVAL -{step} DAY)) AS {window}\n  )",
                window = WINDOW_DATE_COLUMN,
                step = step,
            ),
        };

        bounds + &windows
    }

    fn lookback_cte(&self) -> String {
        format!(
            "  LookbackTransactions AS (\n    SELECT w.{window}, t.*\n    FROM DateWindows AS w\n    INNER JOIN Transactions AS t\n      ON t.{date} > DATE_SUB(w.{window}, INTERVAL {back} DAY)\n      AND t.{date} <= w.{window}\n  )",
            window = WINDOW_DATE_COLUMN,
            date = TRANSACTION_DATE_ALIAS,
            back = self.days_lookback,
        )
    }

    fn features_cte(&self, features: &FeatureTypes) -> String {
        let mut select = vec![
            format!("`{}`", self.columns.customer_id),
            WINDOW_DATE_COLUMN.to_string(),
            "COUNT(*) AS number_transactions".to_string(),
            format!(
                "DATE_DIFF({window}, MIN({date}), DAY) AS days_since_first_transaction",
                window = WINDOW_DATE_COLUMN,
                date = TRANSACTION_DATE_ALIAS
            ),
            format!(
                "DATE_DIFF({window}, MAX({date}), DAY) AS days_since_last_transaction",
                window = WINDOW_DATE_COLUMN,
                date = TRANSACTION_DATE_ALIAS
            ),
        ];

        for (feature_type, column) in features.iter() {
            select.extend(aggregations(feature_type, column));
        }

        format!(
            "  Features AS (\n    SELECT\n      {}\n    FROM LookbackTransactions\n    GROUP BY `{}`, {}\n  )",
            select.join(",\n      "),
            self.columns.customer_id,
            WINDOW_DATE_COLUMN
        )
    }

    fn labels_cte(&self) -> String {
        format!(
            "  Labels AS (\n    SELECT\n      t.`{customer}`,\n      w.{window},\n      SUM(t.{label}) AS {target}\n    FROM DateWindows AS w\n    INNER JOIN Transactions AS t\n      ON t.{date} > w.{window}\n      AND t.{date} <= DATE_ADD(w.{window}, INTERVAL {ahead} DAY)\n    GROUP BY t.`{customer}`, w.{window}\n  )",
            customer = self.columns.customer_id,
            window = WINDOW_DATE_COLUMN,
            label = LABEL_VALUE_ALIAS,
            target = TARGET_COLUMN,
            date = TRANSACTION_DATE_ALIAS,
            ahead = self.days_lookahead,
        )
    }

    fn train_select(&self) -> String {
        let bucket = format!(
            "MOD(ABS(FARM_FINGERPRINT(f.`{}`)), 100)",
            self.columns.customer_id
        );
        format!(
            "SELECT\n  f.*,\n  IFNULL(l.{target}, 0) AS {target},\n  CASE\n    WHEN {bucket} < {test} THEN 'TEST'\n    WHEN {bucket} < {validate} THEN 'VALIDATE'\n    ELSE 'TRAIN'\n  END AS {split}\nFROM Features AS f\nLEFT JOIN Labels AS l\n  ON f.`{customer}` = l.`{customer}`\n  AND f.{window} = l.{window}\n",
            target = TARGET_COLUMN,
            bucket = bucket,
            test = TEST_PERCENT,
            validate = TEST_PERCENT + VALIDATE_PERCENT,
            split = SPLIT_COLUMN,
            customer = self.columns.customer_id,
            window = WINDOW_DATE_COLUMN,
        )
    }
}

/// Normalize a raw column into the representation its feature type aggregates over
fn input_expression(feature_type: FeatureType, column: &str, column_type: ColumnType) -> Result<String> {
    let expr = match feature_type {
        FeatureType::Numeric => match column_type {
            ColumnType::Boolean => format!("CAST(`{}` AS INT64)", column),
            t if t.is_numeric() => format!("CAST(`{}` AS FLOAT64)", column),
            ColumnType::String => format!("SAFE_CAST(`{}` AS FLOAT64)", column),
            other => return Err(incompatible(column, other, feature_type)),
        },
        FeatureType::Boolean => match column_type {
            ColumnType::Boolean => format!("`{}`", column),
            t if t.is_numeric() => format!("(`{}` != 0)", column),
            ColumnType::String => format!(
                "LOWER(TRIM(`{}`)) IN ('true', 't', 'yes', 'y', '1')",
                column
            ),
            other => return Err(incompatible(column, other, feature_type)),
        },
        FeatureType::StringOrCategorical => match column_type {
            ColumnType::String => format!("`{}`", column),
            ColumnType::Geography => format!("ST_ASTEXT(`{}`)", column),
            ColumnType::Json => format!("TO_JSON_STRING(`{}`)", column),
            ColumnType::Bytes => format!("TO_BASE64(`{}`)", column),
            ColumnType::Record => return Err(incompatible(column, column_type, feature_type)),
            _ => format!("CAST(`{}` AS STRING)", column),
        },
    };
    Ok(expr)
}

fn incompatible(column: &str, column_type: ColumnType, feature_type: FeatureType) -> RuntimeError {
    RuntimeError::InvalidConfig(format!(
        "column {} of type {} cannot be used as a {} feature",
        column, column_type, feature_type
    ))
}

/// Aggregate expressions emitted for one feature column
fn aggregations(feature_type: FeatureType, column: &str) -> Vec<String> {
    match feature_type {
        FeatureType::Numeric => vec![
            format!("SUM(`{0}`) AS `sum_{0}`", column),
            format!("AVG(`{0}`) AS `avg_{0}`", column),
            format!("MIN(`{0}`) AS `min_{0}`", column),
            format!("MAX(`{0}`) AS `max_{0}`", column),
        ],
        FeatureType::Boolean => vec![
            format!("LOGICAL_OR(`{0}`) AS `any_{0}`", column),
            format!("AVG(IF(`{0}`, 1, 0)) AS `share_{0}`", column),
        ],
        FeatureType::StringOrCategorical => vec![
            format!(
                "APPROX_TOP_COUNT(`{0}`, 1)[SAFE_OFFSET(0)].value AS `most_frequent_{0}`",
                column
            ),
            format!("COUNT(DISTINCT `{0}`) AS `count_distinct_{0}`", column),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crystalvalue_core::Column;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            Column::new("customer_id", ColumnType::String),
            Column::new("date", ColumnType::Date),
            Column::new("value", ColumnType::Float),
            Column::new("number_products", ColumnType::Integer),
            Column::new("is_registered", ColumnType::Boolean),
            Column::new("newsletter", ColumnType::String),
            Column::new("product_type", ColumnType::String),
        ])
    }

    fn features() -> FeatureTypes {
        FeatureTypes::new()
            .with(FeatureType::Numeric, "value")
            .with(FeatureType::Numeric, "number_products")
            .with(FeatureType::Boolean, "is_registered")
            .with(FeatureType::Boolean, "newsletter")
            .with(FeatureType::StringOrCategorical, "product_type")
    }

    fn builder() -> QueryBuilder {
        QueryBuilder::new(
            TableRef::new("proj", "ltv", "transactions"),
            TransactionColumns::default(),
        )
        .with_days_lookback(90)
        .with_days_lookahead(30)
    }

    #[test]
    fn test_query_type_parsing() {
        assert_eq!("train_query".parse::<QueryType>().unwrap(), QueryType::Train);
        assert_eq!("predict".parse::<QueryType>().unwrap(), QueryType::Predict);
        assert!("score_query".parse::<QueryType>().is_err());
        assert_eq!(QueryType::Predict.to_string(), "predict_query");
    }

    #[test]
    fn test_train_query_windows_and_label() {
        let sql = builder().build(QueryType::Train, &schema(), &features()).unwrap();

        assert!(sql.contains("FROM `proj.ltv.transactions`"));
        assert!(sql.contains("DATE_SUB(MAX(cv_transaction_date), INTERVAL 30 DAY) AS latest_window"));
        assert!(sql.contains("DATE_ADD(MIN(cv_transaction_date), INTERVAL 90 DAY) AS earliest_window"));
        assert!(sql.contains("WHERE latest_window >= earliest_window"));
        assert!(sql.contains("t.cv_transaction_date > DATE_SUB(w.window_date, INTERVAL 90 DAY)"));
        assert!(sql.contains("t.cv_transaction_date <= DATE_ADD(w.window_date, INTERVAL 30 DAY)"));
        assert!(sql.contains("SUM(t.cv_label_value) AS future_value"));
        assert!(sql.contains("IFNULL(l.future_value, 0) AS future_value"));
        assert!(sql.contains("END AS predefined_split_column"));
        assert!(sql.contains("< 15 THEN 'TEST'"));
        assert!(sql.contains("< 30 THEN 'VALIDATE'"));
    }

    #[test]
    fn test_customers_without_lookback_transactions_are_excluded() {
        let sql = builder().build(QueryType::Train, &schema(), &features()).unwrap();

        // Features only come from transactions joined inside the lookback window,
        // and label rows only attach to existing feature rows.
        let lookback = sql
            .split("LookbackTransactions AS (")
            .nth(1)
            .and_then(|rest| rest.split("\n  ),").next())
            .unwrap();
        assert!(lookback.contains("INNER JOIN Transactions AS t"));
        assert!(lookback.contains("AND t.cv_transaction_date <= w.window_date"));
        assert!(sql.contains("FROM LookbackTransactions\n    GROUP BY `customer_id`, window_date"));
        assert!(sql.contains("FROM Features AS f\nLEFT JOIN Labels AS l"));
        assert!(!sql.contains("RIGHT JOIN"));
        assert!(!sql.contains("FULL OUTER JOIN"));
    }

    #[test]
    fn test_feature_aggregations_per_type() {
        let sql = builder().build(QueryType::Train, &schema(), &features()).unwrap();

        for agg in ["sum", "avg", "min", "max"] {
            assert!(sql.contains(&format!("AS `{}_number_products`", agg)));
            assert!(sql.contains(&format!("AS `{}_value`", agg)));
        }
        assert!(sql.contains("LOGICAL_OR(`is_registered`) AS `any_is_registered`"));
        assert!(sql.contains("AVG(IF(`newsletter`, 1, 0)) AS `share_newsletter`"));
        assert!(sql.contains("LOWER(TRIM(`newsletter`)) IN ('true', 't', 'yes', 'y', '1') AS `newsletter`"));
        assert!(sql.contains("APPROX_TOP_COUNT(`product_type`, 1)[SAFE_OFFSET(0)].value AS `most_frequent_product_type`"));
        assert!(sql.contains("COUNT(DISTINCT `product_type`) AS `count_distinct_product_type`"));
        assert!(sql.contains("COUNT(*) AS number_transactions"));
        assert!(sql.contains("AS days_since_first_transaction"));
        assert!(sql.contains("AS days_since_last_transaction"));
    }

    #[test]
    fn test_predict_query_has_no_label() {
        let sql = builder().build(QueryType::Predict, &schema(), &features()).unwrap();

        assert!(sql.contains("SELECT MAX(cv_transaction_date) AS window_date"));
        assert!(sql.contains("INNER JOIN Transactions AS t"));
        assert!(!sql.contains("future_value"));
        assert!(!sql.contains("predefined_split_column"));
        assert!(!sql.contains("Labels"));
        assert!(sql.trim_end().ends_with("FROM Features"));
    }

    #[test]
    fn test_window_step_generates_date_array() {
        let sql = builder()
            .with_window_step_days(Some(7))
            .build(QueryType::Train, &schema(), &features())
            .unwrap();
        assert!(sql.contains(
            "UNNEST(GENERATE_DATE_ARRAY(latest_window, earliest_window, INTERVAL -7 DAY)) AS window_date"
        ));

        let zero = builder()
            .with_window_step_days(Some(0))
            .build(QueryType::Train, &schema(), &features());
        assert!(matches!(zero, Err(RuntimeError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_columns_fail() {
        let features = features().with(FeatureType::Numeric, "discount");
        let err = builder()
            .build(QueryType::Train, &schema(), &features)
            .unwrap_err();
        match err {
            RuntimeError::MissingColumns { table, columns } => {
                assert_eq!(table, "proj.ltv.transactions");
                assert_eq!(columns, vec!["discount".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let narrow = TableSchema::new(vec![Column::new("customer_id", ColumnType::String)]);
        let err = builder()
            .build(QueryType::Predict, &narrow, &FeatureTypes::new())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MissingColumns { columns, .. } if columns == vec!["date", "value"]));
    }

    #[test]
    fn test_value_column_must_be_numeric() {
        let schema = TableSchema::new(vec![
            Column::new("customer_id", ColumnType::String),
            Column::new("date", ColumnType::Date),
            Column::new("value", ColumnType::String),
        ]);
        let err = builder()
            .build(QueryType::Train, &schema, &FeatureTypes::new())
            .unwrap_err();
        assert!(err.to_string().contains("must be numeric"));
    }

    #[test]
    fn test_rejects_key_columns_as_features() {
        let features = FeatureTypes::new().with(FeatureType::StringOrCategorical, "date");
        let err = builder()
            .build(QueryType::Train, &schema(), &features)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let columns = TransactionColumns {
            customer_id: "id`; DROP TABLE x; --".to_string(),
            ..TransactionColumns::default()
        };
        let err = QueryBuilder::new(TableRef::new("p", "d", "t"), columns)
            .build(QueryType::Train, &schema(), &features())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Core(_)));
    }

    #[tokio::test]
    async fn test_build_and_write_query_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_query.sql");

        let sql = builder()
            .build_and_write(QueryType::Train, &schema(), &features(), Some(&path))
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, sql);
        assert!(written.starts_with("-- CrystalValue train_query"));
    }
}
