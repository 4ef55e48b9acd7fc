//! Synthetic transaction data
//!
//! Produces a reproducible transaction table for trying the pipeline end to
//! end without real data. Customers get a fixed spending level and
//! registration flag so that past behaviour carries signal about future value.

use crate::error::{Result, RuntimeError};
use crate::warehouse::WarehouseClient;
use chrono::{Duration, NaiveDate};
use crystalvalue_core::{Column, ColumnType, Row, TableSchema, Value};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Rows streamed per insert request
const INSERT_BATCH_SIZE: usize = 500;

const PRODUCT_TYPES: [&str; 5] = ["electronics", "clothing", "groceries", "home", "toys"];

const FREE_TEXT_WORDS: [&str; 12] = [
    "gift", "express", "delivery", "return", "promo", "bundle", "weekend", "sale",
    "member", "online", "store", "voucher",
];

/// Synthetic data parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticDataConfig {
    #[serde(default = "default_row_count")]
    pub row_count: usize,

    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,

    /// Defaults to one customer per ten transactions
    #[serde(default)]
    pub number_customers: Option<usize>,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SyntheticDataConfig {
    fn default() -> Self {
        Self {
            row_count: default_row_count(),
            start_date: default_start_date(),
            end_date: default_end_date(),
            number_customers: None,
            seed: default_seed(),
        }
    }
}

fn default_row_count() -> usize {
    100_000
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_seed() -> u64 {
    42
}

/// Generates and loads synthetic transactions
#[derive(Debug, Clone)]
pub struct SyntheticDataGenerator {
    config: SyntheticDataConfig,
}

struct Customer {
    id: String,
    spend_level: f64,
    activity: f64,
    is_registered: bool,
}

impl SyntheticDataGenerator {
    pub fn new(config: SyntheticDataConfig) -> Self {
        Self { config }
    }

    /// Schema of the generated table
    pub fn schema() -> TableSchema {
        TableSchema::new(vec![
            Column::new("customer_id", ColumnType::String).required(),
            Column::new("date", ColumnType::Date).required(),
            Column::new("value", ColumnType::Float),
            Column::new("number_products", ColumnType::Integer),
            Column::new("product_type", ColumnType::String),
            Column::new("is_registered", ColumnType::Boolean),
            Column::new("free_text", ColumnType::String),
        ])
    }

    /// Generate the transactions. The same config always yields the same rows.
    pub fn generate(&self) -> Result<Vec<Row>> {
        let config = &self.config;
        if config.row_count == 0 {
            return Err(RuntimeError::InvalidConfig(
                "row_count must be at least 1".to_string(),
            ));
        }
        let span_days = (config.end_date - config.start_date).num_days();
        if span_days <= 0 {
            return Err(RuntimeError::InvalidConfig(format!(
                "end_date {} must be after start_date {}",
                config.end_date, config.start_date
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let number_customers = config
            .number_customers
            .unwrap_or(config.row_count / 10)
            .max(1);

        let customers: Vec<Customer> = (0..number_customers)
            .map(|i| Customer {
                id: format!("customer_{:06}", i),
                spend_level: rng.gen_range(0.2..3.0),
                activity: rng.gen_range(0.1..1.0),
                is_registered: rng.gen_bool(0.4),
            })
            .collect();

        let mut rows = Vec::with_capacity(config.row_count);
        while rows.len() < config.row_count {
            let customer = &customers[rng.gen_range(0..customers.len())];
            // Less active customers skip more of their draws
            if !rng.gen_bool(customer.activity) {
                continue;
            }

            let date = config.start_date + Duration::days(rng.gen_range(0..span_days));
            let number_products: u32 = rng.gen_range(1..=5);
            let registered_bonus = if customer.is_registered { 1.3 } else { 1.0 };
            let value = (number_products as f64
                * rng.gen_range(5.0..40.0)
                * customer.spend_level
                * registered_bonus
                * 100.0)
                .round()
                / 100.0;
            let product_type = PRODUCT_TYPES.choose(&mut rng).copied().unwrap_or("home");
            let free_text = FREE_TEXT_WORDS
                .choose_multiple(&mut rng, 2)
                .copied()
                .collect::<Vec<_>>()
                .join(" ");

            let mut row = Row::new();
            row.insert("customer_id".to_string(), Value::from(customer.id.clone()));
            row.insert(
                "date".to_string(),
                Value::from(date.format("%Y-%m-%d").to_string()),
            );
            row.insert("value".to_string(), Value::Number(value));
            row.insert(
                "number_products".to_string(),
                Value::Number(number_products as f64),
            );
            row.insert("product_type".to_string(), Value::from(product_type));
            row.insert("is_registered".to_string(), Value::Bool(customer.is_registered));
            row.insert("free_text".to_string(), Value::from(free_text));
            rows.push(row);
        }

        Ok(rows)
    }

    /// Generate the rows and load them into `dataset_id.table_name`,
    /// replacing any existing table.
    pub async fn load(
        &self,
        warehouse: &dyn WarehouseClient,
        dataset_id: &str,
        table_name: &str,
    ) -> Result<Vec<Row>> {
        let rows = self.generate()?;
        warehouse
            .create_table(dataset_id, table_name, &Self::schema(), true)
            .await?;

        for (i, batch) in rows.chunks(INSERT_BATCH_SIZE).enumerate() {
            warehouse.insert_rows(dataset_id, table_name, batch).await?;
            tracing::debug!("Inserted batch {} ({} rows)", i + 1, batch.len());
        }

        tracing::info!(
            "Loaded {} synthetic transactions into {}",
            rows.len(),
            warehouse.table_ref(dataset_id, table_name)
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn small() -> SyntheticDataConfig {
        SyntheticDataConfig {
            row_count: 2000,
            ..SyntheticDataConfig::default()
        }
    }

    #[test]
    fn test_generates_requested_rows() {
        let rows = SyntheticDataGenerator::new(small()).generate().unwrap();
        assert_eq!(rows.len(), 2000);

        let schema = SyntheticDataGenerator::schema();
        for row in &rows {
            for name in schema.column_names() {
                assert!(row.contains_key(name), "missing {}", name);
            }
            let date = row["date"].as_str().unwrap();
            assert!(date >= "2018-01-01" && date < "2021-01-01");
            assert!(row["value"].as_f64().unwrap() > 0.0);
            let products = row["number_products"].as_f64().unwrap();
            assert!((1.0..=5.0).contains(&products));
            assert!(PRODUCT_TYPES.contains(&row["product_type"].as_str().unwrap()));
        }

        let customers: HashSet<&str> = rows
            .iter()
            .filter_map(|r| r["customer_id"].as_str())
            .collect();
        assert!(customers.len() <= 200);
        assert!(customers.len() > 100);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let first = SyntheticDataGenerator::new(small()).generate().unwrap();
        let second = SyntheticDataGenerator::new(small()).generate().unwrap();
        assert_eq!(first, second);

        let other = SyntheticDataGenerator::new(SyntheticDataConfig {
            seed: 7,
            ..small()
        })
        .generate()
        .unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_registration_is_per_customer() {
        let rows = SyntheticDataGenerator::new(small()).generate().unwrap();
        let mut flags = std::collections::HashMap::new();
        for row in &rows {
            let id = row["customer_id"].as_str().unwrap();
            let flag = row["is_registered"].as_bool().unwrap();
            assert_eq!(*flags.entry(id).or_insert(flag), flag);
        }
    }

    #[test]
    fn test_invalid_config() {
        let empty = SyntheticDataConfig {
            row_count: 0,
            ..SyntheticDataConfig::default()
        };
        assert!(SyntheticDataGenerator::new(empty).generate().is_err());

        let backwards = SyntheticDataConfig {
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            ..small()
        };
        assert!(matches!(
            SyntheticDataGenerator::new(backwards).generate(),
            Err(RuntimeError::InvalidConfig(_))
        ));
    }
}
