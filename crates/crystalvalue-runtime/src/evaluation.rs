//! Model evaluation
//!
//! Compares predicted and actual customer value on a holdout set: customers
//! are ranked by prediction and cut into equal-sized bins, each bin reports
//! its mean predicted and actual value and error ratios. The whole set
//! reports Spearman rank correlation and the normalized Gini coefficient.

use crate::error::{Result, RuntimeError};
use crystalvalue_core::{Column, ColumnType, Row, TableSchema, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Prediction for one holdout row with its observed value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPair {
    pub predicted: f64,
    pub actual: Option<f64>,
}

impl PredictionPair {
    pub fn new(predicted: f64, actual: Option<f64>) -> Self {
        Self { predicted, actual }
    }
}

/// Metrics for one bin of customers ranked by predicted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinMetrics {
    /// 1 is the bin with the highest predictions
    pub bin: usize,
    pub count: usize,
    pub mean_predicted: f64,
    pub mean_actual: f64,
    /// Mean absolute error divided by mean actual value
    pub normalized_mae: Option<f64>,
    /// Mean of |predicted - actual| / |actual| over rows with a non-zero actual
    pub normalized_mape: Option<f64>,
}

/// Evaluation of one model on a holdout set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub bins: Vec<BinMetrics>,
    pub spearman_correlation: Option<f64>,
    pub gini_normalized: Option<f64>,
    pub total_pairs: usize,
    pub excluded_pairs: usize,
}

impl EvaluationReport {
    /// Schema of the evaluation table: one row per bin with the run's summary
    /// fields repeated on each row
    pub fn table_schema() -> TableSchema {
        TableSchema::new(vec![
            Column::new("model_id", ColumnType::String),
            Column::new("time_run", ColumnType::Timestamp),
            Column::new("bin", ColumnType::Integer),
            Column::new("number_customers", ColumnType::Integer),
            Column::new("mean_predicted_value", ColumnType::Float),
            Column::new("mean_actual_value", ColumnType::Float),
            Column::new("normalized_mae", ColumnType::Float),
            Column::new("normalized_mape", ColumnType::Float),
            Column::new("spearman_correlation", ColumnType::Float),
            Column::new("gini_normalized", ColumnType::Float),
        ])
    }

    /// Rows for the evaluation table
    pub fn to_rows(&self, model_id: &str, time_run: &str) -> Vec<Row> {
        let optional = |v: Option<f64>| v.map(Value::Number).unwrap_or(Value::Null);

        self.bins
            .iter()
            .map(|bin| {
                let mut row = Row::new();
                row.insert("model_id".to_string(), Value::from(model_id));
                row.insert("time_run".to_string(), Value::from(time_run));
                row.insert("bin".to_string(), Value::Number(bin.bin as f64));
                row.insert(
                    "number_customers".to_string(),
                    Value::Number(bin.count as f64),
                );
                row.insert(
                    "mean_predicted_value".to_string(),
                    Value::Number(bin.mean_predicted),
                );
                row.insert(
                    "mean_actual_value".to_string(),
                    Value::Number(bin.mean_actual),
                );
                row.insert("normalized_mae".to_string(), optional(bin.normalized_mae));
                row.insert("normalized_mape".to_string(), optional(bin.normalized_mape));
                row.insert(
                    "spearman_correlation".to_string(),
                    optional(self.spearman_correlation),
                );
                row.insert("gini_normalized".to_string(), optional(self.gini_normalized));
                row
            })
            .collect()
    }
}

/// Compute the evaluation report.
///
/// Pairs with a missing or non-finite value are excluded. Fails when
/// `number_bins` is zero or larger than the number of usable pairs.
pub fn evaluate(pairs: &[PredictionPair], number_bins: usize) -> Result<EvaluationReport> {
    let mut usable: Vec<(f64, f64)> = pairs
        .iter()
        .filter_map(|pair| match pair.actual {
            Some(actual) if actual.is_finite() && pair.predicted.is_finite() => {
                Some((pair.predicted, actual))
            }
            _ => None,
        })
        .collect();

    let excluded = pairs.len() - usable.len();
    if excluded > 0 {
        tracing::warn!(
            "Excluded {} of {} holdout rows without a usable actual or predicted value",
            excluded,
            pairs.len()
        );
    }

    if number_bins == 0 {
        return Err(RuntimeError::InvalidInput(
            "number_bins must be at least 1".to_string(),
        ));
    }
    if number_bins > usable.len() {
        return Err(RuntimeError::InvalidInput(format!(
            "number_bins ({}) exceeds the number of usable pairs ({})",
            number_bins,
            usable.len()
        )));
    }

    usable.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let n = usable.len();
    let mut grouped: Vec<Vec<(f64, f64)>> = vec![Vec::new(); number_bins];
    for (rank, pair) in usable.iter().enumerate() {
        grouped[rank * number_bins / n].push(*pair);
    }
    let bins = grouped
        .iter()
        .enumerate()
        .map(|(i, members)| bin_metrics(i + 1, members))
        .collect();

    let predicted: Vec<f64> = usable.iter().map(|p| p.0).collect();
    let actual: Vec<f64> = usable.iter().map(|p| p.1).collect();

    Ok(EvaluationReport {
        bins,
        spearman_correlation: spearman(&predicted, &actual),
        gini_normalized: gini_normalized(&actual, &predicted),
        total_pairs: pairs.len(),
        excluded_pairs: excluded,
    })
}

fn bin_metrics(bin: usize, members: &[(f64, f64)]) -> BinMetrics {
    let count = members.len() as f64;
    let mean_predicted = members.iter().map(|p| p.0).sum::<f64>() / count;
    let mean_actual = members.iter().map(|p| p.1).sum::<f64>() / count;
    let mae = members.iter().map(|p| (p.0 - p.1).abs()).sum::<f64>() / count;

    let normalized_mae = ratio(mae, mean_actual);

    let nonzero: Vec<f64> = members
        .iter()
        .filter(|p| p.1 != 0.0)
        .map(|p| (p.0 - p.1).abs() / p.1.abs())
        .collect();
    let normalized_mape = if nonzero.is_empty() {
        None
    } else {
        Some(nonzero.iter().sum::<f64>() / nonzero.len() as f64)
    };

    BinMetrics {
        bin,
        count: members.len(),
        mean_predicted,
        mean_actual,
        normalized_mae,
        normalized_mape,
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Spearman rank correlation with average ranks for ties.
///
/// `None` for fewer than two values or when either side has no variance.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; ties share the mean of their positions
        let rank = (start + end + 1) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = rank;
        }
        start = end;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance_x = 0.0;
    let mut variance_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        covariance += (a - mean_x) * (b - mean_y);
        variance_x += (a - mean_x).powi(2);
        variance_y += (b - mean_y).powi(2);
    }

    if variance_x == 0.0 || variance_y == 0.0 {
        return None;
    }
    Some(covariance / (variance_x.sqrt() * variance_y.sqrt()))
}

/// Gini coefficient of `actual` when customers are ordered by `predicted`
/// (highest first).
pub fn gini(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.len() != predicted.len() || actual.is_empty() {
        return None;
    }

    let mut order: Vec<usize> = (0..actual.len()).collect();
    order.sort_by(|&a, &b| {
        predicted[b]
            .partial_cmp(&predicted[a])
            .unwrap_or(Ordering::Equal)
    });

    let total: f64 = actual.iter().sum();
    if total == 0.0 {
        return None;
    }

    let n = actual.len() as f64;
    let mut cumulative = 0.0;
    let mut cumulative_share_sum = 0.0;
    for &index in &order {
        cumulative += actual[index];
        cumulative_share_sum += cumulative / total;
    }
    Some((cumulative_share_sum - (n + 1.0) / 2.0) / n)
}

/// Model Gini divided by the Gini of the perfect ordering; 1 means the model
/// ranks customers exactly by actual value, around 0 means no better than random.
pub fn gini_normalized(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let model = gini(actual, predicted)?;
    let perfect = gini(actual, actual)?;
    ratio(model, perfect)
}
