//! Properties of the evaluation metrics on larger holdout sets

use crystalvalue_runtime::evaluation::{gini_normalized, spearman};
use crystalvalue_runtime::{evaluate, PredictionPair};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn test_deciles_of_one_hundred_pairs() {
    let mut rng = StdRng::seed_from_u64(7);
    let pairs: Vec<PredictionPair> = (0..100)
        .map(|_| {
            let actual: f64 = rng.gen_range(0.0..500.0);
            PredictionPair::new(actual * rng.gen_range(0.8..1.2), Some(actual))
        })
        .collect();

    let report = evaluate(&pairs, 10).unwrap();

    assert_eq!(report.bins.len(), 10);
    assert!(report.bins.iter().all(|bin| bin.count == 10));
    assert_eq!(
        report.bins.iter().map(|b| b.bin).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<_>>()
    );
    for pair in report.bins.windows(2) {
        assert!(pair[0].mean_predicted >= pair[1].mean_predicted);
    }
    assert_eq!(report.excluded_pairs, 0);
    assert!(report.spearman_correlation.unwrap() > 0.9);
    assert!(report.gini_normalized.unwrap() > 0.9);
}

#[test]
fn test_perfect_ranking_has_gini_of_one() {
    let actual: Vec<f64> = (1..=200).map(|i| (i * i) as f64).collect();
    // Any order-preserving prediction ranks customers perfectly
    let predicted: Vec<f64> = actual.iter().map(|a| a.sqrt() + 5.0).collect();

    let gini = gini_normalized(&actual, &predicted).unwrap();
    assert!((gini - 1.0).abs() < 1e-9);
    assert!((spearman(&predicted, &actual).unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn test_random_predictions_have_gini_near_zero() {
    let mut rng = StdRng::seed_from_u64(42);
    let actual: Vec<f64> = (0..5000).map(|_| rng.gen_range(0.0..100.0)).collect();
    let predicted: Vec<f64> = (0..5000).map(|_| rng.gen_range(0.0..100.0)).collect();

    let gini = gini_normalized(&actual, &predicted).unwrap();
    assert!(gini.abs() < 0.1, "gini was {}", gini);
    assert!(spearman(&predicted, &actual).unwrap().abs() < 0.1);
}

#[test]
fn test_uneven_bins_differ_by_at_most_one() {
    let pairs: Vec<PredictionPair> = (0..103)
        .map(|i| PredictionPair::new(i as f64, Some(1.0 + i as f64)))
        .collect();
    let report = evaluate(&pairs, 10).unwrap();

    let sizes: Vec<usize> = report.bins.iter().map(|b| b.count).collect();
    assert_eq!(sizes.iter().sum::<usize>(), 103);
    let largest = *sizes.iter().max().unwrap();
    let smallest = *sizes.iter().min().unwrap();
    assert!(largest - smallest <= 1);
}
