//! End-to-end regression on the iris measurements: predict sepal length
//! from the remaining measurements.

mod common;

use approx::assert_relative_eq;
use rforest::{Forest, ForestConfig, PredictionType, TreeType};

fn iris_config() -> ForestConfig {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Regression;
    cfg.set_predictor_names(common::regression_predictor_names());
    cfg.set_n_tree(10);
    cfg.set_seed(42);
    cfg.set_n_thread(2);
    cfg
}

#[test]
fn oob_error_is_a_finite_mean_squared_error() {
    let mut data = common::iris_regression_data();
    let forest = Forest::plant(&iris_config(), &mut data, &[], None).unwrap();

    let oob = forest.oob_error();
    assert!(oob.is_finite());
    assert!(oob >= 0.0);
    // sepal length spans roughly [4.3, 7.9]; a forest should do far better
    // than the raw spread
    assert!(oob < 1.0);
}

#[test]
fn bagged_predictions_track_the_response() {
    let mut data = common::iris_regression_data();
    let mut forest = Forest::plant(&iris_config(), &mut data, &[], None).unwrap();

    let predicted = forest
        .predict(&data, 123, 2, PredictionType::Bagged, None)
        .unwrap()
        .values()
        .unwrap();
    let observed: Vec<f64> = common::IRIS.iter().map(|row| row[0]).collect();

    let mse = predicted
        .iter()
        .zip(&observed)
        .map(|(p, o)| (p - o) * (p - o))
        .sum::<f64>()
        / observed.len() as f64;
    assert!(mse < 0.5);
    // every bagged value is an average of observed sepal lengths
    for value in &predicted {
        assert!(*value >= 4.3 && *value <= 7.9);
    }
}

#[test]
fn bagged_prediction_is_idempotent() {
    let mut data = common::iris_regression_data();
    let mut forest = Forest::plant(&iris_config(), &mut data, &[], None).unwrap();

    let first = forest
        .predict(&data, 11, 2, PredictionType::Bagged, None)
        .unwrap();
    let second = forest
        .predict(&data, 11, 2, PredictionType::Bagged, None)
        .unwrap();
    // leaf means are cached on first use; the cache must not change results
    assert_eq!(first, second);
}

#[test]
fn inbag_values_are_observed_sepal_lengths() {
    let mut data = common::iris_regression_data();
    let mut forest = Forest::plant(&iris_config(), &mut data, &[], None).unwrap();

    let predicted = forest
        .predict(&data, 7, 1, PredictionType::Inbag, None)
        .unwrap()
        .values()
        .unwrap();
    let observed: Vec<f64> = common::IRIS.iter().map(|row| row[0]).collect();
    for value in &predicted {
        assert!(observed.contains(value));
    }
}

#[test]
fn maxstat_rule_trains_and_predicts() {
    let mut cfg = iris_config();
    cfg.set_split_rule("maxstat").unwrap();
    cfg.alpha = 0.5;
    cfg.min_prop = 0.1;
    let mut data = common::iris_regression_data();
    let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();

    let predicted = forest
        .predict(&data, 123, 2, PredictionType::Bagged, None)
        .unwrap()
        .values()
        .unwrap();
    let observed: Vec<f64> = common::IRIS.iter().map(|row| row[0]).collect();
    let mse = predicted
        .iter()
        .zip(&observed)
        .map(|(p, o)| (p - o) * (p - o))
        .sum::<f64>()
        / observed.len() as f64;
    assert!(mse.is_finite());
    assert!(mse < 1.0);
}

#[test]
fn beta_rule_fits_unit_interval_responses() {
    // rescale sepal length into (0, 1)
    let (x, y) = common::iris_regression();
    let y: Vec<f64> = y.iter().map(|v| (v - 4.0) / 5.0).collect();
    let mut data = rforest::Data::new_dense(x, y.clone(), common::N_ROW, 3).unwrap();

    let mut cfg = iris_config();
    cfg.set_split_rule("beta").unwrap();
    let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();

    let predicted = forest
        .predict(&data, 123, 2, PredictionType::Bagged, None)
        .unwrap()
        .values()
        .unwrap();
    let mse = predicted
        .iter()
        .zip(&y)
        .map(|(p, o)| (p - o) * (p - o))
        .sum::<f64>()
        / y.len() as f64;
    assert!(mse < 0.05);
}

#[test]
fn serialization_round_trip_for_regression() {
    let mut data = common::iris_regression_data();
    let mut forest = Forest::plant(&iris_config(), &mut data, &[], None).unwrap();

    let bytes = forest.to_bytes().unwrap();
    let mut restored = Forest::from_bytes(&bytes).unwrap();
    assert_relative_eq!(restored.oob_error(), forest.oob_error());

    let original = forest
        .predict(&data, 123, 1, PredictionType::Bagged, None)
        .unwrap();
    let reconstructed = restored
        .predict(&data, 123, 1, PredictionType::Bagged, None)
        .unwrap();
    assert_eq!(original, reconstructed);
}
