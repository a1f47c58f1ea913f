//! Boundary behaviors of the training and prediction calls.

mod common;

use rforest::{Data, Forest, ForestConfig, ForestError, PredictionType, TreeType};

#[test]
fn stratified_sampling_rejects_case_weights() {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(common::predictor_names());
    cfg.sample_fraction = vec![0.2, 0.3, 0.4];
    cfg.set_seed(1);
    cfg.set_n_thread(1);

    let mut data = common::iris_classification_data();
    let case_weights = vec![1.0; common::N_ROW];
    let err = Forest::plant(&cfg, &mut data, &case_weights, None).unwrap_err();
    assert_eq!(
        format!("{}", err),
        "Invalid argument: Combination of 'case_weights' argument and \
         class-wise sampling not supported."
    );
}

#[test]
fn zero_stratified_fractions_are_rejected() {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(common::predictor_names());
    cfg.sample_fraction = vec![0.0, 0.0, 0.0];
    let mut data = common::iris_classification_data();
    let err = Forest::plant(&cfg, &mut data, &[], None).unwrap_err();
    assert!(format!("{}", err).contains("zero samples"));
}

#[test]
fn deficient_class_is_named_without_replacement() {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(common::predictor_names());
    cfg.replace = false;
    // class 0 holds a third of the rows; asking for 90% of all rows from it
    // cannot be satisfied
    cfg.sample_fraction = vec![0.9, 0.05, 0.05];
    cfg.set_seed(1);
    cfg.set_n_thread(1);
    let mut data = common::iris_classification_data();
    let err = Forest::plant(&cfg, &mut data, &[], None).unwrap_err();
    let message = format!("{}", err);
    assert!(message.contains("class 0"));
}

#[test]
fn case_weight_length_must_match_rows() {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(common::predictor_names());
    let mut data = common::iris_classification_data();
    let err = Forest::plant(&cfg, &mut data, &[1.0, 2.0], None).unwrap_err();
    assert!(matches!(err, ForestError::InvalidArgument(_)));
}

#[test]
fn case_weights_focus_the_inbag_sample() {
    // all weight on the first two species: trained forest never sees
    // virginica, so its bagged predictions avoid class 2
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(common::predictor_names());
    cfg.set_n_tree(10);
    cfg.set_seed(42);
    cfg.set_n_thread(2);

    let mut weights = vec![1.0; common::N_ROW];
    for weight in weights.iter_mut().skip(100) {
        *weight = 0.0;
    }

    let mut data = common::iris_classification_data();
    let mut forest = Forest::plant(&cfg, &mut data, &weights, None).unwrap();
    let predicted = forest
        .predict(&data, 3, 2, PredictionType::Bagged, None)
        .unwrap()
        .values()
        .unwrap();
    assert!(predicted.iter().all(|value| *value != 2.0));
}

#[test]
fn predictor_name_count_must_match_columns() {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(vec!["only_one".to_string()]);
    let mut data = common::iris_classification_data();
    let err = Forest::plant(&cfg, &mut data, &[], None).unwrap_err();
    assert!(format!("{}", err).contains("predictor_names"));
}

#[test]
fn single_tree_single_thread_is_deterministic() {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(common::predictor_names());
    cfg.set_n_tree(1);
    cfg.set_seed(7);
    cfg.set_n_thread(1);

    let mut data_a = common::iris_classification_data();
    let mut forest_a = Forest::plant(&cfg, &mut data_a, &[], None).unwrap();
    let mut data_b = common::iris_classification_data();
    let mut forest_b = Forest::plant(&cfg, &mut data_b, &[], None).unwrap();

    assert_eq!(forest_a.oob_error(), forest_b.oob_error());
    let nodes_a = forest_a
        .predict(&data_a, 3, 1, PredictionType::Nodes, None)
        .unwrap();
    let nodes_b = forest_b
        .predict(&data_b, 3, 1, PredictionType::Nodes, None)
        .unwrap();
    assert_eq!(nodes_a, nodes_b);
}

#[test]
fn max_depth_one_forests_have_three_node_trees() {
    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(common::predictor_names());
    cfg.set_n_tree(4);
    cfg.max_depth = 1;
    cfg.set_seed(5);
    cfg.set_n_thread(1);

    let mut data = common::iris_classification_data();
    let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();
    let nodes = forest
        .predict(&data, 3, 1, PredictionType::Nodes, None)
        .unwrap()
        .nodes()
        .unwrap();
    // every terminal node of a depth-one tree is node 1 or node 2
    for row in &nodes {
        for &node_key in row {
            assert!(node_key == 1 || node_key == 2);
        }
    }
}

#[test]
fn unknown_prediction_type_string_is_rejected() {
    assert!(rforest::as_prediction_type("bootstrap").is_err());
    assert!(rforest::as_prediction_type("bagged").is_ok());
}

#[test]
fn sparse_shares_the_training_contract() {
    // zeros dropped from the matrix must behave as stored zeros
    let x = vec![
        0.0, 1.0, 0.0, 2.0, 0.0, 3.0, // column 0
        5.0, 0.0, 6.0, 0.0, 7.0, 0.0, // column 1
    ];
    let y = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
    let (row_keys, col_offsets, values) = common::to_sparse(&x, 6, 2);
    let mut sparse = Data::new_sparse(row_keys, col_offsets, values, y.clone(), 6, 2).unwrap();
    let mut dense = Data::new_dense(x, y, 6, 2).unwrap();

    let mut cfg = ForestConfig::new();
    cfg.tree_type = TreeType::Classification;
    cfg.set_predictor_names(vec!["a".to_string(), "b".to_string()]);
    cfg.set_n_tree(3);
    cfg.set_seed(11);
    cfg.set_n_thread(1);

    let mut forest_sparse = Forest::plant(&cfg, &mut sparse, &[], None).unwrap();
    let mut forest_dense = Forest::plant(&cfg, &mut dense, &[], None).unwrap();

    let from_sparse = forest_sparse
        .predict(&sparse, 3, 1, PredictionType::Nodes, None)
        .unwrap();
    let from_dense = forest_dense
        .predict(&dense, 3, 1, PredictionType::Nodes, None)
        .unwrap();
    assert_eq!(from_sparse, from_dense);
}
