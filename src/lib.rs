//! `rforest` trains ensembles of decision trees (random forests) on tabular
//! predictor/response data and produces predictions suitable for embedding
//! inside multiple-imputation loops.
//!
//! The crate covers classification and regression forests with pluggable
//! split rules (Gini/variance, extremely randomized trees, beta
//! log-likelihood, maximally selected rank statistics, Hellinger distance),
//! bootstrap resampling with case weights or class-wise fractions, parallel
//! tree growth with progress reporting and cooperative interruption,
//! out-of-bag error estimates, three prediction modes (bagged, in-bag,
//! terminal nodes), forest merging, and a versioned binary model format.
//!
//! # Example
//! ```
//! use rforest::{Data, Forest, ForestConfig, PredictionType};
//!
//! // ten rows, one predictor (column-major), binary response
//! let x = vec![0.1, 0.2, 0.3, 0.4, 0.5, 5.1, 5.2, 5.3, 5.4, 5.5];
//! let y = vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
//! let mut data = Data::new_dense(x, y.clone(), 10, 1).unwrap();
//!
//! let mut cfg = ForestConfig::new();
//! cfg.set_predictor_names(vec!["x0".to_string()]);
//! cfg.set_n_tree(5);
//! cfg.replace = false;
//! cfg.set_seed(42);
//! cfg.set_n_thread(1);
//!
//! let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();
//! let predicted = forest
//!     .predict(&data, 123, 1, PredictionType::Bagged, None)
//!     .unwrap()
//!     .values()
//!     .unwrap();
//! assert_eq!(predicted, y);
//! ```

pub mod config;
pub mod data;
pub mod errors;
pub mod forest;
pub mod model;
pub mod sampling;
pub mod stats;
pub mod tree;
pub mod tree_classification;
pub mod tree_regression;

pub use crate::config::{
    as_prediction_type, as_split_rule, as_tree_type, split_rule_string, tree_type_string,
    ForestConfig, PredictionType, SplitRule, TrainingParameters, TreeType,
};
pub use crate::data::Data;
pub use crate::errors::{ForestError, Result};
pub use crate::forest::{Forest, ForestMeta, Predictions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_predict_round() {
        let x = vec![
            1.0, 2.0, 3.0, 4.0, 11.0, 12.0, 13.0, 14.0, // column 0
            0.5, 0.4, 0.3, 0.2, 0.5, 0.4, 0.3, 0.2, // column 1
        ];
        let y = vec![2.0, 2.0, 2.0, 2.0, 8.0, 8.0, 8.0, 8.0];
        let mut data = Data::new_dense(x, y, 8, 2).unwrap();

        let mut cfg = ForestConfig::new();
        cfg.set_tree_type("regression").unwrap();
        cfg.set_predictor_names(vec!["a".to_string(), "b".to_string()]);
        cfg.set_n_tree(8);
        // full in-bag sample without replacement: every tree sees both
        // plateaus and finds the step exactly
        cfg.replace = false;
        cfg.sample_fraction = vec![1.0];
        cfg.set_seed(9);
        cfg.set_n_thread(2);

        let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();
        assert!(forest.oob_error().is_nan() || forest.oob_error() >= 0.0);

        let values = forest
            .predict(&data, 55, 2, PredictionType::Bagged, None)
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(values, vec![2.0, 2.0, 2.0, 2.0, 8.0, 8.0, 8.0, 8.0]);
    }

    #[test]
    fn prediction_type_strings() {
        assert_eq!(as_prediction_type("bagged").unwrap(), PredictionType::Bagged);
        assert_eq!(as_prediction_type("inbag").unwrap(), PredictionType::Inbag);
        assert_eq!(as_prediction_type("nodes").unwrap(), PredictionType::Nodes);
        assert!(as_prediction_type("oob").is_err());
    }
}
