//! This module implements the configuration for random forest training.
//!
//! [`ForestConfig`] is the user-facing bundle of training options. Its
//! [`expand`] step applies the documented defaults and produces one
//! [`TrainingParameters`] value per tree slot, which is what the growth
//! engine consumes.
//!
//! [`ForestConfig`]: struct.ForestConfig.html
//! [`expand`]: struct.ForestConfig.html#method.expand
//! [`TrainingParameters`]: struct.TrainingParameters.html

use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::errors::{ForestError, Result};

pub const DEFAULT_N_THREAD: usize = 0;

pub const DEFAULT_MIN_SPLIT_N_SAMPLE_CLASSIFICATION: usize = 2;
pub const DEFAULT_MIN_LEAF_N_SAMPLE_CLASSIFICATION: usize = 1;
pub const DEFAULT_MIN_SPLIT_N_SAMPLE_REGRESSION: usize = 5;
pub const DEFAULT_MIN_LEAF_N_SAMPLE_REGRESSION: usize = 1;

/// Seconds between progress reports during training and prediction.
pub const STATUS_INTERVAL: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeType {
    Classification,
    Regression,
}

impl Default for TreeType {
    fn default() -> Self {
        TreeType::Classification
    }
}

/// Rule for selecting the predictor and value to split a node on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRule {
    /// Gini impurity (classification) or variance reduction (regression).
    LogRank,
    /// Maximally selected rank statistics (regression).
    MaxStat,
    /// Extremely randomized trees: thresholds drawn at random.
    ExtraTrees,
    /// Beta log-likelihood for responses in (0, 1) (regression).
    Beta,
    /// Hellinger distance (binary classification).
    Hellinger,
}

impl Default for SplitRule {
    fn default() -> Self {
        SplitRule::LogRank
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionType {
    /// Aggregate over all trees: plurality vote or mean.
    Bagged,
    /// One random in-bag value from one randomly-assigned tree per row.
    Inbag,
    /// The terminal node key in every tree.
    Nodes,
}

pub fn as_tree_type(s: &str) -> Result<TreeType> {
    match s {
        "classification" => Ok(TreeType::Classification),
        "regression" => Ok(TreeType::Regression),
        _ => Err(ForestError::InvalidArgument(format!(
            "Invalid tree type: '{}'.",
            s
        ))),
    }
}

pub fn tree_type_string(t: TreeType) -> &'static str {
    match t {
        TreeType::Classification => "classification",
        TreeType::Regression => "regression",
    }
}

pub fn as_split_rule(s: &str) -> Result<SplitRule> {
    match s {
        "gini" | "variance" => Ok(SplitRule::LogRank),
        "maxstat" => Ok(SplitRule::MaxStat),
        "extratrees" => Ok(SplitRule::ExtraTrees),
        "beta" => Ok(SplitRule::Beta),
        "hellinger" => Ok(SplitRule::Hellinger),
        _ => Err(ForestError::InvalidArgument(format!(
            "Invalid split metric: '{}'.",
            s
        ))),
    }
}

pub fn split_rule_string(r: SplitRule) -> &'static str {
    match r {
        SplitRule::LogRank => "gini", // also accepted as "variance"
        SplitRule::MaxStat => "maxstat",
        SplitRule::ExtraTrees => "extratrees",
        SplitRule::Beta => "beta",
        SplitRule::Hellinger => "hellinger",
    }
}

pub fn as_prediction_type(s: &str) -> Result<PredictionType> {
    match s {
        "bagged" => Ok(PredictionType::Bagged),
        "inbag" => Ok(PredictionType::Inbag),
        "nodes" => Ok(PredictionType::Nodes),
        _ => Err(ForestError::InvalidArgument(format!(
            "Invalid prediction type: '{}'.",
            s
        ))),
    }
}

/* Enum values are persisted as their canonical strings. */

impl Serialize for TreeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(tree_type_string(*self))
    }
}

impl<'de> Deserialize<'de> for TreeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TreeTypeVisitor;
        impl<'de> Visitor<'de> for TreeTypeVisitor {
            type Value = TreeType;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("\"classification\" or \"regression\"")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<TreeType, E> {
                as_tree_type(v).map_err(|_| E::custom(format!("invalid tree type '{}'", v)))
            }
        }
        deserializer.deserialize_str(TreeTypeVisitor)
    }
}

impl Serialize for SplitRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(split_rule_string(*self))
    }
}

impl<'de> Deserialize<'de> for SplitRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SplitRuleVisitor;
        impl<'de> Visitor<'de> for SplitRuleVisitor {
            type Value = SplitRule;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a split rule name")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<SplitRule, E> {
                as_split_rule(v).map_err(|_| E::custom(format!("invalid split rule '{}'", v)))
            }
        }
        deserializer.deserialize_str(SplitRuleVisitor)
    }
}

/// Generic parameters for one tree in a random forest.
///
/// Parameters that describe the sampling, drawing, and splitting of a tree.
/// The forest holds one of these per tree slot; the shared vectors are
/// reference-counted so per-tree copies stay cheap.
#[derive(Debug, Clone)]
pub struct TrainingParameters {
    /// Sample with replacement when drawing the in-bag set.
    pub replace: bool,
    /// Fraction of rows used to train each tree; more than one entry means
    /// response-wise (class-wise) fractions.
    pub sample_fraction: Arc<Vec<f64>>,
    /// Number of randomly-drawn candidate predictors at each node split.
    pub n_try: usize,
    /// Predictors that are always candidates for splitting (sorted by key).
    pub draw_always_predictor_keys: Arc<Vec<usize>>,
    /// Weights for each predictor when drawing candidates; empty for uniform.
    pub draw_predictor_weights: Arc<Vec<f64>>,
    /// Weights for each class of the response (classification only).
    pub response_weights: Arc<Vec<f64>>,
    pub split_rule: SplitRule,
    /// Minimum decrease in the split metric for an acceptable split. Signed:
    /// MaxStat compares `-p_value` against `-alpha`.
    pub min_metric_decrease: f64,
    /// Maximum depth of the tree; zero means unlimited.
    pub max_depth: usize,
    /// Minimum in-bag samples a node must have to be considered for a split.
    pub min_split_n_sample: usize,
    /// Minimum in-bag samples in a leaf.
    pub min_leaf_n_sample: usize,
    /// Number of random draws per predictor for the extratrees rule.
    pub n_random_split: usize,
    /// Smallest child proportion considered by the maxstat rule.
    pub min_prop: f64,
}

impl TrainingParameters {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        replace: bool,
        sample_fraction: Arc<Vec<f64>>,
        n_try: usize,
        draw_always_predictor_keys: Arc<Vec<usize>>,
        draw_predictor_weights: Arc<Vec<f64>>,
        response_weights: Arc<Vec<f64>>,
        split_rule: SplitRule,
        min_metric_decrease: f64,
        max_depth: usize,
        min_split_n_sample: usize,
        min_leaf_n_sample: usize,
        n_random_split: usize,
        min_prop: f64,
    ) -> Result<Self> {
        if n_try == 0 {
            return Err(ForestError::InvalidArgument(
                "'n_try' must be positive.".to_string(),
            ));
        }
        if split_rule == SplitRule::ExtraTrees && n_random_split == 0 {
            return Err(ForestError::InvalidArgument(
                "'n_random_split' must be positive.".to_string(),
            ));
        }
        Ok(TrainingParameters {
            replace,
            sample_fraction,
            n_try,
            draw_always_predictor_keys,
            draw_predictor_weights,
            response_weights,
            split_rule,
            min_metric_decrease,
            max_depth,
            min_split_n_sample,
            min_leaf_n_sample,
            n_random_split,
            min_prop,
        })
    }

    /// True when sampling is stratified by response class.
    pub fn response_wise(&self) -> bool {
        self.sample_fraction.len() > 1
    }
}

/// Training options for a whole forest.
///
/// Zero on `n_try`, `min_split_n_sample` and `min_leaf_n_sample` means "use
/// the family default"; an empty `sample_fraction` means 1.0 with
/// replacement and 0.632 without; `seed == 0` seeds from the platform;
/// `n_thread == 0` resolves to the hardware concurrency.
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub tree_type: TreeType,
    pub n_tree: usize,
    pub predictor_names: Vec<String>,
    pub names_of_unordered: Vec<String>,
    pub replace: bool,
    pub sample_fraction: Vec<f64>,
    pub n_try: usize,
    /// Zero, one, or `n_tree` weight vectors (one per tree slot).
    pub draw_predictor_weights: Vec<Vec<f64>>,
    pub names_of_always_draw: Vec<String>,
    pub split_rule: SplitRule,
    pub max_depth: usize,
    pub min_split_n_sample: usize,
    pub min_leaf_n_sample: usize,
    pub response_weights: Vec<f64>,
    pub n_random_split: usize,
    /// Significance level for the maxstat rule.
    pub alpha: f64,
    pub min_prop: f64,
    pub seed: u64,
    pub save_memory: bool,
    pub n_thread: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ForestConfig {
    pub fn new() -> ForestConfig {
        ForestConfig {
            tree_type: TreeType::Classification,
            n_tree: 10,
            predictor_names: Vec::new(),
            names_of_unordered: Vec::new(),
            replace: true,
            sample_fraction: Vec::new(),
            n_try: 0,
            draw_predictor_weights: Vec::new(),
            names_of_always_draw: Vec::new(),
            split_rule: SplitRule::LogRank,
            max_depth: 0,
            min_split_n_sample: 0,
            min_leaf_n_sample: 0,
            response_weights: Vec::new(),
            n_random_split: 1,
            alpha: 0.5,
            min_prop: 0.1,
            seed: 0,
            save_memory: false,
            n_thread: DEFAULT_N_THREAD,
        }
    }

    pub fn set_tree_type(&mut self, s: &str) -> Result<()> {
        self.tree_type = as_tree_type(s)?;
        Ok(())
    }

    pub fn set_split_rule(&mut self, s: &str) -> Result<()> {
        self.split_rule = as_split_rule(s)?;
        Ok(())
    }

    pub fn set_n_tree(&mut self, n: usize) {
        self.n_tree = n;
    }

    pub fn set_predictor_names(&mut self, names: Vec<String>) {
        self.predictor_names = names;
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn set_n_thread(&mut self, n: usize) {
        self.n_thread = n;
    }

    pub fn summary(&self) -> String {
        let mut s = String::from("");
        s.push_str(&format!("tree type = {}\n", tree_type_string(self.tree_type)));
        s.push_str(&format!("number of trees = {}\n", self.n_tree));
        s.push_str(&format!(
            "number of predictors = {}\n",
            self.predictor_names.len()
        ));
        s.push_str(&format!("replace = {}\n", self.replace));
        s.push_str(&format!("n_try = {}\n", self.n_try));
        s.push_str(&format!(
            "split rule = {}\n",
            split_rule_string(self.split_rule)
        ));
        s.push_str(&format!("maximum depth = {}\n", self.max_depth));
        s.push_str(&format!("min split samples = {}\n", self.min_split_n_sample));
        s.push_str(&format!("min leaf samples = {}\n", self.min_leaf_n_sample));
        s.push_str(&format!("seed = {}\n", self.seed));
        s.push_str(&format!("save memory = {}\n", self.save_memory));
        s
    }

    /// The default number of candidate predictors per split.
    pub fn default_n_try(n_predictor: usize) -> usize {
        ((n_predictor as f64).sqrt().floor() as usize).max(1)
    }

    /// Apply the documented defaults and validate, producing one
    /// [`TrainingParameters`] per tree slot plus the per-predictor ordering
    /// mask.
    ///
    /// [`TrainingParameters`]: struct.TrainingParameters.html
    pub fn expand(&self) -> Result<(Vec<TrainingParameters>, Arc<Vec<bool>>)> {
        let n_predictor = self.predictor_names.len();
        if n_predictor == 0 {
            return Err(ForestError::InvalidArgument(
                "Need at least one predictor.".to_string(),
            ));
        }
        if self.n_tree == 0 {
            return Err(ForestError::InvalidArgument(
                "'n_tree' must be positive.".to_string(),
            ));
        }

        match (self.tree_type, self.split_rule) {
            (TreeType::Classification, SplitRule::MaxStat)
            | (TreeType::Classification, SplitRule::Beta) => {
                return Err(ForestError::InvalidArgument(
                    "Unsupported split metric for classification.".to_string(),
                ));
            }
            (TreeType::Regression, SplitRule::Hellinger) => {
                return Err(ForestError::InvalidArgument(
                    "Unsupported split metric for regression.".to_string(),
                ));
            }
            _ => {}
        }

        let n_try = if self.n_try == 0 {
            Self::default_n_try(n_predictor)
        } else {
            self.n_try
        };

        let min_split_n_sample = if self.min_split_n_sample != 0 {
            self.min_split_n_sample
        } else {
            match self.tree_type {
                TreeType::Classification => DEFAULT_MIN_SPLIT_N_SAMPLE_CLASSIFICATION,
                TreeType::Regression => DEFAULT_MIN_SPLIT_N_SAMPLE_REGRESSION,
            }
        };
        let min_leaf_n_sample = if self.min_leaf_n_sample != 0 {
            self.min_leaf_n_sample
        } else {
            match self.tree_type {
                TreeType::Classification => DEFAULT_MIN_LEAF_N_SAMPLE_CLASSIFICATION,
                TreeType::Regression => DEFAULT_MIN_LEAF_N_SAMPLE_REGRESSION,
            }
        };

        let min_metric_decrease = match self.split_rule {
            SplitRule::LogRank | SplitRule::ExtraTrees | SplitRule::Hellinger => 0.0,
            SplitRule::Beta => -f64::MAX,
            SplitRule::MaxStat => -self.alpha,
        };

        let sample_fraction = if self.sample_fraction.is_empty() {
            vec![if self.replace { 1.0 } else { 0.632 }]
        } else {
            self.sample_fraction.clone()
        };
        for fraction in &sample_fraction {
            if !(0.0..=1.0).contains(fraction) {
                return Err(ForestError::InvalidArgument(
                    "'sample_fraction' must be in the interval [0,1].".to_string(),
                ));
            }
        }
        if sample_fraction.len() > 1 {
            if self.tree_type != TreeType::Classification {
                return Err(ForestError::InvalidArgument(
                    "Response-wise sampling fractions only supported for \
                     classification."
                        .to_string(),
                ));
            }
            if sample_fraction.iter().sum::<f64>() <= 0.0 {
                return Err(ForestError::InvalidArgument(
                    "'sample_fraction' results in zero samples.".to_string(),
                ));
            }
        }
        let sample_fraction = Arc::new(sample_fraction);

        let draw_always_predictor_keys =
            Arc::new(self.make_draw_always_predictor_keys(n_try)?);
        let is_ordered = Arc::new(self.make_is_ordered()?);

        if !self.response_weights.is_empty() && self.tree_type != TreeType::Classification {
            return Err(ForestError::InvalidArgument(
                "'response_weights' only supported for classification.".to_string(),
            ));
        }
        let response_weights = Arc::new(self.response_weights.clone());

        let empty_weights = Arc::new(Vec::new());
        let mut forest_parameters = Vec::with_capacity(self.n_tree);
        for tree_key in 0..self.n_tree {
            let draw_predictor_weights = match self.draw_predictor_weights.len() {
                0 => Arc::clone(&empty_weights),
                1 => Arc::new(self.prepare_draw_predictor_weights(
                    &self.draw_predictor_weights[0],
                    n_try,
                    &draw_always_predictor_keys,
                )?),
                n if n == self.n_tree => Arc::new(self.prepare_draw_predictor_weights(
                    &self.draw_predictor_weights[tree_key],
                    n_try,
                    &draw_always_predictor_keys,
                )?),
                _ => {
                    return Err(ForestError::InvalidArgument(
                        "Size of 'draw_predictor_weights' must be one or the \
                         number of trees."
                            .to_string(),
                    ));
                }
            };
            forest_parameters.push(TrainingParameters::new(
                self.replace,
                Arc::clone(&sample_fraction),
                n_try,
                Arc::clone(&draw_always_predictor_keys),
                draw_predictor_weights,
                Arc::clone(&response_weights),
                self.split_rule,
                min_metric_decrease,
                self.max_depth,
                min_split_n_sample,
                min_leaf_n_sample,
                self.n_random_split,
                self.min_prop,
            )?);
        }

        Ok((forest_parameters, is_ordered))
    }

    fn make_is_ordered(&self) -> Result<Vec<bool>> {
        let mut is_ordered = vec![true; self.predictor_names.len()];
        for name in &self.names_of_unordered {
            match self.predictor_names.iter().position(|n| n == name) {
                Some(key) => is_ordered[key] = false,
                None => {
                    return Err(ForestError::InvalidArgument(format!(
                        "Unordered predictor '{}' not found in predictor names.",
                        name
                    )));
                }
            }
        }
        Ok(is_ordered)
    }

    fn make_draw_always_predictor_keys(&self, n_try: usize) -> Result<Vec<usize>> {
        let mut keys = Vec::with_capacity(self.names_of_always_draw.len());
        for name in &self.names_of_always_draw {
            match self.predictor_names.iter().position(|n| n == name) {
                Some(key) => keys.push(key),
                None => {
                    return Err(ForestError::InvalidArgument(format!(
                        "Always-draw predictor '{}' not found in predictor names.",
                        name
                    )));
                }
            }
        }
        keys.sort_unstable();
        keys.dedup();
        if keys.len() + n_try > self.predictor_names.len() {
            return Err(ForestError::InvalidArgument(
                "Number of always-draw predictors plus 'n_try' cannot exceed the \
                 number of predictors."
                    .to_string(),
            ));
        }
        Ok(keys)
    }

    /// Checks a per-tree candidate-draw weight vector and zeroes the entries
    /// of always-draw predictors (those bypass the weighted draw entirely).
    fn prepare_draw_predictor_weights(
        &self,
        weights: &[f64],
        n_try: usize,
        draw_always_predictor_keys: &[usize],
    ) -> Result<Vec<f64>> {
        let n_predictor = self.predictor_names.len();
        if weights.is_empty() {
            return Ok(Vec::new());
        }
        if weights.len() != n_predictor {
            return Err(ForestError::InvalidArgument(
                "Number of draw-predictor weights not equal to number of \
                 predictors."
                    .to_string(),
            ));
        }

        let mut is_always = vec![false; n_predictor];
        for &key in draw_always_predictor_keys {
            is_always[key] = true;
        }

        let mut prepared = weights.to_vec();
        let mut n_zero_weight = 0;
        for (j, w) in prepared.iter_mut().enumerate() {
            if *w < 0.0 {
                return Err(ForestError::DomainError(
                    "One or more draw-predictor weights not in range [0,Inf)."
                        .to_string(),
                ));
            }
            if *w == 0.0 || is_always[j] {
                *w = 0.0;
                n_zero_weight += 1;
            }
        }
        if n_predictor - n_zero_weight < n_try {
            return Err(ForestError::InvalidArgument(
                "Too many zeros in draw-predictor weights. Need at least n_try \
                 variables to split at."
                    .to_string(),
            ));
        }
        Ok(prepared)
    }
}
