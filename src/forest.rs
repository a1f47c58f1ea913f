//! The forest layer: parallel tree growth with progress reporting and
//! cooperative interruption, out-of-bag error accounting, the three
//! prediction modes, and the merge operator.
//!
//! Training partitions the tree slots into contiguous intervals, one worker
//! thread per interval. Workers own their trees exclusively; the only
//! shared mutable state is the event counter, the first recorded error, and
//! the per-row prediction scratch, all behind one mutex. The main thread
//! runs the progress loop on a condition variable and is the only place the
//! user-interrupt predicate is polled.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{
    ForestConfig, PredictionType, SplitRule, TrainingParameters, TreeType, DEFAULT_N_THREAD,
    STATUS_INTERVAL,
};
use crate::data::Data;
use crate::errors::{ForestError, Result};
use crate::sampling::{hash_seed, most_frequent_value};
use crate::tree::{Tree, TreeFamily};
use crate::tree_classification::{Classification, TreeClassification};
use crate::tree_regression::{Regression, TreeRegression};

/// Result of a prediction call: per-row values, or the per-row terminal
/// node key in every tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    Values(Vec<f64>),
    Nodes(Vec<Vec<usize>>),
}

impl Predictions {
    pub fn values(self) -> Option<Vec<f64>> {
        match self {
            Predictions::Values(values) => Some(values),
            Predictions::Nodes(_) => None,
        }
    }

    pub fn nodes(self) -> Option<Vec<Vec<usize>>> {
        match self {
            Predictions::Values(_) => None,
            Predictions::Nodes(nodes) => Some(nodes),
        }
    }
}

/// Training metadata carried by a trained forest and persisted in the
/// archive envelope.
#[derive(Debug, Clone)]
pub struct ForestMeta {
    pub predictor_names: Vec<String>,
    pub n_try: usize,
    pub split_rule: SplitRule,
    pub max_depth: usize,
    pub min_metric_decrease: f64,
    pub min_split_n_sample: usize,
    pub min_leaf_n_sample: usize,
    pub seed: u64,
    /// NaN when unavailable (merged forests, or no row was out-of-bag).
    pub oob_error: f64,
    /// Present when the split rule is extratrees.
    pub n_random_split: Option<usize>,
}

/// A trained random forest of either family.
#[derive(Debug)]
pub enum Forest {
    Classification(ForestClassification),
    Regression(ForestRegression),
}

#[derive(Debug)]
pub struct ForestClassification {
    pub(crate) save_memory: bool,
    pub(crate) n_predictor: usize,
    pub(crate) is_ordered: Arc<Vec<bool>>,
    pub(crate) trees: Vec<TreeClassification>,
    /// Canonical response values; tree leaf payloads store offsets into
    /// this vector.
    pub(crate) response_values: Vec<f64>,
    pub(crate) meta: ForestMeta,
}

#[derive(Debug)]
pub struct ForestRegression {
    pub(crate) save_memory: bool,
    pub(crate) n_predictor: usize,
    pub(crate) is_ordered: Arc<Vec<bool>>,
    pub(crate) trees: Vec<TreeRegression>,
    pub(crate) meta: ForestMeta,
}

impl Forest {
    /// Train a forest: build the data indices, construct empty trees,
    /// partition them across workers and grow, collecting the out-of-bag
    /// error estimate.
    pub fn plant(
        config: &ForestConfig,
        data: &mut Data,
        case_weights: &[f64],
        interrupt: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<Forest> {
        let (parameters, is_ordered) = config.expand()?;
        let n_predictor = config.predictor_names.len();
        if data.n_col() != n_predictor {
            return Err(ForestError::InvalidArgument(
                "Mismatch between length of 'predictor_names' and 'x'.".to_string(),
            ));
        }
        if !case_weights.is_empty() {
            if case_weights.len() != data.n_row() {
                return Err(ForestError::InvalidArgument(
                    "Case weights must have the same length as number of rows in \
                     data."
                        .to_string(),
                ));
            }
            if parameters[0].response_wise() {
                return Err(ForestError::InvalidArgument(
                    "Combination of 'case_weights' argument and class-wise \
                     sampling not supported."
                        .to_string(),
                ));
            }
        }

        let n_thread = resolve_n_thread(config.n_thread)?;
        let seed = resolve_seed(config.seed);
        let meta = ForestMeta {
            predictor_names: config.predictor_names.clone(),
            n_try: parameters[0].n_try,
            split_rule: config.split_rule,
            max_depth: config.max_depth,
            min_metric_decrease: parameters[0].min_metric_decrease,
            min_split_n_sample: parameters[0].min_split_n_sample,
            min_leaf_n_sample: parameters[0].min_leaf_n_sample,
            seed,
            oob_error: f64::NAN,
            n_random_split: if config.split_rule == SplitRule::ExtraTrees {
                Some(config.n_random_split)
            } else {
                None
            },
        };

        match config.tree_type {
            TreeType::Classification => ForestClassification::plant(
                config.save_memory,
                n_predictor,
                is_ordered,
                &parameters,
                data,
                case_weights,
                seed,
                n_thread,
                interrupt,
                meta,
            )
            .map(Forest::Classification),
            TreeType::Regression => ForestRegression::plant(
                config.save_memory,
                n_predictor,
                is_ordered,
                &parameters,
                data,
                case_weights,
                seed,
                n_thread,
                interrupt,
                meta,
            )
            .map(Forest::Regression),
        }
    }

    /// Predict responses (or terminal nodes) for new rows.
    pub fn predict(
        &mut self,
        data: &Data,
        seed: u64,
        n_thread: usize,
        prediction_type: PredictionType,
        interrupt: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<Predictions> {
        match self {
            Forest::Classification(forest) => {
                forest.predict(data, seed, n_thread, prediction_type, interrupt)
            }
            Forest::Regression(forest) => {
                forest.predict(data, seed, n_thread, prediction_type, interrupt)
            }
        }
    }

    /// Merge two forests of the same family into a new forest; trees from
    /// `y` are remapped onto `x`'s predictor (and response) ordering.
    pub fn merge(x: &Forest, y: &Forest) -> Result<Forest> {
        match (x, y) {
            (Forest::Classification(xf), Forest::Classification(yf)) => {
                ForestClassification::merge(xf, yf).map(Forest::Classification)
            }
            (Forest::Regression(xf), Forest::Regression(yf)) => {
                ForestRegression::merge(xf, yf).map(Forest::Regression)
            }
            _ => Err(ForestError::InvalidArgument(
                "Forest type must match.".to_string(),
            )),
        }
    }

    pub fn tree_type(&self) -> TreeType {
        match self {
            Forest::Classification(_) => TreeType::Classification,
            Forest::Regression(_) => TreeType::Regression,
        }
    }

    pub fn n_tree(&self) -> usize {
        match self {
            Forest::Classification(forest) => forest.trees.len(),
            Forest::Regression(forest) => forest.trees.len(),
        }
    }

    pub fn n_predictor(&self) -> usize {
        match self {
            Forest::Classification(forest) => forest.n_predictor,
            Forest::Regression(forest) => forest.n_predictor,
        }
    }

    pub fn meta(&self) -> &ForestMeta {
        match self {
            Forest::Classification(forest) => &forest.meta,
            Forest::Regression(forest) => &forest.meta,
        }
    }

    pub fn oob_error(&self) -> f64 {
        self.meta().oob_error
    }

    /// Canonical response values (classification only).
    pub fn response_values(&self) -> Option<&[f64]> {
        match self {
            Forest::Classification(forest) => Some(&forest.response_values),
            Forest::Regression(_) => None,
        }
    }
}

impl ForestClassification {
    #[allow(clippy::too_many_arguments)]
    fn plant(
        save_memory: bool,
        n_predictor: usize,
        is_ordered: Arc<Vec<bool>>,
        parameters: &[TrainingParameters],
        data: &mut Data,
        case_weights: &[f64],
        seed: u64,
        n_thread: usize,
        interrupt: Option<&(dyn Fn() -> bool + Sync)>,
        mut meta: ForestMeta,
    ) -> Result<Self> {
        let any_hellinger = parameters
            .iter()
            .any(|p| p.split_rule == SplitRule::Hellinger);
        let response_values = data.new_response_values().to_vec();
        if any_hellinger && response_values.len() != 2 {
            return Err(ForestError::DomainError(
                "Hellinger metric only implemented for binary classification."
                    .to_string(),
            ));
        }

        data.new_response_index(&response_values)?;
        if parameters.iter().any(|p| p.response_wise()) {
            data.new_sample_keys_by_response(response_values.len());
        }
        if !save_memory {
            data.new_predictor_index();
        }

        let n_tree = parameters.len();
        let mut trees: Vec<TreeClassification> = (0..n_tree)
            .map(|tree_key| {
                let mut tree = Tree::new(
                    save_memory,
                    n_predictor,
                    Arc::clone(&is_ordered),
                    Classification::new(),
                );
                tree.seed_gen(hash_seed(seed, tree_key as u64));
                tree
            })
            .collect();

        let oob_predictions: Mutex<Vec<Vec<usize>>> =
            Mutex::new(vec![Vec::new(); data.n_row()]);
        {
            let data: &Data = data;
            run_tree_intervals(
                &mut trees,
                n_thread,
                "Growing trees",
                interrupt,
                |tree_key, tree| {
                    let oob_keys = tree.grow(&parameters[tree_key], data, case_weights, true)?;
                    let mut values = Vec::with_capacity(oob_keys.len());
                    for &sample_key in &oob_keys {
                        if let Some(response_key) = tree.predict_bagged_row(data, sample_key) {
                            values.push((sample_key, response_key));
                        }
                    }
                    let mut guard = oob_predictions.lock().expect("forest mutex poisoned");
                    for (sample_key, response_key) in values {
                        guard[sample_key].push(response_key);
                    }
                    Ok(())
                },
            )?;
        }

        let oob_predictions = oob_predictions.into_inner().expect("forest mutex poisoned");
        let mut gen = StdRng::seed_from_u64(seed);
        meta.oob_error = {
            let response_index = data.get_response_index();
            let mut n_misclassification = 0usize;
            let mut n_prediction = 0usize;
            let mut counts = vec![0.0; response_values.len()];
            for (sample_key, predictions) in oob_predictions.iter().enumerate() {
                if predictions.is_empty() {
                    continue;
                }
                counts.iter_mut().for_each(|c| *c = 0.0);
                for &response_key in predictions {
                    counts[response_key] += 1.0;
                }
                let predicted = most_frequent_value(&counts, &mut gen);
                if predicted != response_index[sample_key] {
                    n_misclassification += 1;
                }
                n_prediction += 1;
            }
            if n_prediction == 0 {
                f64::NAN
            } else {
                n_misclassification as f64 / n_prediction as f64
            }
        };

        data.finalise_sample_keys_by_response();
        data.finalise_response_index();
        if !save_memory {
            data.finalise_predictor_index();
        }

        Ok(ForestClassification {
            save_memory,
            n_predictor,
            is_ordered,
            trees,
            response_values,
            meta,
        })
    }

    fn predict(
        &mut self,
        data: &Data,
        seed: u64,
        n_thread: usize,
        prediction_type: PredictionType,
        interrupt: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<Predictions> {
        let (n_thread, seed) = self.check_prediction_call(data, n_thread, seed)?;
        let n_row = data.n_row();
        let n_tree = self.trees.len();
        for (tree_key, tree) in self.trees.iter_mut().enumerate() {
            tree.seed_gen(hash_seed(seed, tree_key as u64));
        }

        match prediction_type {
            PredictionType::Bagged => {
                let predictions_to_bag: Mutex<Vec<Vec<usize>>> =
                    Mutex::new(vec![Vec::new(); n_row]);
                let response_values = &self.response_values;
                run_tree_intervals(
                    &mut self.trees,
                    n_thread,
                    "Predicting",
                    interrupt,
                    |_, tree| {
                        let mut tree_predictions = Vec::with_capacity(n_row);
                        for sample_key in 0..n_row {
                            if let Some(response_key) = tree.predict_bagged_row(data, sample_key)
                            {
                                tree_predictions.push((sample_key, response_key));
                            }
                        }
                        let mut guard =
                            predictions_to_bag.lock().expect("forest mutex poisoned");
                        for (sample_key, response_key) in tree_predictions {
                            guard[sample_key].push(response_key);
                        }
                        Ok(())
                    },
                )?;

                let predictions_to_bag =
                    predictions_to_bag.into_inner().expect("forest mutex poisoned");
                let mut gen = StdRng::seed_from_u64(seed);
                let mut aggregate = vec![f64::NAN; n_row];
                let mut counts = vec![0.0; response_values.len()];
                for (sample_key, predictions) in predictions_to_bag.iter().enumerate() {
                    if predictions.is_empty() {
                        continue;
                    }
                    counts.iter_mut().for_each(|c| *c = 0.0);
                    for &response_key in predictions {
                        counts[response_key] += 1.0;
                    }
                    aggregate[sample_key] =
                        response_values[most_frequent_value(&counts, &mut gen)];
                }
                Ok(Predictions::Values(aggregate))
            }
            PredictionType::Inbag => {
                let mut gen = StdRng::seed_from_u64(seed);
                let mut prediction_keys_by_tree = vec![Vec::new(); n_tree];
                for sample_key in 0..n_row {
                    prediction_keys_by_tree[gen.gen_range(0..n_tree)].push(sample_key);
                }

                let aggregate: Mutex<Vec<f64>> = Mutex::new(vec![0.0; n_row]);
                let response_values = &self.response_values;
                let prediction_keys_by_tree = &prediction_keys_by_tree;
                run_tree_intervals(
                    &mut self.trees,
                    n_thread,
                    "Predicting",
                    interrupt,
                    |tree_key, tree| {
                        let mut tree_predictions = Vec::new();
                        for &sample_key in &prediction_keys_by_tree[tree_key] {
                            if let Some(response_key) = tree.predict_inbag_row(data, sample_key)
                            {
                                tree_predictions
                                    .push((sample_key, response_values[response_key]));
                            }
                        }
                        let mut guard = aggregate.lock().expect("forest mutex poisoned");
                        for (sample_key, value) in tree_predictions {
                            guard[sample_key] = value;
                        }
                        Ok(())
                    },
                )?;

                Ok(Predictions::Values(
                    aggregate.into_inner().expect("forest mutex poisoned"),
                ))
            }
            PredictionType::Nodes => {
                let prediction_nodes: Mutex<Vec<Vec<usize>>> =
                    Mutex::new(vec![vec![0; n_tree]; n_row]);
                run_tree_intervals(
                    &mut self.trees,
                    n_thread,
                    "Predicting",
                    interrupt,
                    |tree_key, tree| {
                        let mut tree_predictions = Vec::with_capacity(n_row);
                        for sample_key in 0..n_row {
                            tree_predictions.push(tree.predict_node_row(data, sample_key));
                        }
                        let mut guard = prediction_nodes.lock().expect("forest mutex poisoned");
                        for (sample_key, node_key) in tree_predictions.into_iter().enumerate() {
                            guard[sample_key][tree_key] = node_key;
                        }
                        Ok(())
                    },
                )?;

                Ok(Predictions::Nodes(
                    prediction_nodes.into_inner().expect("forest mutex poisoned"),
                ))
            }
        }
    }

    fn merge(x: &ForestClassification, y: &ForestClassification) -> Result<Self> {
        if x.n_predictor != y.n_predictor {
            return Err(ForestError::InvalidArgument(
                "Forest predictor count must match.".to_string(),
            ));
        }
        debug!("Merging classification forests");

        let predictor_map =
            make_key_map(&y.meta.predictor_names, &x.meta.predictor_names)?;
        check_ordering_agreement(&predictor_map, &y.is_ordered, &x.is_ordered)?;
        let response_map = make_key_map(&y.response_values, &x.response_values)?;

        let is_ordered = Arc::new((*x.is_ordered).clone());
        let mut trees = Vec::with_capacity(x.trees.len() + y.trees.len());

        debug!("Copying {} trees from 'x'", x.trees.len());
        for tree in &x.trees {
            trees.push(copy_tree(tree, x.n_predictor, &is_ordered));
        }
        debug!("Copying {} trees from 'y'", y.trees.len());
        for tree in &y.trees {
            let mut copied = copy_tree(tree, x.n_predictor, &is_ordered);
            copied.transform_split_keys(&predictor_map)?;
            copied.family_mut().transform_response_keys(&response_map);
            trees.push(copied);
        }

        let mut meta = x.meta.clone();
        meta.oob_error = f64::NAN;

        Ok(ForestClassification {
            save_memory: x.save_memory,
            n_predictor: x.n_predictor,
            is_ordered,
            trees,
            response_values: x.response_values.clone(),
            meta,
        })
    }

    fn check_prediction_call(
        &self,
        data: &Data,
        n_thread: usize,
        seed: u64,
    ) -> Result<(usize, u64)> {
        check_prediction_call(self.n_predictor, self.trees.len(), data, n_thread, seed)
    }
}

impl ForestRegression {
    #[allow(clippy::too_many_arguments)]
    fn plant(
        save_memory: bool,
        n_predictor: usize,
        is_ordered: Arc<Vec<bool>>,
        parameters: &[TrainingParameters],
        data: &mut Data,
        case_weights: &[f64],
        seed: u64,
        n_thread: usize,
        interrupt: Option<&(dyn Fn() -> bool + Sync)>,
        mut meta: ForestMeta,
    ) -> Result<Self> {
        if !save_memory {
            data.new_predictor_index();
        }

        let n_tree = parameters.len();
        let mut trees: Vec<TreeRegression> = (0..n_tree)
            .map(|tree_key| {
                let mut tree = Tree::new(
                    save_memory,
                    n_predictor,
                    Arc::clone(&is_ordered),
                    Regression::new(),
                );
                tree.seed_gen(hash_seed(seed, tree_key as u64));
                tree
            })
            .collect();

        let oob_predictions: Mutex<Vec<Vec<f64>>> =
            Mutex::new(vec![Vec::new(); data.n_row()]);
        {
            let data: &Data = data;
            run_tree_intervals(
                &mut trees,
                n_thread,
                "Growing trees",
                interrupt,
                |tree_key, tree| {
                    let oob_keys = tree.grow(&parameters[tree_key], data, case_weights, true)?;
                    let mut values = Vec::with_capacity(oob_keys.len());
                    for &sample_key in &oob_keys {
                        if let Some(value) = tree.predict_bagged_row(data, sample_key) {
                            values.push((sample_key, value));
                        }
                    }
                    let mut guard = oob_predictions.lock().expect("forest mutex poisoned");
                    for (sample_key, value) in values {
                        guard[sample_key].push(value);
                    }
                    Ok(())
                },
            )?;
        }

        let oob_predictions = oob_predictions.into_inner().expect("forest mutex poisoned");
        meta.oob_error = {
            let mut sum_of_squares = 0.0;
            let mut n_prediction = 0usize;
            for (sample_key, predictions) in oob_predictions.iter().enumerate() {
                if predictions.is_empty() {
                    continue;
                }
                let mean = predictions.iter().sum::<f64>() / predictions.len() as f64;
                let observed = data.get_y(sample_key, 0);
                sum_of_squares += (mean - observed) * (mean - observed);
                n_prediction += 1;
            }
            if n_prediction == 0 {
                f64::NAN
            } else {
                sum_of_squares / n_prediction as f64
            }
        };

        if !save_memory {
            data.finalise_predictor_index();
        }

        Ok(ForestRegression {
            save_memory,
            n_predictor,
            is_ordered,
            trees,
            meta,
        })
    }

    fn predict(
        &mut self,
        data: &Data,
        seed: u64,
        n_thread: usize,
        prediction_type: PredictionType,
        interrupt: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Result<Predictions> {
        let (n_thread, seed) =
            check_prediction_call(self.n_predictor, self.trees.len(), data, n_thread, seed)?;
        let n_row = data.n_row();
        let n_tree = self.trees.len();
        for (tree_key, tree) in self.trees.iter_mut().enumerate() {
            tree.seed_gen(hash_seed(seed, tree_key as u64));
        }

        match prediction_type {
            PredictionType::Bagged => {
                let predictions_to_bag: Mutex<Vec<Vec<f64>>> =
                    Mutex::new(vec![Vec::new(); n_row]);
                run_tree_intervals(
                    &mut self.trees,
                    n_thread,
                    "Predicting",
                    interrupt,
                    |_, tree| {
                        let mut tree_predictions = Vec::with_capacity(n_row);
                        for sample_key in 0..n_row {
                            if let Some(value) = tree.predict_bagged_row(data, sample_key) {
                                tree_predictions.push((sample_key, value));
                            }
                        }
                        let mut guard =
                            predictions_to_bag.lock().expect("forest mutex poisoned");
                        for (sample_key, value) in tree_predictions {
                            guard[sample_key].push(value);
                        }
                        Ok(())
                    },
                )?;

                let predictions_to_bag =
                    predictions_to_bag.into_inner().expect("forest mutex poisoned");
                let aggregate = predictions_to_bag
                    .into_iter()
                    .map(|predictions| {
                        if predictions.is_empty() {
                            f64::NAN
                        } else {
                            predictions.iter().sum::<f64>() / predictions.len() as f64
                        }
                    })
                    .collect();
                Ok(Predictions::Values(aggregate))
            }
            PredictionType::Inbag => {
                let mut gen = StdRng::seed_from_u64(seed);
                let mut prediction_keys_by_tree = vec![Vec::new(); n_tree];
                for sample_key in 0..n_row {
                    prediction_keys_by_tree[gen.gen_range(0..n_tree)].push(sample_key);
                }

                let aggregate: Mutex<Vec<f64>> = Mutex::new(vec![0.0; n_row]);
                let prediction_keys_by_tree = &prediction_keys_by_tree;
                run_tree_intervals(
                    &mut self.trees,
                    n_thread,
                    "Predicting",
                    interrupt,
                    |tree_key, tree| {
                        let mut tree_predictions = Vec::new();
                        for &sample_key in &prediction_keys_by_tree[tree_key] {
                            if let Some(value) = tree.predict_inbag_row(data, sample_key) {
                                tree_predictions.push((sample_key, value));
                            }
                        }
                        let mut guard = aggregate.lock().expect("forest mutex poisoned");
                        for (sample_key, value) in tree_predictions {
                            guard[sample_key] = value;
                        }
                        Ok(())
                    },
                )?;

                Ok(Predictions::Values(
                    aggregate.into_inner().expect("forest mutex poisoned"),
                ))
            }
            PredictionType::Nodes => {
                let prediction_nodes: Mutex<Vec<Vec<usize>>> =
                    Mutex::new(vec![vec![0; n_tree]; n_row]);
                run_tree_intervals(
                    &mut self.trees,
                    n_thread,
                    "Predicting",
                    interrupt,
                    |tree_key, tree| {
                        let mut tree_predictions = Vec::with_capacity(n_row);
                        for sample_key in 0..n_row {
                            tree_predictions.push(tree.predict_node_row(data, sample_key));
                        }
                        let mut guard = prediction_nodes.lock().expect("forest mutex poisoned");
                        for (sample_key, node_key) in tree_predictions.into_iter().enumerate() {
                            guard[sample_key][tree_key] = node_key;
                        }
                        Ok(())
                    },
                )?;

                Ok(Predictions::Nodes(
                    prediction_nodes.into_inner().expect("forest mutex poisoned"),
                ))
            }
        }
    }

    fn merge(x: &ForestRegression, y: &ForestRegression) -> Result<Self> {
        if x.n_predictor != y.n_predictor {
            return Err(ForestError::InvalidArgument(
                "Forest predictor count must match.".to_string(),
            ));
        }
        debug!("Merging regression forests");

        let predictor_map =
            make_key_map(&y.meta.predictor_names, &x.meta.predictor_names)?;
        check_ordering_agreement(&predictor_map, &y.is_ordered, &x.is_ordered)?;

        let is_ordered = Arc::new((*x.is_ordered).clone());
        let mut trees = Vec::with_capacity(x.trees.len() + y.trees.len());

        debug!("Copying {} trees from 'x'", x.trees.len());
        for tree in &x.trees {
            trees.push(copy_tree(tree, x.n_predictor, &is_ordered));
        }
        debug!("Copying {} trees from 'y'", y.trees.len());
        for tree in &y.trees {
            let mut copied = copy_tree(tree, x.n_predictor, &is_ordered);
            copied.transform_split_keys(&predictor_map)?;
            trees.push(copied);
        }

        let mut meta = x.meta.clone();
        meta.oob_error = f64::NAN;

        Ok(ForestRegression {
            save_memory: x.save_memory,
            n_predictor: x.n_predictor,
            is_ordered,
            trees,
            meta,
        })
    }
}

/// Deep-copy a tree onto a (possibly shared) ordering mask, dropping any
/// growth-time state.
fn copy_tree<F: TreeFamily + Clone>(
    tree: &Tree<F>,
    n_predictor: usize,
    is_ordered: &Arc<Vec<bool>>,
) -> Tree<F> {
    Tree::from_parts(
        tree.save_memory(),
        n_predictor,
        Arc::clone(is_ordered),
        tree.nodes().split_keys.clone(),
        tree.nodes().split_values.clone(),
        tree.nodes().left_children.clone(),
        tree.nodes().right_children.clone(),
        tree.family().clone(),
    )
}

/// Map each value's offset in `from_values` to its offset in `to_values`.
/// Both collections must hold the same values; the map must be injective.
fn make_key_map<T: PartialEq>(
    from_values: &[T],
    to_values: &[T],
) -> Result<HashMap<usize, usize>> {
    if from_values.len() != to_values.len() {
        return Err(ForestError::DomainError(
            "Mapped value must be from same domain.".to_string(),
        ));
    }
    let mut key_map = HashMap::with_capacity(from_values.len());
    for (j_to, to_value) in to_values.iter().enumerate() {
        let j_from = from_values
            .iter()
            .position(|from_value| from_value == to_value)
            .ok_or_else(|| {
                ForestError::DomainError("Mapped value must be from same domain.".to_string())
            })?;
        if key_map.contains_key(&j_from) {
            return Err(ForestError::DomainError(
                "Mapping must be injective.".to_string(),
            ));
        }
        key_map.insert(j_from, j_to);
    }
    Ok(key_map)
}

fn check_ordering_agreement(
    predictor_map: &HashMap<usize, usize>,
    y_is_ordered: &[bool],
    x_is_ordered: &[bool],
) -> Result<()> {
    for (&from, &to) in predictor_map {
        if y_is_ordered[from] != x_is_ordered[to] {
            return Err(ForestError::InvalidArgument(
                "Predictors must have same ordered property.".to_string(),
            ));
        }
    }
    Ok(())
}

fn check_prediction_call(
    n_predictor: usize,
    n_tree: usize,
    data: &Data,
    n_thread: usize,
    seed: u64,
) -> Result<(usize, u64)> {
    if n_tree == 0 {
        return Err(ForestError::InvalidArgument(
            "Cannot predict with an empty forest.".to_string(),
        ));
    }
    if data.n_col() != n_predictor {
        return Err(ForestError::InvalidArgument(
            "Mismatch between number of predictors in forest and 'x'.".to_string(),
        ));
    }
    Ok((resolve_n_thread(n_thread)?, resolve_seed(seed)))
}

fn resolve_n_thread(n_thread: usize) -> Result<usize> {
    let resolved = if n_thread == DEFAULT_N_THREAD {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(0)
    } else {
        n_thread
    };
    if resolved == 0 {
        return Err(ForestError::DomainError(
            "'n_thread' must be positive.".to_string(),
        ));
    }
    Ok(resolved)
}

fn resolve_seed(seed: u64) -> u64 {
    if seed == 0 {
        StdRng::from_entropy().gen()
    } else {
        seed
    }
}

struct ProgressState {
    event_count: usize,
    interrupted: bool,
    error: Option<ForestError>,
}

/// Partition `trees` into contiguous intervals, one worker per interval,
/// and run `worker` over every (tree key, tree) pair. The main thread runs
/// the progress loop; workers notify the condition variable after each
/// tree and stop early when an error or interrupt is recorded.
fn run_tree_intervals<F, W>(
    trees: &mut [Tree<F>],
    n_thread: usize,
    operation: &str,
    interrupt: Option<&(dyn Fn() -> bool + Sync)>,
    worker: W,
) -> Result<()>
where
    F: TreeFamily,
    W: Fn(usize, &mut Tree<F>) -> Result<()> + Sync,
{
    let n_tree = trees.len();
    if n_tree == 0 {
        return Ok(());
    }
    let interval_size = (n_tree + n_thread - 1) / n_thread;
    let state = Mutex::new(ProgressState {
        event_count: 0,
        interrupted: false,
        error: None,
    });
    let condvar = Condvar::new();

    thread::scope(|scope| {
        for (work_index, interval) in trees.chunks_mut(interval_size).enumerate() {
            let state = &state;
            let condvar = &condvar;
            let worker = &worker;
            scope.spawn(move || {
                for (offset, tree) in interval.iter_mut().enumerate() {
                    {
                        let guard = state.lock().expect("forest mutex poisoned");
                        if guard.interrupted || guard.error.is_some() {
                            break;
                        }
                    }
                    let result = worker(work_index * interval_size + offset, tree);
                    let mut guard = state.lock().expect("forest mutex poisoned");
                    if let Err(error) = result {
                        if guard.error.is_none() {
                            guard.error = Some(error);
                        }
                    }
                    guard.event_count += 1;
                    condvar.notify_all();
                }
                condvar.notify_all();
            });
        }
        show_progress(&state, &condvar, n_tree, operation, interrupt);
    });

    let mut state = state.into_inner().expect("forest mutex poisoned");
    if let Some(error) = state.error.take() {
        return Err(error);
    }
    if state.interrupted {
        return Err(ForestError::Cancelled);
    }
    Ok(())
}

/// Wait on worker notifications, polling the user-interrupt predicate and
/// emitting a progress line at most every [`STATUS_INTERVAL`] seconds.
///
/// [`STATUS_INTERVAL`]: ../config/constant.STATUS_INTERVAL.html
fn show_progress(
    state: &Mutex<ProgressState>,
    condvar: &Condvar,
    max_events: usize,
    operation: &str,
    interrupt: Option<&(dyn Fn() -> bool + Sync)>,
) {
    let t_start = Instant::now();
    let mut t_last = Instant::now();
    let mut guard = state.lock().expect("forest mutex poisoned");

    loop {
        if let Some(user_interrupt) = interrupt {
            if user_interrupt() {
                guard.interrupted = true;
                break;
            }
        }
        if guard.event_count >= max_events || guard.error.is_some() || guard.interrupted {
            break;
        }
        let (reacquired, _) = condvar
            .wait_timeout(guard, Duration::from_millis(200))
            .expect("forest mutex poisoned");
        guard = reacquired;

        if guard.event_count > 0 && t_last.elapsed().as_secs_f64() > STATUS_INTERVAL {
            let proportion = guard.event_count as f64 / max_events as f64;
            let remain = t_start.elapsed().as_secs_f64() * (1.0 / proportion - 1.0);
            info!(
                "{} Progress: {}%. Estimated remaining time: {}.",
                operation,
                (100.0 * proportion).round(),
                format_hms(remain)
            );
            t_last = Instant::now();
        }
    }
}

fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification_config(n_col: usize) -> ForestConfig {
        let mut cfg = ForestConfig::new();
        cfg.tree_type = TreeType::Classification;
        cfg.set_predictor_names((0..n_col).map(|j| format!("x{}", j)).collect());
        cfg.n_tree = 5;
        cfg.set_seed(42);
        cfg.set_n_thread(2);
        cfg
    }

    fn separable_data() -> Data {
        let x = vec![
            0.1, 0.2, 0.3, 0.4, 5.1, 5.2, 5.3, 5.4, // column 0
            1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0, // column 1
        ];
        let y = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        Data::new_dense(x, y, 8, 2).unwrap()
    }

    #[test]
    fn plant_produces_oob_error_in_unit_interval() {
        let cfg = classification_config(2);
        let mut data = separable_data();
        let forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();
        assert_eq!(forest.n_tree(), 5);
        let oob = forest.oob_error();
        assert!(oob.is_nan() || (0.0..=1.0).contains(&oob));
    }

    #[test]
    fn training_is_deterministic_in_thread_count() {
        let mut cfg = classification_config(2);
        cfg.set_n_thread(1);
        let mut data_a = separable_data();
        let forest_a = Forest::plant(&cfg, &mut data_a, &[], None).unwrap();

        cfg.set_n_thread(3);
        let mut data_b = separable_data();
        let forest_b = Forest::plant(&cfg, &mut data_b, &[], None).unwrap();

        let (Forest::Classification(a), Forest::Classification(b)) = (&forest_a, &forest_b)
        else {
            panic!("expected classification forests");
        };
        for (tree_a, tree_b) in a.trees.iter().zip(&b.trees) {
            assert_eq!(tree_a.nodes().split_keys, tree_b.nodes().split_keys);
            assert_eq!(tree_a.nodes().split_values, tree_b.nodes().split_values);
        }
    }

    #[test]
    fn bagged_prediction_recovers_separable_classes() {
        let mut cfg = classification_config(2);
        cfg.replace = false;
        cfg.sample_fraction = vec![1.0];
        let mut data = separable_data();
        let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();
        let values = forest
            .predict(&data, 123, 2, PredictionType::Bagged, None)
            .unwrap()
            .values()
            .unwrap();
        let y = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(values, y);
    }

    #[test]
    fn nodes_prediction_has_forest_shape() {
        let cfg = classification_config(2);
        let mut data = separable_data();
        let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();
        let nodes = forest
            .predict(&data, 123, 2, PredictionType::Nodes, None)
            .unwrap()
            .nodes()
            .unwrap();
        assert_eq!(nodes.len(), 8);
        assert!(nodes.iter().all(|row| row.len() == 5));
    }

    #[test]
    fn inbag_prediction_draws_observed_values() {
        let cfg = classification_config(2);
        let mut data = separable_data();
        let mut forest = Forest::plant(&cfg, &mut data, &[], None).unwrap();
        let values = forest
            .predict(&data, 7, 1, PredictionType::Inbag, None)
            .unwrap()
            .values()
            .unwrap();
        assert!(values.iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[test]
    fn case_weights_with_stratified_sampling_is_rejected() {
        let mut cfg = classification_config(2);
        cfg.sample_fraction = vec![0.3, 0.3];
        let mut data = separable_data();
        let weights = vec![1.0; 8];
        let err = Forest::plant(&cfg, &mut data, &weights, None).unwrap_err();
        assert_eq!(
            format!("{}", err),
            "Invalid argument: Combination of 'case_weights' argument and \
             class-wise sampling not supported."
        );
    }

    #[test]
    fn interrupt_cancels_training() {
        let cfg = classification_config(2);
        let mut data = separable_data();
        let always = || true;
        let result = Forest::plant(&cfg, &mut data, &[], Some(&always));
        assert!(matches!(result, Err(ForestError::Cancelled)));
    }

    #[test]
    fn merge_concatenates_trees() {
        let cfg = classification_config(2);
        let mut data = separable_data();
        let forest_a = Forest::plant(&cfg, &mut data, &[], None).unwrap();
        let mut cfg_b = classification_config(2);
        cfg_b.set_seed(43);
        let forest_b = Forest::plant(&cfg_b, &mut data, &[], None).unwrap();

        let merged = Forest::merge(&forest_a, &forest_b).unwrap();
        assert_eq!(merged.n_tree(), 10);
        assert!(merged.oob_error().is_nan());
        assert_eq!(
            merged.response_values().unwrap(),
            forest_a.response_values().unwrap()
        );
    }

    #[test]
    fn merge_of_mixed_families_is_rejected() {
        let cfg = classification_config(2);
        let mut data = separable_data();
        let forest_a = Forest::plant(&cfg, &mut data, &[], None).unwrap();

        let mut cfg_r = ForestConfig::new();
        cfg_r.tree_type = TreeType::Regression;
        cfg_r.set_predictor_names(vec!["x0".to_string(), "x1".to_string()]);
        cfg_r.n_tree = 2;
        cfg_r.set_seed(1);
        cfg_r.set_n_thread(1);
        let mut data_r = separable_data();
        let forest_b = Forest::plant(&cfg_r, &mut data_r, &[], None).unwrap();

        assert!(Forest::merge(&forest_a, &forest_b).is_err());
    }

    #[test]
    fn key_map_requires_injective_same_domain() {
        let map = make_key_map(&["b", "a"], &["a", "b"]).unwrap();
        assert_eq!(map[&0], 1);
        assert_eq!(map[&1], 0);
        assert!(make_key_map(&["a", "a"], &["a", "b"]).is_err());
        assert!(make_key_map(&["a", "c"], &["a", "b"]).is_err());
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(3725.0), "01:02:05");
    }
}
