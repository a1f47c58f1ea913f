//! Regression trees: leaf payloads of raw response values, split search via
//! variance reduction, random thresholds, beta log-likelihood, or maximally
//! selected rank statistics.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::{SplitRule, TrainingParameters};
use crate::data::Data;
use crate::errors::{ForestError, Result};
use crate::stats::{
    beta_log_likelihood, maxstat_p_value_lausen92, maxstat_p_value_lausen94, rank,
};
use crate::tree::{level_bit_is_set, partition_as_split_value, Tree, TreeFamily, TreeNodes};
use crate::tree_classification::{midpoint, node_factor_levels, to_partition_mask};

pub type TreeRegression = Tree<Regression>;

/// Family payload and growth scratch for a regression tree.
#[derive(Debug, Default, Clone)]
pub struct Regression {
    /// In-bag response values per leaf.
    leaf_values: BTreeMap<usize, Vec<f64>>,
    /// Cached mean per leaf, populated on demand during bagged prediction.
    leaf_mean: BTreeMap<usize, f64>,

    /* candidate-loop scratch, reused across nodes */
    node_sum: f64,
    node_var: f64,
    /// Rank scores of the node's responses (maxstat only).
    response_scores: Vec<f64>,
    node_n_by_candidate: Vec<usize>,
    node_sum_by_candidate: Vec<f64>,
    /// Raw responses bucketed by candidate offset (beta only).
    response_by_candidate: Vec<Vec<f64>>,
    candidate_values: Vec<f64>,
}

impl Regression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the family from persisted parts.
    pub fn from_parts(
        leaf_values: BTreeMap<usize, Vec<f64>>,
        leaf_mean: BTreeMap<usize, f64>,
    ) -> Self {
        Regression {
            leaf_values,
            leaf_mean,
            ..Self::default()
        }
    }

    pub fn leaf_values(&self) -> &BTreeMap<usize, Vec<f64>> {
        &self.leaf_values
    }

    pub fn leaf_mean(&self) -> &BTreeMap<usize, f64> {
        &self.leaf_mean
    }

    /// Mean of a leaf's in-bag payload, cached after the first call; `None`
    /// for an empty leaf.
    pub fn predict_bagged(&mut self, node_key: usize) -> Option<f64> {
        if let Some(&mean) = self.leaf_mean.get(&node_key) {
            return Some(mean);
        }
        let values = self.leaf_values.get(&node_key)?;
        if values.is_empty() {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        self.leaf_mean.insert(node_key, mean);
        Some(mean)
    }

    /// One response value drawn uniformly from the leaf's in-bag payload.
    pub fn predict_inbag(&self, node_key: usize, rng: &mut StdRng) -> Option<f64> {
        let values = self.leaf_values.get(&node_key)?;
        if values.is_empty() {
            return None;
        }
        Some(values[rng.gen_range(0..values.len())])
    }

    /// Sum responses (or rank scores under maxstat) in the node; maxstat
    /// additionally needs the score variance.
    fn new_node_aggregates(
        &mut self,
        rule: SplitRule,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
    ) {
        self.node_sum = 0.0;
        self.response_scores.clear();
        let range = nodes.start_pos[node_key]..nodes.end_pos[node_key];
        if rule != SplitRule::MaxStat {
            for &sample_key in &sample_keys[range] {
                self.node_sum += data.get_y(sample_key, 0);
            }
        } else {
            let n_sample = nodes.n_sample_node(node_key);
            let responses: Vec<f64> = sample_keys[range]
                .iter()
                .map(|&sample_key| data.get_y(sample_key, 0))
                .collect();
            self.response_scores = rank(&responses);
            self.node_sum = self.response_scores.iter().sum();
            let mean = self.node_sum / n_sample as f64;
            self.node_var = self
                .response_scores
                .iter()
                .map(|score| (score - mean) * (score - mean))
                .sum::<f64>()
                / (n_sample as f64 - 1.0);
        }
    }

    /// Bucket the node's rows by node-local candidate value. Under maxstat
    /// the bucket sums accumulate rank scores; under beta the raw responses
    /// are retained per bucket.
    fn prepare_candidate_loop_via_value(
        &mut self,
        rule: SplitRule,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
    ) {
        let n_candidate_value = self.candidate_values.len();
        self.reset_sum_scratch(n_candidate_value);
        if rule == SplitRule::Beta {
            self.response_by_candidate
                .resize(n_candidate_value, Vec::new());
            for responses in self.response_by_candidate.iter_mut() {
                responses.clear();
            }
        }

        let start = nodes.start_pos[node_key];
        for j in start..nodes.end_pos[node_key] {
            let sample_key = sample_keys[j];
            let response = if rule != SplitRule::MaxStat {
                data.get_y(sample_key, 0)
            } else {
                self.response_scores[j - start]
            };
            let x = data.get_x(sample_key, split_key, false);
            let offset = self
                .candidate_values
                .binary_search_by(|v| v.partial_cmp(&x).unwrap())
                .unwrap_or_else(|o| o);

            self.node_n_by_candidate[offset] += 1;
            self.node_sum_by_candidate[offset] += response;
            if rule == SplitRule::Beta {
                self.response_by_candidate[offset].push(data.get_y(sample_key, 0));
            }
        }
    }

    /// Bucket rows through the precomputed column index (logrank only).
    fn prepare_candidate_loop_via_index(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
        n_candidate_value: usize,
    ) {
        self.reset_sum_scratch(n_candidate_value);
        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            let offset = data.rawget_unique_key(sample_key, split_key, false);
            self.node_n_by_candidate[offset] += 1;
            self.node_sum_by_candidate[offset] += data.get_y(sample_key, 0);
        }
    }

    fn reset_sum_scratch(&mut self, n_candidate_value: usize) {
        if self.node_n_by_candidate.len() < n_candidate_value {
            self.node_n_by_candidate.resize(n_candidate_value, 0);
            self.node_sum_by_candidate.resize(n_candidate_value, 0.0);
        }
        self.node_n_by_candidate[..n_candidate_value]
            .iter_mut()
            .for_each(|c| *c = 0);
        self.node_sum_by_candidate[..n_candidate_value]
            .iter_mut()
            .for_each(|s| *s = 0.0);
    }

    /// Sweep candidate offsets left to right with running left-side totals;
    /// returns the best (decrease, offset) clearing the leaf-size floors.
    fn sweep_candidates(
        &self,
        rule: SplitRule,
        n_sample_node: usize,
        n_candidate_value: usize,
        min_leaf_n_sample: usize,
    ) -> Option<(f64, usize)> {
        if n_candidate_value < 2 {
            return None;
        }
        let mut n_lhs = 0usize;
        let mut sum_lhs = 0.0;
        let mut best: Option<(f64, usize)> = None;

        for j in 0..n_candidate_value - 1 {
            if self.node_n_by_candidate[j] == 0 {
                continue;
            }
            n_lhs += self.node_n_by_candidate[j];
            sum_lhs += self.node_sum_by_candidate[j];
            if n_lhs < min_leaf_n_sample {
                continue;
            }
            let n_rhs = n_sample_node - n_lhs;
            if n_rhs < min_leaf_n_sample {
                break;
            }
            let sum_rhs = self.node_sum - sum_lhs;
            let decrease = match rule {
                SplitRule::LogRank | SplitRule::ExtraTrees => {
                    sum_rhs * sum_rhs / n_rhs as f64 + sum_lhs * sum_lhs / n_lhs as f64
                }
                SplitRule::Beta => {
                    self.beta_decrease_from_buckets(j + 1, n_lhs, n_rhs, sum_lhs, sum_rhs)
                }
                _ => f64::NEG_INFINITY,
            };
            if best.map_or(true, |(best_decrease, _)| decrease > best_decrease) {
                best = Some((decrease, j));
            }
        }
        best
    }

    /// The standardized score statistic maximized over ordered prefixes,
    /// with both children at least `max(min_leaf, n * min_prop - 1)` rows.
    fn sweep_maxstat(
        &self,
        n_sample_node: usize,
        n_candidate_value: usize,
        min_leaf_n_sample: usize,
        min_prop: f64,
    ) -> Option<(f64, usize)> {
        if n_candidate_value < 2 {
            return None;
        }
        let min_split = (n_sample_node as f64 * min_prop - 1.0).max(0.0) as usize;
        let floor = min_leaf_n_sample.max(min_split);

        let n = n_sample_node as f64;
        let mu = self.node_sum / n;

        let mut n_lhs = 0usize;
        let mut sum_lhs = 0.0;
        let mut best: Option<(f64, usize)> = None;

        for j in 0..n_candidate_value - 1 {
            if self.node_n_by_candidate[j] == 0 {
                continue;
            }
            n_lhs += self.node_n_by_candidate[j];
            sum_lhs += self.node_sum_by_candidate[j];
            if n_lhs < floor {
                continue;
            }
            let n_rhs = n_sample_node - n_lhs;
            if n_rhs < floor {
                break;
            }
            let e = n_lhs as f64 * mu;
            let v = n_lhs as f64 * n_rhs as f64 * self.node_var / n;
            let statistic = ((sum_lhs - e) / v.sqrt()).abs();
            if best.map_or(true, |(best_statistic, _)| statistic > best_statistic) {
                best = Some((statistic, j));
            }
        }
        best
    }

    /// Beta log-likelihood of the division at bucket boundary `j_lhs`
    /// (buckets `0..j_lhs` are left). Non-finite results collapse to -inf.
    fn beta_decrease_from_buckets(
        &self,
        j_lhs: usize,
        n_lhs: usize,
        n_rhs: usize,
        sum_lhs: f64,
        sum_rhs: f64,
    ) -> f64 {
        if n_lhs < 2 || n_rhs < 2 {
            return f64::NEG_INFINITY;
        }
        let mu_lhs = sum_lhs / n_lhs as f64;
        let mu_rhs = sum_rhs / n_rhs as f64;

        let mut var_lhs = 0.0;
        for responses in self.response_by_candidate.iter().take(j_lhs) {
            for &response in responses {
                var_lhs += (response - mu_lhs) * (response - mu_lhs);
            }
        }
        var_lhs /= (n_lhs - 1) as f64;

        let mut var_rhs = 0.0;
        for responses in self.response_by_candidate.iter().skip(j_lhs) {
            for &response in responses {
                var_rhs += (response - mu_rhs) * (response - mu_rhs);
            }
        }
        var_rhs /= (n_rhs - 1) as f64;

        if var_lhs <= f64::EPSILON || var_rhs <= f64::EPSILON {
            return f64::NEG_INFINITY;
        }

        let nu_lhs = mu_lhs * (1.0 - mu_lhs) / var_lhs - 1.0;
        let nu_rhs = mu_rhs * (1.0 - mu_rhs) / var_rhs - 1.0;

        let mut beta_lnl = 0.0;
        for responses in self.response_by_candidate.iter().take(j_lhs) {
            for &response in responses {
                beta_lnl += beta_log_likelihood(response, mu_lhs, nu_lhs);
            }
        }
        for responses in self.response_by_candidate.iter().skip(j_lhs) {
            for &response in responses {
                beta_lnl += beta_log_likelihood(response, mu_rhs, nu_rhs);
            }
        }

        if beta_lnl.is_nan() {
            f64::NEG_INFINITY
        } else {
            beta_lnl
        }
    }
}

/// Beta log-likelihood of an explicit left/right division (partition path).
fn beta_decrease_from_slices(lhs: &[f64], rhs: &[f64]) -> f64 {
    if lhs.len() < 2 || rhs.len() < 2 {
        return f64::NEG_INFINITY;
    }
    let mu_lhs = lhs.iter().sum::<f64>() / lhs.len() as f64;
    let mu_rhs = rhs.iter().sum::<f64>() / rhs.len() as f64;
    let var_lhs = lhs.iter().map(|y| (y - mu_lhs) * (y - mu_lhs)).sum::<f64>()
        / (lhs.len() - 1) as f64;
    let var_rhs = rhs.iter().map(|y| (y - mu_rhs) * (y - mu_rhs)).sum::<f64>()
        / (rhs.len() - 1) as f64;
    if var_lhs <= f64::EPSILON || var_rhs <= f64::EPSILON {
        return f64::NEG_INFINITY;
    }
    let nu_lhs = mu_lhs * (1.0 - mu_lhs) / var_lhs - 1.0;
    let nu_rhs = mu_rhs * (1.0 - mu_rhs) / var_rhs - 1.0;

    let beta_lnl = lhs
        .iter()
        .map(|&y| beta_log_likelihood(y, mu_lhs, nu_lhs))
        .sum::<f64>()
        + rhs
            .iter()
            .map(|&y| beta_log_likelihood(y, mu_rhs, nu_rhs))
            .sum::<f64>();

    if beta_lnl.is_nan() {
        f64::NEG_INFINITY
    } else {
        beta_lnl
    }
}

impl TreeRegression {
    /// Bagged prediction for one row: the mean of the leaf the row routes
    /// to.
    pub fn predict_bagged_row(&mut self, data: &Data, sample_key: usize) -> Option<f64> {
        let node_key = self.find_leaf(data, sample_key);
        self.family.predict_bagged(node_key)
    }

    /// In-bag prediction for one row: a uniform draw from the leaf payload.
    pub fn predict_inbag_row(&mut self, data: &Data, sample_key: usize) -> Option<f64> {
        let node_key = self.find_leaf(data, sample_key);
        self.family.predict_inbag(node_key, &mut self.rng)
    }

    /// Terminal node key for one row.
    pub fn predict_node_row(&self, data: &Data, sample_key: usize) -> usize {
        self.find_leaf(data, sample_key)
    }
}

struct BestSplit {
    decrease: f64,
    split_key: usize,
    split_value: f64,
    found: bool,
}

impl TreeFamily for Regression {
    fn new_growth(&mut self, parameters: &TrainingParameters, data: &Data) -> Result<()> {
        match parameters.split_rule {
            SplitRule::Beta => {
                for sample_key in 0..data.n_row() {
                    let y = data.get_y(sample_key, 0);
                    if !(0.0 < y && y < 1.0) {
                        return Err(ForestError::DomainError(
                            "Beta log-likelihood metric requires response in the \
                             open interval (0,1)."
                                .to_string(),
                        ));
                    }
                }
            }
            SplitRule::ExtraTrees | SplitRule::LogRank | SplitRule::MaxStat => {}
            SplitRule::Hellinger => {
                return Err(ForestError::InvalidArgument(
                    "Unsupported split metric for regression.".to_string(),
                ));
            }
        }

        self.leaf_values.clear();
        self.leaf_mean.clear();
        Ok(())
    }

    fn add_terminal_node(
        &mut self,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
    ) {
        let payload = sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
            .iter()
            .map(|&sample_key| data.get_y(sample_key, 0))
            .collect();
        self.leaf_values.insert(node_key, payload);
    }

    fn compare_response(&self, data: &Data, lhs_key: usize, rhs_key: usize) -> bool {
        data.get_y(lhs_key, 0) == data.get_y(rhs_key, 0)
    }

    fn push_best_split(
        &mut self,
        nodes: &mut TreeNodes,
        node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &[usize],
        candidate_keys: &[usize],
        is_ordered: &[bool],
        save_memory: bool,
        rng: &mut StdRng,
    ) -> Result<bool> {
        let mut best = BestSplit {
            decrease: parameters.min_metric_decrease,
            split_key: 0,
            split_value: 0.0,
            found: false,
        };

        self.new_node_aggregates(parameters.split_rule, nodes, node_key, data, sample_keys);

        for &split_key in candidate_keys {
            // Maxstat has no partition statistic; unordered predictors fall
            // through to the ordered sweep.
            let ordered = is_ordered[split_key] || parameters.split_rule == SplitRule::MaxStat;
            if ordered {
                match parameters.split_rule {
                    SplitRule::ExtraTrees => self.best_split_extratrees_ordered(
                        split_key, nodes, node_key, parameters, data, sample_keys, rng,
                        &mut best,
                    )?,
                    SplitRule::MaxStat => self.best_statistic_ordered(
                        split_key, nodes, node_key, parameters, data, sample_keys, &mut best,
                    )?,
                    _ => self.best_split_ordered(
                        split_key, nodes, node_key, parameters, data, sample_keys, save_memory,
                        &mut best,
                    )?,
                }
            } else {
                match parameters.split_rule {
                    SplitRule::ExtraTrees => self.best_split_extratrees_partition(
                        split_key, nodes, node_key, parameters, data, sample_keys, rng,
                        &mut best,
                    )?,
                    _ => self.best_split_partition(
                        split_key, nodes, node_key, parameters, data, sample_keys, &mut best,
                    )?,
                }
            }
        }

        self.response_scores.clear();
        if save_memory {
            self.node_n_by_candidate = Vec::new();
            self.node_sum_by_candidate = Vec::new();
            self.response_by_candidate = Vec::new();
            self.candidate_values = Vec::new();
        }

        if best.found {
            nodes.split_keys[node_key] = best.split_key;
            nodes.split_values[node_key] = best.split_value;
        }
        Ok(best.found)
    }

    fn resample_response_wise(
        &mut self,
        _data: &Data,
        _replace: bool,
        _sample_fraction: &[f64],
        _rng: &mut StdRng,
        _sample_keys: &mut Vec<usize>,
        _inbag_counts: &mut [usize],
    ) -> Result<()> {
        Err(ForestError::InvalidArgument(
            "Response-wise sampling not supported for this tree type.".to_string(),
        ))
    }

    fn finalise_growth(&mut self) {
        self.node_sum = 0.0;
        self.node_var = 0.0;
        self.response_scores = Vec::new();
        self.node_n_by_candidate = Vec::new();
        self.node_sum_by_candidate = Vec::new();
        self.response_by_candidate = Vec::new();
        self.candidate_values = Vec::new();
    }
}

impl Regression {
    /// Exhaustive sweep of one ordered predictor. Beta always walks the
    /// node-local values (its response buckets are node-local); logrank uses
    /// the column index when available.
    #[allow(clippy::too_many_arguments)]
    fn best_split_ordered(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &[usize],
        save_memory: bool,
        best: &mut BestSplit,
    ) -> Result<()> {
        let n_sample_node = nodes.n_sample_node(node_key);
        let via_index = !save_memory
            && data.has_predictor_index()
            && parameters.split_rule != SplitRule::Beta;

        let swept = if via_index {
            let n_candidate_value = data.get_n_unique_value(split_key)?;
            self.prepare_candidate_loop_via_index(
                split_key, nodes, node_key, data, sample_keys, n_candidate_value,
            );
            self.sweep_candidates(
                parameters.split_rule,
                n_sample_node,
                n_candidate_value,
                parameters.min_leaf_n_sample,
            )
        } else {
            self.candidate_values = data.get_all_values(
                sample_keys,
                split_key,
                nodes.start_pos[node_key],
                nodes.end_pos[node_key],
                false,
            )?;
            if self.candidate_values.len() < 2 {
                return Ok(());
            }
            self.prepare_candidate_loop_via_value(
                parameters.split_rule,
                split_key,
                nodes,
                node_key,
                data,
                sample_keys,
            );
            self.sweep_candidates(
                parameters.split_rule,
                n_sample_node,
                self.candidate_values.len(),
                parameters.min_leaf_n_sample,
            )
        };

        if let Some((decrease, j)) = swept {
            if decrease > best.decrease {
                let (value, next_value) = if via_index {
                    // the adjacent value is the next unique value observed in
                    // the node, not the next in the whole column
                    let n_candidate_value = data.get_n_unique_value(split_key)?;
                    let mut j_next = j + 1;
                    while j_next + 1 < n_candidate_value && self.node_n_by_candidate[j_next] == 0
                    {
                        j_next += 1;
                    }
                    (
                        data.get_unique_value(split_key, j)?,
                        data.get_unique_value(split_key, j_next)?,
                    )
                } else {
                    (self.candidate_values[j], self.candidate_values[j + 1])
                };
                best.decrease = decrease;
                best.split_key = split_key;
                best.split_value = midpoint(value, next_value);
                best.found = true;
            }
        }
        Ok(())
    }

    /// Maximally selected rank statistic for one predictor; the candidate
    /// comparison value is `-p_value`.
    #[allow(clippy::too_many_arguments)]
    fn best_statistic_ordered(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &[usize],
        best: &mut BestSplit,
    ) -> Result<()> {
        let n_sample_node = nodes.n_sample_node(node_key);
        self.candidate_values = data.get_all_values(
            sample_keys,
            split_key,
            nodes.start_pos[node_key],
            nodes.end_pos[node_key],
            false,
        )?;
        if self.candidate_values.len() < 2 {
            return Ok(());
        }
        self.prepare_candidate_loop_via_value(
            SplitRule::MaxStat,
            split_key,
            nodes,
            node_key,
            data,
            sample_keys,
        );

        if let Some((statistic, j)) = self.sweep_maxstat(
            n_sample_node,
            self.candidate_values.len(),
            parameters.min_leaf_n_sample,
            parameters.min_prop,
        ) {
            let p_value_lausen92 = maxstat_p_value_lausen92(statistic, parameters.min_prop);
            let p_value_lausen94 = maxstat_p_value_lausen94(
                statistic,
                n_sample_node,
                &self.node_n_by_candidate,
                j + 1,
                parameters.min_prop,
            );
            let p_value = p_value_lausen92.min(p_value_lausen94);
            if -p_value > best.decrease {
                best.decrease = -p_value;
                best.split_key = split_key;
                best.split_value =
                    midpoint(self.candidate_values[j], self.candidate_values[j + 1]);
                best.found = true;
            }
        }
        Ok(())
    }

    /// Extremely-randomized thresholds for one ordered predictor.
    #[allow(clippy::too_many_arguments)]
    fn best_split_extratrees_ordered(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &[usize],
        rng: &mut StdRng,
        best: &mut BestSplit,
    ) -> Result<()> {
        let n_sample_node = nodes.n_sample_node(node_key);
        let (min, max) = data.get_minmax_values(
            sample_keys,
            split_key,
            nodes.start_pos[node_key],
            nodes.end_pos[node_key],
            false,
        )?;
        if min == max {
            return Ok(());
        }

        let mut thresholds: Vec<f64> = (0..parameters.n_random_split)
            .map(|_| rng.gen_range(min..max))
            .collect();
        thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap());
        self.candidate_values = thresholds;

        let n_candidate_value = self.candidate_values.len() + 1;
        self.reset_sum_scratch(n_candidate_value);
        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            let x = data.get_x(sample_key, split_key, false);
            let offset = self.candidate_values.partition_point(|&t| t < x);
            self.node_n_by_candidate[offset] += 1;
            self.node_sum_by_candidate[offset] += data.get_y(sample_key, 0);
        }

        if let Some((decrease, j)) = self.sweep_candidates(
            parameters.split_rule,
            n_sample_node,
            n_candidate_value,
            parameters.min_leaf_n_sample,
        ) {
            if decrease > best.decrease {
                best.decrease = decrease;
                best.split_key = split_key;
                best.split_value = self.candidate_values[j];
                best.found = true;
            }
        }
        Ok(())
    }

    /// Enumerate every nontrivial partition of the node's observed levels.
    #[allow(clippy::too_many_arguments)]
    fn best_split_partition(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &[usize],
        best: &mut BestSplit,
    ) -> Result<()> {
        let factor_levels = node_factor_levels(split_key, nodes, node_key, data, sample_keys)?;
        if factor_levels.len() < 2 {
            return Ok(());
        }
        let n_partition = 1u64 << (factor_levels.len() - 1);
        for j in 1..n_partition {
            let mask = to_partition_mask(j, &factor_levels);
            self.evaluate_partition(
                mask, split_key, nodes, node_key, parameters, data, sample_keys, best,
            );
        }
        Ok(())
    }

    /// Randomly drawn partitions of the node's observed levels.
    #[allow(clippy::too_many_arguments)]
    fn best_split_extratrees_partition(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &[usize],
        rng: &mut StdRng,
        best: &mut BestSplit,
    ) -> Result<()> {
        let factor_levels = node_factor_levels(split_key, nodes, node_key, data, sample_keys)?;
        if factor_levels.len() < 2 {
            return Ok(());
        }
        let n_partition = 1u64 << (factor_levels.len() - 1);
        for _ in 0..parameters.n_random_split {
            let j = rng.gen_range(1..n_partition);
            let mask = to_partition_mask(j, &factor_levels);
            self.evaluate_partition(
                mask, split_key, nodes, node_key, parameters, data, sample_keys, best,
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_partition(
        &mut self,
        mask: u64,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &[usize],
        best: &mut BestSplit,
    ) {
        let n_sample_node = nodes.n_sample_node(node_key);
        let beta = parameters.split_rule == SplitRule::Beta;

        let mut n_lhs = 0usize;
        let mut sum_lhs = 0.0;
        let mut lhs_responses = Vec::new();
        let mut rhs_responses = Vec::new();

        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            let x = data.get_x(sample_key, split_key, false);
            let response = data.get_y(sample_key, 0);
            if !level_bit_is_set(mask, x) {
                n_lhs += 1;
                sum_lhs += response;
                if beta {
                    lhs_responses.push(response);
                }
            } else if beta {
                rhs_responses.push(response);
            }
        }

        if n_lhs < parameters.min_leaf_n_sample {
            return;
        }
        let n_rhs = n_sample_node - n_lhs;
        if n_rhs < parameters.min_leaf_n_sample {
            return;
        }

        let sum_rhs = self.node_sum - sum_lhs;
        let decrease = if beta {
            beta_decrease_from_slices(&lhs_responses, &rhs_responses)
        } else {
            sum_rhs * sum_rhs / n_rhs as f64 + sum_lhs * sum_lhs / n_lhs as f64
        };

        if decrease > best.decrease {
            best.decrease = decrease;
            best.split_key = split_key;
            best.split_value = partition_as_split_value(mask);
            best.found = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForestConfig, TreeType};
    use rand::SeedableRng;

    fn grow_one(
        x: Vec<f64>,
        y: Vec<f64>,
        n_row: usize,
        n_col: usize,
        configure: impl Fn(&mut ForestConfig),
    ) -> (TreeRegression, Data) {
        let mut data = Data::new_dense(x, y, n_row, n_col).unwrap();
        let mut cfg = ForestConfig::new();
        cfg.tree_type = TreeType::Regression;
        cfg.set_predictor_names((0..n_col).map(|j| format!("x{}", j)).collect());
        cfg.n_tree = 1;
        cfg.n_try = n_col;
        cfg.sample_fraction = vec![1.0];
        cfg.replace = false;
        configure(&mut cfg);
        let (parameters, is_ordered) = cfg.expand().unwrap();

        data.new_predictor_index();

        let mut tree = Tree::new(false, n_col, is_ordered, Regression::new());
        tree.seed_gen(42);
        tree.grow(&parameters[0], &data, &[], false).unwrap();
        (tree, data)
    }

    fn step_fixture() -> (Vec<f64>, Vec<f64>) {
        // response steps at x0 = 4.5; x1 carries no signal
        let x = vec![
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, // column 0
            1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, // column 1
        ];
        let y = vec![10.0, 10.0, 10.0, 10.0, 20.0, 20.0, 20.0, 20.0];
        (x, y)
    }

    #[test]
    fn variance_split_finds_the_step() {
        let (x, y) = step_fixture();
        let (tree, _) = grow_one(x, y, 8, 2, |_| {});
        let nodes = tree.nodes();
        assert_eq!(nodes.split_keys[0], 0);
        assert!(nodes.split_values[0] > 4.0 && nodes.split_values[0] < 5.0);
    }

    #[test]
    fn leaf_means_reproduce_the_plateaus() {
        let (x, y) = step_fixture();
        let (mut tree, data) = grow_one(x, y.clone(), 8, 2, |_| {});
        for (sample_key, &observed) in y.iter().enumerate() {
            let leaf = tree.find_leaf(&data, sample_key);
            let mean = tree.family_mut().predict_bagged(leaf).unwrap();
            assert_eq!(mean, observed);
        }
    }

    #[test]
    fn inbag_prediction_draws_from_the_leaf_payload() {
        let (x, y) = step_fixture();
        let (mut tree, data) = grow_one(x, y.clone(), 8, 2, |_| {});
        let mut rng = StdRng::seed_from_u64(11);
        for sample_key in 0..y.len() {
            let leaf = tree.find_leaf(&data, sample_key);
            let value = tree.family().predict_inbag(leaf, &mut rng).unwrap();
            assert!(tree.family().leaf_values()[&leaf].contains(&value));
        }
    }

    #[test]
    fn extratrees_grows_under_fixed_seed() {
        let (x, y) = step_fixture();
        let (tree_a, _) = grow_one(x.clone(), y.clone(), 8, 2, |cfg| {
            cfg.split_rule = SplitRule::ExtraTrees;
            cfg.n_random_split = 3;
        });
        let (tree_b, _) = grow_one(x, y, 8, 2, |cfg| {
            cfg.split_rule = SplitRule::ExtraTrees;
            cfg.n_random_split = 3;
        });
        assert_eq!(tree_a.nodes().split_keys, tree_b.nodes().split_keys);
        assert_eq!(tree_a.nodes().split_values, tree_b.nodes().split_values);
    }

    #[test]
    fn maxstat_splits_strong_signal_and_respects_alpha() {
        // clear two-plateau signal: the rank statistic should clear alpha
        let n = 40;
        let x: Vec<f64> = (0..n).map(|j| j as f64).collect();
        let y: Vec<f64> = (0..n).map(|j| if j < 20 { 1.0 } else { 9.0 }).collect();
        let (tree, _) = grow_one(x, y, n, 1, |cfg| {
            cfg.split_rule = SplitRule::MaxStat;
            cfg.alpha = 0.5;
            cfg.min_prop = 0.1;
        });
        assert!(tree.nodes().len() >= 3);
        let root_value = tree.nodes().split_values[0];
        assert!(root_value > 15.0 && root_value < 25.0);
    }

    #[test]
    fn beta_accepts_unit_interval_response_only() {
        let x: Vec<f64> = (0..12).map(|j| j as f64).collect();
        let good: Vec<f64> = (0..12)
            .map(|j| if j < 6 { 0.2 + 0.01 * j as f64 } else { 0.7 + 0.01 * j as f64 })
            .collect();
        let (tree, _) = grow_one(x.clone(), good, 12, 1, |cfg| {
            cfg.split_rule = SplitRule::Beta;
        });
        assert!(tree.nodes().len() >= 3);

        // out-of-interval response is a domain error
        let bad: Vec<f64> = (0..12).map(|j| j as f64).collect();
        let mut data = Data::new_dense(x, bad, 12, 1).unwrap();
        data.new_predictor_index();
        let mut cfg = ForestConfig::new();
        cfg.tree_type = TreeType::Regression;
        cfg.set_predictor_names(vec!["x0".to_string()]);
        cfg.split_rule = SplitRule::Beta;
        cfg.n_try = 1;
        let (parameters, is_ordered) = cfg.expand().unwrap();
        let mut tree = Tree::new(false, 1, is_ordered, Regression::new());
        tree.seed_gen(1);
        assert!(matches!(
            tree.grow(&parameters[0], &data, &[], false),
            Err(ForestError::DomainError(_))
        ));
    }

    #[test]
    fn response_wise_sampling_is_rejected() {
        let (x, y) = step_fixture();
        let mut data = Data::new_dense(x, y, 8, 2).unwrap();
        data.new_predictor_index();
        let mut cfg = ForestConfig::new();
        cfg.tree_type = TreeType::Regression;
        cfg.set_predictor_names(vec!["x0".to_string(), "x1".to_string()]);
        cfg.n_try = 2;
        let (mut parameters, is_ordered) = cfg.expand().unwrap();
        parameters[0].sample_fraction = std::sync::Arc::new(vec![0.3, 0.3]);

        let mut tree = Tree::new(false, 2, is_ordered, Regression::new());
        tree.seed_gen(1);
        assert!(tree.grow(&parameters[0], &data, &[], false).is_err());
    }

    #[test]
    fn max_depth_one_yields_a_single_split() {
        let (x, y) = step_fixture();
        let (tree, _) = grow_one(x, y, 8, 2, |cfg| {
            cfg.max_depth = 1;
        });
        // exactly one split: a root and two leaves
        assert_eq!(tree.nodes().len(), 3);
        assert!(!tree.nodes().is_leaf(0));
        assert!(tree.nodes().is_leaf(1));
        assert!(tree.nodes().is_leaf(2));
    }

    #[test]
    fn partition_split_on_unordered_predictor() {
        // levels {1,3} carry low response, {2,4} high
        let x = vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0];
        let mut data = Data::new_dense(x, y.clone(), 12, 1).unwrap();
        data.new_predictor_index();

        let mut cfg = ForestConfig::new();
        cfg.tree_type = TreeType::Regression;
        cfg.set_predictor_names(vec!["f".to_string()]);
        cfg.names_of_unordered = vec!["f".to_string()];
        cfg.n_try = 1;
        cfg.sample_fraction = vec![1.0];
        cfg.replace = false;
        let (parameters, is_ordered) = cfg.expand().unwrap();

        let mut tree = Tree::new(false, 1, is_ordered, Regression::new());
        tree.seed_gen(9);
        tree.grow(&parameters[0], &data, &[], false).unwrap();

        let mask = tree.nodes().split_values[0].to_bits();
        assert_eq!(level_bit_is_set(mask, 1.0), level_bit_is_set(mask, 3.0));
        assert_eq!(level_bit_is_set(mask, 2.0), level_bit_is_set(mask, 4.0));
        assert_ne!(level_bit_is_set(mask, 1.0), level_bit_is_set(mask, 2.0));

        for (sample_key, &observed) in y.iter().enumerate() {
            let leaf = tree.find_leaf(&data, sample_key);
            assert_eq!(tree.family_mut().predict_bagged(leaf).unwrap(), observed);
        }
    }
}
