//! Classification trees: leaf payloads of response keys, split search via
//! weighted Gini or Hellinger distance, extremely-randomized variants of
//! both ordered and partition splits.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::{SplitRule, TrainingParameters};
use crate::data::Data;
use crate::errors::{ForestError, Result};
use crate::sampling;
use crate::tree::{level_bit_is_set, partition_as_split_value, Tree, TreeFamily, TreeNodes};

pub type TreeClassification = Tree<Classification>;

/// Family payload and growth scratch for a classification tree.
#[derive(Debug, Default, Clone)]
pub struct Classification {
    /// Weight for each response key; all ones unless the caller supplies
    /// class weights.
    response_weights: Vec<f64>,
    n_response_key: usize,

    /// In-bag response keys per leaf.
    leaf_keys: BTreeMap<usize, Vec<usize>>,
    /// Cached plurality key per leaf, populated on demand during bagged
    /// prediction.
    leaf_most_frequent: BTreeMap<usize, usize>,

    /* candidate-loop scratch, reused across nodes */
    node_n_by_response: Vec<usize>,
    node_n_by_candidate: Vec<usize>,
    node_n_by_candidate_and_response: Vec<usize>,
    candidate_values: Vec<f64>,
}

impl Classification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the family from persisted parts.
    pub fn from_parts(
        response_weights: Vec<f64>,
        leaf_keys: BTreeMap<usize, Vec<usize>>,
        leaf_most_frequent: BTreeMap<usize, usize>,
    ) -> Self {
        let n_response_key = response_weights.len();
        Classification {
            response_weights,
            n_response_key,
            leaf_keys,
            leaf_most_frequent,
            ..Self::default()
        }
    }

    pub fn response_weights(&self) -> &[f64] {
        &self.response_weights
    }

    pub fn leaf_keys(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.leaf_keys
    }

    pub fn leaf_most_frequent(&self) -> &BTreeMap<usize, usize> {
        &self.leaf_most_frequent
    }

    /// Plurality response key of a leaf's in-bag payload, cached after the
    /// first call; `None` for an empty leaf.
    pub fn predict_bagged(&mut self, node_key: usize, rng: &mut StdRng) -> Option<usize> {
        if let Some(&key) = self.leaf_most_frequent.get(&node_key) {
            return Some(key);
        }
        let keys = self.leaf_keys.get(&node_key)?;
        if keys.is_empty() {
            return None;
        }
        let mut counts = vec![0.0; self.n_response_key.max(self.response_weights.len())];
        for &response_key in keys {
            counts[response_key] += self.response_weights[response_key];
        }
        let most_frequent = sampling::most_frequent_value(&counts, rng);
        self.leaf_most_frequent.insert(node_key, most_frequent);
        Some(most_frequent)
    }

    /// One response key drawn uniformly from the leaf's in-bag payload.
    pub fn predict_inbag(&self, node_key: usize, rng: &mut StdRng) -> Option<usize> {
        let keys = self.leaf_keys.get(&node_key)?;
        if keys.is_empty() {
            return None;
        }
        Some(keys[rng.gen_range(0..keys.len())])
    }

    /// Remap every stored response key through `key_map` (forest merge).
    pub fn transform_response_keys(&mut self, key_map: &HashMap<usize, usize>) {
        let existing_weights = self.response_weights.clone();
        for (&from, &to) in key_map {
            self.response_weights[to] = existing_weights[from];
        }
        for keys in self.leaf_keys.values_mut() {
            for key in keys.iter_mut() {
                *key = key_map[key];
            }
        }
        for key in self.leaf_most_frequent.values_mut() {
            *key = key_map[key];
        }
    }

    /// Weighted-Gini or Hellinger score of a tentative left/right division.
    fn evaluate_decrease(
        &self,
        rule: SplitRule,
        node_n_by_response_lhs: &[usize],
        n_lhs: usize,
        n_rhs: usize,
    ) -> f64 {
        match rule {
            SplitRule::LogRank | SplitRule::ExtraTrees => {
                let mut sum_lhs_sq = 0.0;
                let mut sum_rhs_sq = 0.0;
                for k in 0..self.n_response_key {
                    let lhs_k = node_n_by_response_lhs[k] as f64;
                    let rhs_k = (self.node_n_by_response[k] - node_n_by_response_lhs[k]) as f64;
                    sum_lhs_sq += self.response_weights[k] * lhs_k * lhs_k;
                    sum_rhs_sq += self.response_weights[k] * rhs_k * rhs_k;
                }
                sum_rhs_sq / n_rhs as f64 + sum_lhs_sq / n_lhs as f64
            }
            SplitRule::Hellinger => {
                let tpr = (self.node_n_by_response[1] - node_n_by_response_lhs[1]) as f64
                    / self.node_n_by_response[1] as f64;
                let fpr = (self.node_n_by_response[0] - node_n_by_response_lhs[0]) as f64
                    / self.node_n_by_response[0] as f64;
                let a1 = tpr.sqrt() - fpr.sqrt();
                let a2 = (1.0 - tpr).sqrt() - (1.0 - fpr).sqrt();
                (a1 * a1 + a2 * a2).sqrt()
            }
            _ => f64::NEG_INFINITY,
        }
    }

    fn new_node_aggregates(
        &mut self,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
    ) {
        let response_keys = data.get_response_index();
        self.node_n_by_response.clear();
        self.node_n_by_response.resize(self.n_response_key, 0);
        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            self.node_n_by_response[response_keys[sample_key]] += 1;
        }
    }

    /// Count rows per candidate value (and per value-and-response) through
    /// the precomputed column index.
    fn prepare_candidate_loop_via_index(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
        n_candidate_value: usize,
    ) {
        let response_keys = data.get_response_index();
        self.reset_count_scratch(n_candidate_value);

        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            let offset = data.rawget_unique_key(sample_key, split_key, false);
            let response_key = response_keys[sample_key];
            self.node_n_by_candidate[offset] += 1;
            self.node_n_by_candidate_and_response
                [offset * self.n_response_key + response_key] += 1;
        }
    }

    /// Count rows against `self.candidate_values` by binary search; the
    /// slower path used when the column index was not built.
    fn prepare_candidate_loop_via_value(
        &mut self,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
    ) {
        let response_keys = data.get_response_index();
        let n_candidate_value = self.candidate_values.len();
        self.reset_count_scratch(n_candidate_value);

        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            let x = data.get_x(sample_key, split_key, false);
            let offset = self
                .candidate_values
                .binary_search_by(|v| v.partial_cmp(&x).unwrap())
                .unwrap_or_else(|o| o);
            let response_key = response_keys[sample_key];
            self.node_n_by_candidate[offset] += 1;
            self.node_n_by_candidate_and_response
                [offset * self.n_response_key + response_key] += 1;
        }
    }

    fn reset_count_scratch(&mut self, n_candidate_value: usize) {
        let n_alloc = n_candidate_value * self.n_response_key;
        if self.node_n_by_candidate_and_response.len() < n_alloc {
            self.node_n_by_candidate_and_response.resize(n_alloc, 0);
        }
        self.node_n_by_candidate_and_response[..n_alloc]
            .iter_mut()
            .for_each(|c| *c = 0);
        if self.node_n_by_candidate.len() < n_candidate_value {
            self.node_n_by_candidate.resize(n_candidate_value, 0);
        }
        self.node_n_by_candidate[..n_candidate_value]
            .iter_mut()
            .for_each(|c| *c = 0);
    }

    /// Sweep candidate offsets left to right, maintaining running left-side
    /// counts; returns the best (decrease, offset) satisfying the leaf-size
    /// constraints.
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
        let mut node_n_by_response_lhs = vec![0usize; self.n_response_key];
        let mut best: Option<(f64, usize)> = None;

        for j in 0..n_candidate_value - 1 {
            if self.node_n_by_candidate[j] == 0 {
                continue;
            }
            n_lhs += self.node_n_by_candidate[j];
            for k in 0..self.n_response_key {
                node_n_by_response_lhs[k] +=
                    self.node_n_by_candidate_and_response[j * self.n_response_key + k];
            }
            if n_lhs < min_leaf_n_sample {
                continue;
            }
            let n_rhs = n_sample_node - n_lhs;
            if n_rhs < min_leaf_n_sample {
                break;
            }
            let decrease = self.evaluate_decrease(rule, &node_n_by_response_lhs, n_lhs, n_rhs);
            if best.map_or(true, |(best_decrease, _)| decrease > best_decrease) {
                best = Some((decrease, j));
            }
        }
        best
    }

    /// Count the left side of one partition mask over the node's rows.
    fn partition_counts(
        &self,
        mask: u64,
        split_key: usize,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
        node_n_by_response_lhs: &mut [usize],
    ) -> usize {
        node_n_by_response_lhs.iter_mut().for_each(|c| *c = 0);
        let response_keys = data.get_response_index();
        let mut n_lhs = 0;
        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            let x = data.get_x(sample_key, split_key, false);
            if !level_bit_is_set(mask, x) {
                n_lhs += 1;
                node_n_by_response_lhs[response_keys[sample_key]] += 1;
            }
        }
        n_lhs
    }
}

impl TreeClassification {
    /// Bagged prediction for one row: the plurality response key of the
    /// leaf the row routes to.
    pub fn predict_bagged_row(&mut self, data: &Data, sample_key: usize) -> Option<usize> {
        let node_key = self.find_leaf(data, sample_key);
        self.family.predict_bagged(node_key, &mut self.rng)
    }

    /// In-bag prediction for one row: a uniform draw from the leaf payload.
    pub fn predict_inbag_row(&mut self, data: &Data, sample_key: usize) -> Option<usize> {
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

impl TreeFamily for Classification {
    fn new_growth(&mut self, parameters: &TrainingParameters, data: &Data) -> Result<()> {
        let n_response_key_data = data.get_response_values().len();

        match parameters.split_rule {
            SplitRule::Hellinger => {
                if n_response_key_data != 2 {
                    return Err(ForestError::DomainError(
                        "Cannot use Hellinger metric on non-binary data.".to_string(),
                    ));
                }
            }
            SplitRule::LogRank | SplitRule::ExtraTrees => {}
            SplitRule::MaxStat | SplitRule::Beta => {
                return Err(ForestError::InvalidArgument(
                    "Unsupported split metric for classification.".to_string(),
                ));
            }
        }

        if !parameters.response_weights.is_empty()
            && parameters.response_weights.len() != n_response_key_data
        {
            return Err(ForestError::InvalidArgument(
                "Number of response weights does not match number of observed \
                 response values."
                    .to_string(),
            ));
        }

        self.n_response_key = n_response_key_data;
        self.response_weights = if parameters.response_weights.is_empty() {
            vec![1.0; n_response_key_data]
        } else {
            parameters.response_weights.to_vec()
        };

        self.node_n_by_response = vec![0; self.n_response_key];
        self.leaf_keys.clear();
        self.leaf_most_frequent.clear();
        Ok(())
    }

    fn add_terminal_node(
        &mut self,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
    ) {
        let response_keys = data.get_response_index();
        let payload = sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
            .iter()
            .map(|&sample_key| response_keys[sample_key])
            .collect();
        self.leaf_keys.insert(node_key, payload);
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

        self.new_node_aggregates(nodes, node_key, data, sample_keys);

        for &split_key in candidate_keys {
            if is_ordered[split_key] {
                match parameters.split_rule {
                    SplitRule::ExtraTrees => self.best_split_extratrees_ordered(
                        split_key, nodes, node_key, parameters, data, sample_keys, rng,
                        &mut best,
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

        if save_memory {
            self.node_n_by_candidate = Vec::new();
            self.node_n_by_candidate_and_response = Vec::new();
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
        data: &Data,
        replace: bool,
        sample_fraction: &[f64],
        rng: &mut StdRng,
        sample_keys: &mut Vec<usize>,
        inbag_counts: &mut [usize],
    ) -> Result<()> {
        let n_sample = data.n_row();
        let sample_keys_by_response = data.get_sample_keys_by_response();
        if sample_fraction.len() != sample_keys_by_response.len() {
            return Err(ForestError::InvalidArgument(
                "Number of response-wise sampling fractions does not match number \
                 of response values."
                    .to_string(),
            ));
        }

        let mut cum_start = 0.0;
        for (j, &fraction) in sample_fraction.iter().enumerate() {
            let cum_end = cum_start + fraction;
            let n_inbag_j = (n_sample as f64 * (cum_end - cum_start)).round() as usize;
            let n_sample_j = sample_keys_by_response[j].len();
            cum_start = cum_end;

            if n_inbag_j == 0 {
                continue;
            }
            if n_sample_j == 0 || (!replace && n_inbag_j > n_sample_j) {
                return Err(ForestError::InvalidArgument(format!(
                    "Not enough samples in class {} ({} requested, {} observed).",
                    data.get_response_values()[j],
                    n_inbag_j,
                    n_sample_j
                )));
            }

            if replace {
                for _ in 0..n_inbag_j {
                    let draw = sample_keys_by_response[j][rng.gen_range(0..n_sample_j)];
                    sample_keys.push(draw);
                    inbag_counts[draw] += 1;
                }
            } else {
                let mut sample_j: Vec<usize> = sample_keys_by_response[j].clone();
                use rand::seq::SliceRandom;
                sample_j.shuffle(rng);
                for &draw in &sample_j[..n_inbag_j] {
                    sample_keys.push(draw);
                    inbag_counts[draw] += 1;
                }
            }
        }
        Ok(())
    }

    fn finalise_growth(&mut self) {
        self.node_n_by_response = Vec::new();
        self.node_n_by_candidate = Vec::new();
        self.node_n_by_candidate_and_response = Vec::new();
        self.candidate_values = Vec::new();
    }
}

impl Classification {
    /// Exhaustive sweep of one ordered predictor's candidate values.
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
        let via_index = !save_memory && data.has_predictor_index();

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
            self.prepare_candidate_loop_via_value(split_key, nodes, node_key, data, sample_keys);
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
        // bucket rows by the first threshold >= x; prefix sums up to j give
        // the left side of threshold j
        self.reset_count_scratch(n_candidate_value);
        let response_keys = data.get_response_index();
        for &sample_key in
            &sample_keys[nodes.start_pos[node_key]..nodes.end_pos[node_key]]
        {
            let x = data.get_x(sample_key, split_key, false);
            let offset = self.candidate_values.partition_point(|&t| t < x);
            self.node_n_by_candidate[offset] += 1;
            self.node_n_by_candidate_and_response
                [offset * self.n_response_key + response_keys[sample_key]] += 1;
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
        let n_sample_node = nodes.n_sample_node(node_key);
        let factor_levels = node_factor_levels(split_key, nodes, node_key, data, sample_keys)?;
        if factor_levels.len() < 2 {
            return Ok(());
        }

        let n_partition = 1u64 << (factor_levels.len() - 1);
        let mut node_n_by_response_lhs = vec![0usize; self.n_response_key];
        for j in 1..n_partition {
            let mask = to_partition_mask(j, &factor_levels);
            let n_lhs = self.partition_counts(
                mask,
                split_key,
                nodes,
                node_key,
                data,
                sample_keys,
                &mut node_n_by_response_lhs,
            );
            if n_lhs < parameters.min_leaf_n_sample {
                continue;
            }
            let n_rhs = n_sample_node - n_lhs;
            if n_rhs < parameters.min_leaf_n_sample {
                continue;
            }
            let decrease = self.evaluate_decrease(
                parameters.split_rule,
                &node_n_by_response_lhs,
                n_lhs,
                n_rhs,
            );
            if decrease > best.decrease {
                best.decrease = decrease;
                best.split_key = split_key;
                best.split_value = partition_as_split_value(mask);
                best.found = true;
            }
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
        let n_sample_node = nodes.n_sample_node(node_key);
        let factor_levels = node_factor_levels(split_key, nodes, node_key, data, sample_keys)?;
        if factor_levels.len() < 2 {
            return Ok(());
        }

        let n_partition = 1u64 << (factor_levels.len() - 1);
        let mut node_n_by_response_lhs = vec![0usize; self.n_response_key];
        for _ in 0..parameters.n_random_split {
            let j = rng.gen_range(1..n_partition);
            let mask = to_partition_mask(j, &factor_levels);
            let n_lhs = self.partition_counts(
                mask,
                split_key,
                nodes,
                node_key,
                data,
                sample_keys,
                &mut node_n_by_response_lhs,
            );
            if n_lhs < parameters.min_leaf_n_sample {
                continue;
            }
            let n_rhs = n_sample_node - n_lhs;
            if n_rhs < parameters.min_leaf_n_sample {
                continue;
            }
            let decrease = self.evaluate_decrease(
                SplitRule::LogRank,
                &node_n_by_response_lhs,
                n_lhs,
                n_rhs,
            );
            if decrease > best.decrease {
                best.decrease = decrease;
                best.split_key = split_key;
                best.split_value = partition_as_split_value(mask);
                best.found = true;
            }
        }
        Ok(())
    }
}

/// Midpoint threshold between two adjacent candidate values; falls back to
/// the smaller value when the average rounds up to the larger one.
pub(crate) fn midpoint(value: f64, next_value: f64) -> f64 {
    let mid = (value + next_value) / 2.0;
    if mid == next_value {
        value
    } else {
        mid
    }
}

/// The factor levels observed in a node, checked against the 64-bit
/// partition encoding.
pub(crate) fn node_factor_levels(
    split_key: usize,
    nodes: &TreeNodes,
    node_key: usize,
    data: &Data,
    sample_keys: &[usize],
) -> Result<Vec<f64>> {
    let levels = data.get_all_values(
        sample_keys,
        split_key,
        nodes.start_pos[node_key],
        nodes.end_pos[node_key],
        false,
    )?;
    for &level in &levels {
        if !(1.0..=64.0).contains(&level) || level.fract() != 0.0 {
            return Err(ForestError::DomainError(
                "Unordered factor levels must be integers in [1, 64] to be \
                 partition-encoded."
                    .to_string(),
            ));
        }
    }
    if levels.len() > 64 {
        return Err(ForestError::DomainError(
            "Too many factor levels for partition splitting.".to_string(),
        ));
    }
    Ok(levels)
}

/// Expand a subset index over the node's levels into the persisted 64-bit
/// level mask (bit `level - 1` set means the level goes right).
pub(crate) fn to_partition_mask(subset: u64, factor_levels: &[f64]) -> u64 {
    let mut mask = 0u64;
    for (k, &level) in factor_levels.iter().enumerate() {
        if subset & (1u64 << k) != 0 {
            mask |= 1u64 << ((level as u64) - 1);
        }
    }
    mask
}
