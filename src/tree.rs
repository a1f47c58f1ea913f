//! Tree growth: the family-independent node expansion state machine.
//!
//! A [`Tree`] owns flat node arrays (children are always appended with
//! strictly greater keys, node 0 is the root) and drives a breadth-first
//! split loop: resample the in-bag rows, then repeatedly try to split open
//! nodes, partitioning the tree-private `sample_keys` buffer in place so a
//! node's rows always form one contiguous range. Everything specific to a
//! tree family (leaf payloads, split scoring) lives behind [`TreeFamily`].
//!
//! [`Tree`]: struct.Tree.html
//! [`TreeFamily`]: trait.TreeFamily.html

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::TrainingParameters;
use crate::data::Data;
use crate::errors::{ForestError, Result};
use crate::sampling;

/// Flat node storage shared by both tree families.
///
/// `start_pos`/`end_pos` delimit each node's rows within the growth-time
/// `sample_keys` buffer; they are meaningless after growth completes.
#[derive(Debug, Clone, Default)]
pub struct TreeNodes {
    pub split_keys: Vec<usize>,
    pub split_values: Vec<f64>,
    pub left_children: Vec<usize>,
    pub right_children: Vec<usize>,
    pub start_pos: Vec<usize>,
    pub end_pos: Vec<usize>,
}

impl TreeNodes {
    pub fn len(&self) -> usize {
        self.split_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.split_keys.is_empty()
    }

    pub fn push_back_empty_node(&mut self) {
        self.split_keys.push(0);
        self.split_values.push(0.0);
        self.left_children.push(0);
        self.right_children.push(0);
        self.start_pos.push(0);
        self.end_pos.push(0);
    }

    pub fn n_sample_node(&self, node_key: usize) -> usize {
        self.end_pos[node_key] - self.start_pos[node_key]
    }

    /// A leaf has no children; child key zero can never be a real child
    /// because children are appended after the root.
    pub fn is_leaf(&self, node_key: usize) -> bool {
        self.left_children[node_key] == 0 && self.right_children[node_key] == 0
    }
}

/// Whether a predictor value belongs to the left child of a split.
///
/// Ordered predictors compare against the threshold. Unordered partitioning
/// predictors reinterpret the split value's bits as a 64-bit level mask:
/// bit `b` set means level `b + 1` goes right.
pub fn goes_left(x: f64, split_value: f64, ordered: bool) -> bool {
    if ordered {
        x <= split_value
    } else {
        !level_bit_is_set(split_value.to_bits(), x)
    }
}

/// Test the mask bit for a factor level observed as the real value `x`.
/// Levels outside `[1, 64]` cannot be encoded and fall to the left.
pub fn level_bit_is_set(mask: u64, x: f64) -> bool {
    let bit = (x - 1.0).floor();
    if !(0.0..64.0).contains(&bit) {
        return false;
    }
    mask & (1u64 << (bit as u32)) != 0
}

/// Encode a set of factor levels (left out of the mask) as a split value.
pub fn partition_as_split_value(mask: u64) -> f64 {
    f64::from_bits(mask)
}

/// Family-specific hooks driven by the growth state machine.
pub trait TreeFamily: Send {
    /// Prepare leaf containers and per-response scratch; validates the
    /// split rule against the family.
    fn new_growth(&mut self, parameters: &TrainingParameters, data: &Data) -> Result<()>;

    /// Copy the rows of `nodes[node_key]` into the terminal payload.
    fn add_terminal_node(
        &mut self,
        nodes: &TreeNodes,
        node_key: usize,
        data: &Data,
        sample_keys: &[usize],
    );

    /// Whether two rows carry the same response (purity test).
    fn compare_response(&self, data: &Data, lhs_key: usize, rhs_key: usize) -> bool;

    /// Search the candidate predictors for the best split of `node_key`.
    /// On success writes `split_keys[node_key]`/`split_values[node_key]`
    /// and returns true.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<bool>;

    /// Stratified bootstrap; only classification supports this.
    fn resample_response_wise(
        &mut self,
        data: &Data,
        replace: bool,
        sample_fraction: &[f64],
        rng: &mut StdRng,
        sample_keys: &mut Vec<usize>,
        inbag_counts: &mut [usize],
    ) -> Result<()>;

    /// Release any growth-time scratch.
    fn finalise_growth(&mut self);
}

/// One tree of a random forest, generic over the family payload.
#[derive(Debug, Clone)]
pub struct Tree<F: TreeFamily> {
    save_memory: bool,
    n_predictor: usize,
    is_ordered: Arc<Vec<bool>>,
    pub(crate) nodes: TreeNodes,
    pub(crate) rng: StdRng,
    pub(crate) family: F,
}

impl<F: TreeFamily> Tree<F> {
    pub fn new(save_memory: bool, n_predictor: usize, is_ordered: Arc<Vec<bool>>, family: F) -> Self {
        Tree {
            save_memory,
            n_predictor,
            is_ordered,
            nodes: TreeNodes::default(),
            rng: StdRng::seed_from_u64(0),
            family,
        }
    }

    /// Reconstruct a tree from persisted or merged parts.
    pub fn from_parts(
        save_memory: bool,
        n_predictor: usize,
        is_ordered: Arc<Vec<bool>>,
        split_keys: Vec<usize>,
        split_values: Vec<f64>,
        left_children: Vec<usize>,
        right_children: Vec<usize>,
        family: F,
    ) -> Self {
        let n_node = split_keys.len();
        Tree {
            save_memory,
            n_predictor,
            is_ordered,
            nodes: TreeNodes {
                split_keys,
                split_values,
                left_children,
                right_children,
                start_pos: vec![0; n_node],
                end_pos: vec![0; n_node],
            },
            rng: StdRng::seed_from_u64(0),
            family,
        }
    }

    pub fn seed_gen(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn save_memory(&self) -> bool {
        self.save_memory
    }

    pub fn n_predictor(&self) -> usize {
        self.n_predictor
    }

    pub fn is_ordered(&self) -> &Arc<Vec<bool>> {
        &self.is_ordered
    }

    pub fn nodes(&self) -> &TreeNodes {
        &self.nodes
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn family_mut(&mut self) -> &mut F {
        &mut self.family
    }

    /// Grow (train) this tree, returning the out-of-bag row keys when
    /// `compute_oob_error` is set.
    pub fn grow(
        &mut self,
        parameters: &TrainingParameters,
        data: &Data,
        case_weights: &[f64],
        compute_oob_error: bool,
    ) -> Result<Vec<usize>> {
        let n_sample = data.n_row();
        let mut sample_keys: Vec<usize> = Vec::new();
        let mut oob_keys: Vec<usize> = Vec::new();

        if !self.nodes.is_empty() {
            return Err(ForestError::InvalidArgument(
                "Expected to start with empty tree.".to_string(),
            ));
        }
        if parameters.n_try > self.n_predictor {
            return Err(ForestError::InvalidArgument(
                "'n_try' can not be larger than number of predictors (columns)."
                    .to_string(),
            ));
        }

        self.family.new_growth(parameters, data)?;
        self.nodes.push_back_empty_node();

        let response_wise = parameters.response_wise();
        let weighted = !case_weights.is_empty();
        if weighted && response_wise {
            return Err(ForestError::InvalidArgument(
                "Combination of 'case_weights' argument and class-wise sampling \
                 not supported."
                    .to_string(),
            ));
        }

        if weighted {
            self.resample_weighted(
                n_sample,
                parameters.replace,
                &parameters.sample_fraction,
                case_weights,
                compute_oob_error,
                &mut sample_keys,
                &mut oob_keys,
            )?;
        } else if response_wise {
            self.resample_response_wise(
                data,
                parameters.replace,
                &parameters.sample_fraction,
                compute_oob_error,
                &mut sample_keys,
                &mut oob_keys,
            )?;
        } else {
            self.resample_unweighted(
                n_sample,
                parameters.replace,
                &parameters.sample_fraction,
                compute_oob_error,
                &mut sample_keys,
                &mut oob_keys,
            );
        }

        self.nodes.start_pos[0] = 0;
        self.nodes.end_pos[0] = sample_keys.len();

        // Iteratively split nodes in appearance order; depth advances when
        // the loop crosses the most recent left-sibling boundary.
        let mut depth = 0usize;
        let mut last_left_node_key = 0usize;
        let mut n_open_node = 1usize;
        let mut node_key = 0usize;
        while n_open_node != 0 {
            let did_split = self.split_node(
                node_key,
                depth,
                last_left_node_key,
                parameters,
                data,
                &mut sample_keys,
            )?;
            if !did_split {
                n_open_node -= 1;
            } else {
                n_open_node += 1;
                if node_key >= last_left_node_key {
                    last_left_node_key = self.nodes.len() - 2;
                    depth += 1;
                }
            }
            node_key += 1;
        }

        self.family.finalise_growth();

        Ok(oob_keys)
    }

    /// Remap every node's split predictor through `key_map` (forest merge).
    pub fn transform_split_keys(&mut self, key_map: &HashMap<usize, usize>) -> Result<()> {
        if key_map.len() != self.n_predictor {
            return Err(ForestError::InvalidArgument(
                "Require a mapping for all existing predictor-keys.".to_string(),
            ));
        }
        for j in 0..self.n_predictor {
            match key_map.get(&j) {
                Some(&mapped) if mapped < self.n_predictor => {}
                _ => {
                    return Err(ForestError::DomainError(
                        "Invalid predictor-key value in mapping.".to_string(),
                    ));
                }
            }
        }
        for key in self.nodes.split_keys.iter_mut() {
            *key = key_map[key];
        }
        Ok(())
    }

    /// Route a row to its terminal node using the growth-time branching
    /// rule.
    pub fn find_leaf(&self, data: &Data, sample_key: usize) -> usize {
        let mut node_key = 0;
        while !self.nodes.is_leaf(node_key) {
            let split_key = self.nodes.split_keys[node_key];
            let x = data.get_x(sample_key, split_key, false);
            node_key = if goes_left(x, self.nodes.split_values[node_key], self.is_ordered[split_key])
            {
                self.nodes.left_children[node_key]
            } else {
                self.nodes.right_children[node_key]
            };
        }
        node_key
    }

    fn split_node(
        &mut self,
        node_key: usize,
        depth: usize,
        last_left_node_key: usize,
        parameters: &TrainingParameters,
        data: &Data,
        sample_keys: &mut Vec<usize>,
    ) -> Result<bool> {
        let n_sample_node = self.nodes.n_sample_node(node_key);

        // Depth only counts at the level boundary.
        let too_deep = node_key >= last_left_node_key
            && parameters.max_depth != 0
            && depth == parameters.max_depth;

        if n_sample_node <= parameters.min_split_n_sample || too_deep {
            self.family
                .add_terminal_node(&self.nodes, node_key, data, sample_keys);
            return Ok(false);
        }

        {
            let start_key = sample_keys[self.nodes.start_pos[node_key]];
            let range = self.nodes.start_pos[node_key]..self.nodes.end_pos[node_key];
            let pure = sample_keys[range]
                .iter()
                .all(|&test_key| self.family.compare_response(data, start_key, test_key));
            if pure {
                self.family
                    .add_terminal_node(&self.nodes, node_key, data, sample_keys);
                return Ok(false);
            }
        }

        let candidate_keys = self.draw_candidates(parameters)?;
        let split_found = self.family.push_best_split(
            &mut self.nodes,
            node_key,
            parameters,
            data,
            sample_keys,
            &candidate_keys,
            &self.is_ordered,
            self.save_memory,
            &mut self.rng,
        )?;
        if !split_found {
            self.family
                .add_terminal_node(&self.nodes, node_key, data, sample_keys);
            return Ok(false);
        }

        let split_key = self.nodes.split_keys[node_key];
        let split_value = self.nodes.split_values[node_key];
        let ordered = self.is_ordered[split_key];

        let left_key = self.nodes.len();
        self.nodes.left_children[node_key] = left_key;
        self.nodes.push_back_empty_node();
        self.nodes.start_pos[left_key] = self.nodes.start_pos[node_key];

        let right_key = self.nodes.len();
        self.nodes.right_children[node_key] = right_key;
        self.nodes.push_back_empty_node();
        self.nodes.start_pos[right_key] = self.nodes.end_pos[node_key];

        // Partially sort the node's keys in place: left-of-split keys end up
        // in the prefix, right-of-split keys in the suffix.
        let mut j = self.nodes.start_pos[node_key];
        while j < self.nodes.start_pos[right_key] {
            let key = sample_keys[j];
            if goes_left(data.get_x(key, split_key, false), split_value, ordered) {
                j += 1;
            } else {
                self.nodes.start_pos[right_key] -= 1;
                sample_keys.swap(j, self.nodes.start_pos[right_key]);
            }
        }

        self.nodes.end_pos[left_key] = self.nodes.start_pos[right_key];
        self.nodes.end_pos[right_key] = self.nodes.end_pos[node_key];

        Ok(true)
    }

    /// Draw `n_try` candidate predictors without replacement and union the
    /// always-draw keys (the latter bypass the weight distribution).
    fn draw_candidates(&mut self, parameters: &TrainingParameters) -> Result<Vec<usize>> {
        let mut result = Vec::new();

        if parameters.draw_predictor_weights.is_empty() {
            sampling::draw_no_replace(
                parameters.n_try,
                self.n_predictor,
                &parameters.draw_always_predictor_keys,
                &mut self.rng,
                &mut result,
            );
        } else {
            let mut counts = vec![0; self.n_predictor];
            sampling::draw_no_replace_weighted(
                parameters.n_try,
                &parameters.draw_predictor_weights,
                &mut self.rng,
                &mut result,
                &mut counts,
            )?;
        }

        result.extend(parameters.draw_always_predictor_keys.iter().copied());
        Ok(result)
    }

    fn resample_unweighted(
        &mut self,
        n_sample: usize,
        replace: bool,
        sample_fraction: &[f64],
        get_oob_keys: bool,
        sample_keys: &mut Vec<usize>,
        oob_keys: &mut Vec<usize>,
    ) {
        let n_sample_inbag = (n_sample as f64 * sample_fraction[0]) as usize;

        if replace {
            let mut inbag_counts = vec![0usize; n_sample];
            sampling::draw_replace(
                n_sample_inbag,
                n_sample,
                &mut self.rng,
                sample_keys,
                &mut inbag_counts,
            );
            if get_oob_keys {
                // Reserves a little more than the expected out-of-bag count
                // without ever exceeding n_sample.
                let fraction = n_sample_inbag as f64 / n_sample as f64;
                oob_keys.reserve((n_sample as f64 * (-fraction + 0.15).exp()) as usize);
                for (j, &count) in inbag_counts.iter().enumerate() {
                    if count == 0 {
                        oob_keys.push(j);
                    }
                }
            }
        } else {
            sample_keys.extend(0..n_sample);
            sample_keys.shuffle(&mut self.rng);
            if get_oob_keys {
                oob_keys.reserve(n_sample - n_sample_inbag);
                oob_keys.extend_from_slice(&sample_keys[n_sample_inbag..]);
            }
            sample_keys.truncate(n_sample_inbag);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resample_weighted(
        &mut self,
        n_sample: usize,
        replace: bool,
        sample_fraction: &[f64],
        weights: &[f64],
        get_oob_keys: bool,
        sample_keys: &mut Vec<usize>,
        oob_keys: &mut Vec<usize>,
    ) -> Result<()> {
        if weights.len() != n_sample {
            return Err(ForestError::InvalidArgument(
                "Case weights must have the same length as number of rows in \
                 data."
                    .to_string(),
            ));
        }
        let n_sample_inbag = (n_sample as f64 * sample_fraction[0]) as usize;
        let mut inbag_counts = vec![0usize; n_sample];

        if replace {
            sampling::draw_replace_weighted(
                n_sample_inbag,
                weights,
                &mut self.rng,
                sample_keys,
                &mut inbag_counts,
            )?;
        } else {
            sampling::draw_no_replace_weighted(
                n_sample_inbag,
                weights,
                &mut self.rng,
                sample_keys,
                &mut inbag_counts,
            )?;
        }

        if get_oob_keys {
            let fraction = n_sample_inbag as f64 / n_sample as f64;
            oob_keys.reserve(if replace {
                (n_sample as f64 * (-fraction + 0.15).exp()) as usize
            } else {
                n_sample - n_sample_inbag
            });
            for (j, &count) in inbag_counts.iter().enumerate() {
                if count == 0 {
                    oob_keys.push(j);
                }
            }
        }
        Ok(())
    }

    fn resample_response_wise(
        &mut self,
        data: &Data,
        replace: bool,
        sample_fraction: &[f64],
        get_oob_keys: bool,
        sample_keys: &mut Vec<usize>,
        oob_keys: &mut Vec<usize>,
    ) -> Result<()> {
        let n_sample = data.n_row();
        let mut inbag_counts = vec![0usize; n_sample];

        self.family.resample_response_wise(
            data,
            replace,
            sample_fraction,
            &mut self.rng,
            sample_keys,
            &mut inbag_counts,
        )?;

        let n_sample_inbag = sample_keys.len();
        if get_oob_keys {
            let fraction = n_sample_inbag as f64 / n_sample as f64;
            oob_keys.reserve(if replace {
                (n_sample as f64 * (-fraction + 0.15).exp()) as usize
            } else {
                n_sample - n_sample_inbag
            });
            for (j, &count) in inbag_counts.iter().enumerate() {
                if count == 0 {
                    oob_keys.push(j);
                }
            }
        }
        Ok(())
    }
}
