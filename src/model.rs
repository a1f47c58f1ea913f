//! Binary serialization of trained forests.
//!
//! The archive is a versioned little-endian stream: an outer envelope of
//! training metadata, the forest body (`save_memory`, predictor count and
//! ordering mask, the trees, and for classification the canonical response
//! values), with every tree prefixed by its family tag as a string. The
//! stream is portable across processes; nothing about the training data is
//! retained.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use log::debug;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::config::{SplitRule, TreeType};
use crate::errors::{ForestError, Result};
use crate::forest::{Forest, ForestClassification, ForestMeta, ForestRegression};
use crate::tree::Tree;
use crate::tree_classification::{Classification, TreeClassification};
use crate::tree_regression::{Regression, TreeRegression};

/// Version prefix of the archive; bumped on any schema change.
pub const FORMAT_VERSION: u32 = 1;

const TAG_CLASSIFICATION: &str = "classification";
const TAG_REGRESSION: &str = "regression";

#[derive(Serialize, Deserialize)]
struct ForestArchive {
    format_version: u32,
    tree_type: TreeType,
    predictor_names: Vec<String>,
    n_try: u64,
    split_rule: SplitRule,
    max_depth: u64,
    min_metric_decrease: f64,
    min_split_n_sample: u64,
    min_leaf_n_sample: u64,
    seed: u64,
    oob_error: f64,
    n_random_split: Option<u64>,
    body: ForestBody,
}

#[derive(Serialize, Deserialize)]
struct ForestBody {
    save_memory: bool,
    n_predictor: u64,
    is_ordered: Vec<bool>,
    trees: Vec<TreeArchive>,
    /// Classification forests append their canonical response values.
    response_values: Option<Vec<f64>>,
}

enum TreeArchive {
    Classification(TreeClassificationArchive),
    Regression(TreeRegressionArchive),
}

#[derive(Serialize, Deserialize)]
struct TreeClassificationArchive {
    save_memory: bool,
    n_predictor: u64,
    is_ordered: Vec<bool>,
    split_keys: Vec<u64>,
    split_values: Vec<f64>,
    child_node_keys: (Vec<u64>, Vec<u64>),
    response_weights: Vec<f64>,
    leaf_keys: BTreeMap<u64, Vec<u64>>,
    leaf_most_frequent: BTreeMap<u64, u64>,
}

#[derive(Serialize, Deserialize)]
struct TreeRegressionArchive {
    save_memory: bool,
    n_predictor: u64,
    is_ordered: Vec<bool>,
    split_keys: Vec<u64>,
    split_values: Vec<f64>,
    child_node_keys: (Vec<u64>, Vec<u64>),
    leaf_values: BTreeMap<u64, Vec<f64>>,
    leaf_mean: BTreeMap<u64, f64>,
}

/* Each tree record is a (family tag, payload) pair so readers can pick the
 * payload type before decoding it. */

impl Serialize for TreeArchive {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        match self {
            TreeArchive::Classification(tree) => {
                tuple.serialize_element(TAG_CLASSIFICATION)?;
                tuple.serialize_element(tree)?;
            }
            TreeArchive::Regression(tree) => {
                tuple.serialize_element(TAG_REGRESSION)?;
                tuple.serialize_element(tree)?;
            }
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for TreeArchive {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TreeArchiveVisitor;

        impl<'de> Visitor<'de> for TreeArchiveVisitor {
            type Value = TreeArchive;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a family-tagged tree record")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<TreeArchive, A::Error> {
                let tag: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                match tag.as_str() {
                    TAG_CLASSIFICATION => {
                        let tree: TreeClassificationArchive = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        Ok(TreeArchive::Classification(tree))
                    }
                    TAG_REGRESSION => {
                        let tree: TreeRegressionArchive = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        Ok(TreeArchive::Regression(tree))
                    }
                    _ => Err(de::Error::custom(format!(
                        "unknown tree family tag '{}'",
                        tag
                    ))),
                }
            }
        }

        deserializer.deserialize_tuple(2, TreeArchiveVisitor)
    }
}

impl Forest {
    /// Serialize this forest into `writer` as a versioned binary archive.
    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        debug!("Serializing {} forest", crate::config::tree_type_string(self.tree_type()));
        let archive = to_archive(self);
        bincode::serialize_into(writer, &archive)?;
        Ok(())
    }

    /// Read a forest back from a binary archive produced by [`save`].
    ///
    /// [`save`]: enum.Forest.html#method.save
    pub fn load<R: Read>(reader: R) -> Result<Forest> {
        let archive: ForestArchive = bincode::deserialize_from(reader)?;
        debug!("Deserializing {} forest", crate::config::tree_type_string(archive.tree_type));
        from_archive(archive)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.save(&mut bytes)?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Forest> {
        Forest::load(bytes)
    }
}

fn to_archive(forest: &Forest) -> ForestArchive {
    let meta = forest.meta();
    let (body, tree_type) = match forest {
        Forest::Classification(forest) => (
            ForestBody {
                save_memory: forest.save_memory,
                n_predictor: forest.n_predictor as u64,
                is_ordered: (*forest.is_ordered).clone(),
                trees: forest
                    .trees
                    .iter()
                    .map(|tree| TreeArchive::Classification(classification_to_archive(tree)))
                    .collect(),
                response_values: Some(forest.response_values.clone()),
            },
            TreeType::Classification,
        ),
        Forest::Regression(forest) => (
            ForestBody {
                save_memory: forest.save_memory,
                n_predictor: forest.n_predictor as u64,
                is_ordered: (*forest.is_ordered).clone(),
                trees: forest
                    .trees
                    .iter()
                    .map(|tree| TreeArchive::Regression(regression_to_archive(tree)))
                    .collect(),
                response_values: None,
            },
            TreeType::Regression,
        ),
    };

    ForestArchive {
        format_version: FORMAT_VERSION,
        tree_type,
        predictor_names: meta.predictor_names.clone(),
        n_try: meta.n_try as u64,
        split_rule: meta.split_rule,
        max_depth: meta.max_depth as u64,
        min_metric_decrease: meta.min_metric_decrease,
        min_split_n_sample: meta.min_split_n_sample as u64,
        min_leaf_n_sample: meta.min_leaf_n_sample as u64,
        seed: meta.seed,
        oob_error: meta.oob_error,
        n_random_split: meta.n_random_split.map(|n| n as u64),
        body,
    }
}

fn from_archive(archive: ForestArchive) -> Result<Forest> {
    if archive.format_version != FORMAT_VERSION {
        return Err(ForestError::Serialization(format!(
            "unsupported archive version {} (expected {})",
            archive.format_version, FORMAT_VERSION
        )));
    }

    let n_predictor = archive.body.n_predictor as usize;
    if archive.body.is_ordered.len() != n_predictor {
        return Err(ForestError::Serialization(
            "ordering mask length does not match predictor count".to_string(),
        ));
    }
    if archive.predictor_names.len() != n_predictor {
        return Err(ForestError::Serialization(
            "predictor name list length does not match predictor count".to_string(),
        ));
    }

    let meta = ForestMeta {
        predictor_names: archive.predictor_names,
        n_try: archive.n_try as usize,
        split_rule: archive.split_rule,
        max_depth: archive.max_depth as usize,
        min_metric_decrease: archive.min_metric_decrease,
        min_split_n_sample: archive.min_split_n_sample as usize,
        min_leaf_n_sample: archive.min_leaf_n_sample as usize,
        seed: archive.seed,
        oob_error: archive.oob_error,
        n_random_split: archive.n_random_split.map(|n| n as usize),
    };

    let save_memory = archive.body.save_memory;
    let is_ordered = Arc::new(archive.body.is_ordered);

    match archive.tree_type {
        TreeType::Classification => {
            let response_values = archive.body.response_values.ok_or_else(|| {
                ForestError::Serialization(
                    "classification archive is missing response values".to_string(),
                )
            })?;
            let mut trees = Vec::with_capacity(archive.body.trees.len());
            for tree in archive.body.trees {
                match tree {
                    TreeArchive::Classification(tree) => {
                        trees.push(classification_from_archive(tree, &is_ordered)?);
                    }
                    TreeArchive::Regression(_) => {
                        return Err(ForestError::Serialization(
                            "regression tree inside classification forest".to_string(),
                        ));
                    }
                }
            }
            Ok(Forest::Classification(ForestClassification {
                save_memory,
                n_predictor,
                is_ordered,
                trees,
                response_values,
                meta,
            }))
        }
        TreeType::Regression => {
            let mut trees = Vec::with_capacity(archive.body.trees.len());
            for tree in archive.body.trees {
                match tree {
                    TreeArchive::Regression(tree) => {
                        trees.push(regression_from_archive(tree, &is_ordered)?);
                    }
                    TreeArchive::Classification(_) => {
                        return Err(ForestError::Serialization(
                            "classification tree inside regression forest".to_string(),
                        ));
                    }
                }
            }
            Ok(Forest::Regression(ForestRegression {
                save_memory,
                n_predictor,
                is_ordered,
                trees,
                meta,
            }))
        }
    }
}

fn classification_to_archive(tree: &TreeClassification) -> TreeClassificationArchive {
    TreeClassificationArchive {
        save_memory: tree.save_memory(),
        n_predictor: tree.n_predictor() as u64,
        is_ordered: (**tree.is_ordered()).clone(),
        split_keys: as_u64(&tree.nodes().split_keys),
        split_values: tree.nodes().split_values.clone(),
        child_node_keys: (
            as_u64(&tree.nodes().left_children),
            as_u64(&tree.nodes().right_children),
        ),
        response_weights: tree.family().response_weights().to_vec(),
        leaf_keys: tree
            .family()
            .leaf_keys()
            .iter()
            .map(|(&node_key, keys)| (node_key as u64, as_u64(keys)))
            .collect(),
        leaf_most_frequent: tree
            .family()
            .leaf_most_frequent()
            .iter()
            .map(|(&node_key, &response_key)| (node_key as u64, response_key as u64))
            .collect(),
    }
}

fn classification_from_archive(
    archive: TreeClassificationArchive,
    is_ordered: &Arc<Vec<bool>>,
) -> Result<TreeClassification> {
    check_tree_shape(
        archive.n_predictor,
        is_ordered.len(),
        archive.split_keys.len(),
        archive.split_values.len(),
        archive.child_node_keys.0.len(),
        archive.child_node_keys.1.len(),
    )?;
    let family = Classification::from_parts(
        archive.response_weights,
        archive
            .leaf_keys
            .into_iter()
            .map(|(node_key, keys)| (node_key as usize, as_usize(&keys)))
            .collect(),
        archive
            .leaf_most_frequent
            .into_iter()
            .map(|(node_key, response_key)| (node_key as usize, response_key as usize))
            .collect(),
    );
    Ok(Tree::from_parts(
        archive.save_memory,
        archive.n_predictor as usize,
        Arc::clone(is_ordered),
        as_usize(&archive.split_keys),
        archive.split_values,
        as_usize(&archive.child_node_keys.0),
        as_usize(&archive.child_node_keys.1),
        family,
    ))
}

fn regression_to_archive(tree: &TreeRegression) -> TreeRegressionArchive {
    TreeRegressionArchive {
        save_memory: tree.save_memory(),
        n_predictor: tree.n_predictor() as u64,
        is_ordered: (**tree.is_ordered()).clone(),
        split_keys: as_u64(&tree.nodes().split_keys),
        split_values: tree.nodes().split_values.clone(),
        child_node_keys: (
            as_u64(&tree.nodes().left_children),
            as_u64(&tree.nodes().right_children),
        ),
        leaf_values: tree
            .family()
            .leaf_values()
            .iter()
            .map(|(&node_key, values)| (node_key as u64, values.clone()))
            .collect(),
        leaf_mean: tree
            .family()
            .leaf_mean()
            .iter()
            .map(|(&node_key, &mean)| (node_key as u64, mean))
            .collect(),
    }
}

fn regression_from_archive(
    archive: TreeRegressionArchive,
    is_ordered: &Arc<Vec<bool>>,
) -> Result<TreeRegression> {
    check_tree_shape(
        archive.n_predictor,
        is_ordered.len(),
        archive.split_keys.len(),
        archive.split_values.len(),
        archive.child_node_keys.0.len(),
        archive.child_node_keys.1.len(),
    )?;
    let family = Regression::from_parts(
        archive
            .leaf_values
            .into_iter()
            .map(|(node_key, values)| (node_key as usize, values))
            .collect(),
        archive
            .leaf_mean
            .into_iter()
            .map(|(node_key, mean)| (node_key as usize, mean))
            .collect(),
    );
    Ok(Tree::from_parts(
        archive.save_memory,
        archive.n_predictor as usize,
        Arc::clone(is_ordered),
        as_usize(&archive.split_keys),
        archive.split_values,
        as_usize(&archive.child_node_keys.0),
        as_usize(&archive.child_node_keys.1),
        family,
    ))
}

fn check_tree_shape(
    n_predictor: u64,
    forest_n_predictor: usize,
    n_split_keys: usize,
    n_split_values: usize,
    n_left: usize,
    n_right: usize,
) -> Result<()> {
    if n_predictor as usize != forest_n_predictor {
        return Err(ForestError::Serialization(
            "tree predictor count does not match forest".to_string(),
        ));
    }
    if n_split_keys != n_split_values || n_split_keys != n_left || n_split_keys != n_right {
        return Err(ForestError::Serialization(
            "tree node arrays have inconsistent lengths".to_string(),
        ));
    }
    Ok(())
}

fn as_u64(keys: &[usize]) -> Vec<u64> {
    keys.iter().map(|&k| k as u64).collect()
}

fn as_usize(keys: &[u64]) -> Vec<usize> {
    keys.iter().map(|&k| k as usize).collect()
}
