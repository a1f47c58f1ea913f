//! Random drawing utilities shared by resampling, candidate selection and
//! prediction tie-breaks.
//!
//! All draws go through a caller-supplied [`rand::rngs::StdRng`] so that any
//! operation is reproducible from its seed alone, independent of thread
//! count.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;

use crate::errors::{ForestError, Result};

/// Mix an operation seed and a tree index into a per-tree generator seed.
///
/// splitmix64 finalizer; trees drawn off the same operation seed get
/// decorrelated streams regardless of how trees are assigned to workers.
pub fn hash_seed(seed: u64, index: u64) -> u64 {
    let mut z = seed
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(index.wrapping_mul(0xbf58_476d_1ce4_e5b9));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Draw `n_draw` keys from `[0, n_all)` uniformly with replacement.
pub fn draw_replace(
    n_draw: usize,
    n_all: usize,
    rng: &mut StdRng,
    sample_keys: &mut Vec<usize>,
    inbag_counts: &mut [usize],
) {
    sample_keys.reserve(n_draw);
    for _ in 0..n_draw {
        let draw = rng.gen_range(0..n_all);
        sample_keys.push(draw);
        inbag_counts[draw] += 1;
    }
}

/// Draw `n_draw` distinct keys from `[0, n_all)`, never drawing a key listed
/// in `skip` (sorted ascending).
///
/// Draws from the shrunken range and shifts past the skipped keys, with
/// rejection of duplicates.
pub fn draw_no_replace(
    n_draw: usize,
    n_all: usize,
    skip: &[usize],
    rng: &mut StdRng,
    result: &mut Vec<usize>,
) {
    result.reserve(n_draw);
    let n_candidate = n_all - skip.len();
    debug_assert!(n_draw <= n_candidate);

    let mut drawn = vec![false; n_all];
    for _ in 0..n_draw {
        loop {
            let mut draw = rng.gen_range(0..n_candidate);
            for &skip_key in skip {
                if draw >= skip_key {
                    draw += 1;
                }
            }
            if !drawn[draw] {
                drawn[draw] = true;
                result.push(draw);
                break;
            }
        }
    }
}

/// Draw `n_draw` keys with replacement, each key's probability proportional
/// to its weight.
pub fn draw_replace_weighted(
    n_draw: usize,
    weights: &[f64],
    rng: &mut StdRng,
    sample_keys: &mut Vec<usize>,
    inbag_counts: &mut [usize],
) -> Result<()> {
    let dist = WeightedIndex::new(weights).map_err(|e| {
        ForestError::InvalidArgument(format!("Invalid case weights: {}.", e))
    })?;
    sample_keys.reserve(n_draw);
    for _ in 0..n_draw {
        let draw = dist.sample(rng);
        sample_keys.push(draw);
        inbag_counts[draw] += 1;
    }
    Ok(())
}

/// Sequential weighted draw without replacement: after each draw the drawn
/// key's weight is zeroed and the distribution rebuilt.
pub fn draw_no_replace_weighted(
    n_draw: usize,
    weights: &[f64],
    rng: &mut StdRng,
    sample_keys: &mut Vec<usize>,
    inbag_counts: &mut [usize],
) -> Result<()> {
    let mut remaining = weights.to_vec();
    sample_keys.reserve(n_draw);
    for _ in 0..n_draw {
        let dist = WeightedIndex::new(&remaining).map_err(|e| {
            ForestError::InvalidArgument(format!(
                "Too few positive weights for draw without replacement: {}.",
                e
            ))
        })?;
        let draw = dist.sample(rng);
        remaining[draw] = 0.0;
        sample_keys.push(draw);
        inbag_counts[draw] += 1;
    }
    Ok(())
}

/// Offset of the largest value in `values`, ties broken by a uniform draw
/// over the tied offsets (visited in ascending order, so the result is a
/// function of the generator state only).
pub fn most_frequent_value(values: &[f64], rng: &mut StdRng) -> usize {
    debug_assert!(!values.is_empty());
    let mut best = f64::NEG_INFINITY;
    for &v in values {
        if v > best {
            best = v;
        }
    }
    let argmax: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == best)
        .map(|(k, _)| k)
        .collect();
    if argmax.len() == 1 {
        argmax[0]
    } else {
        argmax[rng.gen_range(0..argmax.len())]
    }
}
