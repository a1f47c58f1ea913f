//! Predictor/response storage for training and prediction.
//!
//! A [`Data`] value owns an immutable predictor matrix (dense column-major
//! or compressed sparse column) and a response matrix, plus the derived
//! indices the split search leans on: per-column sorted unique values with a
//! row-to-offset index, the response key index for classification, and
//! response-keyed sample bags for stratified resampling. The indices are
//! built by the forest before workers fork and shared read-only during
//! growth.
//!
//! [`Data`]: struct.Data.html

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::errors::{ForestError, Result};

/// Dense or compressed-sparse-column predictor values.
#[derive(Debug, Clone)]
pub enum PredictorStorage {
    /// Column-major values, length `n_row * n_col`.
    Dense(Vec<f64>),
    /// CSC triple; values not explicitly stored are zero.
    Sparse {
        /// Row key of each stored value, sorted within each column.
        row_keys: Vec<usize>,
        /// Offsets into `row_keys`/`values` per column, length `n_col + 1`.
        col_offsets: Vec<usize>,
        values: Vec<f64>,
    },
}

/// Immutable predictor/response data plus lazily-built indices.
#[derive(Debug, Clone)]
pub struct Data {
    n_row: usize,
    n_col: usize,
    n_response_col: usize,
    x: PredictorStorage,
    /// Column-major response values, length `n_row * n_response_col`.
    y: Vec<f64>,

    /// Sorted distinct values per predictor column.
    unique_predictor_values: Vec<Vec<f64>>,
    /// Offset of each row's value within the column's unique values,
    /// `predictor_index[col * n_row + row]`.
    predictor_index: Vec<usize>,
    max_n_unique_value: usize,

    /// Distinct response values in order of first appearance.
    response_values: Vec<f64>,
    /// Offset of each row's response within `response_values`.
    response_index: Vec<usize>,
    /// Row keys grouped by response key, for stratified resampling.
    sample_keys_by_response: Vec<Vec<usize>>,

    permuted_sample_keys: Vec<usize>,
}

impl Data {
    /// Data over a dense column-major predictor matrix.
    pub fn new_dense(x: Vec<f64>, y: Vec<f64>, n_row: usize, n_col: usize) -> Result<Self> {
        if x.len() != n_row * n_col {
            return Err(ForestError::InvalidArgument(format!(
                "Predictor matrix has {} values, expected {} ({} rows x {} columns).",
                x.len(),
                n_row * n_col,
                n_row,
                n_col
            )));
        }
        Self::with_storage(PredictorStorage::Dense(x), y, n_row, n_col)
    }

    /// Data over a compressed sparse column predictor matrix; values not
    /// stored are zero.
    pub fn new_sparse(
        row_keys: Vec<usize>,
        col_offsets: Vec<usize>,
        values: Vec<f64>,
        y: Vec<f64>,
        n_row: usize,
        n_col: usize,
    ) -> Result<Self> {
        if col_offsets.len() != n_col + 1 {
            return Err(ForestError::InvalidArgument(
                "Sparse column offsets must have one entry per column plus one."
                    .to_string(),
            ));
        }
        if row_keys.len() != values.len() || *col_offsets.last().unwrap() != values.len() {
            return Err(ForestError::InvalidArgument(
                "Sparse row keys, values and final column offset must agree."
                    .to_string(),
            ));
        }
        for col in 0..n_col {
            let (start, end) = (col_offsets[col], col_offsets[col + 1]);
            if start > end || end > values.len() {
                return Err(ForestError::InvalidArgument(
                    "Sparse column offsets must be non-decreasing.".to_string(),
                ));
            }
            let column = &row_keys[start..end];
            if column.iter().any(|&r| r >= n_row) {
                return Err(ForestError::OutOfRange(
                    "Sparse row key beyond number of rows.".to_string(),
                ));
            }
            if column.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ForestError::InvalidArgument(
                    "Sparse row keys must be strictly increasing within a column."
                        .to_string(),
                ));
            }
        }
        Self::with_storage(
            PredictorStorage::Sparse {
                row_keys,
                col_offsets,
                values,
            },
            y,
            n_row,
            n_col,
        )
    }

    fn with_storage(
        x: PredictorStorage,
        y: Vec<f64>,
        n_row: usize,
        n_col: usize,
    ) -> Result<Self> {
        if n_row == 0 || n_col == 0 {
            return Err(ForestError::InvalidArgument(
                "Data must have at least one row and one column.".to_string(),
            ));
        }
        if y.is_empty() || y.len() % n_row != 0 {
            return Err(ForestError::InvalidArgument(format!(
                "Response matrix has {} values, expected a multiple of {} rows.",
                y.len(),
                n_row
            )));
        }
        let n_response_col = y.len() / n_row;
        Ok(Data {
            n_row,
            n_col,
            n_response_col,
            x,
            y,
            unique_predictor_values: Vec::new(),
            predictor_index: Vec::new(),
            max_n_unique_value: 0,
            response_values: Vec::new(),
            response_index: Vec::new(),
            sample_keys_by_response: Vec::new(),
            permuted_sample_keys: Vec::new(),
        })
    }

    pub fn n_row(&self) -> usize {
        self.n_row
    }

    pub fn n_col(&self) -> usize {
        self.n_col
    }

    /// The predictor value at `(sample_key, predictor_key)`, optionally via
    /// the row permutation. Keys must be in range.
    pub fn get_x(&self, sample_key: usize, predictor_key: usize, permute: bool) -> f64 {
        let row = self.as_row_offset(sample_key, permute);
        match self.x {
            PredictorStorage::Dense(ref values) => values[predictor_key * self.n_row + row],
            PredictorStorage::Sparse {
                ref row_keys,
                ref col_offsets,
                ref values,
            } => {
                let column =
                    &row_keys[col_offsets[predictor_key]..col_offsets[predictor_key + 1]];
                match column.binary_search(&row) {
                    Ok(offset) => values[col_offsets[predictor_key] + offset],
                    Err(_) => 0.0,
                }
            }
        }
    }

    pub fn get_y(&self, sample_key: usize, column: usize) -> f64 {
        self.y[column * self.n_row + sample_key]
    }

    /// Sorted unique values of `predictor_key` across
    /// `sample_keys[start..end)`.
    pub fn get_all_values(
        &self,
        sample_keys: &[usize],
        predictor_key: usize,
        start: usize,
        end: usize,
        permute: bool,
    ) -> Result<Vec<f64>> {
        if start > end {
            return Err(ForestError::InvalidArgument(
                "Start of interval must not be past end.".to_string(),
            ));
        }
        self.check_predictor_key(predictor_key)?;

        let mut all_values: Vec<f64> = sample_keys[start..end]
            .iter()
            .map(|&key| self.get_x(key, predictor_key, permute))
            .collect();
        all_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        all_values.dedup();
        Ok(all_values)
    }

    /// Single-pass minimum and maximum of `predictor_key` across
    /// `sample_keys[start..end)`.
    pub fn get_minmax_values(
        &self,
        sample_keys: &[usize],
        predictor_key: usize,
        start: usize,
        end: usize,
        permute: bool,
    ) -> Result<(f64, f64)> {
        if start > end {
            return Err(ForestError::InvalidArgument(
                "Start of interval must not be past end.".to_string(),
            ));
        }
        self.check_predictor_key(predictor_key)?;

        let mut min = 0.0;
        let mut max = 0.0;
        if !sample_keys.is_empty() && start < end {
            min = self.get_x(sample_keys[start], predictor_key, permute);
            max = min;
        }
        for &key in &sample_keys[start..end] {
            let value = self.get_x(key, predictor_key, permute);
            min = value.min(min);
            max = value.max(max);
        }
        Ok((min, max))
    }

    /// Build the per-column unique-value index used to accelerate split
    /// search. Skipped entirely under `save_memory`.
    pub fn new_predictor_index(&mut self) {
        self.predictor_index = vec![0; self.n_col * self.n_row];
        self.unique_predictor_values = Vec::with_capacity(self.n_col);
        self.max_n_unique_value = 0;

        for column in 0..self.n_col {
            let mut values: Vec<f64> = (0..self.n_row)
                .map(|row| self.get_x(row, column, false))
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            values.dedup();

            for row in 0..self.n_row {
                let x = self.get_x(row, column, false);
                let offset = values
                    .binary_search_by(|v| v.partial_cmp(&x).unwrap())
                    .unwrap_or_else(|o| o);
                self.predictor_index[column * self.n_row + row] = offset;
            }

            self.max_n_unique_value = self.max_n_unique_value.max(values.len());
            self.unique_predictor_values.push(values);
        }
    }

    pub fn finalise_predictor_index(&mut self) {
        self.predictor_index = Vec::new();
        self.unique_predictor_values = Vec::new();
        self.max_n_unique_value = 0;
    }

    pub fn has_predictor_index(&self) -> bool {
        self.max_n_unique_value != 0
    }

    /// Offset of the row's value within the column's unique values.
    pub fn get_unique_key(
        &self,
        sample_key: usize,
        predictor_key: usize,
        permute: bool,
    ) -> Result<usize> {
        self.check_predictor_key(predictor_key)?;
        Ok(self.rawget_unique_key(sample_key, predictor_key, permute))
    }

    /// Unchecked variant of [`get_unique_key`] for the growth inner loop.
    ///
    /// [`get_unique_key`]: struct.Data.html#method.get_unique_key
    pub fn rawget_unique_key(
        &self,
        sample_key: usize,
        predictor_key: usize,
        permute: bool,
    ) -> usize {
        let row = self.as_row_offset(sample_key, permute);
        self.predictor_index[predictor_key * self.n_row + row]
    }

    pub fn get_unique_value(&self, predictor_key: usize, offset: usize) -> Result<f64> {
        self.check_predictor_key(predictor_key)?;
        self.unique_predictor_values[predictor_key]
            .get(offset)
            .copied()
            .ok_or_else(|| {
                ForestError::OutOfRange(
                    "Unique-value offset beyond number of unique values.".to_string(),
                )
            })
    }

    pub fn get_n_unique_value(&self, predictor_key: usize) -> Result<usize> {
        self.check_predictor_key(predictor_key)?;
        Ok(self.unique_predictor_values[predictor_key].len())
    }

    /// Largest per-column unique-value count, floored at three for
    /// downstream buffer sizing.
    pub fn get_max_n_unique_value(&self) -> usize {
        self.max_n_unique_value.max(3)
    }

    /// Distinct response values in order of first appearance, building the
    /// cache on first call.
    pub fn new_response_values(&mut self) -> &[f64] {
        if self.response_values.is_empty() {
            for sample_key in 0..self.n_row {
                let value = self.get_y(sample_key, 0);
                if !self.response_values.contains(&value) {
                    self.response_values.push(value);
                }
            }
        }
        &self.response_values
    }

    pub fn get_response_values(&self) -> &[f64] {
        &self.response_values
    }

    /// Build the per-row response key index against a canonical value
    /// ordering (usually the forest's).
    pub fn new_response_index(&mut self, response_values: &[f64]) -> Result<()> {
        self.response_index = Vec::with_capacity(self.n_row);
        for sample_key in 0..self.n_row {
            let value = self.get_y(sample_key, 0);
            match response_values.iter().position(|&v| v == value) {
                Some(key) => self.response_index.push(key),
                None => {
                    return Err(ForestError::InvalidArgument(
                        "Response values does not contain all values observed in \
                         data."
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn finalise_response_index(&mut self) {
        self.response_index = Vec::new();
    }

    pub fn get_response_index(&self) -> &[usize] {
        &self.response_index
    }

    /// Group row keys by response key for stratified resampling. Requires
    /// the response index.
    pub fn new_sample_keys_by_response(&mut self, n_response_value: usize) {
        self.sample_keys_by_response = vec![Vec::new(); n_response_value];
        for (sample_key, &value_key) in self.response_index.iter().enumerate() {
            self.sample_keys_by_response[value_key].push(sample_key);
        }
    }

    pub fn finalise_sample_keys_by_response(&mut self) {
        self.sample_keys_by_response = Vec::new();
    }

    pub fn get_sample_keys_by_response(&self) -> &[Vec<usize>] {
        &self.sample_keys_by_response
    }

    /// Build a random permutation of the rows. `seed == 0` seeds from the
    /// platform entropy source.
    pub fn new_permutation(&mut self, seed: u64) {
        let mut gen = if seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(seed)
        };
        self.permuted_sample_keys = (0..self.n_row).collect();
        self.permuted_sample_keys.shuffle(&mut gen);
    }

    pub fn finalise_permutation(&mut self) {
        self.permuted_sample_keys = Vec::new();
    }

    pub fn as_row_offset(&self, sample_key: usize, permute: bool) -> usize {
        if permute {
            self.permuted_sample_keys[sample_key]
        } else {
            sample_key
        }
    }

    fn check_predictor_key(&self, predictor_key: usize) -> Result<()> {
        if predictor_key >= self.n_col {
            return Err(ForestError::OutOfRange(
                "Predictor key must be less than number of columns.".to_string(),
            ));
        }
        Ok(())
    }
}
