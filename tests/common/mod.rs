//! Shared fixtures for the end-to-end tests: Fisher's iris measurements
//! and small helpers to lay them out column-major or as CSC triples.

#![allow(dead_code)]

use rforest::Data;

pub const N_ROW: usize = 150;

/// sepal length, sepal width, petal length, petal width, species code.
pub const IRIS: [[f64; 5]; N_ROW] = [
    [5.1, 3.5, 1.4, 0.2, 0.0],
    [4.9, 3.0, 1.4, 0.2, 0.0],
    [4.7, 3.2, 1.3, 0.2, 0.0],
    [4.6, 3.1, 1.5, 0.2, 0.0],
    [5.0, 3.6, 1.4, 0.2, 0.0],
    [5.4, 3.9, 1.7, 0.4, 0.0],
    [4.6, 3.4, 1.4, 0.3, 0.0],
    [5.0, 3.4, 1.5, 0.2, 0.0],
    [4.4, 2.9, 1.4, 0.2, 0.0],
    [4.9, 3.1, 1.5, 0.1, 0.0],
    [5.4, 3.7, 1.5, 0.2, 0.0],
    [4.8, 3.4, 1.6, 0.2, 0.0],
    [4.8, 3.0, 1.4, 0.1, 0.0],
    [4.3, 3.0, 1.1, 0.1, 0.0],
    [5.8, 4.0, 1.2, 0.2, 0.0],
    [5.7, 4.4, 1.5, 0.4, 0.0],
    [5.4, 3.9, 1.3, 0.4, 0.0],
    [5.1, 3.5, 1.4, 0.3, 0.0],
    [5.7, 3.8, 1.7, 0.3, 0.0],
    [5.1, 3.8, 1.5, 0.3, 0.0],
    [5.4, 3.4, 1.7, 0.2, 0.0],
    [5.1, 3.7, 1.5, 0.4, 0.0],
    [4.6, 3.6, 1.0, 0.2, 0.0],
    [5.1, 3.3, 1.7, 0.5, 0.0],
    [4.8, 3.4, 1.9, 0.2, 0.0],
    [5.0, 3.0, 1.6, 0.2, 0.0],
    [5.0, 3.4, 1.6, 0.4, 0.0],
    [5.2, 3.5, 1.5, 0.2, 0.0],
    [5.2, 3.4, 1.4, 0.2, 0.0],
    [4.7, 3.2, 1.6, 0.2, 0.0],
    [4.8, 3.1, 1.6, 0.2, 0.0],
    [5.4, 3.4, 1.5, 0.4, 0.0],
    [5.2, 4.1, 1.5, 0.1, 0.0],
    [5.5, 4.2, 1.4, 0.2, 0.0],
    [4.9, 3.1, 1.5, 0.2, 0.0],
    [5.0, 3.2, 1.2, 0.2, 0.0],
    [5.5, 3.5, 1.3, 0.2, 0.0],
    [4.9, 3.6, 1.4, 0.1, 0.0],
    [4.4, 3.0, 1.3, 0.2, 0.0],
    [5.1, 3.4, 1.5, 0.2, 0.0],
    [5.0, 3.5, 1.3, 0.3, 0.0],
    [4.5, 2.3, 1.3, 0.3, 0.0],
    [4.4, 3.2, 1.3, 0.2, 0.0],
    [5.0, 3.5, 1.6, 0.6, 0.0],
    [5.1, 3.8, 1.9, 0.4, 0.0],
    [4.8, 3.0, 1.4, 0.3, 0.0],
    [5.1, 3.8, 1.6, 0.2, 0.0],
    [4.6, 3.2, 1.4, 0.2, 0.0],
    [5.3, 3.7, 1.5, 0.2, 0.0],
    [5.0, 3.3, 1.4, 0.2, 0.0],
    [7.0, 3.2, 4.7, 1.4, 1.0],
    [6.4, 3.2, 4.5, 1.5, 1.0],
    [6.9, 3.1, 4.9, 1.5, 1.0],
    [5.5, 2.3, 4.0, 1.3, 1.0],
    [6.5, 2.8, 4.6, 1.5, 1.0],
    [5.7, 2.8, 4.5, 1.3, 1.0],
    [6.3, 3.3, 4.7, 1.6, 1.0],
    [4.9, 2.4, 3.3, 1.0, 1.0],
    [6.6, 2.9, 4.6, 1.3, 1.0],
    [5.2, 2.7, 3.9, 1.4, 1.0],
    [5.0, 2.0, 3.5, 1.0, 1.0],
    [5.9, 3.0, 4.2, 1.5, 1.0],
    [6.0, 2.2, 4.0, 1.0, 1.0],
    [6.1, 2.9, 4.7, 1.4, 1.0],
    [5.6, 2.9, 3.6, 1.3, 1.0],
    [6.7, 3.1, 4.4, 1.4, 1.0],
    [5.6, 3.0, 4.5, 1.5, 1.0],
    [5.8, 2.7, 4.1, 1.0, 1.0],
    [6.2, 2.2, 4.5, 1.5, 1.0],
    [5.6, 2.5, 3.9, 1.1, 1.0],
    [5.9, 3.2, 4.8, 1.8, 1.0],
    [6.1, 2.8, 4.0, 1.3, 1.0],
    [6.3, 2.5, 4.9, 1.5, 1.0],
    [6.1, 2.8, 4.7, 1.2, 1.0],
    [6.4, 2.9, 4.3, 1.3, 1.0],
    [6.6, 3.0, 4.4, 1.4, 1.0],
    [6.8, 2.8, 4.8, 1.4, 1.0],
    [6.7, 3.0, 5.0, 1.7, 1.0],
    [6.0, 2.9, 4.5, 1.5, 1.0],
    [5.7, 2.6, 3.5, 1.0, 1.0],
    [5.5, 2.4, 3.8, 1.1, 1.0],
    [5.5, 2.4, 3.7, 1.0, 1.0],
    [5.8, 2.7, 3.9, 1.2, 1.0],
    [6.0, 2.7, 5.1, 1.6, 1.0],
    [5.4, 3.0, 4.5, 1.5, 1.0],
    [6.0, 3.4, 4.5, 1.6, 1.0],
    [6.7, 3.1, 4.7, 1.5, 1.0],
    [6.3, 2.3, 4.4, 1.3, 1.0],
    [5.6, 3.0, 4.1, 1.3, 1.0],
    [5.5, 2.5, 4.0, 1.3, 1.0],
    [5.5, 2.6, 4.4, 1.2, 1.0],
    [6.1, 3.0, 4.6, 1.4, 1.0],
    [5.8, 2.6, 4.0, 1.2, 1.0],
    [5.0, 2.3, 3.3, 1.0, 1.0],
    [5.6, 2.7, 4.2, 1.3, 1.0],
    [5.7, 3.0, 4.2, 1.2, 1.0],
    [5.7, 2.9, 4.2, 1.3, 1.0],
    [6.2, 2.9, 4.3, 1.3, 1.0],
    [5.1, 2.5, 3.0, 1.1, 1.0],
    [5.7, 2.8, 4.1, 1.3, 1.0],
    [6.3, 3.3, 6.0, 2.5, 2.0],
    [5.8, 2.7, 5.1, 1.9, 2.0],
    [7.1, 3.0, 5.9, 2.1, 2.0],
    [6.3, 2.9, 5.6, 1.8, 2.0],
    [6.5, 3.0, 5.8, 2.2, 2.0],
    [7.6, 3.0, 6.6, 2.1, 2.0],
    [4.9, 2.5, 4.5, 1.7, 2.0],
    [7.3, 2.9, 6.3, 1.8, 2.0],
    [6.7, 2.5, 5.8, 1.8, 2.0],
    [7.2, 3.6, 6.1, 2.5, 2.0],
    [6.5, 3.2, 5.1, 2.0, 2.0],
    [6.4, 2.7, 5.3, 1.9, 2.0],
    [6.8, 3.0, 5.5, 2.1, 2.0],
    [5.7, 2.5, 5.0, 2.0, 2.0],
    [5.8, 2.8, 5.1, 2.4, 2.0],
    [6.4, 3.2, 5.3, 2.3, 2.0],
    [6.5, 3.0, 5.5, 1.8, 2.0],
    [7.7, 3.8, 6.7, 2.2, 2.0],
    [7.7, 2.6, 6.9, 2.3, 2.0],
    [6.0, 2.2, 5.0, 1.5, 2.0],
    [6.9, 3.2, 5.7, 2.3, 2.0],
    [5.6, 2.8, 4.9, 2.0, 2.0],
    [7.7, 2.8, 6.7, 2.0, 2.0],
    [6.3, 2.7, 4.9, 1.8, 2.0],
    [6.7, 3.3, 5.7, 2.1, 2.0],
    [7.2, 3.2, 6.0, 1.8, 2.0],
    [6.2, 2.8, 4.8, 1.8, 2.0],
    [6.1, 3.0, 4.9, 1.8, 2.0],
    [6.4, 2.8, 5.6, 2.1, 2.0],
    [7.2, 3.0, 5.8, 1.6, 2.0],
    [7.4, 2.8, 6.1, 1.9, 2.0],
    [7.9, 3.8, 6.4, 2.0, 2.0],
    [6.4, 2.8, 5.6, 2.2, 2.0],
    [6.3, 2.8, 5.1, 1.5, 2.0],
    [6.1, 2.6, 5.6, 1.4, 2.0],
    [7.7, 3.0, 6.1, 2.3, 2.0],
    [6.3, 3.4, 5.6, 2.4, 2.0],
    [6.4, 3.1, 5.5, 1.8, 2.0],
    [6.0, 3.0, 4.8, 1.8, 2.0],
    [6.9, 3.1, 5.4, 2.1, 2.0],
    [6.7, 3.1, 5.6, 2.4, 2.0],
    [6.9, 3.1, 5.1, 2.3, 2.0],
    [5.8, 2.7, 5.1, 1.9, 2.0],
    [6.8, 3.2, 5.9, 2.3, 2.0],
    [6.7, 3.3, 5.7, 2.5, 2.0],
    [6.7, 3.0, 5.2, 2.3, 2.0],
    [6.3, 2.5, 5.0, 1.9, 2.0],
    [6.5, 3.0, 5.2, 2.0, 2.0],
    [6.2, 3.4, 5.4, 2.3, 2.0],
    [5.9, 3.0, 5.1, 1.8, 2.0],
];

pub fn predictor_names() -> Vec<String> {
    vec![
        "sepal_length".to_string(),
        "sepal_width".to_string(),
        "petal_length".to_string(),
        "petal_width".to_string(),
    ]
}

/// All four measurements column-major, species as the response.
pub fn iris_classification() -> (Vec<f64>, Vec<f64>) {
    let mut x = Vec::with_capacity(N_ROW * 4);
    for column in 0..4 {
        for row in &IRIS {
            x.push(row[column]);
        }
    }
    let y = IRIS.iter().map(|row| row[4]).collect();
    (x, y)
}

pub fn iris_classification_data() -> Data {
    let (x, y) = iris_classification();
    Data::new_dense(x, y, N_ROW, 4).unwrap()
}

/// Sepal width and the petal measurements column-major, sepal length as the
/// response.
pub fn iris_regression() -> (Vec<f64>, Vec<f64>) {
    let mut x = Vec::with_capacity(N_ROW * 3);
    for column in 1..4 {
        for row in &IRIS {
            x.push(row[column]);
        }
    }
    let y = IRIS.iter().map(|row| row[0]).collect();
    (x, y)
}

pub fn iris_regression_data() -> Data {
    let (x, y) = iris_regression();
    Data::new_dense(x, y, N_ROW, 3).unwrap()
}

pub fn regression_predictor_names() -> Vec<String> {
    vec![
        "sepal_width".to_string(),
        "petal_length".to_string(),
        "petal_width".to_string(),
    ]
}

/// Compress a dense column-major matrix into a CSC triple, dropping zeros.
pub fn to_sparse(x: &[f64], n_row: usize, n_col: usize) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let mut row_keys = Vec::new();
    let mut col_offsets = vec![0usize];
    let mut values = Vec::new();
    for col in 0..n_col {
        for row in 0..n_row {
            let value = x[col * n_row + row];
            if value != 0.0 {
                row_keys.push(row);
                values.push(value);
            }
        }
        col_offsets.push(values.len());
    }
    (row_keys, col_offsets, values)
}

/// Fraction of exact matches between predictions and observations.
pub fn accuracy(predicted: &[f64], observed: &[f64]) -> f64 {
    let n_match = predicted
        .iter()
        .zip(observed)
        .filter(|(a, b)| a == b)
        .count();
    n_match as f64 / observed.len() as f64
}
