#![allow(dead_code)]

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Columns driven by a handful of shared factors plus noise, so a useful
/// number of pairs are strongly correlated in both directions.
pub fn factor_matrix(rows: usize, cols: usize, factors: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let latent = Array2::from_shape_fn((rows, factors), |_| rng.sample::<f64, _>(StandardNormal));
    let mut matrix = Array2::<f64>::zeros((rows, cols));
    for j in 0..cols {
        let factor = rng.gen_range(0..factors);
        let loading = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let noise = rng.gen_range(0.05..0.8);
        for i in 0..rows {
            let eps: f64 = rng.sample(StandardNormal);
            matrix[(i, j)] = loading * latent[(i, factor)] + noise * eps + 3.0;
        }
    }
    matrix
}

/// Columns mixing many factors whose weights decay geometrically, so each
/// extra embedding dimension captures a little more of every column. The last
/// `planted` columns are near copies (some negated) of earlier ones.
pub fn decaying_spectrum_matrix(
    rows: usize,
    cols: usize,
    factors: usize,
    planted: usize,
    seed: u64,
) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let latent = Array2::from_shape_fn((rows, factors), |(_, k)| {
        0.9_f64.powi(k as i32) * rng.sample::<f64, _>(StandardNormal)
    });
    let loadings = Array2::from_shape_fn((factors, cols), |_| rng.sample::<f64, _>(StandardNormal));
    let mut matrix = latent.dot(&loadings);
    matrix.mapv_inplace(|v| v + 0.1 * rng.sample::<f64, _>(StandardNormal));
    for offset in 0..planted {
        let target = cols - 1 - offset;
        let source = offset * 7;
        let sign = if offset % 2 == 0 { 1.0 } else { -1.0 };
        for i in 0..rows {
            let eps: f64 = rng.sample(StandardNormal);
            matrix[(i, target)] = sign * matrix[(i, source)] + 0.05 * eps;
        }
    }
    matrix
}

fn standardized_columns(matrix: ArrayView2<'_, f64>) -> Vec<Vec<f64>> {
    matrix
        .columns()
        .into_iter()
        .map(|column| {
            let mean = column.sum() / column.len() as f64;
            let centered: Vec<f64> = column.iter().map(|v| v - mean).collect();
            let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
            centered.into_iter().map(|v| v / norm).collect()
        })
        .collect()
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>().clamp(-1.0, 1.0)
}

/// Every qualifying `(i, j, value)` with `i < j`, by exhaustive comparison.
pub fn brute_force(matrix: ArrayView2<'_, f64>, threshold: f64, include_anti: bool) -> Vec<(usize, usize, f64)> {
    let columns = standardized_columns(matrix);
    let mut found = Vec::new();
    for i in 0..columns.len() {
        for j in (i + 1)..columns.len() {
            let value = correlation(&columns[i], &columns[j]);
            let keep = if include_anti { value.abs() >= threshold } else { value >= threshold };
            if keep {
                found.push((i, j, value));
            }
        }
    }
    found
}

/// Every qualifying pair with `i` a column of `x` and `j` a column of `y`.
pub fn brute_force_cross(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    threshold: f64,
) -> Vec<(usize, usize, f64)> {
    let left = standardized_columns(x);
    let right = standardized_columns(y);
    let mut found = Vec::new();
    for (i, a) in left.iter().enumerate() {
        for (j, b) in right.iter().enumerate() {
            let value = correlation(a, b);
            if value >= threshold {
                found.push((i, j, value));
            }
        }
    }
    found
}

/// Sorted `(i, j)` pairs for order-insensitive comparison.
pub fn pair_set(found: impl IntoIterator<Item = (usize, usize)>) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = found.into_iter().collect();
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}
