//! Sorted-order candidate generation.
//!
//! Standardized columns have unit norm, so `‖a_i − a_j‖² = 2(1 − cor(i, j))`
//! and `‖a_i + a_j‖² = 2(1 + cor(i, j))`. Embedding rows are orthogonal
//! projections of the columns, hence `‖e_i − e_j‖ ≤ ‖a_i − a_j‖`, and the same
//! holds for any single coordinate. A pair meeting threshold `t` therefore
//! lies within `sqrt(2(1 − t))` both along the sort key and in the full
//! embedding; everything outside that radius is pruned without loss.

use crate::embed::Embedding;
use ndarray::{Array2, ArrayView2, s};
use std::ops::Range;

/// Added to the pruning radius to absorb rounding in the embedding.
pub const PRUNING_SLACK: f64 = 1.0e-9;

/// Largest projected distance a pair meeting `threshold` can have.
pub fn pruning_radius(threshold: f64) -> f64 {
    (2.0 * (1.0 - threshold)).max(0.0).sqrt() + PRUNING_SLACK
}

/// For every sorted position `k`, the exclusive end of the forward window of
/// positions whose key exceeds `keys[k]` by at most `radius`.
///
/// `keys` must be sorted ascending; the result is non-decreasing.
pub fn window_bounds(keys: &[f64], radius: f64) -> Vec<usize> {
    let mut ends = Vec::with_capacity(keys.len());
    let mut end = 0;
    for (k, &key) in keys.iter().enumerate() {
        end = end.max(k + 1);
        while end < keys.len() && keys[end] - key <= radius {
            end += 1;
        }
        ends.push(end);
    }
    ends
}

/// Length of the longest window, anchor included.
pub fn longest_run(ends: &[usize]) -> usize {
    ends.iter()
        .enumerate()
        .map(|(k, &end)| end - k)
        .max()
        .unwrap_or(0)
}

/// Column split between the two inputs of a cross-correlation search.
///
/// Columns below the split belong to the first matrix, the rest to the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSplit(pub usize);

impl GroupSplit {
    #[inline]
    pub fn same_group(self, a: usize, b: usize) -> bool {
        (a < self.0) == (b < self.0)
    }
}

/// An unverified pair in concatenated column space, `i < j`, with the
/// correlation estimated from the embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub i: usize,
    pub j: usize,
    pub approx: f64,
}

/// Embedding rows in sort-key order.
///
/// With `include_anti` every column appears twice, once negated, so that a
/// strongly anti-correlated pair becomes a close pair of opposite sign.
#[derive(Debug, Clone)]
pub struct ScanLayout {
    columns: Vec<usize>,
    negated: Vec<bool>,
    keys: Vec<f64>,
    coords: Array2<f64>,
}

impl ScanLayout {
    pub fn new(embedding: &Embedding, include_anti: bool) -> Self {
        let n = embedding.n_columns();
        let mut items: Vec<(f64, usize, bool)> = Vec::with_capacity(if include_anti {
            2 * n
        } else {
            n
        });
        for j in 0..n {
            let key = embedding.sort_key(j);
            items.push((key, j, false));
            if include_anti {
                items.push((-key, j, true));
            }
        }
        items.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let rank = embedding.rank();
        let mut coords = Array2::<f64>::zeros((items.len(), rank));
        for (mut row, &(_, column, negated)) in coords.rows_mut().into_iter().zip(items.iter()) {
            row.assign(&embedding.row(column));
            if negated {
                row.mapv_inplace(|v| -v);
            }
        }

        Self {
            columns: items.iter().map(|item| item.1).collect(),
            negated: items.iter().map(|item| item.2).collect(),
            keys: items.iter().map(|item| item.0).collect(),
            coords,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[f64] {
        &self.keys
    }

    /// The part of the layout needed to scan anchors in `anchors`: the
    /// anchors themselves plus the trailing window of the last one.
    pub fn slice<'a>(&'a self, anchors: Range<usize>, ends: &'a [usize]) -> ScanSlice<'a> {
        let stop = if anchors.is_empty() {
            anchors.start
        } else {
            ends[anchors.end - 1]
        };
        let rows = anchors.start..stop;
        ScanSlice {
            offset: anchors.start,
            anchors: anchors.len(),
            ends: &ends[anchors],
            columns: &self.columns[rows.clone()],
            negated: &self.negated[rows.clone()],
            coords: self.coords.slice(s![rows, ..]),
        }
    }
}

/// A contiguous run of sorted positions handed to one scan worker.
#[derive(Debug, Clone, Copy)]
pub struct ScanSlice<'a> {
    offset: usize,
    anchors: usize,
    ends: &'a [usize],
    columns: &'a [usize],
    negated: &'a [bool],
    coords: ArrayView2<'a, f64>,
}

impl<'a> ScanSlice<'a> {
    /// Enumerates every pair within `radius` of each other in the embedding,
    /// skipping same-group pairs when `groups` is set.
    pub fn scan(&self, radius: f64, groups: Option<GroupSplit>) -> Vec<Candidate> {
        let limit_sq = radius * radius;
        let mut out = Vec::new();
        for local in 0..self.anchors {
            let window_end = self.ends[local] - self.offset;
            let col_a = self.columns[local];
            let neg_a = self.negated[local];
            let row_a = self.coords.row(local);
            for other in (local + 1)..window_end {
                let col_b = self.columns[other];
                let neg_b = self.negated[other];
                if !keeps_pair(col_a, neg_a, col_b, neg_b) {
                    continue;
                }
                if groups.is_some_and(|g| g.same_group(col_a, col_b)) {
                    continue;
                }

                let row_b = self.coords.row(other);
                let mut dist_sq = 0.0;
                let mut dot = 0.0;
                let mut pruned = false;
                for (&x, &y) in row_a.iter().zip(row_b.iter()) {
                    let d = x - y;
                    dist_sq += d * d;
                    if dist_sq > limit_sq {
                        pruned = true;
                        break;
                    }
                    dot += x * y;
                }
                if pruned {
                    continue;
                }

                // Coordinates are stored signed, so `dot` already estimates
                // the correlation of the unsigned columns up to the sign flip.
                let approx = if neg_a != neg_b { -dot } else { dot };
                out.push(Candidate {
                    i: col_a.min(col_b),
                    j: col_a.max(col_b),
                    approx,
                });
            }
        }
        out
    }
}

/// Picks one representative among the signed copies of a pair.
///
/// `(+a, +b)` and `(−a, −b)` describe the same positive pair; `(+a, −b)` and
/// `(−a, +b)` the same anti pair. Pairs of a column with itself are dropped.
#[inline]
fn keeps_pair(col_a: usize, neg_a: bool, col_b: usize, neg_b: bool) -> bool {
    if col_a == col_b {
        return false;
    }
    match (neg_a, neg_b) {
        (false, false) => true,
        (true, true) => false,
        (false, true) => col_a < col_b,
        (true, false) => col_b < col_a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Factorization;
    use ndarray::{Array1, array};

    fn embedding_from_rows(rows: Array2<f64>) -> Embedding {
        let p = rows.ncols();
        Embedding::from_factorization(&Factorization {
            u: Array2::zeros((1, p)),
            d: Array1::ones(p),
            v: rows,
            iterations: 0,
        })
    }

    #[test]
    fn radius_matches_unit_vector_geometry() {
        assert!((pruning_radius(0.5) - 1.0).abs() < 1e-8);
        assert!((pruning_radius(-1.0) - 2.0).abs() < 1e-8);
        assert!(pruning_radius(0.999_999) > 0.0);
    }

    #[test]
    fn window_bounds_follow_key_gaps() {
        let keys = [0.0, 0.1, 0.15, 0.9, 1.0, 3.0];
        let ends = window_bounds(&keys, 0.2);
        assert_eq!(ends, vec![3, 3, 3, 5, 5, 6]);
        assert_eq!(longest_run(&ends), 3);
        assert_eq!(longest_run(&window_bounds(&keys, 10.0)), 6);
        assert_eq!(longest_run(&window_bounds(&[], 1.0)), 0);
    }

    #[test]
    fn scan_keeps_only_close_pairs() {
        let rows = array![[0.0, 0.0], [0.1, 0.05], [0.15, 0.9], [2.0, 0.0]];
        let layout = ScanLayout::new(&embedding_from_rows(rows), false);
        let radius = 0.2;
        let ends = window_bounds(layout.keys(), radius);
        let candidates = layout.slice(0..layout.len(), &ends).scan(radius, None);
        let pairs: Vec<(usize, usize)> = candidates.iter().map(|c| (c.i, c.j)).collect();
        assert_eq!(pairs, vec![(0, 1)]);
        assert!((candidates[0].approx - 0.0).abs() < 1e-12);
    }

    #[test]
    fn partitions_reproduce_the_full_scan() {
        let rows = Array2::from_shape_fn((40, 3), |(i, k)| ((i * 7 + k * 3) % 11) as f64 * 0.05);
        let layout = ScanLayout::new(&embedding_from_rows(rows), true);
        let radius = 0.12;
        let ends = window_bounds(layout.keys(), radius);
        let full = layout.slice(0..layout.len(), &ends).scan(radius, None);

        let mut pieces = Vec::new();
        for start in (0..layout.len()).step_by(7) {
            let end = (start + 7).min(layout.len());
            pieces.extend(layout.slice(start..end, &ends).scan(radius, None));
        }
        assert_eq!(pieces, full);
    }

    #[test]
    fn anti_copies_find_opposite_columns_once() {
        let rows = array![[0.5, 0.1], [-0.5, -0.1], [0.0, 0.4]];
        let layout = ScanLayout::new(&embedding_from_rows(rows), true);
        assert_eq!(layout.len(), 6);
        let radius = 0.05;
        let ends = window_bounds(layout.keys(), radius);
        let candidates = layout.slice(0..layout.len(), &ends).scan(radius, None);
        assert_eq!(candidates.len(), 1);
        assert_eq!((candidates[0].i, candidates[0].j), (0, 1));
        assert!(candidates[0].approx < 0.0);
    }

    #[test]
    fn same_group_pairs_are_skipped() {
        let rows = array![[0.0, 0.0], [0.01, 0.0], [0.02, 0.0]];
        let layout = ScanLayout::new(&embedding_from_rows(rows), false);
        let radius = 0.5;
        let ends = window_bounds(layout.keys(), radius);
        let candidates = layout
            .slice(0..layout.len(), &ends)
            .scan(radius, Some(GroupSplit(2)));
        let pairs: Vec<(usize, usize)> = candidates.iter().map(|c| (c.i, c.j)).collect();
        assert_eq!(pairs, vec![(0, 2), (1, 2)]);
    }
}
