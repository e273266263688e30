//! Truncated singular value decomposition of an implicitly standardized matrix.
//!
//! The standardized matrix `A = (X - 1 centerᵀ) diag(scale)⁻¹` is never formed;
//! products with `A` and `Aᵀ` are applied through [`StandardizedOperator`].

use super::faer_ndarray::{FaerLinalgError, FaerQr, FaerSvd};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TOLERANCE: f64 = 1.0e-8;
pub const DEFAULT_MAX_ITERATIONS: usize = 1_000;
pub const DEFAULT_OVERSAMPLING: usize = 10;

#[derive(Debug, Error)]
pub enum FactorizationError {
    #[error("truncated factorization did not converge at rank {rank} after {iterations} iterations")]
    NoConvergence { rank: usize, iterations: usize },

    #[error("factorization failed: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error("factorization inputs are inconsistent: {0}")]
    Shape(String),
}

/// Tuning knobs for the subspace iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorizationOptions {
    /// Largest change of the leading Ritz values, relative to the first one,
    /// accepted as converged.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Extra block columns carried beyond the requested rank.
    pub oversampling: usize,
    pub seed: u64,
}

impl Default for FactorizationOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            oversampling: DEFAULT_OVERSAMPLING,
            seed: 0,
        }
    }
}

/// Rank-`p` factorization `A ≈ U diag(d) Vᵀ`.
///
/// `u` is `m × p` with orthonormal columns, `d` holds the singular values in
/// descending order and `v` is `n × p`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factorization {
    pub u: Array2<f64>,
    pub d: Array1<f64>,
    pub v: Array2<f64>,
    pub iterations: usize,
}

impl Factorization {
    pub fn rank(&self) -> usize {
        self.d.len()
    }

    /// Keeps the leading `rank` triplets.
    pub fn truncated(&self, rank: usize) -> Self {
        let rank = rank.min(self.rank());
        Self {
            u: self.u.slice(s![.., ..rank]).to_owned(),
            d: self.d.slice(s![..rank]).to_owned(),
            v: self.v.slice(s![.., ..rank]).to_owned(),
            iterations: self.iterations,
        }
    }
}

/// Low-rank factorization provider.
pub trait Factorizer {
    /// Factorizes the standardized view of `matrix` at `rank`.
    ///
    /// `warm_start`, when present, is an `n × k` block of right singular vector
    /// estimates used to seed the iteration.
    fn factorize(
        &self,
        matrix: ArrayView2<'_, f64>,
        rank: usize,
        center: ArrayView1<'_, f64>,
        scale: ArrayView1<'_, f64>,
        warm_start: Option<ArrayView2<'_, f64>>,
        options: &FactorizationOptions,
    ) -> Result<Factorization, FactorizationError>;
}

/// Randomized block subspace iteration with thin-QR re-orthonormalization.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubspaceIteration;

struct StandardizedOperator<'m, 'c> {
    matrix: ArrayView2<'m, f64>,
    center: ArrayView1<'c, f64>,
    inv_scale: Array1<f64>,
}

impl StandardizedOperator<'_, '_> {
    /// `A · w` for an `n × l` block.
    fn apply(&self, w: &Array2<f64>) -> Array2<f64> {
        let scaled = w * &self.inv_scale.view().insert_axis(Axis(1));
        let offset = self.center.dot(&scaled);
        let mut out = self.matrix.dot(&scaled);
        out -= &offset;
        out
    }

    /// `Aᵀ · q` for an `m × l` block.
    fn apply_transpose(&self, q: &Array2<f64>) -> Array2<f64> {
        let column_sums = q.sum_axis(Axis(0));
        let mut out = self.matrix.t().dot(q);
        out -= &(&self.center.insert_axis(Axis(1)) * &column_sums.insert_axis(Axis(0)));
        out *= &self.inv_scale.view().insert_axis(Axis(1));
        out
    }
}

fn initial_block(
    n: usize,
    block: usize,
    warm_start: Option<ArrayView2<'_, f64>>,
    seed: u64,
) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let seeded = warm_start.map_or(0, |w| w.ncols().min(block));
    Array2::from_shape_fn((n, block), |(row, col)| match warm_start {
        Some(w) if col < seeded => w[(row, col)],
        _ => StandardNormal.sample(&mut rng),
    })
}

fn ritz_converged(previous: &Array1<f64>, current: &Array1<f64>, rank: usize, tol: f64) -> bool {
    let reference = current.first().copied().unwrap_or(0.0).max(f64::MIN_POSITIVE);
    previous
        .iter()
        .zip(current.iter())
        .take(rank)
        .all(|(a, b)| (a - b).abs() <= tol * reference)
}

impl Factorizer for SubspaceIteration {
    fn factorize(
        &self,
        matrix: ArrayView2<'_, f64>,
        rank: usize,
        center: ArrayView1<'_, f64>,
        scale: ArrayView1<'_, f64>,
        warm_start: Option<ArrayView2<'_, f64>>,
        options: &FactorizationOptions,
    ) -> Result<Factorization, FactorizationError> {
        let (m, n) = matrix.dim();
        if center.len() != n || scale.len() != n {
            return Err(FactorizationError::Shape(format!(
                "matrix has {n} columns but center/scale have {}/{} entries",
                center.len(),
                scale.len()
            )));
        }
        if rank == 0 || rank > m.min(n) {
            return Err(FactorizationError::Shape(format!(
                "rank {rank} is outside 1..={} for a {m}x{n} matrix",
                m.min(n)
            )));
        }
        if let Some(w) = warm_start {
            if w.nrows() != n {
                return Err(FactorizationError::Shape(format!(
                    "warm start has {} rows, expected {n}",
                    w.nrows()
                )));
            }
        }

        let operator = StandardizedOperator {
            matrix,
            center,
            inv_scale: scale.mapv(f64::recip),
        };
        let block = (rank + options.oversampling).min(m).min(n);
        let mut w = initial_block(n, block, warm_start, options.seed);
        let mut previous: Option<Array1<f64>> = None;

        for iteration in 1..=options.max_iterations {
            let q = operator.apply(&w).thin_q();
            let projected_t = operator.apply_transpose(&q);
            let ritz = projected_t.singular_values()?;

            let converged = previous
                .as_ref()
                .is_some_and(|prev| ritz_converged(prev, &ritz, rank, options.tolerance));
            if converged {
                log::debug!("subspace iteration converged at rank {rank} after {iteration} iterations");
                return finish(&q, &projected_t, rank, iteration);
            }
            previous = Some(ritz);
            w = projected_t.thin_q();
        }

        Err(FactorizationError::NoConvergence {
            rank,
            iterations: options.max_iterations,
        })
    }
}

/// Rotates the converged block into singular triplets.
///
/// With `Bᵀ = Aᵀ Q = V_b S U_bᵀ`, the left factor is `Q U_b`, which keeps the
/// columns of `u` orthonormal.
fn finish(
    q: &Array2<f64>,
    projected_t: &Array2<f64>,
    rank: usize,
    iterations: usize,
) -> Result<Factorization, FactorizationError> {
    let svd = projected_t.thin_svd()?;
    Ok(Factorization {
        u: q.dot(&svd.v.slice(s![.., ..rank])),
        d: svd.s.slice(s![..rank]).to_owned(),
        v: svd.u.slice(s![.., ..rank]).to_owned(),
        iterations,
    })
}
