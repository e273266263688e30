use crate::linalg::{Factorization, FactorizationOptions, Factorizer};
use crate::options::{ConfigError, load_toml, save_toml};
use crate::standardize::ColumnScaler;
use crate::types::SearchError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

/// Factorization state a caller can keep and hand back to skip or warm-start
/// the factorization when only the rank or the threshold changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartState {
    n_rows: usize,
    means: Array1<f64>,
    scales: Array1<f64>,
    factorization: Factorization,
}

impl RestartState {
    pub fn rank(&self) -> usize {
        self.factorization.rank()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.means.len()
    }

    pub fn factorization(&self) -> &Factorization {
        &self.factorization
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        save_toml(self, path.as_ref())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path.as_ref())
    }

    fn check_compatible(&self, n_rows: usize, scaler: &ColumnScaler) -> Result<(), SearchError> {
        if self.n_rows != n_rows || self.n_columns() != scaler.n_columns() {
            return Err(SearchError::IncompatibleRestart(format!(
                "state describes a {}x{} matrix, input is {}x{}",
                self.n_rows,
                self.n_columns(),
                n_rows,
                scaler.n_columns()
            )));
        }
        let stored = ColumnScaler::from_parts(self.means.clone(), self.scales.clone());
        if !stored.agrees_with(scaler) {
            return Err(SearchError::IncompatibleRestart(
                "column statistics differ from the matrix the state was computed for".to_string(),
            ));
        }
        Ok(())
    }
}

/// Low-dimensional coordinates, one row per input column.
///
/// Row `j` is `Uᵀ a_j` for the standardized column `a_j` and orthonormal `U`,
/// so distances between rows never exceed distances between columns.
#[derive(Debug, Clone)]
pub struct Embedding {
    coords: Array2<f64>,
}

impl Embedding {
    pub fn from_factorization(factorization: &Factorization) -> Self {
        let coords = &factorization.v * &factorization.d.view().insert_axis(Axis(0));
        Self { coords }
    }

    pub fn rank(&self) -> usize {
        self.coords.ncols()
    }

    pub fn n_columns(&self) -> usize {
        self.coords.nrows()
    }

    pub fn row(&self, j: usize) -> ArrayView1<'_, f64> {
        self.coords.row(j)
    }

    /// Coordinate along the dominant singular direction.
    #[inline]
    pub fn sort_key(&self, j: usize) -> f64 {
        self.coords[(j, 0)]
    }
}

pub struct EmbedOutcome {
    pub embedding: Embedding,
    pub restart: RestartState,
    pub factorization_time: Duration,
}

/// Rank actually used for an `n_rows × n_cols` input.
pub fn effective_rank(requested: usize, n_rows: usize, n_cols: usize) -> usize {
    let mut rank = requested.max(1);
    if rank >= n_cols {
        let reduced = (n_cols / 2).saturating_sub(1).max(1);
        log::warn!("rank {rank} is not below the column count {n_cols}; using {reduced}");
        rank = reduced;
    }
    let cap = n_rows.min(n_cols);
    if rank > cap {
        log::warn!("rank {rank} exceeds the rank of a {n_rows}x{n_cols} matrix; using {cap}");
        rank = cap;
    }
    rank
}

/// Produces the rank-`rank` embedding, reusing or warm-starting from `restart`.
pub fn embed<F: Factorizer + ?Sized>(
    factorizer: &F,
    matrix: ArrayView2<'_, f64>,
    scaler: &ColumnScaler,
    rank: usize,
    restart: Option<RestartState>,
    options: &FactorizationOptions,
) -> Result<EmbedOutcome, SearchError> {
    let start = Instant::now();
    let n_rows = matrix.nrows();

    if let Some(state) = restart {
        state.check_compatible(n_rows, scaler)?;
        if state.rank() >= rank {
            log::info!(
                "reusing stored rank-{} factorization at rank {rank}",
                state.rank()
            );
            let embedding = Embedding::from_factorization(&state.factorization.truncated(rank));
            return Ok(EmbedOutcome {
                embedding,
                restart: state,
                factorization_time: start.elapsed(),
            });
        }

        log::info!(
            "warm-starting rank-{rank} factorization from stored rank {}",
            state.rank()
        );
        let factorization = factorizer.factorize(
            matrix,
            rank,
            scaler.means(),
            scaler.scales(),
            Some(state.factorization.v.view()),
            options,
        )?;
        return Ok(finish(n_rows, scaler, factorization, start));
    }

    log::info!("computing rank-{rank} factorization");
    let factorization = factorizer.factorize(
        matrix,
        rank,
        scaler.means(),
        scaler.scales(),
        None,
        options,
    )?;
    Ok(finish(n_rows, scaler, factorization, start))
}

fn finish(
    n_rows: usize,
    scaler: &ColumnScaler,
    factorization: Factorization,
    start: Instant,
) -> EmbedOutcome {
    let embedding = Embedding::from_factorization(&factorization);
    let factorization_time = start.elapsed();
    log::debug!(
        "factorization finished in {:.3}s after {} iterations, leading singular value {:.6}",
        factorization_time.as_secs_f64(),
        factorization.iterations,
        factorization.d.first().copied().unwrap_or(0.0)
    );
    EmbedOutcome {
        embedding,
        restart: RestartState {
            n_rows,
            means: scaler.means().to_owned(),
            scales: scaler.scales().to_owned(),
            factorization,
        },
        factorization_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::SubspaceIteration;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn rank_is_reduced_for_narrow_inputs() {
        assert_eq!(effective_rank(10, 50, 400), 10);
        assert_eq!(effective_rank(10, 50, 10), 4);
        assert_eq!(effective_rank(5, 50, 3), 1);
        assert_eq!(effective_rank(0, 50, 30), 1);
        assert_eq!(effective_rank(20, 8, 400), 8);
    }

    #[test]
    fn embedding_distances_never_exceed_column_distances() {
        let matrix = random_matrix(25, 60, 4);
        let scaler = ColumnScaler::fit(matrix.view()).unwrap();
        let standardized = scaler.standardize(matrix.view());
        let outcome = embed(
            &SubspaceIteration,
            matrix.view(),
            &scaler,
            3,
            None,
            &FactorizationOptions::default(),
        )
        .unwrap();
        let embedding = &outcome.embedding;
        assert_eq!(embedding.rank(), 3);
        assert_eq!(embedding.n_columns(), 60);

        for i in 0..60 {
            for j in (i + 1)..60 {
                let projected = (&embedding.row(i) - &embedding.row(j))
                    .mapv(|v| v * v)
                    .sum();
                let exact = 2.0 * (1.0 - standardized.correlation(i, j));
                assert!(projected <= exact + 1e-9, "pair ({i}, {j})");
            }
        }
    }

    #[test]
    fn restart_with_enough_rank_skips_factorization() {
        let matrix = random_matrix(20, 40, 8);
        let scaler = ColumnScaler::fit(matrix.view()).unwrap();
        let options = FactorizationOptions::default();
        let first = embed(&SubspaceIteration, matrix.view(), &scaler, 5, None, &options).unwrap();
        let reused = embed(
            &SubspaceIteration,
            matrix.view(),
            &scaler,
            3,
            Some(first.restart.clone()),
            &options,
        )
        .unwrap();
        assert_eq!(reused.restart, first.restart);
        for j in 0..40 {
            for k in 0..3 {
                assert_eq!(reused.embedding.row(j)[k], first.embedding.row(j)[k]);
            }
        }
    }

    #[test]
    fn restart_from_another_matrix_is_rejected() {
        let matrix = random_matrix(20, 40, 8);
        let other = random_matrix(20, 40, 9);
        let options = FactorizationOptions::default();
        let scaler = ColumnScaler::fit(matrix.view()).unwrap();
        let other_scaler = ColumnScaler::fit(other.view()).unwrap();
        let first = embed(&SubspaceIteration, matrix.view(), &scaler, 4, None, &options).unwrap();
        let result = embed(
            &SubspaceIteration,
            other.view(),
            &other_scaler,
            4,
            Some(first.restart),
            &options,
        );
        assert!(matches!(result, Err(SearchError::IncompatibleRestart(_))));
    }

    #[test]
    fn restart_state_round_trips_through_toml() {
        let matrix = random_matrix(12, 30, 2);
        let scaler = ColumnScaler::fit(matrix.view()).unwrap();
        let outcome = embed(
            &SubspaceIteration,
            matrix.view(),
            &scaler,
            2,
            None,
            &FactorizationOptions::default(),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.toml");
        outcome.restart.save(&path).unwrap();
        let loaded = RestartState::load(&path).unwrap();
        assert_eq!(loaded.rank(), 2);
        assert_eq!(loaded.n_rows(), 12);
        assert_eq!(loaded, outcome.restart);
    }
}
