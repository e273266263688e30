use crate::embed::RestartState;
use crate::linalg::FactorizationError;
use std::time::Duration;
use thiserror::Error;

/// What the caller is asking for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Query {
    /// Every pair whose correlation meets the threshold, which must lie in `(-1, 1)`.
    Threshold(f64),
    /// At least this many of the strongest pairs, found by relaxing the
    /// working threshold until enough pairs verify.
    Top(usize),
}

/// A verified pair and its exact correlation.
///
/// For a single input matrix `i < j`. When a second matrix is supplied, `i`
/// indexes a column of the first and `j` a column of the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub i: usize,
    pub j: usize,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Verified pairs sorted by value, strongest first. Empty on a dry run.
    pub matches: Vec<Match>,
    /// Factorization state, returned on a dry run only.
    pub restart: Option<RestartState>,
    pub longest_run: usize,
    /// Candidate pairs examined across all iterations.
    pub total_candidates: usize,
    pub threshold_used: f64,
    pub iterations: usize,
    /// Set when a [`Query::Top`] request ran out of iterations short of its target.
    pub exhausted: bool,
    pub factorization_time: Duration,
    pub total_time: Duration,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Column {column} is constant (scale {scale:e}); its correlation is undefined.")]
    DegenerateColumn { column: usize, scale: f64 },

    #[error("{0}")]
    Factorization(#[from] FactorizationError),

    #[error("Threshold {0} must lie strictly between -1 and 1.")]
    InvalidThreshold(f64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Restart state does not match this input: {0}")]
    IncompatibleRestart(String),
}
