use std::fmt;

/// A unit of search work. Scanning and verification run once per pass of the
/// threshold relaxation, so they carry the 1-based pass they belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchStage {
    Standardization,
    Factorization,
    CandidateScan { pass: usize },
    Verification { pass: usize },
}

impl SearchStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Standardization => "column standardization",
            Self::Factorization => "truncated factorization",
            Self::CandidateScan { .. } => "candidate scan",
            Self::Verification { .. } => "exact verification",
        }
    }

    pub fn pass(self) -> Option<usize> {
        match self {
            Self::CandidateScan { pass } | Self::Verification { pass } => Some(pass),
            Self::Standardization | Self::Factorization => None,
        }
    }
}

impl fmt::Display for SearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pass() {
            Some(pass) => write!(f, "{}, pass {pass}", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// Receives search progress. Every method defaults to doing nothing.
///
/// Totals count columns for standardization, the target rank for
/// factorization, sorted embedding rows for the scan and candidate pairs for
/// verification.
pub trait SearchProgressObserver {
    /// A new pass is about to scan at `threshold`.
    fn on_pass_start(&mut self, _pass: usize, _threshold: f64) {}

    fn on_stage_start(&mut self, _stage: SearchStage, _total: usize) {}

    fn on_stage_advance(&mut self, _stage: SearchStage, _processed: usize) {}

    fn on_stage_finish(&mut self, _stage: SearchStage) {}
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl SearchProgressObserver for Silent {}
