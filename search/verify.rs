use crate::candidates::Candidate;
use crate::standardize::StandardizedMatrix;
use crate::types::Match;

/// Acceptance rule applied to exact correlations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPredicate {
    pub threshold: f64,
    pub include_anti: bool,
}

impl FilterPredicate {
    pub fn new(threshold: f64, include_anti: bool) -> Self {
        Self {
            threshold,
            include_anti,
        }
    }

    #[inline]
    pub fn accepts(&self, value: f64) -> bool {
        if self.include_anti {
            value.abs() >= self.threshold
        } else {
            value >= self.threshold
        }
    }
}

/// Recomputes every candidate from the full-rank data and keeps the ones
/// that pass `predicate`. Indices stay in concatenated column space.
pub fn verify(
    candidates: &[Candidate],
    standardized: &StandardizedMatrix,
    predicate: FilterPredicate,
) -> Vec<Match> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let value = standardized.correlation(candidate.i, candidate.j);
            predicate.accepts(value).then_some(Match {
                i: candidate.i,
                j: candidate.j,
                value,
            })
        })
        .collect()
}
