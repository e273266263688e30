use crate::candidates::{Candidate, GroupSplit, ScanLayout, longest_run, pruning_radius, window_bounds};
use crate::dispatch::{Dispatcher, SequentialDispatcher, partition};
use crate::embed::{RestartState, effective_rank, embed};
use crate::linalg::{Factorizer, SubspaceIteration};
use crate::options::{FilterMode, SearchOptions};
use crate::progress::{SearchProgressObserver, SearchStage, Silent};
use crate::standardize::{ColumnScaler, StandardizedMatrix};
use crate::types::{Match, Query, SearchError, SearchResult};
use crate::verify::{FilterPredicate, verify};
use itertools::Itertools;
use ndarray::{ArrayView2, Axis, CowArray, Ix2, concatenate};
use std::time::Instant;

/// Working threshold of the first pass of a [`Query::Top`] search.
pub const TOP_START_THRESHOLD: f64 = 0.99;
/// Amount the working threshold drops after each short pass.
pub const TOP_THRESHOLD_STEP: f64 = 0.02;

/// The matrices being searched.
#[derive(Debug, Clone, Copy)]
pub struct SearchInput<'a> {
    pub x: ArrayView2<'a, f64>,
    pub y: Option<ArrayView2<'a, f64>>,
}

impl<'a> SearchInput<'a> {
    pub fn single(x: ArrayView2<'a, f64>) -> Self {
        Self { x, y: None }
    }

    pub fn pair(x: ArrayView2<'a, f64>, y: ArrayView2<'a, f64>) -> Self {
        Self { x, y: Some(y) }
    }
}

/// Finds every column pair of `x` (or every `x`/`y` pair when `y` is given)
/// whose correlation satisfies `query`, running on the calling thread.
pub fn thresholded_correlation<'a>(
    x: ArrayView2<'a, f64>,
    y: Option<ArrayView2<'a, f64>>,
    query: Query,
    options: &SearchOptions,
    restart: Option<RestartState>,
) -> Result<SearchResult, SearchError> {
    let mut progress = Silent;
    thresholded_correlation_with(
        SearchInput { x, y },
        query,
        options,
        restart,
        &SubspaceIteration,
        &SequentialDispatcher,
        &mut progress,
    )
}

/// [`thresholded_correlation`] with explicit collaborators.
pub fn thresholded_correlation_with<F, D, P>(
    input: SearchInput<'_>,
    query: Query,
    options: &SearchOptions,
    restart: Option<RestartState>,
    factorizer: &F,
    dispatcher: &D,
    progress: &mut P,
) -> Result<SearchResult, SearchError>
where
    F: Factorizer + ?Sized,
    D: Dispatcher,
    P: SearchProgressObserver,
{
    let start = Instant::now();
    validate_query(query)?;

    let (matrix, groups) = combine(input)?;
    let view = matrix.view();
    let (n_rows, n_cols) = view.dim();
    if n_cols < 2 {
        return Err(SearchError::InvalidInput(format!(
            "at least two columns are required, got {n_cols}"
        )));
    }

    progress.on_stage_start(SearchStage::Standardization, n_cols);
    let scaler = ColumnScaler::fit(view)?;
    let standardized = scaler.standardize(view);
    progress.on_stage_advance(SearchStage::Standardization, n_cols);
    progress.on_stage_finish(SearchStage::Standardization);

    let rank = effective_rank(options.rank, n_rows, n_cols);
    progress.on_stage_start(SearchStage::Factorization, rank);
    let outcome = embed(factorizer, view, &scaler, rank, restart, &options.factorization)?;
    progress.on_stage_finish(SearchStage::Factorization);
    log::info!(
        "rank-{rank} embedding of {n_cols} columns ready in {:.3}s",
        outcome.factorization_time.as_secs_f64()
    );

    let layout = ScanLayout::new(&outcome.embedding, options.include_anti);
    let mut controller = IterationController::new(query, options.max_iter);

    if options.dry_run {
        let threshold = controller.working_threshold();
        let ends = window_bounds(layout.keys(), pruning_radius(threshold));
        return Ok(SearchResult {
            matches: Vec::new(),
            restart: Some(outcome.restart),
            longest_run: longest_run(&ends),
            total_candidates: 0,
            threshold_used: threshold,
            iterations: 0,
            exhausted: false,
            factorization_time: outcome.factorization_time,
            total_time: start.elapsed(),
        });
    }

    let context = PassContext {
        layout: &layout,
        standardized: &standardized,
        groups,
        include_anti: options.include_anti,
        filter_mode: options.filter_mode,
    };

    loop {
        let threshold = controller.working_threshold();
        let pass_number = controller.iteration() + 1;
        progress.on_pass_start(pass_number, threshold);
        let pass = context.run(pass_number, threshold, dispatcher, progress);
        log::info!(
            "pass {pass_number}: threshold {threshold:.4}, longest run {}, {} candidates, {} verified",
            pass.longest_run,
            pass.candidates,
            pass.matches.len()
        );
        let verified = pass.matches.len();
        let longest = pass.longest_run;
        let candidates = pass.candidates;

        if let Step::Finished { exhausted } = controller.after_pass(verified, candidates) {
            if exhausted {
                log::warn!(
                    "found {verified} pairs, short of the requested count, after {} passes",
                    controller.iteration()
                );
            }
            return Ok(SearchResult {
                matches: assemble(pass.matches, groups),
                restart: None,
                longest_run: longest,
                total_candidates: controller.accumulated_candidates(),
                threshold_used: threshold,
                iterations: controller.iteration(),
                exhausted,
                factorization_time: outcome.factorization_time,
                total_time: start.elapsed(),
            });
        }
    }
}

fn validate_query(query: Query) -> Result<(), SearchError> {
    match query {
        Query::Threshold(t) if !(t > -1.0 && t < 1.0) => Err(SearchError::InvalidThreshold(t)),
        Query::Top(0) => Err(SearchError::InvalidInput(
            "a top-N query needs N of at least one".to_string(),
        )),
        _ => Ok(()),
    }
}

fn combine<'a>(
    input: SearchInput<'a>,
) -> Result<(CowArray<'a, f64, Ix2>, Option<GroupSplit>), SearchError> {
    match input.y {
        None => Ok((CowArray::from(input.x), None)),
        Some(y) => {
            if y.nrows() != input.x.nrows() {
                return Err(SearchError::InvalidInput(format!(
                    "both matrices need the same number of observations, got {} and {}",
                    input.x.nrows(),
                    y.nrows()
                )));
            }
            if input.x.ncols() == 0 || y.ncols() == 0 {
                return Err(SearchError::InvalidInput(
                    "both matrices need at least one column".to_string(),
                ));
            }
            let joined = concatenate(Axis(1), &[input.x, y])
                .map_err(|err| SearchError::InvalidInput(err.to_string()))?;
            Ok((CowArray::from(joined), Some(GroupSplit(input.x.ncols()))))
        }
    }
}

enum Step {
    Continue,
    Finished { exhausted: bool },
}

/// Owned loop state for threshold relaxation.
struct IterationController {
    target: Option<usize>,
    max_iter: usize,
    working_threshold: f64,
    accumulated_candidates: usize,
    iteration: usize,
}

impl IterationController {
    fn new(query: Query, max_iter: usize) -> Self {
        let (target, working_threshold) = match query {
            Query::Threshold(t) => (None, t),
            Query::Top(n) => (Some(n), TOP_START_THRESHOLD),
        };
        Self {
            target,
            max_iter: max_iter.max(1),
            working_threshold,
            accumulated_candidates: 0,
            iteration: 0,
        }
    }

    fn working_threshold(&self) -> f64 {
        self.working_threshold
    }

    fn iteration(&self) -> usize {
        self.iteration
    }

    fn accumulated_candidates(&self) -> usize {
        self.accumulated_candidates
    }

    fn after_pass(&mut self, verified: usize, candidates: usize) -> Step {
        self.iteration += 1;
        self.accumulated_candidates += candidates;
        let Some(target) = self.target else {
            return Step::Finished { exhausted: false };
        };
        if verified >= target {
            return Step::Finished { exhausted: false };
        }
        if self.iteration >= self.max_iter || self.working_threshold <= -1.0 {
            return Step::Finished { exhausted: true };
        }
        self.working_threshold = (self.working_threshold - TOP_THRESHOLD_STEP).max(-1.0);
        Step::Continue
    }
}

struct PassOutput {
    matches: Vec<Match>,
    candidates: usize,
    longest_run: usize,
}

struct PassContext<'a> {
    layout: &'a ScanLayout,
    standardized: &'a StandardizedMatrix,
    groups: Option<GroupSplit>,
    include_anti: bool,
    filter_mode: FilterMode,
}

impl PassContext<'_> {
    fn run<D, P>(
        &self,
        pass: usize,
        threshold: f64,
        dispatcher: &D,
        progress: &mut P,
    ) -> PassOutput
    where
        D: Dispatcher,
        P: SearchProgressObserver,
    {
        let radius = pruning_radius(threshold);
        let ends = window_bounds(self.layout.keys(), radius);
        let run = longest_run(&ends);
        let partitions = partition(self.layout.len(), dispatcher.workers());
        let predicate = FilterPredicate::new(threshold, self.include_anti);
        let layout = self.layout;
        let groups = self.groups;
        let standardized = self.standardized;
        let scan_stage = SearchStage::CandidateScan { pass };
        let verify_stage = SearchStage::Verification { pass };

        progress.on_stage_start(scan_stage, layout.len());
        let (candidates, matches): (usize, Vec<Match>) = match self.filter_mode {
            FilterMode::Local => {
                let pieces: Vec<Vec<Candidate>> = dispatcher.map_partitions(&partitions, |anchors| {
                    layout.slice(anchors, &ends).scan(radius, groups)
                });
                progress.on_stage_advance(scan_stage, layout.len());
                progress.on_stage_finish(scan_stage);

                let candidates: Vec<Candidate> = pieces.into_iter().flatten().collect();
                progress.on_stage_start(verify_stage, candidates.len());
                let chunks = partition(candidates.len(), dispatcher.workers());
                let verified = dispatcher.map_partitions(&chunks, |range| {
                    verify(&candidates[range], standardized, predicate)
                });
                progress.on_stage_advance(verify_stage, candidates.len());
                (candidates.len(), verified.into_iter().flatten().collect())
            }
            FilterMode::Distributed => {
                let pieces: Vec<(usize, Vec<Match>)> =
                    dispatcher.map_partitions(&partitions, |anchors| {
                        let candidates = layout.slice(anchors, &ends).scan(radius, groups);
                        (candidates.len(), verify(&candidates, standardized, predicate))
                    });
                progress.on_stage_advance(scan_stage, layout.len());
                progress.on_stage_finish(scan_stage);

                let candidates: usize = pieces.iter().map(|(count, _)| count).sum();
                progress.on_stage_start(verify_stage, candidates);
                progress.on_stage_advance(verify_stage, candidates);
                let matches = pieces.into_iter().flat_map(|(_, found)| found).collect();
                (candidates, matches)
            }
        };
        progress.on_stage_finish(verify_stage);

        PassOutput {
            matches,
            candidates,
            longest_run: run,
        }
    }
}

/// Orders matches strongest first, drops duplicates and maps cross-search
/// indices back to their own matrices.
fn assemble(matches: Vec<Match>, groups: Option<GroupSplit>) -> Vec<Match> {
    matches
        .into_iter()
        .sorted_by(|a, b| {
            b.value
                .total_cmp(&a.value)
                .then(a.i.cmp(&b.i))
                .then(a.j.cmp(&b.j))
        })
        .dedup_by(|a, b| a.i == b.i && a.j == b.j)
        .map(|found| match groups {
            Some(GroupSplit(split)) => Match {
                i: found.i,
                j: found.j - split,
                value: found.value,
            },
            None => found,
        })
        .collect()
}
