use rayon::prelude::*;
use std::ops::Range;

/// Partitions handed out per worker, so uneven windows still balance.
const PARTITIONS_PER_WORKER: usize = 4;

/// Execution substrate for the scan and verification stages.
///
/// Implementations run `task` once per partition, in any order and on any
/// thread, and return the outputs in partition order.
pub trait Dispatcher: Sync {
    fn workers(&self) -> usize;

    fn map_partitions<T, F>(&self, partitions: &[Range<usize>], task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Sync + Send;
}

/// Runs every partition on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialDispatcher;

impl Dispatcher for SequentialDispatcher {
    fn workers(&self) -> usize {
        1
    }

    fn map_partitions<T, F>(&self, partitions: &[Range<usize>], task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Sync + Send,
    {
        partitions.iter().cloned().map(task).collect()
    }
}

/// Runs partitions on a dedicated rayon thread pool.
#[derive(Debug)]
pub struct RayonDispatcher {
    pool: rayon::ThreadPool,
}

impl RayonDispatcher {
    /// Builds a pool with `threads` workers, or one per core when `None`.
    pub fn new(threads: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("tcor-worker-{index}"))
            .build()?;
        Ok(Self { pool })
    }
}

impl Dispatcher for RayonDispatcher {
    fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn map_partitions<T, F>(&self, partitions: &[Range<usize>], task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Sync + Send,
    {
        self.pool
            .install(|| partitions.par_iter().cloned().map(&task).collect())
    }
}

/// Splits `0..len` into contiguous ranges sized for `workers`.
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let pieces = (workers.max(1) * PARTITIONS_PER_WORKER).min(len);
    let chunk = len.div_ceil(pieces);
    (0..len)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(len))
        .collect()
}
