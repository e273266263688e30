use crate::types::SearchError;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Columns whose centered norm falls below this fraction of their raw norm
/// (or of one, whichever is larger) are treated as constant.
pub const DEGENERATE_SCALE_EPSILON: f64 = 1.0e-10;

/// Relative tolerance when checking that stored statistics describe a matrix.
const STATISTICS_MATCH_TOLERANCE: f64 = 1.0e-9;

struct ColumnStats {
    mean: f64,
    scale: f64,
    raw_norm: f64,
    finite: bool,
}

/// Sums run on the column divided by its largest magnitude, so squares of
/// large finite values cannot overflow.
fn column_stats(column: ArrayView1<'_, f64>) -> ColumnStats {
    let finite = column.iter().all(|v| v.is_finite());
    let peak = column.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !finite || peak == 0.0 {
        return ColumnStats {
            mean: 0.0,
            scale: 0.0,
            raw_norm: 0.0,
            finite,
        };
    }

    let unit_mean = column.iter().map(|v| v / peak).sum::<f64>() / column.len() as f64;
    let (centered_sq, raw_sq) = column.iter().fold((0.0, 0.0), |(c, r), &v| {
        let u = v / peak;
        let d = u - unit_mean;
        (c + d * d, r + u * u)
    });
    ColumnStats {
        mean: unit_mean * peak,
        scale: centered_sq.sqrt() * peak,
        raw_norm: raw_sq.sqrt() * peak,
        finite,
    }
}

/// Per-column centering and scaling statistics.
///
/// `scale[j]` is the Euclidean norm of the centered column, so the dot
/// product of two standardized columns is their Pearson correlation.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnScaler {
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl ColumnScaler {
    /// Computes statistics for every column of `matrix` (observations in rows).
    pub fn fit(matrix: ArrayView2<'_, f64>) -> Result<Self, SearchError> {
        let (rows, cols) = matrix.dim();
        if rows < 2 {
            return Err(SearchError::InvalidInput(format!(
                "at least two observations are required, got {rows}"
            )));
        }
        if cols == 0 {
            return Err(SearchError::InvalidInput(
                "the input matrix has no columns".to_string(),
            ));
        }

        let stats: Vec<ColumnStats> = matrix
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(column_stats)
            .collect();

        let mut means = Vec::with_capacity(cols);
        let mut scales = Vec::with_capacity(cols);
        for (column, stat) in stats.into_iter().enumerate() {
            if !stat.finite {
                return Err(SearchError::InvalidInput(format!(
                    "column {column} contains a non-finite value; missing values are not supported"
                )));
            }
            if !stat.scale.is_finite() || !stat.raw_norm.is_finite() {
                return Err(SearchError::InvalidInput(format!(
                    "column {column} has values too large to standardize"
                )));
            }
            if stat.scale <= DEGENERATE_SCALE_EPSILON * stat.raw_norm.max(1.0) {
                return Err(SearchError::DegenerateColumn {
                    column,
                    scale: stat.scale,
                });
            }
            means.push(stat.mean);
            scales.push(stat.scale);
        }

        Ok(Self {
            means: Array1::from(means),
            scales: Array1::from(scales),
        })
    }

    pub fn from_parts(means: Array1<f64>, scales: Array1<f64>) -> Self {
        Self { means, scales }
    }

    pub fn means(&self) -> ArrayView1<'_, f64> {
        self.means.view()
    }

    pub fn scales(&self) -> ArrayView1<'_, f64> {
        self.scales.view()
    }

    pub fn n_columns(&self) -> usize {
        self.means.len()
    }

    /// True when `other` holds the same statistics up to rounding.
    pub fn agrees_with(&self, other: &ColumnScaler) -> bool {
        let close = |a: &f64, b: &f64| {
            (a - b).abs() <= STATISTICS_MATCH_TOLERANCE * a.abs().max(b.abs()).max(1.0)
        };
        self.n_columns() == other.n_columns()
            && self.means.iter().zip(other.means.iter()).all(|(a, b)| close(a, b))
            && self.scales.iter().zip(other.scales.iter()).all(|(a, b)| close(a, b))
    }

    /// Materializes the standardized columns, one contiguous row per column.
    pub fn standardize(&self, matrix: ArrayView2<'_, f64>) -> StandardizedMatrix {
        let (rows, cols) = matrix.dim();
        debug_assert_eq!(cols, self.n_columns());
        let mut columns = Array2::<f64>::zeros((cols, rows));
        Zip::from(columns.rows_mut())
            .and(matrix.columns())
            .and(&self.means)
            .and(&self.scales)
            .par_for_each(|mut out, raw, &mean, &scale| {
                let inv = scale.recip();
                Zip::from(&mut out)
                    .and(&raw)
                    .for_each(|slot, &value| *slot = (value - mean) * inv);
            });
        StandardizedMatrix { columns }
    }
}

/// Standardized data used for exact verification.
#[derive(Clone, Debug)]
pub struct StandardizedMatrix {
    columns: Array2<f64>,
}

impl StandardizedMatrix {
    pub fn n_columns(&self) -> usize {
        self.columns.nrows()
    }

    pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
        self.columns.row(j)
    }

    /// Exact Pearson correlation between columns `i` and `j`.
    #[inline]
    pub fn correlation(&self, i: usize, j: usize) -> f64 {
        self.columns.row(i).dot(&self.columns.row(j)).clamp(-1.0, 1.0)
    }
}
