use dyn_stack::{MemBuffer, MemStack};
use faer::diag::Diag;
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
}

/// Copies an ndarray matrix into faer. The operands here are thin blocks of
/// the subspace iteration, so the copy is never the bottleneck.
fn to_faer<S: Data<Elem = f64>>(array: &ArrayBase<S, Ix2>) -> Mat<f64> {
    Mat::from_fn(array.nrows(), array.ncols(), |i, j| array[(i, j)])
}

fn to_ndarray(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn singular_vector(values: &Diag<f64>) -> Array1<f64> {
    values.column_vector().iter().copied().collect()
}

/// Runs faer's SVD on `matrix`, writing thin factors when `u`/`v` are given.
fn decompose(
    matrix: MatRef<'_, f64>,
    u: Option<&mut Mat<f64>>,
    v: Option<&mut Mat<f64>>,
) -> Result<Diag<f64>, FaerLinalgError> {
    let (rows, cols) = matrix.shape();
    let vectors = if u.is_some() {
        ComputeSvdVectors::Thin
    } else {
        ComputeSvdVectors::No
    };
    let mut singular = Diag::<f64>::zeros(rows.min(cols));
    let par = get_global_parallelism();
    let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
        rows,
        cols,
        vectors,
        vectors,
        par,
        Default::default(),
    ));
    let mut stack = MemStack::new(&mut mem);
    svd::svd(
        matrix,
        singular.as_mut(),
        u.map(|m| m.as_mut()),
        v.map(|m| m.as_mut()),
        par,
        &mut stack,
        Default::default(),
    )
    .map_err(|_| FaerLinalgError::SvdNoConvergence)?;
    Ok(singular)
}

/// Thin singular value decomposition `A = U diag(s) Vᵀ` with `U` of shape
/// `rows × k`, `V` of shape `cols × k` and `k = min(rows, cols)`.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    pub u: Array2<f64>,
    pub s: Array1<f64>,
    pub v: Array2<f64>,
}

pub trait FaerSvd {
    /// Singular values only, in descending order.
    fn singular_values(&self) -> Result<Array1<f64>, FaerLinalgError>;

    fn thin_svd(&self) -> Result<ThinSvd, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn singular_values(&self) -> Result<Array1<f64>, FaerLinalgError> {
        let singular = decompose(to_faer(self).as_ref(), None, None)?;
        Ok(singular_vector(&singular))
    }

    fn thin_svd(&self) -> Result<ThinSvd, FaerLinalgError> {
        let (rows, cols) = self.dim();
        let k = rows.min(cols);
        let mut u = Mat::<f64>::zeros(rows, k);
        let mut v = Mat::<f64>::zeros(cols, k);
        let singular = decompose(to_faer(self).as_ref(), Some(&mut u), Some(&mut v))?;
        Ok(ThinSvd {
            u: to_ndarray(u.as_ref()),
            s: singular_vector(&singular),
            v: to_ndarray(v.as_ref()),
        })
    }
}

pub trait FaerQr {
    /// Orthonormal basis `Q` (`rows × min(rows, cols)`) of the thin QR factorization.
    fn thin_q(&self) -> Array2<f64>;
}

impl<S: Data<Elem = f64>> FaerQr for ArrayBase<S, Ix2> {
    fn thin_q(&self) -> Array2<f64> {
        to_ndarray(to_faer(self).as_ref().qr().compute_thin_Q().as_ref())
    }
}
