use dyn_stack::{MemBuffer, MemStack};
use faer::diag::{Diag, DiagRef};
use faer::linalg::matmul::matmul;
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Accum, Mat, MatRef, Par, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2, s};
use std::marker::PhantomData;
use thiserror::Error;

/// Relative singular-value cutoff of [`FaerPinv::pinv`], independent of the
/// matrix size.
pub const PINV_RCOND: f64 = 1e-15;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("matrix contains non-finite entries")]
    NonFiniteInput,
}

#[inline]
fn should_use_faer_matmul(m: usize, n: usize, k: usize) -> bool {
    // Stay on ndarray for tiny products; faer's GEMM setup only pays off
    // once one side is moderately sized.
    const MIN_DIM: usize = 32;
    const MIN_FLOP_SCALE: usize = 64 * 64;
    (m >= MIN_DIM || n >= MIN_DIM || k >= MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= MIN_FLOP_SCALE
}

#[inline]
fn gemm_parallelism(m: usize, n: usize, k: usize) -> Par {
    if m.max(n) < 128 || k < 128 {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

/// Compute A^T * A. For A of shape (n, p) the result is (p, p).
#[inline]
pub fn fast_ata<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Array2<f64> {
    let (n, p) = a.dim();
    if !should_use_faer_matmul(p, p, n) {
        return a.t().dot(a);
    }

    let mut result = Mat::<f64>::zeros(p, p);
    let a_view = FaerArrayView::new(a);
    let a_ref = a_view.as_ref();
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_ref.transpose(),
        a_ref,
        1.0,
        gemm_parallelism(p, p, n),
    );
    mat_to_array(result.as_ref())
}

/// Compute A^T * B for A (n, p) and B (n, q).
#[inline]
pub fn fast_atb<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    let (n, p) = a.dim();
    let (n_b, q) = b.dim();
    debug_assert_eq!(n, n_b, "A and B must have same number of rows");

    if !should_use_faer_matmul(p, q, n) {
        return a.t().dot(b);
    }

    let mut result = Mat::<f64>::zeros(p, q);
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref().transpose(),
        b_view.as_ref(),
        1.0,
        gemm_parallelism(p, q, n),
    );
    mat_to_array(result.as_ref())
}

/// Compute A * B for A (n, p) and B (p, q).
///
/// The causal estimator calls this with the dense (n, n) weight matrix on the
/// left, which is where faer's blocked GEMM matters most.
#[inline]
pub fn fast_ab<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    let (n, p) = a.dim();
    let (p_b, q) = b.dim();
    debug_assert_eq!(p, p_b, "A and B must have compatible inner dimensions");

    if !should_use_faer_matmul(n, q, p) {
        return a.dot(b);
    }

    let mut result = Mat::<f64>::zeros(n, q);
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref(),
        b_view.as_ref(),
        1.0,
        gemm_parallelism(n, q, p),
    );
    mat_to_array(result.as_ref())
}

/// Compute A^T * v for A (n, p) and v (n,).
#[inline]
pub fn fast_atv<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    v: &ArrayBase<S2, Ix1>,
) -> Array1<f64> {
    let (n, p) = a.dim();
    debug_assert_eq!(n, v.len(), "A rows must match v length");

    if !should_use_faer_matmul(p, 1, n) {
        return a.t().dot(v);
    }

    let mut result = Mat::<f64>::zeros(p, 1);
    let a_view = FaerArrayView::new(a);
    let v_view = FaerColView::new(v);
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref().transpose(),
        v_view.as_ref(),
        1.0,
        gemm_parallelism(p, 1, n),
    );

    let mut out = Array1::<f64>::zeros(p);
    for i in 0..p {
        out[i] = result[(i, 0)];
    }
    out
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

/// Borrowed faer view over an ndarray matrix.
pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        // Negative or zero strides (reversed or broadcast views) are copied
        // into a compact owned buffer before handing them to faer kernels.
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.as_standard_layout().into_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }

        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        };
        // SAFETY: pointer/shape/strides come either from a live ndarray view
        // with positive strides borrowed for 'a, or from the owned compact
        // copy stored in `self`, which outlives the returned view.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

/// Borrowed faer column view over an ndarray vector.
pub struct FaerColView<'a> {
    ptr: *const f64,
    len: usize,
    stride: isize,
    owned: Option<Array1<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let stride = array.strides()[0];
        if stride <= 0 {
            let owned = array.to_owned();
            return Self {
                ptr: owned.as_ptr(),
                len,
                stride: 1,
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            len,
            stride,
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, len, stride) = if let Some(owned) = &self.owned {
            (owned.as_ptr(), owned.len(), 1)
        } else {
            (self.ptr, self.len, self.stride)
        };
        // SAFETY: analogous to FaerArrayView::as_ref.
        unsafe { MatRef::from_raw_parts(ptr, len, 1, stride, 0) }
    }
}

pub trait FaerSvd {
    /// Full SVD `A = U diag(s) Vt`. `U` is (m, m) and `Vt` is (n, n) when requested.
    fn svd(
        &self,
        compute_u: bool,
        compute_vt: bool,
    ) -> Result<(Option<Array2<f64>>, Array1<f64>, Option<Array2<f64>>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn svd(
        &self,
        compute_u: bool,
        compute_vt: bool,
    ) -> Result<(Option<Array2<f64>>, Array1<f64>, Option<Array2<f64>>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let faer_mat = faer_view.as_ref();
        let (rows, cols) = faer_mat.shape();

        let compute_u_flag = if compute_u {
            ComputeSvdVectors::Full
        } else {
            ComputeSvdVectors::No
        };
        let compute_v_flag = if compute_vt {
            ComputeSvdVectors::Full
        } else {
            ComputeSvdVectors::No
        };

        let mut singular = Diag::<f64>::zeros(rows.min(cols));
        let mut u_storage = compute_u.then(|| Mat::<f64>::zeros(rows, rows));
        let mut v_storage = compute_vt.then(|| Mat::<f64>::zeros(cols, cols));

        let par = get_global_parallelism();
        let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
            rows,
            cols,
            compute_u_flag,
            compute_v_flag,
            par,
            Default::default(),
        ));
        let stack = MemStack::new(&mut mem);

        svd::svd(
            faer_mat,
            singular.as_mut(),
            u_storage.as_mut().map(|mat| mat.as_mut()),
            v_storage.as_mut().map(|mat| mat.as_mut()),
            par,
            stack,
            Default::default(),
        )
        .map_err(|_| FaerLinalgError::SvdNoConvergence)?;

        let singular_values = diag_to_array(singular.as_ref());
        let u_opt = u_storage.map(|mat| mat_to_array(mat.as_ref()));
        let vt_opt = v_storage.map(|mat| mat_to_array(mat.as_ref().transpose()));

        Ok((u_opt, singular_values, vt_opt))
    }
}

pub trait FaerPinv {
    /// Moore-Penrose pseudo-inverse via SVD.
    ///
    /// Singular values at or below `PINV_RCOND` times the largest one are
    /// dropped. Singular and
    /// rank-deficient inputs therefore yield the minimum-norm least-squares
    /// inverse instead of an error.
    fn pinv(&self) -> Result<Array2<f64>, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerPinv for ArrayBase<S, Ix2> {
    fn pinv(&self) -> Result<Array2<f64>, FaerLinalgError> {
        let (rows, cols) = self.dim();
        if rows == 0 || cols == 0 {
            return Ok(Array2::zeros((cols, rows)));
        }
        if self.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::NonFiniteInput);
        }

        let (u, singular, vt) = self.svd(true, true)?;
        let (Some(u), Some(vt)) = (u, vt) else {
            return Err(FaerLinalgError::SvdNoConvergence);
        };

        let k = singular.len();
        let largest = singular.iter().copied().fold(0.0_f64, f64::max);
        let cutoff = PINV_RCOND * largest;

        // pinv(A) = V_k diag(1/s) U_k^T over the retained singular values.
        let mut v_scaled = vt.slice(s![..k, ..]).t().to_owned();
        for (mut column, &value) in v_scaled.columns_mut().into_iter().zip(singular.iter()) {
            if value > cutoff {
                column *= 1.0 / value;
            } else {
                column.fill(0.0);
            }
        }
        Ok(v_scaled.dot(&u.slice(s![.., ..k]).t()))
    }
}
