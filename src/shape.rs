//! Shape normalisation and validation shared by the solvers.
//!
//! Inputs arrive either as typed 1-D/2-D views or as dynamic-dimension views
//! (`ArrayViewD`). Everything is normalised here, once, into `(n, p)` sample
//! matrices and length-`n` outcome vectors before any numerical work starts.

use crate::error::RegressionError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, Axis, Ix1};

/// Reshape a dynamic-dimension input into an `(n, p)` sample matrix.
///
/// Rows are samples. A 1-D input becomes a single column, a 2-D input is taken
/// as is, and higher-dimensional inputs keep their first axis and flatten the
/// rest in row-major order.
pub fn as_sample_matrix(
    values: ArrayViewD<'_, f64>,
    name: &str,
) -> Result<Array2<f64>, RegressionError> {
    let shape = values.shape().to_vec();
    let Some((&n, rest)) = shape.split_first() else {
        return Err(RegressionError::InvalidInput(format!(
            "{name} must have at least one axis, got a scalar"
        )));
    };
    let width: usize = rest.iter().product();
    values
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n, width))
        .map_err(|e| RegressionError::InvalidInput(format!("cannot reshape {name}: {e}")))
}

/// Interpret a dynamic-dimension input as a single outcome per sample.
pub fn as_outcome_vector(values: ArrayViewD<'_, f64>) -> Result<Array1<f64>, RegressionError> {
    let ndim = values.ndim();
    values
        .into_dimensionality::<Ix1>()
        .map(|v| v.to_owned())
        .map_err(|_| RegressionError::DimensionError { ndim })
}

/// Check that every named input has the same number of samples and return it.
pub fn ensure_same_sample_count(counts: &[(&str, usize)]) -> Result<usize, RegressionError> {
    let Some(&(_, n)) = counts.first() else {
        return Err(RegressionError::InvalidInput(
            "no inputs to compare".to_string(),
        ));
    };
    if counts.iter().any(|&(_, c)| c != n) {
        let details = counts
            .iter()
            .map(|(name, c)| format!("{c} {name}"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(RegressionError::ShapeMismatch(details));
    }
    if n == 0 {
        return Err(RegressionError::InvalidInput(
            "at least one sample is required".to_string(),
        ));
    }
    Ok(n)
}

pub fn ensure_finite_matrix(values: ArrayView2<'_, f64>, name: &str) -> Result<(), RegressionError> {
    if let Some(((row, col), v)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(RegressionError::InvalidInput(format!(
            "{name} has non-finite value {v} at row {row}, column {col}"
        )));
    }
    Ok(())
}

pub fn ensure_finite_vector(values: ArrayView1<'_, f64>, name: &str) -> Result<(), RegressionError> {
    if let Some((row, v)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(RegressionError::InvalidInput(format!(
            "{name} has non-finite value {v} at row {row}"
        )));
    }
    Ok(())
}

/// `[x | 1]`: append a column of ones for the bias term.
pub fn with_intercept_column(x: ArrayView2<'_, f64>) -> Array2<f64> {
    let (n, p) = x.dim();
    let mut out = Array2::<f64>::ones((n, p + 1));
    out.slice_mut(ndarray::s![.., ..p]).assign(&x);
    out
}

/// Treatments default: an `(n, 0)` matrix, so no treatment effect is modelled.
pub fn empty_treatments(n: usize) -> Array2<f64> {
    Array2::zeros((n, 0))
}

/// Column-wise concatenation of two sample matrices with matching row counts.
pub fn hstack(
    left: ArrayView2<'_, f64>,
    right: ArrayView2<'_, f64>,
) -> Result<Array2<f64>, RegressionError> {
    ndarray::concatenate(Axis(1), &[left.view(), right.view()]).map_err(|_| {
        RegressionError::ShapeMismatch(format!(
            "{} left rows, {} right rows",
            left.nrows(),
            right.nrows()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    #[test]
    fn one_dimensional_input_becomes_a_column() {
        let v = array![1.0, 3.0, 7.0];
        let m = as_sample_matrix(v.view().into_dyn(), "treatments").unwrap();
        assert_eq!(m, array![[1.0], [3.0], [7.0]]);
    }

    #[test]
    fn two_dimensional_input_is_kept() {
        let v = array![[1.0, 5.0], [3.0, 4.0]];
        let m = as_sample_matrix(v.view().into_dyn(), "treatments").unwrap();
        assert_eq!(m, v);
    }

    #[test]
    fn higher_dimensional_input_flattens_trailing_axes() {
        let v = Array3::from_shape_fn((2, 2, 3), |(i, j, k)| (i * 6 + j * 3 + k) as f64);
        let m = as_sample_matrix(v.view().into_dyn(), "confounders").unwrap();
        assert_eq!(m.dim(), (2, 6));
        assert_eq!(m.row(1).to_vec(), vec![6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn transposed_input_reshapes_in_logical_order() {
        let v = array![[1.0, 2.0], [3.0, 4.0]];
        let t = v.t();
        let m = as_sample_matrix(t.into_dyn(), "features").unwrap();
        assert_eq!(m, array![[1.0, 3.0], [2.0, 4.0]]);
    }

    #[test]
    fn scalar_input_is_rejected() {
        let v = ndarray::arr0(1.0);
        assert!(matches!(
            as_sample_matrix(v.view().into_dyn(), "features"),
            Err(RegressionError::InvalidInput(_))
        ));
    }

    #[test]
    fn outcome_must_be_one_dimensional() {
        let y = array![[2.0, 1.0], [7.0, 1.0], [8.0, 1.0]];
        assert!(matches!(
            as_outcome_vector(y.view().into_dyn()),
            Err(RegressionError::DimensionError { ndim: 2 })
        ));
        let ok = as_outcome_vector(array![2.0, 7.0].view().into_dyn()).unwrap();
        assert_eq!(ok, array![2.0, 7.0]);
    }

    #[test]
    fn sample_counts_must_agree() {
        assert_eq!(
            ensure_same_sample_count(&[("features", 3), ("outcomes", 3)]).unwrap(),
            3
        );
        let err = ensure_same_sample_count(&[("features", 3), ("outcomes", 2)]).unwrap_err();
        match err {
            RegressionError::ShapeMismatch(details) => {
                assert_eq!(details, "3 features, 2 outcomes");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            ensure_same_sample_count(&[("features", 0), ("outcomes", 0)]),
            Err(RegressionError::InvalidInput(_))
        ));
    }

    #[test]
    fn non_finite_values_are_located() {
        let m = array![[1.0, 2.0], [f64::NAN, 4.0]];
        let err = ensure_finite_matrix(m.view(), "confounders").unwrap_err();
        assert!(err.to_string().contains("row 1, column 0"));
        let v = array![1.0, f64::INFINITY];
        assert!(ensure_finite_vector(v.view(), "outcomes").is_err());
    }

    #[test]
    fn intercept_column_is_appended_last() {
        let x = array![[2.0], [3.0]];
        assert_eq!(with_intercept_column(x.view()), array![[2.0, 1.0], [3.0, 1.0]]);
        let empty = empty_treatments(2);
        assert_eq!(with_intercept_column(empty.view()), array![[1.0], [1.0]]);
    }

    #[test]
    fn hstack_keeps_column_order() {
        let x = array![[1.0], [3.0]];
        let z = array![[4.0, 5.0], [6.0, 7.0]];
        let xz = hstack(x.view(), z.view()).unwrap();
        assert_eq!(xz, array![[1.0, 4.0, 5.0], [3.0, 6.0, 7.0]]);
        let empty = empty_treatments(2);
        assert_eq!(hstack(empty.view(), z.view()).unwrap(), z);
        assert!(hstack(array![[1.0]].view(), z.view()).is_err());
    }
}
