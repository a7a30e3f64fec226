use crate::error::RegressionError;
use crate::linalg::faer_ndarray::{FaerPinv, fast_ata, fast_atb};
use crate::shape::{
    as_sample_matrix, ensure_finite_matrix, ensure_same_sample_count, with_intercept_column,
};
use crate::types::LinearFit;
use ndarray::{ArrayView2, ArrayViewD, s};

/// Ordinary least squares `Y ≈ X·A + b` through the normal equations.
///
/// `features` is (n, p) and `outcomes` is (n, q). The system
/// `A = pinv(X1ᵗX1)·X1ᵗ·Y` with `X1 = [X | 1]` is solved with a pseudo-inverse,
/// so collinear or duplicated features give the minimum-norm solution rather
/// than an error. The last row of `A` is the bias.
pub fn linear_regression(
    features: ArrayView2<'_, f64>,
    outcomes: ArrayView2<'_, f64>,
) -> Result<LinearFit, RegressionError> {
    log::info!("Running linear regression");
    log::debug!(
        "features: {:?}, outcomes: {:?}",
        features.dim(),
        outcomes.dim()
    );

    let n = ensure_same_sample_count(&[
        ("features", features.nrows()),
        ("outcomes", outcomes.nrows()),
    ])
    .inspect_err(|e| log::error!("{e}"))?;
    ensure_finite_matrix(features, "features").inspect_err(|e| log::error!("{e}"))?;
    ensure_finite_matrix(outcomes, "outcomes").inspect_err(|e| log::error!("{e}"))?;
    if outcomes.ncols() == 0 {
        let err = RegressionError::InvalidInput("at least one outcome column is required".into());
        log::error!("{err}");
        return Err(err);
    }

    let x1 = with_intercept_column(features);
    let gram_pinv = fast_ata(&x1).pinv().map_err(|source| {
        log::error!("SVD does not converge when updating linear coefficients");
        RegressionError::NumericalFailure {
            context: "solving the linear normal equations",
            source,
        }
    })?;
    let solution = gram_pinv.dot(&fast_atb(&x1, &outcomes));

    let p = features.ncols();
    let fit = LinearFit {
        coefficients: solution.slice(s![..p, ..]).to_owned(),
        bias: solution.row(p).to_owned(),
    };

    log::info!("Linear regression completed on {n} samples");
    log::debug!("linear coefficients: {}", fit.coefficients);
    log::debug!("bias: {}", fit.bias);
    Ok(fit)
}

/// [`linear_regression`] for inputs of any dimensionality.
///
/// Both inputs are normalised with [`as_sample_matrix`]: a 1-D vector becomes a
/// single column.
pub fn linear_regression_dyn(
    features: ArrayViewD<'_, f64>,
    outcomes: ArrayViewD<'_, f64>,
) -> Result<LinearFit, RegressionError> {
    let features = as_sample_matrix(features, "features").inspect_err(|e| log::error!("{e}"))?;
    let outcomes = as_sample_matrix(outcomes, "outcomes").inspect_err(|e| log::error!("{e}"))?;
    linear_regression(features.view(), outcomes.view())
}
