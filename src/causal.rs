//! Iterative causal-entropy estimator.
//!
//! The outcome is modelled as `y = X1·a_x + Z·a_z + noise`, where the
//! confounder contribution `Z·a_z` is treated as a latent variable whose
//! distribution is the empirical distribution of the observed confounder rows.
//! Each iteration
//!
//! 1. evaluates a Gaussian kernel on every (outcome row, confounder row) pair,
//! 2. turns the kernel row means into an empirical negative log-likelihood
//!    (the causal entropy),
//! 3. re-solves a kernel-weighted normal-equation system for the coefficients,
//!
//! until two successive entropy estimates agree within the tolerance.

use crate::error::RegressionError;
use crate::linalg::faer_ndarray::{FaerPinv, fast_ab, fast_atb, fast_atv};
use crate::linear::linear_regression;
use crate::shape::{
    as_outcome_vector, as_sample_matrix, empty_treatments, ensure_finite_matrix,
    ensure_finite_vector, ensure_same_sample_count, hstack, with_intercept_column,
};
use crate::types::{CausalFit, CausalRegressionConfig, Coefficients, ConvergencePolicy};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMut1, Axis, Zip, s};

/// Kernel rows are filled in parallel from this many samples upwards.
const PARALLEL_KERNEL_MIN_SAMPLES: usize = 256;

/// Dense `(n, n)` Gaussian kernel over pairwise residuals together with its
/// row means.
#[derive(Debug, Clone)]
pub struct KernelWeights {
    /// `P[i, j] = φ_σ(y[i] - aX1[i] - aZ[j])`
    pub kernel: Array2<f64>,
    /// `mean_j P[i, j]`
    pub row_means: Array1<f64>,
}

fn fill_kernel_row(
    mut row: ArrayViewMut1<'_, f64>,
    residual: f64,
    confounder_fit: ArrayView1<'_, f64>,
    scale: f64,
    inv_two_var: f64,
) {
    Zip::from(&mut row)
        .and(&confounder_fit)
        .for_each(|p, &fit| {
            let diff = residual - fit;
            *p = scale * (-diff * diff * inv_two_var).exp();
        });
}

impl KernelWeights {
    /// Build the kernel for treatment-side residuals `y - X1·a_x` (one per
    /// row `i`) against confounder-side fits `Z·a_z` (one per column `j`).
    pub fn gaussian(
        residuals: ArrayView1<'_, f64>,
        confounder_fit: ArrayView1<'_, f64>,
        sigma: f64,
    ) -> Self {
        let n_rows = residuals.len();
        let n_cols = confounder_fit.len();
        let scale = 1.0 / (sigma * (2.0 * std::f64::consts::PI).sqrt());
        let inv_two_var = 1.0 / (2.0 * sigma * sigma);

        let mut kernel = Array2::<f64>::zeros((n_rows, n_cols));
        let rows = Zip::from(kernel.rows_mut()).and(&residuals);
        if n_rows >= PARALLEL_KERNEL_MIN_SAMPLES {
            rows.par_for_each(|row, &r| {
                fill_kernel_row(row, r, confounder_fit, scale, inv_two_var)
            });
        } else {
            rows.for_each(|row, &r| fill_kernel_row(row, r, confounder_fit, scale, inv_two_var));
        }

        let row_means = kernel.sum_axis(Axis(1)) / n_cols.max(1) as f64;
        Self { kernel, row_means }
    }

    /// Fails on the first row whose mean is zero or non-finite; the entropy
    /// and the normalised weights are undefined there.
    pub fn ensure_nondegenerate(&self) -> Result<(), RegressionError> {
        match self
            .row_means
            .iter()
            .position(|&m| !(m.is_finite() && m > 0.0))
        {
            Some(row) => Err(RegressionError::DegenerateKernel { row }),
            None => Ok(()),
        }
    }

    /// `-mean_i ln(mean_j P[i, j])`
    pub fn entropy(&self) -> f64 {
        let n = self.row_means.len().max(1) as f64;
        -self.row_means.iter().map(|m| m.ln()).sum::<f64>() / n
    }

    /// `W[i, j] = P[i, j] / mean_j P[i, j]`. Every row of `W` sums to the
    /// number of columns.
    pub fn normalized(&self) -> Array2<f64> {
        &self.kernel / &self.row_means.view().insert_axis(Axis(1))
    }
}

/// Symmetric block system `M·a = v` for the next coefficient vector, with
/// both sides already scaled by `1/n²`.
#[derive(Debug, Clone)]
pub struct WeightedNormalEquations {
    pub matrix: Array2<f64>,
    pub rhs: Array1<f64>,
}

impl WeightedNormalEquations {
    /// Assemble the system from `X1` (n, d1), `Z` (n, dz), `y` (n,) and the
    /// normalised weights `W` (n, n).
    ///
    /// ```text
    /// M = | Σ_i W0[i] X1[i]X1[i]ᵗ     Σ_ij W[i,j] X1[i]Z[j]ᵗ |
    ///     | (·)ᵗ                      Σ_j W1[j] Z[j]Z[j]ᵗ    |
    /// v = | Σ_i W0[i] X1[i] y[i]      Σ_ij W[i,j] Z[j] y[i]  |
    /// ```
    ///
    /// with `W0` the row sums and `W1` the column sums of `W`.
    pub fn assemble(
        x1: ArrayView2<'_, f64>,
        z: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        weights: ArrayView2<'_, f64>,
    ) -> Self {
        let n = y.len() as f64;
        let scale = 1.0 / (n * n);
        let dim_x1 = x1.ncols();
        let dim = dim_x1 + z.ncols();

        let w0 = weights.sum_axis(Axis(1));
        let w1 = weights.sum_axis(Axis(0));
        let x1_w0 = &x1 * &w0.view().insert_axis(Axis(1));
        let z_w1 = &z * &w1.view().insert_axis(Axis(1));
        // Row i of W·Z is Σ_j W[i,j] Z[j].
        let wz = fast_ab(&weights, &z);

        let mut matrix = Array2::<f64>::zeros((dim, dim));
        let cross = fast_atb(&x1, &wz);
        matrix
            .slice_mut(s![..dim_x1, ..dim_x1])
            .assign(&fast_atb(&x1_w0, &x1));
        matrix.slice_mut(s![..dim_x1, dim_x1..]).assign(&cross);
        matrix.slice_mut(s![dim_x1.., ..dim_x1]).assign(&cross.t());
        matrix
            .slice_mut(s![dim_x1.., dim_x1..])
            .assign(&fast_atb(&z_w1, &z));
        matrix *= scale;

        let mut rhs = Array1::<f64>::zeros(dim);
        rhs.slice_mut(s![..dim_x1]).assign(&fast_atv(&x1_w0, &y));
        rhs.slice_mut(s![dim_x1..]).assign(&fast_atv(&wz, &y));
        rhs *= scale;

        Self { matrix, rhs }
    }

    /// `pinv(M)·v`
    pub fn solve(&self) -> Result<Array1<f64>, RegressionError> {
        let inverse = self.matrix.pinv().map_err(|source| {
            log::error!("SVD does not converge when updating causal coefficients");
            RegressionError::NumericalFailure {
                context: "updating causal coefficients",
                source,
            }
        })?;
        Ok(inverse.dot(&self.rhs))
    }
}

/// OLS of `[X, Z]` against `y`, laid out as `[a_x, bias, a_z]`.
fn initial_coefficients(
    treatments: ArrayView2<'_, f64>,
    confounders: ArrayView2<'_, f64>,
    outcomes: ArrayView1<'_, f64>,
) -> Result<Array1<f64>, RegressionError> {
    let design = hstack(treatments, confounders)?;
    let ols = linear_regression(design.view(), outcomes.insert_axis(Axis(1)))?;
    let linear = ols.coefficients.column(0);
    let d_x = treatments.ncols();

    let mut a = Array1::<f64>::zeros(linear.len() + 1);
    a.slice_mut(s![..d_x]).assign(&linear.slice(s![..d_x]));
    a[d_x] = ols.bias[0];
    a.slice_mut(s![d_x + 1..]).assign(&linear.slice(s![d_x..]));
    Ok(a)
}

fn last_entropy_change(trace: &[f64]) -> f64 {
    match trace {
        [.., prev, last] => (last - prev).abs(),
        _ => f64::INFINITY,
    }
}

/// Estimate treatment and confounder effects by iterating the causal-entropy
/// fixed point.
///
/// * `confounders`: (n, d_z)
/// * `outcomes`: (n,)
/// * `treatments`: (n, d_x); `None` is the same as an `(n, 0)` matrix, in
///   which case only the bias and confounder effects are estimated.
///
/// The returned coefficients have length `d_x + 1 + d_z`. They are the
/// iterate that produced the returned entropy, not the one solved after it.
pub fn causal_regression(
    confounders: ArrayView2<'_, f64>,
    outcomes: ArrayView1<'_, f64>,
    treatments: Option<ArrayView2<'_, f64>>,
    config: &CausalRegressionConfig,
) -> Result<CausalFit, RegressionError> {
    log::info!("Running causal regression");
    config.validate().inspect_err(|e| log::error!("{e}"))?;

    let empty = empty_treatments(outcomes.len());
    let treatments = match &treatments {
        Some(t) => t.view(),
        None => {
            log::info!("No treatments given; using a {:?} treatment matrix", empty.dim());
            empty.view()
        }
    };
    log::debug!(
        "treatments: {:?}, outcomes: {}, confounders: {:?}",
        treatments.dim(),
        outcomes.len(),
        confounders.dim()
    );

    let n = ensure_same_sample_count(&[
        ("treatments", treatments.nrows()),
        ("outcomes", outcomes.len()),
        ("confounders", confounders.nrows()),
    ])
    .inspect_err(|e| log::error!("{e}"))?;
    ensure_finite_matrix(treatments, "treatments").inspect_err(|e| log::error!("{e}"))?;
    ensure_finite_vector(outcomes, "outcomes").inspect_err(|e| log::error!("{e}"))?;
    ensure_finite_matrix(confounders, "confounders").inspect_err(|e| log::error!("{e}"))?;

    let x1 = with_intercept_column(treatments);
    let dim_x1 = x1.ncols();
    let num_treatments = treatments.ncols();
    let num_confounders = confounders.ncols();

    log::debug!("Initializing coefficients with linear regression");
    let mut a = initial_coefficients(treatments, confounders, outcomes)?;

    let mut trace: Vec<f64> = Vec::with_capacity(config.max_iterations.min(64));
    for k in 0..config.max_iterations {
        let treatment_fit = x1.dot(&a.slice(s![..dim_x1]));
        let confounder_fit = confounders.dot(&a.slice(s![dim_x1..]));
        let residuals = &outcomes - &treatment_fit;

        let weights = KernelWeights::gaussian(residuals.view(), confounder_fit.view(), config.sigma);
        weights
            .ensure_nondegenerate()
            .inspect_err(|e| log::error!("{e}"))?;
        let entropy = weights.entropy();
        trace.push(entropy);
        log::debug!("iteration {k}: causal entropy {entropy:.6e}");

        let converged = trace.len() > 1 && last_entropy_change(&trace) < config.tolerance;
        if converged || k + 1 == config.max_iterations {
            if !converged {
                let last_change = last_entropy_change(&trace);
                if config.convergence == ConvergencePolicy::RequireTolerance {
                    let err = RegressionError::NonConvergence {
                        max_iterations: config.max_iterations,
                        last_change,
                    };
                    log::error!("{err}");
                    return Err(err);
                }
                log::warn!(
                    "Causal regression stopped at the iteration cap ({}) with entropy change {:.3e}",
                    config.max_iterations,
                    last_change
                );
            }
            let fit = CausalFit {
                coefficients: Coefficients::new(a),
                causal_entropy: entropy,
                iterations: trace.len(),
                converged,
                num_treatments,
                num_confounders,
            };
            log::info!(
                "Causal regression completed on {n} samples after {} iterations",
                fit.iterations
            );
            log::debug!("coefficients: {}", *fit.coefficients);
            log::debug!("causal entropy: {:.6e}", fit.causal_entropy);
            return Ok(fit);
        }

        let system = WeightedNormalEquations::assemble(
            x1.view(),
            confounders,
            outcomes,
            weights.normalized().view(),
        );
        a = system.solve()?;
    }

    // Every pass with k == max_iterations - 1 returns above.
    let err = RegressionError::NonConvergence {
        max_iterations: config.max_iterations,
        last_change: last_entropy_change(&trace),
    };
    log::error!("{err}");
    Err(err)
}

/// [`causal_regression`] for inputs of any dimensionality.
///
/// Confounders and treatments are normalised with [`as_sample_matrix`]. The
/// outcome must be 1-D; anything else fails with
/// [`RegressionError::DimensionError`] once the sample counts agree.
pub fn causal_regression_dyn(
    confounders: ArrayViewD<'_, f64>,
    outcomes: ArrayViewD<'_, f64>,
    treatments: Option<ArrayViewD<'_, f64>>,
    config: &CausalRegressionConfig,
) -> Result<CausalFit, RegressionError> {
    let Some(&num_outcomes) = outcomes.shape().first() else {
        let err = RegressionError::DimensionError { ndim: 0 };
        log::error!("{err}");
        return Err(err);
    };
    let confounders =
        as_sample_matrix(confounders, "confounders").inspect_err(|e| log::error!("{e}"))?;
    let treatments = treatments
        .map(|t| as_sample_matrix(t, "treatments"))
        .transpose()
        .inspect_err(|e| log::error!("{e}"))?;
    let treatment_rows = treatments.as_ref().map_or(num_outcomes, |t| t.nrows());
    ensure_same_sample_count(&[
        ("treatments", treatment_rows),
        ("outcomes", num_outcomes),
        ("confounders", confounders.nrows()),
    ])
    .inspect_err(|e| log::error!("{e}"))?;
    let outcomes = as_outcome_vector(outcomes).inspect_err(|e| log::error!("{e}"))?;

    causal_regression(
        confounders.view(),
        outcomes.view(),
        treatments.as_ref().map(|t| t.view()),
        config,
    )
}
