use crate::error::RegressionError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

pub fn default_sigma() -> f64 {
    2.0
}

pub fn default_tolerance() -> f64 {
    1e-2
}

pub fn default_max_iterations() -> usize {
    10_000
}

/// What the causal estimator does when the iteration cap is reached before
/// successive entropy estimates agree within the tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvergencePolicy {
    /// Return the last iterate, flagged with `converged = false`.
    #[default]
    ReturnLastIterate,
    /// Fail with [`RegressionError::NonConvergence`].
    RequireTolerance,
}

/// Run configuration for [`crate::causal::causal_regression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRegressionConfig {
    /// Gaussian kernel bandwidth; constant for the whole run.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Absolute change in the entropy estimate that counts as converged.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub convergence: ConvergencePolicy,
}

impl Default for CausalRegressionConfig {
    fn default() -> Self {
        Self {
            sigma: default_sigma(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            convergence: ConvergencePolicy::default(),
        }
    }
}

impl CausalRegressionConfig {
    pub fn validate(&self) -> Result<(), RegressionError> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(RegressionError::InvalidInput(format!(
                "sigma must be finite and positive, got {}",
                self.sigma
            )));
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(RegressionError::InvalidInput(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(RegressionError::InvalidInput(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Ordinary least-squares fit `Y ≈ X·A + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    /// (p, q): one column per outcome.
    pub coefficients: Array2<f64>,
    /// (q,)
    pub bias: Array1<f64>,
}

impl LinearFit {
    pub fn num_features(&self) -> usize {
        self.coefficients.nrows()
    }

    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>, RegressionError> {
        if features.ncols() != self.num_features() {
            return Err(RegressionError::InvalidInput(format!(
                "expected {} feature columns, got {}",
                self.num_features(),
                features.ncols()
            )));
        }
        Ok(features.dot(&self.coefficients) + &self.bias.view().insert_axis(Axis(0)))
    }
}

/// Result of the iterative causal-entropy estimator.
///
/// `coefficients` is laid out as `[treatment effects, bias, confounder effects]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalFit {
    pub coefficients: Coefficients,
    pub causal_entropy: f64,
    /// Number of entropy evaluations performed, in `1..=max_iterations`.
    pub iterations: usize,
    /// Whether the last two entropy estimates agreed within the tolerance.
    pub converged: bool,
    pub num_treatments: usize,
    pub num_confounders: usize,
}

impl CausalFit {
    pub fn treatment_effects(&self) -> ArrayView1<'_, f64> {
        self.coefficients.slice(s![..self.num_treatments])
    }

    pub fn bias(&self) -> f64 {
        self.coefficients[self.num_treatments]
    }

    pub fn confounder_effects(&self) -> ArrayView1<'_, f64> {
        self.coefficients.slice(s![self.num_treatments + 1..])
    }
}
