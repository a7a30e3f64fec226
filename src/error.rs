use crate::linalg::faer_ndarray::FaerLinalgError;
use thiserror::Error;

#[derive(Error)]
pub enum RegressionError {
    #[error("The sample counts of the inputs are not the same: {0}")]
    ShapeMismatch(String),

    #[error("Causal regression only supports a 1-dimensional outcome, but got {ndim} dimensions")]
    DimensionError { ndim: usize },

    #[error("Pseudo-inverse failed while {context}: {source}")]
    NumericalFailure {
        context: &'static str,
        #[source]
        source: FaerLinalgError,
    },

    #[error(
        "Causal regression did not converge within {max_iterations} iterations. Last entropy change was {last_change:.6e}."
    )]
    NonConvergence {
        max_iterations: usize,
        last_change: f64,
    },

    #[error(
        "Every kernel weight for sample {row} underflowed to zero. The bandwidth is too small for the residual scale."
    )]
    DegenerateKernel { row: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// Debug delegates to Display so `?` out of main and test panics stay readable.
impl core::fmt::Debug for RegressionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}
