#![deny(dead_code)]
#![deny(unused_imports)]

pub mod causal;
pub mod data;
pub mod error;
pub mod linalg;
pub mod linear;
pub mod shape;
pub mod types;

pub use causal::{
    KernelWeights, WeightedNormalEquations, causal_regression, causal_regression_dyn,
};
pub use error::RegressionError;
pub use linalg::faer_ndarray;
pub use linear::{linear_regression, linear_regression_dyn};
pub use types::{CausalFit, CausalRegressionConfig, Coefficients, ConvergencePolicy, LinearFit};
