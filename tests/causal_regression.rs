use approx::assert_abs_diff_eq;
use causal_entropy::{
    CausalRegressionConfig, ConvergencePolicy, RegressionError, causal_regression,
    causal_regression_dyn, linear_regression,
};
use ndarray::{Array1, Array2, Axis, array, concatenate};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn grid_confounders() -> Array2<f64> {
    array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]
}

/// y = 1.5·x + z·[0.5, -1.0] + 2 + noise, with x partly driven by z.
fn synthetic_problem(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut z = Array2::zeros((n, 2));
    let mut x = Array2::zeros((n, 1));
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let z0 = normal.sample(&mut rng);
        let z1 = normal.sample(&mut rng);
        let xi = 0.8 * z0 + normal.sample(&mut rng);
        z[[i, 0]] = z0;
        z[[i, 1]] = z1;
        x[[i, 0]] = xi;
        y[i] = 1.5 * xi + 0.5 * z0 - z1 + 2.0 + 0.3 * normal.sample(&mut rng);
    }
    (z, y, x)
}

#[test]
fn grid_scenario_with_one_treatment() {
    let z = grid_confounders();
    let y = array![2.0, 7.0, 8.0];
    let x = array![[1.0], [3.0], [7.0]];
    let fit = causal_regression(
        z.view(),
        y.view(),
        Some(x.view()),
        &CausalRegressionConfig::default(),
    )
    .unwrap();
    assert_eq!(fit.coefficients.len(), 5);
    assert_eq!(fit.num_treatments, 1);
    assert_eq!(fit.num_confounders, 3);
    assert_eq!(fit.iterations, 2);
    assert!(fit.converged);

    let expected = [
        -1.993523951846,
        -0.663588545013,
        1.661389886689,
        0.997801341676,
        0.334212796663,
    ];
    for (est, truth) in fit.coefficients.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*est, *truth, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(fit.causal_entropy, 2.710643351026, epsilon = 1e-6);
}

#[test]
fn grid_scenario_without_treatments() {
    let z = grid_confounders();
    let y = array![2.0, 7.0, 8.0];
    let fit =
        causal_regression(z.view(), y.view(), None, &CausalRegressionConfig::default()).unwrap();
    assert_eq!(fit.coefficients.len(), 4);
    assert_eq!(fit.treatment_effects().len(), 0);
    assert_eq!(fit.confounder_effects().len(), 3);
    assert_eq!(fit.iterations, 3);

    let expected = [0.482663749040, -0.215363918000, 0.267299831040, 0.749963580080];
    for (est, truth) in fit.coefficients.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*est, *truth, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(fit.causal_entropy, 2.348029102719, epsilon = 1e-6);
}

#[test]
fn treatment_shapes_accepted_through_dyn_entry_point() {
    let z = grid_confounders();
    let y = array![2.0, 7.0, 8.0];
    let cfg = CausalRegressionConfig::default();

    let series = array![1.0, 3.0, 7.0];
    let column = array![[1.0], [3.0], [7.0]];
    let two = array![[1.0, 5.0], [3.0, 4.0], [7.0, 1.0]];

    let from_series = causal_regression_dyn(
        z.view().into_dyn(),
        y.view().into_dyn(),
        Some(series.view().into_dyn()),
        &cfg,
    )
    .unwrap();
    let from_column = causal_regression_dyn(
        z.view().into_dyn(),
        y.view().into_dyn(),
        Some(column.view().into_dyn()),
        &cfg,
    )
    .unwrap();
    assert_eq!(from_series, from_column);

    let from_two = causal_regression_dyn(
        z.view().into_dyn(),
        y.view().into_dyn(),
        Some(two.view().into_dyn()),
        &cfg,
    )
    .unwrap();
    assert_eq!(from_two.coefficients.len(), 6);
    assert!(from_two.causal_entropy.is_finite());

    let z4 = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0], [9.0, 8.0, 9.0]];
    let y4 = array![2.0, 7.0, 8.0, 9.0];
    let no_treatment =
        causal_regression_dyn(z4.view().into_dyn(), y4.view().into_dyn(), None, &cfg).unwrap();
    assert_eq!(no_treatment.coefficients.len(), 4);
    assert!(no_treatment.causal_entropy.is_finite());
}

#[test]
fn missing_treatments_equal_an_empty_treatment_matrix() {
    let (z, y, _) = synthetic_problem(30, 3);
    let cfg = CausalRegressionConfig::default();
    let empty = Array2::<f64>::zeros((30, 0));
    let implicit = causal_regression(z.view(), y.view(), None, &cfg).unwrap();
    let explicit = causal_regression(z.view(), y.view(), Some(empty.view()), &cfg).unwrap();
    assert_eq!(implicit, explicit);
}

#[test]
fn repeated_calls_are_deterministic() {
    let (z, y, x) = synthetic_problem(40, 5);
    let cfg = CausalRegressionConfig::default();
    let first = causal_regression(z.view(), y.view(), Some(x.view()), &cfg).unwrap();
    let second = causal_regression(z.view(), y.view(), Some(x.view()), &cfg).unwrap();
    assert_eq!(first, second);
}

#[test]
fn large_problems_are_deterministic_on_the_parallel_path() {
    let (z, y, x) = synthetic_problem(300, 9);
    let cfg = CausalRegressionConfig {
        max_iterations: 3,
        ..CausalRegressionConfig::default()
    };
    let first = causal_regression(z.view(), y.view(), Some(x.view()), &cfg).unwrap();
    let second = causal_regression(z.view(), y.view(), Some(x.view()), &cfg).unwrap();
    assert_eq!(first, second);
    assert!(first.iterations <= 3);
}

#[test]
fn returned_entropy_satisfies_the_stopping_rule() {
    let (z, y, x) = synthetic_problem(40, 21);
    let cfg = CausalRegressionConfig {
        tolerance: 1e-4,
        max_iterations: 500,
        ..CausalRegressionConfig::default()
    };
    let fit = causal_regression(z.view(), y.view(), Some(x.view()), &cfg).unwrap();
    assert!(fit.iterations >= 1 && fit.iterations <= cfg.max_iterations);

    if fit.converged {
        assert!(fit.iterations >= 2);
        // Stopping one iteration earlier returns the previous trace entry.
        let earlier_cfg = CausalRegressionConfig {
            max_iterations: fit.iterations - 1,
            ..cfg.clone()
        };
        let earlier = causal_regression(z.view(), y.view(), Some(x.view()), &earlier_cfg).unwrap();
        assert!(!earlier.converged);
        assert_eq!(earlier.iterations, fit.iterations - 1);
        assert!((fit.causal_entropy - earlier.causal_entropy).abs() < cfg.tolerance);
    } else {
        assert_eq!(fit.iterations, cfg.max_iterations);
    }
}

#[test]
fn single_iteration_returns_the_least_squares_start() {
    let (z, y, x) = synthetic_problem(25, 13);
    let cfg = CausalRegressionConfig {
        max_iterations: 1,
        ..CausalRegressionConfig::default()
    };
    let fit = causal_regression(z.view(), y.view(), Some(x.view()), &cfg).unwrap();
    assert_eq!(fit.iterations, 1);
    assert!(!fit.converged);

    let design = concatenate(Axis(1), &[x.view(), z.view()]).unwrap();
    let ols = linear_regression(design.view(), y.view().insert_axis(Axis(1))).unwrap();
    assert_abs_diff_eq!(fit.treatment_effects()[0], ols.coefficients[[0, 0]], epsilon = 1e-12);
    assert_abs_diff_eq!(fit.bias(), ols.bias[0], epsilon = 1e-12);
    assert_abs_diff_eq!(fit.confounder_effects()[0], ols.coefficients[[1, 0]], epsilon = 1e-12);
    assert_abs_diff_eq!(fit.confounder_effects()[1], ols.coefficients[[2, 0]], epsilon = 1e-12);
}

#[test]
fn require_tolerance_makes_the_iteration_cap_fatal() {
    let (z, y, x) = synthetic_problem(20, 17);
    let cfg = CausalRegressionConfig {
        tolerance: 0.0,
        max_iterations: 1,
        convergence: ConvergencePolicy::RequireTolerance,
        ..CausalRegressionConfig::default()
    };
    let err = causal_regression(z.view(), y.view(), Some(x.view()), &cfg).unwrap_err();
    assert!(matches!(
        err,
        RegressionError::NonConvergence {
            max_iterations: 1,
            ..
        }
    ));
}

#[test]
fn two_dimensional_outcome_is_rejected() {
    let z = grid_confounders();
    let y = array![[2.0, 1.0], [7.0, 1.0], [8.0, 1.0]];
    let err = causal_regression_dyn(
        z.view().into_dyn(),
        y.view().into_dyn(),
        None,
        &CausalRegressionConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RegressionError::DimensionError { ndim: 2 }));
}

#[test]
fn mismatched_sample_counts_are_rejected() {
    let z = grid_confounders();
    let y = array![2.0, 7.0];
    let err = causal_regression(z.view(), y.view(), None, &CausalRegressionConfig::default())
        .unwrap_err();
    assert!(matches!(err, RegressionError::ShapeMismatch(_)));

    let y = array![2.0, 7.0, 8.0];
    let x = array![[1.0], [3.0]];
    let err = causal_regression(
        z.view(),
        y.view(),
        Some(x.view()),
        &CausalRegressionConfig::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("2 treatments, 3 outcomes, 3 confounders"));
}

#[test]
fn invalid_parameters_are_rejected() {
    let z = grid_confounders();
    let y = array![2.0, 7.0, 8.0];
    for cfg in [
        CausalRegressionConfig {
            sigma: -1.0,
            ..CausalRegressionConfig::default()
        },
        CausalRegressionConfig {
            max_iterations: 0,
            ..CausalRegressionConfig::default()
        },
    ] {
        assert!(matches!(
            causal_regression(z.view(), y.view(), None, &cfg),
            Err(RegressionError::InvalidInput(_))
        ));
    }
}

#[test]
fn underflowing_kernel_is_reported() {
    // No confounder columns: the residuals are y - mean(y) = ±5, far outside a
    // bandwidth of 1e-3.
    let z = Array2::<f64>::zeros((2, 0));
    let y = array![0.0, 10.0];
    let cfg = CausalRegressionConfig {
        sigma: 1e-3,
        ..CausalRegressionConfig::default()
    };
    assert!(matches!(
        causal_regression(z.view(), y.view(), None, &cfg),
        Err(RegressionError::DegenerateKernel { row: 0 })
    ));
}
