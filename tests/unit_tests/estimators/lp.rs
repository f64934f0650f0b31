use crate::interpolated_solution;
use fenris_estimators::coefficient::ReferenceFunction;
use fenris_estimators::error::LpNorm;
use fenris_estimators::estimators::{ErrorEstimator, EstimatorError, LpErrorEstimator};
use fenris_estimators::mesh::procedural::create_unit_square_uniform_quad_mesh_2d;
use fenris_estimators::space::Continuity;
use matrixcompare::assert_scalar_eq;
use nalgebra::{dvector, DVector};
use util::{affine, assert_all_near_zero};

fn constant_one() -> ReferenceFunction {
    ReferenceFunction::scalar(|_: &DVector<f64>| 1.0)
}

#[test]
fn interpolated_bilinear_function_has_no_error() {
    let f = |x: &DVector<f64>| affine(&[0.5, 1.0, -1.0], x) + 2.0 * x[0] * x[1];
    let solution = interpolated_solution(create_unit_square_uniform_quad_mesh_2d(3).unwrap(), Continuity::H1, 1, f);
    let mut estimator = LpErrorEstimator::default()
        .with_solution(solution)
        .with_reference(ReferenceFunction::scalar(f));
    assert_eq!(estimator.local_errors().unwrap().len(), 9);
    assert_all_near_zero!(estimator.local_errors().unwrap(), abstol = 1e-13);
    assert!(estimator.total_error().unwrap() <= 1e-13);
}

#[test]
fn missing_inputs_are_reported() {
    let mut estimator = LpErrorEstimator::default();
    assert!(matches!(estimator.total_error(), Err(EstimatorError::MissingSolution)));

    let solution =
        interpolated_solution(create_unit_square_uniform_quad_mesh_2d(2).unwrap(), Continuity::H1, 1, |x| x[0]);
    estimator.attach_solution(solution);
    assert!(matches!(estimator.total_error(), Err(EstimatorError::MissingCoefficient)));

    estimator.set_reference(constant_one());
    assert!(estimator.total_error().is_ok());
}

#[test]
fn mismatched_reference_is_rejected() {
    let solution =
        interpolated_solution(create_unit_square_uniform_quad_mesh_2d(2).unwrap(), Continuity::H1, 1, |x| x[0]);
    let mut estimator = LpErrorEstimator::default()
        .with_solution(solution)
        .with_reference(ReferenceFunction::vector(|_: &DVector<f64>| dvector![1.0, 2.0]));
    assert!(matches!(
        estimator.local_errors(),
        Err(EstimatorError::IncompatibleSpace { .. })
    ));
}

#[test]
fn distance_to_constant_in_several_norms() {
    let solution =
        interpolated_solution(create_unit_square_uniform_quad_mesh_2d(4).unwrap(), Continuity::L2, 1, |_| 0.0);
    let mut estimator = LpErrorEstimator::default()
        .with_solution(solution)
        .with_reference(constant_one());
    for &error in estimator.local_errors().unwrap() {
        assert_scalar_eq!(error, 0.25, comp = abs, tol = 1e-14);
    }
    assert_scalar_eq!(estimator.total_error().unwrap(), 1.0, comp = abs, tol = 1e-13);

    estimator.set_norm(LpNorm::new(1.0).unwrap());
    assert_eq!(estimator.norm().p(), 1.0);
    for &error in estimator.local_errors().unwrap() {
        assert_scalar_eq!(error, 1.0 / 16.0, comp = abs, tol = 1e-14);
    }
    assert_scalar_eq!(estimator.total_error().unwrap(), 1.0, comp = abs, tol = 1e-13);

    estimator.set_norm(LpNorm::infinity());
    let deviations: Vec<f64> = estimator.local_errors().unwrap().iter().map(|e| e - 1.0).collect();
    assert_all_near_zero!(deviations, abstol = 1e-14);
    assert_scalar_eq!(estimator.total_error().unwrap(), 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn changing_the_norm_invalidates_the_cache() {
    let solution =
        interpolated_solution(create_unit_square_uniform_quad_mesh_2d(2).unwrap(), Continuity::H1, 1, |x| x[0]);
    let mut estimator = LpErrorEstimator::default()
        .with_solution(solution)
        .with_reference(ReferenceFunction::scalar(|x: &DVector<f64>| x[0] * x[0]));
    let l2 = estimator.total_error().unwrap();
    assert_eq!(estimator.cache().num_computations(), 1);
    estimator.total_error().unwrap();
    assert_eq!(estimator.cache().num_computations(), 1);

    estimator.set_norm(LpNorm::infinity());
    let max = estimator.total_error().unwrap();
    assert_eq!(estimator.cache().num_computations(), 2);
    let largest_local = estimator.local_errors().unwrap().iter().copied().fold(0.0, f64::max);
    assert_eq!(max, largest_local);
    assert!(max > 0.0 && l2 > 0.0);
}
