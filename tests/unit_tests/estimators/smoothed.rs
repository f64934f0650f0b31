use super::assert_recomputes_once_per_mesh_state;
use crate::{distributed, gather_local_errors, interpolated_solution, run_on_ranks};
use fenris_estimators::error::LpNorm;
use fenris_estimators::estimators::{ErrorEstimator, SmoothedFluxEstimator, SmoothingSolverSettings};
use fenris_estimators::flux::DiffusionFlux;
use fenris_estimators::mesh::partition_along_axis;
use fenris_estimators::mesh::procedural::{create_line_mesh, create_unit_square_uniform_quad_mesh_2d};
use fenris_estimators::space::{Continuity, SharedGridFunction};
use matrixcompare::assert_scalar_eq;
use nalgebra::DVector;
use util::{affine, assert_all_near_zero};

fn wave(x: &DVector<f64>) -> f64 {
    (3.0 * x[0]).sin() * (2.0 * x[1]).cos()
}

fn wave_on_square(cells_per_dim: usize) -> SharedGridFunction {
    interpolated_solution(create_unit_square_uniform_quad_mesh_2d(cells_per_dim).unwrap(), Continuity::H1, 1, wave)
}

#[test]
fn linear_solution_has_no_error() {
    let f = |x: &DVector<f64>| affine(&[1.0, 2.0, -0.5], x);
    let solution = interpolated_solution(create_unit_square_uniform_quad_mesh_2d(4).unwrap(), Continuity::H1, 1, f);
    let mut estimator = SmoothedFluxEstimator::new(DiffusionFlux::new()).with_solution(solution);
    assert!(estimator.last_solve().is_none());

    assert_all_near_zero!(estimator.local_errors().unwrap(), abstol = 1e-8);
    let solve = estimator.last_solve().unwrap();
    assert!(solve.converged);
    assert!(solve.iterations > 0);
}

#[test]
fn error_of_smooth_solution_is_positive_and_decreases() {
    let mut coarse = SmoothedFluxEstimator::new(DiffusionFlux::new()).with_solution(wave_on_square(4));
    let mut fine = SmoothedFluxEstimator::new(DiffusionFlux::new()).with_solution(wave_on_square(8));
    assert!(coarse.local_errors().unwrap().iter().all(|&e| e > 0.0));
    assert!(fine.total_error().unwrap() < coarse.total_error().unwrap());
}

#[test]
fn works_on_line_meshes() {
    let solution =
        interpolated_solution(create_line_mesh(0.0, 1.0, 6).unwrap(), Continuity::H1, 2, |x| (4.0 * x[0]).exp());
    let mut estimator = SmoothedFluxEstimator::new(DiffusionFlux::new()).with_solution(solution);
    assert_eq!(estimator.local_errors().unwrap().len(), 6);
    assert!(estimator.total_error().unwrap() > 0.0);
    assert!(estimator.last_solve().unwrap().converged);
}

#[test]
fn total_error_combines_local_errors_in_chosen_norm() {
    let mut l2 = SmoothedFluxEstimator::new(DiffusionFlux::new()).with_solution(wave_on_square(4));
    let local_errors = l2.local_errors().unwrap().to_vec();
    let expected = local_errors.iter().map(|e| e * e).sum::<f64>().sqrt();
    assert_scalar_eq!(l2.total_error().unwrap(), expected, comp = abs, tol = 1e-14);

    let mut max = SmoothedFluxEstimator::new(DiffusionFlux::new())
        .with_solution(wave_on_square(4))
        .with_norm(LpNorm::infinity());
    let local_errors = max.local_errors().unwrap().to_vec();
    let largest = local_errors.iter().copied().fold(0.0, f64::max);
    assert_eq!(max.total_error().unwrap(), largest);
}

#[test]
fn unconverged_projection_is_not_an_error() {
    let settings = SmoothingSolverSettings {
        relative_tolerance: 1e-14,
        max_iterations: 1,
    };
    let mut estimator = SmoothedFluxEstimator::new(DiffusionFlux::new())
        .with_solution(wave_on_square(6))
        .with_solver_settings(settings);
    let total = estimator.total_error().unwrap();
    assert!(total.is_finite() && total > 0.0);
    let solve = estimator.last_solve().unwrap();
    assert!(!solve.converged);
    assert_eq!(solve.iterations, 1);
}

#[test]
fn solver_settings_roundtrip_through_json() {
    let settings = SmoothingSolverSettings {
        relative_tolerance: 1e-9,
        max_iterations: 50,
    };
    let json = serde_json::to_string(&settings).unwrap();
    let parsed: SmoothingSolverSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, settings);
    assert_eq!(SmoothingSolverSettings::default().max_iterations, 200);
}

#[test]
fn partitioned_estimates_match_serial_estimates() {
    let global = create_unit_square_uniform_quad_mesh_2d(6).unwrap();
    for (num_ranks, axis) in [(2, 0), (3, 1)] {
        let mut serial = SmoothedFluxEstimator::new(DiffusionFlux::new())
            .with_solution(interpolated_solution(global.clone(), Continuity::H1, 1, wave));
        let serial_errors = serial.local_errors().unwrap().to_vec();
        let serial_total = serial.total_error().unwrap();
        let parts = partition_along_axis(&global, num_ranks, axis);

        let results = run_on_ranks(num_ranks, |comm| {
            let mesh = distributed(&global, &parts, comm);
            let global_ids = mesh.partition().global_element_ids().to_vec();
            let solution = interpolated_solution(mesh, Continuity::H1, 1, wave);
            let mut estimator = SmoothedFluxEstimator::new(DiffusionFlux::new()).with_solution(solution);
            let local_errors = estimator.local_errors().unwrap().to_vec();
            let total = estimator.total_error().unwrap();
            let converged = estimator.last_solve().unwrap().converged;
            (global_ids, local_errors, total, converged)
        });

        let per_rank: Vec<(Vec<usize>, Vec<f64>)> =
            results.iter().map(|(ids, errors, _, _)| (ids.clone(), errors.clone())).collect();
        let gathered = gather_local_errors(&per_rank, global.num_elements());
        for (partitioned, serial) in gathered.iter().zip(&serial_errors) {
            assert_scalar_eq!(*partitioned, *serial, comp = abs, tol = 1e-8);
        }
        for (_, _, total, converged) in &results {
            assert!(*converged);
            assert_scalar_eq!(*total, serial_total, comp = abs, tol = 1e-8);
        }
    }
}

#[test]
fn recomputes_once_per_mesh_state() {
    let solution = wave_on_square(4);
    let mut estimator = SmoothedFluxEstimator::new(DiffusionFlux::new()).with_solution(solution.clone());
    assert_recomputes_once_per_mesh_state(&mut estimator, &solution);
    assert!(estimator.last_solve().unwrap().converged);
}
