use crate::{distributed, gather_local_errors, interpolated_solution, run_on_ranks};
use fenris_estimators::coefficient::PiecewiseConstantCoefficient;
use fenris_estimators::element::{CellKind, ElementTransformation, LagrangeElement};
use fenris_estimators::estimators::{
    default_face_coefficient, integrating_element, ErrorEstimator, EstimatorError, FaceCoefficientInput,
    FaceJumpIntegrator, FaceSideData, KellyErrorEstimator,
};
use fenris_estimators::flux::DiffusionFlux;
use fenris_estimators::mesh::procedural::{
    create_line_mesh, create_polyline_mesh, create_unit_square_uniform_quad_mesh_2d,
};
use fenris_estimators::mesh::{partition_along_axis, FaceKind, LocalFaceMap, Mesh};
use fenris_estimators::quadrature::{rule_for_order, Geometry};
use fenris_estimators::space::{Continuity, FiniteElementSpace, GridFunction};
use matrixcompare::assert_scalar_eq;
use nalgebra::{dvector, DVector};
use std::sync::Arc;
use util::{affine, assert_all_near_zero};

fn kelly_errors(mesh: Mesh, order: usize, f: impl Fn(&DVector<f64>) -> f64) -> (Vec<f64>, f64) {
    let solution = interpolated_solution(mesh, Continuity::H1, order, f);
    let mut estimator = KellyErrorEstimator::new(DiffusionFlux::new()).with_solution(solution);
    let local_errors = estimator.local_errors().unwrap().to_vec();
    (local_errors, estimator.total_error().unwrap())
}

fn smooth_function(x: &DVector<f64>) -> f64 {
    (2.0 * x[0]).sin() * (1.0 + x[1] * x[1]) + x[0] * x[1]
}

#[test]
fn default_face_coefficient_scales_with_face_size() {
    let input = FaceCoefficientInput {
        mesh_dim: 2,
        face_measure: 0.5,
        element_diameters: [1.0, 2.0],
        order: 2,
    };
    assert_scalar_eq!(default_face_coefficient(&input), 0.125, comp = abs, tol = 1e-15);
    let input = FaceCoefficientInput { mesh_dim: 1, ..input };
    assert_scalar_eq!(default_face_coefficient(&input), 0.375, comp = abs, tol = 1e-15);
}

#[test]
fn linear_solution_on_line_has_no_jumps() {
    let (local_errors, total) = kelly_errors(create_line_mesh(0.0, 1.0, 4).unwrap(), 1, |x| 3.0 * x[0] - 1.0);
    assert_eq!(local_errors.len(), 4);
    assert_all_near_zero!(local_errors, abstol = 1e-12);
    assert!(total.abs() <= 1e-12);
}

#[test]
fn jumps_of_quadratic_on_line() {
    // For u = x^2 and nodes x_i = i h, the slope jumps by 2h at every interior node. With the
    // face coefficient h / 2, every interior node contributes 2 h^3 to both neighbors.
    let h: f64 = 0.25;
    let (local_errors, total) = kelly_errors(create_line_mesh(0.0, 1.0, 4).unwrap(), 1, |x| x[0] * x[0]);
    let contribution = 2.0 * h.powi(3);
    let expected = [contribution, 2.0 * contribution, 2.0 * contribution, contribution].map(f64::sqrt);
    for (eta, expected) in local_errors.iter().zip(expected) {
        assert_scalar_eq!(*eta, expected, comp = abs, tol = 1e-13);
    }
    let expected_total = 2.0 * contribution.sqrt() + 2.0 * (2.0 * contribution).sqrt();
    assert_scalar_eq!(total, expected_total, comp = abs, tol = 1e-13);
}

#[test]
fn custom_coefficients_scale_indicators() {
    let mesh = Arc::new(create_line_mesh(0.0, 1.0, 4).unwrap());
    let space = Arc::new(FiniteElementSpace::new(mesh, Continuity::H1, 1, 1).unwrap());
    let solution = GridFunction::interpolate_scalar(space, |x| x[0] * x[0]).into_shared();

    let mut unit_faces = KellyErrorEstimator::new(DiffusionFlux::new())
        .with_solution(solution.clone())
        .with_face_coefficient(|_| 1.0);
    // The squared jump of the slope is 4 h^2 = 0.25
    assert_scalar_eq!(unit_faces.local_errors().unwrap()[0], 0.5, comp = abs, tol = 1e-13);

    let mut reference = KellyErrorEstimator::new(DiffusionFlux::new()).with_solution(solution.clone());
    let mut scaled = KellyErrorEstimator::new(DiffusionFlux::new())
        .with_solution(solution)
        .with_element_coefficient(|input| if input.element == 1 { 4.0 } else { 1.0 });
    let reference_errors = reference.local_errors().unwrap().to_vec();
    let scaled_errors = scaled.local_errors().unwrap().to_vec();
    assert_scalar_eq!(scaled_errors[1], 2.0 * reference_errors[1], comp = abs, tol = 1e-13);
    assert_scalar_eq!(scaled_errors[2], reference_errors[2], comp = abs, tol = 1e-15);
}

#[test]
fn linear_solution_in_2d_has_no_jumps() {
    let f = |x: &DVector<f64>| affine(&[1.0, 2.0, -3.0], x);
    let (local_errors, total) = kelly_errors(create_unit_square_uniform_quad_mesh_2d(3).unwrap(), 1, f);
    assert_all_near_zero!(local_errors, abstol = 1e-12);
    assert!(total <= 1e-12);
}

#[test]
fn linear_solution_on_non_conforming_mesh_has_no_jumps() {
    let mesh = create_unit_square_uniform_quad_mesh_2d(2)
        .unwrap()
        .refine_elements(&[0, 3])
        .unwrap();
    assert!(mesh.faces().iter().any(|face| face.kind() == FaceKind::NonConformingSlave));
    let f = |x: &DVector<f64>| affine(&[0.5, -1.0, 4.0], x);
    let (local_errors, _) = kelly_errors(mesh, 1, f);
    assert_all_near_zero!(local_errors, abstol = 1e-12);
}

#[test]
fn quadratic_solution_in_quadratic_space_has_no_jumps() {
    let f = |x: &DVector<f64>| x[0] * x[0] + x[1] * x[1];
    let mesh = create_unit_square_uniform_quad_mesh_2d(3).unwrap();
    let (local_errors, _) = kelly_errors(mesh.clone(), 2, f);
    assert_all_near_zero!(local_errors, abstol = 1e-11);

    let non_conforming = mesh.refine_elements(&[4]).unwrap();
    let (local_errors, _) = kelly_errors(non_conforming, 2, f);
    assert_all_near_zero!(local_errors, abstol = 1e-11);

    // The same function is not reproduced by bilinear elements
    let (_, total) = kelly_errors(mesh, 1, f);
    assert!(total > 1e-3);
}

#[test]
fn arc_length_on_kinked_polyline_has_no_jumps() {
    let points = [dvector![0.0, 0.0], dvector![1.0, 0.0], dvector![1.0, 2.0], dvector![3.0, 2.0]];
    let mesh = Arc::new(create_polyline_mesh(&points).unwrap());
    let space = Arc::new(FiniteElementSpace::new(mesh, Continuity::H1, 1, 1).unwrap());

    // Vertex dofs come first and follow the vertex order
    let arc_length = GridFunction::from_values(space.clone(), dvector![0.0, 1.0, 3.0, 5.0]).unwrap();
    let mut estimator = KellyErrorEstimator::new(DiffusionFlux::new()).with_solution(arc_length.into_shared());
    assert_all_near_zero!(estimator.local_errors().unwrap(), abstol = 1e-12);

    let x_coordinate = GridFunction::from_values(space, dvector![0.0, 1.0, 1.0, 3.0]).unwrap();
    estimator.attach_solution(x_coordinate.into_shared());
    assert!(estimator.local_errors().unwrap().iter().all(|&eta| eta > 0.1));
}

#[test]
fn total_error_is_sum_of_indicators() {
    let (local_errors, total) = kelly_errors(create_unit_square_uniform_quad_mesh_2d(4).unwrap(), 1, smooth_function);
    let sum: f64 = local_errors.iter().sum();
    assert_scalar_eq!(total, sum, comp = abs, tol = 1e-14);
    assert!(local_errors.iter().all(|&eta| eta >= 0.0));
}

#[test]
fn attribute_filter_drops_faces() {
    let mut mesh = create_unit_square_uniform_quad_mesh_2d(4).unwrap();
    for e in 0..mesh.num_elements() {
        if e % 4 >= 2 {
            mesh.set_attribute(e, 2);
        }
    }
    let solution = interpolated_solution(mesh, Continuity::H1, 1, smooth_function);
    let mut unfiltered = KellyErrorEstimator::new(DiffusionFlux::new()).with_solution(solution.clone());
    let mut filtered = KellyErrorEstimator::new(DiffusionFlux::new())
        .with_solution(solution)
        .with_attributes([1]);
    assert_eq!(filtered.attributes().iter().copied().collect::<Vec<_>>(), vec![1]);

    let all = unfiltered.local_errors().unwrap().to_vec();
    let some = filtered.local_errors().unwrap().to_vec();
    for e in 0..16 {
        if e % 4 >= 2 {
            assert_eq!(some[e], 0.0);
        } else {
            assert!(some[e] <= all[e] + 1e-14);
        }
    }
    assert!(filtered.total_error().unwrap() < unfiltered.total_error().unwrap());

    // An empty set accepts everything
    filtered.set_attributes([]);
    assert_eq!(filtered.local_errors().unwrap(), all.as_slice());
}

#[test]
fn coefficient_weighted_flux_is_continuous_across_material_interface() {
    let mut mesh = create_unit_square_uniform_quad_mesh_2d(4).unwrap();
    for e in 0..mesh.num_elements() {
        if e % 4 >= 2 {
            mesh.set_attribute(e, 2);
        }
    }
    // Slope 2 where the coefficient is 1, slope 1 where it is 2
    let f = |x: &DVector<f64>| if x[0] <= 0.5 { 2.0 * x[0] } else { 0.5 + x[0] };
    let solution = interpolated_solution(mesh, Continuity::H1, 1, f);
    let coefficient = PiecewiseConstantCoefficient::new(1.0).with_value(2, 2.0);
    let mut weighted =
        KellyErrorEstimator::new(DiffusionFlux::with_coefficient(coefficient)).with_solution(solution.clone());
    assert!(weighted.total_error().unwrap() <= 1e-12);

    let mut unweighted = KellyErrorEstimator::new(DiffusionFlux::new()).with_solution(solution);
    assert!(unweighted.total_error().unwrap() > 0.1);
}

#[test]
fn vector_valued_solutions_are_not_supported() {
    let mesh = Arc::new(create_unit_square_uniform_quad_mesh_2d(2).unwrap());
    let space = Arc::new(FiniteElementSpace::new(mesh, Continuity::H1, 1, 2).unwrap());
    let solution = GridFunction::zeros(space).into_shared();
    let mut estimator = KellyErrorEstimator::new(DiffusionFlux::new()).with_solution(solution);
    assert!(matches!(estimator.local_errors(), Err(EstimatorError::NotImplemented { .. })));
}

#[test]
fn partitioned_estimates_match_serial_estimates() {
    let global = create_unit_square_uniform_quad_mesh_2d(6).unwrap();
    for (num_ranks, axis, order) in [(2, 0, 1), (3, 1, 2), (4, 0, 2)] {
        let (serial_errors, serial_total) = kelly_errors(global.clone(), order, smooth_function);
        let parts = partition_along_axis(&global, num_ranks, axis);

        let results = run_on_ranks(num_ranks, |comm| {
            let mesh = distributed(&global, &parts, comm);
            let global_ids = mesh.partition().global_element_ids().to_vec();
            let solution = interpolated_solution(mesh, Continuity::H1, order, smooth_function);
            let mut estimator = KellyErrorEstimator::new(DiffusionFlux::new()).with_solution(solution);
            let local_errors = estimator.local_errors().unwrap().to_vec();
            let total = estimator.total_error().unwrap();
            (global_ids, local_errors, total, estimator.shared_face_jumps().to_vec())
        });

        let per_rank: Vec<(Vec<usize>, Vec<f64>)> =
            results.iter().map(|(ids, errors, _, _)| (ids.clone(), errors.clone())).collect();
        let gathered = gather_local_errors(&per_rank, global.num_elements());
        for (partitioned, serial) in gathered.iter().zip(&serial_errors) {
            assert_scalar_eq!(*partitioned, *serial, comp = abs, tol = 1e-12);
        }
        for (_, _, total, _) in &results {
            assert_eq!(*total, results[0].2);
            assert_scalar_eq!(*total, serial_total, comp = abs, tol = 1e-12);
        }

        // Both ranks adjacent to a shared face compute identical contributions
        let all_jumps: Vec<(usize, f64)> = results.iter().flat_map(|(_, _, _, jumps)| jumps.clone()).collect();
        assert!(!all_jumps.is_empty());
        for (face, jump) in &all_jumps {
            let matching: Vec<f64> = all_jumps
                .iter()
                .filter(|(other, _)| other == face)
                .map(|(_, other_jump)| *other_jump)
                .collect();
            assert_eq!(matching, vec![*jump, *jump]);
        }
    }
}

#[test]
fn every_interior_face_is_integrated_once() {
    let mesh = create_unit_square_uniform_quad_mesh_2d(2)
        .unwrap()
        .refine_elements(&[0])
        .unwrap();
    let mut integrated = 0;
    for face in mesh.faces() {
        let element = integrating_element(face);
        match face.kind() {
            FaceKind::Boundary | FaceKind::NonConformingMaster => assert_eq!(element, None),
            FaceKind::Conforming => {
                let elem2 = face.elem2().unwrap().element;
                assert_eq!(element, Some(face.elem1().element.min(elem2)));
                integrated += 1;
            }
            FaceKind::NonConformingSlave => {
                assert_eq!(element, Some(face.elem1().element));
                integrated += 1;
            }
        }
    }
    // Four conforming faces inside the refined element, two between unrefined elements and
    // four slave faces
    assert_eq!(integrated, 10);
}

#[test]
fn jump_of_constant_fluxes_across_straight_face() {
    let square = |x0: f64| {
        let vertices = [[x0, 0.0], [x0 + 1.0, 0.0], [x0 + 1.0, 1.0], [x0, 1.0]]
            .iter()
            .map(|v| DVector::from_column_slice(v))
            .collect();
        ElementTransformation::new(CellKind::Quadrilateral, vertices)
    };
    let (left, right) = (square(0.0), square(1.0));
    let flux_element = LagrangeElement::new(CellKind::Quadrilateral, 0);
    let rule = rule_for_order(Geometry::Segment, 2);
    let integrator = FaceJumpIntegrator::new(&flux_element, 2, &rule);

    let points = [dvector![1.0, 0.0], dvector![1.0, 1.0]];
    let left_side = FaceSideData {
        transformation: &left,
        local_face: 1,
        map: LocalFaceMap::identity(),
        flux: &[1.0, 0.0],
    };
    let right_side = FaceSideData {
        transformation: &right,
        local_face: 3,
        map: LocalFaceMap::reversed(),
        flux: &[3.0, 5.0],
    };
    // Only the normal component of the flux difference enters
    let jump = integrator.integrate(&points, &left_side, &right_side);
    assert_scalar_eq!(jump, 4.0, comp = abs, tol = 1e-14);
    assert_eq!(integrator.integrate(&points, &right_side, &left_side), jump);
}

#[test]
fn jump_across_kink_uses_conormals() {
    let segment = |a: DVector<f64>, b: DVector<f64>| ElementTransformation::new(CellKind::Segment, vec![a, b]);
    let first = segment(dvector![0.0, 0.0], dvector![1.0, 0.0]);
    let second = segment(dvector![1.0, 0.0], dvector![1.0, 1.0]);
    let flux_element = LagrangeElement::new(CellKind::Segment, 0);
    let rule = rule_for_order(Geometry::Point, 0);
    let integrator = FaceJumpIntegrator::new(&flux_element, 2, &rule);
    fn side<'a>(transformation: &'a ElementTransformation, local_face: usize, flux: &'a [f64]) -> FaceSideData<'a> {
        FaceSideData {
            transformation,
            local_face,
            map: LocalFaceMap::identity(),
            flux,
        }
    }
    let points = [dvector![1.0, 0.0]];

    // A unit tangential flux is continuous along the polyline
    let continuous = integrator.integrate(&points, &side(&first, 1, &[1.0, 0.0]), &side(&second, 0, &[0.0, 1.0]));
    assert_scalar_eq!(continuous, 0.0, comp = abs, tol = 1e-15);

    let reversed = integrator.integrate(&points, &side(&first, 1, &[1.0, 0.0]), &side(&second, 0, &[0.0, -1.0]));
    assert_scalar_eq!(reversed, 2.0, comp = abs, tol = 1e-14);
}
