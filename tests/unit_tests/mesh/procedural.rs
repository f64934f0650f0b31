use fenris_estimators::mesh::procedural::{
    create_line_mesh, create_polyline_mesh, create_rectangular_uniform_quad_mesh_2d,
    create_unit_square_uniform_quad_mesh_2d,
};
use matrixcompare::assert_scalar_eq;
use nalgebra::dvector;

#[test]
fn line_mesh_basics() {
    let mesh = create_line_mesh(-1.0, 2.0, 3).unwrap();
    assert_eq!(mesh.num_vertices(), 4);
    assert_eq!(mesh.num_elements(), 3);
    assert_eq!(mesh.dim(), 1);
    assert_eq!(mesh.space_dim(), 1);
    for e in 0..3 {
        assert_scalar_eq!(mesh.element_diameter(e), 1.0, comp = abs, tol = 1e-14);
    }
    assert!(create_line_mesh(0.0, 1.0, 0).is_err());
    assert!(create_line_mesh(1.0, 0.0, 2).is_err());
}

#[test]
fn polyline_mesh_in_three_dimensions() {
    let points = [dvector![0.0, 0.0, 0.0], dvector![1.0, 0.0, 0.0], dvector![2.0, 2.0, 2.0]];
    let mesh = create_polyline_mesh(&points).unwrap();
    assert_eq!(mesh.dim(), 1);
    assert_eq!(mesh.space_dim(), 3);
    assert_eq!(mesh.num_elements(), 2);
    assert_scalar_eq!(mesh.element_transformation(1).volume(), 3.0, comp = abs, tol = 1e-12);
    assert!(create_polyline_mesh(&points[..1]).is_err());
}

#[test]
fn rectangular_uniform_quad_mesh_basics() {
    let mesh = create_rectangular_uniform_quad_mesh_2d([0.0, -1.0], [3.0, 1.0], 3, 2).unwrap();
    assert_eq!(mesh.num_vertices(), 12);
    assert_eq!(mesh.num_elements(), 6);
    assert_eq!(mesh.cells()[0].vertices(), &[0, 1, 5, 4]);
    assert_eq!(mesh.vertices()[11], dvector![3.0, 1.0]);
    let total_volume: f64 = (0..mesh.num_elements())
        .map(|e| mesh.element_transformation(e).volume())
        .sum();
    assert_scalar_eq!(total_volume, 6.0, comp = abs, tol = 1e-12);
    assert!(mesh.cells().iter().all(|cell| cell.attribute() == 1));
}

#[test]
fn empty_rectangular_meshes_are_rejected() {
    assert!(create_rectangular_uniform_quad_mesh_2d([0.0, 0.0], [1.0, 1.0], 0, 1).is_err());
    assert!(create_rectangular_uniform_quad_mesh_2d([0.0, 0.0], [0.0, 1.0], 1, 1).is_err());
    assert!(create_unit_square_uniform_quad_mesh_2d(0).is_err());
}
