use fenris_estimators::mesh::procedural::{create_line_mesh, create_unit_square_uniform_quad_mesh_2d};
use fenris_estimators::mesh::FaceKind;
use matrixcompare::assert_scalar_eq;

fn total_volume(mesh: &fenris_estimators::mesh::Mesh) -> f64 {
    (0..mesh.num_elements())
        .map(|e| mesh.element_transformation(e).volume())
        .sum()
}

#[test]
fn uniform_refinement_stays_conforming() {
    let mesh = create_unit_square_uniform_quad_mesh_2d(2).unwrap();
    let refined = mesh.refine_uniformly().unwrap();
    assert_eq!(refined.num_elements(), 16);
    assert_eq!(refined.num_vertices(), 25);
    assert!(refined
        .faces()
        .iter()
        .all(|face| matches!(face.kind(), FaceKind::Boundary | FaceKind::Conforming)));
    assert_scalar_eq!(total_volume(&refined), 1.0, comp = abs, tol = 1e-12);
    assert_ne!(refined.sequence(), mesh.sequence());
}

#[test]
fn local_refinement_creates_hanging_vertices() {
    let mesh = create_unit_square_uniform_quad_mesh_2d(2).unwrap();
    let refined = mesh.refine_elements(&[0]).unwrap();
    assert_eq!(refined.num_elements(), 7);
    // Four children appended after the three unrefined elements
    assert_eq!(refined.cells()[0].vertices(), mesh.cells()[1].vertices());
    assert_eq!(refined.num_vertices(), 9 + 5);

    let count = |kind| refined.faces().iter().filter(|face| face.kind() == kind).count();
    assert_eq!(count(FaceKind::NonConformingMaster), 2);
    assert_eq!(count(FaceKind::NonConformingSlave), 4);
    for face in refined.faces() {
        if face.kind() == FaceKind::NonConformingSlave {
            assert!(face.elem1().element >= 3);
            assert!(face.elem2().unwrap().element < 3);
        }
    }
    assert_scalar_eq!(total_volume(&refined), 1.0, comp = abs, tol = 1e-12);
}

#[test]
fn refining_coarse_neighbor_reuses_hanging_vertex() {
    let mesh = create_unit_square_uniform_quad_mesh_2d(2).unwrap();
    let once = mesh.refine_elements(&[0]).unwrap();
    // Element 0 of the refined mesh is the former element 1, to the right of the children
    let twice = once.refine_elements(&[0]).unwrap();
    assert_eq!(twice.num_elements(), 10);
    assert_eq!(twice.num_vertices(), once.num_vertices() + 4);
    let masters = twice
        .faces()
        .iter()
        .filter(|face| face.kind() == FaceKind::NonConformingMaster)
        .count();
    assert_eq!(masters, 2);
}

#[test]
fn refinement_rejects_second_level_hanging_vertices() {
    let mesh = create_unit_square_uniform_quad_mesh_2d(2).unwrap();
    let once = mesh.refine_elements(&[0]).unwrap();
    // Children next to a coarse neighbor cannot be refined on their own
    let child = once
        .faces()
        .iter()
        .find(|face| face.kind() == FaceKind::NonConformingSlave)
        .map(|face| face.elem1().element)
        .unwrap();
    assert!(once.refine_elements(&[child]).is_err());
    assert!(once.refine_elements(&[99]).is_err());
}

#[test]
fn segments_are_bisected() {
    let mesh = create_line_mesh(0.0, 1.0, 2).unwrap();
    let refined = mesh.refine_elements(&[1]).unwrap();
    assert_eq!(refined.num_elements(), 3);
    assert_eq!(refined.num_vertices(), 4);
    assert_scalar_eq!(refined.element_diameter(0), 0.5, comp = abs, tol = 1e-14);
    assert_scalar_eq!(refined.element_diameter(2), 0.25, comp = abs, tol = 1e-14);
    assert!(refined.faces().iter().all(|face| face.kind() != FaceKind::NonConformingSlave));
}
