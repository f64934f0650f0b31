use super::{Cell, Face, FaceKind, FaceSide, LocalFaceMap};
use eyre::eyre;
use nalgebra::DVector;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

const COLLINEARITY_TOLERANCE: f64 = 1e-10;

/// Whether `p` lies strictly inside the segment from `a` to `b`.
fn lies_inside_segment(a: &DVector<f64>, b: &DVector<f64>, p: &DVector<f64>) -> bool {
    let d = b - a;
    let length_squared = d.norm_squared();
    if length_squared == 0.0 {
        return false;
    }
    let t = (p - a).dot(&d) / length_squared;
    let distance = ((p - a) - &d * t).norm();
    let inside = t > COLLINEARITY_TOLERANCE && t < 1.0 - COLLINEARITY_TOLERANCE;
    inside && distance <= COLLINEARITY_TOLERANCE * length_squared.sqrt()
}

fn segment_parameter(a: &DVector<f64>, b: &DVector<f64>, p: &DVector<f64>) -> f64 {
    let d = b - a;
    2.0 * (p - a).dot(&d) / d.norm_squared() - 1.0
}

/// A face seen by exactly one element, before non-conforming faces have been identified.
#[derive(Debug)]
struct Unmatched {
    element: usize,
    local_face: usize,
    vertices: Vec<usize>,
}

enum Classified {
    Conforming([(usize, usize); 2]),
    Unmatched(usize),
}

/// Computes the faces of a mesh.
///
/// Faces are ordered by their sorted vertex indices. For interior conforming faces, the first
/// side is the element with the smaller index, and the face is oriented as seen from it.
pub(crate) fn compute_faces(vertices: &[DVector<f64>], cells: &[Cell]) -> eyre::Result<Vec<Face>> {
    let mut incidence: BTreeMap<Vec<usize>, Vec<(usize, usize)>> = BTreeMap::new();
    for (element, cell) in cells.iter().enumerate() {
        for local_face in 0..cell.kind().num_faces() {
            let mut key = cell.face_vertices(local_face);
            key.sort_unstable();
            incidence.entry(key).or_default().push((element, local_face));
        }
    }

    let mut classified = Vec::with_capacity(incidence.len());
    let mut unmatched = Vec::new();
    for (key, sides) in &incidence {
        match sides.as_slice() {
            [first] => {
                classified.push(Classified::Unmatched(unmatched.len()));
                unmatched.push(Unmatched {
                    element: first.0,
                    local_face: first.1,
                    vertices: cells[first.0].face_vertices(first.1),
                });
            }
            [first, second] => classified.push(Classified::Conforming([*first, *second])),
            _ => {
                return Err(eyre!(
                    "face with vertices {:?} is shared by {} elements, mesh is not a manifold",
                    key,
                    sides.len()
                ))
            }
        }
    }

    // Only edges can be split into sub-faces
    let is_edge_mesh = cells.first().map_or(false, |cell| cell.kind().dim() == 2);
    let masters = if is_edge_mesh {
        find_non_conforming_masters(vertices, &unmatched)
    } else {
        vec![None; unmatched.len()]
    };

    let mut faces = Vec::with_capacity(classified.len());
    let mut face_of_unmatched = vec![usize::MAX; unmatched.len()];
    for entry in classified {
        match entry {
            Classified::Conforming([(e1, f1), (e2, f2)]) => {
                let face_vertices = cells[e1].face_vertices(f1);
                let map2 = if cells[e2].face_vertices(f2) == face_vertices {
                    LocalFaceMap::identity()
                } else {
                    LocalFaceMap::reversed()
                };
                faces.push(Face {
                    kind: FaceKind::Conforming,
                    vertices: face_vertices,
                    elem1: FaceSide {
                        element: e1,
                        local_face: f1,
                        map: LocalFaceMap::identity(),
                    },
                    elem2: Some(FaceSide {
                        element: e2,
                        local_face: f2,
                        map: map2,
                    }),
                    slaves: Vec::new(),
                });
            }
            Classified::Unmatched(index) => {
                let candidate = &unmatched[index];
                face_of_unmatched[index] = faces.len();
                let elem1 = FaceSide {
                    element: candidate.element,
                    local_face: candidate.local_face,
                    map: LocalFaceMap::identity(),
                };
                let (kind, elem2) = match masters[index] {
                    Some(master_index) => {
                        let master = &unmatched[master_index];
                        let a = &vertices[master.vertices[0]];
                        let b = &vertices[master.vertices[1]];
                        let map = LocalFaceMap {
                            start: segment_parameter(a, b, &vertices[candidate.vertices[0]]),
                            end: segment_parameter(a, b, &vertices[candidate.vertices[1]]),
                        };
                        let side = FaceSide {
                            element: master.element,
                            local_face: master.local_face,
                            map,
                        };
                        (FaceKind::NonConformingSlave, Some(side))
                    }
                    None => (FaceKind::Boundary, None),
                };
                faces.push(Face {
                    kind,
                    vertices: candidate.vertices.clone(),
                    elem1,
                    elem2,
                    slaves: Vec::new(),
                });
            }
        }
    }

    for (slave_index, master_index) in masters.iter().enumerate() {
        if let Some(master_index) = master_index {
            let slave_face = face_of_unmatched[slave_index];
            let master = &mut faces[face_of_unmatched[*master_index]];
            master.kind = FaceKind::NonConformingMaster;
            master.slaves.push(slave_face);
        }
    }
    for face in &mut faces {
        face.slaves.sort_unstable();
    }

    Ok(faces)
}

/// For each unmatched edge, finds the unmatched edge it is a sub-face of, if any.
///
/// A sub-face shares one endpoint with its master, and its other endpoint lies strictly inside
/// the master edge.
fn find_non_conforming_masters(vertices: &[DVector<f64>], unmatched: &[Unmatched]) -> Vec<Option<usize>> {
    let mut vertex_to_edges: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for (index, edge) in unmatched.iter().enumerate() {
        for &v in &edge.vertices {
            vertex_to_edges.entry(v).or_default().push(index);
        }
    }

    unmatched
        .iter()
        .enumerate()
        .map(|(index, edge)| {
            edge.vertices.iter().enumerate().find_map(|(i, shared)| {
                let other = edge.vertices[1 - i];
                vertex_to_edges[shared]
                    .iter()
                    .copied()
                    .filter(|&candidate| candidate != index)
                    .find(|&candidate| {
                        let master = &unmatched[candidate];
                        let a = &vertices[master.vertices[0]];
                        let b = &vertices[master.vertices[1]];
                        !master.vertices.contains(&other) && lies_inside_segment(a, b, &vertices[other])
                    })
            })
        })
        .collect()
}
