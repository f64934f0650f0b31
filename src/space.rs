//! Lagrange finite element spaces and functions on them.
use crate::element::{CellKind, LagrangeElement};
use crate::mesh::Mesh;
use eyre::eyre;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

mod grid_function;
mod sharing;

pub use grid_function::{GridFunction, SharedGridFunction};
pub use sharing::{DofKey, DofSharing};

/// Inter-element continuity of a finite element space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Continuity {
    /// Continuous across element boundaries.
    H1,
    /// Discontinuous, every element has its own degrees of freedom.
    L2,
}

/// The location of a scalar degree of freedom in the mesh, used to establish dof sharing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DofLocation {
    Vertex(usize),
    /// The `k`-th interior node of the edge between two local vertices, counted from the
    /// vertex with the smaller global index.
    Edge { a: usize, b: usize, k: usize },
    Interior,
}

/// A Lagrange finite element space on a mesh, with `vdim` components per node.
///
/// Each element stores its scalar dofs in the lexicographic node order of the reference element.
/// Vector-valued functions use the "by nodes" layout: component `c` of scalar dof `i` is stored at
/// `c * num_dofs + i`.
#[derive(Debug, Clone)]
pub struct FiniteElementSpace {
    mesh: Arc<Mesh>,
    continuity: Continuity,
    vdim: usize,
    element: LagrangeElement,
    element_dofs: Vec<Vec<usize>>,
    num_dofs: usize,
    sharing: DofSharing,
}

impl FiniteElementSpace {
    pub fn new(mesh: Arc<Mesh>, continuity: Continuity, order: usize, vdim: usize) -> eyre::Result<Self> {
        if vdim == 0 {
            return Err(eyre!("finite element spaces need at least one component"));
        }
        if continuity == Continuity::H1 && order == 0 {
            return Err(eyre!("continuous spaces require an order of at least one"));
        }
        let kind = CellKind::from_dim(mesh.dim()).ok_or_else(|| eyre!("unsupported mesh dimension {}", mesh.dim()))?;
        let element = LagrangeElement::new(kind, order);

        let (element_dofs, locations) = match continuity {
            Continuity::H1 => number_continuous_dofs(&mesh, &element),
            Continuity::L2 => {
                let n = element.num_nodes();
                let element_dofs: Vec<Vec<usize>> = (0..mesh.num_elements())
                    .map(|e| (e * n..(e + 1) * n).collect())
                    .collect();
                let locations = vec![DofLocation::Interior; n * mesh.num_elements()];
                (element_dofs, locations)
            }
        };
        let sharing = DofSharing::from_locations(mesh.partition(), &locations);

        Ok(Self {
            num_dofs: locations.len(),
            mesh,
            continuity,
            vdim,
            element,
            element_dofs,
            sharing,
        })
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn continuity(&self) -> Continuity {
        self.continuity
    }

    pub fn order(&self) -> usize {
        self.element.order()
    }

    pub fn vdim(&self) -> usize {
        self.vdim
    }

    pub fn element(&self) -> &LagrangeElement {
        &self.element
    }

    /// The number of scalar degrees of freedom.
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    /// The total number of degrees of freedom, counting every component.
    pub fn num_vdofs(&self) -> usize {
        self.num_dofs * self.vdim
    }

    pub fn element_dofs(&self, element: usize) -> &[usize] {
        &self.element_dofs[element]
    }

    /// All degrees of freedom of an element, component-major.
    pub fn element_vdofs(&self, element: usize) -> Vec<usize> {
        let dofs = &self.element_dofs[element];
        (0..self.vdim)
            .flat_map(|c| dofs.iter().map(move |&d| c * self.num_dofs + d))
            .collect()
    }

    /// Sharing of scalar dofs with other ranks.
    pub fn sharing(&self) -> &DofSharing {
        &self.sharing
    }

    /// Whether this space was built for the current state of its mesh with the given
    /// parameters.
    pub fn is_compatible(&self, mesh: &Mesh, continuity: Continuity, order: usize, vdim: usize) -> bool {
        self.mesh.sequence() == mesh.sequence()
            && self.continuity == continuity
            && self.order() == order
            && self.vdim == vdim
    }
}

/// Numbers the dofs of a continuous space: vertex dofs first (in vertex order), then edge
/// interior dofs (edges ordered by their sorted vertex indices), then cell interior dofs.
fn number_continuous_dofs(mesh: &Mesh, element: &LagrangeElement) -> (Vec<Vec<usize>>, Vec<DofLocation>) {
    let p = element.order();
    let per_edge = p - 1;
    let partition = mesh.partition();
    let mut locations: Vec<DofLocation> = (0..mesh.num_vertices()).map(DofLocation::Vertex).collect();

    match element.kind() {
        CellKind::Segment => {
            let element_dofs = mesh
                .cells()
                .iter()
                .map(|cell| {
                    let v = cell.vertices();
                    let mut dofs = Vec::with_capacity(p + 1);
                    dofs.push(v[0]);
                    for _ in 1..p {
                        dofs.push(locations.len());
                        locations.push(DofLocation::Interior);
                    }
                    dofs.push(v[1]);
                    dofs
                })
                .collect();
            (element_dofs, locations)
        }
        CellKind::Quadrilateral => {
            let mut edges = BTreeMap::new();
            for cell in mesh.cells() {
                for local_face in 0..cell.kind().num_faces() {
                    let edge = cell.face_vertices(local_face);
                    edges.entry([edge[0].min(edge[1]), edge[0].max(edge[1])]).or_insert(0);
                }
            }
            for (key, base) in edges.iter_mut() {
                *base = locations.len();
                // Orient by global vertex index, so that all ranks agree on the ordering
                let (a, b) = if partition.global_vertex_id(key[0]) < partition.global_vertex_id(key[1]) {
                    (key[0], key[1])
                } else {
                    (key[1], key[0])
                };
                locations.extend((1..=per_edge).map(|k| DofLocation::Edge { a, b, k }));
            }

            let element_dofs = mesh
                .cells()
                .iter()
                .map(|cell| {
                    let v = cell.vertices();
                    let interior_base = locations.len();
                    locations.extend((0..per_edge * per_edge).map(|_| DofLocation::Interior));

                    // The k-th interior node (1 <= k < p) along the edge from s to t
                    let edge_dof = |s: usize, t: usize, k: usize| {
                        let base = edges[&[s.min(t), s.max(t)]];
                        if partition.global_vertex_id(s) < partition.global_vertex_id(t) {
                            base + k - 1
                        } else {
                            base + p - 1 - k
                        }
                    };

                    let mut dofs = Vec::with_capacity(element.num_nodes());
                    for j in 0..=p {
                        for i in 0..=p {
                            let dof = match (i, j) {
                                (0, 0) => v[0],
                                (i, 0) if i == p => v[1],
                                (i, j) if i == p && j == p => v[2],
                                (0, j) if j == p => v[3],
                                (i, 0) => edge_dof(v[0], v[1], i),
                                (i, j) if i == p => edge_dof(v[1], v[2], j),
                                (i, j) if j == p => edge_dof(v[2], v[3], p - i),
                                (0, j) => edge_dof(v[3], v[0], p - j),
                                (i, j) => interior_base + (i - 1) + per_edge * (j - 1),
                            };
                            dofs.push(dof);
                        }
                    }
                    dofs
                })
                .collect();
            (element_dofs, locations)
        }
    }
}
