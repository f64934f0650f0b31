//! Meshes of segments and quadrilaterals, possibly embedded in higher dimensions.
//!
//! A [`Mesh`] owns its vertices, cells and face topology, including non-conforming faces that
//! arise from local refinement, and a [`Partition`] describing how the mesh relates to the
//! other ranks of a distributed computation. Every mesh carries a *sequence* number which
//! changes whenever the mesh changes, so that derived data can be invalidated cheaply.
use crate::comm::{Communicator, SerialCommunicator};
use crate::element::{CellKind, ElementTransformation};
use eyre::eyre;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod faces;
mod partition;
pub mod procedural;
mod refinement;

pub use partition::{distribute, partition_along_axis};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Returns a sequence number that has never been handed out before in this process.
pub(crate) fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    kind: CellKind,
    vertices: Vec<usize>,
    attribute: usize,
}

impl Cell {
    /// # Panics
    ///
    /// Panics if the number of vertices does not match the cell kind.
    pub fn new(kind: CellKind, vertices: Vec<usize>, attribute: usize) -> Self {
        assert_eq!(vertices.len(), kind.num_vertices());
        Self {
            kind,
            vertices,
            attribute,
        }
    }

    pub fn segment(vertices: [usize; 2], attribute: usize) -> Self {
        Self::new(CellKind::Segment, vertices.to_vec(), attribute)
    }

    pub fn quadrilateral(vertices: [usize; 4], attribute: usize) -> Self {
        Self::new(CellKind::Quadrilateral, vertices.to_vec(), attribute)
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn vertices(&self) -> &[usize] {
        &self.vertices
    }

    pub fn attribute(&self) -> usize {
        self.attribute
    }

    /// Vertex indices of the given local face, in the orientation of the face.
    pub fn face_vertices(&self, local_face: usize) -> Vec<usize> {
        self.kind
            .face_vertices(local_face)
            .iter()
            .map(|&v| self.vertices[v])
            .collect()
    }
}

/// The affine map from the parameter of a face to the parameter of the local face of an
/// adjacent element.
///
/// Face parameters live in $[-1, 1]$. The map sends $-1$ to `start` and $1$ to `end`, so a
/// reversed orientation has `start = 1, end = -1`, and a sub-face of a coarser face maps to a
/// sub-interval.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFaceMap {
    pub start: f64,
    pub end: f64,
}

impl LocalFaceMap {
    pub fn identity() -> Self {
        Self { start: -1.0, end: 1.0 }
    }

    pub fn reversed() -> Self {
        Self { start: 1.0, end: -1.0 }
    }

    pub fn apply(&self, s: f64) -> f64 {
        0.5 * (1.0 - s) * self.start + 0.5 * (1.0 + s) * self.end
    }
}

impl Default for LocalFaceMap {
    fn default() -> Self {
        Self::identity()
    }
}

/// One of the (at most two) elements adjacent to a face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSide {
    pub element: usize,
    pub local_face: usize,
    pub map: LocalFaceMap,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaceKind {
    /// A face with a single adjacent element.
    Boundary,
    /// A face shared by two elements that both see the entire face.
    Conforming,
    /// A sub-face of a coarser face. The first side is the fine element, the second side the
    /// coarse element.
    NonConformingSlave,
    /// A coarse face that is subdivided into slave faces. It carries no integration itself.
    NonConformingMaster,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    kind: FaceKind,
    vertices: Vec<usize>,
    elem1: FaceSide,
    elem2: Option<FaceSide>,
    slaves: Vec<usize>,
}

impl Face {
    pub fn kind(&self) -> FaceKind {
        self.kind
    }

    pub fn vertices(&self) -> &[usize] {
        &self.vertices
    }

    pub fn elem1(&self) -> &FaceSide {
        &self.elem1
    }

    pub fn elem2(&self) -> Option<&FaceSide> {
        self.elem2.as_ref()
    }

    /// Indices of the slave faces of a non-conforming master face.
    pub fn slaves(&self) -> &[usize] {
        &self.slaves
    }

    pub fn is_interior(&self) -> bool {
        self.elem2.is_some()
    }
}

/// The remote element across a face shared with another rank.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceNeighbor {
    pub rank: usize,
    pub global_element: usize,
    pub attribute: usize,
    pub transformation: ElementTransformation,
    pub local_face: usize,
    pub map: LocalFaceMap,
}

/// A face between a local element and an element owned by another rank.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedFace {
    /// The index of the face in the undistributed mesh, identical on both ranks.
    pub global_id: usize,
    pub kind: FaceKind,
    /// Coordinates of the face vertices, identical on both ranks.
    pub points: Vec<DVector<f64>>,
    pub local: FaceSide,
    pub neighbor: FaceNeighbor,
}

/// Relation of the local part of a mesh to the rest of a distributed mesh.
#[derive(Debug, Clone)]
pub struct Partition {
    comm: Arc<dyn Communicator>,
    global_vertex_ids: Vec<usize>,
    global_element_ids: Vec<usize>,
    // Other ranks sharing each local vertex, sorted
    vertex_neighbors: Vec<Vec<usize>>,
    // Other ranks sharing each edge, keyed by the sorted global ids of its vertices
    edge_neighbors: BTreeMap<[usize; 2], Vec<usize>>,
    shared_faces: Vec<SharedFace>,
}

impl Partition {
    fn serial(num_vertices: usize, num_elements: usize) -> Self {
        Self {
            comm: Arc::new(SerialCommunicator),
            global_vertex_ids: (0..num_vertices).collect(),
            global_element_ids: (0..num_elements).collect(),
            vertex_neighbors: vec![Vec::new(); num_vertices],
            edge_neighbors: BTreeMap::new(),
            shared_faces: Vec::new(),
        }
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn num_ranks(&self) -> usize {
        self.comm.size()
    }

    pub fn global_vertex_id(&self, local_vertex: usize) -> usize {
        self.global_vertex_ids[local_vertex]
    }

    pub fn global_element_id(&self, local_element: usize) -> usize {
        self.global_element_ids[local_element]
    }

    pub fn global_element_ids(&self) -> &[usize] {
        &self.global_element_ids
    }

    /// Other ranks that share the given local vertex.
    pub fn vertex_neighbors(&self, local_vertex: usize) -> &[usize] {
        &self.vertex_neighbors[local_vertex]
    }

    /// Other ranks that share the edge between the two local vertices.
    pub fn edge_neighbors(&self, a: usize, b: usize) -> &[usize] {
        let (ga, gb) = (self.global_vertex_ids[a], self.global_vertex_ids[b]);
        let key = [ga.min(gb), ga.max(gb)];
        self.edge_neighbors.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn shared_faces(&self) -> &[SharedFace] {
        &self.shared_faces
    }

    /// The ranks this rank shares at least one face with, sorted.
    pub fn face_neighbor_ranks(&self) -> Vec<usize> {
        self.shared_faces
            .iter()
            .map(|face| face.neighbor.rank)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    dim: usize,
    space_dim: usize,
    vertices: Vec<DVector<f64>>,
    cells: Vec<Cell>,
    faces: Vec<Face>,
    partition: Partition,
    sequence: u64,
}

impl Mesh {
    /// Creates a serial mesh from vertices and cells.
    ///
    /// All cells must have the same kind. Interior, boundary and non-conforming faces are
    /// detected from the cell connectivity. Non-conforming faces are only supported for
    /// quadrilateral meshes where each coarse edge is split into at most two fine edges.
    pub fn from_vertices_and_cells(vertices: Vec<DVector<f64>>, cells: Vec<Cell>) -> eyre::Result<Self> {
        let kind = cells
            .first()
            .map(Cell::kind)
            .ok_or_else(|| eyre!("cannot create a mesh without cells"))?;
        if cells.iter().any(|cell| cell.kind() != kind) {
            return Err(eyre!("all cells of a mesh must have the same kind"));
        }
        let space_dim = vertices
            .first()
            .map(|v| v.len())
            .ok_or_else(|| eyre!("cannot create a mesh without vertices"))?;
        if space_dim < kind.dim() || vertices.iter().any(|v| v.len() != space_dim) {
            return Err(eyre!(
                "vertices must all have the same dimension, at least the cell dimension {}",
                kind.dim()
            ));
        }
        for (index, cell) in cells.iter().enumerate() {
            if let Some(&v) = cell.vertices().iter().find(|&&v| v >= vertices.len()) {
                return Err(eyre!("cell {index} refers to nonexistent vertex {v}"));
            }
        }

        let faces = faces::compute_faces(&vertices, &cells)?;
        let partition = Partition::serial(vertices.len(), cells.len());
        Ok(Self {
            dim: kind.dim(),
            space_dim,
            vertices,
            cells,
            faces,
            partition,
            sequence: next_sequence(),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn space_dim(&self) -> usize {
        self.space_dim
    }

    pub fn cell_kind(&self) -> CellKind {
        self.cells[0].kind()
    }

    pub fn vertices(&self) -> &[DVector<f64>] {
        &self.vertices
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_elements(&self) -> usize {
        self.cells.len()
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        self.partition.comm()
    }

    pub fn shared_faces(&self) -> &[SharedFace] {
        self.partition.shared_faces()
    }

    /// The current topology version of the mesh.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn element_attribute(&self, element: usize) -> usize {
        self.cells[element].attribute()
    }

    /// The sorted set of all element attributes present in the local mesh.
    pub fn attributes(&self) -> BTreeSet<usize> {
        self.cells.iter().map(Cell::attribute).collect()
    }

    pub fn element_transformation(&self, element: usize) -> ElementTransformation {
        let cell = &self.cells[element];
        let vertices = cell
            .vertices()
            .iter()
            .map(|&v| self.vertices[v].clone())
            .collect();
        ElementTransformation::new(cell.kind(), vertices)
    }

    pub fn element_diameter(&self, element: usize) -> f64 {
        self.element_transformation(element).diameter()
    }

    pub fn face_points(&self, face: &Face) -> Vec<DVector<f64>> {
        face.vertices()
            .iter()
            .map(|&v| self.vertices[v].clone())
            .collect()
    }

    /// Changes the attribute of an element. This counts as a modification of the mesh.
    pub fn set_attribute(&mut self, element: usize, attribute: usize) {
        self.cells[element].attribute = attribute;
        self.mark_modified();
    }

    /// Moves every vertex by the given map. This counts as a modification of the mesh.
    pub fn transform_vertices(&mut self, mut transform: impl FnMut(&mut DVector<f64>)) {
        for v in &mut self.vertices {
            transform(v);
        }
        self.mark_modified();
    }

    /// Assigns a new sequence number, invalidating everything derived from the mesh.
    pub fn mark_modified(&mut self) {
        self.sequence = next_sequence();
    }
}

/// The measure (length) of a face with the given vertex coordinates. Point faces have unit
/// measure.
pub fn face_measure(points: &[DVector<f64>]) -> f64 {
    match points {
        [a, b] => (b - a).norm(),
        _ => 1.0,
    }
}
