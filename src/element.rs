//! Reference elements, Lagrange bases and element transformations.
//!
//! The reference segment is $[-1, 1]$ with vertices $-1, 1$. The reference quadrilateral is
//! $[-1, 1]^2$ with the counter-clockwise vertex ordering
//!
//! ```text
//! 3 ------ 2
//! |        |
//! |        |
//! 0 ------ 1
//! ```
//!
//! Local face `k` of a quadrilateral is the edge from vertex `k` to vertex `k + 1 (mod 4)`.
//! Local face `0` of a segment is the vertex at $-1$, local face `1` the vertex at $1$.
use crate::quadrature::{self, Geometry};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// The cell types supported by the meshes in this crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Segment,
    Quadrilateral,
}

impl CellKind {
    /// Returns the cell kind used for meshes of the given reference dimension, if supported.
    pub fn from_dim(dim: usize) -> Option<Self> {
        match dim {
            1 => Some(Self::Segment),
            2 => Some(Self::Quadrilateral),
            _ => None,
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Segment => 1,
            Self::Quadrilateral => 2,
        }
    }

    pub fn num_vertices(&self) -> usize {
        match self {
            Self::Segment => 2,
            Self::Quadrilateral => 4,
        }
    }

    pub fn num_faces(&self) -> usize {
        self.num_vertices()
    }

    pub fn geometry(&self) -> Geometry {
        match self {
            Self::Segment => Geometry::Segment,
            Self::Quadrilateral => Geometry::Square,
        }
    }

    pub fn face_geometry(&self) -> Geometry {
        match self {
            Self::Segment => Geometry::Point,
            Self::Quadrilateral => Geometry::Segment,
        }
    }

    /// Local vertex indices of the given local face, in the orientation of the face.
    pub fn face_vertices(&self, local_face: usize) -> &'static [usize] {
        static SEGMENT_FACES: [[usize; 1]; 2] = [[0], [1]];
        static QUAD_FACES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];
        match self {
            Self::Segment => &SEGMENT_FACES[local_face],
            Self::Quadrilateral => &QUAD_FACES[local_face],
        }
    }

    pub fn reference_vertices(&self) -> Vec<DVector<f64>> {
        match self {
            Self::Segment => vec![DVector::from_element(1, -1.0), DVector::from_element(1, 1.0)],
            Self::Quadrilateral => [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]]
                .iter()
                .map(|v| DVector::from_column_slice(v))
                .collect(),
        }
    }

    /// The outward unit normal of a local face on the reference element.
    pub fn reference_face_normal(&self, local_face: usize) -> DVector<f64> {
        match self {
            Self::Segment => DVector::from_element(1, if local_face == 0 { -1.0 } else { 1.0 }),
            Self::Quadrilateral => {
                const NORMALS: [[f64; 2]; 4] = [[0.0, -1.0], [1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]];
                DVector::from_column_slice(&NORMALS[local_face])
            }
        }
    }

    /// Maps the face parameter `t` in $[-1, 1]$ of a local face to reference coordinates of
    /// the cell.
    ///
    /// The parameter runs from the first to the last vertex of the face. It is ignored for
    /// point faces.
    pub fn face_to_reference(&self, local_face: usize, t: f64) -> DVector<f64> {
        let vertices = self.reference_vertices();
        let face = self.face_vertices(local_face);
        match self {
            Self::Segment => vertices[face[0]].clone(),
            Self::Quadrilateral => {
                let a = &vertices[face[0]];
                let b = &vertices[face[1]];
                a * (0.5 * (1.0 - t)) + b * (0.5 * (1.0 + t))
            }
        }
    }
}

/// Evaluates the 1D Lagrange polynomials on the given nodes, together with their derivatives.
fn lagrange_basis_1d(nodes: &[f64], x: f64, values: &mut [f64], derivatives: &mut [f64]) {
    let n = nodes.len();
    for i in 0..n {
        let mut value = 1.0;
        let mut derivative = 0.0;
        for k in (0..n).filter(|&k| k != i) {
            let denom = nodes[i] - nodes[k];
            // Product rule, with the new factor (x - x_k) / denom
            derivative = derivative * (x - nodes[k]) / denom + value / denom;
            value *= (x - nodes[k]) / denom;
        }
        values[i] = value;
        derivatives[i] = derivative;
    }
}

/// A tensor-product Lagrange element of arbitrary order on a reference segment or square.
///
/// Nodes are equispaced and numbered lexicographically with the first coordinate varying
/// fastest. The element of order zero has a single node at the center of the reference cell.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangeElement {
    kind: CellKind,
    order: usize,
    nodes_1d: Vec<f64>,
}

impl LagrangeElement {
    pub fn new(kind: CellKind, order: usize) -> Self {
        let nodes_1d = if order == 0 {
            vec![0.0]
        } else {
            (0..=order)
                .map(|i| -1.0 + 2.0 * i as f64 / order as f64)
                .collect()
        };
        Self { kind, order, nodes_1d }
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn dim(&self) -> usize {
        self.kind.dim()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes_1d.len().pow(self.dim() as u32)
    }

    /// The number of nodes per coordinate direction.
    pub fn nodes_per_dim(&self) -> usize {
        self.nodes_1d.len()
    }

    /// Returns the lexicographic index of the node with multi-index `(i, j)`.
    ///
    /// For segments, `j` must be zero.
    pub fn node_index(&self, i: usize, j: usize) -> usize {
        i + self.nodes_1d.len() * j
    }

    /// Reference coordinates of all nodes, in lexicographic order.
    pub fn nodes(&self) -> Vec<DVector<f64>> {
        match self.kind {
            CellKind::Segment => self
                .nodes_1d
                .iter()
                .map(|&x| DVector::from_element(1, x))
                .collect(),
            CellKind::Quadrilateral => {
                let mut nodes = Vec::with_capacity(self.num_nodes());
                for &y in &self.nodes_1d {
                    for &x in &self.nodes_1d {
                        nodes.push(DVector::from_column_slice(&[x, y]));
                    }
                }
                nodes
            }
        }
    }

    /// Evaluates all basis functions at the given reference coordinates.
    pub fn basis(&self, xi: &DVector<f64>) -> DVector<f64> {
        let (values, _) = self.basis_and_reference_gradients(xi);
        values
    }

    /// Evaluates the reference gradients of all basis functions, stored column-wise in a
    /// `dim x num_nodes` matrix.
    pub fn reference_gradients(&self, xi: &DVector<f64>) -> DMatrix<f64> {
        let (_, gradients) = self.basis_and_reference_gradients(xi);
        gradients
    }

    pub fn basis_and_reference_gradients(&self, xi: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
        let n = self.nodes_1d.len();
        let mut lx = vec![0.0; n];
        let mut dlx = vec![0.0; n];
        lagrange_basis_1d(&self.nodes_1d, xi[0], &mut lx, &mut dlx);

        match self.kind {
            CellKind::Segment => (DVector::from_vec(lx), DMatrix::from_row_slice(1, n, &dlx)),
            CellKind::Quadrilateral => {
                let mut ly = vec![0.0; n];
                let mut dly = vec![0.0; n];
                lagrange_basis_1d(&self.nodes_1d, xi[1], &mut ly, &mut dly);

                let mut values = DVector::zeros(n * n);
                let mut gradients = DMatrix::zeros(2, n * n);
                for j in 0..n {
                    for i in 0..n {
                        let idx = self.node_index(i, j);
                        values[idx] = lx[i] * ly[j];
                        gradients[(0, idx)] = dlx[i] * ly[j];
                        gradients[(1, idx)] = lx[i] * dly[j];
                    }
                }
                (values, gradients)
            }
        }
    }

    /// Evaluates a field with `num_components` components given by its nodal values.
    ///
    /// The values are stored component-major, i.e. all nodal values of the first component,
    /// followed by those of the second component and so on.
    pub fn evaluate(&self, nodal_values: &[f64], num_components: usize, xi: &DVector<f64>) -> DVector<f64> {
        let n = self.num_nodes();
        assert_eq!(nodal_values.len(), n * num_components);
        let phi = self.basis(xi);
        DVector::from_fn(num_components, |c, _| {
            let component = &nodal_values[c * n..(c + 1) * n];
            component.iter().zip(phi.iter()).map(|(u, p)| u * p).sum()
        })
    }

    /// Evaluates the reference gradient of a field given by its nodal values, stored as a
    /// `dim x num_components` matrix.
    pub fn evaluate_reference_gradient(
        &self,
        nodal_values: &[f64],
        num_components: usize,
        xi: &DVector<f64>,
    ) -> DMatrix<f64> {
        let n = self.num_nodes();
        assert_eq!(nodal_values.len(), n * num_components);
        let gradients = self.reference_gradients(xi);
        let values = DMatrix::from_column_slice(n, num_components, nodal_values);
        gradients * values
    }
}

/// The adjugate of a small square matrix.
fn adjugate(m: &DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows();
    if n == 1 {
        return DMatrix::from_element(1, 1, 1.0);
    }
    DMatrix::from_fn(n, n, |i, j| {
        let minor = m.clone().remove_row(j).remove_column(i);
        let sign = if (i + j) % 2 == 0 { 1.0 } else { -1.0 };
        sign * minor.determinant()
    })
}

/// The (multi-)linear map from a reference cell to a physical cell.
///
/// Cells may be embedded in a space of higher dimension than the reference cell, in which
/// case the Jacobian is rectangular.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementTransformation {
    kind: CellKind,
    vertices: Vec<DVector<f64>>,
}

impl ElementTransformation {
    /// # Panics
    ///
    /// Panics if the number of vertices does not match the cell kind, or if the vertices have
    /// inconsistent dimensions.
    pub fn new(kind: CellKind, vertices: Vec<DVector<f64>>) -> Self {
        assert_eq!(vertices.len(), kind.num_vertices(), "Wrong number of vertices for cell");
        assert!(
            vertices.iter().all(|v| v.len() == vertices[0].len() && v.len() >= kind.dim()),
            "Vertex dimensions must agree and not be smaller than the cell dimension"
        );
        Self { kind, vertices }
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn vertices(&self) -> &[DVector<f64>] {
        &self.vertices
    }

    pub fn space_dim(&self) -> usize {
        self.vertices[0].len()
    }

    /// Geometric shape functions and their reference gradients, in vertex order.
    fn geometric_basis(&self, xi: &DVector<f64>) -> (Vec<f64>, DMatrix<f64>) {
        match self.kind {
            CellKind::Segment => {
                let x = xi[0];
                (
                    vec![0.5 * (1.0 - x), 0.5 * (1.0 + x)],
                    DMatrix::from_row_slice(1, 2, &[-0.5, 0.5]),
                )
            }
            CellKind::Quadrilateral => {
                let (x, y) = (xi[0], xi[1]);
                let values = vec![
                    0.25 * (1.0 - x) * (1.0 - y),
                    0.25 * (1.0 + x) * (1.0 - y),
                    0.25 * (1.0 + x) * (1.0 + y),
                    0.25 * (1.0 - x) * (1.0 + y),
                ];
                #[rustfmt::skip]
                let gradients = DMatrix::from_row_slice(2, 4, &[
                    -0.25 * (1.0 - y), 0.25 * (1.0 - y), 0.25 * (1.0 + y), -0.25 * (1.0 + y),
                    -0.25 * (1.0 - x), -0.25 * (1.0 + x), 0.25 * (1.0 + x), 0.25 * (1.0 - x),
                ]);
                (values, gradients)
            }
        }
    }

    pub fn map_reference_coords(&self, xi: &DVector<f64>) -> DVector<f64> {
        let (values, _) = self.geometric_basis(xi);
        let mut x = DVector::zeros(self.space_dim());
        for (phi, v) in values.iter().zip(&self.vertices) {
            x.axpy(*phi, v, 1.0);
        }
        x
    }

    /// The `space_dim x dim` Jacobian of the reference-to-physical map.
    pub fn jacobian(&self, xi: &DVector<f64>) -> DMatrix<f64> {
        let (_, gradients) = self.geometric_basis(xi);
        let mut jacobian = DMatrix::zeros(self.space_dim(), self.kind.dim());
        for (k, v) in self.vertices.iter().enumerate() {
            for d in 0..self.kind.dim() {
                jacobian.column_mut(d).axpy(gradients[(d, k)], v, 1.0);
            }
        }
        jacobian
    }

    /// The integration weight $\sqrt{\det(J^T J)}$, which is $|\det J|$ for square Jacobians.
    pub fn weight(&self, xi: &DVector<f64>) -> f64 {
        let j = self.jacobian(xi);
        if j.is_square() {
            j.determinant().abs()
        } else {
            (j.transpose() * &j).determinant().max(0.0).sqrt()
        }
    }

    /// The `dim x space_dim` adjugate of the Jacobian.
    ///
    /// For rectangular Jacobians this is $\mathrm{adj}(J^T J) J^T$, which reduces to the usual
    /// adjugate for square matrices up to the factor $\det J$.
    pub fn adjugate_jacobian(&self, xi: &DVector<f64>) -> DMatrix<f64> {
        let j = self.jacobian(xi);
        if j.is_square() {
            adjugate(&j)
        } else {
            adjugate(&(j.transpose() * &j)) * j.transpose()
        }
    }

    /// The `space_dim x dim` matrix $J (J^T J)^{-1}$ mapping reference gradients to physical
    /// gradients. Returns `None` if the element is degenerate at `xi`.
    pub fn inverse_jacobian_transpose(&self, xi: &DVector<f64>) -> Option<DMatrix<f64>> {
        let j = self.jacobian(xi);
        let metric_inverse = (j.transpose() * &j).try_inverse()?;
        Some(j * metric_inverse)
    }

    /// Maps reference gradients (`dim x k`) to physical gradients (`space_dim x k`).
    pub fn physical_gradients(&self, xi: &DVector<f64>, reference_gradients: &DMatrix<f64>) -> Option<DMatrix<f64>> {
        Some(self.inverse_jacobian_transpose(xi)? * reference_gradients)
    }

    /// The outward unit normal (or conormal, for embedded cells) of a local face at the given
    /// reference coordinates.
    pub fn outward_face_normal(&self, local_face: usize, xi: &DVector<f64>) -> DVector<f64> {
        let reference_normal = self.kind.reference_face_normal(local_face);
        let normal = self.adjugate_jacobian(xi).transpose() * reference_normal;
        let norm = normal.norm();
        if norm > 0.0 {
            normal / norm
        } else {
            normal
        }
    }

    /// The largest distance between any two vertices.
    pub fn diameter(&self) -> f64 {
        let mut diameter: f64 = 0.0;
        for (i, a) in self.vertices.iter().enumerate() {
            for b in &self.vertices[i + 1..] {
                diameter = diameter.max((a - b).norm());
            }
        }
        diameter
    }

    pub fn volume(&self) -> f64 {
        let rule = quadrature::rule_for_order(self.kind.geometry(), 2);
        rule.integrate(|xi| self.weight(xi))
    }
}
