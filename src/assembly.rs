//! Assembly of global matrices and vectors for scalar finite element spaces.
use crate::quadrature;
use crate::space::FiniteElementSpace;
use eyre::eyre;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

fn check_scalar(space: &FiniteElementSpace) -> eyre::Result<()> {
    if space.vdim() == 1 {
        Ok(())
    } else {
        Err(eyre!("assembly requires a scalar space, got {} components", space.vdim()))
    }
}

/// Computes the element mass matrix $M_{ij} = \int_K \phi_i \phi_j \, dx$.
pub fn element_mass_matrix(space: &FiniteElementSpace, element: usize) -> DMatrix<f64> {
    let fe = space.element();
    let n = fe.num_nodes();
    let transformation = space.mesh().element_transformation(element);
    let rule = quadrature::rule_for_order(fe.kind().geometry(), 2 * fe.order());
    let mut matrix = DMatrix::zeros(n, n);
    for (w, xi) in rule.iter() {
        let phi = fe.basis(xi);
        matrix.ger(w * transformation.weight(xi), &phi, &phi, 1.0);
    }
    matrix
}

/// Assembles the (local, unsummed across ranks) mass matrix of a scalar space.
pub fn assemble_mass_matrix(space: &FiniteElementSpace) -> eyre::Result<CsrMatrix<f64>> {
    check_scalar(space)?;
    let num_elements = space.mesh().num_elements();
    let element_matrices: Vec<DMatrix<f64>> = (0..num_elements)
        .into_par_iter()
        .map(|e| element_mass_matrix(space, e))
        .collect();

    let mut coo = CooMatrix::new(space.num_dofs(), space.num_dofs());
    for (e, matrix) in element_matrices.iter().enumerate() {
        let dofs = space.element_dofs(e);
        for (i, &row) in dofs.iter().enumerate() {
            for (j, &col) in dofs.iter().enumerate() {
                coo.push(row, col, matrix[(i, j)]);
            }
        }
    }
    Ok(CsrMatrix::from(&coo))
}

/// Assembles the load vector $b_i = \int \phi_i f \, dx$ of a scalar space, where `f` is given
/// per element as a function of reference coordinates.
pub fn assemble_element_source_vector(
    space: &FiniteElementSpace,
    f: impl Fn(usize, &DVector<f64>) -> f64 + Sync,
) -> eyre::Result<DVector<f64>> {
    check_scalar(space)?;
    let fe = space.element();
    let rule = quadrature::rule_for_order(fe.kind().geometry(), 2 * fe.order() + 1);
    let mesh = space.mesh();
    let element_vectors: Vec<DVector<f64>> = (0..mesh.num_elements())
        .into_par_iter()
        .map(|e| {
            let transformation = mesh.element_transformation(e);
            let mut local = DVector::zeros(fe.num_nodes());
            for (w, xi) in rule.iter() {
                local.axpy(w * transformation.weight(xi) * f(e, xi), &fe.basis(xi), 1.0);
            }
            local
        })
        .collect();

    let mut b = DVector::zeros(space.num_dofs());
    for (e, local) in element_vectors.iter().enumerate() {
        for (&dof, value) in space.element_dofs(e).iter().zip(local.iter()) {
            b[dof] += value;
        }
    }
    Ok(b)
}

/// Extracts the diagonal of a square sparse matrix.
pub fn csr_diagonal(matrix: &CsrMatrix<f64>) -> DVector<f64> {
    let mut diagonal = DVector::zeros(matrix.nrows());
    for (i, _, &value) in matrix.diagonal_as_csr().triplet_iter() {
        diagonal[i] += value;
    }
    diagonal
}
