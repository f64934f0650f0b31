//! Sparse matrix functionality and iterative solvers for `fenris`.
//!
//! The solvers in this crate are matrix-free: they only require the system matrix and the
//! preconditioner to be expressible as a [`LinearOperator`](cg::LinearOperator). This makes it
//! possible to use them both for plain sparse matrices and for operators whose application
//! involves communication, such as operators distributed over several partitions of a mesh.

pub mod cg;

pub use nalgebra_sparse::{CooMatrix, CsrMatrix};
