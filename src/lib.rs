//! A-posteriori error estimation for adaptive finite element computations.
//!
//! The crate computes per-element error indicators for a finite element solution, without
//! knowledge of the exact solution, and aggregates them into a global error measure that an
//! adaptive refinement driver can consume. Four estimators are available behind the common
//! [`ErrorEstimator`](estimators::ErrorEstimator) interface:
//!
//! - [`FluxRecoveryEstimator`](estimators::FluxRecoveryEstimator): Zienkiewicz-Zhu style
//!   recovery of a continuous flux by local averaging.
//! - [`SmoothedFluxEstimator`](estimators::SmoothedFluxEstimator): recovery of a continuous flux
//!   by a global (distributed) $L^2$ projection. Requires the `distributed` feature.
//! - [`KellyErrorEstimator`](estimators::KellyErrorEstimator): integration of the normal flux
//!   jumps across interior, non-conforming and partition-boundary faces.
//! - [`LpErrorEstimator`](estimators::LpErrorEstimator): the $L^p$ distance to a given reference
//!   function.
//!
//! Estimates are cached against the topology version (sequence) of the mesh, so that they are
//! recomputed at most once per mesh state.

pub mod assembly;
pub mod coefficient;
pub mod comm;
pub mod element;
pub mod error;
pub mod estimators;
pub mod flux;
pub mod mesh;
pub mod quadrature;
pub mod space;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
