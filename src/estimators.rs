//! A-posteriori error estimators.
//!
//! Every estimator computes one non-negative indicator per local element of the mesh that
//! the observed solution lives on, and a scalar total error. Results are cached against the
//! sequence number of the mesh: they are computed on first access and recomputed only after
//! the mesh has changed or the estimator has been [reset](ErrorEstimator::reset).
use crate::comm::CommError;
use crate::mesh::Mesh;
use crate::space::{Continuity, FiniteElementSpace};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

mod face_jump;
mod kelly;
mod lp;
#[cfg(feature = "distributed")]
mod smoothed;
mod zienkiewicz_zhu;

pub use face_jump::{integrating_element, FaceJumpIntegrator, FaceSideData};
pub use kelly::{default_face_coefficient, ElementCoefficientInput, FaceCoefficientInput, KellyErrorEstimator};
pub use lp::LpErrorEstimator;
#[cfg(feature = "distributed")]
pub use smoothed::{SmoothedFluxEstimator, SmoothingSolve, SmoothingSolverSettings};
pub use zienkiewicz_zhu::{anisotropy_flag, FluxAveraging, FluxRecoveryEstimator};

#[derive(Debug)]
#[non_exhaustive]
pub enum EstimatorError {
    /// No solution is attached to the estimator.
    MissingSolution,
    /// No reference function is attached to the estimator.
    MissingCoefficient,
    /// The requested functionality is not available for the given input.
    NotImplemented { what: &'static str },
    /// An auxiliary finite element space could not be constructed.
    IncompatibleSpace { reason: String },
    /// An element has a singular Jacobian.
    DegenerateElement { element: usize },
    Communication(CommError),
    Solver(String),
}

impl fmt::Display for EstimatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSolution => write!(f, "no solution attached to the estimator"),
            Self::MissingCoefficient => write!(f, "no reference coefficient attached to the estimator"),
            Self::NotImplemented { what } => write!(f, "not implemented: {}", what),
            Self::IncompatibleSpace { reason } => write!(f, "incompatible finite element space: {}", reason),
            Self::DegenerateElement { element } => write!(f, "element {} is degenerate", element),
            Self::Communication(err) => write!(f, "communication failed: {}", err),
            Self::Solver(msg) => write!(f, "linear solve failed: {}", msg),
        }
    }
}

impl Error for EstimatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Communication(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CommError> for EstimatorError {
    fn from(err: CommError) -> Self {
        Self::Communication(err)
    }
}

/// The result of one estimation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimates {
    /// The mesh sequence the estimates were computed for.
    pub sequence: u64,
    pub local_errors: Vec<f64>,
    pub total_error: f64,
}

/// Cached estimates, tagged with the mesh sequence they belong to.
#[derive(Debug, Clone, Default)]
pub struct EstimateCache {
    sequence: Option<u64>,
    local_errors: Vec<f64>,
    total_error: f64,
    num_computations: usize,
}

impl EstimateCache {
    pub fn is_valid_for(&self, sequence: u64) -> bool {
        self.sequence == Some(sequence)
    }

    /// The sequence of the cached estimates, if any are valid.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn local_errors(&self) -> &[f64] {
        &self.local_errors
    }

    pub fn total_error(&self) -> f64 {
        self.total_error
    }

    pub fn store(&mut self, estimates: Estimates) {
        self.sequence = Some(estimates.sequence);
        self.local_errors = estimates.local_errors;
        self.total_error = estimates.total_error;
        self.num_computations += 1;
    }

    pub fn invalidate(&mut self) {
        self.sequence = None;
    }

    /// The number of estimation passes that completed successfully.
    pub fn num_computations(&self) -> usize {
        self.num_computations
    }
}

/// The common interface of all error estimators.
///
/// Implementors provide a single estimation pass through
/// [`compute_estimates`](Self::compute_estimates) together with access to their cache.
/// The cached accessors [`local_errors`](Self::local_errors) and
/// [`total_error`](Self::total_error) recompute only when the mesh sequence has changed.
pub trait ErrorEstimator {
    /// The mesh whose sequence determines whether cached estimates are current.
    ///
    /// Returns [`EstimatorError::MissingSolution`] if nothing is attached.
    fn mesh(&self) -> Result<Arc<Mesh>, EstimatorError>;

    /// Runs a full estimation pass, ignoring the cache.
    fn compute_estimates(&mut self) -> Result<Estimates, EstimatorError>;

    fn cache(&self) -> &EstimateCache;

    fn cache_mut(&mut self) -> &mut EstimateCache;

    /// Recomputes the estimates if the cache is stale.
    fn update(&mut self) -> Result<(), EstimatorError> {
        let sequence = self.mesh()?.sequence();
        if !self.cache().is_valid_for(sequence) {
            let estimates = self.compute_estimates()?;
            log::debug!(
                "Computed {} local error estimates for mesh sequence {}, total error {:e}",
                estimates.local_errors.len(),
                estimates.sequence,
                estimates.total_error
            );
            self.cache_mut().store(estimates);
        }
        Ok(())
    }

    /// One non-negative error indicator per local element.
    fn local_errors(&mut self) -> Result<&[f64], EstimatorError> {
        self.update()?;
        Ok(self.cache().local_errors())
    }

    /// The global error, consistent across all ranks for distributed meshes.
    fn total_error(&mut self) -> Result<f64, EstimatorError> {
        self.update()?;
        Ok(self.cache().total_error())
    }

    /// Forces recomputation on the next access.
    fn reset(&mut self) {
        self.cache_mut().invalidate();
    }
}

/// An auxiliary finite element space that follows the mesh of the observed solution.
#[derive(Debug, Clone)]
pub(crate) struct AuxiliarySpace {
    continuity: Continuity,
    order: Option<usize>,
    space: Option<Arc<FiniteElementSpace>>,
}

impl AuxiliarySpace {
    /// A space of the given continuity, with the order of the solution unless overridden.
    pub fn new(continuity: Continuity, order: Option<usize>) -> Self {
        Self {
            continuity,
            order,
            space: None,
        }
    }

    pub fn set_order(&mut self, order: Option<usize>) {
        self.order = order;
        self.space = None;
    }

    pub fn current(&self) -> Option<&Arc<FiniteElementSpace>> {
        self.space.as_ref()
    }

    /// Returns the space for the current state of the mesh, rebuilding it if necessary.
    pub fn update(
        &mut self,
        mesh: &Arc<Mesh>,
        solution_order: usize,
        vdim: usize,
    ) -> Result<Arc<FiniteElementSpace>, EstimatorError> {
        let order = self.order.unwrap_or(solution_order);
        if let Some(space) = &self.space {
            if space.is_compatible(mesh, self.continuity, order, vdim) {
                return Ok(Arc::clone(space));
            }
        }
        let space = FiniteElementSpace::new(Arc::clone(mesh), self.continuity, order, vdim)
            .map_err(|err| EstimatorError::IncompatibleSpace { reason: err.to_string() })?;
        let space = Arc::new(space);
        self.space = Some(Arc::clone(&space));
        Ok(space)
    }
}
