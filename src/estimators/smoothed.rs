use super::{AuxiliarySpace, Estimates, EstimateCache, ErrorEstimator, EstimatorError};
use crate::assembly::{assemble_element_source_vector, assemble_mass_matrix, csr_diagonal};
use crate::comm::Communicator;
use crate::error::{element_lp_norm, LpNorm};
use crate::flux::{ElementContext, FluxIntegrator};
use crate::mesh::Mesh;
use crate::quadrature;
use crate::space::{Continuity, DofSharing, SharedGridFunction};
use fenris_sparse::cg::{
    ConjugateGradient, DiagonalOperator, InnerProduct, LinearOperator, RelativeResidualCriterion, SolveErrorKind,
};
use log::warn;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

/// Settings of the iterative solver for the global flux projection.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingSolverSettings {
    pub relative_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SmoothingSolverSettings {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-12,
            max_iterations: 200,
        }
    }
}

/// Outcome of the flux projection of the last estimation pass.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingSolve {
    /// Whether the projection of every flux component converged.
    pub converged: bool,
    /// The largest number of iterations over all flux components.
    pub iterations: usize,
}

/// A local matrix whose products are summed over all ranks sharing a dof.
struct DistributedOperator<'a> {
    matrix: &'a CsrMatrix<f64>,
    sharing: &'a DofSharing,
    comm: &'a dyn Communicator,
}

impl<'a> LinearOperator<f64> for DistributedOperator<'a> {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        let mut product = DVector::zeros(y.len());
        self.matrix.apply((&mut product).into(), x)?;
        self.sharing.sum_shared(self.comm, product.as_mut_slice())?;
        y.copy_from(&product);
        Ok(())
    }
}

/// The Euclidean inner product over all ranks, counting each shared dof once.
struct OwnedInnerProduct<'a> {
    sharing: &'a DofSharing,
    comm: &'a dyn Communicator,
}

impl<'a> InnerProduct<f64> for OwnedInnerProduct<'a> {
    fn dot(&self, x: DVectorView<f64>, y: DVectorView<f64>) -> f64 {
        self.sharing.owned_dot(self.comm, x.as_slice(), y.as_slice())
    }
}

/// The smoothed flux error estimator.
///
/// Instead of averaging, the discontinuous element fluxes are projected onto a continuous
/// space in the $L^2$ sense, by solving a global mass matrix system with the conjugate
/// gradient method across all ranks. The indicator of an element is the $L^p$ distance
/// between the projected and the element flux, and the total error is
/// $(\sum_K e_K^p)^{1/p}$ over all ranks.
///
/// If the projection does not converge, the estimator logs a warning and proceeds with the
/// best available approximation.
pub struct SmoothedFluxEstimator {
    solution: Option<SharedGridFunction>,
    integrator: Arc<dyn FluxIntegrator>,
    flux_space: AuxiliarySpace,
    smooth_space: AuxiliarySpace,
    norm: LpNorm,
    solver: SmoothingSolverSettings,
    last_solve: Option<SmoothingSolve>,
    cache: EstimateCache,
}

impl std::fmt::Debug for SmoothedFluxEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmoothedFluxEstimator")
            .field("has_solution", &self.solution.is_some())
            .field("norm", &self.norm)
            .field("solver", &self.solver)
            .field("last_solve", &self.last_solve)
            .field("cache", &self.cache)
            .finish()
    }
}

impl SmoothedFluxEstimator {
    pub fn new(integrator: impl FluxIntegrator + 'static) -> Self {
        Self {
            solution: None,
            integrator: Arc::new(integrator),
            flux_space: AuxiliarySpace::new(Continuity::L2, None),
            smooth_space: AuxiliarySpace::new(Continuity::H1, None),
            norm: LpNorm::l2(),
            solver: SmoothingSolverSettings::default(),
            last_solve: None,
            cache: EstimateCache::default(),
        }
    }

    pub fn with_solution(mut self, solution: SharedGridFunction) -> Self {
        self.attach_solution(solution);
        self
    }

    pub fn with_norm(mut self, norm: LpNorm) -> Self {
        self.norm = norm;
        self.reset();
        self
    }

    pub fn with_solver_settings(mut self, settings: SmoothingSolverSettings) -> Self {
        self.solver = settings;
        self.reset();
        self
    }

    /// Uses flux spaces of the given order instead of the order of the solution.
    pub fn with_flux_order(mut self, order: usize) -> Self {
        self.flux_space.set_order(Some(order));
        self.smooth_space.set_order(Some(order.max(1)));
        self.reset();
        self
    }

    pub fn attach_solution(&mut self, solution: SharedGridFunction) {
        self.solution = Some(solution);
        self.reset();
    }

    pub fn last_solve(&self) -> Option<&SmoothingSolve> {
        self.last_solve.as_ref()
    }
}

impl ErrorEstimator for SmoothedFluxEstimator {
    fn mesh(&self) -> Result<Arc<Mesh>, EstimatorError> {
        let solution = self.solution.as_ref().ok_or(EstimatorError::MissingSolution)?;
        let mesh = Arc::clone(solution.read().space().mesh());
        Ok(mesh)
    }

    fn compute_estimates(&mut self) -> Result<Estimates, EstimatorError> {
        let handle = self.solution.clone().ok_or(EstimatorError::MissingSolution)?;
        let solution = handle.read();
        let space = Arc::clone(solution.space());
        let mesh = Arc::clone(space.mesh());
        let comm = mesh.comm().as_ref();
        let flux_dim = self.integrator.flux_dim(mesh.space_dim(), space.vdim());
        let order = space.order().max(1);
        let flux_space = self.flux_space.update(&mesh, order, flux_dim)?;
        let smooth_space = self.smooth_space.update(&mesh, order, 1)?;
        let flux_element = flux_space.element();
        let integrator = &self.integrator;

        let element_fluxes: Vec<DVector<f64>> = (0..mesh.num_elements())
            .into_par_iter()
            .map(|e| {
                let transformation = mesh.element_transformation(e);
                let context = ElementContext {
                    index: e,
                    attribute: mesh.element_attribute(e),
                    transformation: &transformation,
                };
                let local = solution.element_values(e);
                integrator.compute_element_flux(&context, space.element(), &local, space.vdim(), flux_element, true)
            })
            .collect::<Result<_, _>>()?;

        let to_space_error = |err: eyre::Report| EstimatorError::IncompatibleSpace { reason: err.to_string() };
        let mass = assemble_mass_matrix(&smooth_space).map_err(to_space_error)?;
        let sharing = smooth_space.sharing();
        let mut diagonal = csr_diagonal(&mass);
        sharing.sum_shared(comm, diagonal.as_mut_slice())?;
        let preconditioner = DiagonalOperator::jacobi(&diagonal);
        let operator = DistributedOperator {
            matrix: &mass,
            sharing,
            comm,
        };

        // Project each flux component separately onto the continuous scalar space
        let n = flux_element.num_nodes();
        let mut smoothed = Vec::with_capacity(flux_dim);
        let mut solve = SmoothingSolve {
            converged: true,
            iterations: 0,
        };
        for c in 0..flux_dim {
            let mut rhs = assemble_element_source_vector(&smooth_space, |e, xi| {
                flux_element.evaluate(&element_fluxes[e].as_slice()[c * n..(c + 1) * n], 1, xi)[0]
            })
            .map_err(to_space_error)?;
            sharing.sum_shared(comm, rhs.as_mut_slice())?;

            let mut x = DVector::zeros(smooth_space.num_dofs());
            let result = ConjugateGradient::new()
                .with_operator(&operator)
                .with_preconditioner(&preconditioner)
                .with_inner_product(OwnedInnerProduct { sharing, comm })
                .with_stopping_criterion(RelativeResidualCriterion::new(self.solver.relative_tolerance))
                .with_max_iter(self.solver.max_iterations)
                .solve_with_guess(&rhs, &mut x);
            match result {
                Ok(output) => solve.iterations = solve.iterations.max(output.num_iterations),
                Err(err) => match err.kind {
                    SolveErrorKind::MaxIterationsReached { .. } => {
                        warn!(
                            "Flux projection for component {} did not converge after {} iterations \
                             (residual {:e}), proceeding with the last iterate",
                            c, err.output.num_iterations, err.output.residual_norm
                        );
                        solve.converged = false;
                        solve.iterations = solve.iterations.max(err.output.num_iterations);
                    }
                    _ => return Err(EstimatorError::Solver(err.to_string())),
                },
            }
            smoothed.push(x);
        }

        let rule = quadrature::rule_for_order(mesh.cell_kind().geometry(), 2 * order + 1);
        let smooth_element = smooth_space.element();
        let norm = self.norm;
        let local_errors: Vec<f64> = (0..mesh.num_elements())
            .into_par_iter()
            .map(|e| {
                let transformation = mesh.element_transformation(e);
                let dofs = smooth_space.element_dofs(e);
                let smooth_local: Vec<f64> = smoothed
                    .iter()
                    .flat_map(|component| dofs.iter().map(move |&dof| component[dof]))
                    .collect();
                element_lp_norm(
                    &norm,
                    &rule,
                    |xi| transformation.weight(xi),
                    |xi| {
                        smooth_element.evaluate(&smooth_local, flux_dim, xi)
                            - flux_element.evaluate(element_fluxes[e].as_slice(), flux_dim, xi)
                    },
                )
            })
            .collect();

        let total_error = if norm.is_infinity() {
            comm.all_reduce_max(norm.accumulate(local_errors.iter().copied()))
        } else {
            norm.finish(comm.all_reduce_sum(norm.accumulate(local_errors.iter().copied())))
        };

        self.last_solve = Some(solve);
        Ok(Estimates {
            sequence: mesh.sequence(),
            local_errors,
            total_error,
        })
    }

    fn cache(&self) -> &EstimateCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut EstimateCache {
        &mut self.cache
    }
}
