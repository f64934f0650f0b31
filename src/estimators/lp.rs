use super::{Estimates, EstimateCache, ErrorEstimator, EstimatorError};
use crate::coefficient::ReferenceFunction;
use crate::error::{estimate_element_lp_errors, LpNorm};
use crate::mesh::Mesh;
use crate::space::SharedGridFunction;
use std::sync::Arc;

/// Measures the $L^p$ distance between a solution and a known reference function.
///
/// The indicator of an element is $\| u_h - u \|_{L^p(K)}$ and the total error is
/// $(\sum_K e_K^p)^{1/p}$, or the largest indicator for $p = \infty$, over the local mesh.
#[derive(Debug)]
pub struct LpErrorEstimator {
    solution: Option<SharedGridFunction>,
    reference: Option<ReferenceFunction>,
    norm: LpNorm,
    cache: EstimateCache,
}

impl Default for LpErrorEstimator {
    fn default() -> Self {
        Self::new(LpNorm::default())
    }
}

impl LpErrorEstimator {
    pub fn new(norm: LpNorm) -> Self {
        Self {
            solution: None,
            reference: None,
            norm,
            cache: EstimateCache::default(),
        }
    }

    pub fn with_solution(mut self, solution: SharedGridFunction) -> Self {
        self.attach_solution(solution);
        self
    }

    pub fn with_reference(mut self, reference: ReferenceFunction) -> Self {
        self.set_reference(reference);
        self
    }

    pub fn attach_solution(&mut self, solution: SharedGridFunction) {
        self.solution = Some(solution);
        self.reset();
    }

    pub fn set_reference(&mut self, reference: ReferenceFunction) {
        self.reference = Some(reference);
        self.reset();
    }

    pub fn norm(&self) -> &LpNorm {
        &self.norm
    }

    pub fn set_norm(&mut self, norm: LpNorm) {
        self.norm = norm;
        self.reset();
    }
}

impl ErrorEstimator for LpErrorEstimator {
    fn mesh(&self) -> Result<Arc<Mesh>, EstimatorError> {
        let solution = self.solution.as_ref().ok_or(EstimatorError::MissingSolution)?;
        let mesh = Arc::clone(solution.read().space().mesh());
        Ok(mesh)
    }

    fn compute_estimates(&mut self) -> Result<Estimates, EstimatorError> {
        let solution = self.solution.as_ref().ok_or(EstimatorError::MissingSolution)?;
        let reference = self.reference.as_ref().ok_or(EstimatorError::MissingCoefficient)?;
        let solution = solution.read();
        let local_errors = estimate_element_lp_errors(&solution, reference, &self.norm)
            .map_err(|err| EstimatorError::IncompatibleSpace { reason: err.to_string() })?;
        let total_error = self.norm.combine(local_errors.iter().copied());
        Ok(Estimates {
            sequence: solution.space().mesh().sequence(),
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
