use super::{AuxiliarySpace, Estimates, EstimateCache, ErrorEstimator, EstimatorError};
use crate::flux::{ElementContext, FluxIntegrator};
use crate::mesh::Mesh;
use crate::space::{Continuity, SharedGridFunction};
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How element fluxes are averaged into the recovered continuous flux.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FluxAveraging {
    /// Average over all elements sharing a node.
    #[default]
    Global,
    /// Average separately within each element attribute, so that the recovered flux may
    /// jump across attribute interfaces.
    PerAttribute,
}

/// Encodes which reference directions carry a significant share of the error energy.
///
/// Bit `k` is set if the energy along reference direction `k` exceeds a fraction
/// $0.15 \cdot 3 / d$ of the total, where $d$ is the number of directions.
pub fn anisotropy_flag(directional_energies: &[f64]) -> u32 {
    let total: f64 = directional_energies.iter().sum();
    if !(total > 0.0) {
        return 0;
    }
    let threshold = 0.15 * 3.0 / directional_energies.len() as f64;
    directional_energies
        .iter()
        .enumerate()
        .filter(|&(_, &energy)| energy / total > threshold)
        .fold(0, |flag, (k, _)| flag | (1 << k))
}

/// The Zienkiewicz-Zhu error estimator.
///
/// The flux of the solution is computed on each element and averaged at the nodes of a
/// continuous flux space. The indicator of an element is the energy norm of the difference
/// between its own flux and the recovered flux, and the total error is the square root of the
/// summed energies of the local mesh.
pub struct FluxRecoveryEstimator {
    solution: Option<SharedGridFunction>,
    integrator: Arc<dyn FluxIntegrator>,
    flux_space: AuxiliarySpace,
    averaging: FluxAveraging,
    with_coefficient: bool,
    anisotropic: bool,
    anisotropy_flags: Vec<u32>,
    cache: EstimateCache,
}

impl std::fmt::Debug for FluxRecoveryEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluxRecoveryEstimator")
            .field("has_solution", &self.solution.is_some())
            .field("averaging", &self.averaging)
            .field("with_coefficient", &self.with_coefficient)
            .field("anisotropic", &self.anisotropic)
            .field("cache", &self.cache)
            .finish()
    }
}

impl FluxRecoveryEstimator {
    pub fn new(integrator: impl FluxIntegrator + 'static) -> Self {
        Self {
            solution: None,
            integrator: Arc::new(integrator),
            flux_space: AuxiliarySpace::new(Continuity::H1, None),
            averaging: FluxAveraging::default(),
            with_coefficient: true,
            anisotropic: false,
            anisotropy_flags: Vec::new(),
            cache: EstimateCache::default(),
        }
    }

    pub fn with_solution(mut self, solution: SharedGridFunction) -> Self {
        self.attach_solution(solution);
        self
    }

    /// Uses a recovered flux of the given order instead of the order of the solution.
    pub fn with_flux_order(mut self, order: usize) -> Self {
        self.flux_space.set_order(Some(order));
        self.reset();
        self
    }

    pub fn with_averaging(mut self, averaging: FluxAveraging) -> Self {
        self.averaging = averaging;
        self.reset();
        self
    }

    /// Whether the material coefficient of the flux integrator enters the element fluxes.
    pub fn with_coefficient(mut self, with_coefficient: bool) -> Self {
        self.with_coefficient = with_coefficient;
        self.reset();
        self
    }

    pub fn with_anisotropy(mut self, anisotropic: bool) -> Self {
        self.set_anisotropic(anisotropic);
        self
    }

    pub fn attach_solution(&mut self, solution: SharedGridFunction) {
        self.solution = Some(solution);
        self.reset();
    }

    pub fn set_anisotropic(&mut self, anisotropic: bool) {
        self.anisotropic = anisotropic;
        self.reset();
    }

    /// One flag per local element, see [`anisotropy_flag`]. Empty unless anisotropic
    /// estimation is enabled.
    pub fn anisotropy_flags(&mut self) -> Result<&[u32], EstimatorError> {
        self.update()?;
        Ok(&self.anisotropy_flags)
    }

    /// The continuous flux space of the last estimation pass.
    pub fn flux_space(&self) -> Option<&Arc<crate::space::FiniteElementSpace>> {
        self.flux_space.current()
    }
}

impl ErrorEstimator for FluxRecoveryEstimator {
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
        let flux_dim = self.integrator.flux_dim(mesh.space_dim(), space.vdim());
        let flux_space = self.flux_space.update(&mesh, space.order(), flux_dim)?;
        let flux_element = flux_space.element();
        let integrator = &self.integrator;
        let with_coefficient = self.with_coefficient;
        let anisotropic = self.anisotropic;

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
                integrator.compute_element_flux(
                    &context,
                    space.element(),
                    &local,
                    space.vdim(),
                    flux_element,
                    with_coefficient,
                )
            })
            .collect::<Result<_, _>>()?;

        let groups: Vec<Vec<usize>> = match self.averaging {
            FluxAveraging::Global => vec![(0..mesh.num_elements()).collect()],
            FluxAveraging::PerAttribute => mesh
                .attributes()
                .into_iter()
                .map(|attribute| {
                    (0..mesh.num_elements())
                        .filter(|&e| mesh.element_attribute(e) == attribute)
                        .collect()
                })
                .collect(),
        };

        let mut local_errors = vec![0.0; mesh.num_elements()];
        let mut flags = if anisotropic {
            vec![0; mesh.num_elements()]
        } else {
            Vec::new()
        };
        let mut total_energy = 0.0;
        for group in &groups {
            let mut recovered: DVector<f64> = DVector::zeros(flux_space.num_vdofs());
            let mut counts = vec![0usize; flux_space.num_vdofs()];
            for &e in group {
                for (dof, value) in flux_space.element_vdofs(e).into_iter().zip(element_fluxes[e].iter()) {
                    recovered[dof] += value;
                    counts[dof] += 1;
                }
            }
            for (value, &count) in recovered.iter_mut().zip(&counts) {
                if count > 0 {
                    *value /= count as f64;
                }
            }

            let results: Vec<(usize, f64, u32)> = group
                .par_iter()
                .map(|&e| {
                    let difference: Vec<f64> = flux_space
                        .element_vdofs(e)
                        .into_iter()
                        .zip(element_fluxes[e].iter())
                        .map(|(dof, value)| value - recovered[dof])
                        .collect();
                    let transformation = mesh.element_transformation(e);
                    let context = ElementContext {
                        index: e,
                        attribute: mesh.element_attribute(e),
                        transformation: &transformation,
                    };
                    let mut directional = vec![0.0; mesh.dim()];
                    let energy = integrator.compute_flux_energy(
                        &context,
                        flux_element,
                        &difference,
                        flux_dim,
                        anisotropic.then_some(directional.as_mut_slice()),
                    )?;
                    let flag = if anisotropic { anisotropy_flag(&directional) } else { 0 };
                    Ok((e, energy, flag))
                })
                .collect::<Result<_, EstimatorError>>()?;

            for (e, energy, flag) in results {
                local_errors[e] = energy.sqrt();
                total_energy += energy;
                if anisotropic {
                    flags[e] = flag;
                }
            }
        }

        self.anisotropy_flags = flags;
        Ok(Estimates {
            sequence: mesh.sequence(),
            local_errors,
            total_error: total_energy.sqrt(),
        })
    }

    fn cache(&self) -> &EstimateCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut EstimateCache {
        &mut self.cache
    }
}
