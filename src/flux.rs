//! Flux integrators, which compute the flux of a solution on each element.
//!
//! The estimators are agnostic of the underlying PDE. They only require a
//! [`FluxIntegrator`] that turns the element-local dof values of a solution into the nodal
//! values of a flux field, and measures the energy of a flux field.
use crate::coefficient::Coefficient;
use crate::element::{ElementTransformation, LagrangeElement};
use crate::estimators::EstimatorError;
use crate::quadrature;
use nalgebra::DVector;
use std::sync::Arc;

/// Identifies the element a flux computation refers to.
#[derive(Debug, Clone, Copy)]
pub struct ElementContext<'a> {
    pub index: usize,
    pub attribute: usize,
    pub transformation: &'a ElementTransformation,
}

pub trait FluxIntegrator: Send + Sync {
    /// The number of flux components for a solution with `solution_vdim` components in a space
    /// of dimension `space_dim`.
    fn flux_dim(&self, space_dim: usize, solution_vdim: usize) -> usize {
        space_dim * solution_vdim
    }

    /// Computes the nodal values of the flux on an element, component-major with respect to
    /// the nodes of `flux_element`.
    ///
    /// `solution` holds the element dof values of the solution, component-major with respect to
    /// the nodes of `solution_element`. If `with_coefficient` is false, the flux is computed
    /// without the material coefficient of the integrator.
    fn compute_element_flux(
        &self,
        element: &ElementContext,
        solution_element: &LagrangeElement,
        solution: &[f64],
        solution_vdim: usize,
        flux_element: &LagrangeElement,
        with_coefficient: bool,
    ) -> Result<DVector<f64>, EstimatorError>;

    /// Computes the energy $\int_K |\sigma|^2 \, dx$ of a flux field on an element.
    ///
    /// If `directional` is given, it receives the energies of the flux components along each
    /// reference direction of the element.
    fn compute_flux_energy(
        &self,
        element: &ElementContext,
        flux_element: &LagrangeElement,
        flux: &[f64],
        flux_dim: usize,
        directional: Option<&mut [f64]>,
    ) -> Result<f64, EstimatorError>;
}

/// The flux $\sigma = k \nabla u$ of a diffusion problem, with an optional scalar
/// coefficient $k$.
///
/// For vector-valued solutions, the gradient of each component contributes `space_dim`
/// consecutive flux components.
#[derive(Clone, Default)]
pub struct DiffusionFlux {
    coefficient: Option<Arc<dyn Coefficient>>,
}

impl std::fmt::Debug for DiffusionFlux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffusionFlux")
            .field("has_coefficient", &self.coefficient.is_some())
            .finish()
    }
}

impl DiffusionFlux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coefficient(coefficient: impl Coefficient + 'static) -> Self {
        Self {
            coefficient: Some(Arc::new(coefficient)),
        }
    }
}

impl FluxIntegrator for DiffusionFlux {
    fn compute_element_flux(
        &self,
        element: &ElementContext,
        solution_element: &LagrangeElement,
        solution: &[f64],
        solution_vdim: usize,
        flux_element: &LagrangeElement,
        with_coefficient: bool,
    ) -> Result<DVector<f64>, EstimatorError> {
        let transformation = element.transformation;
        let space_dim = transformation.space_dim();
        let nodes = flux_element.nodes();
        let n = nodes.len();
        let mut flux = DVector::zeros(n * space_dim * solution_vdim);

        for (j, xi) in nodes.iter().enumerate() {
            let reference_gradient = solution_element.evaluate_reference_gradient(solution, solution_vdim, xi);
            let gradient = transformation
                .physical_gradients(xi, &reference_gradient)
                .ok_or(EstimatorError::DegenerateElement { element: element.index })?;
            let k = match (&self.coefficient, with_coefficient) {
                (Some(coefficient), true) => {
                    coefficient.evaluate(&transformation.map_reference_coords(xi), element.attribute)
                }
                _ => 1.0,
            };
            for c in 0..solution_vdim {
                for d in 0..space_dim {
                    flux[(c * space_dim + d) * n + j] = k * gradient[(d, c)];
                }
            }
        }
        Ok(flux)
    }

    fn compute_flux_energy(
        &self,
        element: &ElementContext,
        flux_element: &LagrangeElement,
        flux: &[f64],
        flux_dim: usize,
        mut directional: Option<&mut [f64]>,
    ) -> Result<f64, EstimatorError> {
        let transformation = element.transformation;
        let space_dim = transformation.space_dim();
        let dim = flux_element.dim();
        let rule = quadrature::rule_for_order(flux_element.kind().geometry(), 2 * flux_element.order() + 1);
        if let Some(directional) = directional.as_deref_mut() {
            directional.fill(0.0);
        }

        let mut energy = 0.0;
        for (w, xi) in rule.iter() {
            let value = flux_element.evaluate(flux, flux_dim, xi);
            let weight = w * transformation.weight(xi);
            energy += weight * value.norm_squared();

            if let Some(directional) = directional.as_deref_mut() {
                let jacobian = transformation.jacobian(xi);
                for k in 0..dim {
                    let tangent = jacobian.column(k).normalize();
                    let projected: f64 = value
                        .as_slice()
                        .chunks(space_dim)
                        .map(|component| {
                            let component_flux = DVector::from_column_slice(component);
                            component_flux.dot(&tangent).powi(2)
                        })
                        .sum();
                    directional[k] += weight * projected;
                }
            }
        }

        if energy.is_finite() {
            Ok(energy)
        } else {
            Err(EstimatorError::DegenerateElement { element: element.index })
        }
    }
}
