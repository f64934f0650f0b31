use super::face_jump::{integrating_element, FaceJumpIntegrator, FaceSideData};
use super::{AuxiliarySpace, Estimates, EstimateCache, ErrorEstimator, EstimatorError};
use crate::flux::{ElementContext, FluxIntegrator};
use crate::mesh::{face_measure, Mesh};
use crate::quadrature;
use crate::space::{Continuity, FiniteElementSpace, SharedGridFunction};
use itertools::Itertools;
use nalgebra::DVector;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Geometric information passed to the face coefficient of the Kelly estimator.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FaceCoefficientInput {
    /// The reference dimension of the mesh.
    pub mesh_dim: usize,
    /// The length of the face, or one for point faces.
    pub face_measure: f64,
    /// The diameters of the two elements adjacent to the face.
    pub element_diameters: [f64; 2],
    /// The polynomial order of the solution.
    pub order: usize,
}

/// Information passed to the element coefficient of the Kelly estimator.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ElementCoefficientInput {
    pub element: usize,
    pub attribute: usize,
    pub diameter: f64,
}

type FaceCoefficientFn = dyn Fn(&FaceCoefficientInput) -> f64 + Send + Sync;
type ElementCoefficientFn = dyn Fn(&ElementCoefficientInput) -> f64 + Send + Sync;

/// The default face scaling $h_F / (2p)$.
///
/// For point faces of one-dimensional meshes, $h_F$ is the mean diameter of the two adjacent
/// elements. Otherwise it is the length of the face.
pub fn default_face_coefficient(input: &FaceCoefficientInput) -> f64 {
    let p = input.order.max(1) as f64;
    let h = if input.mesh_dim == 1 {
        0.5 * (input.element_diameters[0] + input.element_diameters[1])
    } else {
        input.face_measure
    };
    h / (2.0 * p)
}

/// The Kelly error estimator, based on jumps of the normal flux across faces.
///
/// For each element $K$, the indicator is
/// $\eta_K^2 = c_K \sum_{F \subset \partial K} c_F \int_F [\![\sigma \cdot n]\!]^2 \, ds$
/// where the sum runs over interior, non-conforming and partition-boundary faces, but not
/// over the domain boundary. The flux $\sigma$ is computed element-wise by the flux
/// integrator. The total error is the sum $\sum_K \eta_K$ over all ranks.
///
/// Elements can be restricted to a set of attributes. Faces are then only integrated if both
/// adjacent elements have an accepted attribute, and elements outside the set get a zero
/// indicator.
pub struct KellyErrorEstimator {
    solution: Option<SharedGridFunction>,
    integrator: Arc<dyn FluxIntegrator>,
    flux_space: AuxiliarySpace,
    attributes: BTreeSet<usize>,
    face_coefficient: Arc<FaceCoefficientFn>,
    element_coefficient: Arc<ElementCoefficientFn>,
    shared_face_jumps: Vec<(usize, f64)>,
    cache: EstimateCache,
}

impl std::fmt::Debug for KellyErrorEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KellyErrorEstimator")
            .field("has_solution", &self.solution.is_some())
            .field("attributes", &self.attributes)
            .field("cache", &self.cache)
            .finish()
    }
}

impl KellyErrorEstimator {
    pub fn new(integrator: impl FluxIntegrator + 'static) -> Self {
        Self {
            solution: None,
            integrator: Arc::new(integrator),
            flux_space: AuxiliarySpace::new(Continuity::L2, None),
            attributes: BTreeSet::new(),
            face_coefficient: Arc::new(default_face_coefficient),
            element_coefficient: Arc::new(|_: &ElementCoefficientInput| 1.0),
            shared_face_jumps: Vec::new(),
            cache: EstimateCache::default(),
        }
    }

    pub fn with_solution(mut self, solution: SharedGridFunction) -> Self {
        self.attach_solution(solution);
        self
    }

    /// Restricts the estimator to elements with the given attributes. An empty set accepts all
    /// elements.
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = usize>) -> Self {
        self.set_attributes(attributes);
        self
    }

    pub fn with_face_coefficient(
        mut self,
        coefficient: impl Fn(&FaceCoefficientInput) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.face_coefficient = Arc::new(coefficient);
        self.reset();
        self
    }

    pub fn with_element_coefficient(
        mut self,
        coefficient: impl Fn(&ElementCoefficientInput) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.element_coefficient = Arc::new(coefficient);
        self.reset();
        self
    }

    pub fn attach_solution(&mut self, solution: SharedGridFunction) {
        self.solution = Some(solution);
        self.reset();
    }

    pub fn set_attributes(&mut self, attributes: impl IntoIterator<Item = usize>) {
        self.attributes = attributes.into_iter().collect();
        self.reset();
    }

    pub fn attributes(&self) -> &BTreeSet<usize> {
        &self.attributes
    }

    /// The weighted jump contributions of the faces shared with other ranks, as pairs of global
    /// face id and contribution, from the last estimation pass.
    ///
    /// Both ranks adjacent to a shared face compute the same contribution.
    pub fn shared_face_jumps(&self) -> &[(usize, f64)] {
        &self.shared_face_jumps
    }

    fn accepts(&self, attribute: usize) -> bool {
        self.attributes.is_empty() || self.attributes.contains(&attribute)
    }
}

/// Sends the flux of the local element adjacent to each shared face to the neighbor rank, and
/// returns the flux of the remote element for each shared face.
fn exchange_face_neighbor_flux(
    mesh: &Mesh,
    flux_space: &FiniteElementSpace,
    flux: &DVector<f64>,
) -> Result<Vec<Vec<f64>>, EstimatorError> {
    let shared_faces = mesh.shared_faces();
    // Both ranks order the faces they share by global face id
    let faces_by_rank = shared_faces
        .iter()
        .enumerate()
        .map(|(index, face)| (face.neighbor.rank, face.global_id, index))
        .sorted()
        .group_by(|(rank, _, _)| *rank)
        .into_iter()
        .map(|(rank, group)| (rank, group.map(|(_, _, index)| index).collect::<Vec<_>>()))
        .collect::<Vec<_>>();

    let outgoing = faces_by_rank
        .iter()
        .map(|(rank, faces)| {
            let data = faces
                .iter()
                .flat_map(|&index| {
                    let element = shared_faces[index].local.element;
                    flux_space.element_vdofs(element).into_iter().map(move |dof| flux[dof])
                })
                .collect();
            (*rank, data)
        })
        .collect();
    let incoming = mesh.comm().exchange(outgoing)?;

    let values_per_element = flux_space.element().num_nodes() * flux_space.vdim();
    let mut remote_flux = vec![Vec::new(); shared_faces.len()];
    for ((_, faces), (_, data)) in faces_by_rank.iter().zip(incoming) {
        if data.len() != faces.len() * values_per_element {
            return Err(EstimatorError::IncompatibleSpace {
                reason: "neighbor rank sent flux data of unexpected size".to_string(),
            });
        }
        for (&index, chunk) in faces.iter().zip(data.chunks(values_per_element)) {
            remote_flux[index] = chunk.to_vec();
        }
    }
    Ok(remote_flux)
}

impl ErrorEstimator for KellyErrorEstimator {
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
        if space.vdim() != 1 {
            return Err(EstimatorError::NotImplemented {
                what: "jump estimation for vector-valued solutions",
            });
        }
        let flux_dim = self.integrator.flux_dim(mesh.space_dim(), 1);
        if flux_dim != mesh.space_dim() {
            return Err(EstimatorError::NotImplemented {
                what: "jump estimation for fluxes that are not vectors in physical space",
            });
        }
        let flux_space = self.flux_space.update(&mesh, space.order(), flux_dim)?;
        let flux_element = flux_space.element();

        // Element-wise flux, zero on elements that are filtered out
        let integrator = &self.integrator;
        let element_fluxes: Vec<Option<DVector<f64>>> = (0..mesh.num_elements())
            .into_par_iter()
            .map(|e| {
                let attribute = mesh.element_attribute(e);
                if !self.accepts(attribute) {
                    return Ok(None);
                }
                let transformation = mesh.element_transformation(e);
                let context = ElementContext {
                    index: e,
                    attribute,
                    transformation: &transformation,
                };
                let local = solution.element_values(e);
                integrator
                    .compute_element_flux(&context, space.element(), &local, 1, flux_element, true)
                    .map(Some)
            })
            .collect::<Result<_, _>>()?;

        let mut flux = DVector::zeros(flux_space.num_vdofs());
        for (e, element_flux) in element_fluxes.iter().enumerate() {
            if let Some(element_flux) = element_flux {
                for (dof, value) in flux_space.element_vdofs(e).into_iter().zip(element_flux.iter()) {
                    flux[dof] += value;
                }
            }
        }
        let element_flux =
            |e: usize| -> Vec<f64> { flux_space.element_vdofs(e).into_iter().map(|dof| flux[dof]).collect() };

        let rule = quadrature::rule_for_order(mesh.cell_kind().face_geometry(), 2 * space.order());
        let jump_integrator = FaceJumpIntegrator::new(flux_element, flux_dim, &rule);
        let face_coefficient = |points: &[DVector<f64>], diameters: [f64; 2]| {
            (self.face_coefficient)(&FaceCoefficientInput {
                mesh_dim: mesh.dim(),
                face_measure: face_measure(points),
                element_diameters: diameters,
                order: space.order(),
            })
        };

        let mut squared_errors = vec![0.0; mesh.num_elements()];
        for face in mesh.faces() {
            let (Some(_), Some(elem2)) = (integrating_element(face), face.elem2()) else {
                continue;
            };
            let elem1 = face.elem1();
            let attribute1 = mesh.element_attribute(elem1.element);
            let attribute2 = mesh.element_attribute(elem2.element);
            if !self.accepts(attribute1) || !self.accepts(attribute2) {
                continue;
            }
            let transformation1 = mesh.element_transformation(elem1.element);
            let transformation2 = mesh.element_transformation(elem2.element);
            let flux1 = element_flux(elem1.element);
            let flux2 = element_flux(elem2.element);
            let points = mesh.face_points(face);
            let jump = jump_integrator.integrate(
                &points,
                &FaceSideData {
                    transformation: &transformation1,
                    local_face: elem1.local_face,
                    map: elem1.map,
                    flux: &flux1,
                },
                &FaceSideData {
                    transformation: &transformation2,
                    local_face: elem2.local_face,
                    map: elem2.map,
                    flux: &flux2,
                },
            );
            let diameters = [transformation1.diameter(), transformation2.diameter()];
            let contribution = face_coefficient(&points, diameters) * jump;
            squared_errors[elem1.element] += contribution;
            squared_errors[elem2.element] += contribution;
        }

        let remote_fluxes = exchange_face_neighbor_flux(&mesh, &flux_space, &flux)?;
        let mut shared_face_jumps = Vec::with_capacity(mesh.shared_faces().len());
        for (shared, remote_flux) in mesh.shared_faces().iter().zip(&remote_fluxes) {
            let local = &shared.local;
            let neighbor = &shared.neighbor;
            if !self.accepts(mesh.element_attribute(local.element)) || !self.accepts(neighbor.attribute) {
                continue;
            }
            let transformation = mesh.element_transformation(local.element);
            let local_flux = element_flux(local.element);
            let jump = jump_integrator.integrate(
                &shared.points,
                &FaceSideData {
                    transformation: &transformation,
                    local_face: local.local_face,
                    map: local.map,
                    flux: &local_flux,
                },
                &FaceSideData {
                    transformation: &neighbor.transformation,
                    local_face: neighbor.local_face,
                    map: neighbor.map,
                    flux: remote_flux,
                },
            );
            let contribution = face_coefficient(
                &shared.points,
                [transformation.diameter(), neighbor.transformation.diameter()],
            ) * jump;
            squared_errors[local.element] += contribution;
            shared_face_jumps.push((shared.global_id, contribution));
        }

        let local_errors: Vec<f64> = squared_errors
            .iter()
            .enumerate()
            .map(|(e, squared)| {
                let scale = (self.element_coefficient)(&ElementCoefficientInput {
                    element: e,
                    attribute: mesh.element_attribute(e),
                    diameter: mesh.element_diameter(e),
                });
                (scale * squared).max(0.0).sqrt()
            })
            .collect();
        let total_error = mesh.comm().all_reduce_sum(local_errors.iter().sum());

        self.shared_face_jumps = shared_face_jumps;
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
