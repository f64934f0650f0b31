use super::{Continuity, FiniteElementSpace};
use eyre::eyre;
use nalgebra::{DMatrix, DVector};
use parking_lot::RwLock;
use std::sync::Arc;

/// A finite element function: a space together with a vector of dof values.
#[derive(Debug, Clone)]
pub struct GridFunction {
    space: Arc<FiniteElementSpace>,
    values: DVector<f64>,
}

/// A solution that is shared between the code producing it and the estimators observing it.
pub type SharedGridFunction = Arc<RwLock<GridFunction>>;

impl GridFunction {
    pub fn zeros(space: Arc<FiniteElementSpace>) -> Self {
        let values = DVector::zeros(space.num_vdofs());
        Self { space, values }
    }

    pub fn from_values(space: Arc<FiniteElementSpace>, values: DVector<f64>) -> eyre::Result<Self> {
        if values.len() != space.num_vdofs() {
            return Err(eyre!(
                "expected {} dof values, got {}",
                space.num_vdofs(),
                values.len()
            ));
        }
        Ok(Self { space, values })
    }

    /// Interpolates a function with `vdim` components by evaluation at the nodes.
    ///
    /// For continuous spaces, the function must be continuous for the result to be
    /// well-defined on shared nodes.
    pub fn interpolate(space: Arc<FiniteElementSpace>, f: impl Fn(&DVector<f64>) -> DVector<f64>) -> Self {
        let mut result = Self::zeros(space);
        let space = Arc::clone(&result.space);
        let mesh = space.mesh();
        let nodes = space.element().nodes();
        for e in 0..mesh.num_elements() {
            let transformation = mesh.element_transformation(e);
            let vdofs = space.element_vdofs(e);
            let n = nodes.len();
            for (i, xi) in nodes.iter().enumerate() {
                let value = f(&transformation.map_reference_coords(xi));
                for c in 0..space.vdim() {
                    result.values[vdofs[c * n + i]] = value[c];
                }
            }
        }
        result
    }

    /// Interpolates a scalar function into every component.
    pub fn interpolate_scalar(space: Arc<FiniteElementSpace>, f: impl Fn(&DVector<f64>) -> f64) -> Self {
        let vdim = space.vdim();
        Self::interpolate(space, |x| DVector::from_element(vdim, f(x)))
    }

    pub fn into_shared(self) -> SharedGridFunction {
        Arc::new(RwLock::new(self))
    }

    pub fn space(&self) -> &Arc<FiniteElementSpace> {
        &self.space
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut DVector<f64> {
        &mut self.values
    }

    pub fn is_continuous(&self) -> bool {
        self.space.continuity() == Continuity::H1
    }

    /// The dof values of an element, component-major.
    pub fn element_values(&self, element: usize) -> Vec<f64> {
        self.space
            .element_vdofs(element)
            .into_iter()
            .map(|dof| self.values[dof])
            .collect()
    }

    /// Evaluates all components at reference coordinates of an element.
    pub fn value(&self, element: usize, xi: &DVector<f64>) -> DVector<f64> {
        let local = self.element_values(element);
        self.space.element().evaluate(&local, self.space.vdim(), xi)
    }

    /// The physical gradient of all components at reference coordinates of an element, as a
    /// `space_dim x vdim` matrix. Returns `None` if the element is degenerate at `xi`.
    pub fn gradient(&self, element: usize, xi: &DVector<f64>) -> Option<DMatrix<f64>> {
        let local = self.element_values(element);
        let reference_gradient = self
            .space
            .element()
            .evaluate_reference_gradient(&local, self.space.vdim(), xi);
        let transformation = self.space.mesh().element_transformation(element);
        transformation.physical_gradients(xi, &reference_gradient)
    }
}
