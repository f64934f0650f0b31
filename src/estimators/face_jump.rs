use crate::element::{ElementTransformation, LagrangeElement};
use crate::mesh::{Face, FaceKind, LocalFaceMap};
use crate::quadrature::QuadratureRule;
use nalgebra::DVector;

/// One side of a face, as seen by [`FaceJumpIntegrator`].
#[derive(Debug, Clone, Copy)]
pub struct FaceSideData<'a> {
    pub transformation: &'a ElementTransformation,
    pub local_face: usize,
    pub map: LocalFaceMap,
    /// Nodal values of the flux on the element, component-major.
    pub flux: &'a [f64],
}

impl<'a> FaceSideData<'a> {
    fn reference_coords(&self, s: f64) -> DVector<f64> {
        let kind = self.transformation.kind();
        kind.face_to_reference(self.local_face, self.map.apply(s))
    }
}

/// Decides which local element integrates an interior face of the local mesh, so that every
/// face is integrated exactly once.
///
/// Conforming faces are integrated by the adjacent element with the smaller index,
/// non-conforming slave faces by their fine element. Boundary faces and non-conforming
/// master faces are never integrated.
pub fn integrating_element(face: &Face) -> Option<usize> {
    match face.kind() {
        FaceKind::Conforming => face
            .elem2()
            .map(|elem2| face.elem1().element.min(elem2.element)),
        FaceKind::NonConformingSlave => Some(face.elem1().element),
        FaceKind::Boundary | FaceKind::NonConformingMaster => None,
    }
}

/// Integrates the squared jump of the normal flux across a face,
/// $\int_F ((\sigma_1 - \sigma_2) \cdot n)^2 \, ds$.
///
/// The normal is the unit normal of the face as seen from the first side. On meshes embedded in
/// a higher-dimensional space, where faces have no unique normal, the normal is the normalized
/// difference of the outward conormals of the two sides. This makes the integral symmetric and
/// zero whenever the flux is continuous along the surface.
#[derive(Debug, Clone, Copy)]
pub struct FaceJumpIntegrator<'a> {
    flux_element: &'a LagrangeElement,
    flux_dim: usize,
    rule: &'a QuadratureRule,
}

impl<'a> FaceJumpIntegrator<'a> {
    /// `rule` must be a rule on the reference geometry of the faces.
    pub fn new(flux_element: &'a LagrangeElement, flux_dim: usize, rule: &'a QuadratureRule) -> Self {
        Self {
            flux_element,
            flux_dim,
            rule,
        }
    }

    /// `face_points` are the coordinates of the face vertices, in the orientation in which
    /// the side maps are defined.
    pub fn integrate(&self, face_points: &[DVector<f64>], side1: &FaceSideData, side2: &FaceSideData) -> f64 {
        let mesh_dim = side1.transformation.kind().dim();
        let space_dim = side1.transformation.space_dim();
        // Length element of the face parametrization over [-1, 1]
        let face_weight = match face_points {
            [a, b] => 0.5 * (b - a).norm(),
            _ => 1.0,
        };
        let flat_normal = (mesh_dim == space_dim).then(|| match face_points {
            [a, b] => {
                let t = b - a;
                DVector::from_column_slice(&[t[1], -t[0]]).normalize()
            }
            _ => DVector::from_element(1, 1.0),
        });

        let mut integral = 0.0;
        for (w, point) in self.rule.iter() {
            let s = if point.is_empty() { 0.0 } else { point[0] };
            let xi1 = side1.reference_coords(s);
            let xi2 = side2.reference_coords(s);
            let normal = match &flat_normal {
                Some(normal) => normal.clone(),
                None => {
                    let conormal1 = side1.transformation.outward_face_normal(side1.local_face, &xi1);
                    let conormal2 = side2.transformation.outward_face_normal(side2.local_face, &xi2);
                    let difference = &conormal1 - &conormal2;
                    let norm = difference.norm();
                    if norm > 0.0 {
                        difference / norm
                    } else {
                        conormal1
                    }
                }
            };

            let flux1 = self.flux_element.evaluate(side1.flux, self.flux_dim, &xi1);
            let flux2 = self.flux_element.evaluate(side2.flux, self.flux_dim, &xi2);
            let jump = (flux1 - flux2).dot(&normal);
            integral += w * face_weight * jump * jump;
        }
        integral
    }
}
