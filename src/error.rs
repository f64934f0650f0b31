//! Functionality for error estimation against known functions.
use crate::coefficient::ReferenceFunction;
use crate::quadrature::{self, QuadratureRule};
use crate::space::GridFunction;
use eyre::eyre;
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// The exponent of an $L^p$ norm, $1 \leq p \leq \infty$.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpNorm {
    p: f64,
}

impl LpNorm {
    pub fn new(p: f64) -> eyre::Result<Self> {
        if p >= 1.0 {
            Ok(Self { p })
        } else {
            Err(eyre!("Lp norms require p >= 1, got {p}"))
        }
    }

    pub fn l2() -> Self {
        Self { p: 2.0 }
    }

    pub fn infinity() -> Self {
        Self { p: f64::INFINITY }
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn is_infinity(&self) -> bool {
        self.p == f64::INFINITY
    }

    /// Combines non-negative local contributions into a global norm: $(\sum_i e_i^p)^{1/p}$,
    /// or the maximum for $p = \infty$.
    pub fn combine(&self, values: impl IntoIterator<Item = f64>) -> f64 {
        self.finish(self.accumulate(values))
    }

    /// The sum $\sum_i e_i^p$, or the maximum for $p = \infty$.
    pub fn accumulate(&self, values: impl IntoIterator<Item = f64>) -> f64 {
        if self.is_infinity() {
            values.into_iter().fold(0.0, f64::max)
        } else {
            values.into_iter().map(|e| e.powf(self.p)).sum()
        }
    }

    /// Takes the $p$-th root of an accumulated sum, the identity for $p = \infty$.
    pub fn finish(&self, accumulated: f64) -> f64 {
        if self.is_infinity() {
            accumulated
        } else {
            accumulated.powf(1.0 / self.p)
        }
    }
}

impl Default for LpNorm {
    fn default() -> Self {
        Self::l2()
    }
}

/// Integrates $|g|^p$ over an element, where `g` is a pointwise (vector) difference, and returns
/// the element norm.
///
/// The pointwise magnitude of vector differences is measured in the Euclidean norm.
pub(crate) fn element_lp_norm(
    norm: &LpNorm,
    rule: &QuadratureRule,
    weight: impl Fn(&DVector<f64>) -> f64,
    difference: impl Fn(&DVector<f64>) -> DVector<f64>,
) -> f64 {
    if norm.is_infinity() {
        rule.points()
            .iter()
            .map(|xi| difference(xi).norm())
            .fold(0.0, f64::max)
    } else {
        let integral: f64 = rule
            .iter()
            .map(|(w, xi)| w * weight(xi) * difference(xi).norm().powf(norm.p()))
            .sum();
        integral.powf(1.0 / norm.p())
    }
}

fn error_quadrature(u_h: &GridFunction) -> QuadratureRule {
    let space = u_h.space();
    quadrature::rule_for_order(space.element().kind().geometry(), 2 * space.order() + 3)
}

/// Estimates the $L^p$ error of `u_h` on a single element, compared to the given function.
pub fn estimate_element_lp_error(
    u_h: &GridFunction,
    element: usize,
    u: &ReferenceFunction,
    norm: &LpNorm,
    rule: &QuadratureRule,
) -> f64 {
    let mesh = u_h.space().mesh();
    let transformation = mesh.element_transformation(element);
    let attribute = mesh.element_attribute(element);
    element_lp_norm(
        norm,
        rule,
        |xi| transformation.weight(xi),
        |xi| {
            let x = transformation.map_reference_coords(xi);
            u_h.value(element, xi) - u.evaluate(&x, attribute)
        },
    )
}

/// Estimates the $L^p$ error of `u_h` on every element of its mesh.
///
/// Fails if the number of components of the reference function does not match the space.
pub fn estimate_element_lp_errors(u_h: &GridFunction, u: &ReferenceFunction, norm: &LpNorm) -> eyre::Result<Vec<f64>> {
    let vdim = u_h.space().vdim();
    if let ReferenceFunction::Scalar(_) = u {
        if vdim != 1 {
            return Err(eyre!("scalar reference function for a space with {vdim} components"));
        }
    }

    let mesh = u_h.space().mesh();
    if let (ReferenceFunction::Vector(_), Some(first)) = (u, mesh.cells().first()) {
        let transformation = mesh.element_transformation(0);
        let x = transformation.map_reference_coords(&DVector::zeros(first.kind().dim()));
        let components = u.evaluate(&x, first.attribute()).len();
        if components != vdim {
            return Err(eyre!(
                "reference function with {components} components for a space with {vdim} components"
            ));
        }
    }

    let rule = error_quadrature(u_h);
    Ok((0..mesh.num_elements())
        .into_par_iter()
        .map(|e| estimate_element_lp_error(u_h, e, u, norm, &rule))
        .collect())
}

/// Estimates the global $L^p$ error of `u_h` on the local mesh.
pub fn estimate_lp_error(u_h: &GridFunction, u: &ReferenceFunction, norm: &LpNorm) -> eyre::Result<f64> {
    Ok(norm.combine(estimate_element_lp_errors(u_h, u, norm)?))
}

/// Computes the $L^p$ distance $\| u_h - v_h \|_{L^p(K)}$ between two functions on the same
/// mesh, for every element.
///
/// The functions may live in spaces of different order or continuity, but must have the same
/// number of components and be defined on the same state of the same mesh.
pub fn estimate_element_lp_distances(u_h: &GridFunction, v_h: &GridFunction, norm: &LpNorm) -> eyre::Result<Vec<f64>> {
    let (u_space, v_space) = (u_h.space(), v_h.space());
    if u_space.mesh().sequence() != v_space.mesh().sequence() {
        return Err(eyre!("cannot compare functions on different meshes"));
    }
    if u_space.vdim() != v_space.vdim() {
        return Err(eyre!(
            "cannot compare functions with {} and {} components",
            u_space.vdim(),
            v_space.vdim()
        ));
    }

    let order = u_space.order().max(v_space.order());
    let mesh = u_space.mesh();
    let rule = quadrature::rule_for_order(u_space.element().kind().geometry(), 2 * order + 3);
    Ok((0..mesh.num_elements())
        .into_par_iter()
        .map(|e| {
            let transformation = mesh.element_transformation(e);
            element_lp_norm(
                norm,
                &rule,
                |xi| transformation.weight(xi),
                |xi| u_h.value(e, xi) - v_h.value(e, xi),
            )
        })
        .collect())
}
