//! Quadrature rules for the reference domains of the supported geometries.
//!
//! Reference domains are the point, the interval $[-1, 1]$ and the square $[-1, 1]^2$.
use fenris_quadrature::{tensor, univariate};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Reference geometries of cells and faces.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Geometry {
    Point,
    Segment,
    Square,
}

impl Geometry {
    pub fn dim(&self) -> usize {
        match self {
            Self::Point => 0,
            Self::Segment => 1,
            Self::Square => 2,
        }
    }
}

/// A quadrature rule consisting of weights and reference points.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    weights: Vec<f64>,
    points: Vec<DVector<f64>>,
}

impl QuadratureRule {
    /// # Panics
    ///
    /// Panics if the number of weights and points differ.
    pub fn from_weights_and_points(weights: Vec<f64>, points: Vec<DVector<f64>>) -> Self {
        assert_eq!(weights.len(), points.len(), "Need exactly one weight per point");
        Self { weights, points }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[DVector<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &DVector<f64>)> {
        self.weights.iter().copied().zip(&self.points)
    }

    /// Approximates the integral of the given function over the reference domain.
    pub fn integrate(&self, f: impl Fn(&DVector<f64>) -> f64) -> f64 {
        self.iter().map(|(w, xi)| w * f(xi)).sum()
    }
}

/// Gauss-Legendre quadrature with the given number of points on $[-1, 1]$.
///
/// Integrates polynomials of degree up to `2 n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss(num_points: usize) -> QuadratureRule {
    let (weights, points) = univariate::gauss(num_points);
    let points = points
        .into_iter()
        .map(|[x]| DVector::from_element(1, x))
        .collect();
    QuadratureRule::from_weights_and_points(weights, points)
}

/// Tensor-product Gauss rule on the reference square with the given number of points per
/// direction. The second coordinate varies fastest.
pub fn square_gauss(num_points_per_dim: usize) -> QuadratureRule {
    let (weights, points) = tensor::quadrilateral_gauss(num_points_per_dim);
    let points = points
        .iter()
        .map(|p| DVector::from_column_slice(p))
        .collect();
    QuadratureRule::from_weights_and_points(weights, points)
}

/// The trivial rule on a point.
pub fn point_rule() -> QuadratureRule {
    QuadratureRule::from_weights_and_points(vec![1.0], vec![DVector::zeros(0)])
}

/// Returns a Gauss rule on the given reference geometry that integrates polynomials of degree
/// `order` (in each coordinate direction) exactly.
pub fn rule_for_order(geometry: Geometry, order: usize) -> QuadratureRule {
    let num_points = order / 2 + 1;
    match geometry {
        Geometry::Point => point_rule(),
        Geometry::Segment => gauss(num_points),
        Geometry::Square => square_gauss(num_points),
    }
}
