//! Spatially varying coefficients and reference functions.
use nalgebra::DVector;
use std::fmt;
use std::sync::Arc;

/// A scalar function of the physical position, which may additionally depend on the
/// attribute of the element it is evaluated in.
pub trait Coefficient: Send + Sync {
    fn evaluate(&self, x: &DVector<f64>, attribute: usize) -> f64;
}

impl<F> Coefficient for F
where
    F: Fn(&DVector<f64>) -> f64 + Send + Sync,
{
    fn evaluate(&self, x: &DVector<f64>, _attribute: usize) -> f64 {
        self(x)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ConstantCoefficient(pub f64);

impl Coefficient for ConstantCoefficient {
    fn evaluate(&self, _x: &DVector<f64>, _attribute: usize) -> f64 {
        self.0
    }
}

/// A coefficient that is constant on every element attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseConstantCoefficient {
    values: Vec<(usize, f64)>,
    default: f64,
}

impl PiecewiseConstantCoefficient {
    /// Creates a coefficient with the given value on every attribute not listed explicitly.
    pub fn new(default: f64) -> Self {
        Self {
            values: Vec::new(),
            default,
        }
    }

    pub fn with_value(mut self, attribute: usize, value: f64) -> Self {
        self.values.retain(|(a, _)| *a != attribute);
        self.values.push((attribute, value));
        self
    }
}

impl Coefficient for PiecewiseConstantCoefficient {
    fn evaluate(&self, _x: &DVector<f64>, attribute: usize) -> f64 {
        self.values
            .iter()
            .find(|(a, _)| *a == attribute)
            .map_or(self.default, |(_, value)| *value)
    }
}

/// A vector-valued function of the physical position.
pub trait VectorCoefficient: Send + Sync {
    fn evaluate(&self, x: &DVector<f64>, attribute: usize) -> DVector<f64>;
}

impl<F> VectorCoefficient for F
where
    F: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync,
{
    fn evaluate(&self, x: &DVector<f64>, _attribute: usize) -> DVector<f64> {
        self(x)
    }
}

/// A known function to compare a finite element solution against.
#[derive(Clone)]
pub enum ReferenceFunction {
    Scalar(Arc<dyn Coefficient>),
    Vector(Arc<dyn VectorCoefficient>),
}

impl ReferenceFunction {
    pub fn scalar(coefficient: impl Coefficient + 'static) -> Self {
        Self::Scalar(Arc::new(coefficient))
    }

    pub fn vector(coefficient: impl VectorCoefficient + 'static) -> Self {
        Self::Vector(Arc::new(coefficient))
    }

    /// Evaluates the function as a vector, with a single entry for scalar functions.
    pub fn evaluate(&self, x: &DVector<f64>, attribute: usize) -> DVector<f64> {
        match self {
            Self::Scalar(f) => DVector::from_element(1, f.evaluate(x, attribute)),
            Self::Vector(f) => f.evaluate(x, attribute),
        }
    }
}

impl fmt::Debug for ReferenceFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(_) => write!(f, "ReferenceFunction::Scalar"),
            Self::Vector(_) => write!(f, "ReferenceFunction::Vector"),
        }
    }
}
