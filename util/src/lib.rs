use nalgebra::DVector;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Asserts that every entry of a slice of floating point values is within `abstol` of zero.
#[macro_export]
macro_rules! assert_all_near_zero {
    ($values:expr, abstol = $tol:expr) => {{
        let values: &[f64] = &$values;
        let max_abs = values.iter().fold(0.0f64, |max, v| max.max(v.abs()));
        if !(max_abs <= $tol) {
            println!("abstol: {:e}", $tol);
            println!("values: {:?}", values);
        }
        assert!(max_abs <= $tol, "max absolute value {:e} exceeds tolerance {:e}", max_abs, $tol);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Evaluates the affine function `x -> c_0 + sum_i c_{i + 1} x_i` at the given point.
///
/// Used by tests that need a function reproduced exactly by (multi)linear elements.
pub fn affine(coefficients: &[f64], x: &DVector<f64>) -> f64 {
    assert_eq!(coefficients.len(), x.len() + 1, "need one coefficient per coordinate plus an offset");
    coefficients[0] + x.iter().zip(&coefficients[1..]).map(|(x_i, c_i)| x_i * c_i).sum::<f64>()
}
