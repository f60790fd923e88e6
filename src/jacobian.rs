//! Finite difference Jacobian computation.

use nalgebra::{DMatrix, DVector};

use crate::equation::DomainViolation;
use crate::newton::ResidualFunction;

/// Symmetric finite-difference Jacobian of `function` at `x`.
///
/// Column `j` uses the step `h = step * max(1, |x_j|)`. When one side of the
/// stencil leaves the residual's domain the column falls back to the one-sided
/// difference on the admissible side; only when both sides fail is the
/// violation returned.
pub fn central_difference<F>(
    function: &F,
    x: &DVector<f64>,
    f_x: &DVector<f64>,
    step: f64,
) -> Result<DMatrix<f64>, DomainViolation>
where
    F: ResidualFunction + ?Sized,
{
    let n = x.len();
    let m = f_x.len();
    let mut jac = DMatrix::zeros(m, n);

    for j in 0..n {
        let h = step * x[j].abs().max(1.0);

        let mut x_plus = x.clone();
        x_plus[j] += h;
        let mut x_minus = x.clone();
        x_minus[j] -= h;

        let column = match (function.residuals(&x_plus), function.residuals(&x_minus)) {
            (Ok(f_plus), Ok(f_minus)) => (f_plus - f_minus) / (2.0 * h),
            (Ok(f_plus), Err(_)) => (f_plus - f_x) / h,
            (Err(_), Ok(f_minus)) => (f_x - f_minus) / h,
            (Err(violation), Err(_)) => return Err(violation),
        };
        jac.set_column(j, &column);
    }

    Ok(jac)
}

/// Ratio of the largest to the smallest singular value; infinite when singular.
pub fn condition_number(jac: &DMatrix<f64>) -> f64 {
    if jac.is_empty() {
        return 1.0;
    }
    let singular_values = jac.clone().svd(false, false).singular_values;
    let largest = singular_values.max();
    let smallest = singular_values.min();
    if smallest <= 0.0 || !smallest.is_finite() || !largest.is_finite() {
        f64::INFINITY
    } else {
        largest / smallest
    }
}
