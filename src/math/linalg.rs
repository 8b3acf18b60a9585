//! Dense linear algebra helpers on top of `nalgebra`.
//!
//! The systems here are tiny (one row/column per fit parameter or per ODE state
//! component), so dense factorizations are the right tool:
//!
//! - [`solve_symmetric`]: Cholesky with an SVD fallback, for damped normal equations
//! - [`forward_jacobian`]: forward-difference Jacobian with caller-chosen steps

use nalgebra::{DMatrix, DVector};

/// Solve `A x = b` for symmetric positive (semi)definite `A`.
///
/// Tries Cholesky first; if `A` is not numerically positive definite, falls
/// back to an SVD solve. Returns `None` if no finite solution exists.
pub fn solve_symmetric(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }

    let svd = a.clone().svd(true, true);
    let eps = 1e-14 * svd.singular_values.max();
    let x = svd.solve(b, eps).ok()?;
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Forward-difference Jacobian `∂f_i/∂x_j`.
///
/// `f0` is `f(x)`; `steps[j]` is the signed perturbation for column `j`
/// (negative steps are used to stay inside a bound). `eval` writes `f(x')` into
/// its output buffer.
pub fn forward_jacobian<E>(
    x: &[f64],
    f0: &[f64],
    steps: &[f64],
    mut eval: impl FnMut(&[f64], &mut [f64]) -> Result<(), E>,
) -> Result<DMatrix<f64>, E> {
    let m = f0.len();
    let n = x.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut xp = x.to_vec();
    let mut fp = vec![0.0; m];

    for j in 0..n {
        let h = steps[j];
        xp[j] = x[j] + h;
        eval(&xp, &mut fp)?;
        // Use the step actually representable in floating point.
        let dh = xp[j] - x[j];
        for i in 0..m {
            jac[(i, j)] = (fp[i] - f0[i]) / dh;
        }
        xp[j] = x[j];
    }

    Ok(jac)
}

/// Default forward-difference step for one coordinate.
pub fn fd_step(x: f64) -> f64 {
    f64::EPSILON.sqrt() * x.abs().max(1.0)
}

/// Euclidean norm.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
