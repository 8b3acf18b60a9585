//! Levenberg–Marquardt minimisation of `Σ r_i(x)²`.
//!
//! - Marquardt scaling: the damping term is `μ·diag(JᵀJ)`
//! - Nielsen's damping update after every accepted step
//! - forward-difference Jacobian with steps relative to each coordinate,
//!   taken inward at a bound
//! - optional projection onto a box: coordinates blocked by a bound are frozen
//!   for the iteration and trial points are clamped
//!
//! Trial points whose residual is not finite count as an infinite cost, so
//! the step is rejected and the damping raised.

use std::fmt;

use nalgebra::{DMatrix, DVector};

use super::Bounds;
use crate::error::FitError;
use crate::math::{fd_step, forward_jacobian, norm, solve_symmetric};

/// Stopping criteria.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub max_nfev: usize,
}

impl LmOptions {
    /// Defaults for `n` parameters.
    pub fn for_params(n: usize) -> Self {
        Self {
            ftol: 1.5e-8,
            xtol: 1.5e-8,
            gtol: 1e-12,
            max_nfev: 2000 * (n + 1),
        }
    }
}

/// Why the iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ZeroResidual,
    Ftol,
    Xtol,
    Gtol,
    MaxNfev(usize),
    NonFiniteJacobian,
}

impl Termination {
    pub fn converged(self) -> bool {
        matches!(
            self,
            Termination::ZeroResidual | Termination::Ftol | Termination::Xtol | Termination::Gtol
        )
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::ZeroResidual => f.write_str("the residual is exactly zero"),
            Termination::Ftol => {
                f.write_str("both actual and predicted relative reductions in the sum of squares are at most ftol")
            }
            Termination::Xtol => f.write_str("relative change between two consecutive iterates is at most xtol"),
            Termination::Gtol => f.write_str("the gradient of the sum of squares is at most gtol"),
            Termination::MaxNfev(n) => write!(f, "number of function evaluations exceeded {n}"),
            Termination::NonFiniteJacobian => f.write_str("the Jacobian is not finite at the current point"),
        }
    }
}

/// Final state of one minimisation.
#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome {
    pub x: Vec<f64>,
    pub residual: Vec<f64>,
    /// `Σ r_i²` at `x`.
    pub cost: f64,
    pub nfev: usize,
    pub iterations: usize,
    pub termination: Termination,
}

/// Residual function with an evaluation counter.
struct Counted<F> {
    f: F,
    nfev: usize,
}

impl<F> Counted<F>
where
    F: FnMut(&[f64], &mut [f64]) -> Result<(), FitError>,
{
    /// Evaluate into `out`; `Ok(false)` when the residual is not finite.
    fn eval(&mut self, x: &[f64], out: &mut [f64]) -> Result<bool, FitError> {
        self.nfev += 1;
        (self.f)(x, out)?;
        Ok(out.iter().all(|v| v.is_finite()))
    }

    fn jacobian(&mut self, x: &[f64], r: &[f64], bounds: Option<&Bounds>) -> Result<DMatrix<f64>, FitError> {
        let steps: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(j, v)| bounds.map_or_else(|| fd_step(*v), |b| b.fd_step(j, *v)))
            .collect();
        forward_jacobian(x, r, &steps, |xp, out| self.eval(xp, out).map(|_| ()))
    }
}

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Minimise the sum of squares of `residual` (which has `m` components) from `x0`.
///
/// With `bounds`, `x0` must lie inside the box and every iterate stays there.
/// Errors from `residual` abort the minimisation. A non-finite residual at
/// `x0` is [`FitError::NonFiniteResidual`].
pub fn levenberg_marquardt<F>(
    residual: F,
    m: usize,
    x0: &[f64],
    bounds: Option<&Bounds>,
    options: &LmOptions,
) -> Result<LmOutcome, FitError>
where
    F: FnMut(&[f64], &mut [f64]) -> Result<(), FitError>,
{
    let n = x0.len();
    let mut f = Counted { f: residual, nfev: 0 };

    let mut x = x0.to_vec();
    let mut r = vec![0.0; m];
    if !f.eval(&x, &mut r)? {
        return Err(FitError::NonFiniteResidual);
    }
    let mut cost = sum_sq(&r);

    let mut jac = f.jacobian(&x, &r, bounds)?;
    let mut iterations = 0usize;

    let finish = |x: Vec<f64>, r: Vec<f64>, cost: f64, nfev: usize, iterations: usize, termination: Termination| {
        LmOutcome {
            x,
            residual: r,
            cost,
            nfev,
            iterations,
            termination,
        }
    };

    if !jac.iter().all(|v| v.is_finite()) {
        return Ok(finish(x, r, cost, f.nfev, 0, Termination::NonFiniteJacobian));
    }

    let mut a = jac.tr_mul(&jac);
    let mut g = jac.tr_mul(&DVector::from_column_slice(&r));
    // Dimensionless: the damping term already carries the scale of diag(JᵀJ).
    let mut mu = 1e-3;
    let mut nu = 2.0;

    let mut r_trial = vec![0.0; m];

    loop {
        iterations += 1;

        let free: Vec<usize> = (0..n)
            .filter(|&i| !bounds.is_some_and(|b| b.blocks(i, x[i], g[i])))
            .collect();
        let g_norm = free.iter().map(|&i| g[i].abs()).fold(0.0, f64::max);
        if g_norm <= options.gtol {
            return Ok(finish(x, r, cost, f.nfev, iterations, Termination::Gtol));
        }
        if f.nfev >= options.max_nfev || iterations > options.max_nfev {
            let stop = Termination::MaxNfev(options.max_nfev);
            return Ok(finish(x, r, cost, f.nfev, iterations, stop));
        }

        let max_diag = (0..n).map(|i| a[(i, i)]).fold(0.0, f64::max);
        let floor = 1e-12 * max_diag.max(f64::MIN_POSITIVE);
        let k = free.len();
        let damped = DMatrix::from_fn(k, k, |p, q| {
            let (i, j) = (free[p], free[q]);
            if p == q {
                a[(i, j)] + mu * a[(i, i)].max(floor)
            } else {
                a[(i, j)]
            }
        });
        let rhs = DVector::from_fn(k, |p, _| -g[free[p]]);
        let Some(delta_free) = solve_symmetric(&damped, &rhs) else {
            mu *= nu;
            nu *= 2.0;
            continue;
        };

        let mut x_trial = x.clone();
        for (p, &i) in free.iter().enumerate() {
            x_trial[i] += delta_free[p];
        }
        if let Some(b) = bounds {
            b.project(&mut x_trial);
        }
        let step = DVector::from_fn(n, |i, _| x_trial[i] - x[i]);
        let step_norm = step.norm();
        let x_norm = norm(&x);

        let cost_trial = if f.eval(&x_trial, &mut r_trial)? {
            sum_sq(&r_trial)
        } else {
            f64::INFINITY
        };
        let predicted = -(2.0 * step.dot(&g) + step.dot(&(&a * &step)));

        if cost_trial < cost && predicted > 0.0 {
            let actual = cost - cost_trial;
            let rho = actual / predicted;
            let cost_old = cost;

            x = x_trial;
            std::mem::swap(&mut r, &mut r_trial);
            cost = cost_trial;
            mu *= (1.0 - (2.0 * rho - 1.0).powi(3)).max(1.0 / 3.0);
            nu = 2.0;
            log::debug!("LM iteration {iterations}: cost={cost:.6e} mu={mu:.3e} x={x:?}");

            if cost == 0.0 {
                return Ok(finish(x, r, cost, f.nfev, iterations, Termination::ZeroResidual));
            }
            if actual <= options.ftol * cost_old && predicted <= options.ftol * cost_old {
                return Ok(finish(x, r, cost, f.nfev, iterations, Termination::Ftol));
            }
            if step_norm <= options.xtol * (x_norm + options.xtol) {
                return Ok(finish(x, r, cost, f.nfev, iterations, Termination::Xtol));
            }

            jac = f.jacobian(&x, &r, bounds)?;
            if !jac.iter().all(|v| v.is_finite()) {
                return Ok(finish(x, r, cost, f.nfev, iterations, Termination::NonFiniteJacobian));
            }
            a = jac.tr_mul(&jac);
            g = jac.tr_mul(&DVector::from_column_slice(&r));
        } else {
            mu *= nu;
            nu *= 2.0;
            if step_norm <= options.xtol * (x_norm + options.xtol) {
                return Ok(finish(x, r, cost, f.nfev, iterations, Termination::Xtol));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_linear_least_squares() {
        // y = 2 + 3t sampled exactly.
        let t: Vec<f64> = (0..8).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = t.iter().map(|t| 2.0 + 3.0 * t).collect();
        let residual = |p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            for (i, (t, y)) in t.iter().zip(&y).enumerate() {
                out[i] = p[0] + p[1] * t - y;
            }
            Ok(())
        };
        let out = levenberg_marquardt(residual, t.len(), &[0.0, 0.0], None, &LmOptions::for_params(2)).unwrap();
        assert!(out.termination.converged(), "{}", out.termination);
        assert!((out.x[0] - 2.0).abs() < 1e-7);
        assert!((out.x[1] - 3.0).abs() < 1e-7);
        assert!(out.cost < 1e-12);
    }

    #[test]
    fn fits_exponential_decay() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = t.iter().map(|t| 1.7 * (-0.8 * t).exp()).collect();
        let residual = |p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            for (i, (t, y)) in t.iter().zip(&y).enumerate() {
                out[i] = p[0] * (-p[1] * t).exp() - y;
            }
            Ok(())
        };
        let out = levenberg_marquardt(residual, t.len(), &[1.0, 0.1], None, &LmOptions::for_params(2)).unwrap();
        assert!(out.termination.converged());
        assert!((out.x[0] - 1.7).abs() < 1e-6);
        assert!((out.x[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn projected_iterates_respect_bounds() {
        // Unconstrained optimum at 3, box is [0, 1].
        let residual = |p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            out[0] = p[0] - 3.0;
            out[1] = 0.5 * (p[0] - 3.0);
            Ok(())
        };
        let bounds = Bounds::new(vec![0.0], vec![1.0]);
        let out = levenberg_marquardt(residual, 2, &[0.2], Some(&bounds), &LmOptions::for_params(1)).unwrap();
        assert_eq!(out.x, vec![1.0]);
        assert!(out.termination.converged());
    }

    #[test]
    fn non_finite_trials_are_rejected() {
        // sqrt is undefined left of zero; the optimum is at p = 1.
        let residual = |p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            out[0] = p[0].sqrt() - 1.0;
            out[1] = 10.0 * (p[0] - 1.0);
            Ok(())
        };
        let out = levenberg_marquardt(residual, 2, &[4.0], None, &LmOptions::for_params(1)).unwrap();
        assert!((out.x[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn start_must_be_finite() {
        let residual = |_p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            out[0] = f64::NAN;
            Ok(())
        };
        let err = levenberg_marquardt(residual, 1, &[1.0], None, &LmOptions::for_params(1)).unwrap_err();
        assert!(matches!(err, FitError::NonFiniteResidual));
    }

    #[test]
    fn budget_is_enforced() {
        let residual = |p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            out[0] = (p[0] - 1.0).powi(2) + 1.0;
            out[1] = p[0].sin();
            Ok(())
        };
        let mut options = LmOptions::for_params(1);
        options.max_nfev = 3;
        let out = levenberg_marquardt(residual, 2, &[5.0], None, &options).unwrap();
        assert_eq!(out.termination, Termination::MaxNfev(3));
        assert!(!out.termination.converged());
    }

    #[test]
    fn tiny_parameter_scales_converge() {
        // k lives around 1e-10; the rate seen by the data is k·1e9.
        let t: Vec<f64> = (1..10).map(|i| i as f64).collect();
        let y: Vec<f64> = t.iter().map(|t| (-0.5 * t).exp()).collect();
        let residual = |p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            for (i, (t, y)) in t.iter().zip(&y).enumerate() {
                out[i] = ((-p[0] * 1e9 * t).exp() - y) / 1e-3;
            }
            Ok(())
        };
        let bounds = Bounds::new(vec![1e-10], vec![1e-9]);
        let out = levenberg_marquardt(residual, t.len(), &[3e-10], Some(&bounds), &LmOptions::for_params(1)).unwrap();
        assert!(out.termination.converged(), "{}", out.termination);
        assert!((out.x[0] - 5e-10).abs() < 1e-14, "{:?}", out.x);
    }

    #[test]
    fn residual_errors_abort() {
        let residual = |p: &[f64], out: &mut [f64]| -> Result<(), FitError> {
            if p[0] != 1.0 {
                return Err(FitError::ModelInvalid("boom".into()));
            }
            out[0] = 1.0;
            Ok(())
        };
        let err = levenberg_marquardt(residual, 1, &[1.0], None, &LmOptions::for_params(1)).unwrap_err();
        assert!(matches!(err, FitError::ModelInvalid(_)));
    }
}
