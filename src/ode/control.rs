//! Adaptive step-size driver shared by every scheme.
//!
//! - mixed error norm `‖e_i / (atol + rtol·max(|y_i|, |ŷ_i|))‖_rms`
//! - Hairer's starting step heuristic
//! - steps are clipped so that every output time is hit exactly
//! - a step producing non-finite values is retried with a quarter of the size;
//!   if the step size collapses that way the run is reported as diverged

use super::{Attempt, Rhs, Solution, SolveStatus, SolverOptions, Stepper};

pub const DEFAULT_MAX_STEPS: usize = 100_000;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
const NON_FINITE_FACTOR: f64 = 0.25;

/// Run `stepper` across all output times.
pub(crate) fn integrate<S: Stepper>(
    stepper: &mut S,
    rhs: &mut Rhs<'_>,
    t_eval: &[f64],
    y0: &[f64],
    options: &SolverOptions,
) -> Solution {
    let dim = y0.len();
    let t0 = t_eval[0];
    let t_end = t_eval[t_eval.len() - 1];
    let span = t_end - t0;

    let mut out_t = vec![t0];
    let mut out_y = vec![y0.to_vec()];
    let mut accepted = 0usize;
    let mut rejected = 0usize;

    let finish = |out_t: Vec<f64>,
                  out_y: Vec<Vec<f64>>,
                  status: SolveStatus,
                  nfev: usize,
                  accepted: usize,
                  rejected: usize| Solution {
        t: out_t,
        y: out_y,
        status,
        nfev,
        accepted,
        rejected,
    };

    if t_eval.len() == 1 {
        return finish(out_t, out_y, SolveStatus::Completed, rhs.nfev, 0, 0);
    }

    let mut t = t0;
    let mut y = y0.to_vec();
    let mut f0 = vec![0.0; dim];
    if !rhs.eval(t, &y, &mut f0) {
        let (out_t, out_y) = fill_diverged(out_t, out_y, t_eval, dim);
        return finish(out_t, out_y, SolveStatus::Diverged { t }, rhs.nfev, 0, 0);
    }

    let mut h = initial_step(stepper, rhs, t, &y, &f0, span, options);
    let mut step_rejected = false;
    let mut last_non_finite = false;

    for &target in &t_eval[1..] {
        while t < target {
            if accepted + rejected >= options.max_steps {
                let message = format!(
                    "maximum number of steps ({}) exceeded at t={t}",
                    options.max_steps
                );
                return finish(out_t, out_y, SolveStatus::Truncated { message }, rhs.nfev, accepted, rejected);
            }

            let min_step = 10.0 * f64::EPSILON * t.abs().max(span);
            if h < min_step {
                if last_non_finite {
                    let (out_t, out_y) = fill_diverged(out_t, out_y, t_eval, dim);
                    return finish(out_t, out_y, SolveStatus::Diverged { t }, rhs.nfev, accepted, rejected);
                }
                let message = format!("required step size is less than spacing between numbers at t={t}");
                return finish(out_t, out_y, SolveStatus::Truncated { message }, rhs.nfev, accepted, rejected);
            }

            let remaining = target - t;
            let landing = h * 1.1 >= remaining;
            let h_try = if landing { remaining } else { h };

            let attempt = stepper.attempt(rhs, t, &y, &f0, h_try);
            let err = if attempt.non_finite {
                f64::INFINITY
            } else {
                error_norm(&attempt.err, &y, &attempt.y_new, options)
            };

            if attempt.non_finite || !err.is_finite() {
                rejected += 1;
                last_non_finite = true;
                step_rejected = true;
                h = h_try * NON_FINITE_FACTOR;
                continue;
            }
            last_non_finite = false;

            let exponent = -1.0 / (stepper.error_order() as f64 + 1.0);
            if err <= 1.0 {
                let mut factor = if err == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * err.powf(exponent)).min(MAX_FACTOR)
                };
                if step_rejected {
                    factor = factor.min(1.0);
                }

                stepper.accepted(&attempt, h_try);
                accepted += 1;
                step_rejected = false;

                t = if landing { target } else { t + h_try };
                let Attempt { y_new, f_new, .. } = attempt;
                y = y_new;
                match f_new {
                    Some(f_new) => f0 = f_new,
                    None => {
                        if !rhs.eval(t, &y, &mut f0) {
                            let (out_t, out_y) = fill_diverged(out_t, out_y, t_eval, dim);
                            return finish(out_t, out_y, SolveStatus::Diverged { t }, rhs.nfev, accepted, rejected);
                        }
                    }
                }

                // A step shortened to land on an output time says nothing about `h`.
                if !(landing && h_try < h) {
                    h = h_try * factor;
                }
            } else {
                rejected += 1;
                step_rejected = true;
                h = h_try * (SAFETY * err.powf(exponent)).max(MIN_FACTOR);
            }
        }

        out_t.push(target);
        out_y.push(y.clone());
    }

    finish(out_t, out_y, SolveStatus::Completed, rhs.nfev, accepted, rejected)
}

/// Pad the output with NaN states for every output time not yet produced.
fn fill_diverged(
    mut out_t: Vec<f64>,
    mut out_y: Vec<Vec<f64>>,
    t_eval: &[f64],
    dim: usize,
) -> (Vec<f64>, Vec<Vec<f64>>) {
    out_t.truncate(out_y.len());
    for &t in &t_eval[out_y.len()..] {
        out_t.push(t);
        out_y.push(vec![f64::NAN; dim]);
    }
    (out_t, out_y)
}

/// RMS of the scaled error vector.
pub(crate) fn error_norm(err: &[f64], y: &[f64], y_new: &[f64], options: &SolverOptions) -> f64 {
    let n = err.len() as f64;
    let sum: f64 = err
        .iter()
        .zip(y.iter().zip(y_new))
        .map(|(e, (a, b))| {
            let scale = options.atol + options.rtol * a.abs().max(b.abs());
            (e / scale).powi(2)
        })
        .sum();
    (sum / n).sqrt()
}

/// Hairer, Nørsett & Wanner's starting step heuristic.
fn initial_step<S: Stepper>(
    stepper: &S,
    rhs: &mut Rhs<'_>,
    t0: f64,
    y0: &[f64],
    f0: &[f64],
    span: f64,
    options: &SolverOptions,
) -> f64 {
    let scale: Vec<f64> = y0
        .iter()
        .map(|y| options.atol + options.rtol * y.abs())
        .collect();
    let rms = |v: &[f64]| -> f64 {
        let n = v.len() as f64;
        (v.iter().zip(&scale).map(|(x, s)| (x / s).powi(2)).sum::<f64>() / n).sqrt()
    };

    let d0 = rms(y0);
    let d1 = rms(f0);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 };
    let h0 = h0.min(span);

    let y1: Vec<f64> = y0.iter().zip(f0).map(|(y, f)| y + h0 * f).collect();
    let mut f1 = vec![0.0; y0.len()];
    if !rhs.eval(t0 + h0, &y1, &mut f1) {
        return h0;
    }
    let diff: Vec<f64> = f1.iter().zip(f0).map(|(a, b)| a - b).collect();
    let d2 = rms(&diff) / h0;

    let order = stepper.error_order() as f64 + 1.0;
    let h1 = if d1.max(d2) <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / order)
    };

    (100.0 * h0).min(h1).min(span)
}
