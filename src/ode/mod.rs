//! Deterministic initial-value problem solvers.
//!
//! [`solve_ivp`] integrates `dy/dt = f(t, y)` and samples the solution at the
//! requested output times. Every method steps exactly onto each output time,
//! so no interpolation is involved and results are bit-for-bit reproducible.
//!
//! | Tag      | Scheme                                                    |
//! |----------|-----------------------------------------------------------|
//! | `RK23`   | Bogacki–Shampine 3(2)                                     |
//! | `RK45`   | Dormand–Prince 5(4)                                       |
//! | `DOP853` | Gragg–Bulirsch–Stoer extrapolation, order 8               |
//! | `Radau`  | RODAS4 Rosenbrock 4(3), L-stable                          |
//! | `BDF`    | RODAS4 Rosenbrock 4(3), L-stable                          |
//! | `LSODA`  | Dormand–Prince, switching to RODAS4 once the problem is stiff |

use crate::domain::IntegrationMethod;

mod control;
mod explicit;
mod extrapolation;
mod rosenbrock;
mod switching;

pub use control::DEFAULT_MAX_STEPS;

/// Errors raised before integration starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OdeError {
    #[error("initial state is empty")]
    EmptyState,
    #[error("initial state contains non-finite values")]
    NonFiniteState,
    #[error("output times must be finite and strictly increasing")]
    BadTimes,
    #[error("tolerances must be finite and positive (atol={atol}, rtol={rtol})")]
    BadTolerance { atol: f64, rtol: f64 },
}

/// Solver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub atol: f64,
    pub rtol: f64,
    pub max_steps: usize,
}

impl SolverOptions {
    pub fn new(atol: f64, rtol: f64) -> Self {
        Self {
            atol,
            rtol,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// How an integration ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveStatus {
    /// Every output time was reached.
    Completed,
    /// The derivative became non-finite at `t`; remaining samples are NaN.
    Diverged { t: f64 },
    /// The solver gave up early; fewer samples than requested were produced.
    Truncated { message: String },
}

/// Sampled solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Output times actually reached.
    pub t: Vec<f64>,
    /// One state vector per entry of `t`.
    pub y: Vec<Vec<f64>>,
    pub status: SolveStatus,
    /// Right-hand side evaluations (Jacobian columns included).
    pub nfev: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl Solution {
    pub fn message(&self) -> String {
        match &self.status {
            SolveStatus::Completed => "integration completed".to_string(),
            SolveStatus::Diverged { t } => format!("derivative became non-finite at t={t}"),
            SolveStatus::Truncated { message } => message.clone(),
        }
    }
}

/// Right-hand side wrapper that counts evaluations and notices non-finite output.
pub(crate) struct Rhs<'a> {
    f: &'a mut dyn FnMut(f64, &[f64], &mut [f64]),
    pub nfev: usize,
}

impl<'a> Rhs<'a> {
    pub fn new(f: &'a mut dyn FnMut(f64, &[f64], &mut [f64])) -> Self {
        Self { f, nfev: 0 }
    }

    /// Evaluate `f(t, y)` into `out`; returns `false` if any component is non-finite.
    pub fn eval(&mut self, t: f64, y: &[f64], out: &mut [f64]) -> bool {
        self.nfev += 1;
        (self.f)(t, y, out);
        out.iter().all(|v| v.is_finite())
    }
}

/// Outcome of one trial step from `(t, y)` with size `h`.
pub(crate) struct Attempt {
    pub y_new: Vec<f64>,
    /// Local error estimate (same units as `y`).
    pub err: Vec<f64>,
    /// `f(t + h, y_new)` when the scheme already computed it.
    pub f_new: Option<Vec<f64>>,
    /// Set when a stage produced non-finite values.
    pub non_finite: bool,
    /// Hairer's `h·ρ` stiffness indicator, for schemes that provide it.
    pub stiffness: Option<f64>,
}

impl Attempt {
    pub fn non_finite(dim: usize) -> Self {
        Self {
            y_new: vec![f64::NAN; dim],
            err: vec![f64::INFINITY; dim],
            f_new: None,
            non_finite: true,
            stiffness: None,
        }
    }
}

/// One-step scheme driven by [`control::integrate`].
pub(crate) trait Stepper {
    /// Order `q` of the error estimate; step factors scale as `err^(-1/(q+1))`.
    fn error_order(&self) -> usize;

    /// Attempt a step. `f0` is `f(t, y)`.
    fn attempt(&mut self, rhs: &mut Rhs<'_>, t: f64, y: &[f64], f0: &[f64], h: f64) -> Attempt;

    /// Called after a step has been accepted.
    fn accepted(&mut self, _attempt: &Attempt, _h: f64) {}
}

/// Integrate `f` from `t_eval[0]` with state `y0`, sampling at every `t_eval[i]`.
pub fn solve_ivp(
    method: IntegrationMethod,
    f: &mut dyn FnMut(f64, &[f64], &mut [f64]),
    t_eval: &[f64],
    y0: &[f64],
    options: &SolverOptions,
) -> Result<Solution, OdeError> {
    if y0.is_empty() {
        return Err(OdeError::EmptyState);
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(OdeError::NonFiniteState);
    }
    if t_eval.is_empty()
        || t_eval.iter().any(|t| !t.is_finite())
        || t_eval.windows(2).any(|w| w[1] <= w[0])
    {
        return Err(OdeError::BadTimes);
    }
    let SolverOptions { atol, rtol, .. } = *options;
    if !(atol.is_finite() && rtol.is_finite() && atol > 0.0 && rtol > 0.0) {
        return Err(OdeError::BadTolerance { atol, rtol });
    }

    let mut rhs = Rhs::new(f);
    let dim = y0.len();
    let solution = match method {
        IntegrationMethod::Rk23 => {
            control::integrate(&mut explicit::ExplicitRk::bogacki_shampine(dim), &mut rhs, t_eval, y0, options)
        }
        IntegrationMethod::Rk45 => {
            control::integrate(&mut explicit::ExplicitRk::dormand_prince(dim), &mut rhs, t_eval, y0, options)
        }
        IntegrationMethod::Dop853 => {
            control::integrate(&mut extrapolation::Gbs::new(dim), &mut rhs, t_eval, y0, options)
        }
        IntegrationMethod::Radau | IntegrationMethod::Bdf => {
            control::integrate(&mut rosenbrock::Rodas4::new(dim), &mut rhs, t_eval, y0, options)
        }
        IntegrationMethod::Lsoda => {
            control::integrate(&mut switching::Switching::new(dim), &mut rhs, t_eval, y0, options)
        }
    };
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decay(k: f64) -> impl FnMut(f64, &[f64], &mut [f64]) {
        move |_t, y, dy| dy[0] = -k * y[0]
    }

    #[test]
    fn every_method_matches_exponential_decay() {
        let t: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let opts = SolverOptions::new(1e-12, 1e-10);
        for method in IntegrationMethod::ALL {
            let mut f = decay(0.5);
            let sol = solve_ivp(method, &mut f, &t, &[1.0], &opts).unwrap();
            assert_eq!(sol.status, SolveStatus::Completed, "{method}");
            assert_eq!(sol.t, t);
            for (ti, yi) in t.iter().zip(&sol.y) {
                let exact = (-0.5 * ti).exp();
                assert!((yi[0] - exact).abs() < 1e-8, "{method} at t={ti}: {} vs {exact}", yi[0]);
            }
        }
    }

    #[test]
    fn integration_is_deterministic() {
        let t = [0.0, 0.5, 2.0, 7.5];
        let opts = SolverOptions::new(1e-9, 1e-6);
        for method in IntegrationMethod::ALL {
            let mut f1 = decay(1.3);
            let mut f2 = decay(1.3);
            let a = solve_ivp(method, &mut f1, &t, &[2.0], &opts).unwrap();
            let b = solve_ivp(method, &mut f2, &t, &[2.0], &opts).unwrap();
            assert_eq!(a, b, "{method}");
        }
    }

    #[test]
    fn bimolecular_reaction_conserves_mass() {
        // A + B -> P with rate k·a·b.
        let mut f = |_t: f64, y: &[f64], dy: &mut [f64]| {
            let rate = 0.8 * y[0] * y[1];
            dy[0] = -rate;
            dy[1] = -rate;
            dy[2] = rate;
        };
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let opts = SolverOptions::new(1e-9, 1e-6);
        for method in IntegrationMethod::ALL {
            let sol = solve_ivp(method, &mut f, &t, &[1.0, 0.6, 0.0], &opts).unwrap();
            for y in &sol.y {
                assert!((y[0] + y[2] - 1.0).abs() < 1e-6, "{method}");
                assert!((y[1] + y[2] - 0.6).abs() < 1e-6, "{method}");
            }
        }
    }

    #[test]
    fn stiff_tags_meet_tight_tolerances() {
        // The demo plate's reaction: a = b = 5, k = 2e-4, one hour in 60 s cycles.
        let k = 2.0e-4;
        let mut f = |_t: f64, y: &[f64], dy: &mut [f64]| {
            let rate = k * y[0] * y[1];
            dy[0] = -rate;
            dy[1] = -rate;
            dy[2] = rate;
        };
        let t: Vec<f64> = (0..61).map(|i| i as f64 * 60.0).collect();
        let opts = SolverOptions::new(1e-12, 1e-10);
        for method in [IntegrationMethod::Radau, IntegrationMethod::Bdf] {
            let sol = solve_ivp(method, &mut f, &t, &[5.0, 5.0, 0.0], &opts).unwrap();
            assert_eq!(sol.status, SolveStatus::Completed, "{method}: {}", sol.message());
            assert_eq!(sol.y.len(), 61);
            assert!(sol.accepted + sol.rejected < 2_000, "{method}: {} steps", sol.accepted);
            for (ti, yi) in t.iter().zip(&sol.y) {
                let exact = 5.0 - 5.0 / (1.0 + k * 5.0 * ti);
                assert!((yi[2] - exact).abs() < 1e-8, "{method} at t={ti}: {} vs {exact}", yi[2]);
            }
        }
    }

    #[test]
    fn stiff_problem_is_cheap_for_implicit_methods() {
        // Robertson-like fast/slow pair: y0 relaxes onto cos(t) at rate 1e4.
        let mut f = |t: f64, y: &[f64], dy: &mut [f64]| {
            dy[0] = -1.0e4 * (y[0] - t.cos());
        };
        let t: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        let opts = SolverOptions::new(1e-8, 1e-6);

        let stiff = solve_ivp(IntegrationMethod::Radau, &mut f, &t, &[0.0], &opts).unwrap();
        let auto = solve_ivp(IntegrationMethod::Lsoda, &mut f, &t, &[0.0], &opts).unwrap();
        let explicit = solve_ivp(IntegrationMethod::Rk45, &mut f, &t, &[0.0], &opts).unwrap();

        for sol in [&stiff, &auto, &explicit] {
            assert_eq!(sol.status, SolveStatus::Completed);
            let last = sol.y.last().unwrap()[0];
            assert!((last - 10f64.cos()).abs() < 1e-3, "{last}");
        }
        assert!(stiff.nfev < explicit.nfev);
        assert!(auto.nfev < explicit.nfev);
    }

    #[test]
    fn blow_up_is_reported_as_divergence() {
        // y' = y², y(0) = 1 blows up at t = 1.
        let mut f = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = y[0] * y[0];
        let t = [0.0, 0.5, 2.0, 3.0];
        let opts = SolverOptions::new(1e-8, 1e-6);
        let sol = solve_ivp(IntegrationMethod::Rk45, &mut f, &t, &[1.0], &opts).unwrap();
        match sol.status {
            SolveStatus::Diverged { .. } | SolveStatus::Truncated { .. } => {}
            SolveStatus::Completed => panic!("blow-up went unnoticed"),
        }
        assert!((sol.y[1][0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_bad_inputs() {
        let mut f = decay(1.0);
        let opts = SolverOptions::new(1e-8, 1e-6);
        let m = IntegrationMethod::Rk45;
        assert_eq!(solve_ivp(m, &mut f, &[0.0, 1.0], &[], &opts), Err(OdeError::EmptyState));
        assert_eq!(solve_ivp(m, &mut f, &[1.0, 1.0], &[1.0], &opts), Err(OdeError::BadTimes));
        assert!(solve_ivp(m, &mut f, &[0.0, 1.0], &[1.0], &SolverOptions::new(0.0, 1e-6)).is_err());
    }

    #[test]
    fn step_cap_truncates() {
        let mut f = |t: f64, _y: &[f64], dy: &mut [f64]| dy[0] = (50.0 * t).sin();
        let opts = SolverOptions {
            atol: 1e-12,
            rtol: 1e-12,
            max_steps: 5,
        };
        let sol = solve_ivp(IntegrationMethod::Rk23, &mut f, &[0.0, 10.0, 20.0], &[0.0], &opts).unwrap();
        assert!(matches!(sol.status, SolveStatus::Truncated { .. }));
        assert!(sol.t.len() < 3);
        assert_eq!(sol.t.len(), sol.y.len());
    }
}
