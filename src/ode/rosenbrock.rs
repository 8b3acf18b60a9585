//! Six-stage L-stable Rosenbrock method of order 4 with an embedded order-3
//! solution (RODAS4, Hairer & Wanner's coefficients).
//!
//! With `γ = 1/4`, `J ≈ ∂f/∂y` and `f_t ≈ ∂f/∂t` at the step's start, each stage solves
//!
//! ```text
//! (I/(γh) − J) k_s = f(t + c_s h, y + Σ a_sj k_j) + h d_s f_t + Σ (g_sj / h) k_j
//! ```
//!
//! The order-3 solution is `y + Σ_{j<6} a_6j k_j`; the last stage adds `k₆`
//! for order 4, so `k₆` itself is the error estimate. `J` and `f_t` are
//! forward-difference approximations, reused across rejected attempts from the
//! same point; one LU factorisation serves all six stages.

use nalgebra::{DMatrix, DVector};

use super::{Attempt, Rhs, Stepper};
use crate::math::{fd_step, forward_jacobian};

const STAGES: usize = 6;
const GAMMA: f64 = 0.25;

const C: [f64; STAGES] = [0.0, 0.386, 0.21, 0.63, 1.0, 1.0];
const D: [f64; STAGES] = [0.25, -0.1043, 0.1035, -0.0362, 0.0, 0.0];

const A: [[f64; STAGES - 1]; STAGES] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.544, 0.0, 0.0, 0.0, 0.0],
    [0.9466785280815826, 0.2557011698983284, 0.0, 0.0, 0.0],
    [3.314825187068521, 2.896124015972201, 0.9986419139977817, 0.0, 0.0],
    [1.221224509226641, 6.019134481288629, 12.53708332932087, -0.687886036105895, 0.0],
    [1.221224509226641, 6.019134481288629, 12.53708332932087, -0.687886036105895, 1.0],
];

const G: [[f64; STAGES - 1]; STAGES] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [-5.6688, 0.0, 0.0, 0.0, 0.0],
    [-2.430093356833875, -0.2063599157091915, 0.0, 0.0, 0.0],
    [-0.1073529058151375, -9.594562251023355, -20.47028614809616, 0.0, 0.0],
    [7.496443313967647, -10.24680431464352, -33.99990352819905, 11.7089089320616, 0.0],
    [8.083246795921522, -7.981132988064893, -31.52159432874371, 16.31930543123136, -6.058818238834054],
];

pub(crate) struct Rodas4 {
    dim: usize,
    jac: Option<DMatrix<f64>>,
    ft: Vec<f64>,
    ys: Vec<f64>,
    fs: Vec<f64>,
}

impl Rodas4 {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            jac: None,
            ft: vec![0.0; dim],
            ys: vec![0.0; dim],
            fs: vec![0.0; dim],
        }
    }

    /// Build `J` and `f_t` at `(t, y)` unless cached; `false` if `f` went non-finite.
    fn ensure_jacobian(&mut self, rhs: &mut Rhs<'_>, t: f64, y: &[f64], f0: &[f64]) -> bool {
        if self.jac.is_some() {
            return true;
        }

        let steps: Vec<f64> = y.iter().map(|v| fd_step(*v)).collect();
        let Ok(jac) = forward_jacobian(y, f0, &steps, |yp, out| {
            if rhs.eval(t, yp, out) { Ok(()) } else { Err(()) }
        }) else {
            return false;
        };

        let dt = (t + fd_step(t)) - t;
        if !rhs.eval(t + dt, y, &mut self.ft) {
            return false;
        }
        for (ft, f) in self.ft.iter_mut().zip(f0) {
            *ft = (*ft - f) / dt;
        }

        self.jac = Some(jac);
        true
    }
}

impl Stepper for Rodas4 {
    fn error_order(&self) -> usize {
        3
    }

    fn attempt(&mut self, rhs: &mut Rhs<'_>, t: f64, y: &[f64], f0: &[f64], h: f64) -> Attempt {
        let dim = self.dim;
        if !self.ensure_jacobian(rhs, t, y, f0) {
            return Attempt::non_finite(dim);
        }
        let Some(jac) = self.jac.as_ref() else {
            return Attempt::non_finite(dim);
        };

        let lu = (DMatrix::identity(dim, dim) / (GAMMA * h) - jac).lu();

        let mut k: Vec<DVector<f64>> = Vec::with_capacity(STAGES);
        for s in 0..STAGES {
            if s > 0 {
                for d in 0..dim {
                    self.ys[d] = y[d] + (0..s).map(|j| A[s][j] * k[j][d]).sum::<f64>();
                }
                if !rhs.eval(t + C[s] * h, &self.ys, &mut self.fs) {
                    return Attempt::non_finite(dim);
                }
            }
            let f = if s == 0 { f0 } else { self.fs.as_slice() };
            let b = DVector::from_fn(dim, |d, _| {
                let coupling: f64 = (0..s).map(|j| G[s][j] * k[j][d]).sum();
                f[d] + h * D[s] * self.ft[d] + coupling / h
            });
            let Some(ks) = lu.solve(&b) else {
                return Attempt::non_finite(dim);
            };
            k.push(ks);
        }

        let last = &k[STAGES - 1];
        let y_new = (0..dim).map(|d| self.ys[d] + last[d]).collect();
        let err = last.iter().copied().collect();

        Attempt {
            y_new,
            err,
            f_new: None,
            non_finite: false,
            stiffness: None,
        }
    }

    fn accepted(&mut self, _attempt: &Attempt, _h: f64) {
        self.jac = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_step(f: &mut dyn FnMut(f64, &[f64], &mut [f64]), t: f64, y: f64, h: f64) -> Attempt {
        let mut f0 = [0.0];
        f(t, &[y], &mut f0);
        let mut rhs = Rhs::new(f);
        Rodas4::new(1).attempt(&mut rhs, t, &[y], &f0, h)
    }

    #[test]
    fn huge_steps_stay_bounded_on_stiff_decay() {
        // L-stability: y' = −1e6·y with h = 1 must damp, not explode.
        let mut f = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = -1.0e6 * y[0];
        let a = one_step(&mut f, 0.0, 1.0, 1.0);
        assert!(!a.non_finite);
        assert!(a.y_new[0].abs() < 1e-4);
        let b = one_step(&mut f, 0.0, 1.0, 10.0);
        assert!(b.y_new[0].abs() < a.y_new[0].abs());
    }

    #[test]
    fn fourth_order_on_linear_problem() {
        let mut f = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = -y[0];
        let coarse = one_step(&mut f, 0.0, 1.0, 0.1);
        let fine = one_step(&mut f, 0.0, 1.0, 0.05);

        // Local error is O(h⁵), the embedded estimate O(h⁴).
        let local = (coarse.y_new[0] - (-0.1f64).exp()).abs() / (fine.y_new[0] - (-0.05f64).exp()).abs();
        assert!(local > 20.0 && local < 45.0, "{local}");
        let estimate = coarse.err[0].abs() / fine.err[0].abs();
        assert!(estimate > 10.0 && estimate < 22.0, "{estimate}");
        assert!((coarse.y_new[0] - (-0.1f64).exp()).abs() < 1e-8);
    }

    #[test]
    fn time_dependence_enters_through_f_t() {
        let mut f = |t: f64, _y: &[f64], dy: &mut [f64]| dy[0] = t.cos();
        let a = one_step(&mut f, 0.3, 0.0, 0.2);
        let exact = 0.5f64.sin() - 0.3f64.sin();
        assert!((a.y_new[0] - exact).abs() < 1e-8, "{} vs {exact}", a.y_new[0]);
    }
}
