//! Automatic stiffness switching.
//!
//! Integration starts with Dormand–Prince. After each accepted step Hairer's
//! indicator `h·ρ` (ρ estimated from the last two stages) is compared with the
//! stability boundary 3.25; fifteen hits without six consecutive clean steps in
//! between switch the run to RODAS4 for good.

use super::explicit::ExplicitRk;
use super::rosenbrock::Rodas4;
use super::{Attempt, Rhs, Stepper};

const STIFF_BOUNDARY: f64 = 3.25;
const STIFF_HITS: usize = 15;
const CLEAN_RESET: usize = 6;

pub(crate) struct Switching {
    explicit: ExplicitRk,
    implicit: Rodas4,
    stiff: bool,
    hits: usize,
    clean: usize,
}

impl Switching {
    pub fn new(dim: usize) -> Self {
        Self {
            explicit: ExplicitRk::dormand_prince(dim),
            implicit: Rodas4::new(dim),
            stiff: false,
            hits: 0,
            clean: 0,
        }
    }

    #[cfg(test)]
    fn is_stiff(&self) -> bool {
        self.stiff
    }
}

impl Stepper for Switching {
    fn error_order(&self) -> usize {
        if self.stiff {
            self.implicit.error_order()
        } else {
            self.explicit.error_order()
        }
    }

    fn attempt(&mut self, rhs: &mut Rhs<'_>, t: f64, y: &[f64], f0: &[f64], h: f64) -> Attempt {
        if self.stiff {
            self.implicit.attempt(rhs, t, y, f0, h)
        } else {
            self.explicit.attempt(rhs, t, y, f0, h)
        }
    }

    fn accepted(&mut self, attempt: &Attempt, h: f64) {
        if self.stiff {
            self.implicit.accepted(attempt, h);
            return;
        }
        self.explicit.accepted(attempt, h);

        let Some(indicator) = attempt.stiffness else {
            return;
        };
        if indicator > STIFF_BOUNDARY {
            self.clean = 0;
            self.hits += 1;
            if self.hits >= STIFF_HITS {
                log::debug!("Problem looks stiff (h·ρ = {indicator:.2}); switching to Rosenbrock.");
                self.stiff = true;
            }
        } else {
            self.clean += 1;
            if self.clean == CLEAN_RESET {
                self.hits = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ode::SolverOptions;
    use crate::ode::control::integrate;

    #[test]
    fn switches_on_stiff_problem_only() {
        let opts = SolverOptions::new(1e-8, 1e-6);
        let t: Vec<f64> = (0..=5).map(|i| i as f64).collect();

        let mut stiff = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = -5.0e3 * (y[0] - 1.0);
        let mut rhs = Rhs::new(&mut stiff);
        let mut stepper = Switching::new(1);
        let sol = integrate(&mut stepper, &mut rhs, &t, &[0.0], &opts);
        assert!(stepper.is_stiff());
        assert!((sol.y[5][0] - 1.0).abs() < 1e-6);

        let mut mild = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = -0.3 * y[0];
        let mut rhs = Rhs::new(&mut mild);
        let mut stepper = Switching::new(1);
        integrate(&mut stepper, &mut rhs, &t, &[1.0], &opts);
        assert!(!stepper.is_stiff());
    }
}
