//! Embedded explicit Runge–Kutta pairs with the first-same-as-last property.
//!
//! The last stage of each tableau is evaluated at the new state, so a successful
//! step hands `f(t + h, y_new)` to the next step for free.

use super::{Attempt, Rhs, Stepper};

struct Tableau {
    c: &'static [f64],
    a: &'static [&'static [f64]],
    b: &'static [f64],
    /// Difference between the propagated and embedded weights.
    e: &'static [f64],
    error_order: usize,
    stiffness_check: bool,
}

static BOGACKI_SHAMPINE: Tableau = Tableau {
    c: &[0.0, 1.0 / 2.0, 3.0 / 4.0, 1.0],
    a: &[
        &[],
        &[1.0 / 2.0],
        &[0.0, 3.0 / 4.0],
        &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0],
    ],
    b: &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0, 0.0],
    e: &[5.0 / 72.0, -1.0 / 12.0, -1.0 / 9.0, 1.0 / 8.0],
    error_order: 2,
    stiffness_check: false,
};

static DORMAND_PRINCE: Tableau = Tableau {
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
        0.0,
    ],
    e: &[
        71.0 / 57600.0,
        0.0,
        -71.0 / 16695.0,
        71.0 / 1920.0,
        -17253.0 / 339200.0,
        22.0 / 525.0,
        -1.0 / 40.0,
    ],
    error_order: 4,
    stiffness_check: true,
};

/// Explicit embedded Runge–Kutta stepper.
pub(crate) struct ExplicitRk {
    tab: &'static Tableau,
    k: Vec<Vec<f64>>,
    ytmp: Vec<f64>,
    /// Input of the second-to-last stage, kept for the stiffness indicator.
    y_penultimate: Vec<f64>,
}

impl ExplicitRk {
    fn new(tab: &'static Tableau, dim: usize) -> Self {
        Self {
            tab,
            k: vec![vec![0.0; dim]; tab.c.len()],
            ytmp: vec![0.0; dim],
            y_penultimate: vec![0.0; dim],
        }
    }

    /// Bogacki–Shampine 3(2).
    pub fn bogacki_shampine(dim: usize) -> Self {
        Self::new(&BOGACKI_SHAMPINE, dim)
    }

    /// Dormand–Prince 5(4).
    pub fn dormand_prince(dim: usize) -> Self {
        Self::new(&DORMAND_PRINCE, dim)
    }
}

impl Stepper for ExplicitRk {
    fn error_order(&self) -> usize {
        self.tab.error_order
    }

    fn attempt(&mut self, rhs: &mut Rhs<'_>, t: f64, y: &[f64], f0: &[f64], h: f64) -> Attempt {
        let dim = y.len();
        let stages = self.tab.c.len();
        let last = stages - 1;
        self.k[0].copy_from_slice(f0);

        for i in 1..last {
            for d in 0..dim {
                let incr: f64 = self.tab.a[i]
                    .iter()
                    .zip(&self.k)
                    .map(|(a, k)| a * k[d])
                    .sum();
                self.ytmp[d] = y[d] + h * incr;
            }
            if i == last - 1 {
                self.y_penultimate.copy_from_slice(&self.ytmp);
            }
            if !rhs.eval(t + self.tab.c[i] * h, &self.ytmp, &mut self.k[i]) {
                return Attempt::non_finite(dim);
            }
        }

        let y_new: Vec<f64> = (0..dim)
            .map(|d| {
                let incr: f64 = self.tab.b.iter().zip(&self.k).map(|(b, k)| b * k[d]).sum();
                y[d] + h * incr
            })
            .collect();

        if !rhs.eval(t + h, &y_new, &mut self.k[last]) {
            return Attempt::non_finite(dim);
        }

        let err: Vec<f64> = (0..dim)
            .map(|d| h * self.tab.e.iter().zip(&self.k).map(|(e, k)| e * k[d]).sum::<f64>())
            .collect();

        let stiffness = self.tab.stiffness_check.then(|| {
            let mut num = 0.0;
            let mut den = 0.0;
            for d in 0..dim {
                num += (self.k[last][d] - self.k[last - 1][d]).powi(2);
                den += (y_new[d] - self.y_penultimate[d]).powi(2);
            }
            if den > 0.0 { h.abs() * (num / den).sqrt() } else { 0.0 }
        });

        Attempt {
            y_new,
            err,
            f_new: Some(self.k[last].clone()),
            non_finite: false,
            stiffness,
        }
    }
}
