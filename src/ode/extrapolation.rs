//! Gragg–Bulirsch–Stoer extrapolation of fixed order eight.
//!
//! Each step runs Gragg's modified midpoint rule with 2, 4, 6 and 8 substeps and
//! extrapolates the results to zero substep length in powers of `h²`. The
//! diagonal entry `T₄₄` is eighth order; `T₄₄ − T₄₃` serves as the error
//! estimate.

use super::{Attempt, Rhs, Stepper};

const SEQUENCE: [usize; 4] = [2, 4, 6, 8];

pub(crate) struct Gbs {
    dim: usize,
    fz: Vec<f64>,
}

impl Gbs {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            fz: vec![0.0; dim],
        }
    }

    /// Smoothed modified midpoint rule over `[t, t + h]` with `n` substeps.
    fn midpoint(
        &mut self,
        rhs: &mut Rhs<'_>,
        t: f64,
        y: &[f64],
        f0: &[f64],
        h: f64,
        n: usize,
    ) -> Option<Vec<f64>> {
        let hs = h / n as f64;
        let mut z_prev = y.to_vec();
        let mut z_cur: Vec<f64> = y.iter().zip(f0).map(|(y, f)| y + hs * f).collect();

        for m in 1..n {
            if !rhs.eval(t + m as f64 * hs, &z_cur, &mut self.fz) {
                return None;
            }
            for d in 0..self.dim {
                let next = z_prev[d] + 2.0 * hs * self.fz[d];
                z_prev[d] = z_cur[d];
                z_cur[d] = next;
            }
        }

        if !rhs.eval(t + h, &z_cur, &mut self.fz) {
            return None;
        }
        Some(
            (0..self.dim)
                .map(|d| 0.5 * (z_cur[d] + z_prev[d] + hs * self.fz[d]))
                .collect(),
        )
    }
}

impl Stepper for Gbs {
    fn error_order(&self) -> usize {
        6
    }

    fn attempt(&mut self, rhs: &mut Rhs<'_>, t: f64, y: &[f64], f0: &[f64], h: f64) -> Attempt {
        let mut table: Vec<Vec<Vec<f64>>> = Vec::with_capacity(SEQUENCE.len());

        for (j, &n) in SEQUENCE.iter().enumerate() {
            let Some(first) = self.midpoint(rhs, t, y, f0, h, n) else {
                return Attempt::non_finite(self.dim);
            };
            let mut row = vec![first];
            for k in 1..=j {
                let ratio = (n as f64 / SEQUENCE[j - k] as f64).powi(2) - 1.0;
                let prev = &table[j - 1][k - 1];
                let cur = &row[k - 1];
                let next: Vec<f64> = cur
                    .iter()
                    .zip(prev)
                    .map(|(c, p)| c + (c - p) / ratio)
                    .collect();
                row.push(next);
            }
            table.push(row);
        }

        let last = &table[SEQUENCE.len() - 1];
        let best = &last[last.len() - 1];
        let lower = &last[last.len() - 2];
        let err = best.iter().zip(lower).map(|(a, b)| a - b).collect();

        Attempt {
            y_new: best.clone(),
            err,
            f_new: None,
            non_finite: false,
            stiffness: None,
        }
    }
}
