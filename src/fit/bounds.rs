//! Box constraints on the parameter vector.
//!
//! Two ways of honouring `[min, max]`:
//!
//! - the sine transform `x = min + (sin u + 1)(max − min)/2`, which lets an
//!   unconstrained optimiser work in `u`
//! - projection (clamping) in `x` itself

use crate::domain::ParameterSet;

/// Fraction of the interval width below which `|x|` no longer scales the
/// finite-difference step.
const FD_WIDTH_FLOOR: f64 = 1e-6;

/// Per-parameter closed intervals.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        debug_assert_eq!(lower.len(), upper.len());
        Self { lower, upper }
    }

    pub fn from_parameters(params: &ParameterSet) -> Self {
        Self::new(
            params.iter().map(|p| p.min).collect(),
            params.iter().map(|p| p.max).collect(),
        )
    }

    /// Clamp `x` into the box in place.
    pub fn project(&self, x: &mut [f64]) {
        for ((v, lo), hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.clamp(*lo, *hi);
        }
    }

    /// Forward-difference step for coordinate `j` at `x` that stays in the box.
    ///
    /// The step is relative to `|x|`, with a floor tied to the interval width
    /// for `x` near zero, and never longer than half the width. It points
    /// backward only when the forward side has no room for it.
    pub fn fd_step(&self, j: usize, x: f64) -> f64 {
        let (lo, hi) = (self.lower[j], self.upper[j]);
        let width = hi - lo;
        let scale = x.abs().max(FD_WIDTH_FLOOR * width);
        let h = (f64::EPSILON.sqrt() * scale).min(0.5 * width);
        if x + h <= hi || x - lo < hi - x { h } else { -h }
    }

    /// Internal coordinates for the sine transform.
    pub fn to_internal(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.lower)
            .zip(&self.upper)
            .map(|((v, lo), hi)| {
                let s = (2.0 * (v - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0);
                s.asin()
            })
            .collect()
    }

    /// External coordinates from internal ones; always inside the box.
    pub fn to_external(&self, u: &[f64]) -> Vec<f64> {
        let mut x: Vec<f64> = u
            .iter()
            .zip(&self.lower)
            .zip(&self.upper)
            .map(|((u, lo), hi)| lo + (u.sin() + 1.0) * (hi - lo) / 2.0)
            .collect();
        // Rounding can push `lo + (hi − lo)` past `hi`.
        self.project(&mut x);
        x
    }

    /// Indices of parameters sitting on a bound while the gradient `g` of the
    /// sum of squares says moving inward would lower it.
    pub fn pinned(&self, x: &[f64], g: &[f64]) -> Vec<usize> {
        (0..x.len())
            .filter(|&i| {
                let tol = 1e-6 * (self.upper[i] - self.lower[i]);
                (x[i] - self.lower[i] <= tol && g[i] < 0.0)
                    || (self.upper[i] - x[i] <= tol && g[i] > 0.0)
            })
            .collect()
    }

    /// Whether coordinate `i` is held at a bound by an outward-pointing descent direction.
    pub fn blocks(&self, i: usize, x: f64, g: f64) -> bool {
        (x <= self.lower[i] && g > 0.0) || (x >= self.upper[i] && g < 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sine_transform_round_trips_inside_the_box() {
        let b = Bounds::new(vec![0.4, -1.0], vec![0.6, 3.0]);
        let x = [0.5, 2.0];
        let back = b.to_external(&b.to_internal(&x));
        assert!((back[0] - 0.5).abs() < 1e-14);
        assert!((back[1] - 2.0).abs() < 1e-14);

        // Any internal value maps into the box.
        for u in [-10.0, -1.3, 0.0, 2.2, 40.0] {
            let x = b.to_external(&[u, u]);
            assert!((0.4..=0.6).contains(&x[0]));
            assert!((-1.0..=3.0).contains(&x[1]));
        }
    }

    #[test]
    fn pinned_needs_inward_descent() {
        let b = Bounds::new(vec![0.4], vec![0.6]);
        assert_eq!(b.pinned(&[0.6], &[1.0]), vec![0]);
        assert!(b.pinned(&[0.6], &[-1.0]).is_empty());
        assert_eq!(b.pinned(&[0.4], &[-2.0]), vec![0]);
        assert!(b.pinned(&[0.5], &[1.0]).is_empty());
    }

    #[test]
    fn steps_stay_inside() {
        let b = Bounds::new(vec![0.0], vec![1.0]);
        let h = f64::EPSILON.sqrt();
        assert_eq!(b.fd_step(0, 1.0), -h);
        assert_eq!(b.fd_step(0, 0.5), 0.5 * h);
        let mut x = [1.5];
        b.project(&mut x);
        assert_eq!(x, [1.0]);
    }

    #[test]
    fn steps_scale_with_tiny_boxes() {
        let b = Bounds::new(vec![1e-10, -1.0, 0.4], vec![1e-9, 1.0, 0.4 + 1e-9]);
        for (x, expect) in [(1e-10, 1e-10), (3e-10, 3e-10), (1e-9, 1e-9)] {
            let h = b.fd_step(0, x);
            assert!((h.abs() / (f64::EPSILON.sqrt() * expect) - 1.0).abs() < 1e-12);
            assert!((1e-10..=1e-9).contains(&(x + h)), "x = {x}, h = {h}");
        }

        // At zero the width sets the scale.
        let h = b.fd_step(1, 0.0);
        assert!(h > 0.0 && h < 1e-12);

        // A box narrower than the relative step caps it at half the width.
        let hi = 0.4 + 1e-9;
        for x in [0.4, hi] {
            let h = b.fd_step(2, x);
            assert!(h.abs() <= 0.5 * (hi - 0.4));
            assert!(x + h >= 0.4 && x + h <= hi, "x = {x}, h = {h}");
        }
    }

    proptest! {
        #[test]
        fn difference_points_stay_in_the_box(
            exponent in -12i32..4,
            rel_width in 1e-9f64..10.0,
            at in 0.0f64..=1.0,
        ) {
            let lo = 10f64.powi(exponent);
            let hi = lo * (1.0 + rel_width);
            prop_assume!(hi > lo);
            let b = Bounds::new(vec![lo], vec![hi]);
            let x = (lo + at * (hi - lo)).clamp(lo, hi);
            let h = b.fd_step(0, x);
            prop_assert!(h != 0.0);
            prop_assert!(x + h >= lo && x + h <= hi, "x = {}, h = {}", x, h);
        }
    }
}
