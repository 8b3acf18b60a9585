//! The right-hand side contract.
//!
//! A model is anything that can evaluate `dx/dt = f(t, x, θ)` into a caller
//! owned buffer. Plain functions and closures with the matching signature
//! implement [`OdeRhs`] directly; expression-language files compile to
//! [`crate::models::ExprModel`].

use crate::domain::ParamMap;

pub trait OdeRhs {
    /// Write the derivative of every state component into `out`.
    ///
    /// `state` and `out` have the same length and order. Implementations must
    /// be pure: the same inputs always give the same output.
    fn eval(&mut self, t: f64, state: &[f64], params: ParamMap<'_>, out: &mut [f64]);

    /// Number of state components, when the model declares it.
    fn state_dim(&self) -> Option<usize> {
        None
    }

    /// Parameter names the model reads, when the model declares them.
    fn parameter_names(&self) -> Option<&[String]> {
        None
    }
}

impl<F> OdeRhs for F
where
    F: FnMut(f64, &[f64], ParamMap<'_>, &mut [f64]),
{
    fn eval(&mut self, t: f64, state: &[f64], params: ParamMap<'_>, out: &mut [f64]) {
        self(t, state, params, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decay(_t: f64, y: &[f64], p: ParamMap<'_>, dy: &mut [f64]) {
        dy[0] = -p["k"] * y[0];
    }

    #[test]
    fn functions_are_right_hand_sides() {
        let names = vec!["k".to_string()];
        let mut f = decay;
        let mut out = [0.0];
        f.eval(0.0, &[2.0], ParamMap::new(&names, &[0.5]), &mut out);
        assert_eq!(out[0], -1.0);
        assert_eq!(f.state_dim(), None);
    }
}
