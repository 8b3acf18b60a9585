//! Model evaluator: integrates the RHS for a parameter vector and projects
//! the product component.

use nalgebra::DMatrix;

use super::OdeRhs;
use crate::domain::{IntegrationSettings, ParamMap, ParameterSet};
use crate::error::FitError;
use crate::ode::{SolveStatus, SolverOptions, solve_ivp};

/// Integrated trajectory, one row per state component and one column per
/// output time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub states: DMatrix<f64>,
    /// `true` when the derivative went non-finite; affected columns are NaN.
    pub diverged: bool,
    pub nfev: usize,
}

impl Trajectory {
    /// The last state component (the product), one value per output time.
    pub fn product(&self) -> Vec<f64> {
        let last = self.states.nrows() - 1;
        self.states.row(last).iter().copied().collect()
    }
}

/// Owns the current parameter values and everything needed to integrate.
pub struct ModelEvaluator<R> {
    rhs: R,
    params: ParameterSet,
    values: Vec<f64>,
    y0: Vec<f64>,
    time: Vec<f64>,
    max_value: f64,
    settings: IntegrationSettings,
    options: SolverOptions,
}

impl<R: OdeRhs> ModelEvaluator<R> {
    pub fn new(
        rhs: R,
        params: ParameterSet,
        y0: Vec<f64>,
        max_value: f64,
        time: Vec<f64>,
        settings: IntegrationSettings,
    ) -> Result<Self, FitError> {
        if params.is_empty() {
            return Err(FitError::ModelInvalid("model has no parameters".to_string()));
        }
        if y0.is_empty() || y0.iter().any(|v| !v.is_finite()) {
            return Err(FitError::ModelInvalid("y0 must be a non-empty list of finite values".to_string()));
        }
        if let Some(dim) = rhs.state_dim()
            && dim != y0.len()
        {
            return Err(FitError::ModelInvalid(format!(
                "model has {dim} state components but y0 has {} values",
                y0.len()
            )));
        }
        if let Some(names) = rhs.parameter_names()
            && names != params.names()
        {
            return Err(FitError::ModelInvalid(format!(
                "model was compiled for parameters [{}] but the fit has [{}]",
                names.join(", "),
                params.names().join(", ")
            )));
        }
        if !(max_value.is_finite() && max_value > 0.0) {
            return Err(FitError::ModelInvalid(format!("max_value must be positive, got {max_value}")));
        }
        if time.len() < 2 {
            return Err(FitError::ModelInvalid("need at least two output times".to_string()));
        }

        let values = params.initial_values();
        let options = SolverOptions::new(settings.atol, settings.rtol);
        Ok(Self {
            rhs,
            params,
            values,
            y0,
            time,
            max_value,
            settings,
            options,
        })
    }

    /// Replace the current parameter values. Values must lie within bounds.
    pub fn set_params(&mut self, values: &[f64]) -> Result<(), FitError> {
        self.params.check_values(values)?;
        self.values.copy_from_slice(values);
        Ok(())
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn settings(&self) -> IntegrationSettings {
        self.settings
    }

    /// Integrate the model over the output times at the current parameters.
    ///
    /// A solver that stops early yields [`FitError::IntegrationTruncated`]. A
    /// diverging derivative still yields a full-length trajectory whose
    /// remaining samples are NaN.
    pub fn integrate(&mut self) -> Result<Trajectory, FitError> {
        let names = self.params.names();
        let values = &self.values;
        let rhs = &mut self.rhs;
        let mut f = |t: f64, y: &[f64], dy: &mut [f64]| rhs.eval(t, y, ParamMap::new(names, values), dy);

        let solution = solve_ivp(self.settings.method, &mut f, &self.time, &self.y0, &self.options)
            .map_err(|e| FitError::ModelInvalid(e.to_string()))?;

        let expected = self.time.len();
        let diverged = match &solution.status {
            SolveStatus::Completed => false,
            SolveStatus::Diverged { t } => {
                log::debug!("Integration diverged at t={t} for parameters {:?}.", self.values);
                true
            }
            SolveStatus::Truncated { .. } => {
                return Err(FitError::IntegrationTruncated {
                    message: solution.message(),
                    samples: solution.t.len(),
                    expected,
                });
            }
        };
        if solution.y.len() != expected {
            return Err(FitError::IntegrationTruncated {
                message: solution.message(),
                samples: solution.y.len(),
                expected,
            });
        }

        let dim = self.y0.len();
        let states = DMatrix::from_fn(dim, expected, |i, j| solution.y[j][i]);
        Ok(Trajectory {
            states,
            diverged,
            nfev: solution.nfev,
        })
    }

    /// Product component divided by `max_value`, sampled on the output times.
    pub fn normalised(&mut self) -> Result<Vec<f64>, FitError> {
        let trajectory = self.integrate()?;
        Ok(trajectory
            .product()
            .into_iter()
            .map(|v| v / self.max_value)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntegrationMethod, Parameter};
    use crate::models::ExprModel;

    fn settings(method: IntegrationMethod) -> IntegrationSettings {
        IntegrationSettings {
            atol: 1e-10,
            rtol: 1e-8,
            method,
        }
    }

    fn one_param(name: &str, init: f64, min: f64, max: f64) -> ParameterSet {
        let mut set = ParameterSet::new();
        set.add(Parameter::new(name, init, min, max).unwrap()).unwrap();
        set
    }

    fn decay(_t: f64, y: &[f64], p: ParamMap<'_>, dy: &mut [f64]) {
        dy[0] = -p["k"] * y[0];
    }

    #[test]
    fn trajectory_is_state_by_time() {
        let time: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut eval = ModelEvaluator::new(
            decay,
            one_param("k", 0.5, 0.1, 1.0),
            vec![1.0],
            1.0,
            time.clone(),
            settings(IntegrationMethod::Rk45),
        )
        .unwrap();

        let traj = eval.integrate().unwrap();
        assert_eq!(traj.states.shape(), (1, 10));
        assert!(!traj.diverged);
        for (j, t) in time.iter().enumerate() {
            assert!((traj.states[(0, j)] - (-0.5 * t).exp()).abs() < 1e-7);
        }
    }

    #[test]
    fn normalised_divides_last_component() {
        let names = vec!["k".to_string()];
        let model = ExprModel::compile(
            "state a, p\nd(a)/dt = -k * a\nd(p)/dt = k * a\n",
            &names,
        )
        .unwrap();
        let mut eval = ModelEvaluator::new(
            model,
            one_param("k", 0.3, 0.0, 1.0),
            vec![2.0, 0.0],
            2.0,
            vec![0.0, 1.0, 5.0],
            settings(IntegrationMethod::Dop853),
        )
        .unwrap();

        let y = eval.normalised().unwrap();
        for (v, t) in y.iter().zip([0.0f64, 1.0, 5.0]) {
            assert!((v - (1.0 - (-0.3 * t).exp())).abs() < 1e-7);
        }
    }

    #[test]
    fn set_params_enforces_bounds() {
        let mut eval = ModelEvaluator::new(
            decay,
            one_param("k", 0.5, 0.4, 0.6),
            vec![1.0],
            1.0,
            vec![0.0, 1.0],
            settings(IntegrationMethod::Rk23),
        )
        .unwrap();
        assert!(eval.set_params(&[0.6]).is_ok());
        assert_eq!(eval.values(), &[0.6]);
        assert!(eval.set_params(&[0.7]).is_err());
        assert!(eval.set_params(&[0.5, 0.5]).is_err());
        assert_eq!(eval.values(), &[0.6]);
    }

    #[test]
    fn rejects_mismatched_state_dimension() {
        let names = vec!["k".to_string()];
        let model = ExprModel::compile("state a, p\nd(a)/dt = -k*a\nd(p)/dt = k*a\n", &names).unwrap();
        let err = ModelEvaluator::new(
            model,
            one_param("k", 0.5, 0.0, 1.0),
            vec![1.0],
            1.0,
            vec![0.0, 1.0],
            settings(IntegrationMethod::Rk45),
        )
        .err()
        .unwrap();
        assert!(matches!(err, FitError::ModelInvalid(_)));
    }

    #[test]
    fn step_cap_surfaces_as_truncation() {
        let mut eval = ModelEvaluator::new(
            decay,
            one_param("k", 0.5, 0.1, 1.0),
            vec![1.0],
            1.0,
            vec![0.0, 1.0e6],
            settings(IntegrationMethod::Rk23),
        )
        .unwrap();
        eval.options.max_steps = 3;
        match eval.integrate() {
            Err(FitError::IntegrationTruncated { samples, expected, .. }) => {
                assert_eq!(samples, 1);
                assert_eq!(expected, 2);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn divergence_yields_nan_tail() {
        fn blow_up(_t: f64, y: &[f64], p: ParamMap<'_>, dy: &mut [f64]) {
            dy[0] = p["k"] * y[0] * y[0];
        }
        let mut eval = ModelEvaluator::new(
            blow_up,
            one_param("k", 1.0, 0.5, 2.0),
            vec![1.0],
            1.0,
            vec![0.0, 0.5, 2.0],
            settings(IntegrationMethod::Rk45),
        )
        .unwrap();
        match eval.integrate() {
            Ok(traj) => {
                assert!(traj.diverged);
                assert!((traj.states[(0, 1)] - 2.0).abs() < 1e-4);
                assert!(traj.states[(0, 2)].is_nan());
            }
            Err(FitError::IntegrationTruncated { samples, .. }) => assert_eq!(samples, 2),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
}
