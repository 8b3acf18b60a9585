//! The fitter: bounded nonlinear least squares of the model against data.
//!
//! Given:
//! - normalised observations `y[0..C]`
//! - noise weights `σ[0..C]` (`σ[0]` is undefined and never used)
//! - a [`ModelEvaluator`] owning the parameter vector
//!
//! we minimise `Σ_{i≥1} ((ŷ_i(θ) − y_i) / σ_i)²` within the parameter bounds
//! and characterise the optimum (covariance, χ², AIC, BIC).
//!
//! Strategies:
//! - `leastsq`: Levenberg–Marquardt in sine-transformed coordinates. If that
//!   does not converge, or leaves a parameter on a bound that the gradient
//!   wants to leave, the fit continues with the projected variant from there.
//! - `least_squares`: projected Levenberg–Marquardt in parameter space.

use nalgebra::{DMatrix, DVector};

use super::covariance::{estimate_covariance, statistics};
use super::lm::{LmOptions, LmOutcome, levenberg_marquardt};
use super::Bounds;
use crate::data::check_weights;
use crate::domain::{FitMethod, FitResult, FitWarning, ParameterErrors};
use crate::error::FitError;
use crate::math::forward_jacobian;
use crate::models::{ModelEvaluator, OdeRhs};

/// Lifecycle of a [`Fitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    Idle,
    Fitting,
    Converged,
    Failed,
}

pub struct Fitter<R> {
    evaluator: ModelEvaluator<R>,
    observed: Vec<f64>,
    noise: Vec<f64>,
    method: FitMethod,
    options: LmOptions,
    state: FitState,
}

impl<R: OdeRhs> Fitter<R> {
    pub fn new(
        evaluator: ModelEvaluator<R>,
        observed: Vec<f64>,
        noise: Vec<f64>,
        method: FitMethod,
    ) -> Result<Self, FitError> {
        let c = evaluator.time().len();
        if observed.len() != c || noise.len() != c {
            return Err(FitError::ModelInvalid(format!(
                "series lengths differ: {c} times, {} observations, {} noise weights",
                observed.len(),
                noise.len()
            )));
        }
        if let Some(i) = observed.iter().position(|v| !v.is_finite()) {
            return Err(FitError::ModelInvalid(format!("observation {i} is not finite")));
        }
        check_weights(&noise)?;

        let options = LmOptions::for_params(evaluator.parameters().len());
        Ok(Self {
            evaluator,
            observed,
            noise,
            method,
            options,
            state: FitState::Idle,
        })
    }

    /// Override the residual-evaluation budget.
    pub fn with_max_nfev(mut self, max_nfev: usize) -> Self {
        self.options.max_nfev = max_nfev.max(1);
        self
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    /// Model prediction at the evaluator's current parameters.
    pub fn fitted(&mut self) -> Result<Vec<f64>, FitError> {
        self.evaluator.normalised()
    }

    /// Run the fit from the initial parameter values.
    ///
    /// Every call starts over from the initial guesses, so repeated calls give
    /// identical results. Afterwards the evaluator holds the best parameters.
    pub fn fit(&mut self) -> Result<FitResult, FitError> {
        self.state = FitState::Fitting;
        let result = self.run();
        self.state = match &result {
            Ok(fit) if fit.success => FitState::Converged,
            _ => FitState::Failed,
        };
        result
    }

    fn run(&mut self) -> Result<FitResult, FitError> {
        let Self {
            evaluator,
            observed,
            noise,
            method,
            options,
            ..
        } = self;

        let params = evaluator.parameters().clone();
        let names = params.names().to_vec();
        let init_values = params.initial_values();
        let bounds = Bounds::from_parameters(&params);
        let m = observed.len() - 1;
        let n = params.len();

        log::info!(
            "Fitting {n} parameter(s) to {m} residuals with {} ({} integration).",
            method.display_name(),
            evaluator.settings().method
        );

        let mut residual = |x: &[f64], out: &mut [f64]| weighted_residual(evaluator, observed, noise, x, out);

        let (outcome, strategy, mut nfev) = match method {
            FitMethod::LeastSquares => {
                let outcome = levenberg_marquardt(&mut residual, m, &init_values, Some(&bounds), options)?;
                let nfev = outcome.nfev;
                (outcome, "least_squares".to_string(), nfev)
            }
            FitMethod::Leastsq => {
                let u0 = bounds.to_internal(&init_values);
                let transformed = levenberg_marquardt(
                    |u: &[f64], out: &mut [f64]| residual(&bounds.to_external(u), out),
                    m,
                    &u0,
                    None,
                    options,
                )?;
                let mut outcome = LmOutcome {
                    x: bounds.to_external(&transformed.x),
                    ..transformed
                };
                let mut nfev = outcome.nfev;

                let jac = external_jacobian(&mut residual, &outcome.x, &outcome.residual, &bounds)?;
                nfev += n;
                let g = jac.tr_mul(&DVector::from_column_slice(&outcome.residual));
                let g: Vec<f64> = g.iter().copied().collect();
                let pinned = bounds.pinned(&outcome.x, &g);

                let mut strategy = "leastsq".to_string();
                if !outcome.termination.converged() || !pinned.is_empty() {
                    if pinned.is_empty() {
                        log::debug!("Transformed LM stopped: {}; continuing with projection.", outcome.termination);
                    } else {
                        let held: Vec<&str> = pinned.iter().map(|&i| names[i].as_str()).collect();
                        log::debug!("Parameters {held:?} held at a bound; continuing with projection.");
                    }
                    let mut rest = *options;
                    rest.max_nfev = options.max_nfev.saturating_sub(nfev).max(n + 2);
                    let projected = levenberg_marquardt(&mut residual, m, &outcome.x, Some(&bounds), &rest)?;
                    nfev += projected.nfev;
                    outcome = projected;
                    strategy = "leastsq+least_squares".to_string();
                }
                (outcome, strategy, nfev)
            }
        };

        let stats = statistics(&outcome.residual, n);
        let mut warnings = Vec::new();
        let success = outcome.termination.converged();
        let message = outcome.termination.to_string();
        if !success {
            log::warn!("Fit did not converge: {message}.");
            warnings.push(FitWarning::NotConverged {
                message: message.clone(),
            });
        }

        let jac = external_jacobian(&mut residual, &outcome.x, &outcome.residual, &bounds)?;
        nfev += n;
        let errors = match estimate_covariance(&jac, stats.redchi) {
            Ok(est) => ParameterErrors::WithErrors {
                covariance: est.matrix,
                stderr: est.stderr,
            },
            Err(failure) => {
                let reason = failure.describe(&names);
                log::warn!("Standard errors not estimable: {reason}.");
                warnings.push(FitWarning::StderrNotEstimable { reason });
                ParameterErrors::WithoutErrors
            }
        };

        evaluator.set_params(&outcome.x)?;
        log::info!(
            "Fit finished after {nfev} evaluations: chi-square {:.6e}, reduced {:.6e}.",
            stats.chisqr,
            stats.redchi
        );

        Ok(FitResult {
            names,
            values: outcome.x,
            init_values,
            errors,
            residual: outcome.residual,
            stats,
            success,
            message,
            nfev,
            method: strategy,
            warnings,
        })
    }
}

/// `(ŷ[1:] − y[1:]) / σ[1:]` at parameters `x`.
fn weighted_residual<R: OdeRhs>(
    evaluator: &mut ModelEvaluator<R>,
    observed: &[f64],
    noise: &[f64],
    x: &[f64],
    out: &mut [f64],
) -> Result<(), FitError> {
    evaluator.set_params(x)?;
    let fitted = evaluator.normalised()?;
    if fitted.len() != observed.len() {
        return Err(FitError::IntegrationTruncated {
            message: "model returned a short trajectory".to_string(),
            samples: fitted.len(),
            expected: observed.len(),
        });
    }
    for (i, slot) in out.iter_mut().enumerate() {
        let k = i + 1;
        *slot = (fitted[k] - observed[k]) / noise[k];
    }
    Ok(())
}

/// Forward-difference Jacobian in parameter space, stepping inward at bounds.
fn external_jacobian<F>(residual: &mut F, x: &[f64], r: &[f64], bounds: &Bounds) -> Result<DMatrix<f64>, FitError>
where
    F: FnMut(&[f64], &mut [f64]) -> Result<(), FitError>,
{
    let steps: Vec<f64> = x
        .iter()
        .enumerate()
        .map(|(j, v)| bounds.fd_step(j, *v))
        .collect();
    forward_jacobian(x, r, &steps, |xp, out| residual(xp, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::estimate_noise;
    use crate::domain::{
        IntegrationMethod, IntegrationSettings, NoiseModel, ParamMap, Parameter, ParameterSet,
    };

    fn decay(_t: f64, y: &[f64], p: ParamMap<'_>, dy: &mut [f64]) {
        dy[0] = -p["k"] * y[0];
    }

    fn summed_decay(_t: f64, y: &[f64], p: ParamMap<'_>, dy: &mut [f64]) {
        dy[0] = -(p["k1"] + p["k2"]) * y[0];
    }

    fn exp_data() -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let time: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = time.iter().map(|t| (-0.5 * t).exp()).collect();
        let sigma = estimate_noise(&y, 20, NoiseModel::Deviation);
        (time, y, sigma)
    }

    fn fitter<R: OdeRhs>(rhs: R, params: &[(&str, f64, f64, f64)], method: FitMethod) -> Fitter<R> {
        let (time, y, sigma) = exp_data();
        let mut set = ParameterSet::new();
        for (name, init, min, max) in params {
            set.add(Parameter::new(*name, *init, *min, *max).unwrap()).unwrap();
        }
        let settings = IntegrationSettings {
            atol: 1e-10,
            rtol: 1e-8,
            method: IntegrationMethod::Rk45,
        };
        let eval = ModelEvaluator::new(rhs, set, vec![1.0], 1.0, time, settings).unwrap();
        Fitter::new(eval, y, sigma, method).unwrap()
    }

    #[test]
    fn identity_fit_recovers_rate() {
        for method in [FitMethod::Leastsq, FitMethod::LeastSquares] {
            let mut f = fitter(decay, &[("k", 0.2, 0.01, 2.0)], method);
            assert_eq!(f.state(), FitState::Idle);
            let fit = f.fit().unwrap();
            assert_eq!(f.state(), FitState::Converged);
            assert!(fit.success, "{}", fit.message);
            assert!((fit.values[0] - 0.5).abs() < 1e-4, "{:?}", fit.values);
            assert!(fit.stats.chisqr < 1e-6);
            assert_eq!(fit.residual.len(), 9);
            assert_eq!(fit.stats.ndata, 9);
            assert_eq!(fit.names, vec!["k".to_string()]);
            assert_eq!(fit.init_values, vec![0.2]);

            // The evaluator is left at the optimum.
            let fitted = f.fitted().unwrap();
            assert!((fitted[9] - (-4.5f64).exp()).abs() < 1e-6);
        }
    }

    #[test]
    fn colinear_parameters_are_not_estimable() {
        for method in [FitMethod::Leastsq, FitMethod::LeastSquares] {
            let mut f = fitter(summed_decay, &[("k1", 0.2, 0.0, 1.0), ("k2", 0.1, 0.0, 1.0)], method);
            let fit = f.fit().unwrap();
            assert!(fit.success, "{}", fit.message);
            assert!(!fit.stderr_estimable());
            assert!(fit.stderr().is_none());
            assert!(fit.covariance().is_none());
            assert!((fit.values[0] + fit.values[1] - 0.5).abs() < 1e-4);
            assert!(fit.stats.chisqr.is_finite());
            assert!(fit.stats.aic.is_finite());
            assert!(fit.stats.bic.is_finite());
            assert!(
                fit.warnings
                    .iter()
                    .any(|w| matches!(w, FitWarning::StderrNotEstimable { .. }))
            );
        }
    }

    #[test]
    fn seeded_on_a_bound_stays_inside() {
        for method in [FitMethod::Leastsq, FitMethod::LeastSquares] {
            for init in [0.6, 0.4] {
                let mut f = fitter(decay, &[("k", init, 0.4, 0.6)], method);
                let fit = f.fit().unwrap();
                let k = fit.values[0];
                assert!((0.4..=0.6).contains(&k));
                assert!((k - 0.5).abs() < 1e-4, "{method:?} from {init}: {k}");
            }
        }
    }

    #[test]
    fn narrow_box_of_tiny_rates_is_fitted() {
        fn scaled_decay(_t: f64, y: &[f64], p: ParamMap<'_>, dy: &mut [f64]) {
            dy[0] = -(p["k"] * 1e9) * y[0];
        }
        for method in [FitMethod::Leastsq, FitMethod::LeastSquares] {
            let mut f = fitter(scaled_decay, &[("k", 3e-10, 1e-10, 1e-9)], method);
            let fit = f.fit().unwrap();
            assert!(fit.success, "{method:?}: {}", fit.message);
            let k = fit.values[0];
            assert!((k - 5e-10).abs() / 5e-10 < 1e-4, "{method:?}: k = {k}");
            assert!(fit.stats.chisqr < 1e-6);
        }
    }

    #[test]
    fn optimum_outside_the_box_lands_on_the_bound() {
        let mut f = fitter(decay, &[("k", 0.2, 0.1, 0.3)], FitMethod::Leastsq);
        let fit = f.fit().unwrap();
        assert!((fit.values[0] - 0.3).abs() < 1e-6);
        assert!(fit.values[0] <= 0.3);
    }

    #[test]
    fn repeated_fits_are_identical() {
        let mut f = fitter(decay, &[("k", 0.9, 0.01, 2.0)], FitMethod::Leastsq);
        let first = f.fit().unwrap();
        let second = f.fit().unwrap();
        assert_eq!(first.values, second.values);
        assert_eq!(first.nfev, second.nfev);

        let mut g = fitter(decay, &[("k", 0.9, 0.01, 2.0)], FitMethod::Leastsq);
        assert_eq!(g.fit().unwrap().values, first.values);
    }

    #[test]
    fn covariance_matches_stderr() {
        // Noisy data so that the covariance is well away from zero.
        let (time, mut y, _) = exp_data();
        for (i, v) in y.iter_mut().enumerate() {
            *v += if i % 2 == 0 { 0.01 } else { -0.01 };
        }
        let sigma = estimate_noise(&y, 4, NoiseModel::RollingStd);
        let mut set = ParameterSet::new();
        set.add(Parameter::new("k", 0.3, 0.01, 2.0).unwrap()).unwrap();
        let settings = IntegrationSettings {
            atol: 1e-10,
            rtol: 1e-8,
            method: IntegrationMethod::Dop853,
        };
        let eval = ModelEvaluator::new(decay, set, vec![1.0], 1.0, time, settings).unwrap();
        let mut f = Fitter::new(eval, y, sigma, FitMethod::LeastSquares).unwrap();
        let fit = f.fit().unwrap();

        let cov = fit.covariance().unwrap();
        let stderr = fit.stderr().unwrap();
        assert!(cov[0][0] > 0.0);
        assert!((stderr[0] * stderr[0] - cov[0][0]).abs() <= 1e-12 * cov[0][0].max(1.0));
    }

    #[test]
    fn diverging_start_is_an_error() {
        fn blow_up(_t: f64, y: &[f64], p: ParamMap<'_>, dy: &mut [f64]) {
            dy[0] = (-p["k"]).sqrt() * y[0];
        }
        let mut f = fitter(blow_up, &[("k", 0.5, 0.1, 1.0)], FitMethod::LeastSquares);
        let err = f.fit().unwrap_err();
        assert!(matches!(err, FitError::NonFiniteResidual));
        assert_eq!(f.state(), FitState::Failed);
    }

    #[test]
    fn budget_exhaustion_is_reported_not_fatal() {
        let mut f = fitter(decay, &[("k", 1.8, 0.01, 2.0)], FitMethod::LeastSquares).with_max_nfev(3);
        let fit = f.fit().unwrap();
        assert!(!fit.success);
        assert_eq!(f.state(), FitState::Failed);
        assert!(
            fit.warnings
                .iter()
                .any(|w| matches!(w, FitWarning::NotConverged { .. }))
        );
    }

    #[test]
    fn rejects_degenerate_noise_and_bad_lengths() {
        let (time, y, mut sigma) = exp_data();
        let mut set = ParameterSet::new();
        set.add(Parameter::new("k", 0.5, 0.1, 1.0).unwrap()).unwrap();
        let settings = IntegrationSettings {
            atol: 1e-8,
            rtol: 1e-6,
            method: IntegrationMethod::Rk45,
        };

        let eval = ModelEvaluator::new(decay, set.clone(), vec![1.0], 1.0, time.clone(), settings).unwrap();
        assert!(matches!(
            Fitter::new(eval, y[..5].to_vec(), sigma.clone(), FitMethod::Leastsq),
            Err(FitError::ModelInvalid(_))
        ));

        sigma[3] = 0.0;
        let eval = ModelEvaluator::new(decay, set, vec![1.0], 1.0, time, settings).unwrap();
        assert!(matches!(
            Fitter::new(eval, y, sigma, FitMethod::Leastsq),
            Err(FitError::DegenerateNoise { index: 3, .. })
        ));
    }
}
