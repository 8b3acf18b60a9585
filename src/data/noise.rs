//! Per-sample noise weights from trailing rolling-window statistics.
//!
//! With `μ_i`, `s_i` the rolling mean and sample standard deviation over
//! `[max(0, i − w + 1), i]`:
//!
//! - [`NoiseModel::Deviation`]: `σ[i] = |y[i] − μ_i| / s_i`
//! - [`NoiseModel::RollingStd`]: `σ[i] = s_i`
//!
//! `σ[0]` is NaN under both models (one-observation window). The fitter never
//! reads it: index 0 is excluded from the residual.

use crate::domain::NoiseModel;
use crate::error::FitError;
use crate::math::rolling_mean_std;

pub const DEFAULT_NOISE_WINDOW: usize = 20;

/// Noise weights, one per sample.
pub fn estimate_noise(y: &[f64], window: usize, model: NoiseModel) -> Vec<f64> {
    let (mean, std) = rolling_mean_std(y, window);
    match model {
        NoiseModel::Deviation => y
            .iter()
            .zip(mean.iter().zip(&std))
            .map(|(v, (mu, s))| (v - mu).abs() / s)
            .collect(),
        NoiseModel::RollingStd => std,
    }
}

/// Check that every weight the residual uses (`i ≥ 1`) is finite and positive.
pub fn check_weights(sigma: &[f64]) -> Result<(), FitError> {
    for (index, &value) in sigma.iter().enumerate().skip(1) {
        if !(value.is_finite() && value > 0.0) {
            return Err(FitError::DegenerateNoise { index, value });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decay(n: usize) -> Vec<f64> {
        (0..n).map(|i| (-0.5 * i as f64).exp()).collect()
    }

    #[test]
    fn lengths_match_and_first_is_nan() {
        for model in [NoiseModel::Deviation, NoiseModel::RollingStd] {
            let y = decay(30);
            let sigma = estimate_noise(&y, 20, model);
            assert_eq!(sigma.len(), y.len());
            assert!(sigma[0].is_nan());
            assert!(sigma[1..].iter().all(|s| *s >= 0.0));
            check_weights(&sigma).unwrap();
        }
    }

    #[test]
    fn two_point_window_deviation() {
        // |y1 − (y0 + y1)/2| / (|y0 − y1| / √2) = 1/√2.
        let sigma = estimate_noise(&[3.0, 1.0], 20, NoiseModel::Deviation);
        assert!((sigma[1] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn flat_data_is_degenerate() {
        let sigma = estimate_noise(&[1.0; 6], 20, NoiseModel::Deviation);
        let err = check_weights(&sigma).unwrap_err();
        assert!(matches!(err, FitError::DegenerateNoise { index: 1, .. }));

        let sigma = estimate_noise(&[1.0; 6], 20, NoiseModel::RollingStd);
        assert!(check_weights(&sigma).is_err());
    }

    #[test]
    fn window_limits_history() {
        let y = [0.0, 0.0, 0.0, 1.0, 2.0];
        let sigma = estimate_noise(&y, 2, NoiseModel::RollingStd);
        assert_eq!(sigma[2], 0.0);
        assert!((sigma[4] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn weights_are_never_negative(
            y in proptest::collection::vec(-1e3f64..1e3, 1..60),
            window in 1usize..30,
        ) {
            for model in [NoiseModel::Deviation, NoiseModel::RollingStd] {
                let sigma = estimate_noise(&y, window, model);
                prop_assert_eq!(sigma.len(), y.len());
                prop_assert!(sigma[0].is_nan());
                // NaN marks an undefined weight; no weight is ever below zero.
                prop_assert!(sigma.iter().all(|s| s.is_nan() || *s >= 0.0));
                if window >= 2 && model == NoiseModel::RollingStd {
                    prop_assert!(sigma[1..].iter().all(|s| s.is_finite()));
                }
            }
        }
    }
}
