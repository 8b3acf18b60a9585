//! Signal / control normalisation.

use crate::error::FitError;

/// Element-wise `signal[i] / control[i]`.
///
/// Fails with `ControlZero` at the first zero control reading.
pub fn normalise(signal: &[f64], control: &[f64]) -> Result<Vec<f64>, FitError> {
    if signal.len() != control.len() {
        return Err(FitError::AssayMalformed(format!(
            "signal has {} cycles but control has {}",
            signal.len(),
            control.len()
        )));
    }

    signal
        .iter()
        .zip(control)
        .enumerate()
        .map(|(index, (s, c))| {
            if *c == 0.0 {
                Err(FitError::ControlZero { index })
            } else {
                Ok(s / c)
            }
        })
        .collect()
}
