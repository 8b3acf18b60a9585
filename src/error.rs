//! Error types.
//!
//! Two layers:
//!
//! - [`FitError`]: the typed failure taxonomy of the fit pipeline. Library code
//!   returns this so callers (and tests) can match on the kind.
//! - [`AppError`]: what the binary reports. It carries the process exit code and
//!   a human-readable message.
//!
//! Non-fatal outcomes (fit not converged, standard errors not estimable) are not
//! errors; they travel inside the fit result as [`crate::domain::FitWarning`].

use std::path::PathBuf;

/// Failure kinds of the fit pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Malformed assay data: {0}")]
    AssayMalformed(String),

    #[error("Selected well {well} contains blank readings.")]
    SelectionBlank { well: String },

    #[error("Well {well} lies outside the {rows}x{cols} plate.")]
    SelectionOutOfRange { well: String, rows: usize, cols: usize },

    #[error("Control reading is zero at cycle index {index}.")]
    ControlZero { index: usize },

    #[error("Noise weight at cycle index {index} is {value}; the residual would not be finite.")]
    DegenerateNoise { index: usize, value: f64 },

    #[error("Integration returned {samples} of {expected} samples: {message}")]
    IntegrationTruncated {
        message: String,
        samples: usize,
        expected: usize,
    },

    #[error("Invalid model: {0}")]
    ModelInvalid(String),

    #[error("Residual is not finite at the initial parameter values.")]
    NonFiniteResidual,

    #[error("Failed to render the report: {0}")]
    Report(String),

    #[error("Failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FitError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FitError::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code used when this error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::ConfigInvalid(_) | FitError::Io { .. } | FitError::Report(_) => 2,
            FitError::AssayMalformed(_)
            | FitError::SelectionBlank { .. }
            | FitError::SelectionOutOfRange { .. }
            | FitError::ControlZero { .. }
            | FitError::DegenerateNoise { .. } => 3,
            FitError::IntegrationTruncated { .. }
            | FitError::ModelInvalid(_)
            | FitError::NonFiniteResidual => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_errors_map_to_exit_codes() {
        let err: AppError = FitError::SelectionBlank { well: "B3".into() }.into();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.to_string(), "Selected well B3 contains blank readings.");

        let err: AppError = FitError::ConfigInvalid("title is empty".into()).into();
        assert_eq!(err.exit_code(), 2);

        let err: AppError = FitError::NonFiniteResidual.into();
        assert_eq!(err.exit_code(), 4);
    }
}
