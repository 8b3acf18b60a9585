//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON
//! - reloaded later for plotting

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Integration method tag (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    #[serde(rename = "RK23")]
    Rk23,
    #[serde(rename = "RK45")]
    Rk45,
    #[serde(rename = "DOP853")]
    Dop853,
    #[serde(rename = "Radau")]
    Radau,
    #[serde(rename = "BDF")]
    Bdf,
    #[serde(rename = "LSODA")]
    Lsoda,
}

impl IntegrationMethod {
    pub const ALL: [IntegrationMethod; 6] = [
        IntegrationMethod::Rk23,
        IntegrationMethod::Rk45,
        IntegrationMethod::Dop853,
        IntegrationMethod::Radau,
        IntegrationMethod::Bdf,
        IntegrationMethod::Lsoda,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            IntegrationMethod::Rk23 => "RK23",
            IntegrationMethod::Rk45 => "RK45",
            IntegrationMethod::Dop853 => "DOP853",
            IntegrationMethod::Radau => "Radau",
            IntegrationMethod::Bdf => "BDF",
            IntegrationMethod::Lsoda => "LSODA",
        }
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for IntegrationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntegrationMethod::ALL
            .into_iter()
            .find(|m| m.tag() == s)
            .ok_or_else(|| {
                let tags: Vec<&str> = IntegrationMethod::ALL.iter().map(|m| m.tag()).collect();
                format!("unknown integration method `{s}` (expected one of {})", tags.join(", "))
            })
    }
}

/// Integration tolerances and method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSettings {
    pub atol: f64,
    pub rtol: f64,
    pub method: IntegrationMethod,
}

/// How the per-sample noise weight is derived from the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseModel {
    /// `σ[i] = |y[i] − μ_i| / s_i` (local anomaly score).
    #[default]
    Deviation,
    /// `σ[i] = s_i` (rolling sample standard deviation).
    RollingStd,
}

/// Optimiser strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Levenberg–Marquardt on sine-transformed bounded parameters, with a
    /// projected trust-region continuation when a bound blocks progress.
    #[default]
    Leastsq,
    /// Projected trust-region Levenberg–Marquardt in parameter space.
    LeastSquares,
}

impl FitMethod {
    pub fn display_name(self) -> &'static str {
        match self {
            FitMethod::Leastsq => "leastsq",
            FitMethod::LeastSquares => "least_squares",
        }
    }
}

/// Goodness-of-fit summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    /// Number of residuals.
    pub ndata: usize,
    /// Number of varied parameters.
    pub nvarys: usize,
    /// Degrees of freedom (`ndata − nvarys`, may be negative for tiny data).
    pub nfree: i64,
    pub chisqr: f64,
    pub redchi: f64,
    pub aic: f64,
    pub bic: f64,
}

/// Parameter uncertainties: present only when the covariance was recoverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterErrors {
    WithErrors {
        /// Row-major, parameter order on both axes.
        covariance: Vec<Vec<f64>>,
        stderr: Vec<f64>,
    },
    WithoutErrors,
}

/// Degraded-but-complete outcomes recorded on a fit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitWarning {
    NotConverged { message: String },
    StderrNotEstimable { reason: String },
}

impl fmt::Display for FitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitWarning::NotConverged { message } => write!(f, "fit did not converge: {message}"),
            FitWarning::StderrNotEstimable { reason } => {
                write!(f, "standard errors not estimable: {reason}")
            }
        }
    }
}

/// Terminal state of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Parameter names in insertion order.
    pub names: Vec<String>,
    pub values: Vec<f64>,
    pub init_values: Vec<f64>,
    pub errors: ParameterErrors,
    /// Weighted residual vector at the optimum (length `C − 1`).
    pub residual: Vec<f64>,
    pub stats: FitStatistics,
    pub success: bool,
    pub message: String,
    /// Residual evaluations spent (Jacobian columns included).
    pub nfev: usize,
    /// Strategy that produced the final point.
    pub method: String,
    pub warnings: Vec<FitWarning>,
}

impl FitResult {
    pub fn stderr_estimable(&self) -> bool {
        matches!(self.errors, ParameterErrors::WithErrors { .. })
    }

    pub fn stderr(&self) -> Option<&[f64]> {
        match &self.errors {
            ParameterErrors::WithErrors { stderr, .. } => Some(stderr),
            ParameterErrors::WithoutErrors => None,
        }
    }

    pub fn covariance(&self) -> Option<&[Vec<f64>]> {
        match &self.errors {
            ParameterErrors::WithErrors { covariance, .. } => Some(covariance),
            ParameterErrors::WithoutErrors => None,
        }
    }

    /// Correlation matrix derived from the covariance.
    pub fn correlation(&self) -> Option<Vec<Vec<f64>>> {
        let (covariance, stderr) = match &self.errors {
            ParameterErrors::WithErrors { covariance, stderr } => (covariance, stderr),
            ParameterErrors::WithoutErrors => return None,
        };
        let n = stderr.len();
        let mut out = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                let denom = stderr[i] * stderr[j];
                out[i][j] = if denom > 0.0 { covariance[i][j] / denom } else { f64::NAN };
            }
        }
        Some(out)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }
}

/// Everything the report needs: `{title, t, y, ŷ*, fit_result}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub title: String,
    pub time: Vec<f64>,
    pub observed: Vec<f64>,
    pub fitted: Vec<f64>,
    pub fit: FitResult,
}
