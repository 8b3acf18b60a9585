//! Covariance recovery and goodness-of-fit statistics.
//!
//! The covariance comes from the Jacobian of the weighted residual at the
//! optimum: `covar = (JᵀJ)⁻¹ · χ²_red`. Columns are scaled to unit norm
//! before the SVD so that parameters with very different magnitudes do not
//! look rank deficient.

use std::fmt;

use nalgebra::DMatrix;

use crate::domain::FitStatistics;

/// Singular values below this fraction of the largest mark the Jacobian as rank deficient.
const RANK_TOLERANCE: f64 = 1e-6;

/// Why standard errors could not be estimated.
#[derive(Debug, Clone, PartialEq)]
pub enum CovarianceFailure {
    NoDegreesOfFreedom { ndata: usize, nvarys: usize },
    NonFiniteJacobian,
    /// Parameter (by index) with no influence on the residual.
    Insensitive(usize),
    RankDeficient { ratio: f64 },
    /// Parameter (by index) whose variance came out non-finite or non-positive.
    BadVariance(usize),
}

impl CovarianceFailure {
    /// Human-readable reason using parameter names.
    pub fn describe(&self, names: &[String]) -> String {
        let name = |i: &usize| names.get(*i).map_or("?", String::as_str).to_string();
        match self {
            CovarianceFailure::NoDegreesOfFreedom { ndata, nvarys } => {
                format!("{ndata} residuals leave no degrees of freedom for {nvarys} parameters")
            }
            CovarianceFailure::NonFiniteJacobian => "the Jacobian at the optimum is not finite".to_string(),
            CovarianceFailure::Insensitive(i) => {
                format!("parameter `{}` has no effect on the residual", name(i))
            }
            CovarianceFailure::RankDeficient { ratio } => {
                format!("the Jacobian is rank deficient (singular value ratio {ratio:.3e})")
            }
            CovarianceFailure::BadVariance(i) => {
                format!("variance of parameter `{}` is not positive", name(i))
            }
        }
    }
}

impl fmt::Display for CovarianceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(&[]))
    }
}

/// Estimated covariance (row-major, symmetric) and standard errors.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceEstimate {
    pub matrix: Vec<Vec<f64>>,
    pub stderr: Vec<f64>,
}

/// Covariance from the `m × n` residual Jacobian and the reduced chi-square.
pub fn estimate_covariance(jac: &DMatrix<f64>, redchi: f64) -> Result<CovarianceEstimate, CovarianceFailure> {
    let (m, n) = jac.shape();
    if m <= n {
        return Err(CovarianceFailure::NoDegreesOfFreedom { ndata: m, nvarys: n });
    }
    if !jac.iter().all(|v| v.is_finite()) {
        return Err(CovarianceFailure::NonFiniteJacobian);
    }

    let norms: Vec<f64> = jac.column_iter().map(|c| c.norm()).collect();
    if let Some(i) = norms.iter().position(|v| *v == 0.0) {
        return Err(CovarianceFailure::Insensitive(i));
    }

    let mut scaled = jac.clone();
    for (j, mut col) in scaled.column_iter_mut().enumerate() {
        col /= norms[j];
    }

    let svd = scaled.svd(false, true);
    let s = &svd.singular_values;
    let s_max = s.max();
    let s_min = s.min();
    let ratio = if s_max > 0.0 { s_min / s_max } else { 0.0 };
    if ratio.is_nan() || ratio < RANK_TOLERANCE {
        return Err(CovarianceFailure::RankDeficient { ratio });
    }
    let Some(v_t) = svd.v_t else {
        return Err(CovarianceFailure::RankDeficient { ratio });
    };

    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let inv: f64 = (0..s.len()).map(|k| v_t[(k, i)] * v_t[(k, j)] / (s[k] * s[k])).sum();
            matrix[i][j] = inv / (norms[i] * norms[j]) * redchi;
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (matrix[i][j] + matrix[j][i]);
            matrix[i][j] = avg;
            matrix[j][i] = avg;
        }
    }

    let mut stderr = Vec::with_capacity(n);
    for (i, row) in matrix.iter().enumerate() {
        let var = row[i];
        if !(var.is_finite() && var > 0.0) {
            return Err(CovarianceFailure::BadVariance(i));
        }
        stderr.push(var.sqrt());
    }

    Ok(CovarianceEstimate { matrix, stderr })
}

/// Goodness-of-fit statistics for a residual vector and `nvarys` fitted parameters.
///
/// `−2 ln L = n·ln(χ²/n)`, `AIC = −2 ln L + 2k`, `BIC = −2 ln L + k·ln n`; χ² is
/// floored at `1e-250` so that a perfect fit still gives finite criteria.
pub fn statistics(residual: &[f64], nvarys: usize) -> FitStatistics {
    let ndata = residual.len();
    let nfree = ndata as i64 - nvarys as i64;
    let chisqr: f64 = residual.iter().map(|r| r * r).sum();
    let redchi = chisqr / nfree.max(1) as f64;

    let n = ndata.max(1) as f64;
    let neg2_log_likel = n * (chisqr.max(1e-250) / n).ln();
    let aic = neg2_log_likel + 2.0 * nvarys as f64;
    let bic = neg2_log_likel + n.ln() * nvarys as f64;

    FitStatistics {
        ndata,
        nvarys,
        nfree,
        chisqr,
        redchi,
        aic,
        bic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_regression_covariance() {
        // Straight line through x = 0..4: (JᵀJ)⁻¹ is known in closed form.
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let jac = DMatrix::from_fn(5, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
        let est = estimate_covariance(&jac, 2.0).unwrap();
        // JᵀJ = [[5, 10], [10, 30]], det = 50.
        let expected = [[30.0 / 50.0, -10.0 / 50.0], [-10.0 / 50.0, 5.0 / 50.0]];
        for i in 0..2 {
            for j in 0..2 {
                assert!((est.matrix[i][j] - 2.0 * expected[i][j]).abs() < 1e-12);
            }
            assert!((est.stderr[i] * est.stderr[i] - est.matrix[i][i]).abs() < 1e-12);
        }
        assert!((est.matrix[0][1] - est.matrix[1][0]).abs() <= 1e-12);
    }

    #[test]
    fn colinear_columns_are_rank_deficient() {
        let jac = DMatrix::from_fn(6, 2, |i, _| (i as f64 + 1.0).sqrt());
        let err = estimate_covariance(&jac, 1.0).unwrap_err();
        assert!(matches!(err, CovarianceFailure::RankDeficient { .. }));
    }

    #[test]
    fn zero_column_is_insensitive() {
        let jac = DMatrix::from_fn(4, 2, |i, j| if j == 1 { 0.0 } else { i as f64 + 1.0 });
        let err = estimate_covariance(&jac, 1.0).unwrap_err();
        assert_eq!(err, CovarianceFailure::Insensitive(1));
        let names = vec!["a".to_string(), "b".to_string()];
        assert!(err.describe(&names).contains("`b`"));
    }

    #[test]
    fn needs_degrees_of_freedom() {
        let jac = DMatrix::from_element(2, 2, 1.0);
        assert!(matches!(
            estimate_covariance(&jac, 1.0),
            Err(CovarianceFailure::NoDegreesOfFreedom { ndata: 2, nvarys: 2 })
        ));
    }

    #[test]
    fn lmfit_statistics() {
        let r = [1.0, -1.0, 2.0, 0.0];
        let s = statistics(&r, 1);
        assert_eq!(s.ndata, 4);
        assert_eq!(s.nfree, 3);
        assert!((s.chisqr - 6.0).abs() < 1e-15);
        assert!((s.redchi - 2.0).abs() < 1e-15);
        let base = 4.0 * (6.0f64 / 4.0).ln();
        assert!((s.aic - (base + 2.0)).abs() < 1e-12);
        assert!((s.bic - (base + 4.0f64.ln())).abs() < 1e-12);

        let perfect = statistics(&[0.0; 5], 2);
        assert!(perfect.aic.is_finite() && perfect.bic.is_finite());
    }
}
