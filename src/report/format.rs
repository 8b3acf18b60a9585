//! Formatted terminal output and the number formatting shared with the PDF page.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays free of presentation concerns
//! - output changes are localized (the tests below pin the layout)

use crate::domain::{FitResult, ReportData};

/// Format the run summary: parameters, goodness of fit, warnings.
pub fn format_fit_summary(report: &ReportData) -> String {
    let fit = &report.fit;
    let mut out = String::new();

    out.push_str(&format!("=== pfit - {} ===\n", report.title));
    out.push_str(&format!(
        "Method: {} | evaluations: {} | {}\n",
        fit.method,
        fit.nfev,
        if fit.success { "converged" } else { "not converged" },
    ));
    out.push_str(&format!("Message: {}\n", fit.message));
    out.push_str(&format!("Cycles: {}\n", report.time.len()));

    out.push_str("\nParameters:\n");
    out.push_str(&format_parameter_table(fit));

    out.push_str("\nGoodness of fit:\n");
    for (label, value) in statistics_rows(fit) {
        out.push_str(&format!("  {label:<20} {value}\n"));
    }

    if let Some(corr) = fit.correlation()
        && fit.names.len() > 1
    {
        out.push_str("\nCorrelations:\n");
        for i in 0..fit.names.len() {
            for j in (i + 1)..fit.names.len() {
                out.push_str(&format!(
                    "  C({}, {}) = {:+.4}\n",
                    fit.names[i], fit.names[j], corr[i][j]
                ));
            }
        }
    }

    if !fit.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &fit.warnings {
            out.push_str(&format!("  - {w}\n"));
        }
    }

    out
}

fn format_parameter_table(fit: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "  {:<12} {:>13} {:>13} {:>9} {:>13}\n",
            "name", "value", "stderr", "rel", "init"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("  {:-<12} {:-<13} {:-<13} {:-<9} {:-<13}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    let stderr = fit.stderr();
    for (i, name) in fit.names.iter().enumerate() {
        let value = fit.values[i];
        let (err, rel) = match stderr {
            Some(s) => (fmt_number(s[i]), fmt_relative(s[i], value)),
            None => ("n/a".to_string(), "".to_string()),
        };
        out.push_str(
            format!(
                "  {:<12} {:>13} {:>13} {:>9} {:>13}\n",
                truncate(name, 12),
                fmt_number(value),
                err,
                rel,
                fmt_number(fit.init_values[i]),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Label/value rows for the goodness-of-fit table.
pub fn statistics_rows(fit: &FitResult) -> Vec<(&'static str, String)> {
    let s = &fit.stats;
    vec![
        ("data points", s.ndata.to_string()),
        ("variables", s.nvarys.to_string()),
        ("chi-square", fmt_number(s.chisqr)),
        ("reduced chi-square", fmt_number(s.redchi)),
        ("AIC", format!("{:.4}", s.aic)),
        ("BIC", format!("{:.4}", s.bic)),
    ]
}

/// Six significant digits, switching to scientific notation for very small or large magnitudes.
pub fn fmt_number(v: f64) -> String {
    if !v.is_finite() {
        return format!("{v}");
    }
    let a = v.abs();
    if a != 0.0 && !(1e-3..1e5).contains(&a) {
        format!("{v:.5e}")
    } else {
        format!("{v:.6}")
    }
}

/// Stderr as a percentage of the value.
pub fn fmt_relative(stderr: f64, value: f64) -> String {
    if value == 0.0 {
        return "".to_string();
    }
    format!("{:.2}%", 100.0 * stderr / value.abs())
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{FitStatistics, FitWarning, ParameterErrors};

    pub(crate) fn sample_report(with_errors: bool) -> ReportData {
        let errors = if with_errors {
            ParameterErrors::WithErrors {
                covariance: vec![vec![4e-10, -1e-7], vec![-1e-7, 1e-4]],
                stderr: vec![2e-5, 1e-2],
            }
        } else {
            ParameterErrors::WithoutErrors
        };
        let warnings = if with_errors {
            Vec::new()
        } else {
            vec![FitWarning::StderrNotEstimable {
                reason: "the Jacobian is rank deficient".to_string(),
            }]
        };
        let time: Vec<f64> = (0..5).map(|i| 60.0 * i as f64).collect();
        ReportData {
            title: "Demo".to_string(),
            observed: vec![0.0, 0.05, 0.11, 0.14, 0.2],
            fitted: vec![0.0, 0.056, 0.106, 0.152, 0.193],
            time,
            fit: FitResult {
                names: vec!["kon".to_string(), "scale".to_string()],
                values: vec![2.0e-4, 1.5],
                init_values: vec![1.0e-3, 1.0],
                errors,
                residual: vec![0.6, -0.4, 1.2, -0.7],
                stats: FitStatistics {
                    ndata: 4,
                    nvarys: 2,
                    nfree: 2,
                    chisqr: 2.45,
                    redchi: 1.225,
                    aic: 3.6,
                    bic: 2.4,
                },
                success: true,
                message: "Both actual and predicted relative reductions are at most ftol.".to_string(),
                nfev: 42,
                method: "leastsq".to_string(),
                warnings,
            },
        }
    }

    #[test]
    fn summary_lists_parameters_and_statistics() {
        let text = format_fit_summary(&sample_report(true));
        assert!(text.starts_with("=== pfit - Demo ===\n"));
        assert!(text.contains("Method: leastsq | evaluations: 42 | converged"));
        assert!(text.contains("  kon             2.00000e-4    2.00000e-5    10.00%      0.001000"));
        assert!(text.contains("  reduced chi-square   1.225000"));
        assert!(text.contains("C(kon, scale) = -0.5000"));
        assert!(!text.contains("Warnings:"));
    }

    #[test]
    fn summary_without_errors_marks_stderr_unavailable() {
        let text = format_fit_summary(&sample_report(false));
        assert!(text.contains("n/a"));
        assert!(!text.contains("Correlations:"));
        assert!(text.contains("Warnings:\n  - standard errors not estimable: the Jacobian is rank deficient\n"));
    }

    #[test]
    fn numbers_switch_to_scientific() {
        assert_eq!(fmt_number(0.5), "0.500000");
        assert_eq!(fmt_number(2.0e-4), "2.00000e-4");
        assert_eq!(fmt_number(123456.0), "1.23456e5");
        assert_eq!(fmt_number(0.0), "0.000000");
        assert_eq!(truncate("a_long_parameter", 6), "a_lon.");
    }
}
