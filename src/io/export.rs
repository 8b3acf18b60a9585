//! Export the fitted series to CSV.
//!
//! One row per cycle with columns `t, y, sigma, fitted, residual`. The first
//! cycle has no residual (it is excluded from the fit), so that cell is empty,
//! as is any undefined noise weight.

use std::path::Path;

use crate::domain::ReportData;
use crate::error::FitError;

/// Write the per-cycle series to a CSV file.
pub fn write_series_csv(path: &Path, report: &ReportData, noise: &[f64]) -> Result<(), FitError> {
    let wrap = |e: csv::Error| FitError::io(path, std::io::Error::other(e));

    let mut wtr = csv::Writer::from_path(path).map_err(wrap)?;
    wtr.write_record(["t", "y", "sigma", "fitted", "residual"])
        .map_err(wrap)?;

    for (i, &t) in report.time.iter().enumerate() {
        let sigma = noise
            .get(i)
            .filter(|s| s.is_finite())
            .map(|s| format!("{s:.10e}"))
            .unwrap_or_default();
        let residual = i
            .checked_sub(1)
            .and_then(|j| report.fit.residual.get(j))
            .map(|r| format!("{r:.10e}"))
            .unwrap_or_default();

        wtr.write_record([
            format!("{t}"),
            format!("{:.10e}", report.observed[i]),
            sigma,
            format!("{:.10e}", report.fitted[i]),
            residual,
        ])
        .map_err(wrap)?;
    }

    wtr.flush().map_err(|e| FitError::io(path, e))
}
