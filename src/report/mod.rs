//! Reporting: terminal summary and the one-page PDF report.
//!
//! - [`format`]: terminal text and shared number formatting
//! - [`pdf`]: the page canvas and PDF file assembly
//! - `backend`: plotters drawing backend over the canvas (used for the charts)
//! - `page`: layout of tables, covariance heat map and charts

use std::path::Path;

use crate::domain::ReportData;
use crate::error::FitError;

mod backend;
pub mod format;
mod page;
pub mod pdf;

pub use format::format_fit_summary;

/// Render the report PDF for `report` into memory.
pub fn render_report(report: &ReportData, now: chrono::DateTime<chrono::Local>) -> Result<Vec<u8>, FitError> {
    let canvas = page::render_page(report, &now.format("%d/%m/%Y").to_string())?;
    Ok(pdf::write_pdf(&canvas, &report.title, &now.format("%Y%m%d%H%M%S").to_string()))
}

/// Render and write the report PDF.
pub fn write_report(path: &Path, report: &ReportData) -> Result<(), FitError> {
    log::info!("Compiling report.");
    let bytes = render_report(report, chrono::Local::now())?;
    std::fs::write(path, bytes).map_err(|e| FitError::io(path, e))?;
    let shown = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    log::info!("Report saved at: {}", shown.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn report_is_a_pdf_with_the_date() {
        let report = format::tests::sample_report(true);
        let now = chrono::Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let bytes = render_report(&report, now).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.contains("(14/03/2026) Tj"));
        assert!(text.contains("/CreationDate (D:20260314092653)"));
    }

    #[test]
    fn write_report_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        write_report(&path, &format::tests::sample_report(false)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));

        let missing = dir.path().join("no_such_dir").join("report.pdf");
        assert!(matches!(write_report(&missing, &format::tests::sample_report(false)), Err(FitError::Io { .. })));
    }
}
