//! Read/write fit JSON files.
//!
//! A fit file is the portable record of one run:
//! - the fit result (parameters, uncertainties, statistics, warnings)
//! - the series the report is drawn from (time, observed, noise, fitted)
//!
//! `pfit plot --fit <json>` reads it back for a terminal plot.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{FitResult, ReportData};
use crate::error::FitError;

/// On-disk fit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitFile {
    pub tool: String,
    pub created: String,
    pub title: String,
    pub time: Vec<f64>,
    pub observed: Vec<f64>,
    /// `None` where the noise weight is undefined.
    pub noise: Vec<Option<f64>>,
    pub fitted: Vec<f64>,
    pub fit: FitResult,
}

impl FitFile {
    pub fn new(report: &ReportData, noise: &[f64]) -> Self {
        Self {
            tool: "pfit".to_string(),
            created: chrono::Local::now().to_rfc3339(),
            title: report.title.clone(),
            time: report.time.clone(),
            observed: report.observed.clone(),
            noise: noise
                .iter()
                .map(|v| v.is_finite().then_some(*v))
                .collect(),
            fitted: report.fitted.clone(),
            fit: report.fit.clone(),
        }
    }

    pub fn to_report(&self) -> ReportData {
        ReportData {
            title: self.title.clone(),
            time: self.time.clone(),
            observed: self.observed.clone(),
            fitted: self.fitted.clone(),
            fit: self.fit.clone(),
        }
    }
}

/// Write a fit JSON file.
pub fn write_fit_json(path: &Path, file: &FitFile) -> Result<(), FitError> {
    let out = File::create(path).map_err(|e| FitError::io(path, e))?;
    serde_json::to_writer_pretty(out, file).map_err(|e| FitError::io(path, e.into()))
}

/// Read a fit JSON file.
pub fn read_fit_json(path: &Path) -> Result<FitFile, FitError> {
    let input = File::open(path).map_err(|e| FitError::io(path, e))?;
    let file: FitFile = serde_json::from_reader(std::io::BufReader::new(input))
        .map_err(|e| FitError::ConfigInvalid(format!("invalid fit JSON '{}': {e}", path.display())))?;
    if file.time.len() != file.observed.len() || file.time.len() != file.fitted.len() {
        return Err(FitError::ConfigInvalid(format!(
            "fit JSON '{}' has series of different lengths",
            path.display()
        )));
    }
    Ok(file)
}
