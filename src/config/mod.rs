//! YAML run configuration.
//!
//! The file is deserialised into a raw mirror of its shape first ([`RawConfig`]),
//! then validated into a [`Config`] whose fields are ready for the pipeline:
//! parameters in file order, paths resolved against the configuration file's
//! directory, well references checked.
//!
//! Every real-valued key also accepts an integer or a numeric string.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::assay::{PlateLayout, parse_well_refs};
use crate::data::DEFAULT_NOISE_WINDOW;
use crate::domain::{FitMethod, IntegrationMethod, IntegrationSettings, NoiseModel, Parameter, ParameterSet};
use crate::error::FitError;

/// A real number as written in YAML: a number or a string holding one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RealValue {
    Number(f64),
    Text(String),
}

impl RealValue {
    fn resolve(&self, key: &str) -> Result<f64, FitError> {
        let value = match self {
            RealValue::Number(v) => *v,
            RealValue::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                FitError::ConfigInvalid(format!("`{key}` must be a number, got `{text}`"))
            })?,
        };
        if !value.is_finite() {
            return Err(FitError::ConfigInvalid(format!("`{key}` must be finite")));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub title: String,
    pub assay: RawAssay,
    pub model: RawModel,
    pub integration: RawIntegration,
    pub fitter: RawFitter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAssay {
    pub file_path: PathBuf,
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_cols")]
    pub cols: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawParameter {
    pub init_guess: RealValue,
    pub min: RealValue,
    pub max: RealValue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModel {
    pub func_path: PathBuf,
    pub parameters: IndexMap<String, RawParameter>,
    pub y0: Vec<RealValue>,
    pub max_value: RealValue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawIntegration {
    pub atol: RealValue,
    pub rtol: RealValue,
    pub method: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFitter {
    pub data_wells: Vec<String>,
    pub control_wells: Vec<String>,
    #[serde(default)]
    pub noise_window: Option<usize>,
    #[serde(default)]
    pub noise_model: Option<NoiseModel>,
    #[serde(default)]
    pub method: Option<FitMethod>,
    #[serde(default)]
    pub max_nfev: Option<usize>,
}

fn default_rows() -> usize {
    PlateLayout::default().rows
}

fn default_cols() -> usize {
    PlateLayout::default().cols
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub title: String,
    pub assay_path: PathBuf,
    pub layout: PlateLayout,
    pub model_path: PathBuf,
    pub parameters: ParameterSet,
    pub y0: Vec<f64>,
    pub max_value: f64,
    pub settings: IntegrationSettings,
    pub data_wells: Vec<String>,
    pub control_wells: Vec<String>,
    pub noise_window: usize,
    pub noise_model: NoiseModel,
    pub method: FitMethod,
    /// `None` means the optimiser's default budget.
    pub max_nfev: Option<usize>,
}

/// Read and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config, FitError> {
    let text = std::fs::read_to_string(path).map_err(|e| FitError::io(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    parse_config(&text, base)
}

/// Parse configuration text; relative paths are resolved against `base_dir`.
pub fn parse_config(text: &str, base_dir: &Path) -> Result<Config, FitError> {
    let raw: RawConfig =
        serde_yaml::from_str(text).map_err(|e| FitError::ConfigInvalid(e.to_string()))?;
    validate(raw, base_dir)
}

fn validate(raw: RawConfig, base_dir: &Path) -> Result<Config, FitError> {
    let invalid = |msg: String| FitError::ConfigInvalid(msg);

    let title = raw.title.trim().to_string();
    if title.is_empty() {
        return Err(invalid("`title` must not be empty".to_string()));
    }

    let assay_path = resolve(base_dir, &raw.assay.file_path);
    let extension = assay_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if !matches!(extension.as_deref(), Some("xls") | Some("xlsx")) {
        return Err(invalid(format!(
            "`assay.file_path` must be an .xls or .xlsx workbook, got '{}'",
            raw.assay.file_path.display()
        )));
    }
    let layout = PlateLayout::new(raw.assay.rows, raw.assay.cols)?;

    if raw.model.parameters.is_empty() {
        return Err(invalid("`model.parameters` needs at least one entry".to_string()));
    }
    let mut parameters = ParameterSet::new();
    for (name, p) in &raw.model.parameters {
        let key = |field: &str| format!("model.parameters.{name}.{field}");
        let init = p.init_guess.resolve(&key("init_guess"))?;
        let min = p.min.resolve(&key("min"))?;
        let max = p.max.resolve(&key("max"))?;
        parameters.add(Parameter::new(name.clone(), init, min, max)?)?;
    }

    if raw.model.y0.is_empty() {
        return Err(invalid("`model.y0` must not be empty".to_string()));
    }
    let y0 = raw
        .model
        .y0
        .iter()
        .enumerate()
        .map(|(i, v)| v.resolve(&format!("model.y0[{i}]")))
        .collect::<Result<Vec<_>, _>>()?;

    let max_value = raw.model.max_value.resolve("model.max_value")?;
    if max_value <= 0.0 {
        return Err(invalid("`model.max_value` must be positive".to_string()));
    }

    let atol = raw.integration.atol.resolve("integration.atol")?;
    let rtol = raw.integration.rtol.resolve("integration.rtol")?;
    if atol <= 0.0 || rtol <= 0.0 {
        return Err(invalid("`integration.atol` and `integration.rtol` must be positive".to_string()));
    }
    let method: IntegrationMethod = raw.integration.method.trim().parse().map_err(invalid)?;

    for (key, wells) in [
        ("fitter.data_wells", &raw.fitter.data_wells),
        ("fitter.control_wells", &raw.fitter.control_wells),
    ] {
        if wells.is_empty() {
            return Err(invalid(format!("`{key}` must list at least one well")));
        }
        parse_well_refs(wells)?;
    }

    let noise_window = raw.fitter.noise_window.unwrap_or(DEFAULT_NOISE_WINDOW);
    if noise_window == 0 {
        return Err(invalid("`fitter.noise_window` must be at least 1".to_string()));
    }
    if raw.fitter.max_nfev == Some(0) {
        return Err(invalid("`fitter.max_nfev` must be at least 1".to_string()));
    }

    Ok(Config {
        title,
        assay_path,
        layout,
        model_path: resolve(base_dir, &raw.model.func_path),
        parameters,
        y0,
        max_value,
        settings: IntegrationSettings { atol, rtol, method },
        data_wells: raw.fitter.data_wells,
        control_wells: raw.fitter.control_wells,
        noise_window,
        noise_model: raw.fitter.noise_model.unwrap_or_default(),
        method: raw.fitter.method.unwrap_or_default(),
        max_nfev: raw.fitter.max_nfev,
    })
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
