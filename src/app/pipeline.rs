//! Shared fit pipeline used by the `fit`, `check` and `demo` commands.
//!
//! The stages form a strict chain:
//! load assay -> select signal wells -> select control wells -> normalise ->
//! estimate noise -> construct fitter -> fit -> report data
//!
//! The command handlers only decide where a [`FitJob`] comes from and what to
//! do with the [`RunOutput`].

use crate::assay::{Assay, load_assay, parse_well_refs, select_wells};
use crate::config::Config;
use crate::data::{DEFAULT_NOISE_WINDOW, DemoPlate, check_weights, estimate_noise, normalise};
use crate::domain::{FitMethod, IntegrationSettings, NoiseModel, ParameterSet, ReportData};
use crate::error::FitError;
use crate::fit::Fitter;
use crate::models::{ExprModel, ModelEvaluator, OdeRhs};

/// Everything one fit needs, whether it came from a configuration file or the demo plate.
#[derive(Debug, Clone)]
pub struct FitJob<R> {
    pub title: String,
    pub assay: Assay,
    pub data_wells: Vec<String>,
    pub control_wells: Vec<String>,
    pub rhs: R,
    pub parameters: ParameterSet,
    pub y0: Vec<f64>,
    pub max_value: f64,
    pub settings: IntegrationSettings,
    pub noise_window: usize,
    pub noise_model: NoiseModel,
    pub method: FitMethod,
    pub max_nfev: Option<usize>,
}

/// Normalised observations and their noise weights.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSeries {
    pub observed: Vec<f64>,
    pub noise: Vec<f64>,
}

/// All computed outputs of a single fit.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: ReportData,
    pub noise: Vec<f64>,
}

/// What `pfit check` found, without fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSummary {
    pub title: String,
    pub test_name: String,
    pub cycles: usize,
    pub duration: f64,
    pub parameters: Vec<String>,
    pub observed_range: (f64, f64),
}

/// Load the assay and model a configuration points at.
pub fn job_from_config(config: &Config) -> Result<FitJob<ExprModel>, FitError> {
    log::info!("Loading assay data.");
    let assay = load_assay(&config.assay_path, config.layout)?;
    log::debug!(
        "Assay '{}' ({}): {} cycles, {} blank readings.",
        assay.test_name,
        assay.measurement,
        assay.cycles(),
        assay.wells.blank_count()
    );

    let rhs = ExprModel::load(&config.model_path, config.parameters.names())?;

    Ok(FitJob {
        title: config.title.clone(),
        assay,
        data_wells: config.data_wells.clone(),
        control_wells: config.control_wells.clone(),
        rhs,
        parameters: config.parameters.clone(),
        y0: config.y0.clone(),
        max_value: config.max_value,
        settings: config.settings,
        noise_window: config.noise_window,
        noise_model: config.noise_model,
        method: config.method,
        max_nfev: config.max_nfev,
    })
}

/// Build a job for the synthetic demo plate.
pub fn job_from_demo(plate: DemoPlate) -> Result<FitJob<ExprModel>, FitError> {
    let rhs = ExprModel::compile(crate::data::DEMO_MODEL, plate.parameters.names())?;
    Ok(FitJob {
        title: "Synthetic bimolecular association".to_string(),
        assay: plate.assay,
        data_wells: plate.data_wells,
        control_wells: plate.control_wells,
        rhs,
        parameters: plate.parameters,
        y0: plate.y0,
        max_value: plate.max_value,
        settings: plate.settings,
        noise_window: DEFAULT_NOISE_WINDOW,
        noise_model: NoiseModel::default(),
        method: FitMethod::default(),
        max_nfev: None,
    })
}

/// Select, normalise and weight the observations of `job`.
pub fn prepare_series<R>(job: &FitJob<R>) -> Result<PreparedSeries, FitError> {
    let data_refs = parse_well_refs(&job.data_wells)?;
    let control_refs = parse_well_refs(&job.control_wells)?;

    let signal = select_wells(&job.assay.wells, &data_refs)?;
    let control = select_wells(&job.assay.wells, &control_refs)?;
    let observed = normalise(&signal, &control)?;

    let noise = estimate_noise(&observed, job.noise_window, job.noise_model);
    check_weights(&noise)?;
    Ok(PreparedSeries { observed, noise })
}

/// Execute the full pipeline and return the computed outputs.
pub fn run_fit<R: OdeRhs>(job: FitJob<R>) -> Result<RunOutput, FitError> {
    let series = prepare_series(&job)?;
    let time = job.assay.time.clone();

    let evaluator = ModelEvaluator::new(
        job.rhs,
        job.parameters,
        job.y0,
        job.max_value,
        time.clone(),
        job.settings,
    )?;
    let mut fitter = Fitter::new(evaluator, series.observed.clone(), series.noise.clone(), job.method)?;
    if let Some(max_nfev) = job.max_nfev {
        fitter = fitter.with_max_nfev(max_nfev);
    }

    log::info!("Fitting model.");
    let fit = fitter.fit()?;
    let fitted = fitter.fitted()?;

    Ok(RunOutput {
        report: ReportData {
            title: job.title,
            time,
            observed: series.observed,
            fitted,
            fit,
        },
        noise: series.noise,
    })
}

/// Run every stage up to the fitter and evaluate the model once at the initial guess.
pub fn check_job<R: OdeRhs>(job: FitJob<R>) -> Result<CheckSummary, FitError> {
    let series = prepare_series(&job)?;
    let parameters = job.parameters.names().to_vec();
    let time = job.assay.time.clone();

    let mut evaluator = ModelEvaluator::new(
        job.rhs,
        job.parameters,
        job.y0,
        job.max_value,
        time.clone(),
        job.settings,
    )?;
    let start = evaluator.normalised()?;
    if start.len() != time.len() {
        return Err(FitError::IntegrationTruncated {
            message: "model returned a short trajectory".to_string(),
            samples: start.len(),
            expected: time.len(),
        });
    }
    if start.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteResidual);
    }

    let (lo, hi) = series
        .observed
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

    Ok(CheckSummary {
        title: job.title,
        test_name: job.assay.test_name,
        cycles: time.len(),
        duration: time.last().copied().unwrap_or(0.0) - time.first().copied().unwrap_or(0.0),
        parameters,
        observed_range: (lo, hi),
    })
}
