//! Synthetic plate generation for `pfit demo`.
//!
//! The plate follows a bimolecular association `A + B → P` integrated at known
//! parameters. Data wells read `level · p(t) / max_value` and control wells
//! read `level`, both with multiplicative Gaussian noise, so the normalised
//! signal tracks the model's product fraction.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::assay::{Assay, PlateLayout, WellMatrix};
use crate::domain::{IntegrationMethod, IntegrationSettings, Parameter, ParameterSet};
use crate::error::FitError;
use crate::models::{ExprModel, ModelEvaluator};

/// Model file used by the demo.
pub const DEMO_MODEL: &str = "\
# bimolecular association A + B -> P
state a, b, p
let rate = k * a * b
d(a)/dt = -rate
d(b)/dt = -rate
d(p)/dt = rate
";

/// Everything needed to fit the demo plate.
#[derive(Debug, Clone)]
pub struct DemoPlate {
    pub assay: Assay,
    pub data_wells: Vec<String>,
    pub control_wells: Vec<String>,
    pub parameters: ParameterSet,
    /// Value of each parameter used to generate the readings.
    pub truth: Vec<f64>,
    pub y0: Vec<f64>,
    pub max_value: f64,
    pub settings: IntegrationSettings,
}

/// Knobs for [`demo_plate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoOptions {
    pub seed: u64,
    pub cycles: usize,
    /// Seconds between cycles.
    pub interval: f64,
    /// Relative standard deviation of every reading.
    pub noise: f64,
    /// Control-well fluorescence.
    pub level: f64,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            seed: 7,
            cycles: 61,
            interval: 60.0,
            noise: 0.01,
            level: 25_000.0,
        }
    }
}

const TRUE_RATE: f64 = 2.0e-4;
const CONCENTRATION: f64 = 5.0;
const DATA_WELLS: [&str; 1] = ["B2:B4"];
const CONTROL_WELLS: [&str; 1] = ["G10:G12"];

pub fn demo_plate(options: &DemoOptions) -> Result<DemoPlate, FitError> {
    if options.cycles < 2 {
        return Err(FitError::ConfigInvalid("demo needs at least two cycles".to_string()));
    }
    if !(options.interval.is_finite() && options.interval > 0.0) {
        return Err(FitError::ConfigInvalid("demo cycle interval must be positive".to_string()));
    }
    if !(options.noise.is_finite() && options.noise >= 0.0 && options.level > 0.0) {
        return Err(FitError::ConfigInvalid("demo noise and level must be non-negative".to_string()));
    }

    let mut parameters = ParameterSet::new();
    parameters.add(Parameter::new("k", 1.0e-3, 1.0e-6, 1.0e-2)?)?;
    let truth = vec![TRUE_RATE];
    let y0 = vec![CONCENTRATION, CONCENTRATION, 0.0];
    let max_value = CONCENTRATION;
    let settings = IntegrationSettings {
        atol: 1e-9,
        rtol: 1e-7,
        method: IntegrationMethod::Lsoda,
    };

    let time: Vec<f64> = (0..options.cycles).map(|i| i as f64 * options.interval).collect();
    let model = ExprModel::compile(DEMO_MODEL, parameters.names())?;
    let mut evaluator = ModelEvaluator::new(model, parameters.clone(), y0.clone(), max_value, time.clone(), settings)?;
    evaluator.set_params(&truth)?;
    let fraction = evaluator.normalised()?;

    let layout = PlateLayout::default();
    let mut rng = StdRng::seed_from_u64(options.seed);
    let normal = Normal::new(0.0, options.noise)
        .map_err(|e| FitError::ConfigInvalid(format!("noise distribution error: {e}")))?;

    let data_rows = 1..=1;
    let data_cols = 1..=3;
    let control_rows = 6..=6;
    let control_cols = 9..=11;

    let mut wells = WellMatrix::new(layout.rows, layout.cols, options.cycles);
    for row in 0..layout.rows {
        for col in 0..layout.cols {
            let is_data = data_rows.contains(&row) && data_cols.contains(&col);
            let is_control = control_rows.contains(&row) && control_cols.contains(&col);
            for (cycle, frac) in fraction.iter().enumerate() {
                let clean = if is_data {
                    options.level * frac
                } else if is_control {
                    options.level
                } else {
                    // Empty wells still read plate background.
                    0.02 * options.level
                };
                let noisy = clean * (1.0 + normal.sample(&mut rng));
                wells.set(row, col, cycle, Some(noisy));
            }
        }
    }

    log::debug!(
        "Generated a {}x{} demo plate with {} cycles (seed {}).",
        layout.rows,
        layout.cols,
        options.cycles,
        options.seed
    );

    Ok(DemoPlate {
        assay: Assay {
            test_name: "Synthetic bimolecular association".to_string(),
            measurement: "Fluorescence (synthetic)".to_string(),
            cycle_interval: Some(options.interval),
            time,
            wells,
        },
        data_wells: DATA_WELLS.iter().map(|s| s.to_string()).collect(),
        control_wells: CONTROL_WELLS.iter().map(|s| s.to_string()).collect(),
        parameters,
        truth,
        y0,
        max_value,
        settings,
    })
}
