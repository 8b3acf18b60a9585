//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - fit parameters and the name → value view passed to the ODE (`ParameterSet`, `ParamMap`)
//! - configuration enums (`IntegrationMethod`, `NoiseModel`, `FitMethod`)
//! - fit outputs (`FitResult`, `FitStatistics`, `ParameterErrors`)

pub mod params;
pub mod types;

pub use params::*;
pub use types::*;
