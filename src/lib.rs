//! `plate-fit` library crate.
//!
//! Fits user-supplied ODE models to plate-reader fluorescence time series and
//! reports the fit. The binary (`pfit`) is a thin wrapper around this library
//! so that:
//!
//! - the pipeline is testable without spawning processes
//! - models can be supplied as closures as well as model files
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod assay;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod ode;
pub mod plot;
pub mod report;
