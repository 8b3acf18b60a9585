//! Nonlinear least-squares fitting.
//!
//! Responsibilities:
//!
//! - parameter bounds (sine transform and projection)
//! - the Levenberg–Marquardt engine
//! - covariance recovery and goodness-of-fit statistics
//! - the fitter that ties model, data and noise weights together

pub mod bounds;
pub mod covariance;
pub mod fitter;
pub mod lm;

pub use bounds::*;
pub use covariance::*;
pub use fitter::*;
pub use lm::*;
