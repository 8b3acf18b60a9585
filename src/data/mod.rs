//! Series derived from the assay: normalisation, noise weights, and a
//! synthetic plate generator.

pub mod noise;
pub mod normalise;
pub mod synthetic;

pub use noise::*;
pub use normalise::*;
pub use synthetic::*;
