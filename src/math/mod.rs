//! Mathematical utilities: dense linear algebra and rolling-window statistics.

pub mod linalg;
pub mod rolling;

pub use linalg::*;
pub use rolling::*;
