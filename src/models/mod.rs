//! ODE models.
//!
//! - [`OdeRhs`]: the `f(t, state, θ)` contract
//! - [`ExprModel`]: right-hand sides compiled from model files
//! - [`ModelEvaluator`]: integrates a model at the current parameters

pub mod evaluator;
pub mod expr;
pub mod rhs;

pub use evaluator::*;
pub use expr::*;
pub use rhs::*;
