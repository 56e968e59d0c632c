//! Executes a template against caller inputs.
pub mod engine;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod result;

pub use engine::{CalculationEngine, InputValues, Phase};
pub use result::CalculationResult;
