//! Calculation-template execution engine.
//!
//! A template is a main formula plus typed, constrained parameters. Helper
//! parameters carry their own formulas and are evaluated in dependency order
//! before the main formula, whose returned object fills the OUTPUT
//! parameters. Formulas run in a sandboxed interpreter with no I/O and a
//! bounded amount of work.

pub mod analysis;
pub mod computation;
pub mod compute;
pub mod config;
pub mod display;
pub mod error;
pub mod formula;
pub mod graph;
pub mod store;
pub mod validation;

pub use computation::{CalculationEngine, CalculationResult, InputValues};
pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind};
pub use store::{DataType, Parameter, ParameterScope, Template, TypedValue};
