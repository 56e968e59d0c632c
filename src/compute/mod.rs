//! Runs compiled formulas inside a sandbox with no I/O and bounded work.
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod value;

pub use error::{EvalError, EvalResult};
pub use interpreter::{evaluate, Limits};
pub use value::{Scope, Value};
