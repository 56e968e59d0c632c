//! Input coercion and constraint checks for inputs and outputs.
pub mod coerce;
pub mod error;
mod rules;
pub mod validator;

pub use coerce::{coerce, coerce_text};
pub use error::{Constraint, ConstraintViolation, ValidationError};
pub use validator::{check_constraints, validate_input, validate_output, Checked, ParameterStatus};
