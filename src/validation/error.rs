//! Defines the error types for the validation module.
use crate::store::{DataType, TypedValue};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The declared limit a value was checked against.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "limit", rename_all = "camelCase")]
pub enum Constraint {
    MinValue(f64),
    MaxValue(f64),
    Pattern(String),
    AllowedValues(Vec<String>),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::MinValue(min) => write!(f, "minValue {}", min),
            Constraint::MaxValue(max) => write!(f, "maxValue {}", max),
            Constraint::Pattern(p) => write!(f, "regexPattern /{}/", p),
            Constraint::AllowedValues(v) => write!(f, "allowedValues {:?}", v),
        }
    }
}

/// A value that parsed correctly but lies outside its declared limits.
///
/// For inputs this rejects the call (unless the parameter is advisory); for
/// outputs it is a compliance finding carried by a successful result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintViolation {
    pub parameter: String,
    pub constraint: Constraint,
    pub observed: TypedValue,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' = {} violates {}", self.parameter, self.observed, self.constraint)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required input '{parameter}'")]
    MissingRequiredInput { parameter: String },
    #[error("Cannot coerce {value} to {expected} for '{parameter}'")]
    TypeCoercionFailure { parameter: String, expected: DataType, value: String },
    #[error("Constraint violation: {0}")]
    ConstraintViolation(ConstraintViolation),
}

impl ValidationError {
    pub fn parameter(&self) -> &str {
        match self {
            ValidationError::MissingRequiredInput { parameter }
            | ValidationError::TypeCoercionFailure { parameter, .. } => parameter,
            ValidationError::ConstraintViolation(v) => &v.parameter,
        }
    }
}
