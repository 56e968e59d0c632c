//! Validation rule for `allowedValues` (exact match on string and enum values).

use crate::store::{ParameterSpec, TypedValue};
use crate::validation::error::{Constraint, ConstraintViolation};

pub(crate) fn validate_allowed(spec: &ParameterSpec<'_>, value: &TypedValue) -> Option<ConstraintViolation> {
    let allowed = spec.allowed_values.as_ref()?;
    let text = value.as_text()?;
    if allowed.iter().any(|a| a == text) {
        return None;
    }
    Some(ConstraintViolation {
        parameter: spec.name().to_string(),
        constraint: Constraint::AllowedValues(allowed.clone()),
        observed: value.clone(),
    })
}
