//! Validation rule for `regexPattern` (full match on string values).

use crate::store::{ParameterSpec, TypedValue};
use crate::validation::error::{Constraint, ConstraintViolation};

pub(crate) fn validate_pattern(spec: &ParameterSpec<'_>, value: &TypedValue) -> Option<ConstraintViolation> {
    let (pattern, TypedValue::Text(text)) = (spec.pattern.as_ref()?, value) else {
        return None;
    };
    if pattern.is_match(text) {
        return None;
    }
    let source = spec.param.regex_pattern.clone().unwrap_or_default();
    Some(ConstraintViolation {
        parameter: spec.name().to_string(),
        constraint: Constraint::Pattern(source),
        observed: value.clone(),
    })
}
