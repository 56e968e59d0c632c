//! Validation rule for numeric ranges (`minValue` / `maxValue`, inclusive).

use crate::store::{ParameterSpec, TypedValue};
use crate::validation::error::{Constraint, ConstraintViolation};

pub(crate) fn validate_range(spec: &ParameterSpec<'_>, value: &TypedValue) -> Option<ConstraintViolation> {
    let n = value.as_number()?;
    let constraint = match (spec.param.min_value, spec.param.max_value) {
        (Some(min), _) if n < min => Constraint::MinValue(min),
        (_, Some(max)) if n > max => Constraint::MaxValue(max),
        _ => return None,
    };
    Some(ConstraintViolation { parameter: spec.name().to_string(), constraint, observed: value.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DataType, Parameter, ParameterScope};
    use rstest::rstest;

    #[rstest]
    #[case(-1.0, Some(Constraint::MinValue(0.0)))]
    #[case(0.0, None)]
    #[case(100.0, None)]
    #[case(101.0, Some(Constraint::MaxValue(100.0)))]
    fn test_bounds_are_inclusive(#[case] n: f64, #[case] expected: Option<Constraint>) {
        let p = Parameter::new("pct", DataType::Number, ParameterScope::Input).with_range(Some(0.0), Some(100.0));
        let spec = ParameterSpec { param: &p, pattern: None, allowed_values: None };
        let found = validate_range(&spec, &TypedValue::Number(n)).map(|v| v.constraint);
        assert_eq!(found, expected);
    }
}
