//! Validation of caller inputs and computed outputs against their declarations.
use super::coerce::{coerce, coerce_text};
use super::error::{ConstraintViolation, ValidationError};
use super::rules::{enumeration, numeric, pattern};
use crate::compute::{EvalError, Value};
use crate::error::EngineError;
use crate::store::{DataType, ParameterSpec, TypedValue};
use serde::Serialize;
use serde_json::Value as Json;

/// Per-parameter outcome reported in a `CalculationResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterStatus {
    Valid,
    /// Accepted, but outside its declared limits.
    NonCompliant,
    /// Optional, with neither a value nor a default.
    Omitted,
}

/// A value that passed validation, with any limits it breaks.
#[derive(Debug, Clone, PartialEq)]
pub struct Checked {
    pub value: TypedValue,
    pub status: ParameterStatus,
    pub findings: Vec<ConstraintViolation>,
}

impl Checked {
    fn omitted() -> Self {
        Self { value: TypedValue::Null, status: ParameterStatus::Omitted, findings: Vec::new() }
    }

    fn with_findings(value: TypedValue, findings: Vec<ConstraintViolation>) -> Self {
        let status = if findings.is_empty() { ParameterStatus::Valid } else { ParameterStatus::NonCompliant };
        Self { value, status, findings }
    }
}

/// Runs every constraint rule against `value`, collecting all violations.
pub fn check_constraints(spec: &ParameterSpec<'_>, value: &TypedValue) -> Vec<ConstraintViolation> {
    [
        numeric::validate_range(spec, value),
        pattern::validate_pattern(spec, value),
        enumeration::validate_allowed(spec, value),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Resolves one INPUT parameter from the caller's raw value.
///
/// An absent or `null` value falls back to `defaultValue`. Limits on an
/// advisory parameter are returned as findings; otherwise every violated
/// limit is an error.
pub fn validate_input(spec: &ParameterSpec<'_>, raw: Option<&Json>) -> Result<Checked, Vec<ValidationError>> {
    let param = spec.param;
    let value = match raw.filter(|r| !r.is_null()) {
        Some(raw) => coerce(param.data_type, raw).ok_or_else(|| {
            vec![ValidationError::TypeCoercionFailure {
                parameter: param.name.clone(),
                expected: param.data_type,
                value: raw.to_string(),
            }]
        })?,
        None => match &param.default_value {
            Some(text) => coerce_text(param.data_type, text).ok_or_else(|| {
                vec![ValidationError::TypeCoercionFailure {
                    parameter: param.name.clone(),
                    expected: param.data_type,
                    value: format!("{:?}", text),
                }]
            })?,
            None if param.is_required => {
                return Err(vec![ValidationError::MissingRequiredInput { parameter: param.name.clone() }])
            }
            None => return Ok(Checked::omitted()),
        },
    };

    let violations = check_constraints(spec, &value);
    if violations.is_empty() || param.is_advisory {
        return Ok(Checked::with_findings(value, violations));
    }
    Err(violations.into_iter().map(ValidationError::ConstraintViolation).collect())
}

/// Checks a computed OUTPUT value. Shape errors are hard failures, limit
/// violations are findings.
pub fn validate_output(spec: &ParameterSpec<'_>, computed: Option<&Value>) -> Result<Checked, EngineError> {
    let param = spec.param;
    let computed = match computed {
        Some(Value::Null) | None if param.is_required => {
            return Err(EngineError::MissingOutput { parameter: param.name.clone() })
        }
        Some(Value::Null) | None => return Ok(Checked::omitted()),
        Some(v) => v,
    };
    if matches!(computed, Value::Function(_) | Value::Builtin(_)) {
        return Err(mismatch(spec, "function"));
    }
    let typed = computed
        .to_typed()
        .map_err(|msg| EngineError::evaluation(param.name.as_str(), EvalError::runtime(format!("output is a {}", msg))))?;
    let value = conform(param.data_type, typed).map_err(|found| mismatch(spec, found))?;

    let findings = check_constraints(spec, &value);
    Ok(Checked::with_findings(value, findings))
}

/// Narrows a computed value to the declared type. Text is accepted where the
/// declared type is textual in nature (enum, date).
fn conform(data_type: DataType, value: TypedValue) -> Result<TypedValue, &'static str> {
    match (data_type, value) {
        (DataType::Number, v @ TypedValue::Number(_))
        | (DataType::Boolean, v @ TypedValue::Boolean(_))
        | (DataType::String, v @ TypedValue::Text(_))
        | (DataType::Date, v @ TypedValue::Date(_))
        | (DataType::Array, v @ TypedValue::Sequence(_))
        | (DataType::Object, v @ TypedValue::Record(_)) => Ok(v),
        (DataType::Enum, TypedValue::Text(s)) => Ok(TypedValue::Enum(s)),
        (DataType::Date, TypedValue::Text(s)) => coerce_text(DataType::Date, &s).ok_or("string"),
        (_, other) => Err(other.kind()),
    }
}

fn mismatch(spec: &ParameterSpec<'_>, found: &str) -> EngineError {
    EngineError::OutputTypeMismatch {
        parameter: spec.name().to_string(),
        expected: spec.param.data_type,
        found: found.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Parameter, ParameterModel, ParameterScope, Template};
    use crate::validation::error::Constraint;
    use rstest::rstest;
    use serde_json::json;

    fn with_param(p: Parameter) -> Template {
        Template::new("t", "v", "return {}").with_parameter(p)
    }

    fn input(t: &Template, raw: Option<Json>) -> Result<Checked, Vec<ValidationError>> {
        let model = ParameterModel::load(t).unwrap();
        let spec = model.iter().next().unwrap();
        validate_input(spec, raw.as_ref())
    }

    fn output(t: &Template, computed: Option<Value>) -> Result<Checked, EngineError> {
        let model = ParameterModel::load(t).unwrap();
        let spec = model.iter().next().unwrap();
        validate_output(spec, computed.as_ref())
    }

    fn pct() -> Parameter {
        Parameter::new("pct", DataType::Number, ParameterScope::Input).with_range(Some(0.0), Some(100.0))
    }

    #[rstest]
    #[case(json!(0), true)]
    #[case(json!(100), true)]
    #[case(json!("50"), true)]
    #[case(json!(-1), false)]
    #[case(json!(101), false)]
    fn test_input_range_inclusive(#[case] raw: Json, #[case] accepted: bool) {
        let t = with_param(pct());
        let result = input(&t, Some(raw));
        assert_eq!(result.is_ok(), accepted);
        if let Err(errors) = result {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].parameter(), "pct");
            assert!(matches!(errors[0], ValidationError::ConstraintViolation(_)));
        }
    }

    #[test]
    fn test_input_default_is_coerced_and_checked() {
        let t = with_param(pct().with_default("12.5"));
        let checked = input(&t, None).unwrap();
        assert_eq!(checked.value, TypedValue::Number(12.5));
        assert_eq!(checked.status, ParameterStatus::Valid);

        let t = with_param(pct().with_default("250"));
        assert!(input(&t, Some(Json::Null)).is_err());
    }

    #[test]
    fn test_input_missing_or_omitted() {
        let t = with_param(pct().required());
        assert_eq!(
            input(&t, None).unwrap_err(),
            [ValidationError::MissingRequiredInput { parameter: "pct".into() }]
        );
        let t = with_param(pct());
        assert_eq!(input(&t, None).unwrap().status, ParameterStatus::Omitted);
    }

    #[test]
    fn test_input_coercion_failure_keeps_raw_value() {
        let t = with_param(pct());
        let errors = input(&t, Some(json!("ten"))).unwrap_err();
        assert_eq!(
            errors,
            [ValidationError::TypeCoercionFailure {
                parameter: "pct".into(),
                expected: DataType::Number,
                value: "\"ten\"".into(),
            }]
        );
    }

    #[test]
    fn test_advisory_input_reports_finding() {
        let t = with_param(pct().advisory());
        let checked = input(&t, Some(json!(120))).unwrap();
        assert_eq!(checked.status, ParameterStatus::NonCompliant);
        assert_eq!(checked.findings[0].constraint, Constraint::MaxValue(100.0));
        assert_eq!(checked.value, TypedValue::Number(120.0));
    }

    #[test]
    fn test_all_violations_of_one_value_are_reported() {
        let p = Parameter::new("codigo", DataType::String, ParameterScope::Input)
            .with_pattern("[A-Z]+")
            .with_allowed_values("AB,CD");
        let t = with_param(p);
        let errors = input(&t, Some(json!("x1"))).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_output_limits_are_findings() {
        let p = Parameter::new("pendiente", DataType::Number, ParameterScope::Output).with_range(None, Some(12.0));
        let t = with_param(p);
        let checked = output(&t, Some(Value::Number(14.0))).unwrap();
        assert_eq!(checked.status, ParameterStatus::NonCompliant);
        assert_eq!(checked.findings.len(), 1);
    }

    #[rstest]
    #[case(DataType::Number, Value::Text("8".into()), "string")]
    #[case(DataType::Boolean, Value::Number(1.0), "number")]
    #[case(DataType::Array, Value::Bool(true), "boolean")]
    fn test_output_type_mismatch(#[case] data_type: DataType, #[case] computed: Value, #[case] found: &str) {
        let t = with_param(Parameter::new("r", data_type, ParameterScope::Output));
        assert_eq!(
            output(&t, Some(computed)).unwrap_err(),
            EngineError::OutputTypeMismatch { parameter: "r".into(), expected: data_type, found: found.into() }
        );
    }

    #[test]
    fn test_output_non_finite_is_evaluation_error() {
        let t = with_param(Parameter::new("r", DataType::Number, ParameterScope::Output));
        let err = output(&t, Some(Value::Number(f64::INFINITY))).unwrap_err();
        assert!(matches!(err, EngineError::Evaluation { ref formula, .. } if formula == "r"));
    }

    #[test]
    fn test_output_enum_and_missing() {
        let p = Parameter::new("zona", DataType::Enum, ParameterScope::Output).with_allowed_values("I,II");
        let t = with_param(p.clone());
        assert_eq!(output(&t, Some(Value::Text("II".into()))).unwrap().value, TypedValue::Enum("II".into()));
        assert_eq!(output(&t, None).unwrap().status, ParameterStatus::Omitted);

        let t = with_param(p.required());
        assert_eq!(
            output(&t, Some(Value::Null)).unwrap_err(),
            EngineError::MissingOutput { parameter: "zona".into() }
        );
    }
}
