//! Coercion of raw caller values and textual defaults to a declared type.
use crate::store::{DataType, TypedValue};
use chrono::{DateTime, NaiveDate};
use serde_json::Value as Json;

/// Converts a raw value to `data_type`, or `None` when it has no reading in
/// that type. Text is accepted for every type.
pub fn coerce(data_type: DataType, raw: &Json) -> Option<TypedValue> {
    match data_type {
        DataType::Number => match raw {
            Json::Number(n) => n.as_f64().map(TypedValue::Number),
            Json::String(s) => parse_number(s).map(TypedValue::Number),
            _ => None,
        },
        DataType::Boolean => match raw {
            Json::Bool(b) => Some(TypedValue::Boolean(*b)),
            Json::String(s) => parse_bool(s).map(TypedValue::Boolean),
            Json::Number(n) => match n.as_f64() {
                Some(x) if x == 1.0 => Some(TypedValue::Boolean(true)),
                Some(x) if x == 0.0 => Some(TypedValue::Boolean(false)),
                _ => None,
            },
            _ => None,
        },
        DataType::Date => match raw {
            Json::String(s) => parse_date(s).map(TypedValue::Date),
            _ => None,
        },
        DataType::String => scalar_text(raw).map(TypedValue::Text),
        DataType::Enum => scalar_text(raw).map(TypedValue::Enum),
        DataType::Array => match structured(raw)? {
            v @ Json::Array(_) => Some(TypedValue::from_json(&v)),
            _ => None,
        },
        DataType::Object => match structured(raw)? {
            v @ Json::Object(_) => Some(TypedValue::from_json(&v)),
            _ => None,
        },
    }
}

/// Coerces a stored `defaultValue`.
pub fn coerce_text(data_type: DataType, text: &str) -> Option<TypedValue> {
    coerce(data_type, &Json::String(text.to_string()))
}

fn parse_number(text: &str) -> Option<f64> {
    let n: f64 = text.trim().parse().ok()?;
    n.is_finite().then_some(n)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp reduced to its date.
fn parse_date(text: &str) -> Option<NaiveDate> {
    let t = text.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(t).ok().map(|dt| dt.date_naive()))
}

fn scalar_text(raw: &Json) -> Option<String> {
    match raw {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Structured values arrive either as JSON or as JSON literal text.
fn structured(raw: &Json) -> Option<Json> {
    match raw {
        Json::String(s) => serde_json::from_str(s).ok(),
        other => Some(other.clone()),
    }
}
