//! The closed set of value shapes a parameter can hold.
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    Number(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    Enum(String),
    Sequence(Vec<TypedValue>),
    Record(BTreeMap<String, TypedValue>),
}

impl TypedValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TypedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Text content of `Text` and `Enum` values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) | TypedValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Short shape name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            TypedValue::Null => "null",
            TypedValue::Number(_) => "number",
            TypedValue::Text(_) => "string",
            TypedValue::Boolean(_) => "boolean",
            TypedValue::Date(_) => "date",
            TypedValue::Enum(_) => "enum",
            TypedValue::Sequence(_) => "array",
            TypedValue::Record(_) => "object",
        }
    }

    /// Converts arbitrary JSON into the untyped-structure subset (no dates or enums).
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TypedValue::Null,
            serde_json::Value::Bool(b) => TypedValue::Boolean(*b),
            serde_json::Value::Number(n) => TypedValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => TypedValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                TypedValue::Sequence(items.iter().map(TypedValue::from_json).collect())
            }
            serde_json::Value::Object(map) => TypedValue::Record(
                map.iter()
                    .map(|(k, v)| (k.clone(), TypedValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => f.write_str("null"),
            TypedValue::Number(n) => write!(f, "{}", n),
            TypedValue::Text(s) | TypedValue::Enum(s) => write!(f, "{:?}", s),
            TypedValue::Boolean(b) => write!(f, "{}", b),
            TypedValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            TypedValue::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            TypedValue::Record(map) => {
                f.write_str("{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, item)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<f64> for TypedValue {
    fn from(n: f64) -> Self {
        TypedValue::Number(n)
    }
}

impl From<bool> for TypedValue {
    fn from(b: bool) -> Self {
        TypedValue::Boolean(b)
    }
}

impl From<&str> for TypedValue {
    fn from(s: &str) -> Self {
        TypedValue::Text(s.to_string())
    }
}
