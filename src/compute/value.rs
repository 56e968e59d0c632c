//! Runtime values of the formula interpreter.
//!
//! Arrays and objects are reference-counted and copied on write, so passing
//! them around (into closures, loop bindings, callbacks) is cheap.
use crate::formula::ast::FunctionDef;
use crate::store::TypedValue;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Template-level bindings visible to a formula (read-only during evaluation).
pub type Scope = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub enum ClosureEnv {
    /// An environment slot of the interpreter that created the closure.
    Arena(usize),
    /// Captured bindings copied out when the closure outlived its interpreter.
    Detached(Rc<HashMap<String, Value>>),
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub def: Arc<FunctionDef>,
    pub env: ClosureEnv,
}

impl Closure {
    pub fn name(&self) -> Option<&str> {
        self.def.name.as_deref()
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Array(Rc<Vec<Value>>),
    Object(Rc<BTreeMap<String, Value>>),
    Function(Rc<Closure>),
    /// A library function or namespace, by qualified name (`Math.sqrt`, `Math`).
    Builtin(&'static str),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    pub fn object(entries: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(entries))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    /// Result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Null | Value::Date(_) | Value::Array(_) | Value::Object(_) => "object",
            Value::Builtin(name) if matches!(*name, "Math" | "Object" | "Array") => "object",
            other => other.type_name(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String conversion used by concatenation and template literals.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Array(items) => items.iter().map(Value::to_display).collect::<Vec<_>>().join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(c) => format!("function {}", c.name().unwrap_or("anonymous")),
            Value::Builtin(name) => format!("function {}", name),
        }
    }

    pub fn from_typed(value: &TypedValue) -> Self {
        match value {
            TypedValue::Null => Value::Null,
            TypedValue::Number(n) => Value::Number(*n),
            TypedValue::Text(s) | TypedValue::Enum(s) => Value::Text(s.clone()),
            TypedValue::Boolean(b) => Value::Bool(*b),
            TypedValue::Date(d) => Value::Date(*d),
            TypedValue::Sequence(items) => Value::array(items.iter().map(Value::from_typed).collect()),
            TypedValue::Record(map) => Value::object(
                map.iter().map(|(k, v)| (k.clone(), Value::from_typed(v))).collect(),
            ),
        }
    }

    /// Structural conversion for reporting. Functions and non-finite numbers
    /// have no representation.
    pub fn to_typed(&self) -> Result<TypedValue, String> {
        Ok(match self {
            Value::Null => TypedValue::Null,
            Value::Bool(b) => TypedValue::Boolean(*b),
            Value::Number(n) if n.is_finite() => TypedValue::Number(*n),
            Value::Number(n) => return Err(format!("non-finite number {}", format_number(*n))),
            Value::Text(s) => TypedValue::Text(s.clone()),
            Value::Date(d) => TypedValue::Date(*d),
            Value::Array(items) => TypedValue::Sequence(
                items.iter().map(Value::to_typed).collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => TypedValue::Record(
                map.iter()
                    .map(|(k, v)| v.to_typed().map(|t| (k.clone(), t)))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Function(_) | Value::Builtin(_) => return Err("a function".to_string()),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}

/// Formats numbers the way the host language of the corpus prints them.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{:.0}", n + 0.0)
    } else {
        format!("{}", n)
    }
}
