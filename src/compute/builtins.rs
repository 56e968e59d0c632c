//! The pure function library exposed to formulas.
//!
//! Only deterministic functions are offered: there is no `Math.random`, no
//! clock access, and no I/O.
use super::error::{EvalError, EvalResult};
use super::value::{format_number, Value};

/// Callable library functions, by qualified name.
const FUNCTIONS: &[&str] = &[
    "Math.abs", "Math.pow", "Math.sqrt", "Math.cbrt", "Math.floor", "Math.ceil",
    "Math.round", "Math.trunc", "Math.sign", "Math.min", "Math.max",
    "Math.sin", "Math.cos", "Math.tan", "Math.asin", "Math.acos", "Math.atan", "Math.atan2",
    "Math.sinh", "Math.cosh", "Math.tanh",
    "Math.log", "Math.log10", "Math.log2", "Math.exp", "Math.hypot",
    "Number", "Number.isFinite", "Number.isInteger",
    "parseFloat", "parseInt", "isNaN", "isFinite", "String", "Boolean",
    "Array.isArray", "Object.keys", "Object.values", "Object.entries",
];

/// Namespaces that carry members but cannot be called.
const NAMESPACES: &[&str] = &["Math", "Object", "Array"];

const MATH_CONSTANTS: &[(&str, f64)] = &[
    ("PI", std::f64::consts::PI),
    ("E", std::f64::consts::E),
    ("SQRT2", std::f64::consts::SQRT_2),
    ("LN2", std::f64::consts::LN_2),
    ("LN10", std::f64::consts::LN_10),
];

/// Whether a free identifier is provided by the library.
pub fn is_global(name: &str) -> bool {
    global(name).is_some()
}

pub fn global(name: &str) -> Option<Value> {
    match name {
        "PI" => return Some(Value::Number(std::f64::consts::PI)),
        "E" => return Some(Value::Number(std::f64::consts::E)),
        "Infinity" => return Some(Value::Number(f64::INFINITY)),
        "NaN" => return Some(Value::Number(f64::NAN)),
        "undefined" => return Some(Value::Null),
        _ => {}
    }
    NAMESPACES.iter().chain(FUNCTIONS).copied().find(|f| *f == name).map(Value::Builtin)
}

/// `owner.property` for a library namespace, e.g. `Math.sqrt` or `Math.PI`.
pub fn member(owner: &str, property: &str) -> EvalResult<Value> {
    if owner == "Math" {
        if let Some((_, c)) = MATH_CONSTANTS.iter().find(|(n, _)| *n == property) {
            return Ok(Value::Number(*c));
        }
    }
    if owner == "Number" {
        match property {
            "MAX_SAFE_INTEGER" => return Ok(Value::Number(9_007_199_254_740_991.0)),
            "EPSILON" => return Ok(Value::Number(f64::EPSILON)),
            _ => {}
        }
    }
    let qualified = format!("{}.{}", owner, property);
    FUNCTIONS
        .iter()
        .copied()
        .find(|f| *f == qualified)
        .map(Value::Builtin)
        .ok_or_else(|| EvalError::runtime(format!("{} is not available", qualified)))
}

fn arg<'v>(args: &'v [Value], i: usize) -> &'v Value {
    args.get(i).unwrap_or(&Value::Null)
}

fn number(name: &str, args: &[Value], i: usize) -> EvalResult<f64> {
    match args.get(i) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(EvalError::runtime(format!(
            "{} expects a number, got {}",
            name,
            other.type_name()
        ))),
        None => Err(EvalError::runtime(format!("{} expects at least {} argument(s)", name, i + 1))),
    }
}

fn unary(name: &str, args: &[Value], f: fn(f64) -> f64) -> EvalResult<Value> {
    Ok(Value::Number(f(number(name, args, 0)?)))
}

/// Half-way cases round towards positive infinity.
fn round_half_up(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 { floor + 1.0 } else { floor }
}

fn sign(x: f64) -> f64 {
    if x.is_nan() || x == 0.0 { x } else { x.signum() }
}

/// Number conversion of `Number(x)`.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::Text(s) => {
            let t = s.trim();
            if t.is_empty() { 0.0 } else { t.parse().unwrap_or(f64::NAN) }
        }
        _ => f64::NAN,
    }
}

/// Longest numeric prefix, as `parseFloat` reads it.
fn parse_float(text: &str) -> f64 {
    let t = text.trim_start();
    let bytes = t.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    if t[i..].starts_with("Infinity") {
        return if t.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    let digits = |from: usize| bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count();
    let int_digits = digits(i);
    i += int_digits;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        frac_digits = digits(i + 1);
        i += 1 + frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return f64::NAN;
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_digits = digits(j);
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }
    t[..i].parse().unwrap_or(f64::NAN)
}

fn parse_int(text: &str, radix: u32) -> f64 {
    let t = text.trim_start();
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let digits = if radix == 16 {
        digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")).unwrap_or(digits)
    } else {
        digits
    };
    let prefix: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if prefix.is_empty() {
        return f64::NAN;
    }
    let magnitude = prefix
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative { -magnitude } else { magnitude }
}

fn keys(value: &Value) -> EvalResult<Vec<String>> {
    match value {
        Value::Object(map) => Ok(map.keys().cloned().collect()),
        Value::Array(items) => Ok((0..items.len()).map(|i| i.to_string()).collect()),
        other => Err(EvalError::runtime(format!("cannot list keys of {}", other.type_name()))),
    }
}

/// Calls a library function with already evaluated arguments.
pub fn call(name: &str, args: &[Value]) -> EvalResult<Value> {
    let value = match name {
        "Math.abs" => unary(name, args, f64::abs)?,
        "Math.sqrt" => unary(name, args, f64::sqrt)?,
        "Math.cbrt" => unary(name, args, f64::cbrt)?,
        "Math.floor" => unary(name, args, f64::floor)?,
        "Math.ceil" => unary(name, args, f64::ceil)?,
        "Math.trunc" => unary(name, args, f64::trunc)?,
        "Math.sign" => unary(name, args, sign)?,
        "Math.sin" => unary(name, args, f64::sin)?,
        "Math.cos" => unary(name, args, f64::cos)?,
        "Math.tan" => unary(name, args, f64::tan)?,
        "Math.asin" => unary(name, args, f64::asin)?,
        "Math.acos" => unary(name, args, f64::acos)?,
        "Math.atan" => unary(name, args, f64::atan)?,
        "Math.sinh" => unary(name, args, f64::sinh)?,
        "Math.cosh" => unary(name, args, f64::cosh)?,
        "Math.tanh" => unary(name, args, f64::tanh)?,
        "Math.log" => unary(name, args, f64::ln)?,
        "Math.log10" => unary(name, args, f64::log10)?,
        "Math.log2" => unary(name, args, f64::log2)?,
        "Math.exp" => unary(name, args, f64::exp)?,
        "Math.round" => {
            let x = number(name, args, 0)?;
            match args.get(1) {
                // Optional number of decimals.
                Some(_) => {
                    let factor = 10f64.powi(number(name, args, 1)? as i32);
                    Value::Number(round_half_up(x * factor) / factor)
                }
                None => Value::Number(round_half_up(x)),
            }
        }
        "Math.pow" => Value::Number(number(name, args, 0)?.powf(number(name, args, 1)?)),
        "Math.atan2" => Value::Number(number(name, args, 0)?.atan2(number(name, args, 1)?)),
        "Math.hypot" => {
            let mut sum = 0.0;
            for i in 0..args.len() {
                sum += number(name, args, i)?.powi(2);
            }
            Value::Number(sum.sqrt())
        }
        "Math.min" | "Math.max" => {
            let mut acc = if name == "Math.min" { f64::INFINITY } else { f64::NEG_INFINITY };
            for i in 0..args.len() {
                let x = number(name, args, i)?;
                if x.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                acc = if name == "Math.min" { acc.min(x) } else { acc.max(x) };
            }
            Value::Number(acc)
        }
        "Number" => Value::Number(args.first().map_or(0.0, to_number)),
        "Number.isFinite" => Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite())),
        "Number.isInteger" => {
            Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite() && n.trunc() == *n))
        }
        "isNaN" => Value::Bool(to_number(arg(args, 0)).is_nan()),
        "isFinite" => Value::Bool(to_number(arg(args, 0)).is_finite()),
        "parseFloat" => Value::Number(parse_float(&arg(args, 0).to_display())),
        "parseInt" => {
            let radix = match args.get(1) {
                Some(Value::Number(r)) if (2.0..=36.0).contains(r) => *r as u32,
                Some(Value::Number(_)) => return Ok(Value::Number(f64::NAN)),
                _ => 10,
            };
            Value::Number(parse_int(&arg(args, 0).to_display(), radix))
        }
        "String" => Value::Text(args.first().map_or_else(String::new, Value::to_display)),
        "Boolean" => Value::Bool(arg(args, 0).truthy()),
        "Array.isArray" => Value::Bool(matches!(arg(args, 0), Value::Array(_))),
        "Object.keys" => Value::array(keys(arg(args, 0))?.into_iter().map(Value::Text).collect()),
        "Object.values" => match arg(args, 0) {
            Value::Object(map) => Value::array(map.values().cloned().collect()),
            Value::Array(items) => Value::Array(items.clone()),
            other => return Err(EvalError::runtime(format!("cannot list values of {}", other.type_name()))),
        },
        "Object.entries" => match arg(args, 0) {
            Value::Object(map) => Value::array(
                map.iter()
                    .map(|(k, v)| Value::array(vec![Value::Text(k.clone()), v.clone()]))
                    .collect(),
            ),
            other => return Err(EvalError::runtime(format!("cannot list entries of {}", other.type_name()))),
        },
        other => return Err(EvalError::runtime(format!("{} is not a function", other))),
    };
    Ok(value)
}

fn text_arg(method: &str, args: &[Value], i: usize) -> EvalResult<String> {
    match args.get(i) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_display()),
        None => Err(EvalError::runtime(format!("{} expects an argument", method))),
    }
}

/// Resolves `slice`-style bounds, where negative positions count from the end.
fn bounds(len: usize, start: Option<&Value>, end: Option<&Value>) -> (usize, usize) {
    let clamp = |v: Option<&Value>, default: usize| match v.and_then(Value::as_number) {
        Some(n) if n < 0.0 => len.saturating_sub((-n) as usize),
        Some(n) => (n as usize).min(len),
        None => default,
    };
    let s = clamp(start, 0);
    let e = clamp(end, len);
    (s, e.max(s))
}

/// Non-mutating, non-callback methods of numbers, strings, arrays and dates.
pub fn method(receiver: &Value, name: &str, args: &[Value]) -> EvalResult<Value> {
    let unknown = || EvalError::runtime(format!("{} has no method '{}'", receiver.type_name(), name));
    let value = match receiver {
        Value::Number(n) => match name {
            "toFixed" => {
                let digits = match args.first() {
                    Some(Value::Number(d)) if (0.0..=100.0).contains(d) => *d as usize,
                    Some(_) => return Err(EvalError::runtime("toFixed() digits must be between 0 and 100")),
                    None => 0,
                };
                if n.is_finite() {
                    Value::Text(format!("{:.*}", digits, n))
                } else {
                    Value::Text(format_number(*n))
                }
            }
            "toString" => Value::Text(format_number(*n)),
            _ => return Err(unknown()),
        },
        Value::Text(s) => match name {
            "toUpperCase" => Value::Text(s.to_uppercase()),
            "toLowerCase" => Value::Text(s.to_lowercase()),
            "trim" => Value::Text(s.trim().to_string()),
            "toString" => Value::Text(s.clone()),
            "includes" => Value::Bool(s.contains(text_arg(name, args, 0)?.as_str())),
            "startsWith" => Value::Bool(s.starts_with(text_arg(name, args, 0)?.as_str())),
            "endsWith" => Value::Bool(s.ends_with(text_arg(name, args, 0)?.as_str())),
            "indexOf" => {
                let needle = text_arg(name, args, 0)?;
                Value::Number(s.find(&needle).map_or(-1.0, |b| s[..b].chars().count() as f64))
            }
            "slice" | "substring" => {
                let chars: Vec<char> = s.chars().collect();
                let (a, b) = bounds(chars.len(), args.first(), args.get(1));
                Value::Text(chars[a..b].iter().collect())
            }
            "split" => {
                let sep = text_arg(name, args, 0)?;
                let parts: Vec<Value> = if sep.is_empty() {
                    s.chars().map(|c| Value::Text(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(|p| Value::Text(p.to_string())).collect()
                };
                Value::array(parts)
            }
            "replace" => {
                let from = text_arg(name, args, 0)?;
                let to = text_arg(name, args, 1)?;
                Value::Text(s.replacen(from.as_str(), &to, 1))
            }
            _ => return Err(unknown()),
        },
        Value::Array(items) => match name {
            "indexOf" => {
                let needle = arg(args, 0);
                Value::Number(items.iter().position(|v| v == needle).map_or(-1.0, |i| i as f64))
            }
            "includes" => Value::Bool(items.contains(arg(args, 0))),
            "slice" => {
                let (a, b) = bounds(items.len(), args.first(), args.get(1));
                Value::array(items[a..b].to_vec())
            }
            "concat" => {
                let mut out = items.as_ref().clone();
                for a in args {
                    match a {
                        Value::Array(more) => out.extend(more.iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
                Value::array(out)
            }
            "join" => {
                let sep = match args.first() {
                    Some(v) => v.to_display(),
                    None => ",".to_string(),
                };
                Value::Text(items.iter().map(Value::to_display).collect::<Vec<_>>().join(&sep))
            }
            _ => return Err(unknown()),
        },
        Value::Date(d) => {
            use chrono::Datelike;
            match name {
                "getFullYear" => Value::Number(f64::from(d.year())),
                "getMonth" => Value::Number(f64::from(d.month0())),
                "getDate" => Value::Number(f64::from(d.day())),
                "toString" | "toISOString" => Value::Text(d.format("%Y-%m-%d").to_string()),
                _ => return Err(unknown()),
            }
        }
        Value::Object(map) => match name {
            "hasOwnProperty" => Value::Bool(map.contains_key(&text_arg(name, args, 0)?)),
            _ => return Err(unknown()),
        },
        _ => return Err(unknown()),
    };
    Ok(value)
}

/// Properties that are not methods, such as `length`.
pub fn property(receiver: &Value, name: &str) -> EvalResult<Value> {
    match (receiver, name) {
        (Value::Array(items), "length") => Ok(Value::Number(items.len() as f64)),
        (Value::Text(s), "length") => Ok(Value::Number(s.chars().count() as f64)),
        (Value::Object(map), key) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (Value::Builtin(owner), key) => member(owner, key),
        (Value::Null, key) => Err(EvalError::runtime(format!("cannot read property '{}' of null", key))),
        (other, key) => Err(EvalError::runtime(format!(
            "{} has no property '{}'",
            other.type_name(),
            key
        ))),
    }
}
