//! Lenient conversions for weakly-typed feed values.
//!
//! The upstream API sends the same attribute as a number in one response
//! and a string in the next. Every conversion goes through here with one
//! rule: if a value cannot be read as the requested type it is absent,
//! never an error.

use serde_json::Value;

/// Reads a JSON value as `f64`.
///
/// Numbers pass through; strings are trimmed and parsed. Anything else
/// (including non-finite results) is `None`.
pub fn to_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Reads a JSON value as a whole number, truncating fractions.
pub fn to_i64(value: &Value) -> Option<i64> {
    to_f64(value).map(|f| f.trunc() as i64)
}

/// Reads a JSON value as a non-negative count; absent or unreadable is 0.
pub fn to_count(value: Option<&Value>) -> u32 {
    value
        .and_then(to_f64)
        .filter(|f| *f > 0.0)
        .map(|f| f.min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

/// Reads a JSON value as display text.
///
/// Non-blank strings are returned as-is; numbers are rendered without a
/// fractional part, matching how codes and IDs appear upstream.
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::String(_) => None,
        other => to_f64(other).map(|f| format!("{:.0}", f)),
    }
}

/// First key in `keys` whose value reads as text.
pub fn first_text(props: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| props.get(*k).and_then(to_text))
}
