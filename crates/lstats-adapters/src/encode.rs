//! Helpers for reading and reshaping untyped documents.
//!
//! Records exported from the legacy document database carry extended-JSON
//! wrappers (`{"$numberLong": "42"}`, `{"$date": ...}`, `{"$oid": ...}`). Rules
//! read scalars through [`scalar_i64`] / [`scalar_f64`] / [`scalar_str`], which
//! see through those wrappers; [`unwrap_extended`] strips them from a whole
//! document.

use chrono::DateTime;
use serde_json::{Map, Number, Value};

pub type Object = Map<String, Value>;

fn single_wrapper(map: &Object) -> Option<(&str, &Value)> {
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    match key.as_str() {
        "$numberLong" | "$numberInt" | "$numberDouble" | "$numberDecimal" | "$date" | "$oid" => {
            Some((key.as_str(), inner))
        }
        _ => None,
    }
}

fn number_from_text(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn date_to_epoch_seconds(inner: &Value) -> Option<f64> {
    match inner {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64 / 1000.0),
        Value::Number(n) => n.as_f64().map(|ms| ms / 1000.0),
        Value::Object(map) => match single_wrapper(map) {
            Some(("$numberLong", Value::String(text))) => {
                text.parse::<i64>().ok().map(|ms| ms as f64 / 1000.0)
            }
            _ => None,
        },
        _ => None,
    }
}

fn unwrap_scalar(key: &str, inner: &Value) -> Option<Value> {
    match (key, inner) {
        // NaN and infinities have no JSON representation.
        ("$numberDouble", Value::String(text)) => Some(
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map_or(Value::Null, Value::Number),
        ),
        ("$numberDouble", Value::Number(n)) => Some(n.as_f64().and_then(Number::from_f64).map_or(Value::Null, Value::Number)),
        ("$numberLong" | "$numberInt" | "$numberDecimal", Value::String(text)) => {
            Some(number_from_text(text).unwrap_or(Value::Null))
        }
        ("$numberLong" | "$numberInt" | "$numberDecimal", Value::Number(n)) => Some(Value::Number(n.clone())),
        ("$date", inner) => date_to_epoch_seconds(inner)
            .and_then(Number::from_f64)
            .map(Value::Number),
        ("$oid", Value::String(text)) => Some(Value::String(text.clone())),
        _ => None,
    }
}

/// Recursively replaces extended-JSON wrappers with plain JSON scalars.
/// Dates become float epoch seconds.
pub fn unwrap_extended(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some((key, inner)) = single_wrapper(&map) {
                if let Some(scalar) = unwrap_scalar(key, inner) {
                    return scalar;
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, unwrap_extended(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_extended).collect()),
        other => other,
    }
}

fn plain(value: &Value) -> std::borrow::Cow<'_, Value> {
    match value {
        Value::Object(map) => match single_wrapper(map).and_then(|(k, inner)| unwrap_scalar(k, inner)) {
            Some(scalar) => std::borrow::Cow::Owned(scalar),
            None => std::borrow::Cow::Borrowed(value),
        },
        _ => std::borrow::Cow::Borrowed(value),
    }
}

pub fn scalar_i64(value: &Value) -> Option<i64> {
    let value = plain(value);
    match value.as_ref() {
        Value::Number(n) => n.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn scalar_f64(value: &Value) -> Option<f64> {
    let value = plain(value);
    match value.as_ref() {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub fn scalar_str(value: &Value) -> Option<String> {
    let value = plain(value);
    match value.as_ref() {
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

pub(crate) fn float_value(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Moves `from` to `to`, replacing any existing `to`.
pub(crate) fn rename(map: &mut Object, from: &str, to: &str) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_string(), value);
    }
}

pub(crate) fn set_fallback(map: &mut Object, key: &str, value: Value) {
    if !map.contains_key(key) {
        map.insert(key.to_string(), value);
    }
}

pub(crate) fn remove_all(map: &mut Object, keys: &[&str]) {
    for key in keys {
        map.remove(*key);
    }
}

pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}
