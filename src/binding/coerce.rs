//! Conversion of located values to the type a schema node declares.

use serde_json::{Number, Value};
use tracing::debug;

use super::{BindError, BindResult, schema::SchemaType};

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Converts `value` to `target`.
///
/// A container can never become a primitive (`ConversionFailure`). A primitive that
/// does not convert is kept as-is; so is anything when the target is absent.
pub fn coerce(property: &str, value: Value, target: Option<SchemaType>) -> BindResult<Value> {
    let Some(target) = target else {
        return Ok(value);
    };

    if target.is_primitive() && (value.is_object() || value.is_array()) {
        return Err(BindError::ConversionFailure {
            property: property.to_string(),
            expected: target,
            found: shape(&value).to_string(),
        });
    }

    let converted = match target {
        SchemaType::String => to_string(&value),
        SchemaType::Integer => to_integer(&value),
        SchemaType::Number => to_number(&value),
        SchemaType::Boolean => to_boolean(&value),
        SchemaType::Array => Some(to_array(value.clone())),
        SchemaType::Object => Some(to_object(value.clone())),
        SchemaType::Null => None,
    };

    Ok(match converted {
        Some(converted) => converted,
        None => {
            debug!(property, %target, found = shape(&value), "Kept unconverted value");
            value
        }
    })
}

fn to_string(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .map(Value::from)
        }
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        _ => None,
    }
}

fn to_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn to_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        _ => None,
    }
}

/// Arrays pass through, JSON-array text is parsed, anything else is wrapped.
fn to_array(value: Value) -> Value {
    match value {
        Value::Array(_) => value,
        Value::String(ref s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(parsed @ Value::Array(_)) => parsed,
            _ => Value::Array(vec![value]),
        },
        other => Value::Array(vec![other]),
    }
}

/// Objects pass through, JSON-object text is parsed, anything else is kept.
fn to_object(value: Value) -> Value {
    match value {
        Value::String(ref s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => value,
        },
        other => other,
    }
}
