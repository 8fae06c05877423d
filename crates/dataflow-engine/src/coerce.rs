//! Type coercion between port values
//!
//! Nodes read their inputs through these helpers rather than matching on
//! `DataValue` variants directly, so a `number` arriving at a `string` port
//! or a scalar arriving at an array port behaves the same everywhere.

use crate::error::{EngineError, Result};
use crate::types::PortDefinition;
use crate::value::{DataType, DataValue, ScalarType};

/// Coerce a possibly-absent value into `to`, returning `None` when the value
/// has no representation in that type.
/// An absent value stays absent for every target type.
pub fn coerce_optional(value: Option<&DataValue>, to: DataType) -> Option<DataValue> {
    value?;
    if to.scalar == ScalarType::Excluded {
        return value.filter(|v| v.is_excluded()).cloned();
    }

    if to.array {
        return coerce_to_array(value, to);
    }

    match to.scalar {
        ScalarType::String => to_string(value).map(DataValue::String),
        ScalarType::Boolean => Some(DataValue::Boolean(to_bool(value))),
        ScalarType::Number => to_number(value).map(DataValue::Number),
        ScalarType::Object => to_object(value).map(DataValue::Object),
        _ => value.filter(|v| !v.is_excluded()).cloned(),
    }
}

/// Coerce a value into `to`, failing when there is nothing to coerce
pub fn coerce(value: Option<&DataValue>, to: DataType) -> Result<DataValue> {
    coerce_optional(value, to).ok_or_else(|| EngineError::Coercion {
        expected: to.to_string(),
        actual: value
            .map(|v| v.data_type().to_string())
            .unwrap_or_else(|| "undefined".to_string()),
    })
}

fn coerce_to_array(value: Option<&DataValue>, to: DataType) -> Option<DataValue> {
    let value = value.filter(|v| !v.is_excluded())?;
    let element_type = to.element_type();

    if !value.is_array() {
        let coerced = coerce_optional(Some(value), element_type)?;
        return Some(DataValue::from_elements_typed(vec![coerced], element_type));
    }

    if to.is_any() || value.data_type() == to {
        return Some(value.clone());
    }

    let coerced = value
        .elements()
        .iter()
        .filter_map(|v| coerce_optional(Some(v), element_type))
        .collect();
    Some(DataValue::from_elements_typed(coerced, element_type))
}

impl DataValue {
    /// Collect values already coerced to `element_type` into an array value
    pub(crate) fn from_elements_typed(values: Vec<DataValue>, element_type: DataType) -> DataValue {
        if values.is_empty() {
            return DataValue::default_for(element_type.to_array());
        }
        if element_type.is_any() {
            return DataValue::AnyArray(values.iter().map(DataValue::to_json).collect());
        }
        DataValue::from_elements(values)
    }
}

/// Stringify a value; arrays join their elements with newlines
pub fn to_string(value: Option<&DataValue>) -> Option<String> {
    let value = value?;
    if value.is_array() {
        let parts: Vec<String> = value
            .elements()
            .iter()
            .filter_map(|v| to_string(Some(v)))
            .collect();
        return Some(parts.join("\n"));
    }

    match value {
        DataValue::String(s) => Some(s.clone()),
        DataValue::Boolean(b) => Some(b.to_string()),
        DataValue::Number(n) => Some(format_number(*n)),
        DataValue::Object(o) => serde_json::to_string(o).ok(),
        DataValue::Any(serde_json::Value::Null) | DataValue::Excluded(_) => None,
        DataValue::Any(v) => to_string(Some(&DataValue::infer(v.clone()))),
        _ => None,
    }
}

/// Truthiness of a value
pub fn to_bool(value: Option<&DataValue>) -> bool {
    let Some(value) = value else {
        return false;
    };

    if value.is_array() {
        return value.elements().iter().all(|v| to_bool(Some(v)));
    }

    match value {
        DataValue::String(s) => !s.is_empty() && s != "false",
        DataValue::Boolean(b) => *b,
        DataValue::Number(n) => *n != 0.0 && !n.is_nan(),
        DataValue::Object(_) => true,
        DataValue::Any(v) => json_truthy(v),
        _ => false,
    }
}

/// Numeric reading of a value; strings parse their leading float
pub fn to_number(value: Option<&DataValue>) -> Option<f64> {
    match value? {
        DataValue::String(s) => parse_float_prefix(s),
        DataValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        DataValue::Number(n) => Some(*n),
        DataValue::Any(v) => match v {
            serde_json::Value::Null | serde_json::Value::Object(_) | serde_json::Value::Array(_) => None,
            other => to_number(Some(&DataValue::infer(other.clone()))),
        },
        _ => None,
    }
}

/// Object reading of a value
pub fn to_object(value: Option<&DataValue>) -> Option<crate::value::ObjectValue> {
    match value? {
        DataValue::Object(o) => Some(o.clone()),
        DataValue::Any(serde_json::Value::Object(o)) => Some(o.clone()),
        _ => None,
    }
}

/// Whether a value of type `from` may flow into a port of type `to`
pub fn can_assign(from: DataType, to: DataType) -> bool {
    if from.is_any() && !from.array || to.is_any() && !to.array {
        return true;
    }
    if from == to {
        return true;
    }
    if from.array && to.array && (from.is_any() || to.is_any()) {
        return true;
    }
    if from.scalar == ScalarType::Excluded {
        return true;
    }
    if to.array && !from.array {
        return can_assign(from, to.element_type());
    }
    if from.array && to.array {
        return can_assign(from.element_type(), to.element_type());
    }
    match to.scalar {
        ScalarType::String | ScalarType::Boolean => !to.array,
        ScalarType::Number => {
            !from.array && matches!(from.scalar, ScalarType::String | ScalarType::Boolean)
        }
        _ => false,
    }
}

/// Whether any of the port's declared types accepts `from`
pub fn port_accepts(port: &PortDefinition, from: DataType) -> bool {
    port.data_type.iter().any(|to| can_assign(from, *to))
}

fn json_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Integral floats print without a fractional part
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Parse the longest leading float literal, ignoring leading whitespace
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    if s[end..].starts_with("Infinity") {
        let sign = if s.starts_with('-') { -1.0 } else { 1.0 };
        return Some(sign * f64::INFINITY);
    }

    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return None;
    }

    // Exponent only counts when followed by digits
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}
