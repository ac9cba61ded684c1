//! Record values and host value conversions.

use serde_json::{Map, Number, Value};

use crate::error::{Result, TemporaError};

/// Field name to value mapping carried by every entry and result.
///
/// Insertion ordered, so field order follows first appearance.
pub type Record = Map<String, Value>;

/// Stand-in emitted instead of a nested object or array.
pub const OPAQUE_PLACEHOLDER: &str = "[object]";

/// Milliseconds per day.
const MS_PER_DAY: f64 = 86_400_000.0;

/// Day serial of 1970-01-01 in the 1899-12-30 based date system.
const UNIX_EPOCH_SERIAL: f64 = 25_569.0;

pub fn as_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

pub fn is_number(value: &Value) -> bool {
    as_number(value).is_some()
}

/// Loose truthiness: null, false, zero, NaN and "" are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Scalars pass through, structures collapse to [`OPAQUE_PLACEHOLDER`].
pub fn scalar_or_placeholder(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(OPAQUE_PLACEHOLDER.to_string()),
        other => other.clone(),
    }
}

/// 2^63, the first f64 above `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Wraps an f64. Integral values that fit an i64 become integer numbers so
/// integer inputs come back as integers; NaN/infinity become null.
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&n) {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Reads an integer argument, accepting integral floats and numeric strings.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(|f| {
            if f.fract() == 0.0 && f.is_finite() {
                Some(f as i64)
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// Converts a spreadsheet date serial (days since 1899-12-30) to epoch ms.
pub fn serial_to_epoch_ms(serial: f64) -> Result<i64> {
    if !serial.is_finite() {
        return Err(TemporaError::value(format!(
            "timestamp must be a finite date serial, got {}",
            serial
        )));
    }
    Ok(((serial - UNIX_EPOCH_SERIAL) * MS_PER_DAY).round() as i64)
}

/// Converts a host timestamp argument to epoch ms.
pub fn timestamp_arg(value: &Value) -> Result<i64> {
    let serial = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| TemporaError::value(format!("timestamp is not numeric: {}", value)))?;
    serial_to_epoch_ms(serial)
}
