//! Field extraction helpers for upstream payloads.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{FxError, FxResult};

/// Walk an object path.
pub fn field<'a>(source: &str, value: &'a Value, path: &[&str]) -> FxResult<&'a Value> {
    path.iter().try_fold(value, |node, key| {
        node.get(*key)
            .ok_or_else(|| FxError::parse(source, format!("missing field '{}'", path.join("."))))
    })
}

/// Coerce a JSON string or number to a decimal.
pub fn decimal(source: &str, value: &Value) -> FxResult<Decimal> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(FxError::parse(source, format!("expected a price, got {}", other))),
    };
    text_decimal(source, &raw)
}

/// Coerce a decimal string, accepting exponent notation.
pub fn text_decimal(source: &str, raw: &str) -> FxResult<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| FxError::parse(source, format!("bad price '{}': {}", raw, e)))
}

/// Decimal found at an object path.
pub fn decimal_at(source: &str, value: &Value, path: &[&str]) -> FxResult<Decimal> {
    decimal(source, field(source, value, path)?)
}

/// Object found at an object path.
pub fn object_at<'a>(
    source: &str,
    value: &'a Value,
    path: &[&str],
) -> FxResult<&'a serde_json::Map<String, Value>> {
    field(source, value, path)?
        .as_object()
        .ok_or_else(|| FxError::parse(source, format!("'{}' is not an object", path.join("."))))
}
