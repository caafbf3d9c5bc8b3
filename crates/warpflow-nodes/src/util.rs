//! Param extraction shared by the built-in nodes.

use serde_json::Value;
use warpflow::{EngineError, ErrorCategory, Result};

/// Required string param; absent or null is an error naming the param.
pub(crate) fn required_str(params: &Value, name: &str, category: ErrorCategory) -> Result<String> {
    match params.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(EngineError::new(
            category,
            format!("required param '{name}' is missing"),
        )
        .with_fixable(true)
        .with_suggestion(format!("set '{name}' in the node's params"))),
        Some(other) => Err(EngineError::new(
            category,
            format!("param '{name}' must be a string, got {}", kind(other)),
        )
        .with_fixable(true)),
    }
}

/// Optional string param with a default. Null counts as absent so that an
/// unresolved optional template reference falls back cleanly.
pub(crate) fn optional_str(params: &Value, name: &str, default: &str) -> String {
    match params.get(name) {
        Some(Value::String(s)) => s.clone(),
        _ => default.to_string(),
    }
}

/// Optional bool param with a default.
pub(crate) fn optional_bool(params: &Value, name: &str, default: bool) -> bool {
    params.get(name).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
