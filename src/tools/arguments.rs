//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::MuxError;

/// Wrapper around tool call arguments providing typed extraction.
///
/// Models sometimes send the whole argument object as a JSON string; the
/// constructor unwraps that case so accessors always see an object.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        let value = match value {
            Value::String(raw) if raw.trim().is_empty() => serde_json::json!({}),
            Value::String(raw) => match serde_json::from_str::<Value>(raw.trim()) {
                Ok(parsed @ Value::Object(_)) => parsed,
                _ => Value::String(raw),
            },
            Value::Null => serde_json::json!({}),
            other => other,
        };
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    fn missing(kind: &str, key: &str) -> MuxError {
        MuxError::InvalidArgument(format!("Missing {kind} argument: {key}"))
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, MuxError> {
        self.get_str_opt(key).ok_or_else(|| Self::missing("string", key))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64, MuxError> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| Self::missing("integer", key))
    }

    /// Get a float argument. Numeric strings are accepted.
    pub fn get_f64(&self, key: &str) -> Result<f64, MuxError> {
        match self.value.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Self::missing("number", key))
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool, MuxError> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| Self::missing("boolean", key))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, MuxError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            MuxError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}
