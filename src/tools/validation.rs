//! Schema checks: once per tool at registration, once per call before execution.

use serde_json::Value;

const KNOWN_TYPES: &[&str] = &["string", "number", "integer", "boolean", "object", "array", "null"];

/// Validate a tool's declared parameter schema.
///
/// The root must be an object schema, every property must declare a known
/// JSON type, and every `required` entry must name a declared property.
pub fn validate_schema(schema: &Value) -> Result<(), String> {
    let root = schema
        .as_object()
        .ok_or_else(|| format!("schema must be an object, got {}", json_type_name(schema)))?;

    match root.get("type").and_then(Value::as_str) {
        Some("object") => {}
        Some(other) => return Err(format!("root schema type must be 'object', got '{other}'")),
        None => return Err("root schema is missing 'type'".to_string()),
    }

    let empty = serde_json::Map::new();
    let properties = match root.get("properties") {
        None => &empty,
        Some(Value::Object(props)) => props,
        Some(other) => {
            return Err(format!("'properties' must be an object, got {}", json_type_name(other)))
        }
    };

    for (name, prop) in properties {
        let Some(kind) = prop.get("type") else {
            return Err(format!("property '{name}' is missing 'type'"));
        };
        let known = match kind {
            Value::String(t) => KNOWN_TYPES.contains(&t.as_str()),
            Value::Array(types) => types
                .iter()
                .all(|t| t.as_str().is_some_and(|t| KNOWN_TYPES.contains(&t))),
            _ => false,
        };
        if !known {
            return Err(format!("property '{name}' has unsupported type {kind}"));
        }
    }

    if let Some(required) = root.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| "'required' must be an array".to_string())?;
        for field in required {
            let field = field
                .as_str()
                .ok_or_else(|| "'required' entries must be strings".to_string())?;
            if !properties.contains_key(field) {
                return Err(format!("required field '{field}' is not a declared property"));
            }
        }
    }

    Ok(())
}

/// Validate tool arguments against a JSON Schema.
///
/// Top-level only: object shape, required field presence, property types and
/// string enums. Returns the first violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!(
            "expected object arguments, got {}",
            json_type_name(args)
        ));
    }
    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in obj {
        let Some(prop_schema) = properties.get(key) else {
            continue;
        };
        let type_ok = match prop_schema.get("type") {
            Some(Value::String(expected)) => value_matches_type(value, expected),
            Some(Value::Array(options)) => options
                .iter()
                .filter_map(Value::as_str)
                .any(|expected| value_matches_type(value, expected)),
            _ => true,
        };
        if !type_ok {
            return Err(format!(
                "field '{}' expected type {}, got {}",
                key,
                prop_schema["type"],
                json_type_name(value)
            ));
        }
        if let Some(allowed) = prop_schema.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!(
                    "field '{key}' must be one of {}",
                    Value::Array(allowed.clone())
                ));
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
