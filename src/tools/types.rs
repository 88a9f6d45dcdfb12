//! Tool-related types: parameter schemas, definitions, calls, results.

use serde::{Deserialize, Serialize};

/// JSON Schema-based parameter definition for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    /// JSON Schema object describing the parameters.
    pub schema: serde_json::Value,
}

impl ToolParameters {
    /// Create from a raw JSON Schema value.
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// Create an empty parameter schema (no parameters).
    pub fn empty() -> Self {
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Builder: create an object schema with properties.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }
}

/// Builder for constructing tool parameter schemas.
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(
        mut self,
        name: impl Into<String>,
        schema: serde_json::Value,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    /// Add a string property.
    pub fn string(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.typed("string", name, description, required)
    }

    /// Add a number property.
    pub fn number(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.typed("number", name, description, required)
    }

    /// Add an integer property.
    pub fn integer(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.typed("integer", name, description, required)
    }

    fn typed(
        self,
        kind: &str,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({ "type": kind, "description": description.into() });
        self.property(name, schema, required)
    }

    /// Add a boolean property.
    pub fn boolean(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.typed("boolean", name, description, required)
    }

    /// Add an enum (string) property.
    pub fn string_enum(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({
            "type": "string",
            "description": description.into(),
            "enum": values,
        });
        self.property(name, schema, required)
    }

    /// Build into ToolParameters.
    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}

/// Public description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// A request to invoke a tool by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// One typed content item of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// Outcome of a tool invocation.
///
/// Handler failures are carried as `is_error = true` with a diagnostic text
/// item; they never surface as an `Err` across the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Successful result with a single text item.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    /// Successful result from a handler's JSON output. Strings pass through
    /// verbatim; everything else is serialized.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self::success(text)
    }

    /// Error result with a diagnostic text item.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }

    /// Concatenated text of every content item.
    pub fn text(&self) -> String {
        self.content.iter().map(ToolContent::as_text).collect()
    }
}
