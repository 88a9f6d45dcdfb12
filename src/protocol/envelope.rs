//! Raw wire shapes: the outer envelope and the JSON inside `event_data`.

use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// Outer frame. `event_data` is itself a JSON document serialized to a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub event_type: i64,
    pub event_id: String,
    pub event_data: String,
}

/// Payload of `event_data`. Every field is optional on the wire; which ones
/// are present depends on the event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Generation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Session id; the routing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<BlockPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_delta: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_finish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_index: Option<u64>,
    /// Seconds from start to the terminal event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

/// A block carried by an event. `content` is a JSON document serialized to a
/// string; its shape depends on `content_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content_type: i64,
    pub content: String,
}

/// Context-window accounting reported with the terminal event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub current_context_tokens: u64,
    pub max_context_tokens: u64,
}

/// `{"text": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TextContent {
    pub text: String,
}

/// `{"finish_title": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TitleContent {
    #[serde(default)]
    pub finish_title: String,
}

/// `{"name": ..., "args": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolCallContent {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// `{"name": ..., "result": ..., "is_error": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolResultContent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

/// `{"error": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ErrorContent {
    pub error: String,
}
