//! Materialized timeline blocks.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    /// Thinking finished.
    Done,
    /// Tool call resolved by a successful result.
    Success,
    /// Tool call resolved by an error result.
    Error,
}

/// How a `tool_result` finds its `tool_call`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResultMatching {
    /// Results must carry the call's block id.
    #[default]
    Strict,
    /// Results without an id resolve the most recent unresolved call with the
    /// same tool name. For producers that predate result ids.
    NameFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineBlock {
    Thinking {
        id: String,
        content: String,
        status: BlockStatus,
    },
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
        result: Option<serde_json::Value>,
        is_error: bool,
        status: BlockStatus,
    },
}

impl TimelineBlock {
    pub fn thinking(id: impl Into<String>) -> Self {
        Self::Thinking {
            id: id.into(),
            content: String::new(),
            status: BlockStatus::Pending,
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            args,
            result: None,
            is_error: false,
            status: BlockStatus::Pending,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Thinking { id, .. } | Self::ToolCall { id, .. } => id,
        }
    }

    pub fn status(&self) -> BlockStatus {
        match self {
            Self::Thinking { status, .. } | Self::ToolCall { status, .. } => *status,
        }
    }

    /// A tool call that still waits for its result.
    pub fn is_unresolved_call(&self) -> bool {
        matches!(self, Self::ToolCall { result: None, .. })
    }
}
