//! Typed stream events.

use serde::{Deserialize, Serialize};

use super::codes::EventType;
use super::envelope::ContextInfo;
use crate::types::{GenerationId, SessionId, Usage};

pub const THINKING_START_TITLE: &str = "深度思考中";
pub const THINKING_DONE_TITLE: &str = "已完成思考";

/// One decoded (or to-be-encoded) event.
///
/// Connection-level events (`Connected`, `Ping`, `Pong`, `Disconnected`) carry
/// no session. Session-level events carry the session id and, except for
/// start rejections, the generation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub session_id: Option<SessionId>,
    pub generation_id: Option<GenerationId>,
    /// Position of this event within its generation.
    #[serde(default)]
    pub message_index: u64,
    pub kind: EventKind,
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Connected {
        connection_id: Option<String>,
    },
    Disconnected,
    /// `terminal` errors end the referenced generation; non-terminal errors
    /// (e.g. a rejected duplicate start) are notices only.
    Error {
        block_id: Option<String>,
        message: String,
        terminal: bool,
    },
    GenerationStart,
    ContentDelta {
        block_id: String,
        text: String,
    },
    GenerationDone {
        /// Seconds from start to completion.
        generation_time: Option<f64>,
        context_info: Option<ContextInfo>,
        usage: Option<Usage>,
    },
    ThinkingStart {
        block_id: String,
        title: String,
    },
    ThinkingDelta {
        block_id: String,
        text: String,
    },
    ThinkingDone {
        block_id: String,
        title: String,
    },
    ToolCall {
        block_id: String,
        name: String,
        args: serde_json::Value,
    },
    /// `block_id` is absent only on legacy producers.
    ToolResult {
        block_id: Option<String>,
        name: String,
        result: serde_json::Value,
        is_error: bool,
    },
    UsageReport {
        usage: Usage,
    },
    Ping,
    Pong,
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Connected { .. } => EventType::Connected,
            Self::Disconnected => EventType::Disconnected,
            Self::Error { .. } => EventType::Error,
            Self::GenerationStart => EventType::GenerationStart,
            Self::ContentDelta { .. } => EventType::ContentDelta,
            Self::GenerationDone { .. } => EventType::GenerationDone,
            Self::ThinkingStart { .. } => EventType::ThinkingStart,
            Self::ThinkingDelta { .. } => EventType::ThinkingDelta,
            Self::ThinkingDone { .. } => EventType::ThinkingDone,
            Self::ToolCall { .. } => EventType::ToolCall,
            Self::ToolResult { .. } => EventType::ToolResult,
            Self::UsageReport { .. } => EventType::UsageReport,
            Self::Ping => EventType::Ping,
            Self::Pong => EventType::Pong,
        }
    }

    /// Ends the generation it belongs to.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::GenerationDone { .. } | Self::Error { terminal: true, .. }
        )
    }
}

impl StreamEvent {
    /// Event scoped to one generation of one session.
    pub fn generation(
        session_id: impl Into<SessionId>,
        generation_id: impl Into<GenerationId>,
        message_index: u64,
        kind: EventKind,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            generation_id: Some(generation_id.into()),
            message_index,
            kind,
        }
    }

    /// Connection-level event.
    pub fn connection(kind: EventKind) -> Self {
        Self {
            session_id: None,
            generation_id: None,
            message_index: 0,
            kind,
        }
    }

    /// Non-terminal error for a session (no generation attached).
    pub fn session_notice(session_id: impl Into<SessionId>, message: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            generation_id: None,
            message_index: 0,
            kind: EventKind::Error {
                block_id: None,
                message: message.into(),
                terminal: false,
            },
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}
