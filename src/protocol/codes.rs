//! Numeric codes carried on the wire.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Event type of an envelope (`event_type`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Connected,
    Disconnected,
    Error,
    GenerationStart,
    ContentDelta,
    GenerationDone,
    ThinkingStart,
    ThinkingDelta,
    ThinkingDone,
    ToolCall,
    ToolResult,
    UsageReport,
    Ping,
    Pong,
}

impl EventType {
    pub fn code(self) -> i64 {
        match self {
            Self::Connected => 1000,
            Self::Disconnected => 1001,
            Self::Error => 1999,
            Self::GenerationStart => 2000,
            Self::ContentDelta => 2001,
            Self::GenerationDone => 2002,
            Self::ThinkingStart => 3000,
            Self::ThinkingDelta => 3001,
            Self::ThinkingDone => 3002,
            Self::ToolCall => 4000,
            Self::ToolResult => 4001,
            Self::UsageReport => 5000,
            Self::Ping => 9000,
            Self::Pong => 9001,
        }
    }

    /// `None` for codes this build does not know.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::iter().find(|t| t.code() == code)
    }

    /// Heartbeat frames never touch sequence counters.
    pub fn is_heartbeat(self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}

/// Content type of a block payload (`message.content_type`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContentType {
    Text,
    Thinking,
    ToolCall,
    ToolResult,
    Error,
}

impl ContentType {
    pub fn code(self) -> i64 {
        match self {
            Self::Text => 10000,
            Self::Thinking => 10040,
            Self::ToolCall => 10050,
            Self::ToolResult => 10051,
            Self::Error => 10099,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::iter().find(|t| t.code() == code)
    }
}

/// Status carried in `event_data.status`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    Completed,
    Pending,
    Error,
}

impl MessageStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Completed => 1,
            Self::Pending => 4,
            Self::Error => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::iter().find(|t| t.code() == code)
    }
}
