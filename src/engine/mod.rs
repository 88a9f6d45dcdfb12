//! Reasoning-engine collaborator.
//!
//! The serving side drives one engine stream per agent-loop step and turns
//! its chunks into wire events.

pub mod scripted;
pub mod think_tags;

use async_trait::async_trait;
use bon::Builder;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::ContextInfo;
use crate::tools::ToolDefinition;
use crate::types::{GenerationId, SessionId, Usage};

pub use scripted::{DemoEngine, ScriptedEngine, ScriptedTurn};
pub use think_tags::{Segment, ThinkTagSplitter};

/// Tool invocation requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One step of streamed engine output.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineChunk {
    /// Answer text. May embed `<think>...</think>` spans.
    Text(String),
    /// Reasoning text from engines that report it separately.
    Reasoning(String),
    /// Tool calls to run before the next step.
    ToolCalls(Vec<EngineToolCall>),
    Usage(Usage),
    Context(ContextInfo),
    Done,
}

/// Conversation turn handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum EngineMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default)]
        tool_calls: Vec<EngineToolCall>,
    },
    Tool {
        call_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
}

impl EngineMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }
}

/// Input for one engine step.
#[derive(Debug, Clone, Builder)]
pub struct EngineRequest {
    #[builder(into)]
    pub session_id: SessionId,
    #[builder(into)]
    pub generation_id: GenerationId,
    #[builder(default)]
    pub messages: Vec<EngineMessage>,
    #[builder(default)]
    pub tools: Vec<ToolDefinition>,
    pub model_id: Option<String>,
}

impl EngineRequest {
    /// Text of the most recent user message.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            EngineMessage::User { content } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Tool results appended after the last user message.
    pub fn pending_tool_results(&self) -> Vec<&EngineMessage> {
        self.messages
            .iter()
            .rev()
            .take_while(|m| !matches!(m, EngineMessage::User { .. }))
            .filter(|m| matches!(m, EngineMessage::Tool { .. }))
            .collect()
    }
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Stream one step. The stream ends after [`EngineChunk::Done`] or when
    /// exhausted.
    async fn stream(
        &self,
        request: &EngineRequest,
    ) -> Result<BoxStream<'static, Result<EngineChunk>>>;
}
