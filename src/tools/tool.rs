//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::types::{ToolDefinition, ToolParameters};
use crate::error::MuxError;

/// What a handler knows about the call it serves.
///
/// `cancel` fires when the owning generation is stopped. Handlers that
/// watch it can unwind inside the cancel grace period; the rest are
/// abandoned once the period ends.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub session_id: Option<String>,
    pub generation_id: Option<String>,
    /// Block id of the originating tool call.
    pub call_id: Option<String>,
    /// 1-based attempt number (retries increment it).
    pub attempt: u32,
    pub cancel: CancellationToken,
}

impl ToolExecutionContext {
    pub fn for_call(
        session_id: impl Into<String>,
        generation_id: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            generation_id: Some(generation_id.into()),
            call_id: Some(call_id.into()),
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie the call to its generation's cancellation.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the owning generation is stopped.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A capability the engine can call through the registry or the bridge.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique within a registry; the engine calls tools by this name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Object schema the registry validates arguments against before
    /// `execute` runs.
    fn parameters(&self) -> &ToolParameters;

    /// Run one attempt. An `Err` becomes an `isError` result, never a
    /// failed generation.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, MuxError>;

    /// Public definition used by `tools/list`.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters().schema.clone(),
        }
    }
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, MuxError>> + Send>>
    + Send
    + Sync;

/// Tool backed by an async closure.
pub struct FnTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, MuxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, MuxError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}
