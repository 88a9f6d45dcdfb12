//! Name-keyed tool registry and invocation router.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::{ToolCallRequest, ToolCallResult, ToolDefinition};
use super::validation::{validate_arguments, validate_schema};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::util::{with_timeout, RetryPolicy};

/// How a batch of tool calls from one engine step is executed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionMode {
    /// One after another, in call order.
    #[default]
    Sequential,
    /// Concurrently; results still come back in call order.
    Parallel,
}

/// Registry of named tools.
///
/// Registration validates the declared schema once. Invocation never fails
/// for handler problems: errors, panics, invalid arguments and timeouts all
/// come back as `is_error` results. Only an unknown name is an `Err`.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Empty registry with the default 10s timeout and one retry.
    pub fn new() -> Self {
        Self::from_config(&MuxConfig::default())
    }

    pub fn from_config(config: &MuxConfig) -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            timeout: config.tool_timeout,
            retry: RetryPolicy::with_retries(config.tool_max_retries, config.tool_retry_backoff),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register a tool. Fails on a duplicate name or an invalid schema.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(MuxError::DuplicateTool(name));
        }
        validate_schema(&tool.parameters().schema).map_err(|message| MuxError::InvalidSchema {
            tool_name: name.clone(),
            message,
        })?;
        tracing::debug!(tool = %name, "tool registered");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of every registered tool, in registration order.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Invoke a tool by name with a default context.
    pub async fn call(&self, name: &str, arguments: serde_json::Value) -> Result<ToolCallResult> {
        self.call_with_context(name, arguments, ToolExecutionContext::default())
            .await
    }

    /// Invoke a tool by name.
    pub async fn call_with_context(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: ToolExecutionContext,
    ) -> Result<ToolCallResult> {
        let tool = self
            .get(name)
            .cloned()
            .ok_or_else(|| MuxError::UnknownTool(name.to_string()))?;

        let args = ToolArguments::new(arguments);
        if let Err(message) = validate_arguments(args.raw(), &tool.parameters().schema) {
            tracing::debug!(tool = %name, %message, "tool arguments rejected");
            return Ok(ToolCallResult::error(format!(
                "Invalid arguments for '{name}': {message}"
            )));
        }

        let timeout = self.timeout;
        let outcome = self
            .retry
            .execute(|attempt| {
                let tool = Arc::clone(&tool);
                let args = args.clone();
                let ctx = ToolExecutionContext {
                    attempt,
                    ..ctx.clone()
                };
                async move {
                    if ctx.is_cancelled() {
                        return Err(MuxError::Cancelled);
                    }
                    run_guarded(tool, args, ctx, timeout).await
                }
            })
            .await;

        Ok(match outcome {
            Ok(value) => ToolCallResult::from_value(&value),
            Err(err) => {
                tracing::warn!(tool = %name, error = %err, "tool call failed");
                ToolCallResult::error(describe_failure(name, &err))
            }
        })
    }

    /// Run a batch of calls. Results are returned in call order regardless of
    /// mode; each entry is `Err` only for an unknown tool.
    pub async fn call_batch(
        &self,
        calls: Vec<(ToolCallRequest, ToolExecutionContext)>,
        mode: ExecutionMode,
    ) -> Vec<Result<ToolCallResult>> {
        match mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for (call, ctx) in calls {
                    results.push(self.call_with_context(&call.name, call.arguments, ctx).await);
                }
                results
            }
            ExecutionMode::Parallel => {
                let futures = calls
                    .into_iter()
                    .map(|(call, ctx)| async move {
                        self.call_with_context(&call.name, call.arguments, ctx).await
                    });
                futures::future::join_all(futures).await
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.index.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// One attempt: bounded by `timeout`, with handler panics turned into errors.
async fn run_guarded(
    tool: Arc<dyn Tool>,
    args: ToolArguments,
    ctx: ToolExecutionContext,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let name = tool.name().to_string();
    let attempt = AssertUnwindSafe(async move { tool.execute(&args, &ctx).await }).catch_unwind();
    with_timeout(timeout, async move {
        match attempt.await {
            Ok(result) => result,
            Err(panic) => Err(MuxError::tool(
                name,
                format!("handler panicked: {}", panic_message(panic.as_ref())),
            )),
        }
    })
    .await
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn describe_failure(name: &str, err: &MuxError) -> String {
    match err {
        MuxError::Timeout(ms) => format!("Tool '{name}' timed out after {ms}ms"),
        MuxError::ToolExecution { message, .. } => format!("Tool '{name}' failed: {message}"),
        other => format!("Tool '{name}' failed: {other}"),
    }
}
