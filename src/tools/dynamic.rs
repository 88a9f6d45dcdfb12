//! Runtime-discovered tools.
//!
//! A [`DynamicToolProvider`] exposes tools it only learns about at runtime
//! (a plugin host, a remote tool bridge). Each discovered tool is wrapped in a
//! [`DynamicToolAdapter`] and registered like any other tool, so schema
//! validation, timeouts and error encoding apply uniformly.

use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::registry::ToolRegistry;
use super::tool::{Tool, ToolExecutionContext};
use super::types::{ToolDefinition, ToolParameters};
use crate::error::{MuxError, Result};

/// Trait for providers that can discover and execute tools at runtime.
#[async_trait]
pub trait DynamicToolProvider: Send + Sync {
    /// List available tools.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Execute a tool by name.
    async fn execute_tool(
        &self,
        name: &str,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value>;
}

/// Adapter that exposes one discovered tool through the [`Tool`] trait.
pub struct DynamicToolAdapter {
    provider: Arc<dyn DynamicToolProvider>,
    name: String,
    description: String,
    parameters: ToolParameters,
}

impl DynamicToolAdapter {
    pub fn new(provider: Arc<dyn DynamicToolProvider>, definition: ToolDefinition) -> Self {
        Self {
            provider,
            name: definition.name,
            description: definition.description,
            parameters: ToolParameters::from_schema(definition.input_schema),
        }
    }
}

#[async_trait]
impl Tool for DynamicToolAdapter {
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
    ) -> Result<serde_json::Value> {
        self.provider.execute_tool(&self.name, args, ctx).await
    }
}

impl ToolRegistry {
    /// Discover and register every tool a provider offers.
    ///
    /// Registration is all-or-nothing per tool: a name clash or bad schema
    /// aborts with that error and leaves earlier tools registered.
    pub async fn register_provider(
        &mut self,
        provider: Arc<dyn DynamicToolProvider>,
    ) -> Result<usize> {
        let definitions = provider.list_tools().await?;
        let count = definitions.len();
        for definition in definitions {
            let adapter = DynamicToolAdapter::new(Arc::clone(&provider), definition);
            self.register(Arc::new(adapter)).map_err(|err| match err {
                MuxError::DuplicateTool(name) => MuxError::Configuration(format!(
                    "dynamic tool '{name}' clashes with a registered tool"
                )),
                other => other,
            })?;
        }
        tracing::debug!(count, "dynamic tools registered");
        Ok(count)
    }
}
