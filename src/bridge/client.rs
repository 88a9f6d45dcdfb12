//! Client side of the tool bridge.
//!
//! [`BridgeClient`] speaks to any [`BridgeTransport`] and implements
//! [`DynamicToolProvider`], so a remote registry's tools can be mounted into a
//! local [`ToolRegistry`](crate::tools::ToolRegistry).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;

use super::protocol::{
    BridgeRequest, BridgeResponse, METHOD_INITIALIZE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    PROTOCOL_VERSION,
};
use super::server::ToolBridge;
use crate::error::{BridgeErrorCode, MuxError, Result};
use crate::tools::{
    DynamicToolProvider, ToolArguments, ToolCallResult, ToolDefinition, ToolExecutionContext,
};

/// Carries one request to a bridge and returns its response.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    async fn request(&self, request: BridgeRequest) -> Result<BridgeResponse>;
}

/// In-process transport.
#[async_trait]
impl BridgeTransport for ToolBridge {
    async fn request(&self, request: BridgeRequest) -> Result<BridgeResponse> {
        Ok(self.handle(request).await)
    }
}

const UNKNOWN_TOOL_PREFIX: &str = "Unknown tool: ";

pub struct BridgeClient<T> {
    transport: T,
    next_id: AtomicU64,
    initialized: AtomicBool,
}

impl<T: BridgeTransport> BridgeClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
        }
    }

    async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .request(BridgeRequest::new(id, method, params))
            .await?;
        if response.id != Some(json!(id)) {
            return Err(MuxError::protocol(format!(
                "bridge response id {:?} does not match request {id}",
                response.id
            )));
        }
        match (response.result, response.error) {
            (_, Some(error)) => match error.message.strip_prefix(UNKNOWN_TOOL_PREFIX) {
                Some(name) if error.code == BridgeErrorCode::InvalidParams.code() => {
                    Err(MuxError::UnknownTool(name.to_string()))
                }
                _ => Err(MuxError::protocol(format!(
                    "bridge error {}: {}",
                    error.code, error.message
                ))),
            },
            (Some(result), None) => Ok(result),
            (None, None) => Err(MuxError::protocol(
                "bridge response carries neither result nor error",
            )),
        }
    }

    /// Perform the handshake once.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let result = self
            .send(
                METHOD_INITIALIZE,
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                })),
            )
            .await?;
        tracing::debug!(server = %result["serverInfo"], "bridge initialized");
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ToolDefinition>> {
        self.initialize().await?;
        let result = self.send(METHOD_TOOLS_LIST, None).await?;
        Ok(serde_json::from_value(result["tools"].clone())?)
    }

    pub async fn call(&self, name: &str, arguments: serde_json::Value) -> Result<ToolCallResult> {
        self.initialize().await?;
        let result = self
            .send(
                METHOD_TOOLS_CALL,
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl<T: BridgeTransport> DynamicToolProvider for BridgeClient<T> {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        self.list().await
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value> {
        let result = self.call(name, args.raw().clone()).await?;
        if result.is_error {
            return Err(MuxError::tool(name, result.text()));
        }
        Ok(serde_json::Value::String(result.text()))
    }
}
