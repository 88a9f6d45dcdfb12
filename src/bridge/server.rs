//! Serves a [`ToolRegistry`] over the bridge request/response contract.

use std::sync::Arc;

use serde_json::json;

use super::protocol::{
    BridgeError, BridgeRequest, BridgeResponse, METHOD_INITIALIZE, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, PROTOCOL_VERSION,
};
use crate::error::{BridgeErrorCode, MuxError};
use crate::tools::{ToolCallRequest, ToolRegistry};

/// Request handler in front of a tool registry.
#[derive(Debug, Clone)]
pub struct ToolBridge {
    registry: Arc<ToolRegistry>,
    name: String,
    version: String,
}

impl ToolBridge {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.name = name.into();
        self.version = version.into();
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Handle one raw JSON request and produce the raw JSON response.
    pub async fn handle_json(&self, raw: &str) -> String {
        let response = match serde_json::from_str::<serde_json::Value>(raw) {
            Err(err) => BridgeResponse::failure(
                None,
                BridgeError::new(BridgeErrorCode::ParseError, format!("Parse error: {err}")),
            ),
            Ok(value) => {
                let id = value.get("id").cloned();
                match serde_json::from_value::<BridgeRequest>(value) {
                    Ok(request) => self.handle(request).await,
                    Err(err) => BridgeResponse::failure(
                        id,
                        BridgeError::new(
                            BridgeErrorCode::InvalidRequest,
                            format!("Invalid request: {err}"),
                        ),
                    ),
                }
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|err| {
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"{}"}}}}"#,
                BridgeErrorCode::InternalError.code(),
                err.to_string().replace('"', "'")
            )
        })
    }

    /// Handle one typed request.
    pub async fn handle(&self, request: BridgeRequest) -> BridgeResponse {
        let id = request.id.clone();
        tracing::debug!(method = %request.method, "bridge request");
        let outcome = match request.method.as_str() {
            METHOD_INITIALIZE => Ok(self.initialize()),
            METHOD_TOOLS_LIST => self.list_tools(),
            METHOD_TOOLS_CALL => self.call_tool(request.params).await,
            other => Err(BridgeError::new(
                BridgeErrorCode::MethodNotFound,
                format!("Method not found: {other}"),
            )),
        };
        match outcome {
            Ok(result) => BridgeResponse::success(id, result),
            Err(error) => {
                tracing::debug!(
                    code = error.code,
                    message = %error.message,
                    "bridge request failed"
                );
                BridgeResponse::failure(id, error)
            }
        }
    }

    fn initialize(&self) -> serde_json::Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": self.name, "version": self.version },
        })
    }

    fn list_tools(&self) -> Result<serde_json::Value, BridgeError> {
        serde_json::to_value(self.registry.list())
            .map(|tools| json!({ "tools": tools }))
            .map_err(|err| internal(&MuxError::from(err)))
    }

    async fn call_tool(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, BridgeError> {
        let params = params.ok_or_else(|| {
            BridgeError::new(BridgeErrorCode::InvalidParams, "Missing params for tools/call")
        })?;
        let call: ToolCallRequest = serde_json::from_value(params).map_err(|err| {
            BridgeError::new(BridgeErrorCode::InvalidParams, format!("Invalid params: {err}"))
        })?;

        let result = self
            .registry
            .call(&call.name, call.arguments)
            .await
            .map_err(|err| BridgeError::new(err.bridge_code(), err.to_string()))?;
        serde_json::to_value(result).map_err(|err| internal(&MuxError::from(err)))
    }
}

fn internal(err: &MuxError) -> BridgeError {
    BridgeError::new(BridgeErrorCode::InternalError, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin;
    use pretty_assertions::assert_eq;

    fn bridge() -> ToolBridge {
        let registry = ToolRegistry::new()
            .with_tool(builtin::calculator_tool())
            .expect("register");
        ToolBridge::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn lists_tools_with_input_schema() {
        let response = bridge()
            .handle(BridgeRequest::new(1, METHOD_TOOLS_LIST, None))
            .await;
        let tools = &response.result.expect("list should succeed")["tools"];
        assert_eq!(tools[0]["name"], "calculate");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["expression"]));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let response = bridge()
            .handle(BridgeRequest::new("a", "resources/list", None))
            .await;
        assert_eq!(response.id, Some(json!("a")));
        assert_eq!(response.error.expect("should fail").code, -32601);
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let response = bridge()
            .handle(BridgeRequest::new(
                2,
                METHOD_TOOLS_CALL,
                Some(json!({ "name": "nope", "arguments": {} })),
            ))
            .await;
        let error = response.error.expect("should fail");
        assert_eq!(error.code, -32602);
        assert!(error.message.contains("nope"));
    }

    #[tokio::test]
    async fn tool_failure_is_a_successful_response_with_is_error() {
        let response = bridge()
            .handle(BridgeRequest::new(
                3,
                METHOD_TOOLS_CALL,
                Some(json!({ "name": "calculate", "arguments": { "expression": "1/0" } })),
            ))
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.result.expect("result")["isError"], json!(true));
    }

    #[tokio::test]
    async fn raw_json_parse_errors_are_reported() {
        let raw = bridge().handle_json("{not json").await;
        let value: serde_json::Value = serde_json::from_str(&raw).expect("response is json");
        assert_eq!(value["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version() {
        let response = bridge()
            .handle(BridgeRequest::new(0, METHOD_INITIALIZE, None))
            .await;
        assert_eq!(
            response.result.expect("init")["protocolVersion"],
            json!(PROTOCOL_VERSION)
        );
    }
}
