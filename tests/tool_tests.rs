//! Tool bridge JSON surface and batch execution.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use chatmux::bridge::{BridgeClient, ToolBridge};
use chatmux::error::BridgeErrorCode;
use chatmux::tools::{
    ExecutionMode, FnTool, Tool, ToolArguments, ToolCallRequest, ToolExecutionContext,
    ToolParameters, ToolRegistry,
};
use common::{echo_tool, registry};

async fn rpc(bridge: &ToolBridge, request: Value) -> Value {
    let raw = bridge.handle_json(&request.to_string()).await;
    serde_json::from_str(&raw).expect("bridge answers with JSON")
}

fn sleepy(name: &'static str, millis: u64) -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        name,
        "Sleeps, then reports its name",
        ToolParameters::empty(),
        move |_args: ToolArguments, _ctx: ToolExecutionContext| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!(name))
        },
    ))
}

#[tokio::test]
async fn tools_list_keeps_registration_order() {
    let bridge = ToolBridge::new(registry());
    let response = rpc(&bridge, json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })).await;
    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .expect("tool array")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names.last(), Some(&"x"));
    assert_eq!(names[0], "calculate");
    let last = &response["result"]["tools"][names.len() - 1];
    assert_eq!(last["inputSchema"]["required"], json!(["y"]));
}

#[tokio::test]
async fn malformed_requests_map_to_error_codes() {
    let bridge = ToolBridge::new(registry());

    let parse = bridge.handle_json("{oops").await;
    let parse: Value = serde_json::from_str(&parse).expect("json");
    assert_eq!(parse["error"]["code"], BridgeErrorCode::ParseError.code());

    let unknown_method = rpc(
        &bridge,
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/destroy" }),
    )
    .await;
    assert_eq!(unknown_method["error"]["code"], BridgeErrorCode::MethodNotFound.code());
    assert_eq!(unknown_method["id"], 2);

    let unknown_tool = rpc(
        &bridge,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "nope", "arguments": {} }
        }),
    )
    .await;
    assert_eq!(unknown_tool["error"]["code"], BridgeErrorCode::InvalidParams.code());
    assert_eq!(unknown_tool["error"]["message"], "Unknown tool: nope");
}

#[tokio::test]
async fn handler_level_failures_come_back_as_error_results() {
    let bridge = ToolBridge::new(registry());

    let ok = rpc(
        &bridge,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": "x", "arguments": { "y": 7 } }
        }),
    )
    .await;
    assert_eq!(ok["result"]["isError"], false);
    assert_eq!(ok["result"]["content"][0]["text"], r#"{"echo":7}"#);

    let invalid = rpc(
        &bridge,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "x", "arguments": { "y": "seven" } }
        }),
    )
    .await;
    assert_eq!(invalid["result"]["isError"], true);
    assert!(invalid["result"]["content"][0]["text"]
        .as_str()
        .expect("text")
        .starts_with("Invalid arguments for 'x'"));
}

#[tokio::test(start_paused = true)]
async fn parallel_batches_return_results_in_call_order() {
    let registry = ToolRegistry::new()
        .with_tool(sleepy("slow", 300))
        .and_then(|r| r.with_tool(sleepy("fast", 10)))
        .expect("register");
    let batch = vec![
        (ToolCallRequest::new("slow", json!({})), ToolExecutionContext::default()),
        (ToolCallRequest::new("fast", json!({})), ToolExecutionContext::default()),
    ];

    let started = tokio::time::Instant::now();
    let results = registry.call_batch(batch, ExecutionMode::Parallel).await;
    assert!(started.elapsed() < Duration::from_millis(310));

    let texts: Vec<String> = results
        .into_iter()
        .map(|r| r.expect("known tools").text())
        .collect();
    assert_eq!(texts, vec!["slow".to_string(), "fast".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn timed_out_handlers_are_retried_once_then_reported() {
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let stuck: Arc<dyn Tool> = Arc::new(FnTool::new(
        "stuck",
        "Never finishes in time",
        ToolParameters::empty(),
        move |_args: ToolArguments, ctx: ToolExecutionContext| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(ctx.attempt))
            }
        },
    ));
    let registry = ToolRegistry::new()
        .with_timeout(Duration::from_millis(100))
        .with_tool(stuck)
        .expect("register");

    let result = registry.call("stuck", json!({})).await.expect("known tool");
    assert!(result.is_error);
    assert_eq!(result.text(), "Tool 'stuck' timed out after 100ms");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn remote_registry_mounts_through_the_bridge_client() {
    let tools = ToolRegistry::new().with_tool(echo_tool()).expect("register");
    let remote = ToolBridge::new(Arc::new(tools));
    let mut local = ToolRegistry::new();
    local
        .register_provider(Arc::new(BridgeClient::new(remote)))
        .await
        .expect("mount");
    assert!(local.contains("x"));

    let result = local.call("x", json!({ "y": 3 })).await.expect("known tool");
    assert!(!result.is_error);
    assert_eq!(result.text(), r#"{"echo":3}"#);
}
