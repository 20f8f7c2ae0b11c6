// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! End-to-end integration tests for the MCP client registry.
//!
//! Each test drives a real [`McpRegistry`] against a hand-rolled mock MCP
//! server listening on a loopback TCP socket. The mock speaks just enough
//! HTTP/1.1 to answer the single `POST` per call that [`HttpTransport`]
//! issues, so these tests exercise the real wire path end to end rather than
//! mocking the transport trait away.

use std::collections::HashMap;
use std::sync::Arc;

use ccgate_mcp::registry::{McpRegistry, McpServerSpec, TransportKind};
use ccgate_tools::ToolCall;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Starts a loopback HTTP server that answers `count` JSON-RPC requests, one
/// per accepted connection, with the bodies in `responses` (in order).
/// Returns the `http://127.0.0.1:<port>` base URL.
async fn spawn_mock_server(responses: Vec<Value>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for response in responses {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.is_empty() {
                    break;
                }
                if let Some(value) = trimmed.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let mut body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut body).await;
            let request: Value = serde_json::from_slice(&body).unwrap_or(json!({}));

            let id = request.get("id").cloned().unwrap_or(Value::Null);
            let mut wire = response.clone();
            wire["jsonrpc"] = json!("2.0");
            wire["id"] = id;
            let payload = serde_json::to_vec(&wire).unwrap();
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                payload.len()
            );
            let _ = write_half.write_all(head.as_bytes()).await;
            let _ = write_half.write_all(&payload).await;
            let _ = write_half.flush().await;
        }
    });
    format!("http://{addr}")
}

fn http_spec(id: &str, url: String) -> McpServerSpec {
    McpServerSpec {
        id: id.into(),
        name: id.into(),
        transport: TransportKind::Http,
        url: Some(url),
        command: None,
        args: vec![],
        env: HashMap::new(),
        headers: HashMap::new(),
        timeout_ms: 5_000,
        retries: 1,
        project_id: "default".into(),
        enabled: true,
    }
}

#[tokio::test]
async fn register_runs_health_check_against_the_server() {
    let url = spawn_mock_server(vec![json!({"result": {}})]).await;
    let registry = McpRegistry::new(30_000);
    let id = registry.register(http_spec("srv1", url)).await.unwrap();
    assert_eq!(registry.get(&id).await.unwrap().id, "srv1");
}

#[tokio::test]
async fn list_tools_parses_tools_from_server_and_caches_result() {
    let url = spawn_mock_server(vec![
        json!({"result": {}}),
        json!({"result": {"tools": [
            {"name": "search", "description": "full text search", "parameters": {"type": "object"}}
        ]}}),
    ])
    .await;
    let registry = McpRegistry::new(60_000);
    let id = registry.register(http_spec("srv1", url)).await.unwrap();

    let tools = registry.list_tools(&id).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "search");

    // Cached: a second call within the TTL must not open another connection,
    // so the mock server (which only queued two responses) isn't hit again.
    let tools_again = registry.list_tools(&id).await.unwrap();
    assert_eq!(tools_again.len(), 1);
}

#[tokio::test]
async fn call_tool_returns_text_content_from_server() {
    let url = spawn_mock_server(vec![
        json!({"result": {}}),
        json!({"result": {"content": [{"type": "text", "text": "hello from server"}], "isError": false}}),
    ])
    .await;
    let registry = McpRegistry::new(30_000);
    let id = registry.register(http_spec("srv1", url)).await.unwrap();

    let call = ToolCall { id: "call_1".into(), name: "search".into(), args: json!({"q": "rust"}) };
    let output = registry.call_tool(&id, &call).await.unwrap();
    assert_eq!(output.content, "hello from server");
    assert!(!output.is_error);
}

#[tokio::test]
async fn call_tool_surfaces_remote_error_as_tool_output() {
    let url = spawn_mock_server(vec![
        json!({"result": {}}),
        json!({"error": {"code": -32000, "message": "tool exploded"}}),
    ])
    .await;
    let registry = McpRegistry::new(30_000);
    let id = registry.register(http_spec("srv1", url)).await.unwrap();

    let call = ToolCall { id: "call_1".into(), name: "search".into(), args: json!({}) };
    let output = registry.call_tool(&id, &call).await.unwrap();
    assert!(output.is_error);
    assert_eq!(output.content, "tool exploded");
}

#[tokio::test]
async fn health_check_reports_unhealthy_when_server_errors() {
    let url = spawn_mock_server(vec![json!({"error": {"code": -32000, "message": "down"}})]).await;
    let registry = McpRegistry::new(30_000);
    let id = registry.register(http_spec("srv1", url)).await.unwrap();
    let healthy = registry.check_health(&id).await.unwrap();
    assert!(!healthy);
}

#[tokio::test]
async fn call_tool_any_finds_tool_across_multiple_servers() {
    let url_a = spawn_mock_server(vec![
        json!({"result": {}}),
        json!({"result": {"tools": [{"name": "alpha", "description": "", "parameters": {}}]}}),
    ])
    .await;
    let url_b = spawn_mock_server(vec![
        json!({"result": {}}),
        json!({"result": {"tools": [{"name": "beta", "description": "", "parameters": {}}]}}),
        json!({"result": {"content": [{"type": "text", "text": "beta ran"}], "isError": false}}),
    ])
    .await;

    let registry = McpRegistry::new(30_000);
    registry.register(http_spec("a", url_a)).await.unwrap();
    registry.register(http_spec("b", url_b)).await.unwrap();

    let call = ToolCall { id: "1".into(), name: "beta".into(), args: json!({}) };
    let output = registry.call_tool_any(None, &call).await.unwrap();
    assert_eq!(output.content, "beta ran");
}

#[tokio::test]
async fn call_tool_retries_and_invalidates_cache_on_tool_not_found() {
    let url = spawn_mock_server(vec![
        json!({"result": {}}),
        json!({"result": {"tools": [{"name": "search", "description": "", "parameters": {}}]}}),
        json!({"error": {"code": -32601, "message": "tool not found: search"}}),
        json!({"result": {"content": [{"type": "text", "text": "found it"}], "isError": false}}),
    ])
    .await;
    let registry = McpRegistry::new(60_000);
    let mut spec = http_spec("srv1", url);
    spec.retries = 2;
    let id = registry.register(spec).await.unwrap();

    // Prime the tool cache so it is populated before the stale-tool error.
    registry.list_tools(&id).await.unwrap();

    let call = ToolCall { id: "call_1".into(), name: "search".into(), args: json!({}) };
    let output = registry.call_tool(&id, &call).await.unwrap();
    assert!(!output.is_error);
    assert_eq!(output.content, "found it");
}

#[tokio::test]
async fn list_filters_servers_by_project() {
    let url = spawn_mock_server(vec![json!({"result": {}})]).await;
    let registry = McpRegistry::new(30_000);
    let mut spec = http_spec("srv1", url);
    spec.project_id = "proj1".into();
    registry.register(spec).await.unwrap();

    let all = registry.list(None).await;
    assert_eq!(all.len(), 1);
    let proj1_only = registry.list(Some("proj1")).await;
    assert_eq!(proj1_only.len(), 1);
    let other_project = registry.list(Some("proj2")).await;
    assert!(other_project.is_empty());
}
