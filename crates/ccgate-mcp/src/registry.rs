// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! MCP server registry and tool fan-out (§4.7): register/update/delete/get/
//! list servers, health checks, cached `tools/list`, and `call_tool` /
//! `call_tool_any` used by the composite tool executor.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ccgate_tools::{ToolCall, ToolOutput};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::rpc::error_message;
use crate::transport::{HttpTransport, StdioTransport, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("mcp server not found: {0}")]
    NotFound(String),
    #[error("mcp server spec invalid: {0}")]
    InvalidSpec(String),
    #[error("mcp transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("mcp server error: {0}")]
    Remote(String),
    #[error("no mcp server exposes tool {0:?}")]
    ToolNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Stdio,
}

/// Config for one MCP server, matching the §3 `MCP Server` entity shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retries() -> u32 {
    1
}
fn default_enabled() -> bool {
    true
}

impl McpServerSpec {
    /// Normalizes `retries` to at least 1, per §3/§4.7.
    fn normalize(mut self) -> Self {
        self.retries = self.retries.max(1);
        self
    }

    fn validate(&self) -> Result<(), McpError> {
        match self.transport {
            TransportKind::Http => {
                let url = self.url.as_deref().unwrap_or_default();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(McpError::InvalidSpec("http transport requires a valid absolute URL".into()));
                }
            }
            TransportKind::Stdio => {
                if self.command.as_deref().unwrap_or_default().trim().is_empty() {
                    return Err(McpError::InvalidSpec("stdio transport requires a command".into()));
                }
            }
        }
        Ok(())
    }
}

/// Namespaces a raw server id under a project, per §3/§9: `prj_<id>__<raw>`
/// when the project isn't `"default"`.
pub fn namespaced_id(project_id: &str, raw_id: &str) -> String {
    if project_id.is_empty() || project_id == "default" {
        raw_id.to_string()
    } else {
        format!("prj_{project_id}__{raw_id}")
    }
}

/// Recovers `(project_id, raw_id)` from a possibly-namespaced id, inferring
/// `"default"` when there's no `prj_<id>__` prefix (§4.7).
pub fn project_of(id: &str) -> (String, &str) {
    if let Some(rest) = id.strip_prefix("prj_") {
        if let Some(idx) = rest.find("__") {
            return (rest[..idx].to_string(), &rest[idx + 2..]);
        }
    }
    ("default".to_string(), id)
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub healthy: bool,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

struct ToolsCache {
    fetched_at: Instant,
    tools: Vec<McpToolInfo>,
}

struct ServerHandle {
    spec: RwLock<McpServerSpec>,
    transport: Arc<dyn Transport>,
    status: RwLock<ServerStatus>,
    tools_cache: RwLock<Option<ToolsCache>>,
}

fn build_transport(spec: &McpServerSpec) -> Result<Arc<dyn Transport>, McpError> {
    spec.validate()?;
    match spec.transport {
        TransportKind::Http => Ok(Arc::new(HttpTransport::new(
            spec.url.clone().unwrap_or_default(),
            spec.headers.clone(),
            Duration::from_millis(spec.timeout_ms),
        ))),
        TransportKind::Stdio => {
            let command = spec.command.clone().unwrap_or_default();
            Ok(Arc::new(StdioTransport::spawn(&command, &spec.args, &spec.env)?))
        }
    }
}

/// In-memory registry of MCP servers and the tool fan-out built on top of
/// them. Tool listings are cached per server for `tools_cache_ttl`.
pub struct McpRegistry {
    servers: RwLock<HashMap<String, Arc<ServerHandle>>>,
    tools_cache_ttl: Duration,
    raw_id_counter: AtomicU64,
}

impl McpRegistry {
    pub fn new(tools_cache_ttl_ms: u64) -> Self {
        Self { servers: RwLock::new(HashMap::new()), tools_cache_ttl: Duration::from_millis(tools_cache_ttl_ms), raw_id_counter: AtomicU64::new(0) }
    }

    /// Builds the transport, runs the `initialize` handshake, and stores the
    /// server under its project-namespaced id. Returns that id.
    pub async fn register(&self, mut spec: McpServerSpec) -> Result<String, McpError> {
        if spec.id.trim().is_empty() {
            let seq = self.raw_id_counter.fetch_add(1, Ordering::SeqCst);
            spec.id = format!("mcp_{seq:x}");
        }
        let spec = spec.normalize();
        let id = namespaced_id(&spec.project_id, &spec.id);
        let transport = build_transport(&spec)?;

        let handle = Arc::new(ServerHandle {
            spec: RwLock::new(spec),
            transport,
            status: RwLock::new(ServerStatus { healthy: false, last_error: None, last_latency_ms: None }),
            tools_cache: RwLock::new(None),
        });

        self.servers.write().await.insert(id.clone(), handle.clone());
        let _ = self.check_health(&id).await;
        Ok(id)
    }

    pub async fn update(&self, id: &str, spec: McpServerSpec) -> Result<(), McpError> {
        let servers = self.servers.read().await;
        let handle = servers.get(id).ok_or_else(|| McpError::NotFound(id.to_string()))?;
        spec.validate()?;
        let spec = spec.normalize();
        *handle.spec.write().await = spec;
        *handle.tools_cache.write().await = None;
        Ok(())
    }

    /// Removes the server and drops its cached tool listing (§4.7:
    /// invalidate on update/delete/health failure/tool-not-found).
    pub async fn delete(&self, id: &str) -> bool {
        self.servers.write().await.remove(id).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<McpServerSpec> {
        let servers = self.servers.read().await;
        match servers.get(id) {
            Some(h) => Some(h.spec.read().await.clone()),
            None => None,
        }
    }

    pub async fn list(&self, project_id: Option<&str>) -> Vec<McpServerSpec> {
        let servers = self.servers.read().await;
        let mut out = Vec::new();
        for (id, handle) in servers.iter() {
            if let Some(project_id) = project_id {
                let (owner, _) = project_of(id);
                if owner != project_id {
                    continue;
                }
            }
            out.push(handle.spec.read().await.clone());
        }
        out
    }

    /// Pings the server and records latency/health in its status.
    pub async fn check_health(&self, id: &str) -> Result<bool, McpError> {
        let handle = self.handle(id).await?;
        let start = Instant::now();
        let result = handle.transport.call("ping", None).await;
        let mut status = handle.status.write().await;
        match result {
            Ok(resp) if resp.error.is_none() => {
                status.healthy = true;
                status.last_error = None;
                status.last_latency_ms = Some(start.elapsed().as_millis() as u64);
                Ok(true)
            }
            Ok(resp) => {
                let msg = resp.error.map(|e| error_message(&e)).unwrap_or_else(|| "unknown mcp error".into());
                status.healthy = false;
                status.last_error = Some(msg);
                drop(status);
                *handle.tools_cache.write().await = None;
                Ok(false)
            }
            Err(e) => {
                status.healthy = false;
                status.last_error = Some(e.to_string());
                drop(status);
                *handle.tools_cache.write().await = None;
                Ok(false)
            }
        }
    }

    /// Rebuilds the transport for `id` (used after a server is observed
    /// unhealthy) and re-runs the health check.
    pub async fn reconnect(&self, id: &str) -> Result<(), McpError> {
        let spec = self.get(id).await.ok_or_else(|| McpError::NotFound(id.to_string()))?;
        let transport = build_transport(&spec)?;
        let servers = self.servers.read().await;
        let handle = servers.get(id).ok_or_else(|| McpError::NotFound(id.to_string()))?;
        // Transport fields aren't individually replaceable behind Arc<dyn
        // Transport>, so reconnect rebuilds the whole handle in place.
        let new_handle = Arc::new(ServerHandle {
            spec: RwLock::new(spec),
            transport,
            status: RwLock::new(ServerStatus { healthy: false, last_error: None, last_latency_ms: None }),
            tools_cache: RwLock::new(None),
        });
        drop(servers);
        self.servers.write().await.insert(id.to_string(), new_handle);
        self.check_health(id).await.map(|_| ())
    }

    async fn handle(&self, id: &str) -> Result<Arc<ServerHandle>, McpError> {
        self.servers.read().await.get(id).cloned().ok_or_else(|| McpError::NotFound(id.to_string()))
    }

    /// Cached `tools/list`, refreshed once the TTL elapses.
    pub async fn list_tools(&self, id: &str) -> Result<Vec<McpToolInfo>, McpError> {
        let handle = self.handle(id).await?;
        {
            let cache = handle.tools_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.tools_cache_ttl {
                    return Ok(cached.tools.clone());
                }
            }
        }

        let response = handle.transport.call("tools/list", None).await?;
        if let Some(err) = response.error {
            return Err(McpError::Remote(error_message(&err)));
        }
        let tools: Vec<McpToolInfo> = response
            .result
            .and_then(|r| r.get("tools").cloned())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        *handle.tools_cache.write().await = Some(ToolsCache { fetched_at: Instant::now(), tools: tools.clone() });
        Ok(tools)
    }

    /// Calls `name` on the specific server `id`. When the upstream reports
    /// the tool as unknown, invalidates the cached tool list and retries up
    /// to `spec.retries` times (§4.7) before surfacing the error.
    pub async fn call_tool(&self, id: &str, call: &ToolCall) -> Result<ToolOutput, McpError> {
        let handle = self.handle(id).await?;
        let retries = handle.spec.read().await.retries.max(1);

        for attempt in 1..=retries {
            let params = serde_json::json!({"name": call.name, "arguments": call.args});
            let response = handle.transport.call("tools/call", Some(params)).await?;
            if let Some(err) = response.error {
                let msg = error_message(&err);
                if is_tool_not_found_error(&msg) {
                    *handle.tools_cache.write().await = None;
                    if attempt < retries {
                        continue;
                    }
                }
                return Ok(ToolOutput::err(&call.id, msg));
            }
            let result = response.result.unwrap_or(serde_json::json!({}));
            let is_error = result.get("isError").and_then(serde_json::Value::as_bool).unwrap_or(false);
            let content = extract_text_content(&result);
            return Ok(ToolOutput { call_id: call.id.clone(), content, is_error });
        }
        unreachable!("retries is normalized to at least 1")
    }

    /// Finds the first server (within `project_id`, if given) whose cached
    /// tool list declares `call.name`, then calls it there. Used by the
    /// composite tool executor's MCP fallback (§4.8).
    pub async fn call_tool_any(&self, project_id: Option<&str>, call: &ToolCall) -> Result<ToolOutput, McpError> {
        let ids: Vec<String> = self.servers.read().await.keys().filter(|id| project_id.map(|p| project_of(id).0 == p).unwrap_or(true)).cloned().collect();
        for id in ids {
            if let Ok(tools) = self.list_tools(&id).await {
                if tools.iter().any(|t| t.name == call.name) {
                    return self.call_tool(&id, call).await;
                }
            }
        }
        Err(McpError::ToolNotFound(call.name.clone()))
    }
}

/// Matches upstream error text indicating the tool isn't known to the server
/// (§4.7), so the cached `tools/list` result can be treated as stale.
fn is_tool_not_found_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    (lower.contains("tool") || lower.contains("method")) && (lower.contains("not found") || lower.contains("unknown"))
}

fn extract_text_content(result: &serde_json::Value) -> String {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(serde_json::Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_id_adds_prefix_for_non_default_project() {
        assert_eq!(namespaced_id("proj1", "srv1"), "prj_proj1__srv1");
        assert_eq!(namespaced_id("default", "srv1"), "srv1");
        assert_eq!(namespaced_id("", "srv1"), "srv1");
    }

    #[test]
    fn project_of_recovers_namespaced_parts() {
        assert_eq!(project_of("prj_proj1__srv1"), ("proj1".to_string(), "srv1"));
        assert_eq!(project_of("srv1"), ("default".to_string(), "srv1"));
    }

    #[test]
    fn http_spec_without_absolute_url_is_invalid() {
        let spec = McpServerSpec {
            id: "a".into(),
            name: "a".into(),
            transport: TransportKind::Http,
            url: Some("not-a-url".into()),
            command: None,
            args: vec![],
            env: HashMap::new(),
            headers: HashMap::new(),
            timeout_ms: 1000,
            retries: 1,
            project_id: "default".into(),
            enabled: true,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn stdio_spec_without_command_is_invalid() {
        let spec = McpServerSpec {
            id: "a".into(),
            name: "a".into(),
            transport: TransportKind::Stdio,
            url: None,
            command: None,
            args: vec![],
            env: HashMap::new(),
            headers: HashMap::new(),
            timeout_ms: 1000,
            retries: 1,
            project_id: "default".into(),
            enabled: true,
        };
        assert!(spec.validate().is_err());
    }

    #[tokio::test]
    async fn register_rejects_invalid_http_spec() {
        let registry = McpRegistry::new(30_000);
        let spec = McpServerSpec {
            id: "a".into(),
            name: "a".into(),
            transport: TransportKind::Http,
            url: Some("ftp://nope".into()),
            command: None,
            args: vec![],
            env: HashMap::new(),
            headers: HashMap::new(),
            timeout_ms: 1000,
            retries: 1,
            project_id: "default".into(),
            enabled: true,
        };
        assert!(registry.register(spec).await.is_err());
    }

    #[tokio::test]
    async fn delete_unknown_server_returns_false() {
        let registry = McpRegistry::new(30_000);
        assert!(!registry.delete("nope").await);
    }

    #[tokio::test]
    async fn get_unknown_server_returns_none() {
        let registry = McpRegistry::new(30_000);
        assert!(registry.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn call_tool_any_with_no_servers_returns_tool_not_found() {
        let registry = McpRegistry::new(30_000);
        let call = ToolCall { id: "1".into(), name: "search".into(), args: serde_json::json!({}) };
        let err = registry.call_tool_any(None, &call).await.unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));
    }

    #[test]
    fn extract_text_content_joins_text_parts() {
        let result = serde_json::json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(extract_text_content(&result), "ab");
    }

    #[test]
    fn normalize_raises_zero_retries_to_one() {
        let spec = McpServerSpec {
            id: "a".into(),
            name: "a".into(),
            transport: TransportKind::Http,
            url: Some("http://localhost".into()),
            command: None,
            args: vec![],
            env: HashMap::new(),
            headers: HashMap::new(),
            timeout_ms: 1000,
            retries: 0,
            project_id: "default".into(),
            enabled: true,
        };
        assert_eq!(spec.normalize().retries, 1);
    }

    #[test]
    fn is_tool_not_found_error_matches_common_phrasings() {
        assert!(is_tool_not_found_error("tool not found: search"));
        assert!(is_tool_not_found_error("unknown tool \"search\""));
        assert!(is_tool_not_found_error("method not found"));
        assert!(!is_tool_not_found_error("internal server error"));
    }
}
