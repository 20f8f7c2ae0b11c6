// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Adapts `ccgate_mcp::McpRegistry` to the `ccgate_core::McpFanout` trait
//! object the composite tool executor falls back to (§4.8). Lives here
//! because `ccgate-core` and `ccgate-mcp` deliberately don't depend on each
//! other; this gateway crate is the only one that sees both.
use std::sync::Arc;

use async_trait::async_trait;
use ccgate_core::McpFanout;
use ccgate_mcp::McpRegistry;
use ccgate_tools::ToolOutput;

pub struct McpFanoutAdapter {
    registry: Arc<McpRegistry>,
    project_id: Option<String>,
}

impl McpFanoutAdapter {
    pub fn new(registry: Arc<McpRegistry>, project_id: Option<String>) -> Self {
        Self { registry, project_id }
    }
}

#[async_trait]
impl McpFanout for McpFanoutAdapter {
    async fn call_tool_any(&self, name: &str, input: serde_json::Value) -> Result<ToolOutput, String> {
        let call = ccgate_tools::ToolCall { id: String::new(), name: name.to_string(), args: input };
        self.registry.call_tool_any(self.project_id.as_deref(), &call).await.map_err(|e| e.to_string())
    }
}
