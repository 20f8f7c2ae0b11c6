// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Composite tool executor (§4.8): local registry first, MCP fan-out on
//! `ErrToolNotImplemented`. The MCP side is injected as a trait object so
//! `ccgate-core` stays free of a dependency on `ccgate-mcp` — the gateway
//! crate wires a concrete MCP registry in at startup.
use std::sync::Arc;

use async_trait::async_trait;
use ccgate_tools::{Tool, ToolCall, ToolError, ToolOutput, ToolRegistry};

#[async_trait]
pub trait McpFanout: Send + Sync {
    async fn call_tool_any(&self, name: &str, input: serde_json::Value) -> Result<ToolOutput, String>;
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    mcp: Option<Arc<dyn McpFanout>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, mcp: Option<Arc<dyn McpFanout>>) -> Self {
        Self { registry, mcp }
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.registry.execute(call).await {
            Ok(out) => out,
            Err(ToolError::NotImplemented) => match &self.mcp {
                Some(mcp) => match mcp.call_tool_any(&call.name, call.args.clone()).await {
                    Ok(out) => out,
                    Err(e) => ToolOutput::err(&call.id, e),
                },
                None => ToolOutput::err(&call.id, format!("tool not implemented: {}", call.name)),
            },
            Err(ToolError::Other(e)) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}
