// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model (native or emulated).
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier correlated back to the originating `tool_use` block.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool, shaped to map directly onto a canonical
/// `tool_result` content block: `{tool_use_id, content, is_error}`.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Sentinel error returned by a [`Tool`] that recognizes the call but does
/// not implement it locally — the composite executor (§4.8) falls back to
/// the MCP tool fan-out when it sees this.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not implemented locally")]
    NotImplemented,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Trait every local tool implements. Tools are registered by name into a
/// [`crate::registry::ToolRegistry`] and invoked by the server-side tool loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's `input`.
    fn parameters_schema(&self) -> Value;
    /// Execute the tool. Return `Err(ToolError::NotImplemented)` to signal
    /// that the composite executor should fall back to MCP fan-out instead
    /// of surfacing this as a tool-level error.
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError>;
}

// ── Unit tests ──────────────────────────────────────────────────────────────
