// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolError, ToolOutput};

/// Returns its `text` argument verbatim. Used to exercise the tool loop
/// (§4.3) end to end without any real side effects.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back unchanged."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let text = call
            .args
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(ToolOutput::ok(&call.id, text))
    }
}
