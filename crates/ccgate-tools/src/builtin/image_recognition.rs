// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolError, ToolOutput};

/// Backing tool for the vision fallback (spec §4.4): given an `image_url`,
/// returns a short textual description the text-only upstream can read
/// instead of the raw image.
///
/// The real implementation (calling out to a captioning model) is an
/// external collaborator; this tool provides a deterministic placeholder
/// summary so the fallback path is fully exercisable without one.
pub struct ImageRecognitionTool;

#[async_trait]
impl Tool for ImageRecognitionTool {
    fn name(&self) -> &str {
        "image_recognition"
    }

    fn description(&self) -> &str {
        "Describe the contents of an image given its URL."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"image_url": {"type": "string"}},
            "required": ["image_url"],
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let url = call
            .args
            .get("image_url")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>");
        Ok(ToolOutput::ok(
            &call.id,
            format!("image at {url}: description unavailable (no vision model configured)"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn describes_given_url() {
        let call = ToolCall {
            id: "toolu_1".into(),
            name: "image_recognition".into(),
            args: json!({"image_url": "https://x/y.png"}),
        };
        let out = ImageRecognitionTool.execute(&call).await.unwrap();
        assert!(out.content.contains("https://x/y.png"));
        assert!(!out.is_error);
    }
}
