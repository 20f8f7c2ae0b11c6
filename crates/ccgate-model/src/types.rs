// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Cheap token-count heuristic: chars/4, floored at 1 for any non-empty
/// accounting unit. Used by quota reservation and `/v1/messages/count_tokens`.
/// Not a real tokenizer — callers that need provider-exact counts must use
/// the provider's own endpoint.
pub fn approx_tokens(text: &str) -> u32 {
    ((text.len() as u32) / 4).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single typed block within a message or response. The canonical model
/// collapses the wire dialects' `image` / `image_url` distinction into one
/// `Image` variant; translators normalize both at the edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        /// Data URL (`data:<mime>;base64,<b64>`) or HTTPS URL.
        image_url: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn approx_tokens(&self) -> u32 {
        match self {
            Self::Text { text } => approx_tokens(text),
            Self::Image { .. } => 765,
            Self::ToolUse { name, input, .. } => {
                approx_tokens(name) + approx_tokens(&input.to_string())
            }
            Self::ToolResult { content, .. } => approx_tokens(content),
        }
    }
}

/// A single message in canonical conversation history. `system` is carried
/// separately on [`Request`], never as a message role — every wire dialect's
/// `role=system` (or `role=tool` result) is normalized into `system` or a
/// `User` message with a `ToolResult` block respectively (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::tool_result(tool_use_id, content, false)],
        }
    }

    /// Plain text if this message is exactly one text block, else `None`.
    pub fn as_text(&self) -> Option<&str> {
        match self.content.as_slice() {
            [ContentBlock::Text { text }] => Some(text),
            _ => None,
        }
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Image { image_url } => Some(image_url.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }

    pub fn approx_tokens(&self) -> u32 {
        self.content.iter().map(ContentBlock::approx_tokens).sum::<u32>().max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Canonical request (§3): the normalized form every wire dialect is
/// translated into before the policy pipeline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub run_id: String,
    pub model: String,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    /// Free-form routing/dispatch/diagnostics map (§9 design note). Documented
    /// keys include `mode, session_id, request_path, client_model,
    /// requested_model, upstream_model, routing_adapter_route,
    /// routing_route_source, tool_loop_mode, tool_loop_max_steps,
    /// tool_emulation_mode, tool_planner_model, tool_aliases,
    /// tool_fallback_applied, tool_fallback_reason, upstream_supports_tools,
    /// upstream_supports_vision, vision_fallback_mode,
    /// strict_stream_passthrough`.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Opaque header passthrough; never serialized onto the wire response.
    #[serde(skip)]
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn metadata_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        if !self.metadata.is_object() {
            self.metadata = serde_json::json!({});
        }
        self.metadata[key] = value.into();
    }

    /// Sum of `max_tokens` and every message's approximate token count, used
    /// by quota reservation (policy pipeline step 12).
    pub fn approx_total_tokens(&self) -> u32 {
        self.max_tokens.max(1)
            + self
                .messages
                .iter()
                .map(Message::approx_tokens)
                .sum::<u32>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    MaxTurns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Canonical response (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub model: String,
    pub blocks: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl Response {
    pub fn text(model: impl Into<String>, text: impl Into<String>, usage: Usage) -> Self {
        Self {
            model: model.into(),
            blocks: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage,
        }
    }

    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    MessageDelta,
    MessageStop,
}

/// Canonical streamed event (§3). When `pass_through` is true the wire
/// adapter emits `raw_data` verbatim (after an optional model rewrite on
/// `message_start`); otherwise it synthesizes the dialect-specific payload
/// from the typed fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub pass_through: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,
}

impl StreamEvent {
    pub fn synthesized(kind: StreamEventKind, index: u32) -> Self {
        Self {
            kind,
            index,
            block: None,
            delta_text: None,
            delta_json: None,
            stop_reason: None,
            usage: None,
            pass_through: false,
            raw_event: None,
            raw_data: None,
        }
    }

    pub fn text_delta(index: u32, text: impl Into<String>) -> Self {
        Self {
            delta_text: Some(text.into()),
            ..Self::synthesized(StreamEventKind::ContentBlockDelta, index)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
