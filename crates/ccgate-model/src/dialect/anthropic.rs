// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Messages API (`/v1/messages`) dialect. This is the closest
//! dialect to the canonical model — translation is close to identity, plus
//! unwrapping the `system` field's two shapes and flattening the
//! `source`-wrapped image blocks.
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::types::{ContentBlock, Message, Request, Response, Role, StopReason, ToolSchema, Usage};

pub fn to_canonical_request(wire: Value) -> Result<Request, GatewayError> {
    let model = wire
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_request("messages request missing `model`"))?
        .to_string();

    let max_tokens = wire.get("max_tokens").and_then(Value::as_u64).unwrap_or(4096) as u32;

    let system = match wire.get("system") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(blocks)) => {
            let joined = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            if joined.is_empty() { None } else { Some(joined) }
        }
        _ => None,
    };

    let messages = wire
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::invalid_request("messages request missing `messages`"))?
        .iter()
        .map(message_from_wire)
        .collect::<Result<Vec<_>, _>>()?;

    let tools = wire
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    Some(ToolSchema {
                        name: t.get("name")?.as_str()?.to_string(),
                        description: t.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
                        parameters: t.get("input_schema").cloned().unwrap_or(json!({})),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut metadata = json!({});
    if let Some(tool_choice) = wire.get("tool_choice") {
        metadata["tool_choice"] = tool_choice.clone();
    }
    if let Some(temperature) = wire.get("temperature") {
        metadata["temperature"] = temperature.clone();
    }
    if let Some(top_p) = wire.get("top_p") {
        metadata["top_p"] = top_p.clone();
    }

    Ok(Request {
        model,
        max_tokens,
        system,
        messages,
        tools,
        metadata,
        ..Default::default()
    })
}

fn message_from_wire(m: &Value) -> Result<Message, GatewayError> {
    let role = match m.get("role").and_then(Value::as_str) {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        other => {
            return Err(GatewayError::invalid_request(format!(
                "unsupported message role: {other:?}"
            )))
        }
    };

    let content = match m.get("content") {
        Some(Value::String(s)) => vec![ContentBlock::text(s.clone())],
        Some(Value::Array(blocks)) => blocks.iter().map(block_from_wire).collect::<Result<_, _>>()?,
        _ => Vec::new(),
    };

    Ok(Message { role, content })
}

fn block_from_wire(b: &Value) -> Result<ContentBlock, GatewayError> {
    match b.get("type").and_then(Value::as_str) {
        Some("text") => Ok(ContentBlock::text(b.get("text").and_then(Value::as_str).unwrap_or(""))),
        Some("image") => {
            let source = b.get("source").cloned().unwrap_or(json!({}));
            let url = match source.get("type").and_then(Value::as_str) {
                Some("url") => source.get("url").and_then(Value::as_str).unwrap_or("").to_string(),
                Some("base64") => {
                    let media_type = source.get("media_type").and_then(Value::as_str).unwrap_or("image/png");
                    let data = source.get("data").and_then(Value::as_str).unwrap_or("");
                    format!("data:{media_type};base64,{data}")
                }
                _ => String::new(),
            };
            Ok(ContentBlock::Image { image_url: url })
        }
        Some("tool_use") => Ok(ContentBlock::tool_use(
            b.get("id").and_then(Value::as_str).unwrap_or_default(),
            b.get("name").and_then(Value::as_str).unwrap_or_default(),
            b.get("input").cloned().unwrap_or(json!({})),
        )),
        Some("tool_result") => {
            let content = match b.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            Ok(ContentBlock::tool_result(
                b.get("tool_use_id").and_then(Value::as_str).unwrap_or_default(),
                content,
                b.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            ))
        }
        other => Err(GatewayError::invalid_request(format!("unsupported content block type: {other:?}"))),
    }
}

pub fn from_canonical_response(resp: &Response, run_id: &str) -> Value {
    json!({
        "id": run_id,
        "type": "message",
        "role": "assistant",
        "model": resp.model,
        "content": resp.blocks.iter().map(block_to_wire).collect::<Vec<_>>(),
        "stop_reason": stop_reason_to_wire(resp.stop_reason),
        "usage": usage_to_wire(&resp.usage),
    })
}

fn block_to_wire(b: &ContentBlock) -> Value {
    match b {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { image_url } => json!({
            "type": "image",
            "source": {"type": "url", "url": image_url},
        }),
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use", "id": id, "name": name, "input": input,
        }),
        ContentBlock::ToolResult { tool_use_id, content, is_error } => json!({
            "type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error,
        }),
    }
}

fn stop_reason_to_wire(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::ToolUse => "tool_use",
        StopReason::MaxTokens => "max_tokens",
        StopReason::MaxTurns => "end_turn",
    }
}

fn usage_to_wire(usage: &Usage) -> Value {
    json!({"input_tokens": usage.input_tokens, "output_tokens": usage.output_tokens})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_canonical_request_reads_string_system() {
        let wire = json!({
            "model": "claude-opus-4-5",
            "max_tokens": 256,
            "system": "Be terse.",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let req = to_canonical_request(wire).unwrap();
        assert_eq!(req.system.as_deref(), Some("Be terse."));
        assert_eq!(req.messages[0].as_text(), Some("hi"));
    }

    #[test]
    fn to_canonical_request_joins_system_block_array() {
        let wire = json!({
            "model": "claude-opus-4-5",
            "system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "messages": [],
        });
        let req = to_canonical_request(wire).unwrap();
        assert_eq!(req.system.as_deref(), Some("a\nb"));
    }

    #[test]
    fn to_canonical_request_parses_tool_use_block() {
        let wire = json!({
            "model": "claude-opus-4-5",
            "messages": [{
                "role": "assistant",
                "content": [{"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "SF"}}],
            }],
        });
        let req = to_canonical_request(wire).unwrap();
        let uses = req.messages[0].tool_uses();
        assert_eq!(uses[0], ("toolu_1", "get_weather", &json!({"city": "SF"})));
    }

    #[test]
    fn to_canonical_request_decodes_base64_image_as_data_url() {
        let wire = json!({
            "model": "claude-opus-4-5",
            "messages": [{
                "role": "user",
                "content": [{"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}],
            }],
        });
        let req = to_canonical_request(wire).unwrap();
        assert_eq!(req.messages[0].image_urls(), vec!["data:image/png;base64,AAAA"]);
    }

    #[test]
    fn to_canonical_request_merges_tool_choice_temperature_top_p_into_metadata() {
        let wire = json!({
            "model": "claude-opus-4-5",
            "messages": [],
            "tool_choice": {"type": "auto"},
            "temperature": 0.5,
            "top_p": 0.9,
        });
        let req = to_canonical_request(wire).unwrap();
        assert_eq!(req.metadata["tool_choice"], json!({"type": "auto"}));
        assert_eq!(req.metadata["temperature"], 0.5);
        assert_eq!(req.metadata["top_p"], 0.9);
    }

    #[test]
    fn to_canonical_request_rejects_missing_model() {
        let err = to_canonical_request(json!({"messages": []})).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn from_canonical_response_maps_stop_reason_and_usage() {
        let resp = Response::text("claude-opus-4-5", "hello", Usage { input_tokens: 3, output_tokens: 2 });
        let wire = from_canonical_response(&resp, "run_1");
        assert_eq!(wire["stop_reason"], "end_turn");
        assert_eq!(wire["usage"]["input_tokens"], 3);
        assert_eq!(wire["content"][0]["text"], "hello");
    }
}
