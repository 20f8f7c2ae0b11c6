// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI Chat Completions (`/v1/chat/completions`) dialect. `system`
//! messages accumulate into the canonical `system` field; `tool` role
//! messages become `User` messages carrying a `ToolResult` block;
//! assistant `tool_calls` become `ToolUse` blocks with JSON-parsed
//! arguments (falling back to `{"_raw": "<string>"}` when the arguments
//! string isn't valid JSON).
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::types::{ContentBlock, Message, Request, Response, Role, StopReason, ToolSchema, Usage};

pub fn to_canonical_request(wire: Value) -> Result<Request, GatewayError> {
    let model = wire
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_request("chat completion request missing `model`"))?
        .to_string();
    let max_tokens = wire
        .get("max_tokens")
        .or_else(|| wire.get("max_completion_tokens"))
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .map(|n| n as u32)
        .unwrap_or(1024);

    let wire_messages = wire
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::invalid_request("chat completion request missing `messages`"))?;

    let mut system_parts = Vec::new();
    let mut messages = Vec::new();
    let mut synthetic_id_counter = 0u32;

    for m in wire_messages {
        match convert_chat_item(m, &mut synthetic_id_counter)? {
            Some(ChatItemOutcome::System(text)) => system_parts.push(text),
            Some(ChatItemOutcome::Msg(msg)) => messages.push(msg),
            None => {}
        }
    }

    if messages.is_empty() {
        return Err(GatewayError::invalid_request("chat completion request has no non-system messages"));
    }

    let tools = match wire.get("tools").and_then(Value::as_array) {
        Some(arr) => arr.iter().map(tool_from_wire).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(Request {
        model,
        max_tokens,
        system: if system_parts.is_empty() { None } else { Some(system_parts.join("\n")) },
        messages,
        tools,
        metadata: json!({}),
        ..Default::default()
    })
}

/// Result of converting one Chat Completions message item, shared with the
/// Responses dialect's `message`-typed item handling (§4.1: "role-bearing OR
/// `type=message`: recurse through OpenAI chat conversion").
pub(crate) enum ChatItemOutcome {
    System(String),
    Msg(Message),
}

pub(crate) fn convert_chat_item(
    m: &Value,
    synthetic_id_counter: &mut u32,
) -> Result<Option<ChatItemOutcome>, GatewayError> {
    let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
    match role {
        "system" => Ok(content_as_text(m.get("content")).map(ChatItemOutcome::System)),
        "tool" => {
            let tool_use_id = m
                .get("tool_call_id")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::invalid_request("tool message missing `tool_call_id`"))?
                .to_string();
            let content = content_as_text(m.get("content")).unwrap_or_default();
            Ok(Some(ChatItemOutcome::Msg(Message::tool_result(tool_use_id, content))))
        }
        "assistant" => {
            let mut blocks = Vec::new();
            if let Some(text) = content_as_text(m.get("content")) {
                if !text.is_empty() {
                    blocks.push(ContentBlock::text(text));
                }
            }
            if let Some(calls) = m.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    let id = call.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| {
                        *synthetic_id_counter += 1;
                        format!("toolu_{synthetic_id_counter}")
                    });
                    let function = call.get("function").cloned().unwrap_or(json!({}));
                    let name = function.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                    let args_str = function.get("arguments").and_then(Value::as_str).unwrap_or("{}");
                    let input = serde_json::from_str(args_str).unwrap_or_else(|_| json!({"_raw": args_str}));
                    blocks.push(ContentBlock::tool_use(id, name, input));
                }
            }
            Ok(Some(ChatItemOutcome::Msg(Message { role: Role::Assistant, content: blocks })))
        }
        _ => {
            let mut blocks = Vec::new();
            match m.get("content") {
                Some(Value::String(s)) => blocks.push(ContentBlock::text(s.clone())),
                Some(Value::Array(parts)) => {
                    for part in parts {
                        match part.get("type").and_then(Value::as_str) {
                            Some("text") => {
                                blocks.push(ContentBlock::text(part.get("text").and_then(Value::as_str).unwrap_or("")))
                            }
                            Some("image_url") => {
                                let url = part
                                    .get("image_url")
                                    .and_then(|v| v.get("url"))
                                    .and_then(Value::as_str)
                                    .unwrap_or("");
                                blocks.push(ContentBlock::Image { image_url: url.to_string() });
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
            Ok(Some(ChatItemOutcome::Msg(Message { role: Role::User, content: blocks })))
        }
    }
}

fn tool_from_wire(t: &Value) -> Result<ToolSchema, GatewayError> {
    match t.get("type").and_then(Value::as_str) {
        Some("function") | None => {}
        Some(other) => return Err(GatewayError::invalid_request(format!("unsupported tool type: {other}"))),
    }
    let f = t
        .get("function")
        .ok_or_else(|| GatewayError::invalid_request("tool entry missing `function`"))?;
    let name = f
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_request("tool function missing `name`"))?
        .to_string();
    Ok(ToolSchema {
        name,
        description: f.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
        parameters: f.get("parameters").cloned().unwrap_or(json!({})),
    })
}

fn content_as_text(content: Option<&Value>) -> Option<String> {
    match content {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

pub fn from_canonical_response(resp: &Response, run_id: &str, created: i64) -> Value {
    let text = resp.text_content();
    let tool_calls: Vec<Value> = resp
        .tool_uses()
        .into_iter()
        .map(|(id, name, input)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": input.to_string()},
            })
        })
        .collect();

    let mut message = json!({"role": "assistant", "content": if text.is_empty() { Value::Null } else { json!(text) }});
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }

    json!({
        "id": run_id,
        "object": "chat.completion",
        "created": created,
        "model": resp.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason_to_wire(resp.stop_reason),
        }],
        "usage": {
            "prompt_tokens": resp.usage.input_tokens,
            "completion_tokens": resp.usage.output_tokens,
            "total_tokens": resp.usage.input_tokens + resp.usage.output_tokens,
        },
    })
}

fn finish_reason_to_wire(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "stop",
        StopReason::ToolUse => "tool_calls",
        StopReason::MaxTokens => "length",
        StopReason::MaxTurns => "stop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_accumulate_into_canonical_system() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "system", "content": "Use markdown."},
                {"role": "user", "content": "hi"},
            ],
        });
        let req = to_canonical_request(wire).unwrap();
        assert_eq!(req.system.as_deref(), Some("Be terse.\nUse markdown."));
    }

    #[test]
    fn tool_role_message_becomes_tool_result_block() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [{"role": "tool", "tool_call_id": "call_abc", "content": "72F"}],
        });
        let req = to_canonical_request(wire).unwrap();
        match &req.messages[0].content[0] {
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                assert_eq!(tool_use_id, "call_abc");
                assert_eq!(content, "72F");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn assistant_tool_calls_parse_json_arguments() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"SF\"}"},
                }],
            }],
        });
        let req = to_canonical_request(wire).unwrap();
        let uses = req.messages[0].tool_uses();
        assert_eq!(uses[0], ("call_1", "get_weather", &json!({"city": "SF"})));
    }

    #[test]
    fn assistant_tool_call_with_malformed_arguments_falls_back_to_raw() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "assistant",
                "tool_calls": [{"id": "call_1", "function": {"name": "f", "arguments": "not json"}}],
            }],
        });
        let req = to_canonical_request(wire).unwrap();
        let uses = req.messages[0].tool_uses();
        assert_eq!(uses[0].2, &json!({"_raw": "not json"}));
    }

    #[test]
    fn assistant_tool_call_missing_id_gets_synthetic_id() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "assistant",
                "tool_calls": [{"function": {"name": "f", "arguments": "{}"}}],
            }],
        });
        let req = to_canonical_request(wire).unwrap();
        assert_eq!(req.messages[0].tool_uses()[0].0, "toolu_1");
    }

    #[test]
    fn max_tokens_defaults_to_1024_when_absent_or_non_positive() {
        let wire = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(to_canonical_request(wire).unwrap().max_tokens, 1024);

        let wire = json!({"model": "gpt-4o", "max_tokens": 0, "messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(to_canonical_request(wire).unwrap().max_tokens, 1024);

        let wire = json!({"model": "gpt-4o", "max_tokens": -5, "messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(to_canonical_request(wire).unwrap().max_tokens, 1024);
    }

    #[test]
    fn tool_role_message_missing_tool_call_id_is_rejected() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [{"role": "tool", "content": "72F"}],
        });
        let err = to_canonical_request(wire).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn tool_entry_missing_function_field_is_rejected() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "function"}],
        });
        let err = to_canonical_request(wire).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn empty_non_system_message_list_is_rejected() {
        let wire = json!({
            "model": "gpt-4o",
            "messages": [{"role": "system", "content": "Be terse."}],
        });
        let err = to_canonical_request(wire).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn from_canonical_response_sets_tool_calls_finish_reason() {
        let resp = Response {
            model: "gpt-4o".into(),
            blocks: vec![ContentBlock::tool_use("call_1", "f", json!({}))],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        };
        let wire = from_canonical_response(&resp, "run_1", 0);
        assert_eq!(wire["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(wire["choices"][0]["message"]["tool_calls"][0]["function"]["name"], "f");
    }
}
