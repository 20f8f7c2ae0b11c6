// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI Responses API (`/v1/responses`) dialect. `input` may be a bare
//! string (a single user turn) or a list of typed items; `function_call` /
//! `function_call_output` items map to `ToolUse` / `ToolResult` blocks the
//! same way Chat Completions' `tool_calls` / `tool` role does.
use serde_json::{json, Value};

use crate::dialect::openai_chat::{convert_chat_item, ChatItemOutcome};
use crate::error::GatewayError;
use crate::types::{ContentBlock, Message, Request, Response, Role, StopReason, ToolSchema, Usage};

pub fn to_canonical_request(wire: Value) -> Result<Request, GatewayError> {
    let model = wire
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_request("responses request missing `model`"))?
        .to_string();
    let max_tokens = wire
        .get("max_output_tokens")
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .map(|n| n as u32)
        .unwrap_or(1024);
    let mut system_parts = Vec::new();
    if let Some(instructions) = wire.get("instructions").and_then(Value::as_str) {
        system_parts.push(instructions.to_string());
    }

    let mut messages = Vec::new();
    let mut synthetic_id_counter = 0u32;
    match wire.get("input") {
        Some(Value::String(s)) => messages.push(Message::user_text(s.clone())),
        Some(Value::Array(items)) => {
            for item in items {
                match item_from_wire(item, &mut synthetic_id_counter)? {
                    Some(ChatItemOutcome::System(text)) => system_parts.push(text),
                    Some(ChatItemOutcome::Msg(msg)) => messages.push(msg),
                    None => {}
                }
            }
        }
        _ => return Err(GatewayError::invalid_request("responses request missing `input`")),
    };

    let tools = match wire.get("tools").and_then(Value::as_array) {
        Some(arr) => arr
            .iter()
            .map(|t| {
                Ok(ToolSchema {
                    name: t
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| GatewayError::invalid_request("tool entry missing `name`"))?
                        .to_string(),
                    description: t.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
                    parameters: t.get("parameters").cloned().unwrap_or(json!({})),
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?,
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

fn item_from_wire(item: &Value, synthetic_id_counter: &mut u32) -> Result<Option<ChatItemOutcome>, GatewayError> {
    let item_type = item.get("type").and_then(Value::as_str);
    let role_bearing = item.get("role").and_then(Value::as_str).is_some();

    if role_bearing || item_type == Some("message") {
        return convert_chat_item(item, synthetic_id_counter);
    }

    match item_type {
        Some("function_call") | Some("tool_call") => {
            let call_id = item
                .get("call_id")
                .or_else(|| item.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::invalid_request("function_call item missing `call_id`/`id`"))?
                .to_string();
            let name = item.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            let args_str = item.get("arguments").and_then(Value::as_str).unwrap_or("{}");
            let input = serde_json::from_str(args_str).unwrap_or_else(|_| json!({"_raw": args_str}));
            Ok(Some(ChatItemOutcome::Msg(Message {
                role: Role::Assistant,
                content: vec![ContentBlock::tool_use(call_id, name, input)],
            })))
        }
        Some("function_call_output") | Some("tool_result") => {
            let call_id = item
                .get("call_id")
                .or_else(|| item.get("tool_call_id"))
                .or_else(|| item.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    GatewayError::invalid_request("function_call_output item missing `call_id`/`tool_call_id`/`id`")
                })?
                .to_string();
            let output = item.get("output").and_then(Value::as_str).unwrap_or("").to_string();
            Ok(Some(ChatItemOutcome::Msg(Message::tool_result(call_id, output))))
        }
        _ if item.get("content").is_some() => convert_chat_item(item, synthetic_id_counter),
        other => Err(GatewayError::invalid_request(format!("unsupported responses item type: {other:?}"))),
    }
}

pub fn from_canonical_response(resp: &Response, run_id: &str) -> Value {
    let mut output = Vec::new();

    let text = resp.text_content();
    if !text.is_empty() {
        output.push(json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}],
        }));
    }
    for (id, name, input) in resp.tool_uses() {
        output.push(json!({
            "type": "function_call",
            "call_id": id,
            "name": name,
            "arguments": input.to_string(),
        }));
    }

    json!({
        "id": run_id,
        "object": "response",
        "model": resp.model,
        "status": response_status(resp.stop_reason),
        "output": output,
        "usage": {
            "input_tokens": resp.usage.input_tokens,
            "output_tokens": resp.usage.output_tokens,
        },
    })
}

fn response_status(reason: StopReason) -> &'static str {
    match reason {
        StopReason::MaxTokens => "incomplete",
        _ => "completed",
    }
}
