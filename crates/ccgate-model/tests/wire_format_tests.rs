// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Cross-dialect wire format tests: decode a request in one inbound dialect,
//! run it through the canonical model, and render the same canonical
//! response in every outbound dialect. This exercises the actual point of
//! the gateway — one canonical turn, three wire shapes — rather than any
//! single dialect module in isolation.
use ccgate_model::dialect::{anthropic, openai_chat, openai_responses};
use ccgate_model::{ContentBlock, Response, StopReason, Usage};
use serde_json::json;

fn sample_response() -> Response {
    Response {
        model: "gpt-5".into(),
        blocks: vec![
            ContentBlock::text("The weather in SF is 72F."),
            ContentBlock::tool_use("call_1", "get_weather", json!({"city": "SF"})),
        ],
        stop_reason: StopReason::ToolUse,
        usage: Usage { input_tokens: 40, output_tokens: 12 },
    }
}

#[test]
fn openai_chat_request_and_anthropic_request_reach_the_same_canonical_shape() {
    let anthropic_wire = json!({
        "model": "claude-opus-4-5",
        "messages": [{"role": "user", "content": "hello"}],
    });
    let openai_wire = json!({
        "model": "gpt-5",
        "messages": [{"role": "user", "content": "hello"}],
    });
    let a = anthropic::to_canonical_request(anthropic_wire).unwrap();
    let o = openai_chat::to_canonical_request(openai_wire).unwrap();
    assert_eq!(a.messages[0].as_text(), o.messages[0].as_text());
}

#[test]
fn same_canonical_response_renders_tool_use_in_all_three_dialects() {
    let resp = sample_response();

    let anthropic_wire = anthropic::from_canonical_response(&resp, "run_1");
    assert_eq!(anthropic_wire["stop_reason"], "tool_use");
    assert_eq!(anthropic_wire["content"][1]["type"], "tool_use");
    assert_eq!(anthropic_wire["content"][1]["name"], "get_weather");

    let openai_chat_wire = openai_chat::from_canonical_response(&resp, "run_1", 0);
    let tool_calls = &openai_chat_wire["choices"][0]["message"]["tool_calls"];
    assert_eq!(tool_calls[0]["function"]["name"], "get_weather");
    assert_eq!(openai_chat_wire["choices"][0]["finish_reason"], "tool_calls");

    let responses_wire = openai_responses::from_canonical_response(&resp, "run_1");
    let output = responses_wire["output"].as_array().unwrap();
    assert!(output.iter().any(|item| item["type"] == "function_call" && item["name"] == "get_weather"));
}

#[test]
fn end_turn_response_has_no_tool_calls_in_any_dialect() {
    let resp = Response::text("gpt-5", "hi there", Usage { input_tokens: 5, output_tokens: 3 });

    let anthropic_wire = anthropic::from_canonical_response(&resp, "run_2");
    assert_eq!(anthropic_wire["content"][0]["text"], "hi there");

    let openai_chat_wire = openai_chat::from_canonical_response(&resp, "run_2", 0);
    assert!(openai_chat_wire["choices"][0]["message"]["tool_calls"].is_null());
    assert_eq!(openai_chat_wire["choices"][0]["finish_reason"], "stop");

    let responses_wire = openai_responses::from_canonical_response(&resp, "run_2");
    assert_eq!(responses_wire["status"], "completed");
}

#[test]
fn anthropic_request_with_tool_schema_round_trips_into_canonical_tool_list() {
    let wire = json!({
        "model": "claude-opus-4-5",
        "messages": [{"role": "user", "content": "what's the weather?"}],
        "tools": [{
            "name": "get_weather",
            "description": "Look up current weather",
            "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}},
        }],
    });
    let req = anthropic::to_canonical_request(wire).unwrap();
    assert_eq!(req.tools.len(), 1);
    assert_eq!(req.tools[0].name, "get_weather");
}
