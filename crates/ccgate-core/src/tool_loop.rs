// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Server-side tool loop (§4.3): iterates planner calls, extracts tool uses
//! (native or emulated from text), executes them, and feeds results back
//! until the model stops asking for tools or `max_steps` is exhausted.
use std::collections::{HashMap, HashSet};

use ccgate_model::{ContentBlock, Message, Orchestrator, Request, Response, Role, StopReason, Usage};
use ccgate_model::error::GatewayError;
use ccgate_tools::ToolCall;

use crate::emulation::{self, EmulationMode};
use crate::events::EventBus;
use crate::executor::ToolExecutor;

pub struct ToolLoopConfig {
    pub max_steps: u32,
    pub emulation_mode: EmulationMode,
    pub planner_model: Option<String>,
    pub tool_aliases: HashMap<String, String>,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self { max_steps: 8, emulation_mode: EmulationMode::Native, planner_model: None, tool_aliases: HashMap::new() }
    }
}

fn emulation_instruction(mode: EmulationMode) -> &'static str {
    match mode {
        EmulationMode::Native => "",
        EmulationMode::Json => {
            "\n\nWhen you need to call a tool, respond with a single JSON object \
             {\"tool\": <name>, \"input\": <args>} and nothing else."
        }
        EmulationMode::React => {
            "\n\nUse the format:\nAction: <tool name>\nAction Input: <JSON args>\n\
             When you are done, respond with Action: final_answer."
        }
        EmulationMode::Hybrid => {
            "\n\nWhen you need to call a tool, respond with either a JSON object \
             {\"tool\": <name>, \"input\": <args>}, or the lines \
             Action: <tool name> / Action Input: <JSON args>."
        }
    }
}

fn resolve_alias(name: &str, declared: &HashSet<String>, aliases: &HashMap<String, String>, bus: &EventBus, session_id: Option<&str>) -> String {
    let lower = name.to_lowercase();
    if let Some(to) = aliases.get(&lower) {
        if declared.contains(to) {
            bus.append(
                "tool.alias_applied",
                session_id.map(str::to_string),
                None,
                None,
                None,
                None,
                None,
                serde_json::json!({"from": lower, "to": to}),
            );
            return to.clone();
        }
    }
    lower
}

/// Runs the loop to completion, returning the final canonical [`Response`]
/// with cumulative usage across every planner/finalizer call.
pub async fn run(
    orchestrator: &dyn Orchestrator,
    executor: &ToolExecutor,
    bus: &EventBus,
    mut working: Request,
    config: &ToolLoopConfig,
) -> Result<Response, GatewayError> {
    let declared: HashSet<String> = working.tools.iter().map(|t| t.name.to_lowercase()).collect();
    let primary_model = working.model.clone();
    let base_system = working.system.clone();
    let session_id = working.metadata_str("session_id").map(str::to_string);
    let mut usage = Usage::default();
    let mut tool_was_executed = false;
    let mut synthetic_id_counter = 0u32;

    for _ in 0..config.max_steps.max(1) {
        let mut call_req = working.clone();
        call_req.model = config.planner_model.clone().unwrap_or_else(|| primary_model.clone());
        if config.emulation_mode != EmulationMode::Native {
            let mut system = base_system.clone().unwrap_or_default();
            system.push_str(emulation_instruction(config.emulation_mode));
            call_req.system = Some(system);
        }

        let resp = orchestrator.complete(call_req).await?;
        usage.accumulate(&resp.usage);

        let native_uses: Vec<(String, String, serde_json::Value)> = resp
            .tool_uses()
            .into_iter()
            .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
            .collect();

        let calls: Vec<(String, String, serde_json::Value)> = if !native_uses.is_empty() {
            native_uses
        } else {
            let text = resp.text_content();
            let emulated = emulation::parse_calls(config.emulation_mode, &text);
            if emulated.is_empty() {
                if emulation::text_contains_malformed_tool_call(&text) {
                    bus.append(
                        "tool.gap_detected",
                        session_id.clone(),
                        None,
                        None,
                        None,
                        None,
                        None,
                        serde_json::json!({"reason": "unparseable_tool_call"}),
                    );
                }
                Vec::new()
            } else {
                bus.append(
                    "tool.emulated_call",
                    session_id.clone(),
                    None,
                    None,
                    None,
                    None,
                    None,
                    serde_json::json!({"count": emulated.len()}),
                );
                emulated
                    .into_iter()
                    .map(|c| {
                        synthetic_id_counter += 1;
                        (format!("toolu_emu_{synthetic_id_counter}"), c.name, c.input)
                    })
                    .collect()
            }
        };

        if calls.is_empty() {
            if tool_was_executed && config.planner_model.is_some() && config.planner_model.as_deref() != Some(primary_model.as_str()) {
                let mut final_req = working.clone();
                final_req.model = primary_model.clone();
                final_req.system = base_system.clone();
                let final_resp = orchestrator.complete(final_req).await?;
                usage.accumulate(&final_resp.usage);
                return Ok(Response { usage, ..final_resp });
            }
            return Ok(Response { usage, ..resp });
        }

        let mut assistant_blocks = Vec::new();
        let mut result_blocks = Vec::new();

        for (id, name, input) in calls {
            let resolved = resolve_alias(&name, &declared, &config.tool_aliases, bus, session_id.as_deref());
            assistant_blocks.push(ContentBlock::tool_use(id.clone(), resolved.clone(), input.clone()));

            if !declared.contains(&resolved) {
                bus.append(
                    "tool.gap_detected",
                    session_id.clone(),
                    None,
                    None,
                    None,
                    None,
                    None,
                    serde_json::json!({"reason": "tool_not_declared", "tool": resolved}),
                );
                result_blocks.push(ContentBlock::tool_result(id, format!("tool not declared: {resolved}"), true));
                continue;
            }

            let call = ToolCall { id: id.clone(), name: resolved, args: input };
            let out = executor.execute(&call).await;
            tool_was_executed = true;
            result_blocks.push(ContentBlock::tool_result(out.call_id, out.content, out.is_error));
        }

        working.messages.push(Message { role: Role::Assistant, content: assistant_blocks });
        working.messages.push(Message { role: Role::User, content: result_blocks });
    }

    Ok(Response { model: primary_model, blocks: vec![], stop_reason: StopReason::MaxTurns, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccgate_model::mock::MockOrchestrator;
    use ccgate_model::ToolSchema;
    use ccgate_tools::{EchoTool, ToolRegistry};
    use std::sync::Arc;

    fn executor() -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        ToolExecutor::new(Arc::new(reg), None)
    }

    fn base_request() -> Request {
        Request {
            model: "m".into(),
            messages: vec![Message::user_text("hi")],
            tools: vec![ToolSchema { name: "echo".into(), description: "".into(), parameters: serde_json::json!({}) }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_tools_requested_returns_plain_text() {
        let orchestrator = MockOrchestrator::always_text("hello");
        let bus = EventBus::new();
        let config = ToolLoopConfig::default();
        let resp = run(&orchestrator, &executor(), &bus, base_request(), &config).await.unwrap();
        assert_eq!(resp.text_content(), "hello");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
    }

    #[tokio::test]
    async fn native_tool_call_executes_and_returns_final_text() {
        let orchestrator = MockOrchestrator::tool_then_text("echo", serde_json::json!({"text": "echoed"}), "done");
        let bus = EventBus::new();
        let config = ToolLoopConfig::default();
        let resp = run(&orchestrator, &executor(), &bus, base_request(), &config).await.unwrap();
        assert_eq!(resp.text_content(), "done");
        assert_eq!(resp.usage.input_tokens, 20); // 10 + 10 across two calls
    }

    #[tokio::test]
    async fn emulated_json_tool_call_is_parsed_and_executed() {
        let orchestrator = MockOrchestrator::new(vec![
            ccgate_model::mock::ScriptedTurn::Text(r#"{"tool":"echo","input":{"text":"hi"}}"#.into()),
            ccgate_model::mock::ScriptedTurn::Text("final answer".into()),
        ]);
        let bus = EventBus::new();
        let config = ToolLoopConfig { emulation_mode: EmulationMode::Json, ..Default::default() };
        let resp = run(&orchestrator, &executor(), &bus, base_request(), &config).await.unwrap();
        assert_eq!(resp.text_content(), "final answer");
        let events = bus.list(&Default::default(), 10);
        assert!(events.iter().any(|e| e.event_type == "tool.emulated_call"));
    }

    #[tokio::test]
    async fn undeclared_tool_name_yields_error_result_and_gap_event() {
        let orchestrator = MockOrchestrator::new(vec![
            ccgate_model::mock::ScriptedTurn::ToolCall { name: "not_declared".into(), input: serde_json::json!({}) },
            ccgate_model::mock::ScriptedTurn::Text("done".into()),
        ]);
        let bus = EventBus::new();
        let config = ToolLoopConfig::default();
        let resp = run(&orchestrator, &executor(), &bus, base_request(), &config).await.unwrap();
        assert_eq!(resp.text_content(), "done");
        let events = bus.list(&Default::default(), 10);
        assert!(events.iter().any(|e| e.event_type == "tool.gap_detected"));
    }

    #[tokio::test]
    async fn alias_rewrite_maps_unknown_name_to_declared_tool() {
        let orchestrator = MockOrchestrator::new(vec![
            ccgate_model::mock::ScriptedTurn::ToolCall { name: "say".into(), input: serde_json::json!({"text": "hi"}) },
            ccgate_model::mock::ScriptedTurn::Text("done".into()),
        ]);
        let bus = EventBus::new();
        let mut aliases = HashMap::new();
        aliases.insert("say".to_string(), "echo".to_string());
        let config = ToolLoopConfig { tool_aliases: aliases, ..Default::default() };
        let resp = run(&orchestrator, &executor(), &bus, base_request(), &config).await.unwrap();
        assert_eq!(resp.text_content(), "done");
        let events = bus.list(&Default::default(), 10);
        assert!(events.iter().any(|e| e.event_type == "tool.alias_applied"));
    }

    #[tokio::test]
    async fn exceeding_max_steps_forces_max_turns() {
        let always_tool_call = std::iter::repeat(ccgate_model::mock::ScriptedTurn::ToolCall {
            name: "echo".into(),
            input: serde_json::json!({"text": "x"}),
        })
        .take(10)
        .collect();
        let orchestrator = MockOrchestrator::new(always_tool_call);
        let bus = EventBus::new();
        let config = ToolLoopConfig { max_steps: 2, ..Default::default() };
        let resp = run(&orchestrator, &executor(), &bus, base_request(), &config).await.unwrap();
        assert_eq!(resp.stop_reason, StopReason::MaxTurns);
    }

    #[tokio::test]
    async fn planner_finalizer_split_invokes_primary_model_to_finish() {
        let orchestrator = MockOrchestrator::new(vec![
            ccgate_model::mock::ScriptedTurn::ToolCall { name: "echo".into(), input: serde_json::json!({"text": "x"}) },
            ccgate_model::mock::ScriptedTurn::Text("planner has nothing left".into()),
            ccgate_model::mock::ScriptedTurn::Text("finalized by primary".into()),
        ]);
        let bus = EventBus::new();
        let config = ToolLoopConfig { planner_model: Some("planner-model".into()), ..Default::default() };
        let resp = run(&orchestrator, &executor(), &bus, base_request(), &config).await.unwrap();
        assert_eq!(resp.text_content(), "finalized by primary");
    }
}
