// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The three chat dialects (§4.1, §4.5): `/v1/messages`,
//! `/v1/messages/count_tokens`, `/v1/chat/completions`, `/v1/responses`.
//! Each handler decodes into the canonical [`Request`], runs it through the
//! policy pipeline and capability fallbacks, dispatches (tool loop or
//! straight through the orchestrator), and renders the dialect-specific
//! response — buffered or streamed.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ccgate_core::capability::{apply_tool_support_fallback, apply_vision_fallback, RouteCapabilities};
use ccgate_core::tool_loop::{self, ToolLoopConfig};
use ccgate_core::EmulationMode;
use ccgate_model::dialect::{anthropic, openai_chat, openai_responses};
use ccgate_model::error::{ErrorEnvelope, GatewayError};
use ccgate_model::Request as CanonicalRequest;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::runlog::{redacted_curl, DecodeDiagnostics, RunLogEntry};
use crate::sse::{self, SseDialect};
use crate::state::AppState;

fn error_response(err: &GatewayError) -> Response {
    let envelope = ErrorEnvelope::from(err);
    (StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(envelope)).into_response()
}

fn admin_token() -> ccgate_core::Token {
    ccgate_core::Token {
        id: "admin".into(),
        value: String::new(),
        user_id: None,
        name: "admin".into(),
        status: ccgate_core::TokenStatus::Enabled,
        quota: 0,
        unlimited_quota: true,
        used: 0,
        models: vec![],
        subnet: vec![],
        group: None,
        expired_at: None,
    }
}

/// Handles any of the three wire->canonical request translations, reporting
/// decode failures to the event bus and run log with a redacted `curl` repro
/// (§7 "decode errors ... reported to event store and run log").
fn decode_request(dialect: SseDialect, _path: &str, body: &Value) -> Result<CanonicalRequest, GatewayError> {
    match dialect {
        SseDialect::Anthropic => anthropic::to_canonical_request(body.clone()),
        SseDialect::OpenAiChat => openai_chat::to_canonical_request(body.clone()),
        SseDialect::OpenAiResponses => openai_responses::to_canonical_request(body.clone()),
    }
}

fn render_response(dialect: SseDialect, resp: &ccgate_model::Response, run_id: &str) -> Value {
    match dialect {
        SseDialect::Anthropic => anthropic::from_canonical_response(resp, run_id),
        SseDialect::OpenAiChat => openai_chat::from_canonical_response(resp, run_id, 0),
        SseDialect::OpenAiResponses => openai_responses::from_canonical_response(resp, run_id),
    }
}

/// First adapter name set by the policy pipeline's routing stages
/// (`routing_adapter_route`, a `[adapter]` array per §4.2 step 7/9).
fn resolved_adapter_name(req: &CanonicalRequest) -> Option<&str> {
    req.metadata.get("routing_adapter_route").and_then(Value::as_array)?.first()?.as_str()
}

/// Builds [`RouteCapabilities`] from the orchestrator's declared config for
/// the resolved route's adapter (§6 `GetUpstreamConfig`), when it knows one.
/// Unknown routes/orchestrators fall back to the settings/heuristic chain
/// inside `apply_vision_fallback`/`apply_tool_support_fallback` by reporting
/// no capability either way.
fn resolve_route_capabilities(state: &AppState, req: &CanonicalRequest) -> RouteCapabilities {
    resolved_adapter_name(req)
        .and_then(|adapter| state.orchestrator.get_upstream_config(adapter))
        .map(|cfg| RouteCapabilities { supports_vision: cfg.supports_vision, supports_tools: cfg.supports_tools })
        .unwrap_or_default()
}

/// Builds the server-side tool loop config from the request's routing
/// metadata (§9 key catalog: `tool_loop_max_steps`, `tool_emulation_mode`,
/// `tool_planner_model`, `tool_aliases`), falling back to
/// [`ToolLoopConfig::default`] for any key that's absent.
fn tool_loop_config_from_metadata(req: &CanonicalRequest) -> ToolLoopConfig {
    let defaults = ToolLoopConfig::default();

    let max_steps = req.metadata.get("tool_loop_max_steps").and_then(Value::as_u64).map(|v| v as u32).unwrap_or(defaults.max_steps);

    let emulation_mode = req.metadata_str("tool_emulation_mode").map(EmulationMode::from_str).unwrap_or(defaults.emulation_mode);

    let planner_model = req.metadata_str("tool_planner_model").map(str::to_string).or(defaults.planner_model);

    let tool_aliases: HashMap<String, String> = req
        .metadata
        .get("tool_aliases")
        .and_then(Value::as_object)
        .map(|obj| obj.iter().filter_map(|(k, v)| v.as_str().map(|to| (k.to_lowercase(), to.to_string()))).collect())
        .unwrap_or(defaults.tool_aliases);

    ToolLoopConfig { max_steps, emulation_mode, planner_model, tool_aliases }
}

/// Whether the server-side tool loop should run (§4.3): `tool_loop_mode` is
/// one of the server-side modes, or the emulation mode is non-native, and
/// the request actually declares tools.
fn should_run_server_loop(req: &CanonicalRequest) -> bool {
    if req.tools.is_empty() {
        return false;
    }
    let mode = req.metadata_str("tool_loop_mode");
    let server_side_mode = matches!(mode, Some("server") | Some("server_loop") | Some("native") | Some("json") | Some("react") | Some("hybrid"));
    let emulating = req.metadata_str("tool_emulation_mode").map(EmulationMode::from_str).map(|m| m != EmulationMode::Native).unwrap_or(false);
    server_side_mode || emulating
}

/// Shared dispatch path for all three dialects: prepare, capability
/// fallbacks, tool loop or direct orchestrator call, settle, run log.
async fn handle_chat(
    state: AppState,
    dialect: SseDialect,
    path: &'static str,
    client_ip: Option<std::net::IpAddr>,
    auth: AuthContext,
    body: Value,
) -> Response {
    let started = Instant::now();
    let body_text = body.to_string();

    let canonical = match decode_request(dialect, path, &body) {
        Ok(r) => r,
        Err(e) => {
            state.events.append(
                "request.decode_failed",
                None,
                None,
                None,
                None,
                None,
                None,
                serde_json::json!({"path": path, "reason": e.to_string()}),
            );
            state.run_log.append(&RunLogEntry {
                timestamp: chrono::Utc::now().to_rfc3339(),
                run_id: None,
                path: path.to_string(),
                mode: "unknown".into(),
                client_model: "unknown".into(),
                requested_model: "unknown".into(),
                upstream_model: "unknown".into(),
                stream: false,
                tool_count: 0,
                status: "decode_failed".into(),
                error: Some(e.to_string()),
                record_text: None,
                duration_ms: started.elapsed().as_millis() as u64,
                decode_diagnostics: Some(DecodeDiagnostics {
                    reason: e.to_string(),
                    unsupported_fields: vec![],
                    request_body: body_text.clone(),
                    curl_command: redacted_curl(path, &body_text),
                }),
            });
            return error_response(&e);
        }
    };

    let stream_requested = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let mut token = match auth {
        AuthContext::Admin => admin_token(),
        AuthContext::User(t) => *t,
    };

    let mut prepared = match state.policy.prepare(canonical, path, &mut token, client_ip).await {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    let route = resolve_route_capabilities(&state, &prepared.request);
    apply_vision_fallback(&mut prepared.request, &route, &state.settings, &state.executor, &state.events).await;
    apply_tool_support_fallback(&mut prepared.request, &route, &state.events);

    let mode = prepared.request.metadata_str("mode").unwrap_or("chat").to_string();
    let client_model = prepared.request.metadata_str("client_model").unwrap_or_default().to_string();
    let requested_model = prepared.request.metadata_str("requested_model").unwrap_or_default().to_string();
    let upstream_model = prepared.request.metadata_str("upstream_model").unwrap_or_default().to_string();
    let tool_count = prepared.request.tools.len() as u32;
    let server_loop = should_run_server_loop(&prepared.request);
    let run_id = prepared.run_id.clone();
    let reserved = prepared.reserved;

    if stream_requested && !server_loop {
        let outward_model = client_model.clone();
        let req = prepared.request.clone();
        match state.orchestrator.stream(req).await {
            Ok((event_rx, err_rx)) => {
                state.policy.settle(&mut token, reserved, 0, 0);
                state.policy.complete_run(&run_id, 200, None, None);
                state.run_log.append(&RunLogEntry {
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    run_id: Some(run_id.clone()),
                    path: path.to_string(),
                    mode,
                    client_model,
                    requested_model,
                    upstream_model,
                    stream: true,
                    tool_count,
                    status: "ok".into(),
                    error: None,
                    record_text: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    decode_diagnostics: None,
                });
                return sse::stream_direct(dialect, event_rx, err_rx, outward_model).into_response();
            }
            Err(e) => {
                state.policy.refund(&mut token, reserved);
                state.policy.complete_run(&run_id, e.status_code(), Some(e.to_string()), None);
                return error_response(&e);
            }
        }
    }

    let result = if server_loop {
        let config = tool_loop_config_from_metadata(&prepared.request);
        tool_loop::run(state.orchestrator.as_ref(), &state.executor, &state.events, prepared.request.clone(), &config).await
    } else {
        state.orchestrator.complete(prepared.request.clone()).await
    };

    match result {
        Ok(resp) => {
            state.policy.settle(&mut token, reserved, resp.usage.input_tokens, resp.usage.output_tokens);
            state.policy.complete_run(&run_id, 200, None, Some(resp.text_content()));
            state.run_log.append(&RunLogEntry {
                timestamp: chrono::Utc::now().to_rfc3339(),
                run_id: Some(run_id.clone()),
                path: path.to_string(),
                mode,
                client_model,
                requested_model,
                upstream_model,
                stream: stream_requested,
                tool_count,
                status: "ok".into(),
                error: None,
                record_text: Some(resp.text_content()),
                duration_ms: started.elapsed().as_millis() as u64,
                decode_diagnostics: None,
            });
            if stream_requested {
                sse::replay_response(dialect, &resp, &run_id).into_response()
            } else {
                Json(render_response(dialect, &resp, &run_id)).into_response()
            }
        }
        Err(e) => {
            state.policy.refund(&mut token, reserved);
            state.policy.complete_run(&run_id, e.status_code(), Some(e.to_string()), None);
            state.run_log.append(&RunLogEntry {
                timestamp: chrono::Utc::now().to_rfc3339(),
                run_id: Some(run_id),
                path: path.to_string(),
                mode,
                client_model,
                requested_model,
                upstream_model,
                stream: stream_requested,
                tool_count,
                status: "error".into(),
                error: Some(e.to_string()),
                record_text: None,
                duration_ms: started.elapsed().as_millis() as u64,
                decode_diagnostics: None,
            });
            error_response(&e)
        }
    }
}

pub async fn messages(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::Extension(auth): axum::Extension<AuthContext>,
    Json(body): Json<Value>,
) -> Response {
    handle_chat(state, SseDialect::Anthropic, "/v1/messages", Some(addr.ip()), auth, body).await
}

pub async fn chat_completions(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::Extension(auth): axum::Extension<AuthContext>,
    Json(body): Json<Value>,
) -> Response {
    handle_chat(state, SseDialect::OpenAiChat, "/v1/chat/completions", Some(addr.ip()), auth, body).await
}

pub async fn responses(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::Extension(auth): axum::Extension<AuthContext>,
    Json(body): Json<Value>,
) -> Response {
    handle_chat(state, SseDialect::OpenAiResponses, "/v1/responses", Some(addr.ip()), auth, body).await
}

/// `/v1/messages/count_tokens`: runs the Anthropic decode (validating and
/// normalizing the request) and returns the approximate token count without
/// dispatching anywhere.
pub async fn count_tokens(Json(body): Json<Value>) -> Response {
    match anthropic::to_canonical_request(body) {
        Ok(req) => Json(serde_json::json!({"input_tokens": req.approx_total_tokens()})).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_response_dispatches_by_dialect() {
        let resp = ccgate_model::Response::text("m", "hi", ccgate_model::Usage::default());
        let anthropic_wire = render_response(SseDialect::Anthropic, &resp, "run_1");
        assert_eq!(anthropic_wire["type"], "message");
        let chat_wire = render_response(SseDialect::OpenAiChat, &resp, "run_1");
        assert_eq!(chat_wire["object"], "chat.completion");
        let responses_wire = render_response(SseDialect::OpenAiResponses, &resp, "run_1");
        assert_eq!(responses_wire["object"], "response");
    }

    #[test]
    fn decode_request_surfaces_invalid_request_error() {
        let err = decode_request(SseDialect::Anthropic, "/v1/messages", &serde_json::json!({})).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn should_run_server_loop_requires_tools_declared() {
        let mut req = CanonicalRequest { model: "m".into(), ..Default::default() };
        req.set_metadata("tool_loop_mode", "server_loop");
        assert!(!should_run_server_loop(&req));
    }

    #[test]
    fn should_run_server_loop_fires_for_every_server_side_mode() {
        for mode in ["server", "server_loop", "native", "json", "react", "hybrid"] {
            let mut req = CanonicalRequest {
                model: "m".into(),
                tools: vec![ccgate_model::ToolSchema { name: "search".into(), description: "".into(), parameters: serde_json::json!({}) }],
                ..Default::default()
            };
            req.set_metadata("tool_loop_mode", mode);
            assert!(should_run_server_loop(&req), "mode {mode} should activate the loop");
        }
    }

    #[test]
    fn should_run_server_loop_fires_on_non_native_emulation_without_explicit_mode() {
        let mut req = CanonicalRequest {
            model: "m".into(),
            tools: vec![ccgate_model::ToolSchema { name: "search".into(), description: "".into(), parameters: serde_json::json!({}) }],
            ..Default::default()
        };
        req.set_metadata("tool_emulation_mode", "hybrid");
        assert!(should_run_server_loop(&req));
    }

    #[test]
    fn should_run_server_loop_stays_off_for_unrelated_mode() {
        let mut req = CanonicalRequest {
            model: "m".into(),
            tools: vec![ccgate_model::ToolSchema { name: "search".into(), description: "".into(), parameters: serde_json::json!({}) }],
            ..Default::default()
        };
        req.set_metadata("tool_loop_mode", "off");
        assert!(!should_run_server_loop(&req));
    }

    #[test]
    fn tool_loop_config_from_metadata_reads_every_key() {
        let mut req = CanonicalRequest { model: "m".into(), ..Default::default() };
        req.set_metadata("tool_loop_max_steps", 3);
        req.set_metadata("tool_emulation_mode", "json");
        req.set_metadata("tool_planner_model", "planner-1");
        req.set_metadata("tool_aliases", serde_json::json!({"Say": "echo"}));

        let config = tool_loop_config_from_metadata(&req);
        assert_eq!(config.max_steps, 3);
        assert_eq!(config.emulation_mode, EmulationMode::Json);
        assert_eq!(config.planner_model.as_deref(), Some("planner-1"));
        assert_eq!(config.tool_aliases.get("say").map(String::as_str), Some("echo"));
    }

    #[test]
    fn tool_loop_config_from_metadata_falls_back_to_defaults() {
        let req = CanonicalRequest { model: "m".into(), ..Default::default() };
        let config = tool_loop_config_from_metadata(&req);
        let defaults = ToolLoopConfig::default();
        assert_eq!(config.max_steps, defaults.max_steps);
        assert_eq!(config.emulation_mode, defaults.emulation_mode);
        assert!(config.planner_model.is_none());
        assert!(config.tool_aliases.is_empty());
    }

    #[test]
    fn resolve_route_capabilities_uses_unknown_orchestrator_as_default() {
        let req = CanonicalRequest { model: "m".into(), ..Default::default() };
        // No `routing_adapter_route` metadata set, so no adapter lookup
        // happens at all; this only checks `resolved_adapter_name` itself.
        assert!(resolved_adapter_name(&req).is_none());
    }

    #[test]
    fn resolved_adapter_name_reads_first_entry_of_routing_metadata() {
        let mut req = CanonicalRequest { model: "m".into(), ..Default::default() };
        req.set_metadata("routing_adapter_route", serde_json::json!(["openai-primary"]));
        assert_eq!(resolved_adapter_name(&req), Some("openai-primary"));
    }
}
