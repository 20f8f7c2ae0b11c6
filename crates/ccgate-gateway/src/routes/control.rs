// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A scoped-down slice of the `/v1/cc/*` and `/admin/*` control surface
//! (§6): event listing/streaming, MCP server CRUD, token CRUD, and settings
//! get/put. The full endpoint table also covers sessions, runs, todos,
//! plans, teams, subagents, plugins, marketplace, scheduler, probe, cost,
//! bootstrap and intelligent-dispatch — left out here as a deliberate size
//! reduction (tracked in DESIGN.md), since each of those is a thin CRUD
//! shell over a [`ccgate_core::Store`] this crate already demonstrates with
//! events/tokens/MCP servers.
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ccgate_core::domain::{EventFilter, Token, TokenStatus};
use ccgate_mcp::McpServerSpec;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

use crate::state::AppState;

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"type": "error", "error": {"message": message.into()}}))).into_response()
}

// ── Events ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

impl From<EventsQuery> for EventFilter {
    fn from(q: EventsQuery) -> Self {
        EventFilter { event_type: q.event_type, session_id: q.session_id, run_id: q.run_id, ..Default::default() }
    }
}

pub async fn list_events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> Json<Value> {
    let limit = q.limit.unwrap_or(100);
    let filter: EventFilter = q.into();
    Json(json!({"events": state.events.list(&filter, limit)}))
}

pub async fn stream_events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let filter: EventFilter = q.into();
    let (rx, _handle) = state.events.subscribe(filter);
    let stream = ReceiverStream::new(rx).map(|e| Ok(SseEvent::default().event(e.event_type.clone()).json_data(e).unwrap_or_else(|_| SseEvent::default())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── MCP servers ───────────────────────────────────────────────────────────

pub async fn list_mcp_servers(State(state): State<AppState>, Query(q): Query<ProjectQuery>) -> Json<Value> {
    Json(json!({"servers": state.mcp.list(q.project_id.as_deref())}))
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectQuery {
    pub project_id: Option<String>,
}

pub async fn register_mcp_server(State(state): State<AppState>, Json(spec): Json<McpServerSpec>) -> Response {
    match state.mcp.register(spec).await {
        Ok(id) => Json(json!({"id": id})).into_response(),
        Err(e) => error_json(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

pub async fn update_mcp_server(State(state): State<AppState>, Path(id): Path<String>, Json(spec): Json<McpServerSpec>) -> Response {
    match state.mcp.update(&id, spec).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => error_json(StatusCode::NOT_FOUND, e.to_string()),
    }
}

pub async fn delete_mcp_server(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    Json(json!({"deleted": state.mcp.delete(&id).await}))
}

// ── Tokens ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    #[serde(default)]
    pub quota: u64,
    #[serde(default)]
    pub unlimited_quota: bool,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub group: Option<String>,
}

pub async fn list_tokens(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"tokens": state.stores.tokens.list(None, |_| true)}))
}

pub async fn create_token(State(state): State<AppState>, Json(req): Json<CreateTokenRequest>) -> Json<Value> {
    let id = state.stores.tokens.next_id();
    let value = format!("cct_{}", uuid::Uuid::new_v4().simple());
    let token = Token {
        id: id.clone(),
        value: value.clone(),
        user_id: None,
        name: req.name,
        status: TokenStatus::Enabled,
        quota: req.quota,
        unlimited_quota: req.unlimited_quota,
        used: 0,
        models: req.models,
        subnet: vec![],
        group: req.group,
        expired_at: None,
    };
    state.stores.tokens.create(id.clone(), token);
    Json(json!({"id": id, "value": value}))
}

pub async fn revoke_token(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.stores.tokens.update(&id, |t| t.status = TokenStatus::Disabled) {
        Json(json!({"ok": true})).into_response()
    } else {
        error_json(StatusCode::NOT_FOUND, "token not found")
    }
}

// ── Settings ──────────────────────────────────────────────────────────────

pub async fn get_settings(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.settings.get().await).unwrap_or_default())
}

pub async fn put_settings(State(state): State<AppState>, Json(data): Json<ccgate_config::SettingsData>) -> Json<Value> {
    state.settings.put(data).await;
    Json(json!({"ok": true}))
}
