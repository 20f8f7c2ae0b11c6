// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Capability fallbacks (§4.4): vision fallback and tool-support fallback.
use std::collections::BTreeSet;

use ccgate_config::Settings;
use ccgate_model::{ContentBlock, Message, Request};
use ccgate_tools::ToolCall;

use crate::events::EventBus;
use crate::executor::ToolExecutor;

/// Capability flags the resolved route's adapters declare, as surfaced by
/// `Orchestrator::GetUpstreamConfig` (§6 external collaborator contract).
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteCapabilities {
    pub supports_vision: bool,
    pub supports_tools: bool,
}

fn heuristic_supports_vision(model: &str) -> bool {
    !(ccgate_config::glob_match("gpt-3.5*", model)
        || ccgate_config::glob_match("claude-2*", model)
        || ccgate_config::glob_match("claude-instant*", model)
        || ccgate_config::glob_match("text-*", model)
        || ccgate_config::glob_match("deepseek-chat*", model)
        || ccgate_config::glob_match("deepseek-coder*", model))
}

/// Resolves vision support through the fallback chain: explicit metadata
/// override, then `upstream_supports_vision` metadata, then route
/// capability, then settings hints, then heuristic (§4.4).
pub async fn resolve_vision_support(req: &Request, route: &RouteCapabilities, settings: &Settings) -> bool {
    match req.metadata_str("vision_fallback_mode") {
        Some("off") => return true,
        Some("force") => return false,
        _ => {}
    }
    if let Some(v) = req.metadata_bool("upstream_supports_vision") {
        return v;
    }
    if route.supports_vision {
        return true;
    }
    if let Some(v) = settings.resolve_vision_support(&req.model).await {
        return v;
    }
    heuristic_supports_vision(&req.model)
}

fn image_urls_in(message: &Message) -> Vec<String> {
    message.image_urls().into_iter().map(str::to_string).collect()
}

/// Applies the vision fallback in place: strips image blocks from every user
/// message, calling `image_recognition` once per unique URL, and appends a
/// `[Vision fallback context]` summary block. Returns `true` when the
/// fallback actually rewrote anything.
pub async fn apply_vision_fallback(
    req: &mut Request,
    route: &RouteCapabilities,
    settings: &Settings,
    executor: &ToolExecutor,
    bus: &EventBus,
) -> bool {
    if resolve_vision_support(req, route, settings).await {
        return false;
    }

    let mut urls = BTreeSet::new();
    for m in &req.messages {
        for u in image_urls_in(m) {
            urls.insert(u);
        }
    }
    if urls.is_empty() {
        return false;
    }

    let mut summaries = Vec::new();
    for (i, url) in urls.iter().enumerate() {
        let call = ToolCall { id: format!("toolu_vision_{i}"), name: "image_recognition".into(), args: serde_json::json!({"image_url": url}) };
        let out = executor.execute(&call).await;
        summaries.push(format!("{}. {}", i + 1, out.content));
    }

    for m in req.messages.iter_mut() {
        if m.image_urls().is_empty() {
            continue;
        }
        m.content.retain(|b| !matches!(b, ContentBlock::Image { .. }));
        let text = format!("[Vision fallback context]\n{}", summaries.join("\n"));
        m.content.push(ContentBlock::text(text));
    }

    bus.append(
        "vision.fallback_applied",
        req.metadata_str("session_id").map(str::to_string),
        None,
        None,
        None,
        None,
        None,
        serde_json::json!({"urls": urls.iter().take(10).collect::<Vec<_>>()}),
    );
    req.set_metadata("vision_fallback_applied", true);
    true
}

fn heuristic_supports_tools(_model: &str) -> bool {
    true
}

/// Resolves tool support the same chain as vision (§4.4 — "resolve
/// `supports_tools` the same way").
fn resolve_tool_support(req: &Request, route: &RouteCapabilities) -> bool {
    if let Some(v) = req.metadata_bool("upstream_supports_tools") {
        return v;
    }
    if route.supports_tools {
        return true;
    }
    heuristic_supports_tools(&req.model)
}

/// Applies the tool-support fallback in place. Returns `true` when it fired.
pub fn apply_tool_support_fallback(req: &mut Request, route: &RouteCapabilities, bus: &EventBus) -> bool {
    let mode = req.metadata_str("tool_loop_mode").map(str::to_string);
    if matches!(mode.as_deref(), Some("off") | Some("disabled") | Some("none")) {
        return false;
    }
    let forced = mode.as_deref() == Some("force");
    if !forced {
        let already_server_side = matches!(mode.as_deref(), Some("server") | Some("server_loop") | Some("native") | Some("json") | Some("react") | Some("hybrid"));
        if already_server_side {
            return false;
        }
    }

    let supports_tools = resolve_tool_support(req, route);
    if !forced && supports_tools {
        return false;
    }
    if req.tools.is_empty() {
        return false;
    }

    req.set_metadata("tool_loop_mode", "server_loop");
    let emulation = req.metadata_str("tool_emulation_mode").map(str::to_string);
    if matches!(emulation.as_deref(), None | Some("") | Some("native")) {
        req.set_metadata("tool_emulation_mode", "hybrid");
    }
    req.set_metadata("tool_fallback_applied", true);
    let reason = if forced { "forced" } else { "upstream_tools_unsupported" };
    req.set_metadata("tool_fallback_reason", reason);

    let mut names: Vec<&str> = req.tools.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    bus.append(
        "tool.fallback_applied",
        req.metadata_str("session_id").map(str::to_string),
        None,
        None,
        None,
        None,
        None,
        serde_json::json!({"reason": reason, "tools": names}),
    );
    true
}
