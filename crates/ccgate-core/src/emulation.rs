// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Emulated tool-call extraction from model text (§4.3): JSON, ReAct, and
//! hybrid parsing, plus a small JSON-repair chain and a malformed-tool-call
//! sentinel scan used when parsing comes up empty.
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationMode {
    Native,
    Json,
    React,
    Hybrid,
}

impl EmulationMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => Self::Json,
            "react" => Self::React,
            "hybrid" => Self::Hybrid,
            _ => Self::Native,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmulatedCall {
    pub name: String,
    pub input: Value,
}

/// Looks for a JSON object (bare or fenced ```json) carrying one of the
/// accepted shapes: `{tool|name|action, input|arguments|parameters|action_input}`.
pub fn parse_json_calls(text: &str) -> Vec<EmulatedCall> {
    let mut candidates = Vec::new();

    static FENCE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
    for cap in fence.captures_iter(text) {
        candidates.push(cap[1].to_string());
    }

    for raw in extract_brace_balanced_objects(text) {
        candidates.push(raw);
    }

    let mut calls = Vec::new();
    for candidate in candidates {
        let repaired = repair_json(&candidate);
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            if let Some(call) = call_from_json_value(&value) {
                calls.push(call);
            }
        }
    }
    calls
}

fn call_from_json_value(value: &Value) -> Option<EmulatedCall> {
    let name = value
        .get("tool")
        .or_else(|| value.get("name"))
        .or_else(|| value.get("action"))
        .and_then(Value::as_str)
        .or_else(|| value.get("function").and_then(|f| f.get("name")).and_then(Value::as_str))?;

    let input = value
        .get("input")
        .or_else(|| value.get("arguments"))
        .or_else(|| value.get("parameters"))
        .or_else(|| value.get("action_input"))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    Some(EmulatedCall { name: name.to_string(), input })
}

/// Scans `text` for top-level `{...}` objects using brace-depth tracking
/// (handles nested objects the regex fence pattern would miss).
fn extract_brace_balanced_objects(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut start = None;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        out.push(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// ReAct-style `Action: <name>\nAction Input: <json>` pairs. Terminal
/// actions (`final`, `final_answer`, `answer`, `none`) are ignored.
pub fn parse_react_calls(text: &str) -> Vec<EmulatedCall> {
    static ACTION: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let action_re = ACTION.get_or_init(|| Regex::new(r"(?m)^\s*Action:\s*(\S.*)$").unwrap());

    let mut calls = Vec::new();
    for m in action_re.find_iter(text) {
        let name_line = &text[m.start()..m.end()];
        let name = name_line.trim_start_matches(|c: char| c.is_whitespace()).splitn(2, ':').nth(1).unwrap_or("").trim();
        if matches!(name.to_lowercase().as_str(), "final" | "final_answer" | "answer" | "none") {
            continue;
        }
        let after = &text[m.end()..];
        if let Some(input_pos) = after.find("Action Input:") {
            let input_start = input_pos + "Action Input:".len();
            let objects = extract_brace_balanced_objects(&after[input_start..]);
            let input = objects
                .first()
                .map(|raw| serde_json::from_str(&repair_json(raw)).unwrap_or_else(|_| serde_json::json!({"_raw": raw})))
                .unwrap_or_else(|| serde_json::json!({}));
            calls.push(EmulatedCall { name: name.to_string(), input });
        }
    }
    calls
}

pub fn parse_calls(mode: EmulationMode, text: &str) -> Vec<EmulatedCall> {
    match mode {
        EmulationMode::Native => Vec::new(),
        EmulationMode::Json => parse_json_calls(text),
        EmulationMode::React => parse_react_calls(text),
        EmulationMode::Hybrid => {
            let json = parse_json_calls(text);
            if !json.is_empty() {
                json
            } else {
                parse_react_calls(text)
            }
        }
    }
}

/// Escapes bare control characters inside string literals that would
/// otherwise make `serde_json` reject an almost-valid payload (common when a
/// model emits a literal newline inside a JSON string).
fn fix_invalid_json_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;
    for c in s.chars() {
        if in_string && !escape {
            match c {
                '\n' => {
                    out.push_str("\\n");
                    continue;
                }
                '\t' => {
                    out.push_str("\\t");
                    continue;
                }
                _ => {}
            }
        }
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

/// Balances unmatched closing/opening braces by trimming or padding, as a
/// last-resort repair before giving up and falling back to `{_raw: ...}`.
fn balance_braces(s: &str) -> String {
    let opens = s.matches('{').count();
    let closes = s.matches('}').count();
    if closes > opens {
        let mut s = s.to_string();
        for _ in 0..(closes - opens) {
            if let Some(pos) = s.rfind('}') {
                s.remove(pos);
            }
        }
        s
    } else if opens > closes {
        let mut s = s.to_string();
        for _ in 0..(opens - closes) {
            s.push('}');
        }
        s
    } else {
        s.to_string()
    }
}

pub fn repair_json(raw: &str) -> String {
    if serde_json::from_str::<Value>(raw).is_ok() {
        return raw.to_string();
    }
    let fixed = fix_invalid_json_escapes(raw);
    if serde_json::from_str::<Value>(&fixed).is_ok() {
        return fixed;
    }
    balance_braces(&fixed)
}

const MALFORMED_SENTINELS: &[&str] = &["<tool_call>", "<function=", "[TOOL_CALL]"];

/// Returns `true` when the text looks like a failed tool-call attempt the
/// parser couldn't extract — used to emit `tool.gap_detected` with reason
/// `unparseable_tool_call` instead of silently treating the turn as plain
/// text.
pub fn text_contains_malformed_tool_call(text: &str) -> bool {
    MALFORMED_SENTINELS.iter().any(|s| text.contains(s))
}
