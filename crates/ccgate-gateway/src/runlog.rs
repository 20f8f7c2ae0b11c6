// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSONL run log (§6 "Run log"): one line per request, appended under a
//! mutex so concurrent requests never interleave writes.
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub path: String,
    pub mode: String,
    pub client_model: String,
    pub requested_model: String,
    pub upstream_model: String,
    pub stream: bool,
    pub tool_count: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_text: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_diagnostics: Option<DecodeDiagnostics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecodeDiagnostics {
    pub reason: String,
    #[serde(default)]
    pub unsupported_fields: Vec<String>,
    pub request_body: String,
    pub curl_command: String,
}

pub struct RunLogger {
    path: Option<String>,
    file: Mutex<Option<std::fs::File>>,
}

impl RunLogger {
    pub fn new(path: Option<String>) -> Self {
        let file = path.as_ref().and_then(|p| OpenOptions::new().create(true).append(true).open(p).ok());
        Self { path, file: Mutex::new(file) }
    }

    pub fn append(&self, entry: &RunLogEntry) {
        if self.path.is_none() {
            return;
        }
        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize run log entry");
                return;
            }
        };
        let mut guard = self.file.lock().unwrap();
        if let Some(f) = guard.as_mut() {
            if let Err(e) = writeln!(f, "{line}") {
                warn!(error = %e, "failed to append run log entry");
            }
        }
    }
}

/// Builds a redacted `curl` repro command for a failed decode, replacing any
/// bearer token with a placeholder.
pub fn redacted_curl(path: &str, body: &str) -> String {
    format!("curl -sS -X POST -H 'authorization: Bearer <redacted>' -H 'content-type: application/json' -d '{body}' 'http://localhost{path}'")
}
