// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_bind_addr() -> String {
    "0.0.0.0:8080".into()
}
fn default_mcp_tools_cache_ttl_ms() -> u64 {
    30_000
}

/// On-disk gateway configuration, loaded once at startup through [`crate::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub run_log: RunLogConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    /// Directory containing the pre-built admin UI static assets, if any.
    /// Overridden by the `ADMIN_UI_DIST_DIR` environment variable.
    #[serde(default)]
    pub admin_ui_dist_dir: Option<String>,
    /// Initial contents of the mutable [`crate::Settings`] store. The running
    /// gateway may diverge from this via `PUT /admin/settings`; this field
    /// only seeds the store at boot.
    #[serde(default)]
    pub settings: SettingsData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Admin bearer token. Requests presenting this value (via `Authorization:
    /// Bearer` or `x-admin-token`) bypass per-token quota/model/subnet checks.
    /// Overridden by the `ADMIN_TOKEN` environment variable.
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_token: None,
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLogConfig {
    /// Path to the JSONL run log file. `None` disables run logging.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// JSON array of MCP server descriptors, as accepted by the registry's
    /// bootstrap step. Overridden by the `MCP_SERVERS_JSON` environment
    /// variable.
    #[serde(default)]
    pub servers_json: Option<String>,
    /// TTL for cached `tools/list` responses per server.
    /// Overridden by the `MCP_TOOLS_CACHE_TTL_MS` environment variable.
    #[serde(default = "default_mcp_tools_cache_ttl_ms")]
    pub tools_cache_ttl_ms: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers_json: None,
            tools_cache_ttl_ms: default_mcp_tools_cache_ttl_ms(),
        }
    }
}

/// Mutable routing/prompt/model policy consulted on every request (§4.2).
/// Read through the `tokio::sync::RwLock`-guarded [`crate::Settings`]
/// wrapper, never directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsData {
    /// mode → system prompt prefix, prepended ahead of the caller's system
    /// message.
    #[serde(default)]
    pub prompt_prefixes: HashMap<String, String>,
    /// mode → route name, copied into `routing_adapter_route` metadata.
    #[serde(default)]
    pub mode_routes: HashMap<String, String>,
    /// mode → forced model, applied before the client's requested model
    /// when present.
    #[serde(default)]
    pub mode_model_overrides: HashMap<String, String>,
    /// requested model → mapped model, applied after mode resolution and
    /// before the external `ModelMapper`.
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Ordered glob hints used by `ResolveVisionSupport` when no route or
    /// metadata capability is available. First match wins.
    #[serde(default)]
    pub vision_support: Vec<VisionHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionHint {
    /// Glob pattern matched against the resolved model name (`*` wildcard).
    pub model_glob: String,
    pub supports_vision: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
