// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/ccgate/config.yaml"));
    paths.push(PathBuf::from("/etc/ccgate/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/ccgate/config.yaml"));
        paths.push(home.join(".config/ccgate/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("ccgate/config.yaml"));
        paths.push(cfg.join("ccgate/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".ccgate/config.yaml"));
    paths.push(PathBuf::from(".ccgate/config.yml"));
    paths.push(PathBuf::from(".ccgate.yaml"));
    paths.push(PathBuf::from(".ccgate.yml"));
    paths.push(PathBuf::from("ccgate.yaml"));
    paths.push(PathBuf::from("ccgate.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then applying
/// environment-variable overrides (§6 "Config sources").
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    // Deserialize the merged YAML value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Environment variables take precedence over every on-disk layer, matching
/// the teacher's pattern of env-as-final-override for secrets and
/// deployment-specific paths.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("ADMIN_TOKEN") {
        config.server.admin_token = Some(v);
    }
    if let Ok(v) = std::env::var("MCP_SERVERS_JSON") {
        config.mcp.servers_json = Some(v);
    }
    if let Ok(v) = std::env::var("MCP_TOOLS_CACHE_TTL_MS") {
        if let Ok(ms) = v.parse() {
            config.mcp.tools_cache_ttl_ms = ms;
        }
    }
    if let Ok(v) = std::env::var("ADMIN_UI_DIST_DIR") {
        config.admin_ui_dist_dir = Some(v);
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
