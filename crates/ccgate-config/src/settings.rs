// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tokio::sync::RwLock;

use crate::glob::glob_match;
use crate::schema::SettingsData;

/// Single-writer-many-reader store for the mutable routing/prompt/model
/// policy consulted by the policy pipeline (§4.2). Seeded at boot from
/// [`crate::Config::settings`] and mutated at runtime via `PUT
/// /admin/settings`.
pub struct Settings {
    inner: RwLock<SettingsData>,
}

impl Settings {
    pub fn new(data: SettingsData) -> Self {
        Self {
            inner: RwLock::new(data),
        }
    }

    /// Returns a clone of the full settings snapshot (backs `GET
    /// /admin/settings`).
    pub async fn get(&self) -> SettingsData {
        self.inner.read().await.clone()
    }

    /// Replaces the full settings snapshot (backs `PUT /admin/settings`).
    pub async fn put(&self, data: SettingsData) {
        *self.inner.write().await = data;
    }

    /// Resolves the model to request upstream for `mode`, given the model
    /// the caller asked for. A configured `mode_model_overrides` entry wins
    /// over the caller's choice.
    pub async fn resolve_model(&self, mode: &str, client_model: &str) -> String {
        let data = self.inner.read().await;
        data.mode_model_overrides
            .get(mode)
            .cloned()
            .unwrap_or_else(|| client_model.to_string())
    }

    /// Applies the configured model-rewrite table, or returns `model`
    /// unchanged when no mapping exists.
    pub async fn resolve_model_mapping(&self, model: &str) -> String {
        let data = self.inner.read().await;
        data.model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }

    pub async fn prompt_prefix(&self, mode: &str) -> Option<String> {
        self.inner.read().await.prompt_prefixes.get(mode).cloned()
    }

    pub async fn mode_route(&self, mode: &str) -> Option<String> {
        self.inner.read().await.mode_routes.get(mode).cloned()
    }

    /// Looks up a vision-support hint for `model` by testing configured
    /// globs in order; the first match wins. Returns `None` when nothing
    /// matches, leaving the caller to fall through to its own heuristic.
    pub async fn resolve_vision_support(&self, model: &str) -> Option<bool> {
        let data = self.inner.read().await;
        data.vision_support
            .iter()
            .find(|hint| glob_match(&hint.model_glob, model))
            .map(|hint| hint.supports_vision)
    }
}
