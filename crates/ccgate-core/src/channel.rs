// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Channel route resolution (§4.2 stage 9): `(group, mapped_model) ->
//! adapter name`, with the caller's group falling back to `"default"`.
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory `(group, model) -> [adapter]` table backing `/admin/channels`.
/// Only the first configured adapter for a matching key is used; additional
/// entries exist for operator-visible failover ordering, not load balancing.
pub struct ChannelStore {
    routes: RwLock<HashMap<(String, String), Vec<String>>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self { routes: RwLock::new(HashMap::new()) }
    }

    pub fn set(&self, group: impl Into<String>, model: impl Into<String>, adapters: Vec<String>) {
        self.routes.write().unwrap().insert((group.into(), model.into()), adapters);
    }

    /// Tries `group` then `"default"`, returning the first adapter of the
    /// first key that has a route. `None` when neither group routes `model`.
    pub fn resolve(&self, group: &str, model: &str) -> Option<String> {
        let routes = self.routes.read().unwrap();
        let mut candidates = vec![group.to_string()];
        if group != "default" {
            candidates.push("default".to_string());
        }
        for g in candidates {
            if let Some(adapters) = routes.get(&(g, model.to_string())) {
                if let Some(first) = adapters.first() {
                    return Some(first.clone());
                }
            }
        }
        None
    }
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exact_group_match() {
        let store = ChannelStore::new();
        store.set("pro", "gpt-4o", vec!["openai-primary".into()]);
        assert_eq!(store.resolve("pro", "gpt-4o").as_deref(), Some("openai-primary"));
    }

    #[test]
    fn falls_back_to_default_group() {
        let store = ChannelStore::new();
        store.set("default", "gpt-4o", vec!["openai-shared".into()]);
        assert_eq!(store.resolve("pro", "gpt-4o").as_deref(), Some("openai-shared"));
    }

    #[test]
    fn unknown_group_and_model_yields_none() {
        let store = ChannelStore::new();
        assert!(store.resolve("pro", "gpt-4o").is_none());
    }

    #[test]
    fn first_adapter_in_list_wins() {
        let store = ChannelStore::new();
        store.set("default", "gpt-4o", vec!["a".into(), "b".into()]);
        assert_eq!(store.resolve("default", "gpt-4o").as_deref(), Some("a"));
    }
}
