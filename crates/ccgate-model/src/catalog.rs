// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use ccgate_config::glob_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputModality {
    Text,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub input_modalities: Vec<InputModality>,
}

impl ModelCatalogEntry {
    pub fn supports_vision(&self) -> bool {
        self.input_modalities.contains(&InputModality::Image)
    }
}

/// Static catalog of known upstream models, used by capability fallback
/// (§4.4) when no `settings.vision_support` override matches. Kept as a
/// small hardcoded table rather than a bundled data file, since the set of
/// models a gateway deployment cares about changes far less often than the
/// gateway itself is redeployed.
fn builtin_catalog() -> &'static [ModelCatalogEntry] {
    use InputModality::{Image, Text};
    static CATALOG: std::sync::OnceLock<Vec<ModelCatalogEntry>> = std::sync::OnceLock::new();
    CATALOG.get_or_init(|| {
        vec![
            ModelCatalogEntry {
                id: "claude-opus-4-5".into(),
                name: "Claude Opus 4.5".into(),
                provider: "anthropic".into(),
                context_window: 200_000,
                max_output_tokens: 32_000,
                input_modalities: vec![Text, Image],
            },
            ModelCatalogEntry {
                id: "claude-sonnet-4-5".into(),
                name: "Claude Sonnet 4.5".into(),
                provider: "anthropic".into(),
                context_window: 200_000,
                max_output_tokens: 16_000,
                input_modalities: vec![Text, Image],
            },
            ModelCatalogEntry {
                id: "claude-haiku-4-5".into(),
                name: "Claude Haiku 4.5".into(),
                provider: "anthropic".into(),
                context_window: 200_000,
                max_output_tokens: 8_192,
                input_modalities: vec![Text, Image],
            },
            ModelCatalogEntry {
                id: "gpt-4o".into(),
                name: "GPT-4o".into(),
                provider: "openai".into(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                input_modalities: vec![Text, Image],
            },
            ModelCatalogEntry {
                id: "gpt-4o-mini".into(),
                name: "GPT-4o mini".into(),
                provider: "openai".into(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                input_modalities: vec![Text, Image],
            },
            ModelCatalogEntry {
                id: "gpt-3.5-turbo".into(),
                name: "GPT-3.5 Turbo".into(),
                provider: "openai".into(),
                context_window: 16_385,
                max_output_tokens: 4_096,
                input_modalities: vec![Text],
            },
            ModelCatalogEntry {
                id: "o1".into(),
                name: "OpenAI o1".into(),
                provider: "openai".into(),
                context_window: 200_000,
                max_output_tokens: 100_000,
                input_modalities: vec![Text, Image],
            },
        ]
    })
}

pub fn lookup(model_id: &str) -> Option<&'static ModelCatalogEntry> {
    builtin_catalog().iter().find(|e| e.id == model_id)
}

/// Heuristic vision-support lookup, used as the last fallback after
/// `Settings::resolve_vision_support` returns `None`: exact catalog match
/// first, then a glob match against catalog ids, defaulting to `true` for
/// entirely unknown models (optimistic — an unsupported model will simply
/// ignore the image content rather than fail the request).
pub fn supports_vision(model_id: &str) -> bool {
    if let Some(entry) = lookup(model_id) {
        return entry.supports_vision();
    }
    builtin_catalog()
        .iter()
        .find(|e| glob_match(&format!("{}*", e.id), model_id))
        .map(ModelCatalogEntry::supports_vision)
        .unwrap_or(true)
}

pub fn all() -> &'static [ModelCatalogEntry] {
    builtin_catalog()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_model() {
        let entry = lookup("gpt-4o").expect("gpt-4o should be cataloged");
        assert_eq!(entry.provider, "openai");
    }

    #[test]
    fn lookup_returns_none_for_unknown_model() {
        assert!(lookup("totally-unknown-model").is_none());
    }

    #[test]
    fn supports_vision_true_for_vision_model() {
        assert!(supports_vision("gpt-4o"));
    }

    #[test]
    fn supports_vision_false_for_text_only_model() {
        assert!(!supports_vision("gpt-3.5-turbo"));
    }

    #[test]
    fn supports_vision_defaults_true_for_unknown_model() {
        assert!(supports_vision("some-brand-new-model"));
    }

    #[test]
    fn all_returns_non_empty_catalog() {
        assert!(!all().is_empty());
    }
}
