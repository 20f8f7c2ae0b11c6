// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Everything that sits between the dialect translators in `ccgate-model`
//! and the HTTP edge in `ccgate-gateway`: the policy pipeline, capability
//! fallbacks, the server-side tool loop, the in-memory entity stores, and
//! the event bus that backs SSE timelines.
pub mod capability;
pub mod channel;
pub mod domain;
pub mod emulation;
pub mod events;
pub mod executor;
pub mod policy;
pub mod store;
pub mod tool_loop;

pub use capability::{apply_tool_support_fallback, apply_vision_fallback, resolve_vision_support, RouteCapabilities};
pub use channel::ChannelStore;
pub use domain::{Event, EventFilter, Plan, PlanStatus, PlanStep, Plugin, Run, RunStatus, Subagent, Team, Todo, TodoStatus, Token, TokenStatus};
pub use emulation::{EmulatedCall, EmulationMode};
pub use events::{EventBus, SubscriptionHandle};
pub use executor::{McpFanout, ToolExecutor};
pub use policy::{AllowAllAuthorizer, IdentityModelMapper, ModelMapper, PolicyAuthorizer, PolicyPipeline, PreparedRequest};
pub use store::Store;

/// The seven named in-memory stores of §4.9, bundled for convenient
/// construction at gateway startup. Each is independently `Arc`-shareable;
/// this struct exists only to avoid repeating the seven `Store::new(...)`
/// calls at every call site.
pub struct Stores {
    pub runs: std::sync::Arc<Store<Run>>,
    pub todos: std::sync::Arc<Store<Todo>>,
    pub plans: std::sync::Arc<Store<Plan>>,
    pub sessions: std::sync::Arc<Store<serde_json::Value>>,
    pub teams: std::sync::Arc<Store<Team>>,
    pub subagents: std::sync::Arc<Store<Subagent>>,
    pub plugins: std::sync::Arc<Store<Plugin>>,
    pub tokens: std::sync::Arc<Store<Token>>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            runs: std::sync::Arc::new(Store::new("run")),
            todos: std::sync::Arc::new(Store::new("todo")),
            plans: std::sync::Arc::new(Store::new("plan")),
            sessions: std::sync::Arc::new(Store::new("session")),
            teams: std::sync::Arc::new(Store::new("team")),
            subagents: std::sync::Arc::new(Store::new("subagent")),
            plugins: std::sync::Arc::new(Store::new("plugin")),
            tokens: std::sync::Arc::new(Store::new("token")),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_bundle_constructs_seven_independent_stores() {
        let stores = Stores::new();
        assert_eq!(stores.runs.len(), 0);
        assert_eq!(stores.plugins.len(), 0);
    }
}
