// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared application state threaded through every axum handler.
use std::sync::Arc;

use ccgate_config::{Config, Settings};
use ccgate_core::{ChannelStore, EventBus, PolicyPipeline, Stores, ToolExecutor};
use ccgate_mcp::McpRegistry;
use ccgate_model::mock::MockOrchestrator;
use ccgate_model::Orchestrator;
use ccgate_tools::{EchoTool, ImageRecognitionTool, ToolRegistry};

use crate::auth::RateLimitState;
use crate::mcp_fanout::McpFanoutAdapter;
use crate::runlog::RunLogger;

/// Everything an axum handler needs, cloned cheaply per request (every field
/// is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Arc<Stores>,
    pub events: Arc<EventBus>,
    pub channels: Arc<ChannelStore>,
    pub settings: Arc<Settings>,
    pub policy: Arc<PolicyPipeline>,
    pub mcp: Arc<McpRegistry>,
    pub executor: Arc<ToolExecutor>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub run_log: Arc<RunLogger>,
    pub rate_limit: Arc<RateLimitState>,
}

impl AppState {
    /// Builds default wiring for local/dev use: an in-memory event bus, fresh
    /// stores, allow-all policy, and a [`MockOrchestrator`] standing in for a
    /// real upstream adapter until one is configured.
    pub fn new(config: Config) -> Self {
        let stores = Arc::new(Stores::new());
        let events = Arc::new(EventBus::new());
        let channels = Arc::new(ChannelStore::new());
        let settings = Arc::new(Settings::new(config.settings.clone()));
        let policy = Arc::new(PolicyPipeline::new(
            settings.clone(),
            channels.clone(),
            stores.runs.clone(),
            events.clone(),
            Arc::new(ccgate_core::AllowAllAuthorizer),
            Arc::new(ccgate_core::IdentityModelMapper),
        ));
        let mcp = Arc::new(McpRegistry::new(config.mcp.tools_cache_ttl_ms));
        let run_log = Arc::new(RunLogger::new(config.run_log.path.clone()));

        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(ImageRecognitionTool);
        let fanout = McpFanoutAdapter::new(mcp.clone(), None);
        let executor = Arc::new(ToolExecutor::new(Arc::new(registry), Some(Arc::new(fanout))));

        Self {
            config: Arc::new(config),
            stores,
            events,
            channels,
            settings,
            policy,
            mcp,
            executor,
            orchestrator: Arc::new(MockOrchestrator::always_text("no upstream adapter configured")),
            run_log,
            rate_limit: Arc::new(RateLimitState::default()),
        }
    }
}
