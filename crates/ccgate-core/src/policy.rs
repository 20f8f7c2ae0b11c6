// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The 16-stage request policy pipeline (§4.2). Stages 1-2 (method/header
//! checks, JSON decode) live at the HTTP edge; stage 14 (dispatch) and the
//! streaming/non-streaming split live in the gateway. Everything in between
//! — validation through quota reservation, plus settlement and run
//! completion once dispatch finishes — is implemented here.
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ccgate_config::Settings;
use ccgate_model::error::GatewayError;
use ccgate_model::Request;

use crate::channel::ChannelStore;
use crate::domain::{Run, Token};
use crate::events::EventBus;
use crate::store::Store;

/// External collaborator contract `Policy.Authorize` (§6): decides whether
/// the resolved `(path, model, mode, tool_names)` action is permitted.
#[async_trait]
pub trait PolicyAuthorizer: Send + Sync {
    async fn authorize(&self, path: &str, model: &str, mode: &str, tool_names: &[String]) -> Result<(), GatewayError>;
}

/// Default authorizer used when no admin policy engine is configured:
/// permits everything. Real deployments inject a stricter implementation.
pub struct AllowAllAuthorizer;

#[async_trait]
impl PolicyAuthorizer for AllowAllAuthorizer {
    async fn authorize(&self, _path: &str, _model: &str, _mode: &str, _tool_names: &[String]) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// External collaborator contract `ModelMapper.Resolve` (§6): the final
/// rewrite applied after `Settings.ResolveModelMapping`.
#[async_trait]
pub trait ModelMapper: Send + Sync {
    async fn resolve(&self, model: &str) -> Result<String, GatewayError>;
}

pub struct IdentityModelMapper;

#[async_trait]
impl ModelMapper for IdentityModelMapper {
    async fn resolve(&self, model: &str) -> Result<String, GatewayError> {
        Ok(model.to_string())
    }
}

/// Output of [`PolicyPipeline::prepare`]: the request ready for capability
/// fallbacks and dispatch, plus the bookkeeping needed to settle quota and
/// close out the run afterward.
pub struct PreparedRequest {
    pub request: Request,
    pub run_id: String,
    pub reserved: u64,
    pub headers: Vec<(String, String)>,
}

fn validate_schema(req: &Request) -> Result<(), GatewayError> {
    if req.model.trim().is_empty() {
        return Err(GatewayError::invalid_request("model must not be empty"));
    }
    if req.max_tokens == 0 {
        return Err(GatewayError::invalid_request("max_tokens must be greater than zero"));
    }
    if req.messages.is_empty() {
        return Err(GatewayError::invalid_request("at least one message is required"));
    }
    for tool in &req.tools {
        if tool.name.trim().is_empty() {
            return Err(GatewayError::invalid_request("every tool requires a name"));
        }
    }
    Ok(())
}

pub struct PolicyPipeline {
    settings: Arc<Settings>,
    channels: Arc<ChannelStore>,
    runs: Arc<Store<Run>>,
    events: Arc<EventBus>,
    authorizer: Arc<dyn PolicyAuthorizer>,
    model_mapper: Arc<dyn ModelMapper>,
}

impl PolicyPipeline {
    pub fn new(
        settings: Arc<Settings>,
        channels: Arc<ChannelStore>,
        runs: Arc<Store<Run>>,
        events: Arc<EventBus>,
        authorizer: Arc<dyn PolicyAuthorizer>,
        model_mapper: Arc<dyn ModelMapper>,
    ) -> Self {
        Self { settings, channels, runs, events, authorizer, model_mapper }
    }

    /// Runs stages 3 through 12 (schema validation through quota
    /// reservation). Capability fallbacks (stage 13) are applied by the
    /// caller afterward via [`crate::capability`], since they need a tool
    /// executor the pipeline itself doesn't own.
    pub async fn prepare(
        &self,
        mut req: Request,
        path: &str,
        token: &mut Token,
        client_ip: Option<IpAddr>,
    ) -> Result<PreparedRequest, GatewayError> {
        validate_schema(&req)?;

        let ip_str = client_ip.map(|ip| ip.to_string());
        if !token.is_usable_for(&req.model, ip_str.as_deref()) {
            return Err(GatewayError::Permission("token is not authorized for this model or network".into()));
        }

        let mode = req
            .headers
            .get("x-cc-mode")
            .cloned()
            .or_else(|| req.metadata_str("cc_mode").map(str::to_string))
            .unwrap_or_else(|| "chat".to_string())
            .to_lowercase();
        req.set_metadata("mode", mode.clone());

        if let Some(prefix) = self.settings.prompt_prefix(&mode).await {
            let joined = match req.system.take() {
                Some(existing) if !existing.trim().is_empty() => format!("{prefix}\n\n{existing}"),
                _ => prefix,
            };
            req.system = Some(joined);
        }

        if let Some(route) = self.settings.mode_route(&mode).await {
            req.set_metadata("routing_adapter_route", serde_json::json!([route]));
            req.set_metadata("routing_route_source", "mode");
        }

        let requested = self.settings.resolve_model(&mode, &req.model).await;
        req.set_metadata("client_model", req.model.clone());
        req.set_metadata("requested_model", requested.clone());
        let mapped_by_settings = self.settings.resolve_model_mapping(&requested).await;
        let mapped = self.model_mapper.resolve(&mapped_by_settings).await?;
        req.model = mapped.clone();
        req.set_metadata("upstream_model", mapped.clone());

        let group = token.group_or_default();
        if let Some(adapter) = self.channels.resolve(&group, &mapped) {
            req.set_metadata("routing_adapter_route", serde_json::json!([adapter]));
            req.set_metadata("routing_route_source", "channel");
        }

        let tool_names: Vec<String> = req.tools.iter().map(|t| t.name.clone()).collect();
        self.authorizer.authorize(path, &mapped, &mode, &tool_names).await?;

        let run_id = self.runs.next_id();
        let session_id = req.metadata_str("session_id").map(str::to_string);
        let mut run = Run::new(run_id.clone(), path.to_string(), mode.clone(), requested.clone());
        run.session_id = session_id.clone();
        run.requested_model = requested.clone();
        run.upstream_model = mapped.clone();
        run.tool_count = req.tools.len() as u32;
        self.runs.create(run_id.clone(), run);
        self.events.append(
            "run.created",
            session_id,
            Some(run_id.clone()),
            None,
            None,
            None,
            None,
            serde_json::json!({"path": path, "mode": mode, "requested_model": requested, "upstream_model": mapped}),
        );

        let headers = vec![
            ("request-id".to_string(), run_id.clone()),
            ("x-cc-run-id".to_string(), run_id.clone()),
            ("x-cc-mode".to_string(), mode.clone()),
            ("x-cc-client-model".to_string(), req.metadata_str("client_model").unwrap_or_default().to_string()),
            ("x-cc-requested-model".to_string(), requested.clone()),
            ("x-cc-upstream-model".to_string(), mapped.clone()),
        ];

        let reserved = req.approx_total_tokens() as u64;
        if !token.unlimited_quota {
            if token.used.saturating_add(reserved) > token.quota {
                self.runs.update(&run_id, |r| {
                    r.complete(403, Some("quota exceeded".into()));
                });
                return Err(GatewayError::Quota("insufficient quota for this request".into()));
            }
            token.used += reserved;
        }

        Ok(PreparedRequest { request: req, run_id, reserved, headers })
    }

    /// Stage 15: adjusts the token's usage from the stage-12 estimate to
    /// the actual token count once a call completes successfully.
    pub fn settle(&self, token: &mut Token, reserved: u64, actual_input: u32, actual_output: u32) {
        if token.unlimited_quota {
            return;
        }
        let actual = (actual_input as u64 + actual_output as u64).max(1);
        if actual > reserved {
            token.used = token.used.saturating_add(actual - reserved);
        } else if actual < reserved {
            token.used = token.used.saturating_sub(reserved - actual);
        }
    }

    /// Refunds the full reservation when dispatch never happened (error
    /// before stage 14).
    pub fn refund(&self, token: &mut Token, reserved: u64) {
        if !token.unlimited_quota {
            token.used = token.used.saturating_sub(reserved);
        }
    }

    /// Stage 16: terminal transition plus `run.completed`/`run.failed`.
    pub fn complete_run(&self, run_id: &str, status_code: u16, error: Option<String>, record_text: Option<String>) {
        self.runs.update(run_id, |r| {
            r.complete(status_code, error.clone());
        });
        let event_type = if status_code < 400 { "run.completed" } else { "run.failed" };
        self.events.append(
            event_type,
            None,
            Some(run_id.to_string()),
            None,
            None,
            None,
            None,
            serde_json::json!({"status_code": status_code, "error": error, "record_text": record_text}),
        );
    }
}
