// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::types::{Request, Response, StreamEvent};

/// Adapter capability snapshot an orchestrator can report for a resolved
/// route (§6 `GetUpstreamConfig`): whether the bound adapter supports tool
/// use and vision input, plus a free-form `kind`/`model_hint` for admin
/// display.
#[derive(Debug, Clone, Default)]
pub struct UpstreamAdminConfig {
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub kind: String,
    pub model_hint: String,
}

/// External collaborator contract (§6): the thing that actually talks to an
/// upstream LLM provider. The gateway ships no concrete implementation —
/// callers plug in their own `Orchestrator` (a process-local adapter, a
/// sidecar RPC client, or in tests, [`crate::mock::MockOrchestrator`]).
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn complete(&self, req: Request) -> Result<Response, GatewayError>;

    /// Streams a response. The returned channel yields canonical
    /// [`StreamEvent`]s; a `Err` sent on `err_rx` terminates the stream.
    /// Implementations should close `event_tx` (drop the sender) once the
    /// terminal `message_stop` event has been sent.
    async fn stream(
        &self,
        req: Request,
    ) -> Result<(mpsc::Receiver<StreamEvent>, mpsc::Receiver<GatewayError>), GatewayError>;

    /// Best-effort upstream identity, surfaced in admin/debug endpoints.
    fn name(&self) -> &str {
        "orchestrator"
    }

    /// Declared capabilities of the adapter bound to `adapter_name`, when the
    /// orchestrator tracks per-adapter config. `None` means "unknown" —
    /// callers fall back to settings hints and heuristics (§4.4).
    fn get_upstream_config(&self, _adapter_name: &str) -> Option<UpstreamAdminConfig> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockOrchestrator;
    use crate::types::Usage;

    #[tokio::test]
    async fn trait_object_is_usable_through_dyn_dispatch() {
        let orch: Box<dyn Orchestrator> = Box::new(MockOrchestrator::always_text("hi"));
        let resp = orch
            .complete(Request {
                model: "mock".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.text_content(), "hi");
        assert_eq!(resp.usage, Usage::default());
    }

    #[test]
    fn default_get_upstream_config_is_unknown() {
        let orch = MockOrchestrator::always_text("hi");
        assert!(orch.get_upstream_config("any-adapter").is_none());
    }
}
