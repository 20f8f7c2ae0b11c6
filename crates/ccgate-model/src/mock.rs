// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::orchestrator::Orchestrator;
use crate::types::{
    ContentBlock, Request, Response, StopReason, StreamEvent, StreamEventKind, Usage,
};

/// A single scripted turn: either a plain text reply or a tool-call
/// followed by a text reply, mirroring the shapes a real provider would
/// send across two separate `complete` calls in a tool loop.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Text(String),
    ToolCall { name: String, input: serde_json::Value },
}

/// Test double for [`Orchestrator`]: replays a fixed queue of responses
/// regardless of what was asked, recording the last request it saw so
/// tests can assert on what the policy pipeline / tool loop sent upstream.
pub struct MockOrchestrator {
    script: Mutex<Vec<ScriptedTurn>>,
    last_request: Mutex<Option<Request>>,
}

impl MockOrchestrator {
    pub fn new(script: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(script),
            last_request: Mutex::new(None),
        }
    }

    pub fn always_text(text: impl Into<String>) -> Self {
        Self::new(vec![ScriptedTurn::Text(text.into())])
    }

    pub fn tool_then_text(
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            ScriptedTurn::ToolCall { name: tool_name.into(), input: tool_input },
            ScriptedTurn::Text(final_text.into()),
        ])
    }

    pub fn last_request(&self) -> Option<Request> {
        self.last_request.lock().unwrap().clone()
    }

    fn next_turn(&self) -> ScriptedTurn {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            ScriptedTurn::Text(String::new())
        } else {
            script.remove(0)
        }
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn complete(&self, req: Request) -> Result<Response, GatewayError> {
        let model = req.model.clone();
        *self.last_request.lock().unwrap() = Some(req);

        let usage = Usage { input_tokens: 10, output_tokens: 5 };
        match self.next_turn() {
            ScriptedTurn::Text(text) => Ok(Response {
                model,
                blocks: vec![ContentBlock::text(text)],
                stop_reason: StopReason::EndTurn,
                usage,
            }),
            ScriptedTurn::ToolCall { name, input } => Ok(Response {
                model,
                blocks: vec![ContentBlock::tool_use("toolu_mock_1", name, input)],
                stop_reason: StopReason::ToolUse,
                usage,
            }),
        }
    }

    async fn stream(
        &self,
        req: Request,
    ) -> Result<(mpsc::Receiver<StreamEvent>, mpsc::Receiver<GatewayError>), GatewayError> {
        let response = self.complete(req).await?;
        let (tx, rx) = mpsc::channel(16);
        let (_err_tx, err_rx) = mpsc::channel(1);

        tx.send(StreamEvent::synthesized(StreamEventKind::MessageStart, 0))
            .await
            .ok();
        for (i, block) in response.blocks.iter().enumerate() {
            tx.send(StreamEvent {
                block: Some(block.clone()),
                ..StreamEvent::synthesized(StreamEventKind::ContentBlockStart, i as u32)
            })
            .await
            .ok();
            if let ContentBlock::Text { text } = block {
                tx.send(StreamEvent::text_delta(i as u32, text.clone())).await.ok();
            }
            tx.send(StreamEvent::synthesized(StreamEventKind::ContentBlockStop, i as u32))
                .await
                .ok();
        }
        tx.send(StreamEvent {
            stop_reason: Some(response.stop_reason),
            usage: Some(response.usage),
            ..StreamEvent::synthesized(StreamEventKind::MessageDelta, 0)
        })
        .await
        .ok();
        tx.send(StreamEvent::synthesized(StreamEventKind::MessageStop, 0))
            .await
            .ok();

        Ok((rx, err_rx))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_text_replays_same_text_every_call() {
        let orch = MockOrchestrator::always_text("hello");
        let req = Request { model: "m".into(), ..Default::default() };
        let r1 = orch.complete(req.clone()).await.unwrap();
        let r2 = orch.complete(req).await.unwrap();
        assert_eq!(r1.text_content(), "hello");
        assert_eq!(r2.text_content(), "hello");
    }

    #[tokio::test]
    async fn tool_then_text_emits_tool_use_first() {
        let orch = MockOrchestrator::tool_then_text("get_weather", serde_json::json!({"city": "SF"}), "It's 72F.");
        let req = Request { model: "m".into(), ..Default::default() };
        let first = orch.complete(req.clone()).await.unwrap();
        assert_eq!(first.stop_reason, StopReason::ToolUse);
        assert_eq!(first.tool_uses()[0].1, "get_weather");

        let second = orch.complete(req).await.unwrap();
        assert_eq!(second.stop_reason, StopReason::EndTurn);
        assert_eq!(second.text_content(), "It's 72F.");
    }

    #[tokio::test]
    async fn last_request_captures_most_recent_call() {
        let orch = MockOrchestrator::always_text("ok");
        orch.complete(Request { model: "remembered-model".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(orch.last_request().unwrap().model, "remembered-model");
    }

    #[tokio::test]
    async fn stream_emits_message_start_and_stop() {
        let orch = MockOrchestrator::always_text("hi");
        let (mut rx, _err_rx) = orch
            .stream(Request { model: "m".into(), ..Default::default() })
            .await
            .unwrap();
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(ev.kind);
        }
        assert_eq!(kinds.first(), Some(&StreamEventKind::MessageStart));
        assert_eq!(kinds.last(), Some(&StreamEventKind::MessageStop));
    }

    #[tokio::test]
    async fn exhausted_script_returns_empty_text() {
        let orch = MockOrchestrator::new(vec![]);
        let resp = orch
            .complete(Request { model: "m".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(resp.text_content(), "");
    }
}
