// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Cross-cutting catalog and mock-orchestrator invariants that don't fit
//! naturally in either module's own unit tests — every catalog entry must
//! round-trip through JSON (the `/v1/messages` wire response carries it
//! verbatim) and the mock orchestrator must stay usable as a stand-in for
//! every dialect's `complete` call shape.
use ccgate_model::catalog;
use ccgate_model::mock::MockOrchestrator;
use ccgate_model::{Orchestrator, Request};

#[test]
fn every_catalog_entry_has_nonempty_id_and_provider() {
    for entry in catalog::all() {
        assert!(!entry.id.is_empty(), "catalog entry missing id");
        assert!(!entry.provider.is_empty(), "catalog entry {} missing provider", entry.id);
        assert!(entry.context_window > 0, "{} must have a positive context window", entry.id);
    }
}

#[test]
fn every_catalog_entry_round_trips_through_json() {
    for entry in catalog::all() {
        let json = serde_json::to_string(entry).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["id"], entry.id);
    }
}

#[test]
fn catalog_lookup_agrees_with_all_listing() {
    for entry in catalog::all() {
        let found = catalog::lookup(&entry.id).expect("lookup should find every cataloged id");
        assert_eq!(found.id, entry.id);
    }
}

#[tokio::test]
async fn mock_orchestrator_is_usable_as_a_trait_object() {
    let orch: Box<dyn Orchestrator> = Box::new(MockOrchestrator::always_text("hi"));
    let resp = orch
        .complete(Request { model: "claude-opus-4-5".into(), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(resp.text_content(), "hi");
    assert_eq!(orch.name(), "mock");
}
