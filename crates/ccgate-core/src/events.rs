// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only event log + pub/sub fan-out backing SSE timelines (§4.6).
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::domain::{Event, EventFilter};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

struct Subscriber {
    id: u64,
    filter: EventFilter,
    tx: mpsc::Sender<Event>,
}

/// In-memory, best-effort, at-most-once-per-subscriber event bus. Delivery
/// order matches insertion order; a slow subscriber whose bounded channel is
/// full silently drops the event rather than blocking the appender (§4.6,
/// §5 shared-resource policy).
pub struct EventBus {
    log: RwLock<Vec<Event>>,
    subscribers: RwLock<Vec<Subscriber>>,
    seq: AtomicU64,
    sub_id_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
            sub_id_counter: AtomicU64::new(0),
        }
    }

    /// Appends a new event, stamping `id` and `created_at`, then notifies
    /// every matching subscriber (dropping silently on backpressure).
    pub fn append(
        &self,
        event_type: impl Into<String>,
        session_id: Option<String>,
        run_id: Option<String>,
        plan_id: Option<String>,
        todo_id: Option<String>,
        team_id: Option<String>,
        subagent_id: Option<String>,
        data: serde_json::Value,
    ) -> Event {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id: format!("evt_{}_{:x}", Utc::now().timestamp(), seq),
            event_type: event_type.into(),
            session_id,
            run_id,
            plan_id,
            todo_id,
            team_id,
            subagent_id,
            data,
            created_at: Utc::now(),
        };

        self.log.write().unwrap().push(event.clone());
        for sub in self.subscribers.read().unwrap().iter() {
            if sub.filter.matches(&event) {
                let _ = sub.tx.try_send(event.clone());
            }
        }
        event
    }

    /// Most-recent-first listing matching `filter`, up to `limit`.
    pub fn list(&self, filter: &EventFilter, limit: usize) -> Vec<Event> {
        self.log
            .read()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Subscribes to future events matching `filter`. Returns the receiving
    /// end plus a cancel handle; cancelling removes the subscriber and drains
    /// any buffered events.
    pub fn subscribe(&self, filter: EventFilter) -> (mpsc::Receiver<Event>, SubscriptionHandle) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.sub_id_counter.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().unwrap().push(Subscriber { id, filter, tx });
        (rx, SubscriptionHandle { id })
    }

    pub fn cancel(&self, handle: &SubscriptionHandle) {
        self.subscribers.write().unwrap().retain(|s| s.id != handle.id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SubscriptionHandle {
    id: u64,
}
