// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;

/// Generic in-memory store shared by every domain entity in §4.9 (Runs,
/// Todos, Plans, Sessions, Teams, Subagents, Plugins): a map keyed by id plus
/// an insertion-order list, guarded by one RW lock, with a monotonic counter
/// for generating ids of the shape `<kind>_<unix>_<hex-seq>`.
pub struct Store<T> {
    kind: &'static str,
    counter: AtomicU64,
    inner: RwLock<Inner<T>>,
    on_change: RwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
}

struct Inner<T> {
    by_id: std::collections::HashMap<String, T>,
    order: Vec<String>,
}

impl<T: Clone> Store<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            counter: AtomicU64::new(0),
            inner: RwLock::new(Inner { by_id: std::collections::HashMap::new(), order: Vec::new() }),
            on_change: RwLock::new(None),
        }
    }

    /// Generates a fresh id of the shape `<kind>_<unix>_<hex-seq>`.
    pub fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}_{}_{:x}", self.kind, Utc::now().timestamp(), seq)
    }

    /// Inserts `value` under `id`, appending to insertion order if new.
    pub fn create(&self, id: String, value: T) {
        let mut inner = self.inner.write().unwrap();
        if !inner.by_id.contains_key(&id) {
            inner.order.push(id.clone());
        }
        inner.by_id.insert(id, value);
        drop(inner);
        self.notify();
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.read().unwrap().by_id.get(id).cloned()
    }

    /// Applies `f` to the stored value (if present) and persists the result.
    /// Returns `false` when `id` is unknown.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut T)) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(value) = inner.by_id.get_mut(id) else { return false };
        f(value);
        drop(inner);
        self.notify();
        true
    }

    /// Most-recent-first listing, optionally limited and filtered.
    pub fn list(&self, limit: Option<usize>, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<T> = inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|v| predicate(v))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep-clones the full map + ordering (for `Snapshot`/persistence hooks).
    pub fn snapshot(&self) -> (Vec<String>, std::collections::HashMap<String, T>) {
        let inner = self.inner.read().unwrap();
        (inner.order.clone(), inner.by_id.clone())
    }

    /// Rebuilds the store from a prior snapshot. Ordering entries with no
    /// matching map entry are dropped; map entries missing from ordering are
    /// appended at the end (§4.9 Restore semantics). The id counter is left
    /// untouched so future `next_id` calls keep monotonicity.
    pub fn restore(&self, order: Vec<String>, by_id: std::collections::HashMap<String, T>) {
        let mut valid_order: Vec<String> = order.into_iter().filter(|id| by_id.contains_key(id)).collect();
        for id in by_id.keys() {
            if !valid_order.contains(id) {
                valid_order.push(id.clone());
            }
        }
        let mut inner = self.inner.write().unwrap();
        inner.order = valid_order;
        inner.by_id = by_id;
        drop(inner);
        self.notify();
    }

    /// Registers a callback fired after every successful mutation (used to
    /// hook up an external persistence reconciler per §9).
    pub fn set_on_change(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.on_change.write().unwrap() = Some(Arc::new(f));
    }

    fn notify(&self) {
        if let Some(f) = self.on_change.read().unwrap().as_ref() {
            f();
        }
    }
}
