// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simple, synchronous, in-process event bus.
//!
//! - Thread-safe subscribe/unsubscribe/publish.
//! - Handlers are called synchronously in the publisher's thread.
//!   (UI can re-dispatch to its main thread if needed.)
//! - A panicking handler is logged and skipped; it never prevents other
//!   handlers from seeing the event and never reaches the publisher.

use crate::error::panic_message;
use crate::event::{Event, EventKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Handle returned by subscribe; pass back to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
}

enum Sink {
    Strong(Arc<dyn Fn(&Event) + Send + Sync>),
    /// Returns false when the owner has been dropped; the entry is then
    /// removed after the dispatch that observed it.
    Weak(Arc<dyn Fn(&Event) -> bool + Send + Sync>),
}

struct Entry {
    id: u64,
    sink: Sink,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subs: Mutex<HashMap<EventKind, Vec<Arc<Entry>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for exactly the given event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(kind, Sink::Strong(Arc::new(handler)))
    }

    /// Register a handler bound to a weakly-referenced owner.
    ///
    /// Intended for UI objects (widgets, view-models). When the owner is
    /// dropped the subscription is removed on the next publish touching
    /// this kind.
    pub fn subscribe_weak<T, F>(&self, kind: EventKind, owner: &Arc<T>, handler: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &Event) + Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(owner);
        self.insert(
            kind,
            Sink::Weak(Arc::new(move |event| match weak.upgrade() {
                Some(owner) => {
                    handler(&owner, event);
                    true
                }
                None => false,
            })),
        )
    }

    fn insert(&self, kind: EventKind, sink: Sink) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs
            .lock()
            .entry(kind)
            .or_default()
            .push(Arc::new(Entry { id, sink }));
        Subscription { id, kind }
    }

    /// Idempotent; unknown subscriptions are silently ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut subs = self.subs.lock();
        if let Some(entries) = subs.get_mut(&subscription.kind) {
            entries.retain(|e| e.id != subscription.id);
        }
    }

    /// Dispatch `event` to all current handlers for its kind.
    ///
    /// The handler list is snapshotted under the lock and invoked outside
    /// it, so handlers may freely subscribe, unsubscribe, or publish;
    /// the in-flight dispatch keeps its snapshot.
    pub fn publish(&self, event: &Event) {
        let kind = event.kind();
        let entries: Vec<Arc<Entry>> = {
            let subs = self.subs.lock();
            subs.get(&kind).map(|v| v.to_vec()).unwrap_or_default()
        };

        let mut dead: Vec<u64> = Vec::new();
        for entry in &entries {
            let outcome = catch_unwind(AssertUnwindSafe(|| match &entry.sink {
                Sink::Strong(handler) => {
                    handler(event);
                    true
                }
                Sink::Weak(call) => call(event),
            }));
            match outcome {
                Ok(true) => {}
                Ok(false) => dead.push(entry.id),
                Err(panic) => {
                    tracing::error!(
                        kind = ?kind,
                        "event handler panicked: {}",
                        panic_message(&panic)
                    );
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subs.lock();
            if let Some(entries) = subs.get_mut(&kind) {
                entries.retain(|e| !dead.contains(&e.id));
            }
        }
    }

    /// Remove all subscriptions.
    pub fn clear(&self) {
        self.subs.lock().clear();
    }

    /// Number of live subscriptions for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subs.lock().get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
