//! C7 — EventBus: in-process pub/sub broadcasting [`SessionUpdateEvent`]s
//! to observers (the UI shell, logging).
//!
//! Subscribers are held weakly (§4.7, "Subscribers are weak — unsubscribe
//! on shutdown"): a subscription is dropped the moment the caller drops
//! the [`Subscription`] handle returned by [`EventBus::subscribe`], with no
//! explicit unsubscribe call needed. Delivery is synchronous and ordered
//! per publisher — `publish` calls every live subscriber in registration
//! order before returning — and a subscriber that panics is isolated via
//! `catch_unwind` rather than poisoning the bus or skipping the remaining
//! subscribers, mirroring the teacher's `progress_callback` pattern
//! (`brain/agent/service/builder.rs`) generalized from one callback to many.

use crate::model::SessionId;
use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

/// The four lifecycle actions the bus carries (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Ready,
    MessageAdded,
    Compacted,
    Archived,
}

/// Events reference entities by id and never carry the entities
/// themselves (§3, "Ownership and lifecycle").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdateEvent {
    pub session_id: SessionId,
    pub feature_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub action: EventAction,
    pub timestamp: DateTime<Utc>,
}

impl SessionUpdateEvent {
    pub fn new(session_id: SessionId, feature_id: impl Into<String>, task_id: Option<String>, action: EventAction, now: DateTime<Utc>) -> Self {
        Self { session_id, feature_id: feature_id.into(), task_id, action, timestamp: now }
    }
}

type Callback = dyn Fn(&SessionUpdateEvent) + Send + Sync;

/// Keeps a subscription alive. Dropping it unsubscribes — the bus only
/// ever holds a [`Weak`] reference to the callback.
#[derive(Clone)]
pub struct Subscription(#[allow(dead_code)] Arc<Callback>);

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Weak<Callback>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback`, returning the handle that keeps it alive.
    /// The caller must retain the returned [`Subscription`] for as long as
    /// it wants to keep receiving events.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionUpdateEvent) + Send + Sync + 'static,
    {
        let callback: Arc<Callback> = Arc::new(callback);
        self.subscribers.lock().expect("event bus lock poisoned").push(Arc::downgrade(&callback));
        Subscription(callback)
    }

    /// Delivers `event` to every live subscriber, in registration order,
    /// pruning any whose handle has since been dropped. A panicking
    /// subscriber is caught and logged; it does not stop delivery to the
    /// remaining subscribers nor propagate to the publisher.
    pub fn publish(&self, event: SessionUpdateEvent) {
        let subscribers = {
            let mut guard = self.subscribers.lock().expect("event bus lock poisoned");
            guard.retain(|weak| weak.strong_count() > 0);
            guard.clone()
        };

        for weak in subscribers {
            let Some(callback) = weak.upgrade() else { continue };
            let event_ref = &event;
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(event_ref)));
            if result.is_err() {
                tracing::warn!(session_id = %event.session_id, action = ?event.action, "event subscriber panicked; isolating");
            }
        }
    }

    /// Number of currently-live subscribers. Exposed for tests and for
    /// host-side diagnostics, not part of the delivery contract.
    pub fn subscriber_count(&self) -> usize {
        let mut guard = self.subscribers.lock().expect("event bus lock poisoned");
        guard.retain(|weak| weak.strong_count() > 0);
        guard.len()
    }
}
