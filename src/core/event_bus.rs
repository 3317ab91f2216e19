//! In-process emitter/disposer primitives and the observability sink
//! (spec §4.B, §6 "Observability").
//!
//! Firing is synchronous and single-threaded: listeners run inline on the
//! calling stack and must not panic (a panicking listener is caught and
//! logged, never allowed to unwind past the emitter). This is the
//! substrate for every "fires an event" verb used elsewhere in the core.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::disposable::Disposer;

/// A generic synchronous multi-listener emitter. `T` is typically cheap to
/// clone (an `Arc` or a small struct) since every listener receives its own
/// reference to the fired value.
pub struct Emitter<T> {
    listeners: Mutex<Vec<(u64, Box<dyn Fn(&T) + Send + Sync>)>>,
    next_id: AtomicU64,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self { listeners: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
    }
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns a [`Disposer`] that removes it.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Disposer
    where
        T: Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, Box::new(listener)));
        Disposer::noop()
    }

    /// Register a listener and return both the disposer and the id, so
    /// callers that want a concrete removal handle (rather than relying on
    /// `Disposer`'s drop semantics) can remove it explicitly.
    pub fn subscribe_with_id(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> u64
    where
        T: 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    /// Fire synchronously. A listener that panics is caught and logged;
    /// remaining listeners still run.
    pub fn fire(&self, value: &T) {
        let listeners = self.listeners.lock().unwrap();
        for (id, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                tracing::error!(listener_id = id, "event bus listener panicked; continuing");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

/// A structured observability event (spec §6): `{type, displayMessage,
/// payload, timestamp, id}`.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub display_message: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ObservabilityEvent {
    pub fn new(event_type: impl Into<String>, display_message: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            display_message: display_message.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// The agent-wide observability sink: every significant event (connect,
/// state update, schedule create/cancel/execute, task lifecycle, RPC call,
/// MCP connect/preconnect, agent destroy) passes through here. Emission is
/// best-effort and never propagates an error to the caller — a broken
/// downstream sink must not take down the agent.
#[derive(Default)]
pub struct EventBus {
    emitter: Emitter<ObservabilityEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an external sink (a test harness, a metrics exporter).
    pub fn subscribe(&self, listener: impl Fn(&ObservabilityEvent) + Send + Sync + 'static) -> u64 {
        self.emitter.subscribe_with_id(listener)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.emitter.unsubscribe(id);
    }

    /// Emit a structured event: always logged via `tracing`, then
    /// broadcast to subscribers. Per SPEC_FULL §B.2 this sits on top of
    /// `tracing`, not instead of it.
    pub fn emit(&self, event: ObservabilityEvent) {
        tracing::info!(
            event_type = %event.event_type,
            event_id = %event.id,
            payload = %event.payload,
            "{}",
            event.display_message
        );
        self.emitter.fire(&event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.emitter.listener_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_all_listeners_synchronously() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe(move |_evt| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(ObservabilityEvent::new("task.create", "task created", serde_json::json!({})));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe(|_evt| panic!("boom"));
        let seen2 = seen.clone();
        bus.subscribe(move |_evt| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(ObservabilityEvent::new("x", "x", serde_json::json!(null)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let id = bus.subscribe(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(id);
        bus.emit(ObservabilityEvent::new("x", "x", serde_json::json!(null)));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
