// src/events/mod.rs
//! Cancel/finish notifications
//!
//! `EventEmitter` is a small synchronous observer registry:
//! - listeners run in subscription order, on the emitting thread
//! - a listener added while an event is being emitted does not see that event
//! - nothing is buffered for listeners that subscribe after an event fired

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

// ============================================================================
// Event Types
// ============================================================================

/// Why a context was canceled
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The deadline passed
    Timeout,
    /// The parent was already canceled when this context was created
    Dead,
    /// Caller-supplied reason; `From` never builds one named `timeout` or `dead`
    Custom(String),
}

impl CancelReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::Dead => "dead",
            Self::Custom(reason) => reason,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"timeout"` and `"dead"` map to their variants, so a reason always
/// round-trips through `as_str`
impl From<&str> for CancelReason {
    fn from(reason: &str) -> Self {
        match reason {
            "timeout" => Self::Timeout,
            "dead" => Self::Dead,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for CancelReason {
    fn from(reason: String) -> Self {
        match reason.as_str() {
            "timeout" => Self::Timeout,
            "dead" => Self::Dead,
            _ => Self::Custom(reason),
        }
    }
}

/// Notification delivered to context listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEvent {
    /// Cancellation was signaled; `reason` is absent when `cancel` got none
    Cancel { reason: Option<CancelReason> },
    /// The context reached its terminal state
    Finish,
}

impl ContextEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Cancel { .. } => EventKind::Cancel,
            Self::Finish => EventKind::Finish,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Cancel,
    Finish,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Finish => "finish",
        }
    }
}

// ============================================================================
// Emitter
// ============================================================================

/// Callback invoked with the emitted event
pub type Listener = Arc<dyn Fn(&ContextEvent) + Send + Sync>;

/// Identifies a registered listener for `off`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    listeners: Vec<Registration>,
    closed: bool,
}

/// Synchronous publish/subscribe registry
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `listener` for every `kind` event
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(listener))
    }

    /// Call `listener` for the next `kind` event only
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(listener))
    }

    /// Remove a listener; returns false if it was not registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|r| r.id != id);
        registry.listeners.len() != before
    }

    /// Deliver `event` to its listeners, returns how many were called
    ///
    /// The registry lock is released before any listener runs, so listeners
    /// may register, remove, or emit freely.
    pub fn emit(&self, event: &ContextEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<Listener> = {
            let mut registry = self.registry.lock();
            let targets = registry
                .listeners
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| Arc::clone(&r.listener))
                .collect();
            registry.listeners.retain(|r| !(r.once && r.kind == kind));
            targets
        };

        trace!(event = kind.as_str(), listeners = targets.len(), "Emitting event");
        for listener in &targets {
            listener(event);
        }
        targets.len()
    }

    /// Drop every listener and ignore later registrations
    pub fn close(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        registry.listeners.clear();
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .listeners
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    fn register(&self, kind: EventKind, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.lock();
        if !registry.closed {
            registry.listeners.push(Registration {
                id,
                kind,
                once,
                listener,
            });
        }
        id
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventEmitter")
            .field("listeners", &registry.listeners.len())
            .field("closed", &registry.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel(reason: &str) -> ContextEvent {
        ContextEvent::Cancel {
            reason: Some(reason.into()),
        }
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(CancelReason::Timeout.as_str(), "timeout");
        assert_eq!(CancelReason::Dead.to_string(), "dead");
        assert_eq!(CancelReason::from("shutdown").as_str(), "shutdown");
    }

    #[test]
    fn test_reserved_reason_strings_map_to_variants() {
        assert_eq!(CancelReason::from("timeout"), CancelReason::Timeout);
        assert_eq!(CancelReason::from("dead".to_string()), CancelReason::Dead);
        assert_eq!(
            CancelReason::from("Timeout"),
            CancelReason::Custom("Timeout".into())
        );

        let json = serde_json::to_value(cancel("timeout")).unwrap();
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn test_listeners_run_in_subscription_order() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let log = log.clone();
            emitter.on(EventKind::Cancel, move |_| log.lock().push(label));
        }

        assert_eq!(emitter.emit(&cancel("x")), 3);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicU64::new(0));

        let counter = hits.clone();
        emitter.once(EventKind::Finish, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&ContextEvent::Finish);
        emitter.emit(&ContextEvent::Finish);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(EventKind::Finish), 0);
    }

    #[test]
    fn test_kinds_are_separate() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicU64::new(0));

        let counter = hits.clone();
        emitter.on(EventKind::Finish, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(emitter.emit(&cancel("x")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_removes_listener() {
        let emitter = EventEmitter::new();
        let id = emitter.on(EventKind::Cancel, |_| panic!("removed listener called"));

        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        assert_eq!(emitter.emit(&cancel("x")), 0);
    }

    #[test]
    fn test_listener_added_during_emit_misses_event() {
        let emitter = Arc::new(EventEmitter::new());
        let late_hits = Arc::new(AtomicU64::new(0));

        let inner = emitter.clone();
        let counter = late_hits.clone();
        emitter.once(EventKind::Cancel, move |_| {
            let counter = counter.clone();
            inner.on(EventKind::Cancel, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        emitter.emit(&cancel("first"));
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        emitter.emit(&cancel("second"));
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_emitter_ignores_registrations() {
        let emitter = EventEmitter::new();
        emitter.on(EventKind::Finish, |_| {});
        emitter.close();

        emitter.on(EventKind::Finish, |_| panic!("closed emitter called"));
        assert_eq!(emitter.listener_count(EventKind::Finish), 0);
        assert_eq!(emitter.emit(&ContextEvent::Finish), 0);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(cancel("shutdown")).unwrap();
        assert_eq!(json["type"], "cancel");
        assert_eq!(json["reason"]["custom"], "shutdown");
    }
}
