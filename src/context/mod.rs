// src/context/mod.rs
//! Hierarchical cancellation context
//!
//! A `Context` answers two questions for a call chain: "should I stop now?"
//! and "when must I stop?". It carries:
//! - control state: `canceled`, `finished`, an optional deadline and the
//!   pending timer that enforces it
//! - a free-form value bag for request-scoped data (see `values`)
//!
//! State machine:
//!
//! ```text
//! pending ──cancel()──▶ canceled ──(next tick)──▶ finished
//!    └────────────────────end()─────────────────────▲
//! ```
//!
//! Children created with `create` take a one-time snapshot of the parent's
//! state; nothing links them afterwards.

mod deadline;
mod options;
mod values;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::CONFIG;
use crate::events::{CancelReason, ContextEvent, EventEmitter, EventKind, ListenerId};
use crate::scheduler::{Scheduler, TimerHandle, TokioScheduler};

pub use options::{ContextOptions, CreateOptions};
pub use values::{DOMAIN_KEY, RESERVED_PREFIX, is_reserved_key};

use values::ValueBag;

// ============================================================================
// Control State
// ============================================================================

#[derive(Debug, Default)]
struct ControlState {
    canceled: bool,
    finished: bool,
    deadline: Option<DateTime<Utc>>,
    timer: Option<TimerHandle>,
}

/// Flags published to async waiters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Lifecycle {
    canceled: bool,
    finished: bool,
}

struct ContextInner {
    id: Uuid,
    scheduler: Arc<dyn Scheduler>,
    control: Mutex<ControlState>,
    values: Mutex<ValueBag>,
    events: EventEmitter,
    event_tx: broadcast::Sender<ContextEvent>,
    lifecycle: watch::Sender<Lifecycle>,
    token: CancellationToken,
}

/// Cancellation/deadline context with an attached value bag
///
/// Cloning is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Root context driven by the Tokio runtime of the calling thread
    ///
    /// The context binds to that runtime; once built it may be used,
    /// canceled or ended from any thread.
    ///
    /// Events that fire "on the next tick" (an already-passed deadline, the
    /// finish after `cancel`) are spawned onto the runtime. On a
    /// current-thread runtime a listener attached right after construction
    /// always sees them. A multi-thread runtime may deliver them before the
    /// listener is attached; there, wait with [`Context::cancelled`] /
    /// [`Context::finished`] or use [`Context::subscribe`] before relying on
    /// listeners.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime. Use
    /// [`Context::with_scheduler`] with [`TokioScheduler::with_handle`] to
    /// build one elsewhere.
    pub fn new(options: ContextOptions) -> Self {
        Self::with_scheduler(options, Arc::new(TokioScheduler::new()))
    }

    /// Root context with no deadline
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like [`Context::new`].
    pub fn background() -> Self {
        Self::new(ContextOptions::default())
    }

    /// Root context driven by a caller-supplied scheduler
    pub fn with_scheduler(options: ContextOptions, scheduler: Arc<dyn Scheduler>) -> Self {
        let ctx = Self::bare(scheduler, ValueBag::default());
        let deadline = deadline::resolve(&options, ctx.inner.scheduler.now());
        if let Some(deadline) = deadline {
            ctx.arm(deadline);
        }
        debug!(ctx_id = %ctx.inner.id, deadline = ?deadline, "Context created");
        ctx
    }

    fn bare(scheduler: Arc<dyn Scheduler>, values: ValueBag) -> Self {
        let (event_tx, _) = broadcast::channel(CONFIG.event_capacity);
        let (lifecycle, _) = watch::channel(Lifecycle::default());
        Self {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4(),
                scheduler,
                control: Mutex::new(ControlState::default()),
                values: Mutex::new(values),
                events: EventEmitter::new(),
                event_tx,
                lifecycle,
                token: CancellationToken::new(),
            }),
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Child context with default options
    pub fn child(&self) -> Context {
        self.create(CreateOptions::default())
    }

    /// Spawn a child context from the parent's current state
    ///
    /// The parent is read once. With `cancel` linkage (the default) a
    /// canceled parent makes the child cancel itself with `Dead` on the next
    /// tick, a finished parent makes it end on the next tick, and the
    /// earlier of the parent's and the child's own deadline applies.
    ///
    /// The child shares the parent's scheduler, so the runtime caveat on
    /// [`Context::new`] applies to inherited cancellation as well.
    pub fn create(&self, options: CreateOptions) -> Context {
        let (parent_canceled, parent_finished, parent_deadline) = {
            let control = self.inner.control.lock();
            (control.canceled, control.finished, control.deadline)
        };

        let values = if options.values {
            ValueBag::from_snapshot(self.inner.values.lock().snapshot())
        } else {
            ValueBag::default()
        };

        let child = Self::bare(Arc::clone(&self.inner.scheduler), values);

        if options.cancel {
            if parent_canceled {
                let inherited = child.clone();
                child.inner.scheduler.defer(Box::new(move || {
                    inherited.signal_cancel(Some(CancelReason::Dead));
                }));
            } else if parent_finished {
                let inherited = child.clone();
                child.inner.scheduler.defer(Box::new(move || {
                    inherited.complete();
                }));
            }
        }

        let inherited_deadline = if options.cancel { parent_deadline } else { None };
        let own_deadline = deadline::resolve(&options.own(), child.inner.scheduler.now());
        let deadline = deadline::earliest(inherited_deadline, own_deadline);
        if let Some(deadline) = deadline {
            child.arm(deadline);
        }

        debug!(
            ctx_id = %child.inner.id,
            parent_id = %self.inner.id,
            deadline = ?deadline,
            linked = options.cancel,
            "Child context created"
        );
        child
    }

    // ========================================================================
    // State Machine
    // ========================================================================

    /// Signal cancellation without a reason
    pub fn cancel(&self) -> bool {
        self.signal_cancel(None)
    }

    /// Signal cancellation with a reason
    ///
    /// Returns false if the context was already canceled or finished.
    pub fn cancel_with(&self, reason: impl Into<CancelReason>) -> bool {
        self.signal_cancel(Some(reason.into()))
    }

    /// Finish the context without canceling it
    ///
    /// Returns false if the context was already finished.
    pub fn end(&self) -> bool {
        let ended = self.complete();
        if ended {
            debug!(ctx_id = %self.inner.id, "Context ended");
        }
        ended
    }

    fn signal_cancel(&self, reason: Option<CancelReason>) -> bool {
        let timer = {
            let mut control = self.inner.control.lock();
            if control.canceled || control.finished {
                return false;
            }
            control.canceled = true;
            control.timer.take()
        };
        self.release(timer);
        self.inner.lifecycle.send_modify(|state| state.canceled = true);
        self.inner.token.cancel();

        debug!(
            ctx_id = %self.inner.id,
            reason = reason.as_ref().map(CancelReason::as_str).unwrap_or("none"),
            "Context canceled"
        );
        self.publish(ContextEvent::Cancel { reason });

        let ctx = self.clone();
        self.inner.scheduler.defer(Box::new(move || {
            ctx.complete();
        }));
        true
    }

    /// Terminal transition shared by `end` and the tick after `cancel`
    fn complete(&self) -> bool {
        let timer = {
            let mut control = self.inner.control.lock();
            if control.finished {
                return false;
            }
            control.finished = true;
            control.timer.take()
        };
        self.release(timer);
        self.inner.lifecycle.send_modify(|state| state.finished = true);

        self.publish(ContextEvent::Finish);
        // No event can follow finish; dropping listeners also breaks any
        // reference cycles through captured contexts.
        self.inner.events.close();
        true
    }

    fn release(&self, timer: Option<TimerHandle>) {
        if let Some(handle) = timer {
            self.inner.scheduler.cancel(handle);
        }
    }

    fn publish(&self, event: ContextEvent) {
        let _ = self.inner.event_tx.send(event.clone());
        self.inner.events.emit(&event);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.control.lock().canceled
    }

    pub fn is_finished(&self) -> bool {
        self.inner.control.lock().finished
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.inner.control.lock().deadline
    }

    /// Time left before the deadline; negative once it has passed
    pub fn remaining(&self) -> Option<TimeDelta> {
        self.deadline()
            .map(|deadline| deadline - self.inner.scheduler.now())
    }

    /// True while a deadline timer is scheduled and not yet released
    pub fn has_pending_timer(&self) -> bool {
        self.inner.control.lock().timer.is_some()
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.inner.scheduler)
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn on_cancel<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&CancelReason>) + Send + Sync + 'static,
    {
        self.inner.events.on(EventKind::Cancel, cancel_adapter(listener))
    }

    pub fn once_cancel<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&CancelReason>) + Send + Sync + 'static,
    {
        self.inner.events.once(EventKind::Cancel, cancel_adapter(listener))
    }

    pub fn on_finish<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.on(EventKind::Finish, move |_| listener())
    }

    pub fn once_finish<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.once(EventKind::Finish, move |_| listener())
    }

    /// Stream of events for async consumers
    ///
    /// Only events emitted after subscribing are received.
    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Resolves once the context is canceled (immediately if it already is)
    pub async fn cancelled(&self) {
        let mut rx = self.inner.lifecycle.subscribe();
        let _ = rx.wait_for(|state| state.canceled).await;
    }

    /// Resolves once the context is finished (immediately if it already is)
    pub async fn finished(&self) {
        let mut rx = self.inner.lifecycle.subscribe();
        let _ = rx.wait_for(|state| state.finished).await;
    }

    /// Token that is cancelled when this context is canceled
    ///
    /// Cancelling the returned token does not cancel the context.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }
}

fn cancel_adapter<F>(listener: F) -> impl Fn(&ContextEvent) + Send + Sync + 'static
where
    F: Fn(Option<&CancelReason>) + Send + Sync + 'static,
{
    move |event| {
        if let ContextEvent::Cancel { reason } = event {
            listener(reason.as_ref());
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = self.inner.control.lock();
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("canceled", &control.canceled)
            .field("finished", &control.finished)
            .field("deadline", &control.deadline)
            .finish()
    }
}

/// Shorthand for `Context::new`
pub fn make_context(options: ContextOptions) -> Context {
    Context::new(options)
}
