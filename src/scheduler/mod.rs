// src/scheduler/mod.rs
//! Timer and task-queue facility used by contexts
//!
//! A context never talks to a clock or a runtime directly. Everything that
//! happens "later" goes through a [`Scheduler`]:
//! - `schedule` runs a callback after a delay and hands back a [`TimerHandle`]
//! - `defer` runs a callback on the next scheduling turn
//! - `cancel` releases a pending timer (idempotent)
//!
//! Two implementations ship with the crate: [`TokioScheduler`] for real
//! programs and [`ManualScheduler`] for simulated time.

mod manual;
mod runtime;

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

pub use manual::ManualScheduler;
pub use runtime::TokioScheduler;

/// Callback run by a scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle to a pending scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Clock plus delayed/deferred execution
///
/// Implementations must never run a task inside the `schedule` or `defer`
/// call that received it, not even for a zero delay. Contexts call both
/// while holding their own state lock, and the task takes that lock again.
pub trait Scheduler: Send + Sync {
    /// Current wall-clock time as seen by this scheduler
    fn now(&self) -> DateTime<Utc>;

    /// Run `task` once `delay` has elapsed, never inline
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;

    /// Run `task` on a later scheduling turn, never inline
    fn defer(&self, task: Task);

    /// Release a pending timer. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: TimerHandle);
}

impl fmt::Debug for dyn Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").field("now", &self.now()).finish()
    }
}
