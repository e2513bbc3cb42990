// src/scheduler/runtime.rs
//! Scheduler backed by the Tokio timer and task queue

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::trace;

use super::{Scheduler, Task, TimerHandle};

/// Real scheduler built on `Handle::spawn` and `tokio::time::sleep`
///
/// The clock is anchored to wall time when the scheduler is built and then
/// advanced by `tokio::time::Instant`, so a paused Tokio clock
/// (`tokio::time::pause` / `advance`) also moves deadlines.
///
/// The runtime is captured when the scheduler is built. Timers and deferred
/// tasks are spawned through that handle, so `schedule`, `defer` and `cancel`
/// work from any thread, including threads outside the runtime.
///
/// Deferred tasks run strictly after the code that deferred them yields only
/// on a current-thread runtime. A multi-thread runtime may run them on another
/// worker right away; there, observe state with `Context::cancelled` or
/// `Context::subscribe` rather than listeners attached after the fact.
pub struct TokioScheduler {
    runtime: Handle,
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerHandle, AbortHandle>>>,
}

impl TokioScheduler {
    /// Scheduler bound to the runtime of the calling thread
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; see [`TokioScheduler::try_new`].
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(scheduler) => scheduler,
            Err(err) => panic!("TokioScheduler must be built inside a Tokio runtime: {err}"),
        }
    }

    pub fn try_new() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::with_handle)
    }

    /// Scheduler bound to an explicit runtime
    pub fn with_handle(runtime: Handle) -> Self {
        // Enter the runtime so the monotonic anchor reads its (possibly paused) clock
        let mono_anchor = {
            let _guard = runtime.enter();
            Instant::now()
        };
        Self {
            runtime,
            wall_anchor: Utc::now(),
            mono_anchor,
            next_id: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = {
            let _guard = self.runtime.enter();
            Instant::now().saturating_duration_since(self.mono_anchor)
        };
        chrono::TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|delta| self.wall_anchor.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timers = Arc::clone(&self.timers);

        // Hold the map while spawning so the task cannot deregister itself
        // before it has been registered.
        let mut pending = self.timers.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_pending = timers.lock().remove(&handle).is_some();
            if still_pending {
                task();
            }
        });
        pending.insert(handle, join.abort_handle());

        trace!(%handle, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        handle
    }

    fn defer(&self, task: Task) {
        self.runtime.spawn(async move {
            task();
        });
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(abort) = self.timers.lock().remove(&handle) {
            abort.abort();
            trace!(%handle, "Timer released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_paused_time() {
        let scheduler = TokioScheduler::new();
        let start = scheduler.now();

        tokio::time::advance(Duration::from_millis(1500)).await;

        assert_eq!((scheduler.now() - start).num_milliseconds(), 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        scheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(scheduler.pending_timers(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let scheduler = TokioScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let handle = scheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.cancel(handle);
        scheduler.cancel(handle);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_defer_runs_after_yield() {
        let scheduler = TokioScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        scheduler.defer(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_new_outside_runtime() {
        assert!(TokioScheduler::try_new().is_err());
    }

    #[test]
    fn test_defer_from_outside_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let scheduler = TokioScheduler::with_handle(runtime.handle().clone());
        let (tx, rx) = tokio::sync::oneshot::channel();

        // The calling thread is not inside the runtime here
        scheduler.defer(Box::new(move || {
            let _ = tx.send(());
        }));

        runtime.block_on(rx).unwrap();
    }
}
