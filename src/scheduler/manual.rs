// src/scheduler/manual.rs
//! Simulated clock for deterministic tests
//!
//! Nothing runs until the owner drives the scheduler:
//! - `advance` moves the clock and fires due timers in due order
//! - `tick` runs one turn of deferred tasks
//! - `run_until_idle` keeps ticking until the deferred queue is empty

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::trace;

use super::{Scheduler, Task, TimerHandle};

/// Upper bound on ticks in `run_until_idle`, guards against tasks that
/// re-defer themselves forever
const MAX_IDLE_TICKS: usize = 10_000;

struct PendingTimer {
    handle: TimerHandle,
    due: DateTime<Utc>,
    task: Task,
}

struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    timers: Vec<PendingTimer>,
    deferred: VecDeque<Task>,
}

fn offset(from: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Hand-driven scheduler; the clock only moves when told to
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Clock starting at the Unix epoch
    pub fn new() -> Self {
        Self::starting_at(DateTime::<Utc>::default())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                next_id: 1,
                timers: Vec::new(),
                deferred: VecDeque::new(),
            }),
        }
    }

    /// Move the clock forward by `by`, firing every timer that comes due
    ///
    /// Timers fire one at a time with the clock set to their due time.
    /// Deferred tasks are left queued for `tick` / `run_until_idle`.
    /// Returns the number of timers fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = offset(self.state.lock().now, by);

        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                let earliest = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.handle))
                    .map(|(idx, _)| idx);

                earliest.map(|idx| {
                    let timer = state.timers.remove(idx);
                    if timer.due > state.now {
                        state.now = timer.due;
                    }
                    timer
                })
            };

            let Some(timer) = next else { break };
            trace!(handle = %timer.handle, due = %timer.due, "Simulated timer fired");
            (timer.task)();
            fired += 1;
        }

        let mut state = self.state.lock();
        if target > state.now {
            state.now = target;
        }
        fired
    }

    /// Run the deferred tasks queued before this call
    ///
    /// Tasks deferred while the turn runs wait for the next tick.
    pub fn tick(&self) -> usize {
        let batch: Vec<Task> = self.state.lock().deferred.drain(..).collect();
        let count = batch.len();
        for task in batch {
            task();
        }
        count
    }

    /// Tick until no deferred work is left; returns the total tasks run
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_IDLE_TICKS {
            let ran = self.tick();
            if ran == 0 {
                break;
            }
            total += ran;
        }
        total
    }

    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().deferred.len()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let mut state = self.state.lock();
        let handle = TimerHandle::new(state.next_id);
        state.next_id += 1;
        let due = offset(state.now, delay);
        state.timers.push(PendingTimer { handle, due, task });
        handle
    }

    fn defer(&self, task: Task) {
        self.state.lock().deferred.push_back(task);
    }

    fn cancel(&self, handle: TimerHandle) {
        self.state.lock().timers.retain(|t| t.handle != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| -> Task {
            let sink = sink.clone();
            Box::new(move || sink.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_starts_at_epoch() {
        let scheduler = ManualScheduler::new();
        assert_eq!(scheduler.now().timestamp_millis(), 0);
    }

    #[test]
    fn test_advance_fires_in_due_order() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        scheduler.schedule(Duration::from_millis(300), task("late"));
        scheduler.schedule(Duration::from_millis(100), task("early"));
        scheduler.schedule(Duration::from_millis(100), task("early-second"));

        assert_eq!(scheduler.advance(Duration::from_millis(50)), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(50)), 2);
        assert_eq!(*log.lock(), vec!["early", "early-second"]);

        assert_eq!(scheduler.advance(Duration::from_millis(500)), 1);
        assert_eq!(scheduler.now().timestamp_millis(), 600);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        let handle = scheduler.schedule(Duration::from_millis(10), task("never"));
        scheduler.cancel(handle);
        scheduler.cancel(handle);
        scheduler.advance(Duration::from_secs(1));

        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_tick_runs_one_turn() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (log, task) = recorder();

        let inner = scheduler.clone();
        let follow_up = task("second-turn");
        let first = task("first-turn");
        scheduler.defer(Box::new(move || {
            first();
            inner.defer(follow_up);
        }));

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(*log.lock(), vec!["first-turn"]);
        assert_eq!(scheduler.pending_tasks(), 1);

        assert_eq!(scheduler.run_until_idle(), 1);
        assert_eq!(*log.lock(), vec!["first-turn", "second-turn"]);
    }

    #[test]
    fn test_zero_delay_never_runs_inline() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        scheduler.schedule(Duration::ZERO, task("timer"));
        scheduler.defer(task("deferred"));
        assert!(log.lock().is_empty());

        assert_eq!(scheduler.advance(Duration::ZERO), 1);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(*log.lock(), vec!["timer", "deferred"]);
    }
}
