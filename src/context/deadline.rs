// src/context/deadline.rs
// Deadline resolution and the timer that enforces it

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use super::{Context, ContextOptions};
use crate::events::CancelReason;

/// What to do with an adopted deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Arming {
    /// Deadline already passed; cancel on the next tick
    Expired,
    /// Cancel once this much time has elapsed
    After(Duration),
}

/// Effective deadline for a set of options; `deadline` wins over `timeout`
pub(super) fn resolve(options: &ContextOptions, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    options
        .deadline
        .or_else(|| options.timeout.map(|timeout| shift(now, timeout)))
}

/// A child may not outlive any ancestor's budget
pub(super) fn earliest(
    inherited: Option<DateTime<Utc>>,
    own: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (inherited, own) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

pub(super) fn plan(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Arming {
    let remaining = deadline - now;
    if remaining <= TimeDelta::zero() {
        return Arming::Expired;
    }
    match remaining.to_std() {
        Ok(delay) => Arming::After(delay),
        Err(_) => Arming::Expired,
    }
}

fn shift(now: DateTime<Utc>, by: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(by).unwrap_or(if by < TimeDelta::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

impl Context {
    /// Adopt `deadline` and schedule the cancellation that enforces it
    ///
    /// Called once, while the context is being built.
    pub(super) fn arm(&self, deadline: DateTime<Utc>) {
        let scheduler = &self.inner.scheduler;
        let mut control = self.inner.control.lock();
        control.deadline = Some(deadline);

        match plan(deadline, scheduler.now()) {
            Arming::Expired => {
                debug!(ctx_id = %self.inner.id, %deadline, "Deadline already passed");
                let ctx = self.clone();
                scheduler.defer(Box::new(move || {
                    ctx.signal_cancel(Some(CancelReason::Timeout));
                }));
            }
            Arming::After(delay) => {
                // The control lock is held until the handle is stored, so a
                // timer firing early still finds itself armed. Relies on
                // `Scheduler::schedule` never running the task inline.
                let ctx = self.clone();
                let handle = scheduler.schedule(
                    delay,
                    Box::new(move || {
                        ctx.expire();
                    }),
                );
                control.timer = Some(handle);
                debug!(
                    ctx_id = %self.inner.id,
                    %deadline,
                    delay_ms = delay.as_millis() as u64,
                    "Deadline armed"
                );
            }
        }
    }

    /// Timer callback; ignored once the timer has been released
    fn expire(&self) {
        let armed = self.inner.control.lock().timer.take().is_some();
        if armed {
            self.signal_cancel(Some(CancelReason::Timeout));
        }
    }
}
