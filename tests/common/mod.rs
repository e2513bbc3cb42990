// tests/common/mod.rs
// Shared setup for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tether::config::{CONFIG, load_dotenv};
use tether::{Context, ContextOptions, ManualScheduler, Scheduler};
use tracing_subscriber::FmtSubscriber;

/// Install a fmt subscriber at the configured level (first caller wins)
///
/// Loads `.env` first, the way an application would.
pub fn init_tracing() {
    load_dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(CONFIG.tracing_level())
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Simulated clock at the Unix epoch, plus the same clock as a trait object
pub fn manual_clock() -> (Arc<ManualScheduler>, Arc<dyn Scheduler>) {
    manual_clock_at(DateTime::<Utc>::default())
}

pub fn manual_clock_at(start: DateTime<Utc>) -> (Arc<ManualScheduler>, Arc<dyn Scheduler>) {
    init_tracing();
    let clock = Arc::new(ManualScheduler::starting_at(start));
    let scheduler: Arc<dyn Scheduler> = clock.clone();
    (clock, scheduler)
}

pub fn root(scheduler: &Arc<dyn Scheduler>, options: ContextOptions) -> Context {
    Context::with_scheduler(options, Arc::clone(scheduler))
}

/// Milliseconds since the Unix epoch
pub fn at(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).expect("timestamp in range")
}

/// Records every cancel/finish a context emits, in order
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn attach(ctx: &Context) -> Self {
        let recorder = Self::default();

        let log = recorder.log.clone();
        ctx.on_cancel(move |reason| {
            let reason = reason.map(|r| r.to_string()).unwrap_or_else(|| "none".to_string());
            log.lock().push(format!("cancel:{}", reason));
        });

        let log = recorder.log.clone();
        ctx.on_finish(move || log.lock().push("finish".to_string()));

        recorder
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}
