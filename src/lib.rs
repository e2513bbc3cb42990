// src/lib.rs
//! Hierarchical cancellation and deadline contexts
//!
//! A [`Context`] tracks whether an operation was canceled or finished,
//! carries an optional deadline, and spawns children that inherit and narrow
//! that deadline. Work is never aborted here; consumers poll
//! `is_canceled()`, listen for events, or await `cancelled()`.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod scheduler;

pub use context::{Context, ContextOptions, CreateOptions, is_reserved_key, make_context};
pub use error::ContextError;
pub use events::{CancelReason, ContextEvent, EventEmitter, EventKind, ListenerId};
pub use scheduler::{ManualScheduler, Scheduler, Task, TimerHandle, TokioScheduler};
