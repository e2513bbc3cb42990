// src/context/options.rs
// Construction options for root and child contexts

use chrono::{DateTime, TimeDelta, Utc};

/// Options for a root context
///
/// When both are set, `deadline` wins over `timeout`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOptions {
    /// Absolute time after which the context cancels itself
    pub deadline: Option<DateTime<Utc>>,
    /// Relative budget, resolved against the scheduler clock at construction
    pub timeout: Option<TimeDelta>,
}

impl ContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Negative values produce an already-expired deadline
    pub fn with_timeout(mut self, timeout: TimeDelta) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_ms(self, millis: i64) -> Self {
        self.with_timeout(TimeDelta::milliseconds(millis))
    }
}

/// Options for `Context::create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// Copy the parent's visible values onto the child
    pub values: bool,
    /// Inherit the parent's canceled/finished state and deadline
    pub cancel: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout: Option<TimeDelta>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            values: true,
            cancel: true,
            deadline: None,
            timeout: None,
        }
    }
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_values(mut self) -> Self {
        self.values = false;
        self
    }

    /// Skip cancellation linkage, including the parent's deadline
    pub fn detached(mut self) -> Self {
        self.cancel = false;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(mut self, timeout: TimeDelta) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_ms(self, millis: i64) -> Self {
        self.with_timeout(TimeDelta::milliseconds(millis))
    }

    /// The child's own deadline options, without the hierarchy flags
    pub(crate) fn own(&self) -> ContextOptions {
        ContextOptions {
            deadline: self.deadline,
            timeout: self.timeout,
        }
    }
}

impl From<ContextOptions> for CreateOptions {
    fn from(options: ContextOptions) -> Self {
        Self {
            deadline: options.deadline,
            timeout: options.timeout,
            ..Self::default()
        }
    }
}
