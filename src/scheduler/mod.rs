//! Recurring-task scheduling.
//!
//! Monitors never own threads. Each one registers a fixed-delay task with a
//! shared [`Scheduler`] and keeps the returned [`ScheduledHandle`] so it can
//! cancel itself.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::MonitorResult;

/// Thread-pool scheduler.
pub mod pool;
/// Deterministic scheduler driven by the caller.
pub mod manual;

pub use manual::ManualScheduler;
pub use pool::ThreadPoolScheduler;

/// Task body executed on every run.
pub type Task = Arc<dyn Fn() + Send + Sync>;

/// Registration of a recurring task.
pub trait ScheduledHandle: Send + Sync {
    /// True once the task will never run again (cancelled or aborted by a panic).
    fn is_done(&self) -> bool;

    fn is_cancelled(&self) -> bool;

    /// Prevents further runs. Returns false if the task was already done.
    ///
    /// A run that is already executing always finishes; `may_interrupt` is
    /// accepted for contract compatibility and has no effect.
    fn cancel(&self, may_interrupt: bool) -> bool;
}

/// Executes recurring tasks.
pub trait Scheduler: Send + Sync {
    /// Runs `task` after `initial_delay`, then again `delay` after each run
    /// finishes, until the returned handle is cancelled.
    fn schedule_with_fixed_delay(
        &self,
        task: Task,
        initial_delay: Duration,
        delay: Duration,
    ) -> MonitorResult<Arc<dyn ScheduledHandle>>;
}

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const ABORTED: u8 = 2;

/// Handle shared by the bundled schedulers.
#[derive(Debug, Default)]
pub struct TaskHandle {
    state: AtomicU8,
}

impl TaskHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    /// Marks the task as finished after its body panicked.
    pub(crate) fn abort(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl ScheduledHandle for TaskHandle {
    fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != ACTIVE
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn cancel(&self, _may_interrupt: bool) -> bool {
        self.state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
