//! Deterministic scheduler for tests, driven tick by tick by the caller.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::MonitorResult;

use super::{ScheduledHandle, Scheduler, Task, TaskHandle};

struct ManualEntry {
    task: Task,
    handle: Arc<TaskHandle>,
    initial_delay: Duration,
    delay: Duration,
}

/// Scheduler that runs nothing on its own.
///
/// Every call to [`run_pending`](Self::run_pending) runs each live task once on
/// the calling thread, which makes tick sequences fully deterministic in tests.
/// Delays are recorded but otherwise ignored. Cancelled and aborted tasks are
/// dropped on the next round.
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<Vec<ManualEntry>>,
    scheduled: AtomicUsize,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every live task once and returns how many ran.
    ///
    /// A task that panics is aborted, as the thread-pool scheduler does.
    pub fn run_pending(&self) -> usize {
        let live: Vec<(Task, Arc<TaskHandle>)> = {
            let mut entries = self.lock();
            entries.retain(|e| e.handle.is_active());
            entries
                .iter()
                .map(|e| (Arc::clone(&e.task), Arc::clone(&e.handle)))
                .collect()
        };

        let mut ran = 0;
        for (task, handle) in live {
            // A task earlier in this round may have cancelled this one.
            if !handle.is_active() {
                continue;
            }
            ran += 1;
            if catch_unwind(AssertUnwindSafe(|| task())).is_err() {
                handle.abort();
                tracing::error!("scheduled task panicked, no further runs");
            }
        }
        ran
    }

    /// Total number of tasks ever scheduled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// True if nothing was ever scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks that will run on the next [`run_pending`](Self::run_pending).
    #[must_use]
    pub fn active(&self) -> usize {
        self.lock().iter().filter(|e| e.handle.is_active()).count()
    }

    /// `(initial_delay, delay)` of every task not yet dropped, in scheduling order.
    #[must_use]
    pub fn delays(&self) -> Vec<(Duration, Duration)> {
        self.lock().iter().map(|e| (e.initial_delay, e.delay)).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ManualEntry>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_with_fixed_delay(
        &self,
        task: Task,
        initial_delay: Duration,
        delay: Duration,
    ) -> MonitorResult<Arc<dyn ScheduledHandle>> {
        let handle = Arc::new(TaskHandle::new());
        self.lock().push(ManualEntry {
            task,
            handle: Arc::clone(&handle),
            initial_delay,
            delay,
        });
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("len", &self.len())
            .field("active", &self.active())
            .finish()
    }
}
