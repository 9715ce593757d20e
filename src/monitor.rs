//! A single recurring poll of one subject.
//!
//! Each tick checks the deadline first, then consults the poll function. The
//! first terminal outcome moves the monitor out of `Running`, cancels its
//! scheduled handle and publishes one event. Later ticks (for example a run
//! that was already queued when the handle was cancelled) see a non-running
//! state and return without doing anything.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::context::MonitoringContext;
use crate::error::{MonitorResult, ValidationError};
use crate::event::{MonitorEvent, MonitorId};
use crate::poll::PollFunction;
use crate::scheduler::ScheduledHandle;
use crate::status::MonitorStatus;
use crate::time::{deadline_after, resolve_max_wait, TimeUnit};

/// Lifecycle of a monitor. Everything except `Created` and `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    Created,
    Running,
    Completed,
    Failed,
    TimedOut,
    /// Stopped from outside before reaching a terminal status.
    Stopped,
}

impl MonitorState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }
}

struct Inner {
    state: MonitorState,
    handle: Option<Arc<dyn ScheduledHandle>>,
    deadline: Option<DateTime<Utc>>,
}

/// Polls one subject on the shared scheduler until it finishes, times out or is stopped.
pub struct AsyncMonitor<T> {
    id: MonitorId,
    subject: T,
    poll: Arc<dyn PollFunction<T>>,
    ctx: MonitoringContext<T>,
    inner: Mutex<Inner>,
}

impl<T> AsyncMonitor<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ctx: MonitoringContext<T>, subject: T, poll: Arc<dyn PollFunction<T>>) -> Arc<Self> {
        Arc::new(Self {
            id: MonitorId::new(),
            subject,
            poll,
            ctx,
            inner: Mutex::new(Inner {
                state: MonitorState::Created,
                handle: None,
                deadline: None,
            }),
        })
    }

    #[must_use]
    pub const fn id(&self) -> MonitorId {
        self.id
    }

    #[must_use]
    pub const fn subject(&self) -> &T {
        &self.subject
    }

    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.lock().state
    }

    /// Absolute deadline, if monitoring started with a max wait.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.lock().deadline
    }

    /// True while the monitor is running and its task can still be scheduled.
    ///
    /// False after a terminal state, and also when the task was aborted by a
    /// panicking poll function while the state still reads `Running`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let inner = self.lock();
        inner.state == MonitorState::Running && inner.handle.as_ref().is_some_and(|h| !h.is_done())
    }

    /// Starts polling immediately and then every `polling_delay`.
    ///
    /// `max_wait` is an amount in `unit`. With no amount the monitor waits
    /// indefinitely and `unit` is ignored.
    ///
    /// # Errors
    ///
    /// - `ValidationError::MissingTimeUnit` if an amount is given without a unit.
    /// - `ValidationError::AlreadyStarted` if this monitor was started before.
    /// - `ExecutionError::SchedulerShutdown` if the scheduler no longer accepts tasks.
    pub fn start_monitoring(self: &Arc<Self>, max_wait: Option<u64>, unit: Option<TimeUnit>) -> MonitorResult<()> {
        let max_wait = resolve_max_wait(max_wait, unit)?;
        self.start(max_wait)
    }

    pub(crate) fn start(self: &Arc<Self>, max_wait: Option<Duration>) -> MonitorResult<()> {
        let mut inner = self.lock();
        if inner.state != MonitorState::Created {
            return Err(ValidationError::AlreadyStarted { id: self.id }.into());
        }

        let deadline = max_wait.map(|wait| deadline_after(self.ctx.clock.now(), wait));

        let monitor = Arc::clone(self);
        let handle = self.ctx.scheduler.schedule_with_fixed_delay(
            Arc::new(move || monitor.tick()),
            Duration::ZERO,
            self.ctx.polling_delay,
        )?;

        inner.state = MonitorState::Running;
        inner.handle = Some(handle);
        inner.deadline = deadline;
        drop(inner);

        tracing::debug!(
            monitor_id = %self.id,
            deadline = ?deadline,
            polling_delay = ?self.ctx.polling_delay,
            "monitor started"
        );
        Ok(())
    }

    /// True iff a deadline was set and the clock has reached it.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        let deadline = self.lock().deadline;
        deadline.is_some_and(|d| self.ctx.clock.now() >= d)
    }

    /// Cancels future ticks without interrupting one in progress. Idempotent.
    pub fn stop_monitoring(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, MonitorState::Created | MonitorState::Running) {
            inner.state = MonitorState::Stopped;
            tracing::debug!(monitor_id = %self.id, "monitor stopped");
        }
        Self::cancel_handle(&inner);
    }

    pub(crate) fn tick(&self) {
        if self.state() != MonitorState::Running {
            return;
        }

        if self.is_timeout() {
            if self.finish(MonitorState::TimedOut) {
                tracing::info!(monitor_id = %self.id, "monitor timed out");
                self.publish(MonitorEvent::timeout(self.id, self.subject.clone(), self.ctx.clock.now()));
            }
            return;
        }

        let status = self.poll.poll(&self.subject);
        tracing::trace!(monitor_id = %self.id, status = %status, "monitor tick");

        match status {
            MonitorStatus::Done => {
                if self.finish(MonitorState::Completed) {
                    tracing::info!(monitor_id = %self.id, "monitor completed");
                    self.publish(MonitorEvent::completed(self.id, self.subject.clone(), self.ctx.clock.now()));
                }
            }
            MonitorStatus::Failed => {
                if self.finish(MonitorState::Failed) {
                    tracing::info!(monitor_id = %self.id, "monitor failed");
                    self.publish(MonitorEvent::failed(self.id, self.subject.clone(), self.ctx.clock.now()));
                }
            }
            MonitorStatus::Continue => {}
        }
    }

    /// Moves a running monitor into `terminal` and cancels its handle.
    ///
    /// Returns false if some other path got there first, in which case no
    /// event may be published.
    fn finish(&self, terminal: MonitorState) -> bool {
        let mut inner = self.lock();
        if inner.state != MonitorState::Running {
            return false;
        }
        inner.state = terminal;
        Self::cancel_handle(&inner);
        true
    }

    fn cancel_handle(inner: &Inner) {
        if let Some(handle) = &inner.handle {
            if handle.is_cancelled() || handle.is_done() {
                return;
            }
            handle.cancel(false);
        }
    }

    // Handle is already cancelled here, so a subscriber that wakes a waiting
    // thread never observes a monitor that can still tick.
    fn publish(&self, event: MonitorEvent<T>) {
        self.ctx.bus.publish(&event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AsyncMonitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("AsyncMonitor")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("state", &inner.state)
            .field("deadline", &inner.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::clock::{Clock, ManualClock};
    use crate::event::MonitorEventType;
    use crate::scheduler::ManualScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        scheduler: Arc<ManualScheduler>,
        clock: Arc<ManualClock>,
        events: Arc<Mutex<Vec<MonitorEvent<&'static str>>>>,
        ctx: MonitoringContext<&'static str>,
    }

    fn harness() -> Harness {
        let scheduler = Arc::new(ManualScheduler::new());
        let clock = Arc::new(ManualClock::default());
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.register(move |e: &MonitorEvent<&'static str>| sink.lock().unwrap().push(e.clone()));

        let ctx = MonitoringContext::new(scheduler.clone(), bus, Duration::from_millis(100))
            .with_clock(clock.clone());
        Harness {
            scheduler,
            clock,
            events,
            ctx,
        }
    }

    fn fixed(status: MonitorStatus) -> Arc<dyn PollFunction<&'static str>> {
        Arc::new(move |_: &&'static str| status)
    }

    fn event_types(h: &Harness) -> Vec<MonitorEventType> {
        h.events.lock().unwrap().iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn test_start_without_timeout_schedules_with_polling_delay() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        assert_eq!(monitor.state(), MonitorState::Created);
        assert!(monitor.deadline().is_none());

        monitor.start_monitoring(None, Some(TimeUnit::Milliseconds)).unwrap();

        assert_eq!(monitor.state(), MonitorState::Running);
        assert!(monitor.deadline().is_none());
        assert_eq!(h.scheduler.delays(), vec![(Duration::ZERO, Duration::from_millis(100))]);
    }

    #[test]
    fn test_start_without_timeout_and_without_unit() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        monitor.start_monitoring(None, None).unwrap();
        assert!(monitor.is_running());
        assert!(monitor.deadline().is_none());
    }

    #[test]
    fn test_start_with_amount_but_no_unit_is_rejected() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        let err = monitor.start_monitoring(Some(100), None).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(monitor.state(), MonitorState::Created);
        assert!(h.scheduler.is_empty());
    }

    #[test]
    fn test_start_with_timeout_sets_deadline() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        monitor.start_monitoring(Some(1), Some(TimeUnit::Minutes)).unwrap();

        let deadline = monitor.deadline().unwrap();
        assert_eq!(deadline - h.clock.now(), chrono::Duration::minutes(1));
        assert!(!monitor.is_timeout());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Continue));
        monitor.start_monitoring(None, None).unwrap();
        let err = monitor.start_monitoring(None, None).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(h.scheduler.len(), 1);
    }

    #[test]
    fn test_is_timeout_false_without_deadline() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Continue));
        monitor.start_monitoring(None, None).unwrap();
        h.clock.advance(chrono::Duration::days(365));
        assert!(!monitor.is_timeout());
    }

    #[test]
    fn test_is_timeout_true_once_deadline_reached() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Continue));
        monitor.start_monitoring(Some(1), Some(TimeUnit::Milliseconds)).unwrap();
        assert!(!monitor.is_timeout());
        h.clock.advance(chrono::Duration::milliseconds(1));
        assert!(monitor.is_timeout());
    }

    #[test]
    fn test_done_publishes_completed_and_stops() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        monitor.start_monitoring(None, None).unwrap();

        assert_eq!(h.scheduler.run_pending(), 1);
        assert_eq!(event_types(&h), vec![MonitorEventType::Completed]);
        assert_eq!(monitor.state(), MonitorState::Completed);
        assert!(!monitor.is_running());
        assert_eq!(h.scheduler.active(), 0);

        let events = h.events.lock().unwrap();
        assert_eq!(events[0].subject, "vm");
        assert_eq!(events[0].monitor_id, monitor.id());
        assert_eq!(events[0].status, Some(MonitorStatus::Done));
    }

    #[test]
    fn test_failed_publishes_failed_and_stops() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Failed));
        monitor.start_monitoring(None, None).unwrap();

        h.scheduler.run_pending();
        assert_eq!(event_types(&h), vec![MonitorEventType::Failed]);
        assert_eq!(monitor.state(), MonitorState::Failed);
        assert_eq!(h.scheduler.active(), 0);
    }

    #[test]
    fn test_continue_without_deadline_never_publishes() {
        let h = harness();
        let polls = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&polls);
        let monitor = AsyncMonitor::new(
            h.ctx.clone(),
            "vm",
            Arc::new(move |_: &&'static str| {
                p.fetch_add(1, Ordering::SeqCst);
                MonitorStatus::Continue
            }),
        );
        monitor.start_monitoring(None, None).unwrap();

        for _ in 0..50 {
            h.scheduler.run_pending();
            h.clock.advance(chrono::Duration::hours(1));
            assert!(!monitor.is_timeout());
        }
        assert_eq!(polls.load(Ordering::SeqCst), 50);
        assert!(h.events.lock().unwrap().is_empty());
        assert!(monitor.is_running());
    }

    #[test]
    fn test_continue_past_deadline_times_out() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Continue));
        monitor.start_monitoring(Some(1), Some(TimeUnit::Milliseconds)).unwrap();

        h.clock.advance(chrono::Duration::milliseconds(2));
        h.scheduler.run_pending();

        assert_eq!(event_types(&h), vec![MonitorEventType::Timeout]);
        assert_eq!(monitor.state(), MonitorState::TimedOut);
        assert!(h.events.lock().unwrap()[0].status.is_none());
    }

    #[test]
    fn test_expired_deadline_wins_over_done() {
        let h = harness();
        let polls = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&polls);
        let monitor = AsyncMonitor::new(
            h.ctx.clone(),
            "vm",
            Arc::new(move |_: &&'static str| {
                p.fetch_add(1, Ordering::SeqCst);
                MonitorStatus::Done
            }),
        );
        monitor.start_monitoring(Some(10), Some(TimeUnit::Milliseconds)).unwrap();

        h.clock.advance(chrono::Duration::seconds(1));
        h.scheduler.run_pending();
        h.scheduler.run_pending();

        assert_eq!(event_types(&h), vec![MonitorEventType::Timeout]);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_done_before_deadline_is_not_reported_as_timeout() {
        let h = harness();
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let monitor = AsyncMonitor::new(
            h.ctx.clone(),
            "vm",
            Arc::new(move |_: &&'static str| {
                if t.fetch_add(1, Ordering::SeqCst) == 2 {
                    MonitorStatus::Done
                } else {
                    MonitorStatus::Continue
                }
            }),
        );
        monitor.start_monitoring(Some(1), Some(TimeUnit::Seconds)).unwrap();

        for _ in 0..3 {
            h.scheduler.run_pending();
        }
        h.clock.advance(chrono::Duration::seconds(5));
        h.scheduler.run_pending();

        assert_eq!(event_types(&h), vec![MonitorEventType::Completed]);
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stop_before_first_tick() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        monitor.start_monitoring(Some(100), Some(TimeUnit::Milliseconds)).unwrap();
        monitor.stop_monitoring();

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert!(!monitor.is_timeout());
        assert_eq!(h.scheduler.run_pending(), 0);
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Continue));
        monitor.start_monitoring(None, None).unwrap();

        monitor.stop_monitoring();
        monitor.stop_monitoring();

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(h.scheduler.active(), 0);
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_after_completion_keeps_completed_state() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        monitor.start_monitoring(None, None).unwrap();
        h.scheduler.run_pending();

        monitor.stop_monitoring();
        assert_eq!(monitor.state(), MonitorState::Completed);
        assert_eq!(h.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_tick_after_stop_is_ignored() {
        let h = harness();
        let monitor = AsyncMonitor::new(h.ctx.clone(), "vm", fixed(MonitorStatus::Done));
        monitor.start_monitoring(None, None).unwrap();
        monitor.stop_monitoring();

        // A run that was already dispatched when the handle was cancelled.
        monitor.tick();
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_poll_aborts_without_event() {
        let h = harness();
        let monitor = AsyncMonitor::new(
            h.ctx.clone(),
            "vm",
            Arc::new(|_: &&'static str| -> MonitorStatus { panic!("remote API exploded") }),
        );
        monitor.start_monitoring(None, None).unwrap();

        h.scheduler.run_pending();
        assert!(h.events.lock().unwrap().is_empty());
        assert_eq!(monitor.state(), MonitorState::Running);
        assert!(!monitor.is_running());
    }
}
