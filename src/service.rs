//! Monitoring service: fire-and-forget and blocking waits over [`AsyncMonitor`].
//!
//! Every call creates one monitor per subject, all sharing one poll function.
//! Outcomes are only reported through the event bus; the blocking variant
//! returns once every subject has reached a terminal state, whatever that
//! state is.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::bus::{EventBus, EventHandler, HandlerId};
use crate::config::MonitoringConfig;
use crate::context::MonitoringContext;
use crate::error::{ExecutionError, MonitorResult};
use crate::event::{MonitorEvent, MonitorId};
use crate::monitor::AsyncMonitor;
use crate::poll::PollFunction;
use crate::scheduler::ThreadPoolScheduler;
use crate::time::{resolve_max_wait, TimeUnit};

/// Lower bound on how often a blocked waiter checks for monitors that died without an event.
const MIN_LIVENESS_CHECK: Duration = Duration::from_millis(10);

pub struct MonitoringService<T> {
    ctx: MonitoringContext<T>,
}

impl<T> MonitoringService<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ctx: MonitoringContext<T>) -> Self {
        Self { ctx }
    }

    /// Builds a service on a fresh [`ThreadPoolScheduler`] and the system clock.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid or the scheduler threads cannot be spawned.
    pub fn from_config(config: &MonitoringConfig, bus: Arc<EventBus<MonitorEvent<T>>>) -> MonitorResult<Self> {
        config.validate()?;
        let scheduler = ThreadPoolScheduler::new(config.scheduler_threads, config.scheduler_queue_capacity)?;
        Ok(Self::new(MonitoringContext::new(
            Arc::new(scheduler),
            bus,
            config.polling_delay(),
        )))
    }

    #[must_use]
    pub fn context(&self) -> &MonitoringContext<T> {
        &self.ctx
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus<MonitorEvent<T>>> {
        &self.ctx.bus
    }

    /// Subscribes `handler` to every monitor event published through this service's bus.
    pub fn register<H>(&self, handler: H) -> HandlerId
    where
        H: EventHandler<MonitorEvent<T>> + 'static,
    {
        self.ctx.bus.register(handler)
    }

    pub fn unregister(&self, id: HandlerId) -> bool {
        self.ctx.bus.unregister(id)
    }

    /// Starts one monitor per subject without a timeout and returns immediately.
    pub fn monitor<P>(&self, poll: P, subjects: impl IntoIterator<Item = T>) -> MonitorResult<Vec<Arc<AsyncMonitor<T>>>>
    where
        P: PollFunction<T> + 'static,
    {
        self.monitor_with_timeout(None, None, poll, subjects)
    }

    /// Like [`monitor`](Self::monitor), but each monitor times out after `max_wait` `unit`s.
    ///
    /// # Errors
    ///
    /// `ValidationError::MissingTimeUnit` is returned before any monitor is created.
    pub fn monitor_with_timeout<P>(
        &self,
        max_wait: Option<u64>,
        unit: Option<TimeUnit>,
        poll: P,
        subjects: impl IntoIterator<Item = T>,
    ) -> MonitorResult<Vec<Arc<AsyncMonitor<T>>>>
    where
        P: PollFunction<T> + 'static,
    {
        let max_wait = resolve_max_wait(max_wait, unit)?;
        let monitors = self.create_monitors(poll, subjects);
        self.start_all(&monitors, max_wait)?;
        Ok(monitors)
    }

    /// Blocks until every subject's monitor reaches a terminal state.
    pub fn await_completion<P>(&self, poll: P, subjects: impl IntoIterator<Item = T>) -> MonitorResult<()>
    where
        P: PollFunction<T> + 'static,
    {
        self.await_completion_with_timeout(None, None, poll, subjects)
    }

    /// Like [`await_completion`](Self::await_completion), with a per-monitor timeout.
    ///
    /// A timed-out subject counts as terminal: the call still returns `Ok(())`
    /// and the timeout is only visible as a `Timeout` event on the bus.
    pub fn await_completion_with_timeout<P>(
        &self,
        max_wait: Option<u64>,
        unit: Option<TimeUnit>,
        poll: P,
        subjects: impl IntoIterator<Item = T>,
    ) -> MonitorResult<()>
    where
        P: PollFunction<T> + 'static,
    {
        let max_wait = resolve_max_wait(max_wait, unit)?;
        let monitors = self.create_monitors(poll, subjects);
        if monitors.is_empty() {
            return Ok(());
        }

        let (tx, rx) = bounded::<MonitorId>(monitors.len());
        let pending: HashSet<MonitorId> = monitors.iter().map(|m| m.id()).collect();
        let handler = Arc::new(BlockingHandler {
            pending: Mutex::new(pending.clone()),
            tx,
            bus: Arc::downgrade(&self.ctx.bus),
            own_id: OnceLock::new(),
        });

        // Registered before any monitor starts so no terminal event can be missed.
        let handler_id = self.ctx.bus.register_arc(handler.clone());
        let _ = handler.own_id.set(handler_id);

        if let Err(err) = self.start_all(&monitors, max_wait) {
            self.ctx.bus.unregister(handler_id);
            return Err(err);
        }

        tracing::debug!(monitors = monitors.len(), "awaiting completion");

        let check_every = self.ctx.polling_delay.max(MIN_LIVENESS_CHECK);
        let mut pending = pending;
        while !pending.is_empty() {
            match rx.recv_timeout(check_every) {
                Ok(id) => {
                    pending.remove(&id);
                }
                Err(RecvTimeoutError::Timeout) => {
                    // A monitor whose task was aborted by a panicking poll function never publishes.
                    for monitor in &monitors {
                        let id = monitor.id();
                        if pending.contains(&id) && !monitor.is_running() && !monitor.state().is_terminal() {
                            tracing::warn!(monitor_id = %id, "monitor task aborted without a terminal event");
                            pending.remove(&id);
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.ctx.bus.unregister(handler_id);
                    return Err(ExecutionError::Disconnected {
                        path: "await_completion".to_string(),
                    }
                    .into());
                }
            }
        }

        self.ctx.bus.unregister(handler_id);
        tracing::debug!(monitors = monitors.len(), "all monitors finished");
        Ok(())
    }

    fn create_monitors<P>(&self, poll: P, subjects: impl IntoIterator<Item = T>) -> Vec<Arc<AsyncMonitor<T>>>
    where
        P: PollFunction<T> + 'static,
    {
        let poll: Arc<dyn PollFunction<T>> = Arc::new(poll);
        subjects
            .into_iter()
            .map(|subject| AsyncMonitor::new(self.ctx.clone(), subject, Arc::clone(&poll)))
            .collect()
    }

    /// Starts every monitor; on failure, stops the ones already started.
    fn start_all(&self, monitors: &[Arc<AsyncMonitor<T>>], max_wait: Option<Duration>) -> MonitorResult<()> {
        for (idx, monitor) in monitors.iter().enumerate() {
            if let Err(err) = monitor.start(max_wait) {
                for started in &monitors[..idx] {
                    started.stop_monitoring();
                }
                tracing::warn!(error = %err, "failed to start monitors");
                return Err(err);
            }
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for MonitoringService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringService").field("ctx", &self.ctx).finish()
    }
}

/// Counts down the monitors of one `await_completion` call.
///
/// Unregisters itself from the bus once the last tracked monitor has reported.
struct BlockingHandler<T> {
    pending: Mutex<HashSet<MonitorId>>,
    tx: Sender<MonitorId>,
    bus: Weak<EventBus<MonitorEvent<T>>>,
    own_id: OnceLock<HandlerId>,
}

impl<T> EventHandler<MonitorEvent<T>> for BlockingHandler<T>
where
    T: Send + Sync,
{
    fn handle(&self, event: &MonitorEvent<T>) {
        let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !pending.remove(&event.monitor_id) {
            return;
        }
        let done = pending.is_empty();
        drop(pending);

        // Capacity equals the number of tracked monitors, so this never blocks.
        let _ = self.tx.send(event.monitor_id);

        if done {
            if let (Some(bus), Some(id)) = (self.bus.upgrade(), self.own_id.get()) {
                bus.unregister(*id);
            }
        }
    }
}
