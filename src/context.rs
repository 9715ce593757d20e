//! Explicit dependencies shared by a monitoring service and its monitors.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::clock::{Clock, SystemClock};
use crate::event::MonitorEvent;
use crate::scheduler::Scheduler;

/// Scheduler, bus, clock and polling delay, passed in rather than looked up globally.
pub struct MonitoringContext<T> {
    pub scheduler: Arc<dyn Scheduler>,
    pub bus: Arc<EventBus<MonitorEvent<T>>>,
    pub clock: Arc<dyn Clock>,
    /// Delay between the end of one tick and the start of the next.
    pub polling_delay: Duration,
}

impl<T> MonitoringContext<T> {
    /// Context using the system clock.
    pub fn new(scheduler: Arc<dyn Scheduler>, bus: Arc<EventBus<MonitorEvent<T>>>, polling_delay: Duration) -> Self {
        Self {
            scheduler,
            bus,
            clock: Arc::new(SystemClock),
            polling_delay,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl<T> Clone for MonitoringContext<T> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
            polling_delay: self.polling_delay,
        }
    }
}

impl<T> std::fmt::Debug for MonitoringContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringContext")
            .field("bus", &self.bus)
            .field("polling_delay", &self.polling_delay)
            .finish_non_exhaustive()
    }
}
