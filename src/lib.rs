//! # taskmon - polling monitors for long-running remote operations
//!
//! Cloud control-plane APIs answer provisioning calls with a task or a
//! resource in a transitional state. taskmon watches such subjects by
//! polling them on a shared scheduler until they finish, fail or time out,
//! and reports each outcome as a [`MonitorEvent`] on a synchronous
//! [`EventBus`].
//!
//! ## Core Concepts
//!
//! - **Poll function**: maps a subject to [`MonitorStatus`] (`Done`, `Failed`, `Continue`)
//! - **Monitor**: one recurring poll of one subject, with an optional deadline
//! - **MonitoringService**: starts monitors for many subjects, fire-and-forget or blocking
//! - **Scheduler**: the thread pool (or a manual fake) every monitor ticks on
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskmon::{EventBus, MonitorEvent, MonitorStatus, MonitoringConfig, MonitoringService, TimeUnit};
//!
//! # fn main() -> taskmon::error::MonitorResult<()> {
//! let bus = Arc::new(EventBus::<MonitorEvent<String>>::new());
//! bus.register(|event: &MonitorEvent<String>| println!("{} -> {:?}", event.subject, event.event_type));
//!
//! let service = MonitoringService::from_config(&MonitoringConfig::default(), bus)?;
//!
//! // Blocks until both servers are active, failed, or ten minutes have passed.
//! service.await_completion_with_timeout(
//!     Some(10),
//!     Some(TimeUnit::Minutes),
//!     |server: &String| if server.is_empty() { MonitorStatus::Failed } else { MonitorStatus::Done },
//!     vec!["web-1".to_string(), "web-2".to_string()],
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod monitor;
pub mod poll;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod time;

pub use bus::{EventBus, EventHandler, HandlerId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MonitoringConfig;
pub use context::MonitoringContext;
pub use error::{ExecutionError, MonitorError, MonitorResult, ValidationError};
pub use event::{MonitorEvent, MonitorEventType, MonitorId};
pub use monitor::{AsyncMonitor, MonitorState};
pub use poll::{PollFunction, StatePoller, TaskSource, TaskState, TaskStatusPoller};
pub use scheduler::{ManualScheduler, ScheduledHandle, Scheduler, ThreadPoolScheduler};
pub use service::MonitoringService;
pub use status::MonitorStatus;
pub use time::TimeUnit;
