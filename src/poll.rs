//! Poll functions: the seam between the monitoring engine and provider glue.
//!
//! A poll function maps a subject to a [`MonitorStatus`]. Plain closures work
//! directly. [`TaskStatusPoller`] and [`StatePoller`] cover the two shapes
//! provider bindings need most: "has this async task finished" and "has this
//! resource reached the target state".

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

use crate::status::MonitorStatus;

/// Queries the remote system for the status of a subject.
///
/// Must not panic under normal operation. A panic escapes the tick and is
/// handled by the scheduler, which stops the monitor without publishing.
pub trait PollFunction<T>: Send + Sync {
    fn poll(&self, subject: &T) -> MonitorStatus;
}

impl<T, F> PollFunction<T> for F
where
    F: Fn(&T) -> MonitorStatus + Send + Sync,
{
    fn poll(&self, subject: &T) -> MonitorStatus {
        self(subject)
    }
}

/// Lifecycle of a remote asynchronous task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Pending,
    Started,
    FinishedSuccessfully,
    FinishedUnsuccessfully,
    Aborted,
    Cancelled,
    Unknown,
}

impl TaskState {
    /// Maps a task state onto the coarse monitor status.
    #[must_use]
    pub const fn monitor_status(self) -> MonitorStatus {
        match self {
            Self::FinishedSuccessfully => MonitorStatus::Done,
            Self::FinishedUnsuccessfully | Self::Aborted | Self::Cancelled => MonitorStatus::Failed,
            Self::Queued | Self::Pending | Self::Started | Self::Unknown => MonitorStatus::Continue,
        }
    }
}

/// Fetches the latest state of a remote task.
pub trait TaskSource<T>: Send + Sync {
    type Error: Display;

    fn refresh_state(&self, subject: &T) -> Result<TaskState, Self::Error>;
}

/// Poll function over a [`TaskSource`].
///
/// A failed refresh is logged and treated as `Continue`: a transient API
/// error must not mark the task as failed.
#[derive(Debug, Clone)]
pub struct TaskStatusPoller<S> {
    source: S,
}

impl<S> TaskStatusPoller<S> {
    pub const fn new(source: S) -> Self {
        Self { source }
    }
}

impl<T, S> PollFunction<T> for TaskStatusPoller<S>
where
    S: TaskSource<T>,
{
    fn poll(&self, subject: &T) -> MonitorStatus {
        match self.source.refresh_state(subject) {
            Ok(state) => state.monitor_status(),
            Err(err) => {
                tracing::warn!(error = %err, "task state refresh failed, will retry");
                MonitorStatus::Continue
            }
        }
    }
}

/// Waits for a resource to reach `target`, failing early on any state in `failures`.
///
/// `fetch` reads the current state of the subject. As with
/// [`TaskStatusPoller`], fetch errors are logged and polled again.
#[derive(Clone)]
pub struct StatePoller<S, F> {
    fetch: F,
    target: S,
    failures: Vec<S>,
}

impl<S, F> StatePoller<S, F> {
    pub fn new(target: S, fetch: F) -> Self {
        Self {
            fetch,
            target,
            failures: Vec::new(),
        }
    }

    /// Adds states that end the wait as `Failed`.
    #[must_use]
    pub fn failing_on(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.failures.extend(states);
        self
    }
}

impl<T, S, E, F> PollFunction<T> for StatePoller<S, F>
where
    S: PartialEq + Debug + Send + Sync,
    E: Display,
    F: Fn(&T) -> Result<S, E> + Send + Sync,
{
    fn poll(&self, subject: &T) -> MonitorStatus {
        match (self.fetch)(subject) {
            Ok(state) if state == self.target => MonitorStatus::Done,
            Ok(state) if self.failures.contains(&state) => {
                tracing::debug!(state = ?state, target = ?self.target, "resource entered a failure state");
                MonitorStatus::Failed
            }
            Ok(_) => MonitorStatus::Continue,
            Err(err) => {
                tracing::warn!(error = %err, "state fetch failed, will retry");
                MonitorStatus::Continue
            }
        }
    }
}

impl<S: Debug, F> Debug for StatePoller<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePoller")
            .field("target", &self.target)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}
