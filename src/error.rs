//! Error types for taskmon.
//!
//! Only caller mistakes and infrastructure failures are errors. A remote
//! operation that fails or times out is reported as a [`MonitorEvent`] and
//! never surfaces here.
//!
//! [`MonitorEvent`]: crate::event::MonitorEvent

use thiserror::Error;

use crate::event::MonitorId;

/// Validation errors raised before any monitor is scheduled.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("time unit must not be missing when using timeouts (max wait: {amount})")]
    MissingTimeUnit {
        amount: u64,
    },

    #[error("Monitor {id} has already been started")]
    AlreadyStarted {
        id: MonitorId,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised by the scheduling and waiting machinery.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Scheduler has been shut down")]
    SchedulerShutdown,

    #[error("Failed to spawn scheduler thread '{name}': {message}")]
    ThreadSpawn {
        name: String,
        message: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Failed to read configuration: {message}")]
    Config {
        message: String,
    },
}

/// Top-level error type for taskmon.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl MonitorError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

/// Result type alias for taskmon operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_time_unit_message() {
        let err = ValidationError::MissingTimeUnit { amount: 100 };
        let msg = format!("{err}");
        assert!(msg.contains("time unit must not be missing"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_already_started_message() {
        let id = MonitorId::new();
        let err = ValidationError::AlreadyStarted { id };
        assert!(format!("{err}").contains(&id.to_string()));
    }

    #[test]
    fn test_execution_error_thread_spawn() {
        let err = ExecutionError::ThreadSpawn {
            name: "taskmon-worker-0".to_string(),
            message: "resource temporarily unavailable".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("taskmon-worker-0"));
        assert!(msg.contains("resource temporarily unavailable"));
    }

    #[test]
    fn test_monitor_error_from_validation() {
        let err: MonitorError = ValidationError::InvalidConfig {
            reason: "zero threads".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_execution());
    }

    #[test]
    fn test_monitor_error_from_execution() {
        let err: MonitorError = ExecutionError::SchedulerShutdown.into();
        assert!(err.is_execution());
        assert!(format!("{err}").contains("shut down"));
    }
}
