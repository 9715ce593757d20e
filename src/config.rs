//! Monitoring configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, MonitorResult, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Delay between the end of one tick and the start of the next, in milliseconds.
    pub polling_delay_ms: u64,
    /// Worker threads of the shared scheduler.
    pub scheduler_threads: usize,
    /// Max due ticks queued for the workers before the timer thread waits.
    pub scheduler_queue_capacity: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            polling_delay_ms: 5_000,
            scheduler_threads: 4,
            scheduler_queue_capacity: 1024,
        }
    }
}

impl MonitoringConfig {
    #[must_use]
    pub const fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for a zero delay, thread count or capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let reason = if self.polling_delay_ms == 0 {
            "polling_delay_ms must be greater than zero"
        } else if self.scheduler_threads == 0 {
            "scheduler_threads must be greater than zero"
        } else if self.scheduler_queue_capacity == 0 {
            "scheduler_queue_capacity must be greater than zero"
        } else {
            return Ok(());
        };
        Err(ValidationError::InvalidConfig {
            reason: reason.to_string(),
        })
    }

    /// Parses and validates a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> MonitorResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid monitoring config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ExecutionError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }
}
