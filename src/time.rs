//! Time units and max-wait resolution.
//!
//! A max wait is given as a bare amount plus a [`TimeUnit`], the same way it
//! arrives from configuration or from provider glue. An amount without a unit
//! is rejected; no amount means "wait indefinitely" and needs no unit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Granularity of a max-wait amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Converts `amount` of this unit into a [`Duration`], saturating on overflow.
    #[must_use]
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            Self::Nanoseconds => Duration::from_nanos(amount),
            Self::Microseconds => Duration::from_micros(amount),
            Self::Milliseconds => Duration::from_millis(amount),
            Self::Seconds => Duration::from_secs(amount),
            Self::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            Self::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            Self::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

/// Resolves an optional `(amount, unit)` pair into an optional max wait.
///
/// # Errors
///
/// Returns `ValidationError::MissingTimeUnit` if `amount` is present but `unit` is not.
pub fn resolve_max_wait(amount: Option<u64>, unit: Option<TimeUnit>) -> Result<Option<Duration>, ValidationError> {
    match (amount, unit) {
        (None, _) => Ok(None),
        (Some(amount), None) => Err(ValidationError::MissingTimeUnit { amount }),
        (Some(amount), Some(unit)) => Ok(Some(unit.to_duration(amount))),
    }
}

/// Absolute deadline `now + max_wait`, clamped to the latest representable instant.
#[must_use]
pub fn deadline_after(now: DateTime<Utc>, max_wait: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_wait)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
