//! Coarse status reported by a poll function on every tick.

use serde::{Deserialize, Serialize};

/// Result of one poll of a monitored subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// The remote operation finished successfully.
    Done,
    /// The remote operation finished with an error.
    Failed,
    /// Still in progress; poll again on the next tick.
    Continue,
}

impl MonitorStatus {
    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Continue => "continue",
        };
        f.write_str(s)
    }
}
