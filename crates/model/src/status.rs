use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Workload status of a unit, as reported to operators.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    /// Nothing has been reported yet.
    #[default]
    Unknown,

    /// The charm is doing work that does not require operator attention.
    Maintenance,

    /// The charm needs operator input to make progress.
    Blocked,

    /// The charm is waiting on something outside its control.
    Waiting,

    /// The workload is running.
    Active,

    /// A hook failed; set by the agent only.
    Error,
}

impl WorkloadStatus {
    /// Whether a hook may set this status through `status-set`.
    #[must_use]
    pub const fn is_settable(self) -> bool {
        matches!(
            self,
            Self::Maintenance | Self::Blocked | Self::Waiting | Self::Active
        )
    }

    /// The lowercase name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Maintenance => "maintenance",
            Self::Blocked => "blocked",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadStatus {
    type Err = ParseError;

    /// Parses only the statuses a hook may set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maintenance" => Ok(Self::Maintenance),
            "blocked" => Ok(Self::Blocked),
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            other => Err(ParseError::WorkloadStatus(other.to_string())),
        }
    }
}

/// A workload status with its message.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// The status value.
    pub status: WorkloadStatus,

    /// Free-form message shown alongside the status.
    #[serde(default)]
    pub message: String,
}

impl StatusInfo {
    /// Creates a status with a message.
    pub fn new(status: WorkloadStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// What the agent itself is doing, independent of the workload.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting for something to do.
    #[default]
    Idle,

    /// Running a hook.
    Executing,

    /// A hook failed and awaits resolution.
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Error => "error",
        })
    }
}
