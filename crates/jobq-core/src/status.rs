//! Persisted job state codes.
//!
//! The integer values are stored in the `state` and `sub_state` columns and
//! must never change. A sub state code is `state * 10 + reason`.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Scheduled,
    Processing,
    Done,
    Failed,
}

impl JobState {
    /// Stored integer code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Scheduled => 1,
            Self::Processing => 2,
            Self::Done => 3,
            Self::Failed => 4,
        }
    }

    /// Returns true for states a job never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl TryFrom<i32> for JobState {
    type Error = CoreError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Scheduled),
            2 => Ok(Self::Processing),
            3 => Ok(Self::Done),
            4 => Ok(Self::Failed),
            other => Err(CoreError::UnknownState(other)),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reason code refining a [`JobState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobSubState {
    ScheduledOk,
    Done,
    DoneDueToCorrelatedJob,
    InternalError,
    ApplicationError,
    /// The attempt budget is exhausted.
    NoRetryPendingError,
    /// A successor row was scheduled in the same retry group.
    RetryPendingError,
    /// The caller declined to retry.
    RetryIgnoredByUserError,
}

impl JobSubState {
    /// Stored integer code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ScheduledOk => 10,
            Self::Done => 30,
            Self::DoneDueToCorrelatedJob => 31,
            Self::InternalError => 41,
            Self::ApplicationError => 42,
            Self::NoRetryPendingError => 43,
            Self::RetryPendingError => 44,
            Self::RetryIgnoredByUserError => 45,
        }
    }

    /// The state this reason belongs to.
    #[must_use]
    pub const fn state(self) -> JobState {
        match self {
            Self::ScheduledOk => JobState::Scheduled,
            Self::Done | Self::DoneDueToCorrelatedJob => JobState::Done,
            Self::InternalError
            | Self::ApplicationError
            | Self::NoRetryPendingError
            | Self::RetryPendingError
            | Self::RetryIgnoredByUserError => JobState::Failed,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScheduledOk => "scheduled_ok",
            Self::Done => "done",
            Self::DoneDueToCorrelatedJob => "done_due_to_correlated_job",
            Self::InternalError => "internal_error",
            Self::ApplicationError => "application_error",
            Self::NoRetryPendingError => "no_retry_pending",
            Self::RetryPendingError => "retry_pending",
            Self::RetryIgnoredByUserError => "retry_ignored_by_user",
        }
    }
}

impl TryFrom<i32> for JobSubState {
    type Error = CoreError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            10 => Ok(Self::ScheduledOk),
            30 => Ok(Self::Done),
            31 => Ok(Self::DoneDueToCorrelatedJob),
            41 => Ok(Self::InternalError),
            42 => Ok(Self::ApplicationError),
            43 => Ok(Self::NoRetryPendingError),
            44 => Ok(Self::RetryPendingError),
            45 => Ok(Self::RetryIgnoredByUserError),
            other => Err(CoreError::UnknownSubState(other)),
        }
    }
}

impl fmt::Display for JobSubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
