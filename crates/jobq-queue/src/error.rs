//! Queue error types.

use jobq_core::{CoreError, JobState};
use jobq_store::{StoreError, TxError};
use std::time::Duration;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// MySQL error number for `ER_LOCK_WAIT_TIMEOUT`.
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    // ============ Configuration ============
    /// The queue has no due-time cache for this job type.
    #[error("Job type {job_type} is not configured for tenant {tenant}")]
    JobTypeNotConfigured { tenant: i32, job_type: i32 },

    // ============ Steady state ============
    /// Nothing is due. Poll again after `wait`.
    #[error("No job to run for tenant {tenant}, job type {job_type}; retry after {wait:?}")]
    NoJob {
        tenant: i32,
        job_type: i32,
        wait: Duration,
    },

    /// The earliest due time could not be determined yet.
    #[error("No due-time estimate for tenant {tenant}, job type {job_type}: {reason}")]
    DueTimeUnavailable {
        tenant: i32,
        job_type: i32,
        reason: String,
    },

    /// Another poller changed the row between select and update.
    #[error("Concurrent update of job {id}, poll again")]
    ConcurrentUpdate { id: String },

    /// The retry budget is exhausted.
    #[error("Do not retry anymore: attempt {attempt} exceeds {max_execution}")]
    NoMoreRetry { attempt: u32, max_execution: u32 },

    // ============ Failures ============
    /// No job row with this id.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job is not in the state the operation requires.
    #[error("Job {id} is {state}, expected {expected}")]
    UnexpectedState {
        id: String,
        state: JobState,
        expected: JobState,
    },

    /// Scheduling failed; carries the request for diagnostics.
    #[error("Failed to schedule {request}: {source}")]
    Schedule {
        request: String,
        #[source]
        source: Box<QueueError>,
    },

    /// A panic was caught inside a transactional block.
    #[error("Panic in {operation}: {message}")]
    Panicked {
        operation: &'static str,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transaction(#[from] TxError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Properties could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Returns true for the steady-state "nothing to do" signal.
    #[must_use]
    pub fn is_no_job(&self) -> bool {
        matches!(self, Self::NoJob { .. })
    }

    /// Suggested delay before calling again, if the error carries one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::NoJob { wait, .. } => Some(*wait),
            Self::ConcurrentUpdate { .. } => Some(Duration::ZERO),
            _ => None,
        }
    }

    /// Returns true if the same call may succeed when repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoJob { .. } | Self::ConcurrentUpdate { .. } | Self::DueTimeUnavailable { .. } => {
                true
            }
            Self::Database(e) => is_lock_wait_timeout(e),
            _ => false,
        }
    }

    /// Returns true if this is a MySQL lock wait timeout.
    #[must_use]
    pub fn is_lock_wait_timeout(&self) -> bool {
        match self {
            Self::Database(e) | Self::Transaction(TxError::Database(e)) => is_lock_wait_timeout(e),
            _ => false,
        }
    }
}

fn is_lock_wait_timeout(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>())
        .is_some_and(|e| e.number() == ER_LOCK_WAIT_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_job_carries_wait() {
        let err = QueueError::NoJob {
            tenant: 1,
            job_type: 2,
            wait: Duration::from_secs(10),
        };
        assert!(err.is_no_job());
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_concurrent_update_is_retryable() {
        let err = QueueError::ConcurrentUpdate {
            id: "01HX".to_string(),
        };
        assert!(!err.is_no_job());
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::ZERO));
    }

    #[test]
    fn test_configuration_error_is_fatal() {
        let err = QueueError::JobTypeNotConfigured {
            tenant: 0,
            job_type: 99,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after(), None);
        assert_eq!(
            err.to_string(),
            "Job type 99 is not configured for tenant 0"
        );
    }

    #[test]
    fn test_schedule_error_names_request() {
        let err = QueueError::Schedule {
            request: "ScheduleRequest{tenant=1}".to_string(),
            source: Box::new(QueueError::Database(sqlx::Error::PoolTimedOut)),
        };
        assert!(err.to_string().contains("ScheduleRequest{tenant=1}"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_non_database_errors_are_not_lock_waits() {
        assert!(!QueueError::Database(sqlx::Error::RowNotFound).is_lock_wait_timeout());
        assert!(!QueueError::JobNotFound("x".to_string()).is_lock_wait_timeout());
    }

    #[test]
    fn test_unexpected_state_display() {
        let err = QueueError::UnexpectedState {
            id: "01HX".to_string(),
            state: JobState::Failed,
            expected: JobState::Processing,
        };
        assert_eq!(err.to_string(), "Job 01HX is failed, expected processing");
        assert!(!err.is_retryable());
    }
}
