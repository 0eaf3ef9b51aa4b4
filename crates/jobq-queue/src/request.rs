//! Request and response types of the queue API.

use chrono::{DateTime, Utc};
use jobq_core::{JobState, JobSubState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A job to schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub tenant: i32,
    pub job_type: i32,
    /// Earliest claim time; truncated to the second when stored.
    pub process_at: DateTime<Utc>,
    /// Attempt budget. Values below 1 are treated as 1.
    pub remaining_execution: i32,
    pub correlation_id: Option<String>,
    pub string_udf_1: Option<String>,
    pub string_udf_2: Option<String>,
    pub int_udf_1: Option<i64>,
    pub int_udf_2: Option<i64>,
    /// Caller-opaque payload, stored as JSON text.
    pub properties: Option<Value>,
}

impl ScheduleRequest {
    /// Creates a single-attempt request.
    #[must_use]
    pub fn new(tenant: i32, job_type: i32, process_at: DateTime<Utc>) -> Self {
        Self {
            tenant,
            job_type,
            process_at,
            remaining_execution: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_remaining_execution(mut self, remaining_execution: i32) -> Self {
        self.remaining_execution = remaining_execution;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_string_udfs(mut self, first: Option<String>, second: Option<String>) -> Self {
        self.string_udf_1 = first;
        self.string_udf_2 = second;
        self
    }

    #[must_use]
    pub fn with_int_udfs(mut self, first: Option<i64>, second: Option<i64>) -> Self {
        self.int_udf_1 = first;
        self.int_udf_2 = second;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

impl fmt::Display for ScheduleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScheduleRequest{{tenant={}, job_type={}, process_at={}, remaining_execution={}, correlation_id={:?}}}",
            self.tenant,
            self.job_type,
            self.process_at.to_rfc3339(),
            self.remaining_execution,
            self.correlation_id
        )
    }
}

/// Which queue to claim from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    pub tenant: i32,
    pub job_type: i32,
}

impl PollRequest {
    #[must_use]
    pub const fn new(tenant: i32, job_type: i32) -> Self {
        Self { tenant, job_type }
    }
}

/// A claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub id: String,
    /// Partition key of the claimed row.
    pub part: DateTime<Utc>,
    /// Due time the claim was made against.
    pub process_at: DateTime<Utc>,
}

/// Everything stored about a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    pub id: String,
    pub tenant: i32,
    pub job_type: i32,
    pub state: JobState,
    pub sub_state: JobSubState,
    pub correlation_id: Option<String>,
    /// Attempts left after the current claim.
    pub remaining_execution: i32,
    pub process_at: DateTime<Utc>,
    pub part: DateTime<Utc>,
    pub string_udf_1: Option<String>,
    pub string_udf_2: Option<String>,
    pub int_udf_1: Option<i64>,
    pub int_udf_2: Option<i64>,
    pub properties: Option<Value>,
    /// Shared by a job and all of its retries.
    pub retry_group: String,
}

/// Result of [`mark_job_failed_and_schedule_retry`](crate::JobQueue::mark_job_failed_and_schedule_retry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    /// Id of the newly scheduled retry.
    pub retry_id: Option<String>,
    /// True when a retry row was scheduled.
    pub done: bool,
}

impl RetryOutcome {
    pub(crate) fn scheduled(retry_id: String) -> Self {
        Self {
            retry_id: Some(retry_id),
            done: true,
        }
    }

    pub(crate) const fn not_scheduled() -> Self {
        Self {
            retry_id: None,
            done: false,
        }
    }
}

/// Replacement values for the caller-visible job data.
///
/// Every field is written; `None` clears the column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDataUpdate {
    pub string_udf_1: Option<String>,
    pub string_udf_2: Option<String>,
    pub int_udf_1: Option<i64>,
    pub int_udf_2: Option<i64>,
    pub properties: Option<Value>,
}

impl From<&JobDetails> for JobDataUpdate {
    fn from(details: &JobDetails) -> Self {
        Self {
            string_udf_1: details.string_udf_1.clone(),
            string_udf_2: details.string_udf_2.clone(),
            int_udf_1: details.int_udf_1,
            int_udf_2: details.int_udf_2,
            properties: details.properties.clone(),
        }
    }
}
