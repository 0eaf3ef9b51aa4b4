//! Queue metrics.
//!
//! Recorded through the `metrics` facade; install any recorder (Prometheus,
//! statsd, ...) in the host application to export them.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    pub const JOBS_SCHEDULED_TOTAL: &str = "jobq_jobs_scheduled_total";
    pub const SCHEDULE_LOCK_WAIT_RETRIES_TOTAL: &str = "jobq_schedule_lock_wait_retries_total";
    pub const POLLS_TOTAL: &str = "jobq_polls_total";
    pub const POLL_DURATION_SECONDS: &str = "jobq_poll_duration_seconds";
    pub const DUE_TIME_REFRESHES_TOTAL: &str = "jobq_due_time_refreshes_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "jobq_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "jobq_jobs_failed_total";
    pub const RETRIES_SCHEDULED_TOTAL: &str = "jobq_retries_scheduled_total";
    pub const PANICS_TOTAL: &str = "jobq_panics_total";
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SCHEDULED_TOTAL, "Total number of jobs scheduled");
    describe_counter!(
        names::SCHEDULE_LOCK_WAIT_RETRIES_TOTAL,
        "Schedule attempts retried after a lock wait timeout"
    );
    describe_counter!(names::POLLS_TOTAL, "Poll calls by outcome");
    describe_histogram!(names::POLL_DURATION_SECONDS, "Poll duration in seconds");
    describe_counter!(
        names::DUE_TIME_REFRESHES_TOTAL,
        "Due-time cache refreshes by result"
    );
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total number of jobs completed");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Jobs marked failed, by sub state");
    describe_counter!(names::RETRIES_SCHEDULED_TOTAL, "Retry rows scheduled");
    describe_counter!(names::PANICS_TOTAL, "Panics caught inside queue operations");
}

/// Poll outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Claimed,
    NoJob,
    Error,
}

impl PollOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::NoJob => "no_job",
            Self::Error => "error",
        }
    }
}

/// Queue metrics recorder.
#[derive(Clone)]
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn job_scheduled(job_type: i32) {
        counter!(names::JOBS_SCHEDULED_TOTAL, "job_type" => job_type.to_string()).increment(1);
    }

    pub fn lock_wait_retry(job_type: i32) {
        counter!(
            names::SCHEDULE_LOCK_WAIT_RETRIES_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    pub fn poll_finished(job_type: i32, outcome: PollOutcome, duration: Duration) {
        counter!(
            names::POLLS_TOTAL,
            "job_type" => job_type.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        histogram!(
            names::POLL_DURATION_SECONDS,
            "job_type" => job_type.to_string(),
            "outcome" => outcome.as_str()
        )
        .record(duration.as_secs_f64());
    }

    pub fn due_time_refreshed(job_type: i32, ok: bool) {
        counter!(
            names::DUE_TIME_REFRESHES_TOTAL,
            "job_type" => job_type.to_string(),
            "result" => if ok { "ok" } else { "error" }
        )
        .increment(1);
    }

    pub fn job_completed() {
        counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    }

    pub fn job_failed(job_type: i32, sub_state: &'static str) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "job_type" => job_type.to_string(),
            "sub_state" => sub_state
        )
        .increment(1);
    }

    pub fn retry_scheduled(job_type: i32) {
        counter!(names::RETRIES_SCHEDULED_TOTAL, "job_type" => job_type.to_string()).increment(1);
    }

    pub fn panic_caught(operation: &'static str) {
        counter!(names::PANICS_TOTAL, "operation" => operation).increment(1);
    }
}
