//! Retry delay algorithms for workers.
//!
//! A worker that fails a job asks a [`RetryBackoff`] when the next attempt
//! should run and passes the result to
//! [`mark_job_failed_and_schedule_retry`](crate::JobQueue::mark_job_failed_and_schedule_retry).

use crate::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Computes the delay before the next attempt.
pub trait RetryBackoff: Send + Sync {
    /// Delay before attempt `attempt + 1`, or [`QueueError::NoMoreRetry`]
    /// once `attempt` exceeds `max_execution`.
    fn next_retry_after(&self, attempt: u32, max_execution: u32) -> QueueResult<Duration>;

    /// Absolute time of the next attempt.
    fn retry_at(
        &self,
        now: DateTime<Utc>,
        attempt: u32,
        max_execution: u32,
    ) -> QueueResult<DateTime<Utc>> {
        let delay = self.next_retry_after(attempt, max_execution)?;
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        Ok(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

fn check_budget(attempt: u32, max_execution: u32) -> QueueResult<()> {
    if attempt > max_execution {
        return Err(QueueError::NoMoreRetry {
            attempt,
            max_execution,
        });
    }
    Ok(())
}

/// Same delay before every attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayBackoff {
    pub delay: Duration,
}

impl FixedDelayBackoff {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryBackoff for FixedDelayBackoff {
    fn next_retry_after(&self, attempt: u32, max_execution: u32) -> QueueResult<Duration> {
        check_budget(attempt, max_execution)?;
        Ok(self.delay)
    }
}

/// Delay growing by `multiplier` per attempt, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialRetryBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for ExponentialRetryBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(3600),
            multiplier: 2.0,
        }
    }
}

impl RetryBackoff for ExponentialRetryBackoff {
    fn next_retry_after(&self, attempt: u32, max_execution: u32) -> QueueResult<Duration> {
        check_budget(attempt, max_execution)?;
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return Ok(self.max);
        }
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
