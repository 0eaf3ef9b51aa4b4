//! Scheduling.

use crate::metrics::QueueMetrics;
use crate::queue::{catch_panics, MySqlQueue};
use crate::request::ScheduleRequest;
use crate::{QueueError, QueueResult};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use jobq_config::LockRetryConfig;
use jobq_core::{truncate_to_second, IdGenerator, JobState, JobSubState};
use jobq_store::{begin, BeginOptions, MySqlTxHandle};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A schedule request with defaults applied.
struct NewJob<'a> {
    request: &'a ScheduleRequest,
    id: String,
    process_at: DateTime<Utc>,
    part: DateTime<Utc>,
    remaining_execution: i32,
    properties: Option<String>,
    retry_group: String,
}

impl MySqlQueue {
    /// Schedules `request`, joining `parent` when given.
    ///
    /// Lock wait timeouts are retried with exponential backoff, but only
    /// when the insert runs in its own transaction: inside a caller's
    /// transaction the caller decides.
    pub(crate) async fn schedule_job(
        &self,
        request: &ScheduleRequest,
        parent: Option<&MySqlTxHandle>,
        retry_group: Option<&str>,
    ) -> QueueResult<String> {
        let mut lock_retry = LockWaitRetry::new(&self.config.lock_retry, parent.is_some());
        loop {
            let err = match self.schedule_once(request, parent, retry_group).await {
                Ok(id) => return Ok(id),
                Err(e) => e,
            };
            let Some(delay) = lock_retry.next_delay(err.is_lock_wait_timeout()) else {
                return Err(schedule_failed(request, err));
            };
            warn!(
                attempt = lock_retry.attempt(),
                max_attempts = lock_retry.max_attempts,
                delay_ms = delay.as_millis(),
                job_type = request.job_type,
                "Lock wait timeout while scheduling, retrying"
            );
            QueueMetrics::lock_wait_retry(request.job_type);
            tokio::time::sleep(delay).await;
        }
    }

    async fn schedule_once(
        &self,
        request: &ScheduleRequest,
        parent: Option<&MySqlTxHandle>,
        retry_group: Option<&str>,
    ) -> QueueResult<String> {
        let job = self.prepare(request, retry_group)?;

        let handle = begin(
            &self.pool,
            parent,
            BeginOptions::new("schedule").continue_existing(),
        )
        .await?;

        let inserted = catch_panics("schedule", self.insert_job(&handle, &job)).await;
        match inserted {
            Ok(()) => {
                if let Err(e) = handle.commit().await {
                    rollback_quietly(&handle).await;
                    return Err(e.into());
                }
            }
            Err(e) => {
                rollback_quietly(&handle).await;
                return Err(e);
            }
        }

        QueueMetrics::job_scheduled(request.job_type);
        debug!(
            job_id = %job.id,
            tenant = request.tenant,
            job_type = request.job_type,
            process_at = %job.process_at,
            remaining_execution = job.remaining_execution,
            nested = parent.is_some(),
            "Scheduled job"
        );

        // A nested schedule is only visible once the caller commits.
        if parent.is_none() {
            if let Some(cache) = self.caches.get(&(request.tenant, request.job_type)) {
                cache.offer(job.process_at);
            }
        }

        Ok(job.id)
    }

    fn prepare<'a>(
        &self,
        request: &'a ScheduleRequest,
        retry_group: Option<&str>,
    ) -> QueueResult<NewJob<'a>> {
        let process_at = truncate_to_second(request.process_at);
        let properties = request
            .properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(NewJob {
            request,
            id: self.ids.generate(process_at)?,
            process_at,
            part: self.config.partition_policy.partition_for(process_at),
            remaining_execution: request.remaining_execution.max(1),
            properties,
            retry_group: retry_group.map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
        })
    }

    async fn insert_job(&self, handle: &MySqlTxHandle, job: &NewJob<'_>) -> QueueResult<()> {
        let request = job.request;
        let mut conn = handle.connection().await?;

        sqlx::query(&self.queries.insert_job_data)
            .bind(&job.id)
            .bind(request.tenant)
            .bind(&request.string_udf_1)
            .bind(&request.string_udf_2)
            .bind(request.int_udf_1)
            .bind(request.int_udf_2)
            .bind(&job.properties)
            .bind(&job.retry_group)
            .bind(job.part)
            .execute(&mut **conn)
            .await?;

        sqlx::query(&self.queries.insert_job)
            .bind(&job.id)
            .bind(request.tenant)
            .bind(&request.correlation_id)
            .bind(request.job_type)
            .bind(job.process_at)
            .bind(JobState::Scheduled.code())
            .bind(JobSubState::ScheduledOk.code())
            .bind(job.remaining_execution)
            .bind(job.part)
            .execute(&mut **conn)
            .await?;

        Ok(())
    }
}

fn schedule_failed(request: &ScheduleRequest, source: QueueError) -> QueueError {
    QueueError::Schedule {
        request: request.to_string(),
        source: Box::new(source),
    }
}

/// Decides whether a failed schedule attempt is tried again.
struct LockWaitRetry {
    backoff: ExponentialBackoff,
    max_interval: Duration,
    max_attempts: u32,
    failed: u32,
}

impl LockWaitRetry {
    fn new(config: &LockRetryConfig, nested: bool) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(config.initial_interval())
            .with_max_interval(config.max_interval())
            .with_multiplier(config.multiplier)
            .with_max_elapsed_time(None)
            .build();
        Self {
            backoff,
            max_interval: config.max_interval(),
            max_attempts: if nested { 1 } else { config.max_attempts.max(1) },
            failed: 0,
        }
    }

    /// Records a failed attempt and returns the delay before the next one,
    /// or `None` when the failure is final.
    fn next_delay(&mut self, lock_wait_timeout: bool) -> Option<Duration> {
        self.failed += 1;
        if !lock_wait_timeout || self.failed >= self.max_attempts {
            return None;
        }
        Some(self.backoff.next_backoff().unwrap_or(self.max_interval))
    }

    /// Number of the attempt that just failed.
    const fn attempt(&self) -> u32 {
        self.failed
    }
}

pub(crate) async fn rollback_quietly(handle: &MySqlTxHandle) {
    if let Err(e) = handle.rollback().await {
        warn!(txn = %handle.label(), error = %e, "Rollback failed");
    }
}
