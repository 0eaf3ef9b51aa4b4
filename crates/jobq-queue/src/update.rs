//! Job details, completion, failure with retry, and data updates.

use crate::metrics::QueueMetrics;
use crate::queue::{catch_panics, MySqlQueue};
use crate::request::{JobDataUpdate, JobDetails, RetryOutcome, ScheduleRequest};
use crate::schedule::rollback_quietly;
use crate::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use jobq_core::{record_id_to_time, truncate_to_second, JobState, JobSubState};
use jobq_store::{begin, BeginOptions};
use tracing::{debug, info};

#[derive(sqlx::FromRow)]
struct JobRow {
    tenant: i32,
    job_type: i32,
    state: i32,
    sub_state: i32,
    correlation_id: Option<String>,
    pending_execution: i32,
}

#[derive(sqlx::FromRow)]
struct JobDataRow {
    properties: Option<String>,
    udf_string_1: Option<String>,
    udf_string_2: Option<String>,
    udf_int_1: Option<i64>,
    udf_int_2: Option<i64>,
    retry_group: String,
}

impl MySqlQueue {
    pub(crate) async fn load_job_details(&self, id: &str) -> QueueResult<JobDetails> {
        let part = self.config.partition_policy.partition_for_id(id)?;
        let process_at = record_id_to_time(id)?;

        let job: JobRow = sqlx::query_as(&self.queries.fetch_job)
            .bind(id)
            .bind(part)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        let data: JobDataRow = sqlx::query_as(&self.queries.fetch_job_data)
            .bind(id)
            .bind(part)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        let properties = data
            .properties
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(JobDetails {
            id: id.to_string(),
            tenant: job.tenant,
            job_type: job.job_type,
            state: JobState::try_from(job.state)?,
            sub_state: JobSubState::try_from(job.sub_state)?,
            correlation_id: job.correlation_id,
            remaining_execution: job.pending_execution,
            process_at,
            part,
            string_udf_1: data.udf_string_1,
            string_udf_2: data.udf_string_2,
            int_udf_1: data.udf_int_1,
            int_udf_2: data.udf_int_2,
            properties,
            retry_group: data.retry_group,
        })
    }

    pub(crate) async fn complete_job(&self, id: &str) -> QueueResult<()> {
        let part = self.config.partition_policy.partition_for_id(id)?;
        self.set_state(id, part, JobSubState::Done).await?;
        QueueMetrics::job_completed();
        debug!(job_id = %id, "Completed job");
        Ok(())
    }

    pub(crate) async fn fail_job(
        &self,
        id: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<RetryOutcome> {
        let details = self.load_job_details(id).await?;
        if details.state != JobState::Processing {
            return Err(QueueError::UnexpectedState {
                id: details.id,
                state: details.state,
                expected: JobState::Processing,
            });
        }

        if details.remaining_execution <= 0 {
            self.finish_failed(&details, JobSubState::NoRetryPendingError)
                .await?;
            return Ok(RetryOutcome::not_scheduled());
        }

        let Some(retry_at) = retry_at.filter(|at| at.timestamp_millis() != 0) else {
            self.finish_failed(&details, JobSubState::RetryIgnoredByUserError)
                .await?;
            return Ok(RetryOutcome::not_scheduled());
        };

        let retry = ScheduleRequest {
            tenant: details.tenant,
            job_type: details.job_type,
            process_at: retry_at,
            remaining_execution: details.remaining_execution,
            correlation_id: details.correlation_id.clone(),
            string_udf_1: details.string_udf_1.clone(),
            string_udf_2: details.string_udf_2.clone(),
            int_udf_1: details.int_udf_1,
            int_udf_2: details.int_udf_2,
            properties: details.properties.clone(),
        };

        let root = begin(&self.pool, None, BeginOptions::new("fail-and-retry")).await?;

        let scheduled = catch_panics("mark_job_failed_and_schedule_retry", async {
            // Leave Processing first; the row lock orders competing callers.
            let failed = {
                let mut conn = root.connection().await?;
                sqlx::query(&self.queries.finish_processing)
                    .bind(JobState::Failed.code())
                    .bind(JobSubState::RetryPendingError.code())
                    .bind(id)
                    .bind(details.part)
                    .bind(JobState::Processing.code())
                    .execute(&mut **conn)
                    .await?
            };
            if failed.rows_affected() == 0 {
                return Err(QueueError::ConcurrentUpdate { id: id.to_string() });
            }

            self.schedule_job(&retry, Some(&root), Some(&details.retry_group))
                .await
        })
        .await;

        let retry_id = match scheduled {
            Ok(retry_id) => retry_id,
            Err(e) => {
                rollback_quietly(&root).await;
                return Err(e);
            }
        };
        if let Err(e) = root.commit().await {
            rollback_quietly(&root).await;
            return Err(e.into());
        }

        if let Some(cache) = self.caches.get(&(details.tenant, details.job_type)) {
            cache.offer(truncate_to_second(retry_at));
        }
        QueueMetrics::job_failed(details.job_type, JobSubState::RetryPendingError.as_str());
        QueueMetrics::retry_scheduled(details.job_type);
        info!(
            job_id = %id,
            retry_id = %retry_id,
            retry_at = %retry_at,
            remaining_execution = details.remaining_execution,
            "Job failed, retry scheduled"
        );

        Ok(RetryOutcome::scheduled(retry_id))
    }

    async fn finish_failed(&self, details: &JobDetails, sub_state: JobSubState) -> QueueResult<()> {
        self.set_state(&details.id, details.part, sub_state).await?;
        QueueMetrics::job_failed(details.job_type, sub_state.as_str());
        info!(
            job_id = %details.id,
            sub_state = sub_state.as_str(),
            "Job failed without retry"
        );
        Ok(())
    }

    async fn set_state(
        &self,
        id: &str,
        part: DateTime<Utc>,
        sub_state: JobSubState,
    ) -> QueueResult<()> {
        let updated = sqlx::query(&self.queries.update_state)
            .bind(sub_state.state().code())
            .bind(sub_state.code())
            .bind(id)
            .bind(part)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            self.ensure_exists(&self.queries.exists_job, id, part).await?;
        }
        Ok(())
    }

    pub(crate) async fn replace_job_data(
        &self,
        id: &str,
        update: &JobDataUpdate,
    ) -> QueueResult<()> {
        let part = self.config.partition_policy.partition_for_id(id)?;
        let properties = update
            .properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let updated = sqlx::query(&self.queries.update_job_data)
            .bind(&update.string_udf_1)
            .bind(&update.string_udf_2)
            .bind(update.int_udf_1)
            .bind(update.int_udf_2)
            .bind(&properties)
            .bind(id)
            .bind(part)
            .execute(&self.pool)
            .await?;

        // Zero affected rows may also mean the values were already current.
        if updated.rows_affected() == 0 {
            self.ensure_exists(&self.queries.exists_job_data, id, part)
                .await?;
        }
        debug!(job_id = %id, "Updated job data");
        Ok(())
    }

    async fn ensure_exists(&self, query: &str, id: &str, part: DateTime<Utc>) -> QueueResult<()> {
        sqlx::query(query)
            .bind(id)
            .bind(part)
            .fetch_optional(&self.pool)
            .await?
            .map(|_| ())
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }
}
