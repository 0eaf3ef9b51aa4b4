//! Claiming due jobs.

use crate::metrics::{PollOutcome, QueueMetrics};
use crate::queue::{catch_panics, MySqlQueue};
use crate::request::{PollRequest, PollResponse};
use crate::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use jobq_core::{JobState, JobSubState};
use sqlx::MySqlConnection;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A poll looks up the due time at most this many times.
const CLAIM_ATTEMPTS: usize = 2;

impl MySqlQueue {
    pub(crate) async fn poll_job(&self, request: &PollRequest) -> QueueResult<PollResponse> {
        let started = Instant::now();
        let result = self.poll_due(request).await;

        let outcome = match &result {
            Ok(_) => PollOutcome::Claimed,
            Err(e) if e.is_no_job() => PollOutcome::NoJob,
            Err(_) => PollOutcome::Error,
        };
        QueueMetrics::poll_finished(request.job_type, outcome, started.elapsed());
        result
    }

    async fn poll_due(&self, request: &PollRequest) -> QueueResult<PollResponse> {
        let PollRequest { tenant, job_type } = *request;
        let cache = self.cache(tenant, job_type)?;

        for _ in 0..CLAIM_ATTEMPTS {
            let Some(due) = cache.resolve(self.source.as_ref()).await? else {
                return Err(self.no_job(request, self.config.no_job_wait()));
            };

            let now = Utc::now();
            if due > now {
                let wait = (due - now).to_std().unwrap_or(Duration::ZERO);
                return Err(self.no_job(request, wait));
            }

            if let Some(claimed) = self.claim_in_txn(request, due).await? {
                return Ok(claimed);
            }

            // Everything due at that second is taken; look again.
            cache.invalidate();
        }

        Err(self.no_job(request, self.config.no_job_wait()))
    }

    fn no_job(&self, request: &PollRequest, wait: Duration) -> QueueError {
        QueueError::NoJob {
            tenant: request.tenant,
            job_type: request.job_type,
            wait,
        }
    }

    async fn claim_in_txn(
        &self,
        request: &PollRequest,
        due: DateTime<Utc>,
    ) -> QueueResult<Option<PollResponse>> {
        let mut txn = self.pool.begin().await?;

        let claimed = catch_panics("poll", self.claim(&mut txn, request, due)).await;
        match claimed {
            Ok(claimed) => {
                txn.commit().await?;
                Ok(claimed)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Rollback of poll transaction failed");
                }
                Err(e)
            }
        }
    }

    async fn claim(
        &self,
        conn: &mut MySqlConnection,
        request: &PollRequest,
        due: DateTime<Utc>,
    ) -> QueueResult<Option<PollResponse>> {
        let part = self.config.partition_policy.partition_for(due);

        loop {
            let candidate: Option<(String, i32)> = sqlx::query_as(&self.queries.claim_candidate)
                .bind(due)
                .bind(request.tenant)
                .bind(request.job_type)
                .bind(JobState::Scheduled.code())
                .bind(part)
                .fetch_optional(&mut *conn)
                .await?;

            let Some((id, pending_execution)) = candidate else {
                return Ok(None);
            };

            if pending_execution <= 0 {
                warn!(
                    job_id = %id,
                    pending_execution,
                    "Scheduled job has no attempts left, marking it failed"
                );
                sqlx::query(&self.queries.update_state)
                    .bind(JobState::Failed.code())
                    .bind(JobSubState::NoRetryPendingError.code())
                    .bind(&id)
                    .bind(part)
                    .execute(&mut *conn)
                    .await?;
                QueueMetrics::job_failed(request.job_type, JobSubState::NoRetryPendingError.as_str());
                continue;
            }

            let updated = sqlx::query(&self.queries.claim)
                .bind(JobState::Processing.code())
                .bind(&id)
                .bind(part)
                .bind(JobState::Scheduled.code())
                .execute(&mut *conn)
                .await?;

            if updated.rows_affected() == 0 {
                return Err(QueueError::ConcurrentUpdate { id });
            }

            debug!(job_id = %id, job_type = request.job_type, process_at = %due, "Claimed job");
            return Ok(Some(PollResponse {
                id,
                part,
                process_at: due,
            }));
        }
    }
}
