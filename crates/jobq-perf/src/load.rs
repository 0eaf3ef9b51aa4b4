//! Producer and consumer tasks.

use crate::settings::PerfSettings;
use chrono::Utc;
use jobq_queue::prelude::*;
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on a single consumer sleep, so shutdown stays responsive.
const MAX_IDLE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct Stats {
    pub scheduled: AtomicU64,
    pub claimed: AtomicU64,
    pub completed: AtomicU64,
    pub retried: AtomicU64,
    pub exhausted: AtomicU64,
    pub idle_polls: AtomicU64,
    pub errors: AtomicU64,
}

impl Stats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> [(&'static str, u64); 7] {
        [
            ("scheduled", self.scheduled.load(Ordering::Relaxed)),
            ("claimed", self.claimed.load(Ordering::Relaxed)),
            ("completed", self.completed.load(Ordering::Relaxed)),
            ("retried", self.retried.load(Ordering::Relaxed)),
            ("exhausted", self.exhausted.load(Ordering::Relaxed)),
            ("idle_polls", self.idle_polls.load(Ordering::Relaxed)),
            ("errors", self.errors.load(Ordering::Relaxed)),
        ]
    }
}

pub async fn produce(
    worker: usize,
    queue: Arc<MySqlQueue>,
    settings: Arc<PerfSettings>,
    stats: Arc<Stats>,
    stop: Arc<AtomicBool>,
) {
    let tenant = queue.config().tenant;
    let mut sequence = 0u64;

    while !stop.load(Ordering::Relaxed) {
        sequence += 1;
        let request = ScheduleRequest::new(tenant, settings.job_type, Utc::now())
            .with_remaining_execution(settings.remaining_execution)
            .with_correlation_id(format!("perf-{worker}-{sequence}"))
            .with_properties(json!({ "worker": worker, "sequence": sequence }));

        match queue.schedule(&request).await {
            Ok(_) => Stats::bump(&stats.scheduled),
            Err(e) => {
                warn!(worker, error = %e, "Schedule failed");
                Stats::bump(&stats.errors);
            }
        }
        tokio::time::sleep(settings.produce_interval()).await;
    }
    debug!(worker, "Producer stopped");
}

pub async fn consume(
    worker: usize,
    queue: Arc<MySqlQueue>,
    settings: Arc<PerfSettings>,
    stats: Arc<Stats>,
    stop: Arc<AtomicBool>,
) {
    let tenant = queue.config().tenant;
    let poll = PollRequest::new(tenant, settings.job_type);
    let backoff = FixedDelayBackoff::new(settings.retry_delay());

    while !stop.load(Ordering::Relaxed) {
        let job = match queue.poll(&poll).await {
            Ok(job) => job,
            Err(e) if e.is_retryable() => {
                Stats::bump(&stats.idle_polls);
                let wait = e.retry_after().unwrap_or(MAX_IDLE);
                tokio::time::sleep(wait.min(MAX_IDLE)).await;
                continue;
            }
            Err(e) => {
                warn!(worker, error = %e, "Poll failed");
                Stats::bump(&stats.errors);
                tokio::time::sleep(MAX_IDLE).await;
                continue;
            }
        };
        Stats::bump(&stats.claimed);

        let fail = rand::thread_rng().gen_bool(settings.failure_rate());
        let result = if fail {
            fail_job(&queue, &job.id, &backoff, &settings, &stats).await
        } else {
            queue.mark_job_completed(&job.id).await.map(|()| {
                Stats::bump(&stats.completed);
            })
        };

        if let Err(e) = result {
            warn!(worker, job_id = %job.id, error = %e, "Job bookkeeping failed");
            Stats::bump(&stats.errors);
        }
    }
    debug!(worker, "Consumer stopped");
}

async fn fail_job(
    queue: &MySqlQueue,
    id: &str,
    backoff: &dyn RetryBackoff,
    settings: &PerfSettings,
    stats: &Stats,
) -> QueueResult<()> {
    let details = queue.fetch_job_details(id).await?;
    let budget = u32::try_from(settings.remaining_execution.max(1)).unwrap_or(1);
    let left = u32::try_from(details.remaining_execution.max(0)).unwrap_or(0);
    let attempt = budget.saturating_sub(left);

    // Past the budget the queue marks the job exhausted on its own.
    let retry_at = backoff.retry_at(Utc::now(), attempt, budget).ok();
    let outcome = queue
        .mark_job_failed_and_schedule_retry(id, retry_at)
        .await?;

    if outcome.done {
        Stats::bump(&stats.retried);
    } else {
        Stats::bump(&stats.exhausted);
    }
    Ok(())
}
