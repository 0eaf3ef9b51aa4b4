//! Job queue abstraction and its MySQL implementation.

use crate::due_time::{spawn_refresher, DueTimeCache, DueTimeSource, MySqlDueTimeSource};
use crate::metrics::QueueMetrics;
use crate::queries::Queries;
use crate::request::{
    JobDataUpdate, JobDetails, PollRequest, PollResponse, RetryOutcome, ScheduleRequest,
};
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use jobq_config::QueueConfig;
use jobq_core::TimeBasedIdGenerator;
use jobq_store::{QueryRewriter, StoreBackend, TableNameQueryRewriter};
use sqlx::MySqlPool;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Durable delayed job queue.
///
/// Workers poll, run the job, then either complete it or fail it with an
/// optional retry time.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Stores a job and returns its id.
    async fn schedule(&self, request: &ScheduleRequest) -> QueueResult<String>;

    /// Claims the next due job.
    ///
    /// Returns [`QueueError::NoJob`] when nothing is due; its
    /// [`retry_after`](QueueError::retry_after) tells the caller how long
    /// to wait before polling again.
    async fn poll(&self, request: &PollRequest) -> QueueResult<PollResponse>;

    /// Reads everything stored about a job.
    async fn fetch_job_details(&self, id: &str) -> QueueResult<JobDetails>;

    /// Marks a claimed job as done.
    async fn mark_job_completed(&self, id: &str) -> QueueResult<()>;

    /// Marks a claimed job as failed and schedules a retry at `retry_at`
    /// if the job still has attempts left.
    ///
    /// `None` or the Unix epoch means the caller does not want a retry.
    async fn mark_job_failed_and_schedule_retry(
        &self,
        id: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<RetryOutcome>;

    /// Replaces the UDFs and properties of a job.
    async fn update_job_data(&self, id: &str, update: &JobDataUpdate) -> QueueResult<()>;
}

/// MySQL-backed [`JobQueue`].
///
/// Owns one due-time cache and one background refresher per configured job
/// type. Must be created inside a Tokio runtime.
pub struct MySqlQueue {
    pub(crate) pool: MySqlPool,
    pub(crate) config: QueueConfig,
    pub(crate) queries: Queries,
    pub(crate) ids: TimeBasedIdGenerator,
    pub(crate) caches: HashMap<(i32, i32), Arc<DueTimeCache>>,
    pub(crate) source: Arc<dyn DueTimeSource>,
    shutdown_tx: broadcast::Sender<()>,
    refreshers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl MySqlQueue {
    /// Creates a queue over an initialized store, using the configured
    /// table names.
    pub fn new(store: &dyn StoreBackend, config: QueueConfig) -> QueueResult<Self> {
        let rewriter = TableNameQueryRewriter::new(&config.naming);
        Ok(Self::with_rewriter(store.pool()?, config, &rewriter))
    }

    /// Creates a queue over a pool with a custom query rewriter.
    pub fn with_rewriter(
        pool: MySqlPool,
        config: QueueConfig,
        rewriter: &dyn QueryRewriter,
    ) -> Self {
        let queries = Queries::new(rewriter);
        let source: Arc<dyn DueTimeSource> = Arc::new(MySqlDueTimeSource::new(
            pool.clone(),
            queries.smallest_scheduled_id.clone(),
            config.due_time_lookup_timeout(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut caches = HashMap::new();
        let mut refreshers = Vec::new();
        for job_type in 1..=config.max_job_type {
            let (cache, stale_rx) = DueTimeCache::new(config.tenant, job_type);
            let cache = Arc::new(cache);
            refreshers.push(spawn_refresher(
                Arc::clone(&cache),
                Arc::clone(&source),
                stale_rx,
                shutdown_tx.subscribe(),
                config.due_time_refresh_interval(),
            ));
            caches.insert((config.tenant, job_type), cache);
        }

        info!(
            tenant = config.tenant,
            job_types = config.max_job_type,
            partition_policy = ?config.partition_policy,
            "Job queue started"
        );

        Self {
            pool,
            config,
            queries,
            ids: TimeBasedIdGenerator::new(),
            caches,
            source,
            shutdown_tx,
            refreshers: parking_lot::Mutex::new(refreshers),
        }
    }

    /// Queue configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) fn cache(&self, tenant: i32, job_type: i32) -> QueueResult<&Arc<DueTimeCache>> {
        self.caches
            .get(&(tenant, job_type))
            .ok_or(QueueError::JobTypeNotConfigured { tenant, job_type })
    }

    /// Stops the background refreshers and waits for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.refreshers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Due-time refresher task failed");
            }
        }
        info!(tenant = self.config.tenant, "Job queue stopped");
    }
}

impl Drop for MySqlQueue {
    fn drop(&mut self) {
        for handle in self.refreshers.get_mut().drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for MySqlQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlQueue")
            .field("tenant", &self.config.tenant)
            .field("max_job_type", &self.config.max_job_type)
            .field("partition_policy", &self.config.partition_policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobQueue for MySqlQueue {
    async fn schedule(&self, request: &ScheduleRequest) -> QueueResult<String> {
        self.schedule_job(request, None, None).await
    }

    async fn poll(&self, request: &PollRequest) -> QueueResult<PollResponse> {
        self.poll_job(request).await
    }

    async fn fetch_job_details(&self, id: &str) -> QueueResult<JobDetails> {
        self.load_job_details(id).await
    }

    async fn mark_job_completed(&self, id: &str) -> QueueResult<()> {
        self.complete_job(id).await
    }

    async fn mark_job_failed_and_schedule_retry(
        &self,
        id: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<RetryOutcome> {
        self.fail_job(id, retry_at).await
    }

    async fn update_job_data(&self, id: &str, update: &JobDataUpdate) -> QueueResult<()> {
        self.replace_job_data(id, update).await
    }
}

/// Runs `fut`, turning a panic into [`QueueError::Panicked`].
pub(crate) async fn catch_panics<T, F>(operation: &'static str, fut: F) -> QueueResult<T>
where
    F: Future<Output = QueueResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(operation, panic = %message, "Panic caught in queue operation");
            QueueMetrics::panic_caught(operation);
            Err(QueueError::Panicked { operation, message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
