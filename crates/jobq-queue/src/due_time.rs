//! Per job type cache of the earliest scheduled due time.
//!
//! Ids are time-prefixed, so `MIN(id)` over scheduled rows yields the
//! earliest `process_at` without scanning. The cache answers polls from
//! memory and is refreshed lazily (a poll that finds nothing invalidates it)
//! and periodically by a background task.

use crate::metrics::QueueMetrics;
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobq_core::{record_id_to_time, JobState};
use parking_lot::RwLock;
use sqlx::MySqlPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Looks up the smallest scheduled id of a job type.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DueTimeSource: Send + Sync {
    async fn smallest_scheduled_id(&self, tenant: i32, job_type: i32)
        -> QueueResult<Option<String>>;
}

/// `MIN(id)` lookup against MySQL, bounded by a timeout.
pub struct MySqlDueTimeSource {
    pool: MySqlPool,
    query: String,
    timeout: Duration,
}

impl MySqlDueTimeSource {
    #[must_use]
    pub fn new(pool: MySqlPool, query: String, timeout: Duration) -> Self {
        Self {
            pool,
            query,
            timeout,
        }
    }
}

#[async_trait]
impl DueTimeSource for MySqlDueTimeSource {
    async fn smallest_scheduled_id(
        &self,
        tenant: i32,
        job_type: i32,
    ) -> QueueResult<Option<String>> {
        let lookup = sqlx::query_scalar::<_, Option<String>>(&self.query)
            .bind(tenant)
            .bind(JobState::Scheduled.code())
            .bind(job_type)
            .fetch_one(&self.pool);

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(QueueError::DueTimeUnavailable {
                tenant,
                job_type,
                reason: format!("lookup timed out after {:?}", self.timeout),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Estimate {
    Unknown,
    Empty,
    At(DateTime<Utc>),
}

impl Estimate {
    const fn known(self) -> Option<Option<DateTime<Utc>>> {
        match self {
            Self::Unknown => None,
            Self::Empty => Some(None),
            Self::At(at) => Some(Some(at)),
        }
    }
}

/// Earliest due time of one `(tenant, job_type)`.
pub struct DueTimeCache {
    tenant: i32,
    job_type: i32,
    estimate: RwLock<Estimate>,
    generation: AtomicU64,
    refresh_gate: Mutex<()>,
    stale_tx: mpsc::Sender<()>,
}

impl DueTimeCache {
    /// Creates an empty cache and the receiving end of its stale signal.
    #[must_use]
    pub fn new(tenant: i32, job_type: i32) -> (Self, mpsc::Receiver<()>) {
        let (stale_tx, stale_rx) = mpsc::channel(1);
        let cache = Self {
            tenant,
            job_type,
            estimate: RwLock::new(Estimate::Unknown),
            generation: AtomicU64::new(0),
            refresh_gate: Mutex::new(()),
            stale_tx,
        };
        (cache, stale_rx)
    }

    #[must_use]
    pub fn tenant(&self) -> i32 {
        self.tenant
    }

    #[must_use]
    pub fn job_type(&self) -> i32 {
        self.job_type
    }

    /// Cached value: `None` if unknown, `Some(None)` if nothing is scheduled.
    #[must_use]
    pub fn current(&self) -> Option<Option<DateTime<Utc>>> {
        self.estimate.read().known()
    }

    /// Returns the cached due time, refreshing it first if unknown.
    pub async fn resolve(
        &self,
        source: &dyn DueTimeSource,
    ) -> QueueResult<Option<DateTime<Utc>>> {
        let observed = self.generation.load(Ordering::Acquire);
        if let Some(known) = self.current() {
            return Ok(known);
        }
        self.refresh_after(source, Some(observed)).await
    }

    /// Re-reads the due time from the store unconditionally.
    pub async fn refresh(&self, source: &dyn DueTimeSource) -> QueueResult<Option<DateTime<Utc>>> {
        self.refresh_after(source, None).await
    }

    async fn refresh_after(
        &self,
        source: &dyn DueTimeSource,
        observed: Option<u64>,
    ) -> QueueResult<Option<DateTime<Utc>>> {
        let _gate = self.refresh_gate.lock().await;

        // Another caller refreshed while this one waited for the gate.
        if let Some(observed) = observed {
            if self.generation.load(Ordering::Acquire) != observed {
                if let Some(known) = self.current() {
                    return Ok(known);
                }
            }
        }

        let looked_up = self.look_up(source).await;
        QueueMetrics::due_time_refreshed(self.job_type, looked_up.is_ok());
        let estimate = looked_up?;

        *self.estimate.write() = estimate;
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(
            tenant = self.tenant,
            job_type = self.job_type,
            estimate = ?estimate,
            "Refreshed due time"
        );
        Ok(estimate.known().flatten())
    }

    async fn look_up(&self, source: &dyn DueTimeSource) -> QueueResult<Estimate> {
        let unavailable = |reason: String| QueueError::DueTimeUnavailable {
            tenant: self.tenant,
            job_type: self.job_type,
            reason,
        };

        match source.smallest_scheduled_id(self.tenant, self.job_type).await {
            Ok(Some(id)) => record_id_to_time(&id)
                .map(Estimate::At)
                .map_err(|e| unavailable(e.to_string())),
            Ok(None) => Ok(Estimate::Empty),
            Err(e @ QueueError::DueTimeUnavailable { .. }) => Err(e),
            Err(e) => Err(unavailable(e.to_string())),
        }
    }

    /// Forgets the cached value and asks the refresher for a new one.
    pub fn invalidate(&self) {
        *self.estimate.write() = Estimate::Unknown;
        self.generation.fetch_add(1, Ordering::AcqRel);
        // Full channel means a refresh is already pending.
        let _ = self.stale_tx.try_send(());
    }

    /// Lowers the cached due time after a local schedule.
    pub fn offer(&self, process_at: DateTime<Utc>) {
        let mut estimate = self.estimate.write();
        match *estimate {
            Estimate::At(current) if current <= process_at => {}
            Estimate::Unknown => {}
            Estimate::At(_) | Estimate::Empty => *estimate = Estimate::At(process_at),
        }
    }
}

impl std::fmt::Debug for DueTimeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DueTimeCache")
            .field("tenant", &self.tenant)
            .field("job_type", &self.job_type)
            .field("estimate", &*self.estimate.read())
            .finish_non_exhaustive()
    }
}

/// Keeps a cache fresh until shutdown.
///
/// Refreshes on start, on every stale signal (if still unknown) and on
/// every `period` tick.
pub fn spawn_refresher(
    cache: Arc<DueTimeCache>,
    source: Arc<dyn DueTimeSource>,
    mut stale_rx: mpsc::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            tenant = cache.tenant,
            job_type = cache.job_type,
            "Due-time refresher started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                Some(()) = stale_rx.recv() => {
                    if let Err(e) = cache.resolve(source.as_ref()).await {
                        warn!(job_type = cache.job_type, error = %e, "Due-time refresh failed");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = cache.refresh(source.as_ref()).await {
                        warn!(job_type = cache.job_type, error = %e, "Periodic due-time refresh failed");
                    }
                }
            }
        }

        debug!(
            tenant = cache.tenant,
            job_type = cache.job_type,
            "Due-time refresher stopped"
        );
    })
}
