//! # Jobq Queue
//!
//! A durable delayed job queue on MySQL. Jobs are rows; workers claim them
//! with `SELECT ... FOR UPDATE SKIP LOCKED` once they are due, and failed
//! jobs are retried by scheduling a new row in the same retry group.
//!
//! ## Lifecycle
//!
//! ```text
//!  schedule ──► Scheduled ──poll──► Processing ──► Done
//!                   ▲                    │
//!                   │                    ▼
//!                   └── new row ◄─── Failed (RetryPending)
//!                                        │
//!                                        ▼
//!                      Failed (NoRetryPending | RetryIgnoredByUser)
//! ```
//!
//! ## Polling
//!
//! Each configured job type has a [`DueTimeCache`] holding the earliest
//! scheduled due time, decoded from `MIN(id)`. A poll reads the cache and:
//!
//! - returns [`QueueError::NoJob`] with the time left if the job is not due;
//! - otherwise claims one row due at exactly that second, in its own
//!   transaction;
//! - if no such row is left, invalidates the cache and tries once more.
//!
//! ## Example
//!
//! ```rust,ignore
//! use jobq_queue::prelude::*;
//!
//! let queue = MySqlQueue::new(&store, config.queue)?;
//! let id = queue
//!     .schedule(&ScheduleRequest::new(0, 1, Utc::now()).with_remaining_execution(3))
//!     .await?;
//!
//! match queue.poll(&PollRequest::new(0, 1)).await {
//!     Ok(job) => queue.mark_job_completed(&job.id).await?,
//!     Err(e) if e.is_no_job() => tokio::time::sleep(e.retry_after().unwrap_or_default()).await,
//!     Err(e) => return Err(e.into()),
//! }
//! ```

pub mod due_time;
pub mod error;
pub mod metrics;
mod poll;
mod queries;
pub mod queue;
pub mod request;
pub mod retry;
mod schedule;
mod update;

pub use due_time::{DueTimeCache, DueTimeSource, MySqlDueTimeSource};
pub use error::{QueueError, QueueResult};
pub use metrics::{register_metrics, QueueMetrics};
pub use queue::{JobQueue, MySqlQueue};
pub use request::{
    JobDataUpdate, JobDetails, PollRequest, PollResponse, RetryOutcome, ScheduleRequest,
};
pub use retry::{ExponentialRetryBackoff, FixedDelayBackoff, RetryBackoff};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::queue::{JobQueue, MySqlQueue};
    pub use crate::request::{
        JobDataUpdate, JobDetails, PollRequest, PollResponse, RetryOutcome, ScheduleRequest,
    };
    pub use crate::retry::{ExponentialRetryBackoff, FixedDelayBackoff, RetryBackoff};
    pub use chrono::{DateTime, Utc};
    pub use jobq_core::{JobState, JobSubState};
}
