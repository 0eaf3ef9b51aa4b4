//! Integration tests for MySqlQueue.
//!
//! These tests run against a real MySQL database using testcontainers.
//! Requires Docker to be available on the system.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{expect_no_job, poll_until_claimed, TestDatabase};
use jobq_core::{IdGenerator, JobState, JobSubState, TimeBasedIdGenerator};
use jobq_queue::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const TENANT: i32 = 0;

fn due_now(job_type: i32) -> ScheduleRequest {
    ScheduleRequest::new(TENANT, job_type, Utc::now() - ChronoDuration::seconds(1))
}

#[tokio::test]
async fn test_schedule_and_fetch_details() {
    let db = TestDatabase::new().await;
    let queue = db.queue();

    let request = due_now(1)
        .with_remaining_execution(3)
        .with_correlation_id("order-42")
        .with_string_udfs(Some("customer-7".to_string()), None)
        .with_int_udfs(Some(99), None)
        .with_properties(json!({"sku": "A-1", "qty": 2}));

    let id = queue.schedule(&request).await.expect("Failed to schedule");
    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");

    assert_eq!(details.id, id);
    assert_eq!(details.tenant, TENANT);
    assert_eq!(details.job_type, 1);
    assert_eq!(details.state, JobState::Scheduled);
    assert_eq!(details.sub_state, JobSubState::ScheduledOk);
    assert_eq!(details.remaining_execution, 3);
    assert_eq!(details.correlation_id.as_deref(), Some("order-42"));
    assert_eq!(details.string_udf_1.as_deref(), Some("customer-7"));
    assert_eq!(details.string_udf_2, None);
    assert_eq!(details.int_udf_1, Some(99));
    assert_eq!(details.properties, Some(json!({"sku": "A-1", "qty": 2})));
    assert_eq!(
        details.process_at,
        jobq_core::truncate_to_second(request.process_at)
    );

    queue.shutdown().await;
}

#[tokio::test]
async fn test_missing_properties_stay_empty() {
    let db = TestDatabase::new().await;
    let queue = db.queue();

    let id = queue
        .schedule(&due_now(1).with_remaining_execution(0))
        .await
        .expect("Failed to schedule");
    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");

    assert_eq!(details.properties, None);
    assert_eq!(details.remaining_execution, 1, "budget defaults to one");
    assert!(!details.retry_group.is_empty());

    queue.shutdown().await;
}

#[tokio::test]
async fn test_future_job_is_not_claimed() {
    let db = TestDatabase::new().await;
    let queue = db.queue();

    let later = Utc::now() + ChronoDuration::seconds(60);
    queue
        .schedule(&ScheduleRequest::new(TENANT, 2, later))
        .await
        .expect("Failed to schedule");

    let wait = expect_no_job(&queue, &PollRequest::new(TENANT, 2)).await;
    assert!(wait > Duration::ZERO);
    assert!(wait <= Duration::from_secs(60));

    queue.shutdown().await;
}

#[tokio::test]
async fn test_claim_moves_job_to_processing() {
    let db = TestDatabase::new().await;
    let queue = db.queue();
    let poll = PollRequest::new(TENANT, 1);

    let id = queue
        .schedule(&due_now(1).with_remaining_execution(2))
        .await
        .expect("Failed to schedule");

    let claimed = poll_until_claimed(&queue, &poll).await;
    assert_eq!(claimed.id, id);

    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(details.state, JobState::Processing);
    assert_eq!(details.remaining_execution, 1);
    assert_eq!(details.part, claimed.part);

    expect_no_job(&queue, &poll).await;

    queue.mark_job_completed(&id).await.expect("Failed to complete");
    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(details.state, JobState::Done);
    assert_eq!(details.sub_state, JobSubState::Done);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_retry_chain_until_budget_exhausted() {
    let db = TestDatabase::new().await;
    let queue = db.queue();
    let poll = PollRequest::new(TENANT, 1);

    let first = queue
        .schedule(
            &due_now(1)
                .with_remaining_execution(3)
                .with_correlation_id("chain")
                .with_properties(json!({"attempt": "any"})),
        )
        .await
        .expect("Failed to schedule");
    let retry_group = queue
        .fetch_job_details(&first)
        .await
        .expect("Failed to fetch")
        .retry_group;

    let mut expected_id = first;
    for remaining_after_claim in [2, 1] {
        let claimed = poll_until_claimed(&queue, &poll).await;
        assert_eq!(claimed.id, expected_id);

        let details = queue.fetch_job_details(&claimed.id).await.expect("Failed to fetch");
        assert_eq!(details.remaining_execution, remaining_after_claim);

        let outcome = queue
            .mark_job_failed_and_schedule_retry(&claimed.id, Some(Utc::now()))
            .await
            .expect("Failed to fail job");
        assert!(outcome.done);
        let retry_id = outcome.retry_id.expect("retry id");

        let failed = queue.fetch_job_details(&claimed.id).await.expect("Failed to fetch");
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.sub_state, JobSubState::RetryPendingError);

        let retry = queue.fetch_job_details(&retry_id).await.expect("Failed to fetch");
        assert_eq!(retry.state, JobState::Scheduled);
        assert_eq!(retry.remaining_execution, remaining_after_claim);
        assert_eq!(retry.retry_group, retry_group);
        assert_eq!(retry.correlation_id.as_deref(), Some("chain"));
        assert_eq!(retry.properties, Some(json!({"attempt": "any"})));

        expected_id = retry_id;
    }

    let last = poll_until_claimed(&queue, &poll).await;
    assert_eq!(last.id, expected_id);
    let outcome = queue
        .mark_job_failed_and_schedule_retry(&last.id, Some(Utc::now()))
        .await
        .expect("Failed to fail job");
    assert!(!outcome.done);
    assert_eq!(outcome.retry_id, None);

    let exhausted = queue.fetch_job_details(&last.id).await.expect("Failed to fetch");
    assert_eq!(exhausted.state, JobState::Failed);
    assert_eq!(exhausted.sub_state, JobSubState::NoRetryPendingError);
    assert_eq!(exhausted.remaining_execution, 0);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs_data WHERE retry_group = ?")
        .bind(&retry_group)
        .fetch_one(&db.pool())
        .await
        .expect("Failed to count");
    assert_eq!(rows, 3);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_retry_declined_by_caller() {
    let db = TestDatabase::new().await;
    let queue = db.queue();
    let poll = PollRequest::new(TENANT, 3);

    let id = queue
        .schedule(&due_now(3).with_remaining_execution(5))
        .await
        .expect("Failed to schedule");
    poll_until_claimed(&queue, &poll).await;

    let outcome = queue
        .mark_job_failed_and_schedule_retry(&id, None)
        .await
        .expect("Failed to fail job");
    assert!(!outcome.done);

    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(details.state, JobState::Failed);
    assert_eq!(details.sub_state, JobSubState::RetryIgnoredByUserError);

    queue.shutdown().await;
}

async fn count_retry_group(db: &TestDatabase, retry_group: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM jobs_data WHERE retry_group = ?")
        .bind(retry_group)
        .fetch_one(&db.pool())
        .await
        .expect("Failed to count")
}

#[tokio::test]
async fn test_failing_twice_schedules_one_successor() {
    let db = TestDatabase::new().await;
    let queue = db.queue();
    let poll = PollRequest::new(TENANT, 2);

    let id = queue
        .schedule(&due_now(2).with_remaining_execution(3))
        .await
        .expect("Failed to schedule");
    poll_until_claimed(&queue, &poll).await;
    let retry_at = Utc::now() + ChronoDuration::seconds(60);

    let outcome = queue
        .mark_job_failed_and_schedule_retry(&id, Some(retry_at))
        .await
        .expect("Failed to fail job");
    assert!(outcome.done);

    let again = queue.mark_job_failed_and_schedule_retry(&id, Some(retry_at)).await;
    assert!(matches!(
        again,
        Err(QueueError::UnexpectedState {
            state: JobState::Failed,
            ..
        })
    ));

    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(details.sub_state, JobSubState::RetryPendingError);
    assert_eq!(count_retry_group(&db, &details.retry_group).await, 2);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_failures_schedule_one_successor() {
    let db = TestDatabase::new().await;
    let queue = db.queue();
    let poll = PollRequest::new(TENANT, 2);

    let id = queue
        .schedule(&due_now(2).with_remaining_execution(3))
        .await
        .expect("Failed to schedule");
    poll_until_claimed(&queue, &poll).await;
    let retry_at = Some(Utc::now() + ChronoDuration::seconds(60));

    let (a, b) = tokio::join!(
        queue.mark_job_failed_and_schedule_retry(&id, retry_at),
        queue.mark_job_failed_and_schedule_retry(&id, retry_at),
    );
    assert_eq!(
        usize::from(a.is_ok()) + usize::from(b.is_ok()),
        1,
        "exactly one failure may schedule a retry: {a:?} / {b:?}"
    );

    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(count_retry_group(&db, &details.retry_group).await, 2);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_failed_retry_schedule_leaves_job_processing() {
    let db = TestDatabase::new().await;
    let queue = db.queue();
    let poll = PollRequest::new(TENANT, 3);

    let id = queue
        .schedule(&due_now(3).with_remaining_execution(3))
        .await
        .expect("Failed to schedule");
    poll_until_claimed(&queue, &poll).await;

    // A retry time the id cannot encode fails the nested schedule.
    let before_epoch = Utc::now() - ChronoDuration::days(365 * 100);
    let result = queue
        .mark_job_failed_and_schedule_retry(&id, Some(before_epoch))
        .await;
    assert!(matches!(result, Err(QueueError::Schedule { .. })));

    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(details.state, JobState::Processing);
    assert_eq!(details.sub_state, JobSubState::ScheduledOk);
    assert_eq!(count_retry_group(&db, &details.retry_group).await, 1);

    // The job can still be failed normally afterwards.
    let outcome = queue
        .mark_job_failed_and_schedule_retry(&id, None)
        .await
        .expect("Failed to fail job");
    assert!(!outcome.done);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_pre_epoch_schedule_does_not_block_the_job_type() {
    let db = TestDatabase::new().await;
    let queue = db.queue();

    let before_epoch = Utc::now() - ChronoDuration::days(365 * 100);
    let rejected = queue
        .schedule(&ScheduleRequest::new(TENANT, 1, before_epoch))
        .await;
    assert!(matches!(rejected, Err(QueueError::Schedule { .. })));

    let id = queue.schedule(&due_now(1)).await.expect("Failed to schedule");
    let claimed = poll_until_claimed(&queue, &PollRequest::new(TENANT, 1)).await;
    assert_eq!(claimed.id, id);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_polls_claim_each_job_once() {
    let db = TestDatabase::new().await;
    let queue = Arc::new(db.queue());

    let mut scheduled = HashSet::new();
    for _ in 0..5 {
        let id = queue.schedule(&due_now(1)).await.expect("Failed to schedule");
        scheduled.insert(id);
    }

    let workers = (0..8).map(|_| {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut claimed = Vec::new();
            for _ in 0..20 {
                match queue.poll(&PollRequest::new(TENANT, 1)).await {
                    Ok(job) => claimed.push(job.id),
                    Err(e) if e.is_retryable() => {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    Err(e) => panic!("poll failed: {e}"),
                }
            }
            claimed
        })
    });

    let mut claimed = Vec::new();
    for worker in futures::future::join_all(workers).await {
        claimed.extend(worker.expect("worker panicked"));
    }

    let unique: HashSet<_> = claimed.iter().cloned().collect();
    assert_eq!(unique.len(), claimed.len(), "a job was claimed twice");
    assert_eq!(unique, scheduled);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_row_is_failed_during_poll() {
    let db = TestDatabase::new().await;
    let queue = db.queue();

    let id = queue.schedule(&due_now(2)).await.expect("Failed to schedule");
    sqlx::query("UPDATE jobs SET pending_execution = 0 WHERE id = ?")
        .bind(&id)
        .execute(&db.pool())
        .await
        .expect("Failed to corrupt row");

    let poll = PollRequest::new(TENANT, 2);
    for _ in 0..5 {
        if queue.poll(&poll).await.is_ok() {
            panic!("exhausted job must not be claimed");
        }
    }

    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(details.state, JobState::Failed);
    assert_eq!(details.sub_state, JobSubState::NoRetryPendingError);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_unknown_job_type() {
    let db = TestDatabase::new().await;
    let queue = db.queue();

    let result = queue.poll(&PollRequest::new(TENANT, 42)).await;
    assert!(matches!(
        result,
        Err(QueueError::JobTypeNotConfigured { job_type: 42, .. })
    ));

    queue.shutdown().await;
}

#[tokio::test]
async fn test_update_job_data() {
    let db = TestDatabase::new().await;
    let queue = db.queue();

    let id = queue
        .schedule(&due_now(1).with_properties(json!({"v": 1})))
        .await
        .expect("Failed to schedule");

    let mut update = JobDataUpdate::from(&queue.fetch_job_details(&id).await.expect("fetch"));
    update.string_udf_2 = Some("tag".to_string());
    update.int_udf_2 = Some(5);
    update.properties = Some(json!({"v": 2}));
    queue.update_job_data(&id, &update).await.expect("Failed to update");

    let details = queue.fetch_job_details(&id).await.expect("Failed to fetch");
    assert_eq!(details.string_udf_2.as_deref(), Some("tag"));
    assert_eq!(details.int_udf_2, Some(5));
    assert_eq!(details.properties, Some(json!({"v": 2})));

    // Same values again still finds the row.
    queue.update_job_data(&id, &update).await.expect("Failed to update");

    let missing = TimeBasedIdGenerator::new().generate(Utc::now()).unwrap();
    assert!(matches!(
        queue.update_job_data(&missing, &update).await,
        Err(QueueError::JobNotFound(_))
    ));
    assert!(matches!(
        queue.fetch_job_details(&missing).await,
        Err(QueueError::JobNotFound(_))
    ));
    assert!(matches!(
        queue.mark_job_completed(&missing).await,
        Err(QueueError::JobNotFound(_))
    ));

    queue.shutdown().await;
}
