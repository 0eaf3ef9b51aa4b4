//! Common test infrastructure for queue integration tests.

use jobq_config::{QueueConfig, StoreConfig};
use jobq_queue::{JobQueue, MySqlQueue, PollRequest, PollResponse, QueueError};
use jobq_store::{MySqlStore, StoreBackend};
use sqlx::MySqlPool;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mysql::Mysql;

/// MySQL testcontainer with the jobq schema applied.
pub struct TestDatabase {
    _container: ContainerAsync<Mysql>,
    store: MySqlStore,
}

impl TestDatabase {
    /// Starts a fresh MySQL container and runs migrations.
    pub async fn new() -> Self {
        let container = Mysql::default()
            .with_env_var("MYSQL_ROOT_PASSWORD", "testpass")
            .with_env_var("MYSQL_DATABASE", "jobq_test")
            .with_env_var("MYSQL_USER", "jobq")
            .with_env_var("MYSQL_PASSWORD", "jobq")
            .start()
            .await
            .expect("Failed to start MySQL container");

        let port = container
            .get_host_port_ipv4(3306)
            .await
            .expect("Failed to get MySQL port");

        let config = StoreConfig {
            host: "127.0.0.1".to_string(),
            port,
            user: "jobq".to_string(),
            password: "jobq".to_string(),
            database: "jobq_test".to_string(),
            min_connections: 1,
            max_connections: 10,
            run_migrations: true,
            ..StoreConfig::default()
        };

        let store = Self::connect_with_retry(config, 30).await;

        Self {
            _container: container,
            store,
        }
    }

    pub fn pool(&self) -> MySqlPool {
        self.store.pool().expect("store is initialized")
    }

    /// Builds a queue over this database with short test timings.
    pub fn queue(&self) -> MySqlQueue {
        MySqlQueue::new(&self.store, test_queue_config()).expect("Failed to create queue")
    }

    async fn connect_with_retry(config: StoreConfig, max_attempts: u32) -> MySqlStore {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let store = MySqlStore::new(config.clone());
            match store.init().await {
                Ok(()) => return store,
                Err(e) => {
                    if attempts >= max_attempts {
                        panic!("Failed to connect to database after {max_attempts} attempts: {e}");
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

pub fn test_queue_config() -> QueueConfig {
    QueueConfig {
        tenant: 0,
        max_job_type: 3,
        due_time_refresh_interval_ms: 100,
        no_job_wait_ms: 200,
        ..QueueConfig::default()
    }
}

/// Polls until a job is claimed, sleeping on the wait hint in between.
pub async fn poll_until_claimed(queue: &MySqlQueue, request: &PollRequest) -> PollResponse {
    for _ in 0..50 {
        match queue.poll(request).await {
            Ok(claimed) => return claimed,
            Err(e) if e.is_retryable() => {
                let wait = e.retry_after().unwrap_or(Duration::from_millis(50));
                tokio::time::sleep(wait.min(Duration::from_millis(200))).await;
            }
            Err(e) => panic!("poll failed: {e}"),
        }
    }
    panic!("no job claimed for {request:?}");
}

/// Polls once and expects nothing due, returning the wait hint.
pub async fn expect_no_job(queue: &MySqlQueue, request: &PollRequest) -> Duration {
    match queue.poll(request).await {
        Err(QueueError::NoJob { wait, .. }) => wait,
        other => panic!("expected NoJob, got {other:?}"),
    }
}
