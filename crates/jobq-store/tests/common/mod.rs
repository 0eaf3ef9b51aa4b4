//! Common test infrastructure for store integration tests.

use jobq_config::StoreConfig;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mysql::Mysql;

/// Running MySQL container and a store config pointing at it.
pub struct TestDatabase {
    _container: ContainerAsync<Mysql>,
    pub config: StoreConfig,
}

impl TestDatabase {
    /// Starts a fresh MySQL container.
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

        Self {
            _container: container,
            config: StoreConfig {
                host: "127.0.0.1".to_string(),
                port,
                user: "jobq".to_string(),
                password: "jobq".to_string(),
                database: "jobq_test".to_string(),
                min_connections: 1,
                max_connections: 5,
                ..StoreConfig::default()
            },
        }
    }
}
