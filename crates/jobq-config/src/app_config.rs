//! Application configuration structures.

use jobq_core::PartitionPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// MySQL store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Queue behaviour.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MySQL connection pool configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Schema name.
    pub database: String,
    /// Maximum number of open connections.
    pub max_connections: u32,
    /// Number of idle connections kept open.
    pub min_connections: u32,
    /// Timeout for acquiring a connection, in seconds.
    pub connect_timeout_secs: u64,
    /// Idle connection timeout, in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection, in seconds.
    pub max_lifetime_secs: u64,
    /// Apply bundled migrations on init.
    pub run_migrations: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "jobq".to_string(),
            password: "jobq".to_string(),
            database: "jobq".to_string(),
            max_connections: 20,
            min_connections: 5,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            run_migrations: false,
        }
    }
}

impl StoreConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the idle timeout as a Duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Returns the connection max lifetime as a Duration.
    #[must_use]
    pub const fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .finish_non_exhaustive()
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Tenant served by this queue instance.
    pub tenant: i32,
    /// Job types `1..=max_job_type` get a due-time cache.
    pub max_job_type: i32,
    /// Partition key policy, shared by write and read paths.
    pub partition_policy: PartitionPolicy,
    /// Physical table and column names.
    pub naming: NamingConfig,
    /// Timeout of the `MIN(id)` due-time lookup, in milliseconds.
    pub due_time_lookup_timeout_ms: u64,
    /// Background due-time refresh period, in milliseconds.
    pub due_time_refresh_interval_ms: u64,
    /// Suggested wait when nothing is scheduled at all, in milliseconds.
    pub no_job_wait_ms: u64,
    /// Retry of lock wait timeouts on schedule.
    pub lock_retry: LockRetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tenant: 0,
            max_job_type: 10,
            partition_policy: PartitionPolicy::default(),
            naming: NamingConfig::default(),
            due_time_lookup_timeout_ms: 1000,
            due_time_refresh_interval_ms: 1000,
            no_job_wait_ms: 1000,
            lock_retry: LockRetryConfig::default(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn due_time_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.due_time_lookup_timeout_ms)
    }

    #[must_use]
    pub const fn due_time_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.due_time_refresh_interval_ms)
    }

    #[must_use]
    pub const fn no_job_wait(&self) -> Duration {
        Duration::from_millis(self.no_job_wait_ms)
    }
}

/// Physical names for the logical `jobs`/`jobs_data` schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub jobs_table: String,
    pub jobs_data_table: String,
    pub string_udf_1: String,
    pub string_udf_2: String,
    pub int_udf_1: String,
    pub int_udf_2: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            jobs_table: "jobs".to_string(),
            jobs_data_table: "jobs_data".to_string(),
            string_udf_1: "string_udf_1".to_string(),
            string_udf_2: "string_udf_2".to_string(),
            int_udf_1: "int_udf_1".to_string(),
            int_udf_2: "int_udf_2".to_string(),
        }
    }
}

impl NamingConfig {
    /// All configured names, labelled by their logical name.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("jobs", &self.jobs_table),
            ("jobs_data", &self.jobs_data_table),
            ("string_udf_1", &self.string_udf_1),
            ("string_udf_2", &self.string_udf_2),
            ("int_udf_1", &self.int_udf_1),
            ("int_udf_2", &self.int_udf_2),
        ]
    }
}

/// Exponential backoff for MySQL lock wait timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockRetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// First retry delay, in milliseconds.
    pub initial_interval_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Delay growth factor.
    pub multiplier: f64,
}

impl Default for LockRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval_ms: 50,
            max_interval_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl LockRetryConfig {
    #[must_use]
    pub const fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    #[must_use]
    pub const fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,jobq=debug".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.store.port, 3306);
        assert_eq!(config.queue.max_job_type, 10);
        assert_eq!(config.queue.no_job_wait(), Duration::from_secs(1));
        assert_eq!(config.queue.naming.jobs_table, "jobs");
        assert_eq!(config.queue.partition_policy, PartitionPolicy::EndOfWeek);
        assert!(!config.logging.is_json());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [store]
            host = "db.internal"

            [queue]
            tenant = 7
            partition_policy = "archive_after_one_week"

            [queue.naming]
            jobs_table = "jobs_v2"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.host, "db.internal");
        assert_eq!(config.store.port, 3306);
        assert_eq!(config.queue.tenant, 7);
        assert_eq!(
            config.queue.partition_policy,
            PartitionPolicy::ArchiveAfterOneWeek
        );
        assert_eq!(config.queue.naming.jobs_table, "jobs_v2");
        assert_eq!(config.queue.naming.jobs_data_table, "jobs_data");
        assert_eq!(config.queue.lock_retry.max_attempts, 5);
    }

    #[test]
    fn test_store_debug_redacts_password() {
        let config = StoreConfig {
            password: "hunter2".to_string(),
            ..StoreConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
