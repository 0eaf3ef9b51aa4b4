//! Load generator settings, read from `JOBQ_PERF__*` environment variables.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerfSettings {
    /// How long producers and consumers run, in seconds.
    pub duration_secs: u64,
    pub producers: usize,
    pub consumers: usize,
    pub job_type: i32,
    /// Pause between two schedules of one producer, in milliseconds.
    pub produce_interval_ms: u64,
    pub remaining_execution: i32,
    /// Share of claimed jobs that the consumers fail, in `[0, 1]`.
    pub failure_rate: f64,
    /// Delay before a failed job is retried, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for PerfSettings {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            producers: 2,
            consumers: 8,
            job_type: 1,
            produce_interval_ms: 10,
            remaining_execution: 3,
            failure_rate: 0.1,
            retry_delay_ms: 1000,
        }
    }
}

impl PerfSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("JOBQ_PERF")
                    .prefix_separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub const fn produce_interval(&self) -> Duration {
        Duration::from_millis(self.produce_interval_ms)
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let settings = PerfSettings::default();
        assert_eq!(settings.duration(), Duration::from_secs(30));
        assert!(settings.consumers > 0);
    }

    #[test]
    fn test_failure_rate_is_clamped() {
        let settings = PerfSettings {
            failure_rate: 3.0,
            ..PerfSettings::default()
        };
        assert!((settings.failure_rate() - 1.0).abs() < f64::EPSILON);
    }
}
