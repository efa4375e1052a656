//! Pool configuration.
//!
//! Environment variables (applied by [`PoolConfig::with_env_overrides`]):
//! - `FORKQ_POOL_SIZE` - Number of worker processes
//! - `FORKQ_FAILURE_THRESHOLD` - Attempts per job before it is failed
//! - `FORKQ_IDLE_POLICY` - `park` or `kill`
//! - `FORKQ_JOB_TIMEOUT_MS` - Per-job deadline in milliseconds

use crate::error::{PoolError, Result};
use crate::retry::DEFAULT_FAILURE_THRESHOLD;
use crate::worker::watchdog::JobWatchdog;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Fallback pool size when the parallelism of the host is unknown.
const FALLBACK_POOL_SIZE: usize = 4;

/// What a worker does when it asks for work and the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// Keep the worker alive in the waiting list until a job arrives.
    #[default]
    Park,
    /// Tell the worker to exit. New jobs relaunch workers as needed.
    Kill,
}

impl FromStr for IdlePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "park" => Ok(Self::Park),
            "kill" => Ok(Self::Kill),
            _ => Err(format!("Unknown idle policy: {}", s)),
        }
    }
}

impl fmt::Display for IdlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Park => write!(f, "park"),
            Self::Kill => write!(f, "kill"),
        }
    }
}

/// Configuration for a [`crate::ForkPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live worker processes.
    pub pool_size: usize,
    /// Attempts per job. A job whose worker dies this many times is failed.
    pub failure_threshold: u32,
    pub idle_policy: IdlePolicy,
    /// Kill a worker whose job runs longer than this. Off when `None`.
    pub job_timeout: Option<Duration>,
    /// How long a shutting-down pool waits for workers before SIGKILL.
    pub stop_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(FALLBACK_POOL_SIZE),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            idle_policy: IdlePolicy::default(),
            job_timeout: None,
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    pub fn with_idle_policy(mut self, idle_policy: IdlePolicy) -> Self {
        self.idle_policy = idle_policy;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PoolError::InvalidConfig(
                "pool_size must be at least 1".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(PoolError::InvalidConfig(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.job_timeout == Some(Duration::ZERO) {
            return Err(PoolError::InvalidConfig(
                "job_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Apply `FORKQ_*` environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("FORKQ_POOL_SIZE") {
            match value.parse() {
                Ok(n) => self.pool_size = n,
                Err(_) => tracing::warn!(value = %value, "Ignoring invalid FORKQ_POOL_SIZE"),
            }
        }

        if let Some(value) = lookup("FORKQ_FAILURE_THRESHOLD") {
            match value.parse() {
                Ok(n) => self.failure_threshold = n,
                Err(_) => {
                    tracing::warn!(value = %value, "Ignoring invalid FORKQ_FAILURE_THRESHOLD")
                }
            }
        }

        if let Some(value) = lookup("FORKQ_IDLE_POLICY") {
            match value.parse() {
                Ok(policy) => self.idle_policy = policy,
                Err(_) => tracing::warn!(value = %value, "Ignoring invalid FORKQ_IDLE_POLICY"),
            }
        }

        if let Some(value) = lookup("FORKQ_JOB_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(0) => self.job_timeout = None,
                Ok(ms) => self.job_timeout = Some(Duration::from_millis(ms)),
                Err(_) => tracing::warn!(value = %value, "Ignoring invalid FORKQ_JOB_TIMEOUT_MS"),
            }
        }

        self
    }

    /// Tick interval for the supervisor loop: fine enough for both the job
    /// timeout and the stop grace deadline.
    pub fn tick_interval(&self) -> Duration {
        let grace = JobWatchdog::poll_interval(self.stop_grace);
        match self.job_timeout {
            Some(timeout) => grace.min(JobWatchdog::poll_interval(timeout)),
            None => grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert!(config.pool_size >= 1);
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.idle_policy, IdlePolicy::Park);
        assert!(config.job_timeout.is_none());
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new()
            .with_pool_size(3)
            .with_failure_threshold(5)
            .with_idle_policy(IdlePolicy::Kill)
            .with_job_timeout(Duration::from_secs(2))
            .with_stop_grace(Duration::from_millis(100));
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.idle_policy, IdlePolicy::Kill);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.stop_grace, Duration::from_millis(100));
        // The short grace period sets the pace
        assert_eq!(config.tick_interval(), Duration::from_millis(25));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = PoolConfig::new().with_pool_size(0).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
        assert!(err.to_string().contains("pool_size"));

        let err = PoolConfig::new()
            .with_failure_threshold(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));

        let err = PoolConfig::new()
            .with_job_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("job_timeout"));
    }

    #[test]
    fn test_idle_policy_parsing() {
        assert_eq!("park".parse::<IdlePolicy>().unwrap(), IdlePolicy::Park);
        assert_eq!("KILL".parse::<IdlePolicy>().unwrap(), IdlePolicy::Kill);
        assert!("sleep".parse::<IdlePolicy>().is_err());
        assert_eq!(IdlePolicy::Kill.to_string(), "kill");
    }

    #[test]
    fn test_env_overrides() {
        let config = PoolConfig::new().with_pool_size(8).apply_overrides(overrides(&[
            ("FORKQ_POOL_SIZE", "2"),
            ("FORKQ_FAILURE_THRESHOLD", "4"),
            ("FORKQ_IDLE_POLICY", "kill"),
            ("FORKQ_JOB_TIMEOUT_MS", "1500"),
        ]));
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.failure_threshold, 4);
        assert_eq!(config.idle_policy, IdlePolicy::Kill);
        assert_eq!(config.job_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = PoolConfig::new()
            .with_pool_size(3)
            .with_job_timeout(Duration::from_secs(1))
            .apply_overrides(overrides(&[
                ("FORKQ_POOL_SIZE", "many"),
                ("FORKQ_FAILURE_THRESHOLD", "-1"),
                ("FORKQ_IDLE_POLICY", "nap"),
                ("FORKQ_JOB_TIMEOUT_MS", "soon"),
            ]));
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.idle_policy, IdlePolicy::Park);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_zero_timeout_env_disables_watchdog() {
        let config = PoolConfig::new()
            .with_job_timeout(Duration::from_secs(1))
            .apply_overrides(overrides(&[("FORKQ_JOB_TIMEOUT_MS", "0")]));
        assert!(config.job_timeout.is_none());
    }
}
