//! Configuration file support
//!
//! All sections and fields are optional; anything missing falls back to the
//! defaults below.
//!
//! ```toml
//! [lock]
//! nodes = ["127.0.0.1:6379", "127.0.0.1:6380", "127.0.0.1:6381"]
//! quorum = "majority"
//!
//! [retry]
//! max_wait_ms = 10000
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{LockError, Result};
use crate::node::NodeLockOptions;
use crate::quorum::QuorumPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Lock section of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Node addresses (HOST:PORT), at least three
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Quorum policy: "majority" or "all"
    #[serde(default)]
    pub quorum: QuorumPolicy,
    /// Expiry of the lock key on each node
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    /// Renew the lease in the background while the lock is held
    #[serde(default = "default_watchdog")]
    pub watchdog: bool,
    /// Bound on connecting to a node and on each request
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Longest sleep between attempts on a contended node
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempt budget of the blocking lock, per node
    #[serde(default = "default_attempt_budget_per_node_ms")]
    pub attempt_budget_per_node_ms: u64,
    /// Fraction of the attempt budget reserved for clock drift; 0 grants
    /// any quorum reached before the deadline
    #[serde(default = "default_clock_drift_factor")]
    pub clock_drift_factor: f64,
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_watchdog() -> bool {
    true
}

fn default_io_timeout_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_attempt_budget_per_node_ms() -> u64 {
    1_500
}

fn default_clock_drift_factor() -> f64 {
    0.0
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            quorum: QuorumPolicy::default(),
            lease_ms: default_lease_ms(),
            watchdog: default_watchdog(),
            io_timeout_ms: default_io_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            attempt_budget_per_node_ms: default_attempt_budget_per_node_ms(),
            clock_drift_factor: default_clock_drift_factor(),
        }
    }
}

impl LockConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn node_options(&self) -> NodeLockOptions {
        NodeLockOptions {
            lease: Duration::from_millis(self.lease_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            watchdog: self.watchdog,
        }
    }
}

/// Retry section of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// First delay between failed attempts of the blocking lock
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the delay between attempts
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Give up after this long (0 waits forever)
    #[serde(default)]
    pub max_wait_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_wait_ms: 0,
        }
    }
}

/// Logging section of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: text or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl std::str::FromStr for Config {
    type Err = LockError;

    fn from_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl Config {
    /// Read and parse a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        content.parse()
    }

    /// Check that the values describe a usable quorum lock
    pub fn validate(&self) -> Result<()> {
        QuorumPolicy::check_node_count(self.lock.nodes.len())?;

        if self.lock.lease_ms == 0 {
            return Err(LockError::Config("lock.lease_ms must be positive".to_string()));
        }
        if self.lock.io_timeout_ms == 0 {
            return Err(LockError::Config(
                "lock.io_timeout_ms must be positive".to_string(),
            ));
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(LockError::Config(
                "lock.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.lock.attempt_budget_per_node_ms == 0 {
            return Err(LockError::Config(
                "lock.attempt_budget_per_node_ms must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.lock.clock_drift_factor) {
            return Err(LockError::Config(format!(
                "lock.clock_drift_factor must be in [0, 1), got {}",
                self.lock.clock_drift_factor
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(LockError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }
}
