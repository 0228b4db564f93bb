//! Retry loop behind the blocking `lock()`
//!
//! Without `max_wait` the loop never gives up: a persistent outage of a
//! quorum of nodes blocks the caller indefinitely. Callers that need a bound
//! either configure `max_wait` or use a single bounded attempt instead.

use super::coordinator::{LockCoordinator, LockOutcome};
use super::policy::AttemptBudget;
use crate::config::Config;
use crate::error::{LockError, Result};
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Backoff and budget settings of the blocking lock
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
    /// Total time after which `lock()` gives up; `None` waits forever
    pub max_wait: Option<Duration>,
    /// Each attempt gets this much time per node in the lock set
    pub attempt_budget_per_node: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            max_wait: None,
            attempt_budget_per_node: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            max_wait: match config.retry.max_wait_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            attempt_budget_per_node: Duration::from_millis(config.lock.attempt_budget_per_node_ms),
        }
    }

    /// Budget of one attempt over `nodes` nodes
    pub fn attempt_budget(&self, nodes: usize) -> Duration {
        self.attempt_budget_per_node
            .saturating_mul(nodes.min(u32::MAX as usize) as u32)
    }

    /// Upper bound of the delay after `failures` consecutive failed attempts
    pub fn backoff_ceiling(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`
    pub fn backoff(&self, failures: u32) -> Duration {
        let ceiling = self.backoff_ceiling(failures).as_millis() as u64;
        let millis = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(millis)
    }
}

/// Repeat quorum attempts until one is granted, or `max_wait` elapses.
///
/// With `max_wait` set, no attempt runs past it: each attempt's budget is
/// cut down to the time left.
pub async fn lock_with_retry(
    coordinator: &LockCoordinator,
    policy: &RetryPolicy,
) -> Result<LockOutcome> {
    let full_budget = policy.attempt_budget(coordinator.nodes().len());
    let start = Instant::now();
    let mut failures: u32 = 0;

    loop {
        let budget = match policy.max_wait {
            Some(max_wait) => {
                let left = max_wait.saturating_sub(start.elapsed());
                if left.is_zero() {
                    return Err(LockError::AcquireTimeout(max_wait));
                }
                full_budget.min(left)
            }
            None => full_budget,
        };

        let outcome = coordinator.try_acquire(AttemptBudget::Within(budget)).await;
        if outcome.granted {
            return Ok(outcome);
        }
        failures = failures.saturating_add(1);

        let mut delay = policy.backoff(failures);
        if let Some(max_wait) = policy.max_wait {
            delay = delay.min(max_wait.saturating_sub(start.elapsed()));
        }

        debug!(
            "Attempt {} failed ({}/{} acquired), retrying in {:?}",
            failures,
            outcome.acquired_count(),
            coordinator.quorum(),
            delay
        );
        sleep(delay).await;
    }
}
