//! Quorum lock over independent nodes
//!
//! A [`QuorumLock`] holds one [`NodeLock`] per backend node and is granted
//! once a quorum of them has been acquired inside the attempt budget:
//!
//! - [`policy`] decides the quorum size and each node's share of the budget
//! - [`coordinator`] runs one concurrent attempt and rolls back on failure
//! - [`retry`] drives the blocking `lock()`
//! - [`release`] releases every node, best effort
//!
//! Node failures never surface as errors from an attempt or a release; they
//! only reduce the number of acquired nodes. The only errors are a node
//! count below three at construction and, when configured, the blocking
//! lock's wait limit.

pub mod coordinator;
pub mod policy;
pub mod release;
pub mod retry;

pub use coordinator::{AcquisitionResult, LockCoordinator, LockOutcome, LockSet};
pub use policy::{AttemptBudget, QuorumPolicy, MIN_NODES};
pub use release::{release_all, ReleaseMode, ReleaseReport};
pub use retry::{lock_with_retry, RetryPolicy};

use crate::client::NodeClient;
use crate::config::Config;
use crate::error::Result;
use crate::node::{new_owner_token, NodeLock, RedisNodeLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings of a [`QuorumLock`] that are independent of the nodes
#[derive(Debug, Clone)]
pub struct QuorumSettings {
    pub policy: QuorumPolicy,
    pub clock_drift_factor: f64,
    pub retry: RetryPolicy,
}

impl Default for QuorumSettings {
    fn default() -> Self {
        Self {
            policy: QuorumPolicy::Majority,
            clock_drift_factor: 0.0,
            retry: RetryPolicy::default(),
        }
    }
}

impl QuorumSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.lock.quorum,
            clock_drift_factor: config.lock.clock_drift_factor,
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Distributed lock on one resource, spread over at least three nodes
pub struct QuorumLock {
    coordinator: LockCoordinator,
    retry: RetryPolicy,
}

impl QuorumLock {
    /// Build a lock over `nodes`; fails with `InsufficientNodes` for fewer
    /// than three before any node is contacted.
    pub fn new(nodes: Vec<Arc<dyn NodeLock>>, settings: QuorumSettings) -> Result<Self> {
        let nodes = LockSet::new(nodes)?;
        debug!(
            "Quorum lock over {:?} ({:?}, quorum {})",
            nodes,
            settings.policy,
            settings.policy.quorum(nodes.len())
        );

        Ok(Self {
            coordinator: LockCoordinator::new(nodes, settings.policy, settings.clock_drift_factor),
            retry: settings.retry,
        })
    }

    /// Lock `resource` on the nodes listed in `config`, all sharing one
    /// freshly generated owner token. Connections are opened lazily.
    pub fn from_config(resource: &str, config: &Config) -> Result<Self> {
        config.validate()?;

        let owner = new_owner_token();
        let options = config.lock.node_options();
        let nodes = config
            .lock
            .nodes
            .iter()
            .map(|addr| {
                let client = NodeClient::new(addr.clone(), config.lock.io_timeout());
                Arc::new(RedisNodeLock::new(
                    client,
                    resource,
                    owner.clone(),
                    options.clone(),
                )) as Arc<dyn NodeLock>
            })
            .collect();

        Self::new(nodes, QuorumSettings::from_config(config))
    }

    pub fn nodes(&self) -> &LockSet {
        self.coordinator.nodes()
    }

    /// Acquired nodes needed for the lock to be granted
    pub fn quorum(&self) -> usize {
        self.coordinator.quorum()
    }

    /// One attempt within `budget`, with the full per-node detail
    pub async fn try_acquire(&self, budget: AttemptBudget) -> LockOutcome {
        self.coordinator.try_acquire(budget).await
    }

    /// One attempt within `budget`; `false` leaves no node locked by it
    pub async fn try_lock(&self, budget: AttemptBudget) -> bool {
        self.try_acquire(budget).await.granted
    }

    /// Block until the lock is held.
    ///
    /// Each attempt gets `attempt_budget_per_node` times the node count.
    /// Without a configured `max_wait` this never returns while a quorum of
    /// nodes stays unreachable or contended.
    pub async fn lock(&self) -> Result<LockOutcome> {
        lock_with_retry(&self.coordinator, &self.retry).await
    }

    /// Release on every node with the owner-checked primitive
    pub async fn unlock(&self) -> ReleaseReport {
        self.release(ReleaseMode::Owned).await
    }

    /// Release on every node, whoever holds the lock there
    pub async fn force_unlock(&self) -> ReleaseReport {
        self.release(ReleaseMode::Forced).await
    }

    async fn release(&self, mode: ReleaseMode) -> ReleaseReport {
        let report = release_all(self.coordinator.nodes().iter(), mode).await;
        if report.is_clean() {
            info!("Released lock on {} node(s)", report.attempted);
        } else {
            warn!(
                "Released lock on {}/{} node(s)",
                report.released(),
                report.attempted
            );
        }
        report
    }
}
