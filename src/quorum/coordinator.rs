use super::policy::{AttemptBudget, QuorumPolicy};
use super::release::{release_all, ReleaseMode};
use crate::error::Result;
use crate::node::NodeLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// The node handles a quorum lock is spread over. Fixed at construction and
/// never deduplicated.
#[derive(Clone)]
pub struct LockSet {
    nodes: Arc<[Arc<dyn NodeLock>]>,
}

impl LockSet {
    /// Fails with `InsufficientNodes` for fewer than three nodes
    pub fn new(nodes: Vec<Arc<dyn NodeLock>>) -> Result<Self> {
        QuorumPolicy::check_node_count(nodes.len())?;
        Ok(Self {
            nodes: nodes.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn NodeLock>> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn NodeLock>> {
        self.nodes.iter()
    }
}

impl std::fmt::Debug for LockSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|node| node.node_id()))
            .finish()
    }
}

/// Outcome of one node's acquisition attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionResult {
    /// Position of the node in the lock set
    pub index: usize,
    pub node: String,
    /// Any node error counts as not acquired
    pub acquired: bool,
    pub elapsed: Duration,
}

/// Decision of one quorum attempt
#[derive(Debug, Clone)]
pub struct LockOutcome {
    pub granted: bool,
    /// Per-node results that arrived before the decision, ordered by index
    pub results: Vec<AcquisitionResult>,
    /// Remaining validity of a granted lock; `None` for an unbounded attempt
    pub validity: Option<Duration>,
    pub elapsed: Duration,
}

impl LockOutcome {
    pub fn acquired_count(&self) -> usize {
        self.results.iter().filter(|r| r.acquired).count()
    }
}

/// Runs quorum attempts over a [`LockSet`]
pub struct LockCoordinator {
    nodes: LockSet,
    policy: QuorumPolicy,
    clock_drift_factor: f64,
}

impl LockCoordinator {
    pub fn new(nodes: LockSet, policy: QuorumPolicy, clock_drift_factor: f64) -> Self {
        Self {
            nodes,
            policy,
            clock_drift_factor,
        }
    }

    pub fn nodes(&self) -> &LockSet {
        &self.nodes
    }

    /// Acquired nodes needed for a grant
    pub fn quorum(&self) -> usize {
        self.policy.quorum(self.nodes.len())
    }

    /// One attempt to take the lock on a quorum of nodes within `budget`.
    ///
    /// All nodes are tried concurrently. On failure every node that reported
    /// an acquisition is released again; nodes still pending at the deadline
    /// are released in the background if they turn out to have acquired.
    pub async fn try_acquire(&self, budget: AttemptBudget) -> LockOutcome {
        let total = self.nodes.len();
        let required = self.quorum();
        let per_node = self.policy.per_node_budget(budget, total);
        let start = Instant::now();
        let deadline = budget.deadline(start);

        let mut attempts = JoinSet::new();
        for (index, node) in self.nodes.iter().enumerate() {
            attempts.spawn(attempt_node(index, Arc::clone(node), per_node));
        }

        let mut results = Vec::with_capacity(total);
        loop {
            let joined = match deadline {
                Some(deadline) => match timeout_at(deadline, attempts.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        debug!(
                            "Attempt budget of {:?} elapsed with {} node(s) pending",
                            budget,
                            attempts.len()
                        );
                        break;
                    }
                },
                None => attempts.join_next().await,
            };

            match joined {
                Some(Ok(result)) => results.push(result),
                Some(Err(e)) => warn!("Node acquisition task failed: {}", e),
                None => break,
            }
        }

        if !attempts.is_empty() {
            self.abandon(attempts);
        }

        let elapsed = start.elapsed();
        results.sort_by_key(|r| r.index);
        let acquired = results.iter().filter(|r| r.acquired).count();

        let (granted, validity) = if acquired < required {
            debug!(
                "Quorum not reached: {}/{} acquired, {} required",
                acquired, total, required
            );
            (false, None)
        } else {
            match budget {
                AttemptBudget::Unbounded => (true, None),
                AttemptBudget::Within(budget) => match self.remaining_validity(budget, elapsed) {
                    Some(validity) => (true, Some(validity)),
                    None => {
                        warn!(
                            "Quorum of {}/{} reached after {:?}, too late for a budget of {:?}",
                            acquired, total, elapsed, budget
                        );
                        (false, None)
                    }
                },
            }
        };

        if granted {
            info!(
                "Lock granted on {}/{} nodes in {:?}",
                acquired, total, elapsed
            );
        } else if acquired > 0 {
            self.rollback(&results).await;
        }

        LockOutcome {
            granted,
            results,
            validity,
            elapsed,
        }
    }

    /// Budget left after `elapsed`, less the clock drift allowance.
    /// `None` once nothing usable remains.
    fn remaining_validity(&self, budget: Duration, elapsed: Duration) -> Option<Duration> {
        let drift = budget.mul_f64(self.clock_drift_factor);
        budget
            .checked_sub(elapsed)?
            .checked_sub(drift)
            .filter(|remaining| !remaining.is_zero())
    }

    async fn rollback(&self, results: &[AcquisitionResult]) {
        let acquired: Vec<&Arc<dyn NodeLock>> = results
            .iter()
            .filter(|r| r.acquired)
            .filter_map(|r| self.nodes.get(r.index))
            .collect();

        let report = release_all(acquired, ReleaseMode::Owned).await;
        if report.is_clean() {
            debug!("Rolled back {} node(s)", report.attempted);
        } else {
            warn!(
                "Rollback released {}/{} node(s); the rest expire with their lease",
                report.released(),
                report.attempted
            );
        }
    }

    /// Let pending attempts finish without affecting the decision, then
    /// release any that acquired.
    fn abandon(&self, mut attempts: JoinSet<AcquisitionResult>) {
        let nodes = self.nodes.clone();
        tokio::spawn(async move {
            while let Some(joined) = attempts.join_next().await {
                let Ok(result) = joined else { continue };
                if !result.acquired {
                    continue;
                }
                debug!("Releasing late acquisition on {}", result.node);
                if let Some(node) = nodes.get(result.index) {
                    release_all([node], ReleaseMode::Owned).await;
                }
            }
        });
    }
}

async fn attempt_node(
    index: usize,
    node: Arc<dyn NodeLock>,
    budget: AttemptBudget,
) -> AcquisitionResult {
    let started = Instant::now();
    let outcome = match budget {
        AttemptBudget::Unbounded => node.lock().await.map(|()| true),
        AttemptBudget::Within(wait) => node.try_lock_for(wait).await,
    };

    let acquired = match outcome {
        Ok(acquired) => acquired,
        Err(e) => {
            debug!("Acquisition on {} failed: {}", node.node_id(), e);
            false
        }
    };

    AcquisitionResult {
        index,
        node: node.node_id().to_string(),
        acquired,
        elapsed: started.elapsed(),
    }
}
