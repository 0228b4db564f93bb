use crate::error::{LockError, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Smallest node count for which a quorum lock is meaningful
pub const MIN_NODES: usize = 3;

/// Time allotted to one lock attempt, or to one node within an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptBudget {
    /// No deadline; node attempts block until they acquire
    Unbounded,
    /// Deadline relative to the start of the attempt
    Within(Duration),
}

impl AttemptBudget {
    /// Millisecond form where `-1` (or any negative value) means unbounded
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            AttemptBudget::Unbounded
        } else {
            AttemptBudget::Within(Duration::from_millis(ms as u64))
        }
    }

    pub fn deadline(&self, start: Instant) -> Option<Instant> {
        match self {
            AttemptBudget::Unbounded => None,
            AttemptBudget::Within(d) => Some(start + *d),
        }
    }
}

/// How many nodes must be acquired and how the attempt budget is split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuorumPolicy {
    /// Strict majority; tolerates `n / 2` failed nodes
    #[default]
    Majority,
    /// Every node must be acquired
    All,
}

impl QuorumPolicy {
    /// Reject node counts that cannot form a quorum
    pub fn check_node_count(nodes: usize) -> Result<()> {
        if nodes < MIN_NODES {
            return Err(LockError::InsufficientNodes {
                required: MIN_NODES,
                actual: nodes,
            });
        }
        Ok(())
    }

    /// Number of node failures tolerated out of `nodes`
    pub fn failure_budget(&self, nodes: usize) -> usize {
        match self {
            QuorumPolicy::Majority => nodes.saturating_sub(nodes / 2 + 1),
            QuorumPolicy::All => 0,
        }
    }

    /// Number of acquired nodes needed for the lock to be valid
    pub fn quorum(&self, nodes: usize) -> usize {
        nodes - self.failure_budget(nodes)
    }

    /// Share of `remaining` given to each node's acquisition attempt
    pub fn per_node_budget(&self, remaining: AttemptBudget, nodes: usize) -> AttemptBudget {
        let total = match remaining {
            AttemptBudget::Unbounded => return AttemptBudget::Unbounded,
            AttemptBudget::Within(total) => total,
        };

        match self {
            QuorumPolicy::Majority => {
                let share = (total.as_millis() / nodes.max(1) as u128).max(1);
                AttemptBudget::Within(Duration::from_millis(share.min(u64::MAX as u128) as u64))
            }
            QuorumPolicy::All => AttemptBudget::Within(total),
        }
    }
}
