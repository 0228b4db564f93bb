//! Best-effort release across a set of nodes
//!
//! Release is attempted on every node handed in, concurrently, whether or
//! not the node is believed to hold the lock: an acquisition may have been
//! committed on a node whose reply never arrived. Per-node failures are
//! logged and collected into a [`ReleaseReport`]; they never become errors.

use crate::error::LockError;
use crate::node::NodeLock;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

/// Which release primitive to use on each node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Owner-checked release
    Owned,
    /// Unconditional release, bypassing the owner check
    Forced,
}

/// Outcome of a best-effort release
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Nodes release was attempted on
    pub attempted: usize,
    /// Nodes that reported a failure, with the error they returned
    pub failures: Vec<(String, LockError)>,
}

impl ReleaseReport {
    /// Every node released without error
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn released(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

/// Release `nodes` concurrently and report which ones failed
pub async fn release_all<'a, I>(nodes: I, mode: ReleaseMode) -> ReleaseReport
where
    I: IntoIterator<Item = &'a Arc<dyn NodeLock>>,
{
    let releases = nodes.into_iter().map(|node| async move {
        let result = match mode {
            ReleaseMode::Owned => node.unlock().await,
            ReleaseMode::Forced => node.force_unlock().await,
        };
        (node.node_id().to_string(), result)
    });

    let mut report = ReleaseReport::default();
    for (node, result) in join_all(releases).await {
        report.attempted += 1;
        if let Err(e) = result {
            debug!("Release on {} ({:?}) failed: {}", node, mode, e);
            report.failures.push((node, e));
        }
    }
    report
}
