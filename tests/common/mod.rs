//! Shared helpers for the quorum lock tests

#![allow(dead_code)]

use aikv_redlock::{LockError, NodeLock, Result};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted node does when asked to acquire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Acquire,
    Refuse,
    Fail,
}

/// Node lock whose answers are scripted and whose calls are counted
pub struct ScriptedNode {
    id: String,
    behavior: Mutex<Behavior>,
    delay: Mutex<Duration>,
    reachable: AtomicBool,
    held: AtomicBool,
    pub attempts: AtomicUsize,
    pub unlocks: AtomicUsize,
    pub force_unlocks: AtomicUsize,
}

impl ScriptedNode {
    pub fn new(id: impl Into<String>, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            behavior: Mutex::new(behavior),
            delay: Mutex::new(Duration::ZERO),
            reachable: AtomicBool::new(true),
            held: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
            force_unlocks: AtomicUsize::new(0),
        })
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Unreachable nodes fail every release
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }

    pub fn force_unlocks(&self) -> usize {
        self.force_unlocks.load(Ordering::SeqCst)
    }

    fn unreachable(&self) -> LockError {
        LockError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("{} unreachable", self.id),
        ))
    }

    async fn acquire(&self) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            Behavior::Acquire => {
                self.held.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Behavior::Refuse => Ok(false),
            Behavior::Fail => Err(self.unreachable()),
        }
    }
}

#[async_trait]
impl NodeLock for ScriptedNode {
    fn node_id(&self) -> &str {
        &self.id
    }

    async fn lock(&self) -> Result<()> {
        loop {
            if self.acquire().await? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn try_lock(&self) -> Result<bool> {
        self.acquire().await
    }

    async fn try_lock_for(&self, _wait: Duration) -> Result<bool> {
        self.acquire().await
    }

    async fn unlock(&self) -> Result<()> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.unreachable());
        }
        if !self.held.swap(false, Ordering::SeqCst) {
            return Err(LockError::NotOwner(self.id.clone()));
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        self.force_unlocks.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.unreachable());
        }
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// One scripted node per behavior, named node-0, node-1, ...
pub fn scripted(behaviors: &[Behavior]) -> Vec<Arc<ScriptedNode>> {
    behaviors
        .iter()
        .enumerate()
        .map(|(i, behavior)| ScriptedNode::new(format!("node-{}", i), *behavior))
        .collect()
}

pub fn as_node_locks(nodes: &[Arc<ScriptedNode>]) -> Vec<Arc<dyn NodeLock>> {
    nodes
        .iter()
        .map(|node| Arc::clone(node) as Arc<dyn NodeLock>)
        .collect()
}
