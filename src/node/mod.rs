//! Single-node lock primitives
//!
//! A [`NodeLock`] is a lock on one resource held on one backend instance.
//! The quorum layer only ever talks to this trait, so any backend that can
//! do an atomic acquire-with-expiry and an owner-checked release can take
//! part in a quorum lock.

pub mod memory;
pub mod redis;

pub use memory::{MemoryBackend, MemoryNodeLock};
pub use redis::RedisNodeLock;

use crate::error::Result;
use async_trait::async_trait;
use rand::RngCore;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Lock on one resource on one backend node
#[async_trait]
pub trait NodeLock: Send + Sync {
    /// Identity of the backend node, used in logs and reports
    fn node_id(&self) -> &str;

    /// Block until the lock is acquired
    async fn lock(&self) -> Result<()>;

    /// Single non-blocking attempt
    async fn try_lock(&self) -> Result<bool>;

    /// Keep trying for at most `wait`
    async fn try_lock_for(&self, wait: Duration) -> Result<bool>;

    /// Release a lock held by this owner
    async fn unlock(&self) -> Result<()>;

    /// Release the lock whoever holds it
    async fn force_unlock(&self) -> Result<()>;
}

/// Settings shared by the single-node lock implementations
#[derive(Debug, Clone)]
pub struct NodeLockOptions {
    /// Expiry set on the lock key at every acquisition
    pub lease: Duration,
    /// Upper bound on the sleep between attempts while the lock is contended
    pub poll_interval: Duration,
    /// Keep renewing the lease while the lock is held
    pub watchdog: bool,
}

impl Default for NodeLockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            watchdog: true,
        }
    }
}

/// Generate a random owner token (40 hex digits)
pub fn new_owner_token() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Result of a single acquisition attempt on a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Attempt {
    Acquired,
    /// Held by another owner; the remaining expiry if the node reported one
    Held(Option<Duration>),
}

impl Attempt {
    /// Interpret a PTTL-style reply (`-1`/`-2` mean no usable expiry)
    pub(crate) fn held_for_millis(ttl: i64) -> Self {
        if ttl > 0 {
            Attempt::Held(Some(Duration::from_millis(ttl as u64)))
        } else {
            Attempt::Held(None)
        }
    }
}

/// Repeat `attempt` until it acquires or `wait` runs out (`None` waits
/// forever). Sleeps are capped by the holder's remaining expiry and by
/// `poll_interval`.
pub(crate) async fn poll_acquire<F, Fut>(
    mut attempt: F,
    poll_interval: Duration,
    wait: Option<Duration>,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt>>,
{
    let deadline = wait.map(|w| Instant::now() + w);
    let min_sleep = Duration::from_millis(1);

    loop {
        let ttl = match attempt().await? {
            Attempt::Acquired => return Ok(true),
            Attempt::Held(ttl) => ttl,
        };

        let mut pause = ttl.map_or(poll_interval, |t| t.min(poll_interval));
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            pause = pause.min(deadline - now);
        }
        sleep(pause.max(min_sleep)).await;
    }
}
