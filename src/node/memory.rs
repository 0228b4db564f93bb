//! In-process lock backend
//!
//! [`MemoryBackend`] keeps lock entries in a map with expiry on tokio's
//! clock and mirrors the reentrant semantics of [`super::RedisNodeLock`].
//! Outages and latency can be injected to exercise quorum behaviour without
//! running real nodes.

use super::{poll_acquire, Attempt, NodeLock, NodeLockOptions};
use crate::error::{LockError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Lock entry with its expiration time
#[derive(Debug, Clone)]
struct LockEntry {
    owner: String,
    holds: u32,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

struct BackendInner {
    id: String,
    entries: Mutex<HashMap<String, LockEntry>>,
    available: AtomicBool,
    latency: Mutex<Duration>,
}

/// A single simulated lock node
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<BackendInner>,
}

/// Reply of a release on the backend
#[derive(Debug, Clone, Copy, PartialEq)]
enum Release {
    NotHeld,
    StillHeld,
    Released,
}

impl MemoryBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                id: id.into(),
                entries: Mutex::new(HashMap::new()),
                available: AtomicBool::new(true),
                latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Simulate the node going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Delay applied to every operation before it takes effect
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Current owner of `name`, if locked and not expired
    pub fn holder(&self, name: &str) -> Option<String> {
        let entries = self.entries();
        entries
            .get(name)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.owner.clone())
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.holder(name).is_some()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, LockEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the configured latency, then fail if the node is down
    async fn round_trip(&self) -> Result<()> {
        let latency = *self.inner.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(LockError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("node {} is unavailable", self.inner.id),
            )));
        }
        Ok(())
    }

    fn acquire(&self, name: &str, owner: &str, lease: Duration) -> Attempt {
        let mut entries = self.entries();
        let now = Instant::now();

        match entries.get_mut(name) {
            Some(entry) if !entry.is_expired() && entry.owner != owner => {
                Attempt::Held(Some(entry.expires_at - now))
            }
            Some(entry) if !entry.is_expired() => {
                entry.holds += 1;
                entry.expires_at = now + lease;
                Attempt::Acquired
            }
            _ => {
                entries.insert(
                    name.to_string(),
                    LockEntry {
                        owner: owner.to_string(),
                        holds: 1,
                        expires_at: now + lease,
                    },
                );
                Attempt::Acquired
            }
        }
    }

    fn release(&self, name: &str, owner: &str, lease: Duration) -> Release {
        let mut entries = self.entries();
        let entry = match entries.get_mut(name) {
            Some(entry) if !entry.is_expired() && entry.owner == owner => entry,
            _ => return Release::NotHeld,
        };

        entry.holds -= 1;
        if entry.holds > 0 {
            entry.expires_at = Instant::now() + lease;
            return Release::StillHeld;
        }
        entries.remove(name);
        Release::Released
    }

    fn delete(&self, name: &str) -> bool {
        self.entries().remove(name).is_some()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("id", &self.inner.id)
            .field("available", &self.inner.available.load(Ordering::SeqCst))
            .finish()
    }
}

/// Lock on one resource held in a [`MemoryBackend`]
#[derive(Debug)]
pub struct MemoryNodeLock {
    backend: MemoryBackend,
    name: String,
    owner: String,
    options: NodeLockOptions,
}

impl MemoryNodeLock {
    pub fn new(
        backend: MemoryBackend,
        name: impl Into<String>,
        owner: impl Into<String>,
        options: NodeLockOptions,
    ) -> Self {
        Self {
            backend,
            name: name.into(),
            owner: owner.into(),
            options,
        }
    }

    async fn attempt(&self) -> Result<Attempt> {
        self.backend.round_trip().await?;
        Ok(self
            .backend
            .acquire(&self.name, &self.owner, self.options.lease))
    }
}

#[async_trait]
impl NodeLock for MemoryNodeLock {
    fn node_id(&self) -> &str {
        self.backend.id()
    }

    async fn lock(&self) -> Result<()> {
        poll_acquire(|| self.attempt(), self.options.poll_interval, None).await?;
        Ok(())
    }

    async fn try_lock(&self) -> Result<bool> {
        Ok(self.attempt().await? == Attempt::Acquired)
    }

    async fn try_lock_for(&self, wait: Duration) -> Result<bool> {
        poll_acquire(|| self.attempt(), self.options.poll_interval, Some(wait)).await
    }

    async fn unlock(&self) -> Result<()> {
        self.backend.round_trip().await?;
        match self
            .backend
            .release(&self.name, &self.owner, self.options.lease)
        {
            Release::NotHeld => Err(LockError::NotOwner(self.name.clone())),
            Release::StillHeld | Release::Released => Ok(()),
        }
    }

    async fn force_unlock(&self) -> Result<()> {
        self.backend.round_trip().await?;
        self.backend.delete(&self.name);
        Ok(())
    }
}
