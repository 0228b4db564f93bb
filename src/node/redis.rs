//! Reentrant owner-token lock on a single Redis protocol node
//!
//! The lock key is a hash mapping the owner token to a hold count, so the
//! same owner may acquire it more than once. Every acquisition refreshes the
//! key's expiry; a watchdog task keeps refreshing it while the lock is held.

use super::{poll_acquire, Attempt, NodeLock, NodeLockOptions};
use crate::client::{NodeClient, Script};
use crate::error::{LockError, Result};
use crate::protocol::RespValue;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// KEYS[1] = lock name, ARGV[1] = lease in ms, ARGV[2] = owner token.
/// Replies nil when acquired, otherwise the holder's remaining PTTL.
pub const ACQUIRE_SCRIPT: &str = r#"
if (redis.call('exists', KEYS[1]) == 0) or (redis.call('hexists', KEYS[1], ARGV[2]) == 1) then
    redis.call('hincrby', KEYS[1], ARGV[2], 1)
    redis.call('pexpire', KEYS[1], ARGV[1])
    return nil
end
return redis.call('pttl', KEYS[1])
"#;

/// KEYS[1] = lock name, ARGV[1] = owner token, ARGV[2] = lease in ms.
/// Replies nil if not held by the owner, 0 while still held re-entrantly,
/// 1 once the key is deleted.
pub const RELEASE_SCRIPT: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[1]) == 0 then
    return nil
end
local counter = redis.call('hincrby', KEYS[1], ARGV[1], -1)
if counter > 0 then
    redis.call('pexpire', KEYS[1], ARGV[2])
    return 0
end
redis.call('del', KEYS[1])
return 1
"#;

/// KEYS[1] = lock name, ARGV[1] = owner token, ARGV[2] = lease in ms.
/// Replies 1 if the lease was extended, 0 if the owner lost the lock.
pub const RENEW_SCRIPT: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[1]) == 1 then
    redis.call('pexpire', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

struct LockScripts {
    acquire: Script,
    release: Script,
    renew: Script,
}

fn scripts() -> &'static LockScripts {
    static SCRIPTS: OnceLock<LockScripts> = OnceLock::new();
    SCRIPTS.get_or_init(|| LockScripts {
        acquire: Script::new(ACQUIRE_SCRIPT),
        release: Script::new(RELEASE_SCRIPT),
        renew: Script::new(RENEW_SCRIPT),
    })
}

/// Lock on one resource held on one Redis protocol node
pub struct RedisNodeLock {
    client: NodeClient,
    name: String,
    owner: String,
    options: NodeLockOptions,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl RedisNodeLock {
    pub fn new(
        client: NodeClient,
        name: impl Into<String>,
        owner: impl Into<String>,
        options: NodeLockOptions,
    ) -> Self {
        Self {
            client,
            name: name.into(),
            owner: owner.into(),
            options,
            watchdog: Mutex::new(None),
        }
    }

    fn lease_millis(&self) -> String {
        self.options.lease.as_millis().to_string()
    }

    async fn attempt(&self) -> Result<Attempt> {
        let lease = self.lease_millis();
        let reply = scripts()
            .acquire
            .invoke(
                &self.client,
                &[self.name.as_str()],
                &[lease.as_str(), self.owner.as_str()],
            )
            .await?;

        let attempt = match reply {
            RespValue::Integer(ttl) => Attempt::held_for_millis(ttl),
            reply if reply.is_null() => Attempt::Acquired,
            other => {
                return Err(LockError::Protocol(format!(
                    "Unexpected acquire reply: {:?}",
                    other
                )))
            }
        };

        if attempt == Attempt::Acquired {
            debug!("Acquired '{}' on {}", self.name, self.client.addr());
            self.start_watchdog();
        }
        Ok(attempt)
    }

    fn start_watchdog(&self) {
        if !self.options.watchdog {
            return;
        }

        let mut slot = self.watchdog.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let client = self.client.clone();
        let name = self.name.clone();
        let owner = self.owner.clone();
        let lease = self.lease_millis();
        let period = (self.options.lease / 3).max(Duration::from_millis(1));

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match scripts()
                    .renew
                    .invoke(&client, &[name.as_str()], &[owner.as_str(), lease.as_str()])
                    .await
                {
                    Ok(RespValue::Integer(1)) => {
                        debug!("Renewed '{}' on {}", name, client.addr());
                    }
                    Ok(_) => {
                        debug!("'{}' no longer held on {}, watchdog exiting", name, client.addr());
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to renew '{}' on {}: {}", name, client.addr(), e);
                    }
                }
            }
        }));
    }

    fn stop_watchdog(&self) {
        let mut slot = self.watchdog.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl NodeLock for RedisNodeLock {
    fn node_id(&self) -> &str {
        self.client.addr()
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
        let lease = self.lease_millis();
        let reply = scripts()
            .release
            .invoke(
                &self.client,
                &[self.name.as_str()],
                &[self.owner.as_str(), lease.as_str()],
            )
            .await?;

        match reply {
            RespValue::Integer(1) => {
                self.stop_watchdog();
                Ok(())
            }
            // Still held re-entrantly
            RespValue::Integer(0) => Ok(()),
            reply if reply.is_null() => {
                self.stop_watchdog();
                Err(LockError::NotOwner(self.name.clone()))
            }
            other => Err(LockError::Protocol(format!(
                "Unexpected release reply: {:?}",
                other
            ))),
        }
    }

    async fn force_unlock(&self) -> Result<()> {
        self.stop_watchdog();
        let reply = self
            .client
            .execute(vec![
                Bytes::from_static(b"DEL"),
                Bytes::copy_from_slice(self.name.as_bytes()),
            ])
            .await?;
        if reply.as_integer() == Some(0) {
            debug!("'{}' was not locked on {}", self.name, self.client.addr());
        }
        Ok(())
    }
}

impl Drop for RedisNodeLock {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}

impl std::fmt::Debug for RedisNodeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisNodeLock")
            .field("node", &self.client.addr())
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}
