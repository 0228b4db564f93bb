pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod protocol;
pub mod quorum;

pub use config::Config;
pub use error::{LockError, Result};
pub use node::{MemoryBackend, MemoryNodeLock, NodeLock, NodeLockOptions, RedisNodeLock};
pub use quorum::{AttemptBudget, LockOutcome, QuorumLock, QuorumPolicy, QuorumSettings, ReleaseReport};
