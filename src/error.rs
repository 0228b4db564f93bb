use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Connection closed by {0}")]
    ConnectionClosed(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Lock '{0}' is not held by this owner")]
    NotOwner(String),

    #[error("Quorum lock requires at least {required} nodes, got {actual}")]
    InsufficientNodes { required: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Lock not acquired within {0:?}")]
    AcquireTimeout(Duration),
}

impl LockError {
    /// Whether this error is a configuration problem rather than a runtime failure
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            LockError::InsufficientNodes { .. } | LockError::Config(_) | LockError::Toml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
