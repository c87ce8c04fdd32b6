//! Error types for the mining engine

use thiserror::Error;

use pulse_core::{StoreError, ValidationError};

/// Errors that can occur in the mining engine
///
/// Hitting a daily cap is not an error; see
/// [`ActivityOutcome`](crate::ActivityOutcome).
#[derive(Debug, Error)]
pub enum MiningError {
    /// Input rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persistence collaborator failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Operation needs mining to be on
    #[error("Mining is not active for user {0}")]
    NotMining(String),

    /// Mining is on but the heartbeat is stale
    #[error("Mining session for user {0} is unhealthy")]
    Unhealthy(String),

    /// Background tasks already running
    #[error("Engine already started")]
    AlreadyStarted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl MiningError {
    /// Whether the failure came from the persistence collaborator
    pub fn is_store(&self) -> bool {
        matches!(self, MiningError::Store(_))
    }
}

impl From<toml::de::Error> for MiningError {
    fn from(e: toml::de::Error) -> Self {
        MiningError::Config(e.to_string())
    }
}

impl From<std::io::Error> for MiningError {
    fn from(e: std::io::Error) -> Self {
        MiningError::Io(e.to_string())
    }
}

/// Result type alias for mining operations
pub type MiningResult<T> = Result<T, MiningError>;
