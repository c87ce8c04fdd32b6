//! Error types for Pulse
//!
//! Two families live here: [`ValidationError`] for input that is rejected
//! before any I/O is attempted, and [`StoreError`] for failures reported by a
//! persistence backend.

use thiserror::Error;

/// Input rejected locally, no I/O attempted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing user id")]
    MissingUser,

    #[error("Invalid user id: {0}")]
    InvalidUser(String),

    #[error("Unknown activity type: {0}")]
    UnknownActivity(String),

    #[error("Unknown achievement: {0}")]
    UnknownAchievement(String),

    #[error("Progress increment must be positive")]
    InvalidIncrement,

    #[error("Invalid token amount: {0}")]
    InvalidAmount(String),
}

/// Errors reported by a persistence backend
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Whether the error is a conflict with existing state rather than an I/O fault
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        assert!(format!("{}", ValidationError::MissingUser).contains("Missing user"));

        let err = ValidationError::UnknownActivity("poke".to_string());
        assert!(format!("{}", err).contains("poke"));

        let err = ValidationError::InvalidAmount("1.2.3".to_string());
        assert!(format!("{}", err).contains("1.2.3"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::io("disk full");
        assert!(format!("{}", err).contains("disk full"));

        let err = StoreError::not_found("session 42");
        assert!(format!("{}", err).contains("session 42"));

        let err = StoreError::unavailable("backend offline");
        assert!(format!("{}", err).contains("unavailable"));
    }

    #[test]
    fn test_conflict_detection() {
        assert!(StoreError::conflict("active session exists").is_conflict());
        assert!(!StoreError::io("timeout").is_conflict());
    }
}
