//! User identity
//!
//! Authentication happens elsewhere; the engine only needs a stable,
//! non-empty key to isolate per-user state.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest user id accepted
pub const MAX_USER_ID_LEN: usize = 128;

/// Opaque identifier of a user
///
/// Deserialization goes through [`UserId::new`], so decoded rows obey the
/// same rules as ids built in code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a user id, rejecting blank or oversized values
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingUser);
        }
        if trimmed.len() > MAX_USER_ID_LEN || trimmed.chars().any(char::is_control) {
            return Err(ValidationError::InvalidUser(trimmed.chars().take(32).collect()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the id as bytes (storage key)
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_creation() {
        assert!(UserId::new("alice").is_ok());
        assert_eq!(UserId::new("").unwrap_err(), ValidationError::MissingUser);
        assert_eq!(UserId::new("   ").unwrap_err(), ValidationError::MissingUser);
        assert!(matches!(
            UserId::new("x".repeat(MAX_USER_ID_LEN + 1)),
            Err(ValidationError::InvalidUser(_))
        ));
        assert!(matches!(UserId::new("bad\nid"), Err(ValidationError::InvalidUser(_))));
    }

    #[test]
    fn test_user_id_is_trimmed() {
        let id = UserId::new("  bob ").unwrap();
        assert_eq!(id.as_str(), "bob");
    }

    #[test]
    fn test_deserialize_validates() {
        let id: UserId = serde_json::from_str("\"  carol \"").unwrap();
        assert_eq!(id.as_str(), "carol");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"carol\"");

        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
        assert!(serde_json::from_str::<UserId>("\"bad\\nid\"").is_err());

        let blank = postcard::to_allocvec(&String::from("   ")).unwrap();
        assert!(postcard::from_bytes::<UserId>(&blank).is_err());

        let bytes = postcard::to_allocvec(&id).unwrap();
        assert_eq!(postcard::from_bytes::<UserId>(&bytes).unwrap(), id);
    }

    #[test]
    fn test_short_id() {
        let id: UserId = "0123456789abcdef".parse().unwrap();
        assert_eq!(id.short_id(), "01234567");
    }
}
