//! Mining session records

use std::fmt::{self, Display};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserId;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a random session ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Rebuild from a storage key
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Get the id as bytes (storage key)
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Mining is running
    Active,
    /// Stopped by the user (or by stale-session recovery)
    Completed,
    /// Closed by the inactive-session cleanup batch
    AutoTerminated,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::AutoTerminated => "auto_terminated",
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An auditable interval between mining start and stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Last write to this row; heartbeats refresh it
    pub updated_at: DateTime<Utc>,
}

impl MiningSession {
    /// Open a new active session
    pub fn new(user_id: UserId, start_time: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            user_id,
            start_time,
            end_time: None,
            status: SessionStatus::Active,
            updated_at: start_time,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Transition to a terminal status
    ///
    /// Returns `false` (and changes nothing) if the session was already closed.
    pub fn close(&mut self, end_time: DateTime<Utc>, status: SessionStatus) -> bool {
        if !self.is_active() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(end_time);
        self.updated_at = end_time;
        true
    }

    /// Refresh the liveness timestamp of an active session
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if self.is_active() && at > self.updated_at {
            self.updated_at = at;
        }
    }

    /// Elapsed time, up to `now` for sessions still running
    pub fn duration(&self, now: DateTime<Utc>) -> TimeDelta {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).max(TimeDelta::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> MiningSession {
        MiningSession::new(UserId::new("alice").unwrap(), Utc::now())
    }

    #[test]
    fn test_new_session_is_active() {
        let s = session();
        assert!(s.is_active());
        assert!(s.end_time.is_none());
        assert_eq!(s.updated_at, s.start_time);
    }

    #[test]
    fn test_close_is_one_shot() {
        let mut s = session();
        let end = s.start_time + TimeDelta::minutes(10);
        assert!(s.close(end, SessionStatus::Completed));
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.end_time, Some(end));

        assert!(!s.close(end + TimeDelta::minutes(1), SessionStatus::AutoTerminated));
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.end_time, Some(end));
    }

    #[test]
    fn test_close_rejects_active_target() {
        let mut s = session();
        assert!(!s.close(Utc::now(), SessionStatus::Active));
        assert!(s.is_active());
    }

    #[test]
    fn test_touch_only_moves_forward() {
        let mut s = session();
        let later = s.start_time + TimeDelta::seconds(60);
        s.touch(later);
        assert_eq!(s.updated_at, later);
        s.touch(s.start_time);
        assert_eq!(s.updated_at, later);
    }

    #[test]
    fn test_duration() {
        let mut s = session();
        let now = s.start_time + TimeDelta::minutes(30);
        assert_eq!(s.duration(now), TimeDelta::minutes(30));
        s.close(s.start_time + TimeDelta::minutes(5), SessionStatus::Completed);
        assert_eq!(s.duration(now), TimeDelta::minutes(5));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(SessionStatus::AutoTerminated.to_string(), "auto_terminated");
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
    }
}
