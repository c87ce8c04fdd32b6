//! Persistence collaborator
//!
//! The engine never reads-modifies-writes a row it does not own. Everything
//! that has to be atomic (credit-with-cap, heartbeat-only-while-mining,
//! at-most-one-active-session) is a single [`MiningStore`] call, and the
//! backend is responsible for making that call atomic.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::achievement::{AchievementId, UserAchievementProgress};
use crate::activity::ActivityKind;
use crate::amount::TokenAmount;
use crate::error::StoreError;
use crate::identity::UserId;
use crate::session::{MiningSession, SessionId, SessionStatus};
use crate::stats::{MiningStats, StatsPatch};

/// An atomic increment-and-check against the stats row
#[derive(Debug, Clone, PartialEq)]
pub struct CreditRequest {
    /// Counter to increment; `None` for bonuses that bypass daily caps
    pub kind: Option<ActivityKind>,
    /// Deny when today's count for `kind` has already reached this value
    pub daily_cap: Option<u32>,
    pub points: u64,
    pub tokens: TokenAmount,
    pub at: DateTime<Utc>,
    /// Deny unless the row says mining is on
    pub require_mining: bool,
}

impl CreditRequest {
    /// A capped activity credit that only applies while mining
    pub fn activity(
        kind: ActivityKind,
        daily_cap: u32,
        points: u64,
        tokens: TokenAmount,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: Some(kind),
            daily_cap: Some(daily_cap),
            points,
            tokens,
            at,
            require_mining: true,
        }
    }

    /// An uncapped one-time bonus that only applies while mining
    pub fn bonus(points: u64, tokens: TokenAmount, at: DateTime<Utc>) -> Self {
        Self {
            kind: None,
            daily_cap: None,
            points,
            tokens,
            at,
            require_mining: true,
        }
    }

    /// Whether `current` credited occurrences already hit the cap
    pub fn cap_reached(&self, current: u32) -> bool {
        matches!(self.daily_cap, Some(cap) if current >= cap)
    }
}

/// What a [`CreditRequest`] did
#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    /// Counters were incremented; carries the row after the write
    Credited(MiningStats),
    /// Today's count was already at the cap; nothing changed
    LimitReached { count: u32 },
    /// The row is missing or not mining; nothing changed
    NotMining,
}

/// CRUD-style persistence for stats, sessions, and achievement progress
///
/// Implementations must make each method atomic with respect to concurrent
/// calls for the same user.
#[async_trait]
pub trait MiningStore: Send + Sync {
    /// Fetch the stats row for a user
    async fn get_stats(&self, user: &UserId) -> Result<Option<MiningStats>, StoreError>;

    /// Apply a partial update, creating the row if needed
    async fn upsert_stats(
        &self,
        user: &UserId,
        patch: StatsPatch,
        at: DateTime<Utc>,
    ) -> Result<MiningStats, StoreError>;

    /// Set `last_heartbeat = at` only if the row says mining is on
    ///
    /// Also refreshes `updated_at` on the user's active session. Returns
    /// whether the heartbeat was recorded.
    async fn record_heartbeat(&self, user: &UserId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Atomically check the daily cap and apply a credit
    async fn credit_activity(
        &self,
        user: &UserId,
        request: CreditRequest,
    ) -> Result<CreditOutcome, StoreError>;

    /// Zero the daily counters for a user (day boundary)
    async fn reset_daily_counters(&self, user: &UserId, at: DateTime<Utc>)
    -> Result<(), StoreError>;

    /// Open an active session
    ///
    /// Fails with [`StoreError::Conflict`] if the user already has one.
    async fn create_session(
        &self,
        user: &UserId,
        start_time: DateTime<Utc>,
    ) -> Result<MiningSession, StoreError>;

    /// Close an active session
    ///
    /// Returns `None` if the session does not exist or is already closed.
    async fn close_session(
        &self,
        session: &SessionId,
        end_time: DateTime<Utc>,
        status: SessionStatus,
    ) -> Result<Option<MiningSession>, StoreError>;

    /// The user's active session, if any
    async fn find_active_session(&self, user: &UserId)
    -> Result<Option<MiningSession>, StoreError>;

    /// All sessions for a user, oldest first
    async fn sessions_for(&self, user: &UserId) -> Result<Vec<MiningSession>, StoreError>;

    async fn get_achievement_progress(
        &self,
        user: &UserId,
        achievement: &AchievementId,
    ) -> Result<Option<UserAchievementProgress>, StoreError>;

    async fn upsert_achievement_progress(
        &self,
        progress: &UserAchievementProgress,
    ) -> Result<(), StoreError>;

    async fn list_achievement_progress(
        &self,
        user: &UserId,
    ) -> Result<Vec<UserAchievementProgress>, StoreError>;

    /// Mark every active session not updated within `threshold` of `now` as
    /// auto-terminated; returns the sessions that were closed
    async fn batch_auto_terminate(
        &self,
        threshold: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<MiningSession>, StoreError>;
}
