//! In-memory storage implementation
//!
//! Suitable for tests, simulation, and single-process deployments. Per-user
//! atomicity comes from DashMap's shard locks: every read-check-write happens
//! while holding the entry guard for the row being changed.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use pulse_core::{
    AchievementId, CreditOutcome, CreditRequest, MiningSession, MiningStats, MiningStore,
    SessionId, SessionStatus, StatsPatch, StoreError, UserAchievementProgress, UserId,
};

use crate::fault::{FaultInjector, StoreOperation};

/// In-memory implementation of [`MiningStore`]
#[derive(Debug, Default)]
pub struct InMemoryMiningStore {
    stats: DashMap<UserId, MiningStats>,
    sessions: DashMap<SessionId, MiningSession>,
    /// Index: user -> their active session
    active: DashMap<UserId, SessionId>,
    achievements: DashMap<(UserId, AchievementId), UserAchievementProgress>,
    faults: FaultInjector,
}

impl InMemoryMiningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection switches for this store
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Number of users with a stats row
    pub fn user_count(&self) -> usize {
        self.stats.len()
    }

    /// Number of sessions currently marked active, across all users
    pub fn active_session_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_active()).count()
    }

    /// Insert or overwrite a stats row directly (test setup)
    pub fn seed_stats(&self, stats: MiningStats) {
        self.stats.insert(stats.user_id.clone(), stats);
    }

    /// Insert or overwrite a session row directly (test setup)
    ///
    /// Keeps the active index consistent with the seeded row.
    pub fn seed_session(&self, session: MiningSession) {
        if session.is_active() {
            self.active.insert(session.user_id.clone(), session.id);
        }
        self.sessions.insert(session.id, session);
    }

    fn active_session_id(&self, user: &UserId) -> Option<SessionId> {
        self.active.get(user).map(|id| *id)
    }
}

#[async_trait]
impl MiningStore for InMemoryMiningStore {
    async fn get_stats(&self, user: &UserId) -> Result<Option<MiningStats>, StoreError> {
        self.faults.check(StoreOperation::GetStats).await?;
        Ok(self.stats.get(user).map(|s| s.clone()))
    }

    async fn upsert_stats(
        &self,
        user: &UserId,
        patch: StatsPatch,
        at: DateTime<Utc>,
    ) -> Result<MiningStats, StoreError> {
        self.faults.check(StoreOperation::UpsertStats).await?;
        trace!(user = %user, ?patch, "Upserting stats");

        let mut entry = self
            .stats
            .entry(user.clone())
            .or_insert_with(|| MiningStats::new(user.clone(), at));
        entry.apply(&patch, at);
        Ok(entry.clone())
    }

    async fn record_heartbeat(&self, user: &UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.faults.check(StoreOperation::RecordHeartbeat).await?;

        let recorded = match self.stats.get_mut(user) {
            Some(mut stats) if stats.is_mining => {
                stats.last_heartbeat = Some(at);
                stats.updated_at = at;
                true
            }
            _ => false,
        };

        if recorded
            && let Some(id) = self.active_session_id(user)
            && let Some(mut session) = self.sessions.get_mut(&id)
        {
            session.touch(at);
        }

        trace!(user = %user, recorded, "Heartbeat");
        Ok(recorded)
    }

    async fn credit_activity(
        &self,
        user: &UserId,
        request: CreditRequest,
    ) -> Result<CreditOutcome, StoreError> {
        self.faults.check(StoreOperation::CreditActivity).await?;

        let mut stats = match self.stats.entry(user.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(_) if request.require_mining => return Ok(CreditOutcome::NotMining),
            Entry::Vacant(entry) => entry.insert(MiningStats::new(user.clone(), request.at)),
        };

        if request.require_mining && !stats.is_mining {
            return Ok(CreditOutcome::NotMining);
        }
        if let Some(kind) = request.kind {
            let count = stats.count_for(kind);
            if request.cap_reached(count) {
                debug!(user = %user, kind = %kind, count, "Daily cap reached");
                return Ok(CreditOutcome::LimitReached { count });
            }
        }

        stats.apply_credit(request.kind, request.points, request.tokens, request.at);
        Ok(CreditOutcome::Credited(stats.clone()))
    }

    async fn reset_daily_counters(
        &self,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.faults.check(StoreOperation::ResetDailyCounters).await?;
        if let Some(mut stats) = self.stats.get_mut(user) {
            stats.reset_daily(at);
        }
        Ok(())
    }

    async fn create_session(
        &self,
        user: &UserId,
        start_time: DateTime<Utc>,
    ) -> Result<MiningSession, StoreError> {
        self.faults.check(StoreOperation::CreateSession).await?;

        // Lock order: active index, then sessions
        match self.active.entry(user.clone()) {
            Entry::Occupied(mut entry) => {
                let still_active = self
                    .sessions
                    .get(entry.get())
                    .is_some_and(|s| s.is_active());
                if still_active {
                    return Err(StoreError::conflict(format!(
                        "user {} already has active session {}",
                        user,
                        entry.get()
                    )));
                }
                let session = MiningSession::new(user.clone(), start_time);
                self.sessions.insert(session.id, session.clone());
                entry.insert(session.id);
                Ok(session)
            }
            Entry::Vacant(entry) => {
                let session = MiningSession::new(user.clone(), start_time);
                self.sessions.insert(session.id, session.clone());
                entry.insert(session.id);
                Ok(session)
            }
        }
    }

    async fn close_session(
        &self,
        session: &SessionId,
        end_time: DateTime<Utc>,
        status: SessionStatus,
    ) -> Result<Option<MiningSession>, StoreError> {
        self.faults.check(StoreOperation::CloseSession).await?;

        let closed = {
            let Some(mut row) = self.sessions.get_mut(session) else {
                return Ok(None);
            };
            if !row.close(end_time, status) {
                return Ok(None);
            }
            row.clone()
        };

        self.active.remove_if(&closed.user_id, |_, id| id == session);
        Ok(Some(closed))
    }

    async fn find_active_session(
        &self,
        user: &UserId,
    ) -> Result<Option<MiningSession>, StoreError> {
        self.faults.check(StoreOperation::FindActiveSession).await?;
        let Some(id) = self.active_session_id(user) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&id)
            .filter(|s| s.is_active())
            .map(|s| s.clone()))
    }

    async fn sessions_for(&self, user: &UserId) -> Result<Vec<MiningSession>, StoreError> {
        self.faults.check(StoreOperation::SessionsFor).await?;
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .filter(|s| &s.user_id == user)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by_key(|s| (s.start_time, s.id));
        Ok(sessions)
    }

    async fn get_achievement_progress(
        &self,
        user: &UserId,
        achievement: &AchievementId,
    ) -> Result<Option<UserAchievementProgress>, StoreError> {
        self.faults
            .check(StoreOperation::GetAchievementProgress)
            .await?;
        Ok(self
            .achievements
            .get(&(user.clone(), achievement.clone()))
            .map(|p| p.clone()))
    }

    async fn upsert_achievement_progress(
        &self,
        progress: &UserAchievementProgress,
    ) -> Result<(), StoreError> {
        self.faults
            .check(StoreOperation::UpsertAchievementProgress)
            .await?;
        self.achievements.insert(
            (progress.user_id.clone(), progress.achievement_id.clone()),
            progress.clone(),
        );
        Ok(())
    }

    async fn list_achievement_progress(
        &self,
        user: &UserId,
    ) -> Result<Vec<UserAchievementProgress>, StoreError> {
        self.faults
            .check(StoreOperation::ListAchievementProgress)
            .await?;
        let mut rows: Vec<_> = self
            .achievements
            .iter()
            .filter(|p| &p.user_id == user)
            .map(|p| p.clone())
            .collect();
        rows.sort_by(|a, b| a.achievement_id.cmp(&b.achievement_id));
        Ok(rows)
    }

    async fn batch_auto_terminate(
        &self,
        threshold: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<MiningSession>, StoreError> {
        self.faults.check(StoreOperation::BatchAutoTerminate).await?;
        let cutoff = now - threshold;

        let candidates: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.is_active() && s.updated_at < cutoff)
            .map(|s| s.id)
            .collect();

        let mut terminated = Vec::with_capacity(candidates.len());
        for id in candidates {
            let closed = {
                let Some(mut row) = self.sessions.get_mut(&id) else {
                    continue;
                };
                // Re-check under the row lock; a heartbeat may have landed
                if row.updated_at >= cutoff || !row.close(now, SessionStatus::AutoTerminated) {
                    continue;
                }
                row.clone()
            };
            self.active.remove_if(&closed.user_id, |_, active| *active == id);
            terminated.push(closed);
        }

        if !terminated.is_empty() {
            debug!(count = terminated.len(), "Auto-terminated inactive sessions");
        }
        Ok(terminated)
    }
}
