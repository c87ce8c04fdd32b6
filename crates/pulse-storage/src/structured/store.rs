//! Persistent [`MiningStore`] backed by redb
//!
//! Each trait method that must be atomic runs inside a single write
//! transaction. redb admits one writer at a time, which gives the
//! check-then-write operations (credit with cap, conditional heartbeat,
//! single active session) their isolation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use redb::ReadableTable;
use tracing::{debug, trace};

use pulse_core::{
    AchievementId, CreditOutcome, CreditRequest, MiningSession, MiningStats, MiningStore,
    SessionId, SessionStatus, StatsPatch, StoreError, UserAchievementProgress, UserId,
};

use super::tables::{
    ACHIEVEMENTS, ACTIVE_SESSIONS, RedbStorage, RedbStorageConfig, SESSIONS, STATS,
    USER_SESSIONS, achievement_key, decode, encode, io_err, user_prefix, user_session_key,
};
use crate::fault::{FaultInjector, StoreOperation};

/// redb implementation of [`MiningStore`]
pub struct RedbMiningStore {
    storage: Arc<RedbStorage>,
    faults: FaultInjector,
}

impl RedbMiningStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self {
            storage,
            faults: FaultInjector::new(),
        }
    }

    /// Open (or create) the database at the configured path
    pub fn open(config: RedbStorageConfig) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(RedbStorage::open(config)?)))
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn storage(&self) -> &Arc<RedbStorage> {
        &self.storage
    }

    fn decode_session_id(bytes: &[u8]) -> Result<SessionId, StoreError> {
        let raw: [u8; 16] = bytes
            .try_into()
            .map_err(|_| StoreError::deserialization("session id is not 16 bytes"))?;
        Ok(SessionId::from_bytes(raw))
    }
}

impl std::fmt::Debug for RedbMiningStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbMiningStore")
            .field("db_path", &self.storage.config().db_path)
            .finish()
    }
}

#[async_trait]
impl MiningStore for RedbMiningStore {
    async fn get_stats(&self, user: &UserId) -> Result<Option<MiningStats>, StoreError> {
        self.faults.check(StoreOperation::GetStats).await?;
        self.storage
            .get(STATS, user.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    async fn upsert_stats(
        &self,
        user: &UserId,
        patch: StatsPatch,
        at: DateTime<Utc>,
    ) -> Result<MiningStats, StoreError> {
        self.faults.check(StoreOperation::UpsertStats).await?;
        trace!(user = %user, ?patch, "Upserting stats");

        let txn = self.storage.begin_write()?;
        let stats = {
            let mut table = txn.open_table(STATS).map_err(io_err)?;
            let existing = table
                .get(user.as_bytes())
                .map_err(io_err)?
                .map(|v| v.value().to_vec());
            let mut stats = match existing {
                Some(bytes) => decode::<MiningStats>(&bytes)?,
                None => MiningStats::new(user.clone(), at),
            };
            stats.apply(&patch, at);
            table
                .insert(user.as_bytes(), encode(&stats)?.as_slice())
                .map_err(io_err)?;
            stats
        };
        txn.commit().map_err(io_err)?;
        Ok(stats)
    }

    async fn record_heartbeat(&self, user: &UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.faults.check(StoreOperation::RecordHeartbeat).await?;

        let txn = self.storage.begin_write()?;
        let recorded = {
            let mut stats_table = txn.open_table(STATS).map_err(io_err)?;
            let existing = stats_table
                .get(user.as_bytes())
                .map_err(io_err)?
                .map(|v| v.value().to_vec());

            match existing {
                Some(bytes) => {
                    let mut stats: MiningStats = decode(&bytes)?;
                    if stats.is_mining {
                        stats.last_heartbeat = Some(at);
                        stats.updated_at = at;
                        stats_table
                            .insert(user.as_bytes(), encode(&stats)?.as_slice())
                            .map_err(io_err)?;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if !recorded {
            txn.abort().map_err(io_err)?;
            return Ok(false);
        }

        {
            let active = txn.open_table(ACTIVE_SESSIONS).map_err(io_err)?;
            let session_key = active
                .get(user.as_bytes())
                .map_err(io_err)?
                .map(|v| v.value().to_vec());
            if let Some(key) = session_key {
                let mut sessions = txn.open_table(SESSIONS).map_err(io_err)?;
                let row = sessions
                    .get(key.as_slice())
                    .map_err(io_err)?
                    .map(|v| v.value().to_vec());
                if let Some(bytes) = row {
                    let mut session: MiningSession = decode(&bytes)?;
                    session.touch(at);
                    sessions
                        .insert(key.as_slice(), encode(&session)?.as_slice())
                        .map_err(io_err)?;
                }
            }
        }

        txn.commit().map_err(io_err)?;
        trace!(user = %user, "Heartbeat");
        Ok(true)
    }

    async fn credit_activity(
        &self,
        user: &UserId,
        request: CreditRequest,
    ) -> Result<CreditOutcome, StoreError> {
        self.faults.check(StoreOperation::CreditActivity).await?;

        let txn = self.storage.begin_write()?;
        let outcome = {
            let mut table = txn.open_table(STATS).map_err(io_err)?;
            let existing = table
                .get(user.as_bytes())
                .map_err(io_err)?
                .map(|v| v.value().to_vec());

            let stats = match existing {
                Some(bytes) => Some(decode::<MiningStats>(&bytes)?),
                None => None,
            };

            match stats {
                None if request.require_mining => CreditOutcome::NotMining,
                Some(ref s) if request.require_mining && !s.is_mining => CreditOutcome::NotMining,
                stats => {
                    let mut stats =
                        stats.unwrap_or_else(|| MiningStats::new(user.clone(), request.at));
                    let count = request.kind.map(|k| stats.count_for(k)).unwrap_or(0);
                    if request.kind.is_some() && request.cap_reached(count) {
                        CreditOutcome::LimitReached { count }
                    } else {
                        stats.apply_credit(request.kind, request.points, request.tokens, request.at);
                        table
                            .insert(user.as_bytes(), encode(&stats)?.as_slice())
                            .map_err(io_err)?;
                        CreditOutcome::Credited(stats)
                    }
                }
            }
        };

        match outcome {
            CreditOutcome::Credited(_) => txn.commit().map_err(io_err)?,
            CreditOutcome::LimitReached { count } => {
                debug!(user = %user, count, "Daily cap reached");
                txn.abort().map_err(io_err)?
            }
            CreditOutcome::NotMining => txn.abort().map_err(io_err)?,
        }
        Ok(outcome)
    }

    async fn reset_daily_counters(
        &self,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.faults.check(StoreOperation::ResetDailyCounters).await?;

        let txn = self.storage.begin_write()?;
        {
            let mut table = txn.open_table(STATS).map_err(io_err)?;
            let existing = table
                .get(user.as_bytes())
                .map_err(io_err)?
                .map(|v| v.value().to_vec());
            if let Some(bytes) = existing {
                let mut stats: MiningStats = decode(&bytes)?;
                stats.reset_daily(at);
                table
                    .insert(user.as_bytes(), encode(&stats)?.as_slice())
                    .map_err(io_err)?;
            }
        }
        txn.commit().map_err(io_err)?;
        Ok(())
    }

    async fn create_session(
        &self,
        user: &UserId,
        start_time: DateTime<Utc>,
    ) -> Result<MiningSession, StoreError> {
        self.faults.check(StoreOperation::CreateSession).await?;

        let txn = self.storage.begin_write()?;
        let created = {
            let mut active = txn.open_table(ACTIVE_SESSIONS).map_err(io_err)?;
            let mut sessions = txn.open_table(SESSIONS).map_err(io_err)?;

            let current = active
                .get(user.as_bytes())
                .map_err(io_err)?
                .map(|v| v.value().to_vec());
            let conflict = match current {
                Some(key) => {
                    let row = sessions
                        .get(key.as_slice())
                        .map_err(io_err)?
                        .map(|v| v.value().to_vec());
                    match row {
                        Some(bytes) => {
                            let existing: MiningSession = decode(&bytes)?;
                            existing.is_active().then_some(existing.id)
                        }
                        None => None,
                    }
                }
                None => None,
            };

            match conflict {
                Some(id) => Err(StoreError::conflict(format!(
                    "user {} already has active session {}",
                    user, id
                ))),
                None => {
                    let session = MiningSession::new(user.clone(), start_time);
                    let id = session.id.as_bytes();
                    sessions
                        .insert(id.as_slice(), encode(&session)?.as_slice())
                        .map_err(io_err)?;
                    active
                        .insert(user.as_bytes(), id.as_slice())
                        .map_err(io_err)?;
                    let mut index = txn.open_table(USER_SESSIONS).map_err(io_err)?;
                    index
                        .insert(user_session_key(user, id).as_slice(), b"".as_slice())
                        .map_err(io_err)?;
                    Ok(session)
                }
            }
        };

        match created {
            Ok(session) => {
                txn.commit().map_err(io_err)?;
                Ok(session)
            }
            Err(e) => {
                txn.abort().map_err(io_err)?;
                Err(e)
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

        let txn = self.storage.begin_write()?;
        let closed = {
            let mut sessions = txn.open_table(SESSIONS).map_err(io_err)?;
            let key = session.as_bytes();
            let row = sessions
                .get(key.as_slice())
                .map_err(io_err)?
                .map(|v| v.value().to_vec());

            match row {
                Some(bytes) => {
                    let mut row: MiningSession = decode(&bytes)?;
                    if row.close(end_time, status) {
                        sessions
                            .insert(key.as_slice(), encode(&row)?.as_slice())
                            .map_err(io_err)?;
                        Some(row)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        let Some(closed) = closed else {
            txn.abort().map_err(io_err)?;
            return Ok(None);
        };

        {
            let mut active = txn.open_table(ACTIVE_SESSIONS).map_err(io_err)?;
            let points_here = active
                .get(closed.user_id.as_bytes())
                .map_err(io_err)?
                .is_some_and(|v| v.value() == session.as_bytes().as_slice());
            if points_here {
                active.remove(closed.user_id.as_bytes()).map_err(io_err)?;
            }
        }

        txn.commit().map_err(io_err)?;
        Ok(Some(closed))
    }

    async fn find_active_session(
        &self,
        user: &UserId,
    ) -> Result<Option<MiningSession>, StoreError> {
        self.faults.check(StoreOperation::FindActiveSession).await?;

        let Some(key) = self.storage.get(ACTIVE_SESSIONS, user.as_bytes())? else {
            return Ok(None);
        };
        let Some(bytes) = self.storage.get(SESSIONS, &key)? else {
            return Ok(None);
        };
        let session: MiningSession = decode(&bytes)?;
        Ok(session.is_active().then_some(session))
    }

    async fn sessions_for(&self, user: &UserId) -> Result<Vec<MiningSession>, StoreError> {
        self.faults.check(StoreOperation::SessionsFor).await?;

        let prefix = user_prefix(user);
        let entries = self.storage.scan_prefix(USER_SESSIONS, &prefix)?;

        let mut sessions = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            let id = Self::decode_session_id(&key[prefix.len()..])?;
            if let Some(bytes) = self.storage.get(SESSIONS, id.as_bytes())? {
                sessions.push(decode::<MiningSession>(&bytes)?);
            }
        }

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
        self.storage
            .get(ACHIEVEMENTS, &achievement_key(user, achievement))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    async fn upsert_achievement_progress(
        &self,
        progress: &UserAchievementProgress,
    ) -> Result<(), StoreError> {
        self.faults
            .check(StoreOperation::UpsertAchievementProgress)
            .await?;
        let key = achievement_key(&progress.user_id, &progress.achievement_id);
        self.storage.put(ACHIEVEMENTS, &key, &encode(progress)?)
    }

    async fn list_achievement_progress(
        &self,
        user: &UserId,
    ) -> Result<Vec<UserAchievementProgress>, StoreError> {
        self.faults
            .check(StoreOperation::ListAchievementProgress)
            .await?;

        let entries = self.storage.scan_prefix(ACHIEVEMENTS, &user_prefix(user))?;
        entries
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    async fn batch_auto_terminate(
        &self,
        threshold: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<MiningSession>, StoreError> {
        self.faults.check(StoreOperation::BatchAutoTerminate).await?;
        let cutoff = now - threshold;

        let txn = self.storage.begin_write()?;
        let terminated = {
            let mut active = txn.open_table(ACTIVE_SESSIONS).map_err(io_err)?;
            let mut sessions = txn.open_table(SESSIONS).map_err(io_err)?;

            let mut pointers = Vec::new();
            for entry in active.iter().map_err(io_err)? {
                let (user, session) = entry.map_err(io_err)?;
                pointers.push((user.value().to_vec(), session.value().to_vec()));
            }

            let mut terminated = Vec::new();
            for (user, key) in pointers {
                let row = sessions
                    .get(key.as_slice())
                    .map_err(io_err)?
                    .map(|v| v.value().to_vec());
                let Some(bytes) = row else {
                    continue;
                };
                let mut session: MiningSession = decode(&bytes)?;
                if session.updated_at >= cutoff
                    || !session.close(now, SessionStatus::AutoTerminated)
                {
                    continue;
                }
                sessions
                    .insert(key.as_slice(), encode(&session)?.as_slice())
                    .map_err(io_err)?;
                active.remove(user.as_slice()).map_err(io_err)?;
                terminated.push(session);
            }
            terminated
        };
        txn.commit().map_err(io_err)?;

        if !terminated.is_empty() {
            debug!(count = terminated.len(), "Auto-terminated inactive sessions");
        }
        Ok(terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{ActivityKind, TokenAmount};
    use tempfile::TempDir;

    fn create_test_store() -> (RedbMiningStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("mining.redb"),
        };
        (RedbMiningStore::open(config).unwrap(), temp_dir)
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_stats_persist_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("mining.redb"),
        };
        let alice = user("alice");
        let now = Utc::now();

        {
            let store = RedbMiningStore::open(config.clone()).unwrap();
            store
                .upsert_stats(&alice, StatsPatch::new().mining(true).streak(3), now)
                .await
                .unwrap();
            store
                .credit_activity(
                    &alice,
                    CreditRequest::activity(ActivityKind::Post, 10, 50, TokenAmount::from_whole(5), now),
                )
                .await
                .unwrap();
        }

        let store = RedbMiningStore::open(config).unwrap();
        let stats = store.get_stats(&alice).await.unwrap().unwrap();
        assert!(stats.is_mining);
        assert_eq!(stats.streak_days, 3);
        assert_eq!(stats.total_points, 50);
        assert_eq!(stats.count_for(ActivityKind::Post), 1);
    }

    #[tokio::test]
    async fn test_credit_cap_and_not_mining() {
        let (store, _temp) = create_test_store();
        let alice = user("alice");
        let now = Utc::now();
        let req = || CreditRequest::activity(ActivityKind::Invite, 1, 100, TokenAmount::from_whole(10), now);

        assert_eq!(
            store.credit_activity(&alice, req()).await.unwrap(),
            CreditOutcome::NotMining
        );

        store
            .upsert_stats(&alice, StatsPatch::new().mining(true), now)
            .await
            .unwrap();
        assert!(matches!(
            store.credit_activity(&alice, req()).await.unwrap(),
            CreditOutcome::Credited(_)
        ));
        assert_eq!(
            store.credit_activity(&alice, req()).await.unwrap(),
            CreditOutcome::LimitReached { count: 1 }
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (store, _temp) = create_test_store();
        let alice = user("alice");
        let now = Utc::now();

        let session = store.create_session(&alice, now).await.unwrap();
        assert!(store.create_session(&alice, now).await.unwrap_err().is_conflict());
        assert_eq!(
            store.find_active_session(&alice).await.unwrap().map(|s| s.id),
            Some(session.id)
        );

        let closed = store
            .close_session(&session.id, now + TimeDelta::hours(1), SessionStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
        assert!(store
            .close_session(&session.id, now, SessionStatus::Completed)
            .await
            .unwrap()
            .is_none());
        assert!(store.find_active_session(&alice).await.unwrap().is_none());

        let second = store.create_session(&alice, now + TimeDelta::hours(2)).await.unwrap();
        let history = store.sessions_for(&alice).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, session.id);
        assert_eq!(history[1].id, second.id);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_session() {
        let (store, _temp) = create_test_store();
        let alice = user("alice");
        let start = Utc::now();

        assert!(!store.record_heartbeat(&alice, start).await.unwrap());

        store
            .upsert_stats(&alice, StatsPatch::new().mining(true), start)
            .await
            .unwrap();
        store.create_session(&alice, start).await.unwrap();

        let later = start + TimeDelta::minutes(2);
        assert!(store.record_heartbeat(&alice, later).await.unwrap());

        let stats = store.get_stats(&alice).await.unwrap().unwrap();
        assert_eq!(stats.last_heartbeat, Some(later));
        let session = store.find_active_session(&alice).await.unwrap().unwrap();
        assert_eq!(session.updated_at, later);
    }

    #[tokio::test]
    async fn test_batch_auto_terminate() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();
        let stale = user("stale");
        let fresh = user("fresh");

        store.create_session(&stale, now - TimeDelta::hours(5)).await.unwrap();
        store.create_session(&fresh, now - TimeDelta::minutes(10)).await.unwrap();

        let terminated = store
            .batch_auto_terminate(TimeDelta::hours(3), now)
            .await
            .unwrap();
        assert_eq!(terminated.len(), 1);
        assert_eq!(terminated[0].user_id, stale);
        assert!(store.find_active_session(&stale).await.unwrap().is_none());
        assert!(store.find_active_session(&fresh).await.unwrap().is_some());

        // A second pass finds nothing new
        assert!(store
            .batch_auto_terminate(TimeDelta::hours(3), now)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_achievement_progress_listing() {
        let (store, _temp) = create_test_store();
        let alice = user("alice");
        let catalog = pulse_core::AchievementCatalog::default();
        let now = Utc::now();

        for achievement in catalog.iter() {
            let row = UserAchievementProgress::new(alice.clone(), achievement, now);
            store.upsert_achievement_progress(&row).await.unwrap();
        }
        let rows = store.list_achievement_progress(&alice).await.unwrap();
        assert_eq!(rows.len(), catalog.len());
        assert!(store
            .list_achievement_progress(&user("bob"))
            .await
            .unwrap()
            .is_empty());
    }
}
