//! Achievement progress and one-time bonuses

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use pulse_core::{
    AchievementCatalog, AchievementId, ActivityKind, Clock, CreditOutcome, CreditRequest,
    MiningStore, ProgressChange, UserAchievementProgress, UserId, ValidationError,
};

use crate::error::MiningResult;
use crate::events::{EventBus, MiningEvent};
use crate::locks::UserLocks;

/// What `update_progress` did
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: UserAchievementProgress,
    pub change: ProgressChange,
    /// The completion bonus was credited (only possible while mining)
    pub bonus_credited: bool,
}

impl ProgressUpdate {
    pub fn unlocked(&self) -> bool {
        self.change == ProgressChange::Completed
    }
}

/// Tracks per-user achievement progress and grants completion bonuses
pub struct AchievementTracker {
    store: Arc<dyn MiningStore>,
    clock: Arc<dyn Clock>,
    catalog: Arc<AchievementCatalog>,
    events: EventBus,
    locks: UserLocks,
}

impl AchievementTracker {
    pub fn new(
        store: Arc<dyn MiningStore>,
        clock: Arc<dyn Clock>,
        catalog: Arc<AchievementCatalog>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            catalog,
            events,
            locks: UserLocks::new(),
        }
    }

    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    /// Advance one achievement by `increment`
    ///
    /// Completed achievements are never touched again. The completion row is
    /// persisted with `bonus_pending` set before the bonus is credited, and
    /// the flag is cleared once the credit settles. A credit that fails with a
    /// store error stays pending and is retried by the next update of the
    /// same achievement or by [`settle_pending_bonuses`](Self::settle_pending_bonuses).
    ///
    /// If the bonus is credited but clearing the flag fails, a later retry
    /// pays again; that window is logged at `warn`.
    #[instrument(skip_all, fields(user = %user, achievement = %achievement_id, increment = increment))]
    pub async fn update_progress(
        &self,
        user: &UserId,
        achievement_id: &AchievementId,
        increment: u32,
    ) -> MiningResult<ProgressUpdate> {
        let achievement = self
            .catalog
            .get(achievement_id)
            .ok_or_else(|| ValidationError::UnknownAchievement(achievement_id.to_string()))?;
        if increment == 0 {
            return Err(ValidationError::InvalidIncrement.into());
        }

        let _guard = self.locks.lock(user).await;
        let now = self.clock.now_utc();

        let mut progress = match self
            .store
            .get_achievement_progress(user, achievement_id)
            .await?
        {
            Some(row) => row,
            None => UserAchievementProgress::new(user.clone(), achievement, now),
        };

        let change = progress.advance(increment, now);
        if change == ProgressChange::Unchanged {
            debug!(completed = progress.completed, "Progress unchanged");
            let bonus_credited = self.pay_bonus(user, &mut progress, true).await;
            return Ok(ProgressUpdate {
                progress,
                change,
                bonus_credited,
            });
        }
        if change == ProgressChange::Completed {
            progress.bonus_pending = progress.has_bonus();
        }
        self.store.upsert_achievement_progress(&progress).await?;

        let mut bonus_credited = false;
        if change == ProgressChange::Completed {
            bonus_credited = self.pay_bonus(user, &mut progress, false).await;
            info!(bonus_credited, "Achievement unlocked");
            self.events.emit(MiningEvent::AchievementUnlocked {
                user: user.clone(),
                achievement: progress.achievement_id.clone(),
                points: progress.points_reward,
                tokens: progress.token_reward,
                bonus_credited,
            });
        }

        Ok(ProgressUpdate {
            progress,
            change,
            bonus_credited,
        })
    }

    /// Retry every completion bonus left pending by a failed credit
    ///
    /// Returns how many were credited. Bonuses stay pending while the user is
    /// not mining.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn settle_pending_bonuses(&self, user: &UserId) -> MiningResult<usize> {
        let _guard = self.locks.lock(user).await;

        let mut credited = 0;
        for mut progress in self.store.list_achievement_progress(user).await? {
            if self.pay_bonus(user, &mut progress, true).await {
                credited += 1;
            }
        }
        if credited > 0 {
            info!(credited, "Pending achievement bonuses credited");
        }
        Ok(credited)
    }

    /// Count one social activity toward its achievement
    ///
    /// Kinds without an achievement are ignored.
    pub async fn track_social_activity(
        &self,
        user: &UserId,
        kind: ActivityKind,
    ) -> MiningResult<Option<ProgressUpdate>> {
        let Some(achievement_id) = self.catalog.for_activity(kind) else {
            return Ok(None);
        };
        let achievement_id = achievement_id.clone();
        self.update_progress(user, &achievement_id, 1).await.map(Some)
    }

    /// Every progress row for `user`, including achievements not yet started
    pub async fn list_progress(&self, user: &UserId) -> MiningResult<Vec<UserAchievementProgress>> {
        let stored = self.store.list_achievement_progress(user).await?;
        let now = self.clock.now_utc();

        Ok(self
            .catalog
            .iter()
            .map(|achievement| {
                stored
                    .iter()
                    .find(|row| row.achievement_id == achievement.id)
                    .cloned()
                    .unwrap_or_else(|| UserAchievementProgress::new(user.clone(), achievement, now))
            })
            .collect())
    }

    /// Credit a pending bonus and clear the flag once the attempt settles
    ///
    /// On a retry, `NotMining` leaves the bonus pending; on the first attempt
    /// it forfeits the bonus.
    async fn pay_bonus(
        &self,
        user: &UserId,
        progress: &mut UserAchievementProgress,
        retry: bool,
    ) -> bool {
        if !progress.bonus_pending {
            return false;
        }
        let request =
            CreditRequest::bonus(progress.points_reward, progress.token_reward, self.clock.now_utc());
        let credited = match self.store.credit_activity(user, request).await {
            Ok(CreditOutcome::Credited(_)) => true,
            Ok(CreditOutcome::NotMining) if retry => {
                debug!(achievement = %progress.achievement_id, "Not mining, bonus stays pending");
                return false;
            }
            Ok(CreditOutcome::NotMining) => {
                debug!("Not mining, completion bonus skipped");
                false
            }
            Ok(CreditOutcome::LimitReached { .. }) => false,
            Err(e) => {
                warn!(achievement = %progress.achievement_id, error = %e, "Failed to credit completion bonus, left pending");
                return false;
            }
        };

        progress.bonus_pending = false;
        if let Err(e) = self.store.upsert_achievement_progress(progress).await {
            warn!(
                achievement = %progress.achievement_id,
                credited,
                error = %e,
                "Failed to clear pending bonus flag"
            );
        }
        credited
    }
}

impl std::fmt::Debug for AchievementTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AchievementTracker")
            .field("achievements", &self.catalog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{Achievement, ManualClock, StatsPatch, TokenAmount};
    use pulse_storage::{InMemoryMiningStore, StoreOperation};

    use crate::error::MiningError;

    fn tracker_with(catalog: AchievementCatalog) -> (Arc<InMemoryMiningStore>, AchievementTracker, EventBus) {
        let store = Arc::new(InMemoryMiningStore::new());
        let events = EventBus::new(64);
        let tracker = AchievementTracker::new(
            store.clone(),
            Arc::new(ManualClock::starting_now()),
            Arc::new(catalog),
            events.clone(),
        );
        (store, tracker, events)
    }

    fn five_step() -> AchievementCatalog {
        AchievementCatalog::empty()
            .with_achievement(
                Achievement::new("five", "Five", "Do it five times", 5)
                    .with_reward(100, TokenAmount::from_whole(10)),
            )
            .with_social_mapping(ActivityKind::Like, "five".into())
    }

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    async fn start_mining(store: &InMemoryMiningStore, user: &UserId) {
        store
            .upsert_stats(user, StatsPatch::new().mining(true), chrono::Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clamps_and_completes_once() {
        let (store, tracker, events) = tracker_with(five_step());
        let user = alice();
        start_mining(&store, &user).await;
        let mut rx = events.subscribe();
        let id = AchievementId::new("five");

        let first = tracker.update_progress(&user, &id, 3).await.unwrap();
        assert_eq!(first.change, ProgressChange::Advanced { progress: 3 });
        assert!(!first.progress.completed);

        let second = tracker.update_progress(&user, &id, 3).await.unwrap();
        assert!(second.unlocked());
        assert!(second.bonus_credited);
        assert_eq!(second.progress.progress, 5);

        let third = tracker.update_progress(&user, &id, 3).await.unwrap();
        assert_eq!(third.change, ProgressChange::Unchanged);
        assert_eq!(third.progress.progress, 5);
        assert!(!third.bonus_credited);

        let stats = store.get_stats(&user).await.unwrap().unwrap();
        assert_eq!(stats.total_points, 100);
        assert_eq!(stats.total_tokens_earned, TokenAmount::from_whole(10));
        assert_eq!(stats.daily_counts.total(), 0);

        let unlocked = rx.recv().await.unwrap();
        assert!(matches!(unlocked, MiningEvent::AchievementUnlocked { bonus_credited: true, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_bonus_while_idle() {
        let (store, tracker, _events) = tracker_with(five_step());
        let user = alice();

        let update = tracker
            .update_progress(&user, &"five".into(), 10)
            .await
            .unwrap();
        assert!(update.unlocked());
        assert!(!update.bonus_credited);
        assert!(store.get_stats(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_bonus_credit_is_retried_once() {
        let (store, tracker, events) = tracker_with(five_step());
        let user = alice();
        start_mining(&store, &user).await;
        let mut rx = events.subscribe();
        let id = AchievementId::new("five");

        store.faults().fail(StoreOperation::CreditActivity);
        let update = tracker.update_progress(&user, &id, 5).await.unwrap();
        assert!(update.unlocked());
        assert!(!update.bonus_credited);
        assert!(update.progress.bonus_pending);
        let row = store.get_achievement_progress(&user, &id).await.unwrap().unwrap();
        assert!(row.bonus_pending);

        // Still failing: nothing paid, still owed
        assert_eq!(tracker.settle_pending_bonuses(&user).await.unwrap(), 0);

        store.faults().heal(StoreOperation::CreditActivity);
        assert_eq!(tracker.settle_pending_bonuses(&user).await.unwrap(), 1);
        assert_eq!(tracker.settle_pending_bonuses(&user).await.unwrap(), 0);
        let again = tracker.update_progress(&user, &id, 1).await.unwrap();
        assert!(!again.bonus_credited);

        let stats = store.get_stats(&user).await.unwrap().unwrap();
        assert_eq!(stats.total_points, 100);
        assert_eq!(stats.total_tokens_earned, TokenAmount::from_whole(10));
        let row = store.get_achievement_progress(&user, &id).await.unwrap().unwrap();
        assert!(!row.bonus_pending);

        assert!(matches!(
            rx.recv().await.unwrap(),
            MiningEvent::AchievementUnlocked { bonus_credited: false, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pending_bonus_paid_by_next_update() {
        let (store, tracker, _events) = tracker_with(five_step());
        let user = alice();
        start_mining(&store, &user).await;
        let id = AchievementId::new("five");

        store.faults().fail(StoreOperation::CreditActivity);
        tracker.update_progress(&user, &id, 5).await.unwrap();
        store.faults().heal(StoreOperation::CreditActivity);

        let retried = tracker.update_progress(&user, &id, 1).await.unwrap();
        assert_eq!(retried.change, ProgressChange::Unchanged);
        assert!(retried.bonus_credited);
        assert!(!retried.progress.bonus_pending);
        assert_eq!(store.get_stats(&user).await.unwrap().unwrap().total_points, 100);
    }

    #[tokio::test]
    async fn test_idle_completion_forfeits_bonus() {
        let (store, tracker, _events) = tracker_with(five_step());
        let user = alice();
        tracker.update_progress(&user, &"five".into(), 5).await.unwrap();

        let row = store
            .get_achievement_progress(&user, &"five".into())
            .await
            .unwrap()
            .unwrap();
        assert!(!row.bonus_pending);
        start_mining(&store, &user).await;
        assert_eq!(tracker.settle_pending_bonuses(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validation() {
        let (_store, tracker, _events) = tracker_with(five_step());
        let user = alice();

        let unknown = tracker.update_progress(&user, &"nope".into(), 1).await;
        assert!(matches!(
            unknown,
            Err(MiningError::Validation(ValidationError::UnknownAchievement(_)))
        ));
        let zero = tracker.update_progress(&user, &"five".into(), 0).await;
        assert!(matches!(
            zero,
            Err(MiningError::Validation(ValidationError::InvalidIncrement))
        ));
    }

    #[tokio::test]
    async fn test_social_mapping() {
        let (_store, tracker, _events) = tracker_with(five_step());
        let user = alice();

        let liked = tracker
            .track_social_activity(&user, ActivityKind::Like)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(liked.progress.progress, 1);

        let ignored = tracker
            .track_social_activity(&user, ActivityKind::Invite)
            .await
            .unwrap();
        assert!(ignored.is_none());
    }

    #[tokio::test]
    async fn test_list_progress_covers_catalog() {
        let (_store, tracker, _events) = tracker_with(AchievementCatalog::default());
        let user = alice();
        tracker
            .track_social_activity(&user, ActivityKind::Post)
            .await
            .unwrap();

        let rows = tracker.list_progress(&user).await.unwrap();
        assert_eq!(rows.len(), tracker.catalog().len());
        let started: Vec<_> = rows.iter().filter(|r| r.progress > 0).collect();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].achievement_id, AchievementId::new("content_creator"));
    }
}
