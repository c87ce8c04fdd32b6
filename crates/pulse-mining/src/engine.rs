//! Engine wiring and the per-user facade
//!
//! [`MiningEngine`] owns one instance of each component and the background
//! tasks. UI code talks to a [`MiningHandle`], an explicit per-user object
//! that replaces any process-wide "current mining status".

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::TimeDelta;
use dashmap::DashMap;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use pulse_core::{
    AchievementCatalog, AchievementId, ActivityKind, Clock, CreditOutcome, CreditRequest,
    MiningSession, MiningStats, MiningStore, SystemClock, TokenAmount, UserAchievementProgress,
    UserId,
};

use crate::achievements::{AchievementTracker, ProgressUpdate};
use crate::cleanup::SessionJanitor;
use crate::config::MiningConfig;
use crate::error::{MiningError, MiningResult};
use crate::events::{EventBus, MiningEvent};
use crate::heartbeat::{HeartbeatMonitor, MiningHealth};
use crate::limiter::{ActivityLimiter, LimitDecision};
use crate::reward::{ActivityOutcome, ComboMultiplier, RewardCalculator};
use crate::session::{SessionController, StartOutcome, StopOutcome};
use crate::sync::{MiningSyncCoordinator, SyncOutcome};

/// Passive accrual for the running session, for display only
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProjection {
    pub session: MiningSession,
    pub elapsed: TimeDelta,
    /// `mining_rate x elapsed hours x efficiency`; never credited
    pub projected_tokens: TokenAmount,
}

/// Builder for [`MiningEngine`]
pub struct MiningEngineBuilder {
    store: Arc<dyn MiningStore>,
    config: MiningConfig,
    clock: Arc<dyn Clock>,
    catalog: AchievementCatalog,
}

impl MiningEngineBuilder {
    pub fn config(mut self, config: MiningConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(mut self, catalog: AchievementCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Validate the configuration and wire the components
    pub fn build(self) -> MiningResult<Arc<MiningEngine>> {
        self.config.validate()?;

        let Self {
            store,
            config,
            clock,
            catalog,
        } = self;

        let events = EventBus::new(config.event_channel_capacity);
        let monitor = Arc::new(HeartbeatMonitor::new(store.clone(), clock.clone(), &config));
        let controller = Arc::new(SessionController::new(
            store.clone(),
            clock.clone(),
            monitor.clone(),
            events.clone(),
        ));
        let achievements = Arc::new(AchievementTracker::new(
            store.clone(),
            clock.clone(),
            Arc::new(catalog),
            events.clone(),
        ));
        let sync = Arc::new(MiningSyncCoordinator::new(
            store.clone(),
            clock.clone(),
            config.sync_min_interval(),
            events.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            heartbeat_secs = config.heartbeat_interval_secs,
            combo = config.apply_combo_multiplier,
            "Mining engine created"
        );

        Ok(Arc::new_cyclic(|engine: &Weak<MiningEngine>| {
            let engine = engine.clone();
            let janitor = SessionJanitor::new(
                store.clone(),
                clock.clone(),
                controller.clone(),
                events.clone(),
                config.cleanup_threshold(),
                config.cleanup_interval(),
            )
            .with_release_hook(Arc::new(move |user: &UserId| {
                if let Some(engine) = engine.upgrade() {
                    engine.release_user(user);
                }
            }));

            MiningEngine {
                limiter: ActivityLimiter::new(config.limits.clone()),
                calculator: RewardCalculator::from_config(&config),
                config,
                store,
                clock,
                events,
                monitor,
                controller,
                achievements,
                sync,
                janitor: Arc::new(janitor),
                combos: DashMap::new(),
                shutdown_tx,
                background_tasks: RwLock::new(Vec::new()),
                started: AtomicBool::new(false),
            }
        }))
    }
}

/// The mining session and activity reward engine
pub struct MiningEngine {
    config: MiningConfig,
    store: Arc<dyn MiningStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    limiter: ActivityLimiter,
    calculator: RewardCalculator,
    monitor: Arc<HeartbeatMonitor>,
    controller: Arc<SessionController>,
    achievements: Arc<AchievementTracker>,
    sync: Arc<MiningSyncCoordinator>,
    janitor: Arc<SessionJanitor>,
    /// Session-local combo per user, reset on session start
    combos: DashMap<UserId, ComboMultiplier>,
    shutdown_tx: broadcast::Sender<()>,
    background_tasks: RwLock<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl MiningEngine {
    /// Start building an engine on top of `store`
    pub fn builder(store: Arc<dyn MiningStore>) -> MiningEngineBuilder {
        MiningEngineBuilder {
            store,
            config: MiningConfig::default(),
            clock: Arc::new(SystemClock),
            catalog: AchievementCatalog::default(),
        }
    }

    /// Engine with default clock and catalog
    pub fn new(store: Arc<dyn MiningStore>, config: MiningConfig) -> MiningResult<Arc<Self>> {
        Self::builder(store).config(config).build()
    }

    /// Per-user facade
    pub fn handle(self: &Arc<Self>, user: UserId) -> MiningHandle {
        MiningHandle {
            engine: Arc::clone(self),
            user,
        }
    }

    /// Per-user facade from a raw id; rejects missing or malformed ids
    pub fn handle_for(self: &Arc<Self>, user: &str) -> MiningResult<MiningHandle> {
        Ok(self.handle(UserId::new(user)?))
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MiningEvent> {
        self.events.subscribe()
    }

    pub fn limiter(&self) -> &ActivityLimiter {
        &self.limiter
    }

    pub fn achievements(&self) -> &AchievementTracker {
        &self.achievements
    }

    pub fn heartbeat_monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    pub fn sync_coordinator(&self) -> &MiningSyncCoordinator {
        &self.sync
    }

    /// Start background tasks (the session janitor)
    pub async fn start(&self) -> MiningResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MiningError::AlreadyStarted);
        }

        let janitor_task = Arc::clone(&self.janitor).spawn(self.shutdown_tx.subscribe());
        self.background_tasks.write().await.push(janitor_task);

        info!("Mining engine started");
        Ok(())
    }

    /// Stop background tasks and every per-user loop
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.monitor.disarm_all();
        self.sync.disarm_all();

        let tasks: Vec<_> = self.background_tasks.write().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.started.store(false, Ordering::SeqCst);
        info!("Mining engine stopped");
    }

    /// Switch mining on
    pub async fn start_mining(&self, user: &UserId) -> MiningResult<StartOutcome> {
        let outcome = self.controller.start(user).await?;
        if !outcome.already_mining {
            self.combos
                .insert(user.clone(), ComboMultiplier::from_config(&self.config));
        }
        self.sync.record_local(&outcome.stats);
        self.sync.arm(user);
        self.settle_bonuses(user).await;
        Ok(outcome)
    }

    /// Switch mining off; a no-op when not mining
    pub async fn stop_mining(&self, user: &UserId) -> MiningResult<StopOutcome> {
        let outcome = self.controller.stop(user).await?;
        self.release_user(user);
        if let Some(stats) = &outcome.stats {
            self.sync.record_local(stats);
        }
        Ok(outcome)
    }

    /// Credit one activity if mining is active and healthy and the cap allows
    ///
    /// The cap is checked again atomically by the store, so concurrent calls
    /// never credit past it.
    #[instrument(skip_all, fields(user = %user, kind = %kind))]
    pub async fn record_activity(
        &self,
        user: &UserId,
        kind: ActivityKind,
    ) -> MiningResult<ActivityOutcome> {
        let stats = self.store.get_stats(user).await?;
        let health = self.monitor.health_of(stats.as_ref());
        let Some(stats) = stats.filter(|_| health.can_record()) else {
            debug!(?health, "Activity rejected, mining is not active and healthy");
            return Ok(ActivityOutcome::Inactive(health));
        };

        if let LimitDecision::Denied { count, .. } = self.limiter.check(kind, &stats.daily_counts) {
            return Ok(self.limit_reached(user, kind, count));
        }

        let limit = *self.limiter.limit(kind);
        let combo = self
            .combos
            .get(user)
            .map(|combo| *combo)
            .unwrap_or_else(|| ComboMultiplier::from_config(&self.config));
        let reward = self.calculator.calculate(kind, &limit, &stats, &combo);

        let request = CreditRequest::activity(
            kind,
            limit.max_per_day,
            reward.points,
            reward.tokens,
            self.clock.now_utc(),
        );
        match self.store.credit_activity(user, request).await? {
            CreditOutcome::Credited(row) => {
                self.combos
                    .entry(user.clone())
                    .or_insert_with(|| ComboMultiplier::from_config(&self.config))
                    .bump();
                self.sync.record_local(&row);

                debug!(points = reward.points, tokens = %reward.tokens, "Activity credited");
                self.events.emit(MiningEvent::ActivityCredited {
                    user: user.clone(),
                    reward,
                    daily_count: row.count_for(kind),
                });

                // The credit stands even if achievement bookkeeping fails
                if let Err(e) = self.achievements.track_social_activity(user, kind).await {
                    warn!(error = %e, "Failed to update achievement progress");
                }
                Ok(ActivityOutcome::Credited(reward))
            }
            CreditOutcome::LimitReached { count } => Ok(self.limit_reached(user, kind, count)),
            CreditOutcome::NotMining => Ok(ActivityOutcome::Inactive(MiningHealth::IDLE)),
        }
    }

    pub async fn is_activity_limit_reached(
        &self,
        user: &UserId,
        kind: ActivityKind,
    ) -> MiningResult<bool> {
        let counts = self
            .store
            .get_stats(user)
            .await?
            .map(|s| s.daily_counts)
            .unwrap_or_default();
        Ok(self.limiter.is_limit_reached(kind, &counts))
    }

    pub async fn get_remaining_count(&self, user: &UserId, kind: ActivityKind) -> MiningResult<u32> {
        let counts = self
            .store
            .get_stats(user)
            .await?
            .map(|s| s.daily_counts)
            .unwrap_or_default();
        Ok(self.limiter.remaining(kind, &counts))
    }

    pub async fn check_mining_health(&self, user: &UserId) -> MiningResult<MiningHealth> {
        self.monitor.check_health(user).await
    }

    /// Throttled reconciliation with the store; never fails
    pub async fn sync_mining_state(&self, user: &UserId) -> SyncOutcome {
        self.sync.sync(user).await
    }

    /// On-load health check; stops a stale session, resumes a healthy one
    pub async fn initialize(&self, user: &UserId) -> MiningResult<MiningHealth> {
        self.sync.invalidate(user);
        let health = self.controller.recover(user).await?;
        if health.can_record() {
            self.sync.arm(user);
            self.settle_bonuses(user).await;
        } else if health.needs_recovery() {
            self.release_user(user);
        }
        Ok(health)
    }

    pub async fn session_projection(&self, user: &UserId) -> MiningResult<Option<SessionProjection>> {
        let Some(session) = self.store.find_active_session(user).await? else {
            return Ok(None);
        };
        let Some(stats) = self.store.get_stats(user).await? else {
            return Ok(None);
        };

        let elapsed = session.duration(self.clock.now_utc());
        let hours = elapsed.num_milliseconds().max(0) as f64 / 3_600_000.0;
        let projected_tokens = stats
            .mining_rate
            .scale(hours * stats.efficiency_multiplier);

        Ok(Some(SessionProjection {
            session,
            elapsed,
            projected_tokens,
        }))
    }

    /// Zero today's counters (externally triggered day boundary)
    pub async fn reset_daily_counters(&self, user: &UserId) -> MiningResult<()> {
        self.store
            .reset_daily_counters(user, self.clock.now_utc())
            .await?;
        self.sync.invalidate(user);
        info!(user = %user, "Daily counters reset");
        Ok(())
    }

    pub async fn update_achievement_progress(
        &self,
        user: &UserId,
        achievement: &AchievementId,
        increment: u32,
    ) -> MiningResult<ProgressUpdate> {
        self.achievements
            .update_progress(user, achievement, increment)
            .await
    }

    pub async fn achievement_progress(
        &self,
        user: &UserId,
    ) -> MiningResult<Vec<UserAchievementProgress>> {
        self.achievements.list_progress(user).await
    }

    /// One janitor pass with the configured threshold; failures are logged
    pub async fn cleanup_inactive_sessions(&self) -> Vec<MiningSession> {
        match self.janitor.run_once().await {
            Ok(terminated) => terminated,
            Err(e) => {
                warn!(error = %e, "Inactive session cleanup failed");
                Vec::new()
            }
        }
    }

    /// Stats row straight from the store
    pub async fn stats(&self, user: &UserId) -> MiningResult<Option<MiningStats>> {
        Ok(self.store.get_stats(user).await?)
    }

    pub async fn sessions(&self, user: &UserId) -> MiningResult<Vec<MiningSession>> {
        Ok(self.store.sessions_for(user).await?)
    }

    async fn settle_bonuses(&self, user: &UserId) {
        if let Err(e) = self.achievements.settle_pending_bonuses(user).await {
            warn!(user = %user, error = %e, "Failed to settle pending achievement bonuses");
        }
    }

    /// Drop the per-user state that only lives while mining
    fn release_user(&self, user: &UserId) {
        let was_syncing = self.sync.disarm(user);
        self.combos.remove(user);
        self.sync.invalidate(user);
        debug!(user = %user, was_syncing, "Released mining state");
    }

    fn limit_reached(&self, user: &UserId, kind: ActivityKind, count: u32) -> ActivityOutcome {
        debug!(count, "Daily limit reached");
        self.events.emit(MiningEvent::LimitReached {
            user: user.clone(),
            kind,
            count,
        });
        ActivityOutcome::LimitReached { count }
    }
}

impl std::fmt::Debug for MiningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiningEngine")
            .field("config", &self.config)
            .field("monitor", &self.monitor)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

/// UI-facing operations for one user
///
/// `start_mining` and `stop_mining` report failure as `false` after logging
/// it; the caller decides whether to retry.
#[derive(Clone)]
pub struct MiningHandle {
    engine: Arc<MiningEngine>,
    user: UserId,
}

impl MiningHandle {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn engine(&self) -> &Arc<MiningEngine> {
        &self.engine
    }

    pub async fn start_mining(&self) -> bool {
        match self.engine.start_mining(&self.user).await {
            Ok(_) => true,
            Err(e) => {
                warn!(user = %self.user, error = %e, "Failed to start mining");
                false
            }
        }
    }

    pub async fn stop_mining(&self) -> bool {
        match self.engine.stop_mining(&self.user).await {
            Ok(_) => true,
            Err(e) => {
                warn!(user = %self.user, error = %e, "Failed to stop mining");
                false
            }
        }
    }

    pub async fn record_activity(&self, kind: ActivityKind) -> MiningResult<ActivityOutcome> {
        self.engine.record_activity(&self.user, kind).await
    }

    /// Parse the kind first; unknown names are rejected before any I/O
    pub async fn record_activity_named(&self, kind: &str) -> MiningResult<ActivityOutcome> {
        let kind: ActivityKind = kind.parse()?;
        self.record_activity(kind).await
    }

    pub async fn is_activity_limit_reached(&self, kind: ActivityKind) -> MiningResult<bool> {
        self.engine.is_activity_limit_reached(&self.user, kind).await
    }

    pub async fn get_remaining_count(&self, kind: ActivityKind) -> MiningResult<u32> {
        self.engine.get_remaining_count(&self.user, kind).await
    }

    pub async fn check_mining_health(&self) -> MiningResult<MiningHealth> {
        self.engine.check_mining_health(&self.user).await
    }

    pub async fn sync_mining_state(&self) -> SyncOutcome {
        self.engine.sync_mining_state(&self.user).await
    }

    pub async fn initialize(&self) -> MiningResult<MiningHealth> {
        self.engine.initialize(&self.user).await
    }

    pub async fn session_projection(&self) -> MiningResult<Option<SessionProjection>> {
        self.engine.session_projection(&self.user).await
    }

    pub async fn achievements(&self) -> MiningResult<Vec<UserAchievementProgress>> {
        self.engine.achievement_progress(&self.user).await
    }

    /// Last known stats, without I/O
    pub fn local_stats(&self) -> Option<MiningStats> {
        self.engine.sync.local(&self.user)
    }
}

impl std::fmt::Debug for MiningHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiningHandle").field("user", &self.user).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{ManualClock, StatsPatch};
    use pulse_storage::{InMemoryMiningStore, StoreOperation};

    fn engine() -> (Arc<InMemoryMiningStore>, Arc<ManualClock>, Arc<MiningEngine>) {
        let store = Arc::new(InMemoryMiningStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let engine = MiningEngine::builder(store.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        (store, clock, engine)
    }

    #[test]
    fn test_build_rejects_oversized_timeout() {
        let config = MiningConfig {
            health_timeout_secs: 10_000_000_000_000_000,
            ..MiningConfig::default()
        };
        let result = MiningEngine::new(Arc::new(InMemoryMiningStore::new()), config);
        assert!(matches!(result, Err(MiningError::Config(_))));
    }

    #[tokio::test]
    async fn test_record_requires_mining() {
        let (_store, _clock, engine) = engine();
        let handle = engine.handle_for("alice").unwrap();

        let outcome = handle.record_activity(ActivityKind::Post).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Inactive(MiningHealth::IDLE));
    }

    #[tokio::test]
    async fn test_record_requires_healthy_session() {
        let (_store, clock, engine) = engine();
        let handle = engine.handle_for("alice").unwrap();
        assert!(handle.start_mining().await);
        engine.heartbeat_monitor().disarm(handle.user());

        clock.advance(TimeDelta::minutes(6));
        let outcome = handle.record_activity(ActivityKind::Like).await.unwrap();
        assert_eq!(
            outcome,
            ActivityOutcome::Inactive(MiningHealth {
                active: true,
                healthy: false
            })
        );
    }

    #[tokio::test]
    async fn test_credit_updates_counters_and_cache() {
        let (store, _clock, engine) = engine();
        let handle = engine.handle_for("alice").unwrap();
        assert!(handle.start_mining().await);

        let outcome = handle.record_activity(ActivityKind::Like).await.unwrap();
        let reward = *outcome.reward().unwrap();
        assert_eq!(reward.points, 5);
        assert_eq!(reward.tokens, TokenAmount::from_hundredths(50));

        let stats = store.get_stats(handle.user()).await.unwrap().unwrap();
        assert_eq!(stats.daily_points, 5);
        assert_eq!(stats.count_for(ActivityKind::Like), 1);
        assert_eq!(handle.local_stats(), Some(stats));
        assert_eq!(handle.get_remaining_count(ActivityKind::Like).await.unwrap(), 29);
    }

    #[tokio::test]
    async fn test_combo_grows_when_enabled_and_resets_on_restart() {
        let store = Arc::new(InMemoryMiningStore::new());
        let engine = MiningEngine::builder(store.clone())
            .config(MiningConfig::default().with_combo_multiplier(true))
            .clock(Arc::new(ManualClock::starting_now()))
            .build()
            .unwrap();
        let handle = engine.handle_for("alice").unwrap();
        assert!(handle.start_mining().await);

        let mut points = Vec::new();
        for _ in 0..3 {
            let outcome = handle.record_activity(ActivityKind::Comment).await.unwrap();
            points.push(outcome.reward().unwrap().points);
        }
        // 1.00, 1.05, 1.10
        assert_eq!(points, vec![10, 11, 11]);

        assert!(handle.stop_mining().await);
        assert!(handle.start_mining().await);
        let outcome = handle.record_activity(ActivityKind::Comment).await.unwrap();
        assert_eq!(outcome.reward().unwrap().points, 10);
    }

    #[tokio::test]
    async fn test_unknown_activity_name_is_validation_error() {
        let (store, _clock, engine) = engine();
        let handle = engine.handle_for("alice").unwrap();

        let err = handle.record_activity_named("poke").await.unwrap_err();
        assert!(matches!(err, MiningError::Validation(_)));
        assert_eq!(store.faults().calls(StoreOperation::GetStats), 0);

        assert!(engine.handle_for("  ").is_err());
    }

    #[tokio::test]
    async fn test_start_failure_reports_false() {
        let (store, _clock, engine) = engine();
        let handle = engine.handle_for("alice").unwrap();
        store.faults().set_offline(true);
        assert!(!handle.start_mining().await);
        assert!(!handle.stop_mining().await);

        store.faults().set_offline(false);
        assert!(handle.start_mining().await);
    }

    #[tokio::test]
    async fn test_session_projection() {
        let (store, clock, engine) = engine();
        let handle = engine.handle_for("alice").unwrap();
        assert!(handle.session_projection().await.unwrap().is_none());

        assert!(handle.start_mining().await);
        store
            .upsert_stats(handle.user(), StatsPatch::new().efficiency(1.5), clock.now_utc())
            .await
            .unwrap();
        clock.advance(TimeDelta::hours(2));

        let projection = handle.session_projection().await.unwrap().unwrap();
        assert_eq!(projection.elapsed, TimeDelta::hours(2));
        assert_eq!(projection.projected_tokens, TokenAmount::from_whole(3));
    }

    #[tokio::test]
    async fn test_reset_daily_counters() {
        let (_store, _clock, engine) = engine();
        let handle = engine.handle_for("alice").unwrap();
        assert!(handle.start_mining().await);
        for _ in 0..5 {
            handle.record_activity(ActivityKind::Invite).await.unwrap();
        }
        assert!(handle.is_activity_limit_reached(ActivityKind::Invite).await.unwrap());

        engine.reset_daily_counters(handle.user()).await.unwrap();
        assert!(!handle.is_activity_limit_reached(ActivityKind::Invite).await.unwrap());
        assert!(handle.local_stats().is_none());
    }

    #[tokio::test]
    async fn test_background_lifecycle() {
        let (_store, _clock, engine) = engine();
        engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(MiningError::AlreadyStarted)));
        engine.shutdown().await;
        engine.start().await.unwrap();
        engine.shutdown().await;
    }
}
