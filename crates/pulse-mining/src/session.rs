//! Session lifecycle
//!
//! [`SessionController`] owns `MiningStats.is_mining` and the `MiningSession`
//! rows. Start and stop for one user are serialized; the store enforces the
//! single-active-session rule on its own as well.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use pulse_core::{
    Clock, MiningSession, MiningStats, MiningStore, SessionStatus, StatsPatch, UserId,
};

use crate::error::MiningResult;
use crate::events::{EventBus, MiningEvent};
use crate::heartbeat::{HeartbeatMonitor, MiningHealth};
use crate::locks::UserLocks;

/// What `start` did
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    pub stats: MiningStats,
    /// `None` when the session row could not be written; mining is still on
    pub session: Option<MiningSession>,
    /// Mining was already on and healthy, so nothing changed
    pub already_mining: bool,
}

/// What `stop` did
#[derive(Debug, Clone, PartialEq)]
pub struct StopOutcome {
    pub stats: Option<MiningStats>,
    /// The session that was closed, if one was active
    pub session: Option<MiningSession>,
    /// `false` when stop was a no-op
    pub was_mining: bool,
}

/// Start/stop state machine for mining sessions
pub struct SessionController {
    store: Arc<dyn MiningStore>,
    clock: Arc<dyn Clock>,
    monitor: Arc<HeartbeatMonitor>,
    events: EventBus,
    locks: UserLocks,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn MiningStore>,
        clock: Arc<dyn Clock>,
        monitor: Arc<HeartbeatMonitor>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            monitor,
            events,
            locks: UserLocks::new(),
        }
    }

    /// Switch mining on for `user`
    ///
    /// The stats row is the primary state: failing to write it is an error.
    /// The session row is best-effort and only logged when it fails. A stale
    /// mining row is stopped first; a healthy one is left alone.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn start(&self, user: &UserId) -> MiningResult<StartOutcome> {
        let _guard = self.locks.lock(user).await;

        let existing = self.store.get_stats(user).await?;
        let health = self.monitor.health_of(existing.as_ref());
        if let Some(stats) = existing.filter(|_| health.active) {
            if health.healthy {
                debug!("Already mining");
                if !self.monitor.is_armed(user) {
                    self.monitor.arm(user);
                }
                let session = self.store.find_active_session(user).await.unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to look up active session");
                    None
                });
                return Ok(StartOutcome {
                    stats,
                    session,
                    already_mining: true,
                });
            }
            info!("Stopping stale session before starting a new one");
            self.stop_locked(user).await?;
        }

        let now = self.clock.now_utc();
        let stats = self
            .store
            .upsert_stats(
                user,
                StatsPatch::new().mining(true).heartbeat(now).activity(now),
                now,
            )
            .await?;

        // A session left active by a failed stop would block creation
        match self.store.find_active_session(user).await {
            Ok(Some(orphan)) => {
                warn!(session = %orphan.id, "Closing orphaned active session");
                if let Err(e) = self
                    .store
                    .close_session(&orphan.id, now, SessionStatus::Completed)
                    .await
                {
                    warn!(session = %orphan.id, error = %e, "Failed to close orphaned session");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to look up active session"),
        }

        let session = match self.store.create_session(user, now).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Failed to create session row, mining continues without one");
                None
            }
        };

        if let Err(e) = self.monitor.send_heartbeat(user).await {
            warn!(error = %e, "Initial heartbeat failed");
        }
        self.monitor.arm(user);

        info!(session = ?session.as_ref().map(|s| s.id), "Mining started");
        self.events.emit(MiningEvent::MiningStarted {
            user: user.clone(),
            session: session.as_ref().map(|s| s.id),
            at: now,
        });

        Ok(StartOutcome {
            stats,
            session,
            already_mining: false,
        })
    }

    /// Switch mining off for `user`; a no-op when not mining
    #[instrument(skip_all, fields(user = %user))]
    pub async fn stop(&self, user: &UserId) -> MiningResult<StopOutcome> {
        let _guard = self.locks.lock(user).await;
        self.stop_locked(user).await
    }

    /// Check health on load and stop a session nobody is heartbeating
    ///
    /// Returns the health observed before any recovery. A healthy mining
    /// session gets its heartbeat loop re-armed.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn recover(&self, user: &UserId) -> MiningResult<MiningHealth> {
        let _guard = self.locks.lock(user).await;

        let stats = self.store.get_stats(user).await?;
        let health = self.monitor.health_of(stats.as_ref());

        if health.needs_recovery() {
            info!(
                last_heartbeat = ?stats.as_ref().and_then(|s| s.last_heartbeat),
                "Recovering stale mining session"
            );
            let outcome = self.stop_locked(user).await?;
            self.events.emit(MiningEvent::SessionRecovered {
                user: user.clone(),
                session: outcome.session.map(|s| s.id),
            });
        } else if health.active && !self.monitor.is_armed(user) {
            self.monitor.arm(user);
        }

        Ok(health)
    }

    /// Clear `is_mining` after the cleanup batch closed the user's session
    ///
    /// Skipped when the user has started a new session in the meantime.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn clear_after_termination(&self, user: &UserId) -> MiningResult<bool> {
        let _guard = self.locks.lock(user).await;

        if self.store.find_active_session(user).await?.is_some() {
            debug!("User restarted mining, keeping flag");
            return Ok(false);
        }
        let mining = self
            .store
            .get_stats(user)
            .await?
            .is_some_and(|s| s.is_mining);
        if !mining {
            return Ok(false);
        }

        self.monitor.disarm(user);
        let now = self.clock.now_utc();
        self.store
            .upsert_stats(user, StatsPatch::new().mining(false), now)
            .await?;
        info!("Mining flag cleared after auto-termination");
        Ok(true)
    }

    async fn stop_locked(&self, user: &UserId) -> MiningResult<StopOutcome> {
        // Disarm before the flag flips so no loop heartbeat starts after this
        let was_armed = self.monitor.disarm(user);

        let current = match self.store.get_stats(user).await {
            Ok(current) => current,
            Err(e) => {
                if was_armed {
                    self.monitor.arm(user);
                }
                return Err(e.into());
            }
        };
        if !current.as_ref().is_some_and(|s| s.is_mining) {
            debug!("Not mining, stop is a no-op");
            return Ok(StopOutcome {
                stats: current,
                session: None,
                was_mining: false,
            });
        }

        let now = self.clock.now_utc();
        let stats = match self
            .store
            .upsert_stats(user, StatsPatch::new().mining(false).activity(now), now)
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                // Still mining; keep the heartbeat going until the caller retries
                if was_armed {
                    self.monitor.arm(user);
                }
                return Err(e.into());
            }
        };

        let session = match self.store.find_active_session(user).await {
            Ok(Some(active)) => match self
                .store
                .close_session(&active.id, now, SessionStatus::Completed)
                .await
            {
                Ok(closed) => closed,
                Err(e) => {
                    warn!(session = %active.id, error = %e, "Failed to close session row");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to look up active session");
                None
            }
        };

        info!(session = ?session.as_ref().map(|s| s.id), "Mining stopped");
        self.events.emit(MiningEvent::MiningStopped {
            user: user.clone(),
            session: session.as_ref().map(|s| s.id),
            at: now,
        });

        Ok(StopOutcome {
            stats: Some(stats),
            session,
            was_mining: true,
        })
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("monitor", &self.monitor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pulse_core::ManualClock;
    use pulse_storage::{InMemoryMiningStore, StoreOperation};

    use crate::config::MiningConfig;

    struct Fixture {
        store: Arc<InMemoryMiningStore>,
        clock: Arc<ManualClock>,
        monitor: Arc<HeartbeatMonitor>,
        controller: SessionController,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryMiningStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let monitor = Arc::new(HeartbeatMonitor::new(
            store.clone(),
            clock.clone(),
            &MiningConfig::default(),
        ));
        let events = EventBus::new(64);
        let controller =
            SessionController::new(store.clone(), clock.clone(), monitor.clone(), events.clone());
        Fixture {
            store,
            clock,
            monitor,
            controller,
            events,
        }
    }

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let f = fixture();
        let user = alice();
        let mut rx = f.events.subscribe();

        let started = f.controller.start(&user).await.unwrap();
        assert!(!started.already_mining);
        assert!(started.stats.is_mining);
        assert_eq!(started.stats.last_heartbeat, Some(f.clock.now_utc()));
        let session = started.session.unwrap();
        assert!(session.is_active());
        assert!(f.monitor.is_armed(&user));

        let stopped = f.controller.stop(&user).await.unwrap();
        assert!(stopped.was_mining);
        assert!(!stopped.stats.unwrap().is_mining);
        let closed = stopped.session.unwrap();
        assert_eq!(closed.id, session.id);
        assert_eq!(closed.status, SessionStatus::Completed);
        assert!(!f.monitor.is_armed(&user));

        assert!(matches!(rx.recv().await.unwrap(), MiningEvent::MiningStarted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), MiningEvent::MiningStopped { .. }));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let f = fixture();
        let outcome = f.controller.stop(&alice()).await.unwrap();
        assert!(!outcome.was_mining);
        assert!(outcome.session.is_none());
        assert_eq!(f.store.faults().calls(StoreOperation::UpsertStats), 0);
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_session() {
        let f = fixture();
        let user = alice();

        let first = f.controller.start(&user).await.unwrap();
        let second = f.controller.start(&user).await.unwrap();
        assert!(second.already_mining);
        assert_eq!(
            second.session.map(|s| s.id),
            first.session.map(|s| s.id)
        );
        assert_eq!(f.store.active_session_count(), 1);
    }

    #[tokio::test]
    async fn test_session_row_failure_is_not_fatal() {
        let f = fixture();
        let user = alice();
        f.store.faults().fail(StoreOperation::CreateSession);

        let started = f.controller.start(&user).await.unwrap();
        assert!(started.stats.is_mining);
        assert!(started.session.is_none());
        assert!(f.monitor.is_armed(&user));
    }

    #[tokio::test]
    async fn test_stats_failure_surfaces() {
        let f = fixture();
        let user = alice();
        f.store.faults().fail(StoreOperation::UpsertStats);

        let err = f.controller.start(&user).await.unwrap_err();
        assert!(err.is_store());
        assert!(!f.monitor.is_armed(&user));
        assert_eq!(f.store.active_session_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_heartbeat() {
        let f = fixture();
        let user = alice();
        f.controller.start(&user).await.unwrap();

        f.store.faults().fail(StoreOperation::UpsertStats);
        assert!(f.controller.stop(&user).await.is_err());
        assert!(f.monitor.is_armed(&user));

        f.store.faults().heal(StoreOperation::UpsertStats);
        assert!(f.controller.stop(&user).await.unwrap().was_mining);
    }

    #[tokio::test]
    async fn test_stale_start_restarts_session() {
        let f = fixture();
        let user = alice();
        let first = f.controller.start(&user).await.unwrap().session.unwrap();
        f.monitor.disarm(&user);

        f.clock.advance(TimeDelta::minutes(10));
        let second = f.controller.start(&user).await.unwrap();
        assert!(!second.already_mining);
        assert_ne!(second.session.unwrap().id, first.id);

        let history = f.store.sessions_for(&user).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, SessionStatus::Completed);
        assert!(history[1].is_active());
    }

    #[tokio::test]
    async fn test_recover_stops_stale_session() {
        let f = fixture();
        let user = alice();
        f.controller.start(&user).await.unwrap();
        f.monitor.disarm(&user);
        f.clock.advance(TimeDelta::minutes(6));

        let health = f.controller.recover(&user).await.unwrap();
        assert_eq!(
            health,
            MiningHealth {
                active: true,
                healthy: false
            }
        );
        let stats = f.store.get_stats(&user).await.unwrap().unwrap();
        assert!(!stats.is_mining);
        assert!(f.store.find_active_session(&user).await.unwrap().is_none());
        let history = f.store.sessions_for(&user).await.unwrap();
        assert_eq!(history[0].status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_rearms_healthy_session() {
        let f = fixture();
        let user = alice();
        f.controller.start(&user).await.unwrap();
        f.monitor.disarm(&user);

        let health = f.controller.recover(&user).await.unwrap();
        assert!(health.can_record());
        assert!(f.monitor.is_armed(&user));
    }

    #[tokio::test]
    async fn test_clear_after_termination() {
        let f = fixture();
        let user = alice();
        f.controller.start(&user).await.unwrap();
        assert!(!f.controller.clear_after_termination(&user).await.unwrap());

        let now = f.clock.now_utc() + TimeDelta::hours(4);
        f.store
            .batch_auto_terminate(TimeDelta::hours(3), now)
            .await
            .unwrap();
        assert!(f.controller.clear_after_termination(&user).await.unwrap());
        assert!(!f.store.get_stats(&user).await.unwrap().unwrap().is_mining);
        assert!(!f.monitor.is_armed(&user));
    }
}
