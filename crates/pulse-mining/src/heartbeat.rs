//! Heartbeat liveness and session health
//!
//! While a user is mining, a background task records a heartbeat every
//! `heartbeat_interval`. The store only accepts heartbeats while the stats row
//! says mining is on, so a heartbeat that races a stop is rejected at the
//! store rather than merely not scheduled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use pulse_core::{Clock, MiningStats, MiningStore, UserId};

use crate::config::MiningConfig;
use crate::error::{MiningError, MiningResult};

/// Derived session health; staleness is a state, not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningHealth {
    pub active: bool,
    pub healthy: bool,
}

impl MiningHealth {
    pub const IDLE: Self = Self {
        active: false,
        healthy: true,
    };

    /// Healthy iff not mining, or the last heartbeat is younger than `timeout`
    ///
    /// A mining row that never recorded a heartbeat is unhealthy.
    pub fn evaluate(stats: Option<&MiningStats>, now: DateTime<Utc>, timeout: TimeDelta) -> Self {
        let Some(stats) = stats.filter(|s| s.is_mining) else {
            return Self::IDLE;
        };
        let healthy = stats.heartbeat_age(now).is_some_and(|age| age < timeout);
        Self {
            active: true,
            healthy,
        }
    }

    /// Activity may only be credited while active and healthy
    pub fn can_record(&self) -> bool {
        self.active && self.healthy
    }

    /// Mining is on but nobody is sending heartbeats
    pub fn needs_recovery(&self) -> bool {
        self.active && !self.healthy
    }

    /// Turn a non-recordable state into the matching precondition error
    pub fn ensure_recordable(&self, user: &UserId) -> MiningResult<()> {
        match (self.active, self.healthy) {
            (false, _) => Err(MiningError::NotMining(user.to_string())),
            (true, false) => Err(MiningError::Unhealthy(user.to_string())),
            (true, true) => Ok(()),
        }
    }
}

struct HeartbeatTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Sends heartbeats and judges session health
pub struct HeartbeatMonitor {
    store: Arc<dyn MiningStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    timeout: TimeDelta,
    tasks: DashMap<UserId, HeartbeatTask>,
}

impl HeartbeatMonitor {
    pub fn new(store: Arc<dyn MiningStore>, clock: Arc<dyn Clock>, config: &MiningConfig) -> Self {
        Self {
            store,
            clock,
            interval: config.heartbeat_interval(),
            timeout: config.health_timeout(),
            tasks: DashMap::new(),
        }
    }

    /// Record one heartbeat now
    ///
    /// Returns `false` without recording when the user is not mining.
    #[instrument(skip_all, fields(user = %user))]
    pub async fn send_heartbeat(&self, user: &UserId) -> MiningResult<bool> {
        let recorded = self.store.record_heartbeat(user, self.clock.now_utc()).await?;
        if !recorded {
            debug!("Heartbeat rejected, user is not mining");
        }
        Ok(recorded)
    }

    /// Health of an already-fetched stats row
    pub fn health_of(&self, stats: Option<&MiningStats>) -> MiningHealth {
        MiningHealth::evaluate(stats, self.clock.now_utc(), self.timeout)
    }

    #[instrument(skip_all, fields(user = %user))]
    pub async fn check_health(&self, user: &UserId) -> MiningResult<MiningHealth> {
        let stats = self.store.get_stats(user).await?;
        Ok(self.health_of(stats.as_ref()))
    }

    /// Start the periodic heartbeat loop for `user`, replacing any running one
    ///
    /// The first loop heartbeat fires one interval from now; callers that
    /// need an immediate heartbeat send it themselves.
    pub fn arm(&self, user: &UserId) {
        // Loops that exited on their own leave finished handles behind
        self.tasks.retain(|_, task| !task.handle.is_finished());

        let token = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            user.clone(),
            self.interval,
            token.clone(),
        ));

        if let Some(previous) = self.tasks.insert(user.clone(), HeartbeatTask { token, handle }) {
            previous.token.cancel();
            previous.handle.abort();
        }
        debug!(user = %user, interval_secs = self.interval.as_secs(), "Heartbeat armed");
    }

    /// Cancel the heartbeat loop for `user`
    ///
    /// Synchronous: once this returns the loop will not start another
    /// heartbeat. Returns whether a loop was running.
    pub fn disarm(&self, user: &UserId) -> bool {
        match self.tasks.remove(user) {
            Some((_, task)) => {
                task.token.cancel();
                task.handle.abort();
                debug!(user = %user, "Heartbeat disarmed");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, user: &UserId) -> bool {
        self.tasks.remove_if(user, |_, task| task.handle.is_finished());
        self.tasks.contains_key(user)
    }

    pub fn armed_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every loop (engine shutdown)
    pub fn disarm_all(&self) {
        let users: Vec<UserId> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        for user in users {
            self.disarm(&user);
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.token.cancel();
            entry.handle.abort();
        }
    }
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("armed", &self.tasks.len())
            .finish()
    }
}

async fn heartbeat_loop(
    store: Arc<dyn MiningStore>,
    clock: Arc<dyn Clock>,
    user: UserId,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                trace!(user = %user, "Heartbeat loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                match store.record_heartbeat(&user, clock.now_utc()).await {
                    Ok(true) => trace!(user = %user, "Heartbeat"),
                    Ok(false) => {
                        info!(user = %user, "Mining no longer active, heartbeat loop exiting");
                        break;
                    }
                    Err(e) => warn!(user = %user, error = %e, "Heartbeat failed"),
                }
            }
        }
    }
}
