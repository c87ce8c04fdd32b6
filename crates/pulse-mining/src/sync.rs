//! Reconciliation between local optimistic state and the store
//!
//! The coordinator is a read-through cache of each user's stats row. Local
//! writes (credits, start, stop) update the cache optimistically. A sync
//! re-reads the row; the remote copy always wins. Syncs for one user are
//! throttled to one per `min_interval`, and a failed fetch keeps the cached
//! copy and is only logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use pulse_core::{Clock, MiningStats, MiningStore, UserId};

use crate::events::{EventBus, MiningEvent};

/// What a sync did
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The remote row was fetched and adopted
    Synced {
        stats: Option<MiningStats>,
        /// Local state differed from the remote row
        drifted: bool,
    },
    /// Skipped, the previous sync was too recent
    Throttled,
    /// The fetch failed; local state was kept
    Failed,
}

#[derive(Debug, Default)]
struct SyncSlot {
    local: Option<MiningStats>,
    last_attempt: Option<DateTime<Utc>>,
}

/// Throttled read-through cache of per-user stats
pub struct MiningSyncCoordinator {
    store: Arc<dyn MiningStore>,
    clock: Arc<dyn Clock>,
    min_interval: TimeDelta,
    events: EventBus,
    slots: DashMap<UserId, SyncSlot>,
    loops: DashMap<UserId, CancellationToken>,
}

impl MiningSyncCoordinator {
    pub fn new(
        store: Arc<dyn MiningStore>,
        clock: Arc<dyn Clock>,
        min_interval: TimeDelta,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            min_interval,
            events,
            slots: DashMap::new(),
            loops: DashMap::new(),
        }
    }

    /// Cached stats for `user`
    pub fn local(&self, user: &UserId) -> Option<MiningStats> {
        self.slots.get(user).and_then(|slot| slot.local.clone())
    }

    /// Optimistically adopt a row the engine just wrote
    pub fn record_local(&self, stats: &MiningStats) {
        self.slots.entry(stats.user_id.clone()).or_default().local = Some(stats.clone());
    }

    /// Drop the cached row so the next read goes to the store
    pub fn invalidate(&self, user: &UserId) {
        if let Some(mut slot) = self.slots.get_mut(user) {
            slot.local = None;
        }
    }

    /// Cached row, or a fresh read when nothing is cached
    pub async fn read_through(&self, user: &UserId) -> Option<MiningStats> {
        if let Some(local) = self.local(user) {
            return Some(local);
        }
        match self.store.get_stats(user).await {
            Ok(Some(stats)) => {
                self.record_local(&stats);
                Some(stats)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(user = %user, error = %e, "Stats read failed");
                None
            }
        }
    }

    /// Re-fetch the remote row unless a sync ran less than `min_interval` ago
    ///
    /// Never fails; errors are logged and reported as [`SyncOutcome::Failed`].
    #[instrument(skip_all, fields(user = %user))]
    pub async fn sync(&self, user: &UserId) -> SyncOutcome {
        let now = self.clock.now_utc();
        {
            let mut slot = self.slots.entry(user.clone()).or_default();
            if let Some(last) = slot.last_attempt
                && now - last < self.min_interval
            {
                trace!("Sync throttled");
                return SyncOutcome::Throttled;
            }
            slot.last_attempt = Some(now);
        }

        let remote = match self.store.get_stats(user).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "Sync failed, keeping local state");
                return SyncOutcome::Failed;
            }
        };

        let drifted = {
            let mut slot = self.slots.entry(user.clone()).or_default();
            let drifted = slot.local.is_some() && slot.local != remote;
            slot.local = remote.clone();
            drifted
        };
        if drifted {
            debug!("Local state drifted from store, adopted remote");
        }

        self.events.emit(MiningEvent::StateSynced {
            user: user.clone(),
            drifted,
        });
        SyncOutcome::Synced {
            stats: remote,
            drifted,
        }
    }

    /// Start a periodic sync loop for `user`, replacing any running one
    pub fn arm(self: &Arc<Self>, user: &UserId) {
        let token = CancellationToken::new();
        if let Some(previous) = self.loops.insert(user.clone(), token.clone()) {
            previous.cancel();
        }

        let period = self
            .min_interval
            .to_std()
            .unwrap_or(Duration::from_secs(30))
            .max(Duration::from_secs(1));
        let coordinator = Arc::clone(self);
        let user = user.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.sync(&user).await;
                    }
                }
            }
            trace!(user = %user, "Sync loop stopped");
        });
    }

    pub fn is_armed(&self, user: &UserId) -> bool {
        self.loops.contains_key(user)
    }

    pub fn disarm(&self, user: &UserId) -> bool {
        match self.loops.remove(user) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn disarm_all(&self) {
        for entry in self.loops.iter() {
            entry.value().cancel();
        }
        self.loops.clear();
    }
}

impl std::fmt::Debug for MiningSyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiningSyncCoordinator")
            .field("min_interval", &self.min_interval)
            .field("users", &self.slots.len())
            .finish()
    }
}
