//! Engine events
//!
//! Notification delivery is external. The engine only emits, and a send with
//! no subscribers is not an error.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use pulse_core::{AchievementId, ActivityKind, SessionId, TokenAmount, UserId};

use crate::reward::Reward;

/// Something user-visible happened
#[derive(Debug, Clone, PartialEq)]
pub enum MiningEvent {
    MiningStarted {
        user: UserId,
        session: Option<SessionId>,
        at: DateTime<Utc>,
    },
    MiningStopped {
        user: UserId,
        session: Option<SessionId>,
        at: DateTime<Utc>,
    },
    ActivityCredited {
        user: UserId,
        reward: Reward,
        daily_count: u32,
    },
    /// "Limit reached for this activity type"
    LimitReached {
        user: UserId,
        kind: ActivityKind,
        count: u32,
    },
    /// Emitted once per user and achievement
    AchievementUnlocked {
        user: UserId,
        achievement: AchievementId,
        points: u64,
        tokens: TokenAmount,
        bonus_credited: bool,
    },
    /// A stale session found on load was stopped
    SessionRecovered {
        user: UserId,
        session: Option<SessionId>,
    },
    StateSynced {
        user: UserId,
        drifted: bool,
    },
    SessionsAutoTerminated {
        count: usize,
    },
}

impl MiningEvent {
    /// The user this event concerns, if it is about one user
    pub fn user(&self) -> Option<&UserId> {
        match self {
            MiningEvent::MiningStarted { user, .. }
            | MiningEvent::MiningStopped { user, .. }
            | MiningEvent::ActivityCredited { user, .. }
            | MiningEvent::LimitReached { user, .. }
            | MiningEvent::AchievementUnlocked { user, .. }
            | MiningEvent::SessionRecovered { user, .. }
            | MiningEvent::StateSynced { user, .. } => Some(user),
            MiningEvent::SessionsAutoTerminated { .. } => None,
        }
    }
}

/// Broadcast fan-out for [`MiningEvent`]
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MiningEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MiningEvent> {
        self.tx.subscribe()
    }

    /// Send to all current subscribers; returns how many received it
    pub fn emit(&self, event: MiningEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "No event subscribers");
                0
            }
        }
    }
}
