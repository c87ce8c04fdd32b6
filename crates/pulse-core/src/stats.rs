//! Per-user mining statistics row

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityKind, DailyActivityCounts};
use crate::amount::TokenAmount;
use crate::identity::UserId;

/// Baseline passive mining rate for new users, in tokens per hour
pub const DEFAULT_MINING_RATE: TokenAmount = TokenAmount::from_whole(1);

/// The authoritative mining record for one user
///
/// `is_mining` belongs to the session lifecycle; the daily and total counters
/// belong to activity crediting. Both are only changed through
/// [`MiningStore`](crate::MiningStore) operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    pub user_id: UserId,
    pub is_mining: bool,
    pub total_points: u64,
    pub total_tokens_earned: TokenAmount,
    pub daily_points: u64,
    pub daily_tokens_earned: TokenAmount,
    /// Credited activities per kind since the last daily reset
    pub daily_counts: DailyActivityCounts,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Passive accrual rate in tokens per hour
    pub mining_rate: TokenAmount,
    pub efficiency_multiplier: f64,
    pub streak_days: u32,
    pub updated_at: DateTime<Utc>,
}

impl MiningStats {
    /// A fresh, idle record
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            is_mining: false,
            total_points: 0,
            total_tokens_earned: TokenAmount::ZERO,
            daily_points: 0,
            daily_tokens_earned: TokenAmount::ZERO,
            daily_counts: DailyActivityCounts::default(),
            last_activity_at: None,
            last_heartbeat: None,
            mining_rate: DEFAULT_MINING_RATE,
            efficiency_multiplier: 1.0,
            streak_days: 0,
            updated_at: now,
        }
    }

    /// Today's credited count for one kind
    pub fn count_for(&self, kind: ActivityKind) -> u32 {
        self.daily_counts.get(kind)
    }

    /// Apply a partial update
    pub fn apply(&mut self, patch: &StatsPatch, now: DateTime<Utc>) {
        if let Some(is_mining) = patch.is_mining {
            self.is_mining = is_mining;
        }
        if let Some(at) = patch.last_heartbeat {
            self.last_heartbeat = Some(at);
        }
        if let Some(at) = patch.last_activity_at {
            self.last_activity_at = Some(at);
        }
        if let Some(rate) = patch.mining_rate {
            self.mining_rate = rate;
        }
        if let Some(multiplier) = patch.efficiency_multiplier {
            self.efficiency_multiplier = multiplier;
        }
        if let Some(days) = patch.streak_days {
            self.streak_days = days;
        }
        self.updated_at = now;
    }

    /// Add a credited reward to the daily and total counters
    ///
    /// `kind` is `None` for one-time bonuses, which do not count toward any
    /// daily cap.
    pub fn apply_credit(
        &mut self,
        kind: Option<ActivityKind>,
        points: u64,
        tokens: TokenAmount,
        at: DateTime<Utc>,
    ) {
        if let Some(kind) = kind {
            self.daily_counts.increment(kind);
        }
        self.daily_points = self.daily_points.saturating_add(points);
        self.daily_tokens_earned += tokens;
        self.total_points = self.total_points.saturating_add(points);
        self.total_tokens_earned += tokens;
        self.last_activity_at = Some(at);
        self.updated_at = at;
    }

    /// Clear the daily counters, keeping totals
    pub fn reset_daily(&mut self, now: DateTime<Utc>) {
        self.daily_counts.reset();
        self.daily_points = 0;
        self.daily_tokens_earned = TokenAmount::ZERO;
        self.updated_at = now;
    }

    /// Time since the last heartbeat, if one was ever recorded
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.last_heartbeat.map(|at| now - at)
    }
}

/// Partial update for [`MiningStats`]; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsPatch {
    pub is_mining: Option<bool>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub mining_rate: Option<TokenAmount>,
    pub efficiency_multiplier: Option<f64>,
    pub streak_days: Option<u32>,
}

impl StatsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mining(mut self, is_mining: bool) -> Self {
        self.is_mining = Some(is_mining);
        self
    }

    pub fn heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat = Some(at);
        self
    }

    pub fn activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(at);
        self
    }

    pub fn mining_rate(mut self, rate: TokenAmount) -> Self {
        self.mining_rate = Some(rate);
        self
    }

    pub fn efficiency(mut self, multiplier: f64) -> Self {
        self.efficiency_multiplier = Some(multiplier);
        self
    }

    pub fn streak(mut self, days: u32) -> Self {
        self.streak_days = Some(days);
        self
    }
}
