//! Reward computation

use pulse_core::{ActivityKind, ActivityLimit, MiningStats, TokenAmount};

use crate::config::MiningConfig;
use crate::heartbeat::MiningHealth;

/// Points and tokens credited for one activity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reward {
    pub kind: ActivityKind,
    pub points: u64,
    pub tokens: TokenAmount,
    /// Combined multiplier applied to the base reward
    pub multiplier: f64,
}

/// What `record_activity` did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivityOutcome {
    Credited(Reward),
    /// Today's cap for this kind was already reached; nothing changed
    LimitReached { count: u32 },
    /// Mining is off or its heartbeat is stale; nothing changed
    Inactive(MiningHealth),
}

impl ActivityOutcome {
    pub fn is_credited(&self) -> bool {
        matches!(self, ActivityOutcome::Credited(_))
    }

    pub fn reward(&self) -> Option<&Reward> {
        match self {
            ActivityOutcome::Credited(reward) => Some(reward),
            _ => None,
        }
    }
}

/// Session-local amplifier that grows with each credited activity
///
/// Only reset when a new session starts; there is no time decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComboMultiplier {
    value: f64,
    step: f64,
    ceiling: f64,
}

impl ComboMultiplier {
    pub fn new(step: f64, ceiling: f64) -> Self {
        Self {
            value: 1.0,
            step,
            ceiling: ceiling.max(1.0),
        }
    }

    pub fn from_config(config: &MiningConfig) -> Self {
        Self::new(config.combo_step, config.combo_ceiling)
    }

    pub fn current(&self) -> f64 {
        self.value
    }

    /// Register a credited activity; returns the new value
    pub fn bump(&mut self) -> f64 {
        self.value = (self.value + self.step).min(self.ceiling);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 1.0;
    }
}

/// Scales base rewards by efficiency, streak bonus and (optionally) combo
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    streak_bonus_per_day: f64,
    streak_bonus_cap: f64,
    apply_combo: bool,
}

impl RewardCalculator {
    pub fn from_config(config: &MiningConfig) -> Self {
        Self {
            streak_bonus_per_day: config.streak_bonus_per_day,
            streak_bonus_cap: config.streak_bonus_cap,
            apply_combo: config.apply_combo_multiplier,
        }
    }

    /// `1 + min(streak_days * per_day, cap)`
    pub fn streak_bonus(&self, streak_days: u32) -> f64 {
        1.0 + (f64::from(streak_days) * self.streak_bonus_per_day).min(self.streak_bonus_cap)
    }

    pub fn multiplier(&self, stats: &MiningStats, combo: &ComboMultiplier) -> f64 {
        let mut multiplier = stats.efficiency_multiplier * self.streak_bonus(stats.streak_days);
        if self.apply_combo {
            multiplier *= combo.current();
        }
        if multiplier.is_finite() && multiplier > 0.0 {
            multiplier
        } else {
            0.0
        }
    }

    pub fn calculate(
        &self,
        kind: ActivityKind,
        limit: &ActivityLimit,
        stats: &MiningStats,
        combo: &ComboMultiplier,
    ) -> Reward {
        let multiplier = self.multiplier(stats, combo);
        Reward {
            kind,
            points: scale_points(limit.points, multiplier),
            tokens: limit.tokens.scale(multiplier),
            multiplier,
        }
    }
}

/// Round to the nearest whole point
fn scale_points(points: u64, multiplier: f64) -> u64 {
    let scaled = (points as f64 * multiplier).round();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}
