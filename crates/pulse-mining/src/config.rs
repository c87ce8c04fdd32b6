//! Configuration for the mining engine

use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use pulse_core::ActivityLimits;

use crate::error::{MiningError, MiningResult};

/// Upper bound for every seconds-valued field (ten years)
pub const MAX_PERIOD_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Engine tunables
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// heartbeat_interval_secs = 30
/// apply_combo_multiplier = true
///
/// [limits.comment]
/// max_per_day = 25
/// points = 10
/// tokens = 10000   # raw units, 1/10_000 token each
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Seconds between heartbeats while mining
    pub heartbeat_interval_secs: u64,
    /// A session whose last heartbeat is at least this old is unhealthy
    pub health_timeout_secs: u64,
    /// Minimum seconds between two syncs for the same user
    pub sync_min_interval_secs: u64,
    /// Active sessions not updated for this many hours are auto-terminated
    pub cleanup_threshold_hours: u32,
    /// Seconds between janitor passes
    pub cleanup_interval_secs: u64,
    /// Combo growth per credited activity
    pub combo_step: f64,
    /// Combo multiplier never exceeds this
    pub combo_ceiling: f64,
    /// Whether the combo multiplier scales rewards; it is always tracked
    pub apply_combo_multiplier: bool,
    /// Reward bonus per streak day
    pub streak_bonus_per_day: f64,
    /// Upper bound on the streak bonus
    pub streak_bonus_cap: f64,
    /// Per-kind daily caps and base rewards
    pub limits: ActivityLimits,
    /// Event broadcast channel capacity
    pub event_channel_capacity: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            health_timeout_secs: 5 * 60,
            sync_min_interval_secs: 30,
            cleanup_threshold_hours: 3,
            cleanup_interval_secs: 15 * 60,
            combo_step: 0.05,
            combo_ceiling: 2.0,
            apply_combo_multiplier: false,
            streak_bonus_per_day: 0.01,
            streak_bonus_cap: 0.30,
            limits: ActivityLimits::default(),
            event_channel_capacity: 1024,
        }
    }
}

impl MiningConfig {
    /// Short intervals for tests and local simulation
    pub fn testing() -> Self {
        Self {
            heartbeat_interval_secs: 1,
            health_timeout_secs: 5,
            sync_min_interval_secs: 1,
            cleanup_interval_secs: 1,
            event_channel_capacity: 256,
            ..Self::default()
        }
    }

    /// Parse from TOML, filling missing keys with defaults
    pub fn from_toml_str(source: &str) -> MiningResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> MiningResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> MiningResult<()> {
        for (name, secs) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("health_timeout_secs", self.health_timeout_secs),
            ("sync_min_interval_secs", self.sync_min_interval_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ] {
            if secs > MAX_PERIOD_SECS {
                return Err(MiningError::Config(format!(
                    "{} ({}) exceeds the maximum of {} seconds",
                    name, secs, MAX_PERIOD_SECS
                )));
            }
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(MiningError::Config("heartbeat_interval_secs must be positive".into()));
        }
        if self.health_timeout_secs <= self.heartbeat_interval_secs {
            return Err(MiningError::Config(format!(
                "health_timeout_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.health_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(MiningError::Config("cleanup_interval_secs must be positive".into()));
        }
        if !(self.combo_step >= 0.0 && self.combo_step.is_finite()) {
            return Err(MiningError::Config("combo_step must be a non-negative number".into()));
        }
        if !(self.combo_ceiling >= 1.0 && self.combo_ceiling.is_finite()) {
            return Err(MiningError::Config("combo_ceiling must be at least 1.0".into()));
        }
        if !(self.streak_bonus_per_day >= 0.0 && self.streak_bonus_cap >= 0.0) {
            return Err(MiningError::Config("streak bonus values must be non-negative".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(MiningError::Config("event_channel_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn health_timeout(&self) -> TimeDelta {
        TimeDelta::seconds(self.health_timeout_secs as i64)
    }

    pub fn sync_min_interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.sync_min_interval_secs as i64)
    }

    pub fn cleanup_threshold(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.cleanup_threshold_hours))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs();
        self
    }

    /// Set the health timeout
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the minimum sync interval
    pub fn with_sync_min_interval(mut self, interval: Duration) -> Self {
        self.sync_min_interval_secs = interval.as_secs();
        self
    }

    /// Set the cleanup threshold
    pub fn with_cleanup_threshold_hours(mut self, hours: u32) -> Self {
        self.cleanup_threshold_hours = hours;
        self
    }

    /// Turn reward scaling by the combo multiplier on or off
    pub fn with_combo_multiplier(mut self, enabled: bool) -> Self {
        self.apply_combo_multiplier = enabled;
        self
    }

    /// Replace the limits table
    pub fn with_limits(mut self, limits: ActivityLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}
