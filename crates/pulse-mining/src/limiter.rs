//! Daily activity caps
//!
//! Pure lookups against [`ActivityLimits`]. The authoritative check happens
//! again inside the store's atomic credit; these functions answer UI queries
//! and short-circuit obvious denials without a write.

use pulse_core::{ActivityKind, ActivityLimit, ActivityLimits, DailyActivityCounts};

/// Result of checking one activity against today's counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed { remaining: u32 },
    Denied { count: u32, max_per_day: u32 },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allowed { .. })
    }
}

/// Maps activity kind and today's counts to allow/deny
#[derive(Debug, Clone, Default)]
pub struct ActivityLimiter {
    limits: ActivityLimits,
}

impl ActivityLimiter {
    pub fn new(limits: ActivityLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ActivityLimits {
        &self.limits
    }

    pub fn limit(&self, kind: ActivityKind) -> &ActivityLimit {
        self.limits.get(kind)
    }

    pub fn check(&self, kind: ActivityKind, counts: &DailyActivityCounts) -> LimitDecision {
        let max_per_day = self.limit(kind).max_per_day;
        let count = counts.get(kind);
        if count >= max_per_day {
            LimitDecision::Denied { count, max_per_day }
        } else {
            LimitDecision::Allowed {
                remaining: max_per_day - count,
            }
        }
    }

    /// Hard cap: true once today's count equals the cap
    pub fn is_limit_reached(&self, kind: ActivityKind, counts: &DailyActivityCounts) -> bool {
        !self.check(kind, counts).is_allowed()
    }

    pub fn remaining(&self, kind: ActivityKind, counts: &DailyActivityCounts) -> u32 {
        match self.check(kind, counts) {
            LimitDecision::Allowed { remaining } => remaining,
            LimitDecision::Denied { .. } => 0,
        }
    }
}
