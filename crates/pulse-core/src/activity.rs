//! Creditable activities and their daily limits
//!
//! The set of activity kinds is closed: adding a kind means adding an enum
//! variant, and every lookup below is an exhaustive `match`, so the compiler
//! points at each table that needs a new row.

use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::TokenAmount;
use crate::error::ValidationError;

/// A user action that can earn rewards while mining
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Post,
    Comment,
    Like,
    Share,
    Invite,
}

impl ActivityKind {
    /// Every kind, in counter order
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::Post,
        ActivityKind::Comment,
        ActivityKind::Like,
        ActivityKind::Share,
        ActivityKind::Invite,
    ];

    /// Position of this kind in [`DailyActivityCounts`]
    pub const fn index(self) -> usize {
        match self {
            ActivityKind::Post => 0,
            ActivityKind::Comment => 1,
            ActivityKind::Like => 2,
            ActivityKind::Share => 3,
            ActivityKind::Invite => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Post => "post",
            ActivityKind::Comment => "comment",
            ActivityKind::Like => "like",
            ActivityKind::Share => "share",
            ActivityKind::Invite => "invite",
        }
    }
}

impl Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" => Ok(ActivityKind::Post),
            "comment" => Ok(ActivityKind::Comment),
            "like" => Ok(ActivityKind::Like),
            "share" => Ok(ActivityKind::Share),
            "invite" => Ok(ActivityKind::Invite),
            other => Err(ValidationError::UnknownActivity(other.to_string())),
        }
    }
}

/// Cap and base reward for one activity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLimit {
    /// Maximum credited occurrences per day
    pub max_per_day: u32,
    /// Base points per credited occurrence
    pub points: u64,
    /// Base tokens per credited occurrence
    pub tokens: TokenAmount,
}

impl ActivityLimit {
    pub const fn new(max_per_day: u32, points: u64, tokens: TokenAmount) -> Self {
        Self {
            max_per_day,
            points,
            tokens,
        }
    }
}

/// Total lookup table of limits, one row per [`ActivityKind`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityLimits {
    pub post: ActivityLimit,
    pub comment: ActivityLimit,
    pub like: ActivityLimit,
    pub share: ActivityLimit,
    pub invite: ActivityLimit,
}

impl Default for ActivityLimits {
    fn default() -> Self {
        Self {
            post: ActivityLimit::new(10, 50, TokenAmount::from_whole(5)),
            comment: ActivityLimit::new(20, 10, TokenAmount::from_whole(1)),
            like: ActivityLimit::new(30, 5, TokenAmount::from_hundredths(50)),
            share: ActivityLimit::new(15, 15, TokenAmount::from_hundredths(150)),
            invite: ActivityLimit::new(5, 100, TokenAmount::from_whole(10)),
        }
    }
}

impl ActivityLimits {
    pub fn get(&self, kind: ActivityKind) -> &ActivityLimit {
        match kind {
            ActivityKind::Post => &self.post,
            ActivityKind::Comment => &self.comment,
            ActivityKind::Like => &self.like,
            ActivityKind::Share => &self.share,
            ActivityKind::Invite => &self.invite,
        }
    }

    /// Replace the row for one kind
    pub fn with_limit(mut self, kind: ActivityKind, limit: ActivityLimit) -> Self {
        let slot = match kind {
            ActivityKind::Post => &mut self.post,
            ActivityKind::Comment => &mut self.comment,
            ActivityKind::Like => &mut self.like,
            ActivityKind::Share => &mut self.share,
            ActivityKind::Invite => &mut self.invite,
        };
        *slot = limit;
        self
    }
}

/// Today's credited count per activity kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivityCounts([u32; 5]);

impl DailyActivityCounts {
    pub fn get(&self, kind: ActivityKind) -> u32 {
        self.0[kind.index()]
    }

    pub fn increment(&mut self, kind: ActivityKind) {
        let slot = &mut self.0[kind.index()];
        *slot = slot.saturating_add(1);
    }

    pub fn total(&self) -> u32 {
        self.0.iter().fold(0u32, |acc, c| acc.saturating_add(*c))
    }

    pub fn reset(&mut self) {
        self.0 = [0; 5];
    }
}

/// A single occurrence of user activity
///
/// Ephemeral: drives counter increments and is never mutated or persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limit_table() {
        let limits = ActivityLimits::default();
        let expected = [
            (ActivityKind::Post, 10, 50, "5.00"),
            (ActivityKind::Comment, 20, 10, "1.00"),
            (ActivityKind::Like, 30, 5, "0.50"),
            (ActivityKind::Share, 15, 15, "1.50"),
            (ActivityKind::Invite, 5, 100, "10.00"),
        ];
        for (kind, count, points, tokens) in expected {
            let limit = limits.get(kind);
            assert_eq!(limit.max_per_day, count, "{kind}");
            assert_eq!(limit.points, points, "{kind}");
            assert_eq!(limit.tokens.to_string(), tokens, "{kind}");
        }
    }

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in ActivityKind::ALL {
            assert_eq!(kind.as_str().parse::<ActivityKind>().unwrap(), kind);
        }
        assert_eq!("LIKE".parse::<ActivityKind>().unwrap(), ActivityKind::Like);
        assert!(matches!(
            "poke".parse::<ActivityKind>(),
            Err(ValidationError::UnknownActivity(_))
        ));
    }

    #[test]
    fn test_kind_indices_are_distinct() {
        let mut seen = [false; 5];
        for kind in ActivityKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
    }

    #[test]
    fn test_daily_counts() {
        let mut counts = DailyActivityCounts::default();
        counts.increment(ActivityKind::Like);
        counts.increment(ActivityKind::Like);
        counts.increment(ActivityKind::Post);
        assert_eq!(counts.get(ActivityKind::Like), 2);
        assert_eq!(counts.get(ActivityKind::Comment), 0);
        assert_eq!(counts.total(), 3);

        counts.reset();
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn test_with_limit_overrides_one_row() {
        let limits = ActivityLimits::default()
            .with_limit(ActivityKind::Share, ActivityLimit::new(1, 1, TokenAmount::ZERO));
        assert_eq!(limits.get(ActivityKind::Share).max_per_day, 1);
        assert_eq!(limits.get(ActivityKind::Post).max_per_day, 10);
    }

    #[test]
    fn test_serde_kind_names() {
        let json = serde_json::to_string(&ActivityKind::Comment).unwrap();
        assert_eq!(json, "\"comment\"");
    }
}
