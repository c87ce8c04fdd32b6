//! Achievements and per-user progress toward them
//!
//! Progress only moves forward and stops at `max_progress`. Completion is
//! one-shot: once a row is `completed`, [`UserAchievementProgress::advance`]
//! is a no-op.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityKind;
use crate::amount::TokenAmount;
use crate::identity::UserId;

/// Stable achievement identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AchievementId(String);

impl AchievementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AchievementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for AchievementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Definition of an unlockable achievement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: AchievementId,
    pub name: String,
    pub description: String,
    pub max_progress: u32,
    pub token_reward: TokenAmount,
    pub points_reward: u64,
}

impl Achievement {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        max_progress: u32,
    ) -> Self {
        Self {
            id: AchievementId::new(id),
            name: name.into(),
            description: description.into(),
            max_progress: max_progress.max(1),
            token_reward: TokenAmount::ZERO,
            points_reward: 0,
        }
    }

    pub fn with_reward(mut self, points: u64, tokens: TokenAmount) -> Self {
        self.points_reward = points;
        self.token_reward = tokens;
        self
    }
}

/// Known achievements plus the activity → achievement mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementCatalog {
    achievements: Vec<Achievement>,
    social: Vec<(ActivityKind, AchievementId)>,
}

impl Default for AchievementCatalog {
    fn default() -> Self {
        let achievements = vec![
            Achievement::new("content_creator", "Content Creator", "Publish 10 posts", 10)
                .with_reward(250, TokenAmount::from_whole(25)),
            Achievement::new(
                "conversationalist",
                "Conversationalist",
                "Leave 50 comments",
                50,
            )
            .with_reward(200, TokenAmount::from_whole(20)),
            Achievement::new("appreciator", "Appreciator", "Like 100 posts", 100)
                .with_reward(150, TokenAmount::from_whole(15)),
            Achievement::new("amplifier", "Amplifier", "Share 25 posts", 25)
                .with_reward(200, TokenAmount::from_whole(20)),
        ];
        let social = vec![
            (ActivityKind::Post, AchievementId::new("content_creator")),
            (ActivityKind::Comment, AchievementId::new("conversationalist")),
            (ActivityKind::Like, AchievementId::new("appreciator")),
            (ActivityKind::Share, AchievementId::new("amplifier")),
        ];
        Self {
            achievements,
            social,
        }
    }
}

impl AchievementCatalog {
    /// A catalog with no achievements and no mapping
    pub fn empty() -> Self {
        Self {
            achievements: Vec::new(),
            social: Vec::new(),
        }
    }

    /// Add or replace an achievement definition
    pub fn with_achievement(mut self, achievement: Achievement) -> Self {
        self.achievements.retain(|a| a.id != achievement.id);
        self.achievements.push(achievement);
        self
    }

    /// Map an activity kind to an achievement
    pub fn with_social_mapping(mut self, kind: ActivityKind, id: AchievementId) -> Self {
        self.social.retain(|(k, _)| *k != kind);
        self.social.push((kind, id));
        self
    }

    pub fn get(&self, id: &AchievementId) -> Option<&Achievement> {
        self.achievements.iter().find(|a| &a.id == id)
    }

    /// Achievement advanced by one occurrence of `kind`, if any
    pub fn for_activity(&self, kind: ActivityKind) -> Option<&AchievementId> {
        self.social
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, id)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Achievement> {
        self.achievements.iter()
    }

    pub fn len(&self) -> usize {
        self.achievements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.achievements.is_empty()
    }
}

/// Result of applying an increment to a progress row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressChange {
    /// Already completed or already at the ceiling; nothing changed
    Unchanged,
    /// Progress moved but the achievement is not yet complete
    Advanced { progress: u32 },
    /// This increment completed the achievement
    Completed,
}

/// One user's progress toward one achievement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAchievementProgress {
    pub user_id: UserId,
    pub achievement_id: AchievementId,
    pub progress: u32,
    pub max_progress: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub token_reward: TokenAmount,
    pub points_reward: u64,
    pub updated_at: DateTime<Utc>,
    /// Completed, but the bonus credit has not gone through yet
    #[serde(default)]
    pub bonus_pending: bool,
}

impl UserAchievementProgress {
    /// A fresh row at zero progress
    pub fn new(user_id: UserId, achievement: &Achievement, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            achievement_id: achievement.id.clone(),
            progress: 0,
            max_progress: achievement.max_progress,
            completed: false,
            completed_at: None,
            token_reward: achievement.token_reward,
            points_reward: achievement.points_reward,
            updated_at: now,
            bonus_pending: false,
        }
    }

    /// Whether completing this achievement pays anything
    pub fn has_bonus(&self) -> bool {
        self.points_reward > 0 || !self.token_reward.is_zero()
    }

    /// Apply an increment, clamping at `max_progress`
    pub fn advance(&mut self, increment: u32, now: DateTime<Utc>) -> ProgressChange {
        if self.completed {
            return ProgressChange::Unchanged;
        }
        let next = self.progress.saturating_add(increment).min(self.max_progress);
        if next == self.progress && next < self.max_progress {
            return ProgressChange::Unchanged;
        }
        self.progress = next;
        self.updated_at = now;
        if next >= self.max_progress {
            self.completed = true;
            self.completed_at = Some(now);
            ProgressChange::Completed
        } else {
            ProgressChange::Advanced { progress: next }
        }
    }

    /// Fraction complete in `[0, 1]`
    pub fn ratio(&self) -> f64 {
        if self.max_progress == 0 {
            return 1.0;
        }
        f64::from(self.progress) / f64::from(self.max_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(max: u32) -> UserAchievementProgress {
        let achievement = Achievement::new("test", "Test", "test", max)
            .with_reward(10, TokenAmount::from_whole(1));
        UserAchievementProgress::new(UserId::new("alice").unwrap(), &achievement, Utc::now())
    }

    #[test]
    fn test_advance_clamps_and_completes() {
        let mut p = row(5);
        let now = Utc::now();
        assert_eq!(p.advance(3, now), ProgressChange::Advanced { progress: 3 });
        assert_eq!(p.advance(3, now), ProgressChange::Completed);
        assert_eq!(p.progress, 5);
        assert!(p.completed);
        assert_eq!(p.completed_at, Some(now));
    }

    #[test]
    fn test_completed_is_idempotent() {
        let mut p = row(1);
        let first = Utc::now();
        assert_eq!(p.advance(1, first), ProgressChange::Completed);

        let before = p.clone();
        assert_eq!(p.advance(10, Utc::now()), ProgressChange::Unchanged);
        assert_eq!(p, before);
    }

    #[test]
    fn test_zero_increment_is_unchanged() {
        let mut p = row(5);
        assert_eq!(p.advance(0, Utc::now()), ProgressChange::Unchanged);
        assert_eq!(p.progress, 0);
    }

    #[test]
    fn test_ratio() {
        let mut p = row(4);
        p.advance(1, Utc::now());
        assert!((p.ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_catalog_social_mapping() {
        let catalog = AchievementCatalog::default();
        for kind in [
            ActivityKind::Post,
            ActivityKind::Comment,
            ActivityKind::Like,
            ActivityKind::Share,
        ] {
            let id = catalog.for_activity(kind).expect("mapped");
            assert!(catalog.get(id).is_some(), "{id} must be defined");
        }
        assert!(catalog.for_activity(ActivityKind::Invite).is_none());
    }

    #[test]
    fn test_catalog_overrides() {
        let catalog = AchievementCatalog::empty()
            .with_achievement(Achievement::new("a", "A", "", 5))
            .with_achievement(Achievement::new("a", "A2", "", 3))
            .with_social_mapping(ActivityKind::Invite, AchievementId::new("a"));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(&"a".into()).unwrap().max_progress, 3);
        assert_eq!(catalog.for_activity(ActivityKind::Invite).unwrap().as_str(), "a");
    }
}
