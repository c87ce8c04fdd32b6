//! # Pulse Core
//!
//! Core types, persistence traits, and errors for the Pulse activity mining
//! engine.
//!
//! This crate holds everything the engine and the storage backends agree on:
//! the shape of the per-user stats row, mining sessions, achievement progress,
//! and the [`MiningStore`] trait that every backend implements. It has no
//! opinion on how rows are persisted.
//!
//! ## Key Traits
//!
//! - [`MiningStore`]: CRUD-style persistence collaborator with the atomic
//!   operations the engine relies on (credit-with-cap, conditional heartbeat,
//!   single-active-session creation)
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`UserId`], [`SessionId`], [`AchievementId`]: identifiers
//! - [`ActivityKind`] and [`ActivityLimits`]: the five creditable activities and
//!   their per-day caps
//! - [`TokenAmount`]: fixed-point token quantity
//! - [`MiningStats`], [`MiningSession`], [`UserAchievementProgress`]: persisted rows

pub mod achievement;
pub mod activity;
pub mod amount;
pub mod clock;
pub mod error;
pub mod identity;
pub mod session;
pub mod stats;
pub mod store;

// Re-export main types
pub use achievement::*;
pub use activity::*;
pub use amount::*;
pub use clock::*;
pub use error::*;
pub use identity::*;
pub use session::*;
pub use stats::*;
pub use store::*;
