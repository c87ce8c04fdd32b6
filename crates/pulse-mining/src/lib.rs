//! # Pulse Mining
//!
//! Mining session and activity reward engine.
//!
//! A user switches "mining" on, a heartbeat keeps the session alive, and each
//! social activity (post, comment, like, share, invite) is credited with
//! points and tokens up to a per-kind daily cap. Social activities also feed
//! achievement progress, and completed achievements pay a one-time bonus.
//!
//! ## Components
//!
//! - [`SessionController`]: start/stop with the persisted flag and session row
//! - [`HeartbeatMonitor`]: periodic liveness beats and health evaluation
//! - [`ActivityLimiter`]: pure daily-cap lookups
//! - [`RewardCalculator`]: base reward scaled by efficiency and streak
//! - [`AchievementTracker`]: monotone progress with exactly-once bonus
//! - [`MiningSyncCoordinator`]: throttled read-through of the stats row
//! - [`SessionJanitor`]: auto-terminates abandoned sessions
//!
//! [`MiningEngine`] wires them together over any
//! [`MiningStore`](pulse_core::MiningStore) and hands out per-user
//! [`MiningHandle`]s for UI code.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pulse_core::ActivityKind;
//! use pulse_mining::{MiningConfig, MiningEngine};
//! use pulse_storage::InMemoryMiningStore;
//!
//! #[tokio::main]
//! async fn main() -> pulse_mining::MiningResult<()> {
//!     let engine = MiningEngine::new(Arc::new(InMemoryMiningStore::new()), MiningConfig::default())?;
//!     let alice = engine.handle_for("alice")?;
//!
//!     alice.start_mining().await;
//!     let outcome = alice.record_activity(ActivityKind::Comment).await?;
//!     println!("{:?}", outcome);
//!     alice.stop_mining().await;
//!     Ok(())
//! }
//! ```

pub mod achievements;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod limiter;
mod locks;
pub mod reward;
pub mod session;
pub mod sync;

// Re-exports
pub use achievements::{AchievementTracker, ProgressUpdate};
pub use cleanup::SessionJanitor;
pub use config::{MAX_PERIOD_SECS, MiningConfig};
pub use engine::{MiningEngine, MiningEngineBuilder, MiningHandle, SessionProjection};
pub use error::{MiningError, MiningResult};
pub use events::{EventBus, MiningEvent};
pub use heartbeat::{HeartbeatMonitor, MiningHealth};
pub use limiter::{ActivityLimiter, LimitDecision};
pub use reward::{ActivityOutcome, ComboMultiplier, Reward, RewardCalculator};
pub use session::{SessionController, StartOutcome, StopOutcome};
pub use sync::{MiningSyncCoordinator, SyncOutcome};
