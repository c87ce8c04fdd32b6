//! # Pulse Storage
//!
//! Storage backends for the Pulse mining engine.
//!
//! This crate provides implementations of the [`MiningStore`] trait from
//! `pulse-core`.
//!
//! ## Features
//!
//! - **InMemoryMiningStore**: DashMap-backed implementation for tests and simulation
//! - **RedbMiningStore**: persistent implementation on an embedded redb database
//! - **FaultInjector**: per-operation failure switches shared by both backends
//!
//! ## Example
//!
//! ```rust,ignore
//! use pulse_storage::InMemoryMiningStore;
//! use pulse_core::{MiningStore, StatsPatch, UserId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryMiningStore::new();
//!     let user = UserId::new("alice").unwrap();
//!     let now = chrono::Utc::now();
//!
//!     store.upsert_stats(&user, StatsPatch::new().mining(true), now).await.unwrap();
//!     let session = store.create_session(&user, now).await.unwrap();
//!     assert!(store.find_active_session(&user).await.unwrap().is_some());
//! }
//! ```

pub mod fault;
pub mod memory;
pub mod structured;

// Re-exports
pub use fault::{FaultInjector, StoreOperation};
pub use memory::InMemoryMiningStore;
pub use structured::{RedbMiningStore, RedbStorage, RedbStorageConfig};

// Re-export the store trait from pulse-core for convenience
pub use pulse_core::MiningStore;
