//! Structured storage using redb
//!
//! This module provides durable storage for:
//! - Per-user mining stats
//! - Mining sessions, with an active-session index and a per-user history index
//! - Achievement progress
//!
//! Every key is a byte string; composite keys join their parts with a zero byte.

mod store;
mod tables;

pub use store::RedbMiningStore;
pub use tables::{RedbStorage, RedbStorageConfig};
