//! redb table definitions and storage manager
//!
//! Defines all tables used for the persistent mining store.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, ReadTransaction, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use pulse_core::{AchievementId, StoreError, UserId};

/// Type alias for scan results to simplify complex type
pub type ScanResults = Vec<(Vec<u8>, Vec<u8>)>;

/// Separates the parts of composite keys; user ids never contain control characters
pub const KEY_SEPARATOR: u8 = 0;

// Key: user id bytes, Value: serialized MiningStats
pub const STATS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("mining_stats");

// Key: session id (16 bytes), Value: serialized MiningSession
pub const SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("mining_sessions");

// Key: user id bytes, Value: session id of the user's active session
pub const ACTIVE_SESSIONS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("active_sessions");

// Key: (user id, session id) concatenated, Value: empty
pub const USER_SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("user_sessions");

// Key: (user id, achievement id) concatenated, Value: serialized UserAchievementProgress
pub const ACHIEVEMENTS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("achievement_progress");

/// Configuration for redb storage
#[derive(Debug, Clone)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/pulse.redb"),
        }
    }
}

/// Main redb storage manager
pub struct RedbStorage {
    db: Arc<Database>,
    config: RedbStorageConfig,
}

impl RedbStorage {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let db = Database::create(&config.db_path).map_err(io_err)?;

        info!("Opened redb database");

        let storage = Self {
            db: Arc::new(db),
            config,
        };

        storage.init_tables()?;

        Ok(storage)
    }

    /// Initialize all tables
    fn init_tables(&self) -> Result<(), StoreError> {
        let write_txn = self.begin_write()?;

        // Create tables if they don't exist
        for table in [STATS, SESSIONS, ACTIVE_SESSIONS, USER_SESSIONS, ACHIEVEMENTS] {
            write_txn.open_table(table).map_err(io_err)?;
        }

        write_txn.commit().map_err(io_err)?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }

    /// Start a write transaction; redb serializes writers
    pub fn begin_write(&self) -> Result<WriteTransaction, StoreError> {
        self.db.begin_write().map_err(io_err)
    }

    pub fn begin_read(&self) -> Result<ReadTransaction, StoreError> {
        self.db.begin_read().map_err(io_err)
    }

    /// Put a key-value pair in a table
    pub fn put(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError> {
        let write_txn = self.begin_write()?;

        {
            let mut table = write_txn.open_table(table).map_err(io_err)?;
            table.insert(key, value).map_err(io_err)?;
        }

        write_txn.commit().map_err(io_err)?;

        Ok(())
    }

    /// Get a value from a table
    pub fn get(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(table).map_err(io_err)?;

        let value = table.get(key).map_err(io_err)?.map(|v| v.value().to_vec());

        Ok(value)
    }

    /// Iterate over all entries in a table with a prefix
    pub fn scan_prefix(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        prefix: &[u8],
    ) -> Result<ScanResults, StoreError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(table).map_err(io_err)?;

        let mut results = Vec::new();

        // Use range to get all keys >= prefix
        let range = table.range(prefix..).map_err(io_err)?;

        for entry in range {
            let (key, value) = entry.map_err(io_err)?;
            let key_bytes = key.value();

            // Stop when we're past the prefix
            if !key_bytes.starts_with(prefix) {
                break;
            }

            results.push((key_bytes.to_vec(), value.value().to_vec()));
        }

        Ok(results)
    }
}

/// Map any backend error into [`StoreError::Io`]
pub(crate) fn io_err<E: Display>(e: E) -> StoreError {
    StoreError::io(e.to_string())
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(value).map_err(|e| StoreError::serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::deserialization(e.to_string()))
}

/// `user \0` prefix for per-user composite keys
pub(crate) fn user_prefix(user: &UserId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user.as_bytes().len() + 1);
    prefix.extend_from_slice(user.as_bytes());
    prefix.push(KEY_SEPARATOR);
    prefix
}

pub(crate) fn user_session_key(user: &UserId, session: &[u8; 16]) -> Vec<u8> {
    let mut key = user_prefix(user);
    key.extend_from_slice(session);
    key
}

pub(crate) fn achievement_key(user: &UserId, achievement: &AchievementId) -> Vec<u8> {
    let mut key = user_prefix(user);
    key.extend_from_slice(achievement.as_str().as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (RedbStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("test.redb"),
        };
        let storage = RedbStorage::open(config).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_put_get() {
        let (storage, _temp) = create_test_storage();

        storage.put(STATS, b"alice", b"row").unwrap();

        let retrieved = storage.get(STATS, b"alice").unwrap();
        assert_eq!(retrieved, Some(b"row".to_vec()));
        assert!(storage.get(STATS, b"bob").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_respects_separator() {
        let (storage, _temp) = create_test_storage();
        let ann = UserId::new("ann").unwrap();
        let anna = UserId::new("anna").unwrap();

        storage
            .put(ACHIEVEMENTS, &achievement_key(&ann, &"amplifier".into()), b"1")
            .unwrap();
        storage
            .put(ACHIEVEMENTS, &achievement_key(&ann, &"appreciator".into()), b"2")
            .unwrap();
        storage
            .put(ACHIEVEMENTS, &achievement_key(&anna, &"amplifier".into()), b"3")
            .unwrap();

        assert_eq!(storage.scan_prefix(ACHIEVEMENTS, &user_prefix(&ann)).unwrap().len(), 2);
        assert_eq!(storage.scan_prefix(ACHIEVEMENTS, &user_prefix(&anna)).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("nested").join("test.redb"),
        };
        {
            let storage = RedbStorage::open(config.clone()).unwrap();
            storage.put(STATS, b"alice", b"row").unwrap();
        }
        let storage = RedbStorage::open(config).unwrap();
        assert_eq!(storage.get(STATS, b"alice").unwrap(), Some(b"row".to_vec()));
    }
}
