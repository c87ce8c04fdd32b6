//! Fault injection for store backends
//!
//! Lets tests take individual operations (or the whole backend) offline and
//! count how often each operation was attempted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use pulse_core::StoreError;

/// Every operation on [`MiningStore`](pulse_core::MiningStore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetStats,
    UpsertStats,
    RecordHeartbeat,
    CreditActivity,
    ResetDailyCounters,
    CreateSession,
    CloseSession,
    FindActiveSession,
    SessionsFor,
    GetAchievementProgress,
    UpsertAchievementProgress,
    ListAchievementProgress,
    BatchAutoTerminate,
}

/// Failure switches and call counters
#[derive(Debug, Default)]
pub struct FaultInjector {
    failing: DashSet<StoreOperation>,
    offline: AtomicBool,
    calls: DashMap<StoreOperation, u64>,
    latency_micros: AtomicU64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call to `op` fail
    pub fn fail(&self, op: StoreOperation) {
        self.failing.insert(op);
    }

    /// Undo [`fail`](Self::fail)
    pub fn heal(&self, op: StoreOperation) {
        self.failing.remove(&op);
    }

    /// Take the whole backend offline (or bring it back)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every operation, to widen race windows in concurrency tests
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::SeqCst);
    }

    /// Number of attempted calls to `op`, including failed ones
    pub fn calls(&self, op: StoreOperation) -> u64 {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    /// Record a call and fail it if its switch is set
    pub async fn check(&self, op: StoreOperation) -> Result<(), StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;

        let micros = self.latency_micros.load(Ordering::SeqCst);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("store is offline"));
        }
        if self.failing.contains(&op) {
            return Err(StoreError::io(format!("injected failure for {:?}", op)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok, block_on};

    #[test]
    fn test_fail_and_heal() {
        let faults = FaultInjector::new();
        assert_ok!(block_on(faults.check(StoreOperation::GetStats)));

        faults.fail(StoreOperation::GetStats);
        assert_err!(block_on(faults.check(StoreOperation::GetStats)));
        assert_ok!(block_on(faults.check(StoreOperation::UpsertStats)));

        faults.heal(StoreOperation::GetStats);
        assert_ok!(block_on(faults.check(StoreOperation::GetStats)));
        assert_eq!(faults.calls(StoreOperation::GetStats), 3);
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let faults = FaultInjector::new();
        faults.set_offline(true);
        assert!(matches!(
            faults.check(StoreOperation::CreateSession).await,
            Err(StoreError::Unavailable(_))
        ));
        faults.set_offline(false);
        assert!(faults.check(StoreOperation::CreateSession).await.is_ok());
    }
}
