//! Per-workload mutual exclusion for migration runs.

use crate::types::WorkloadId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per target workload.
///
/// Runs against the same target workload queue up on its mutex; runs against
/// different workloads never contend. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct WorkloadLocks {
    locks: Arc<DashMap<WorkloadId, Arc<Mutex<()>>>>,
}

impl WorkloadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a workload. Access lasts until the guard is dropped.
    pub async fn acquire(&self, workload_id: WorkloadId) -> OwnedMutexGuard<()> {
        // Clone out of the map so the shard lock is not held across the await
        let lock = self.locks.entry(workload_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Whether some run currently holds the workload
    pub fn is_locked(&self, workload_id: WorkloadId) -> bool {
        self.locks
            .get(&workload_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Drop entries nobody holds or waits on
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_same_workload_is_exclusive() {
        let locks = WorkloadLocks::new();
        let workload = Uuid::new_v4();

        let guard = locks.acquire(workload).await;
        assert!(locks.is_locked(workload));

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(workload).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(!locks.is_locked(workload));
    }

    #[tokio::test]
    async fn test_different_workloads_do_not_contend() {
        let locks = WorkloadLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(Uuid::new_v4()))
            .await
            .expect("second workload should lock immediately");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = WorkloadLocks::new();
        let held = Uuid::new_v4();
        let guard = locks.acquire(held).await;
        drop(locks.acquire(Uuid::new_v4()).await);

        locks.prune();
        assert_eq!(locks.len(), 1);
        assert!(locks.is_locked(held));

        drop(guard);
        locks.prune();
        assert!(locks.is_empty());
    }
}
