//! Per-node-id write serialization
//!
//! At most one write (remote mutation or change-feed application) may be in
//! flight for a given node id. Writes for different ids proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::NodeId;

/// Registry of per-id async locks
///
/// Entries are created on first use and dropped again once no guard or
/// waiter refers to them.
#[derive(Default)]
pub struct NodeLocks {
    locks: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`
    pub async fn acquire(&self, id: &NodeId) -> NodeLockGuard<'_> {
        let lock = self.locks.entry(id.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        NodeLockGuard {
            locks: &self.locks,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    /// Number of ids currently locked or awaited
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one node id; released on drop
pub struct NodeLockGuard<'a> {
    locks: &'a DashMap<NodeId, Arc<Mutex<()>>>,
    id: NodeId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NodeLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the registry itself still holds the lock: nobody is waiting
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
