//! Registry of reads waiting for data that has not been appended yet.

use crate::types::SegmentId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Why a waiting read was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// The segment grew to `length`, past the awaited offset.
    Appended {
        /// New segment length.
        length: u64,
    },
    /// The segment was sealed short of the awaited offset.
    Sealed,
    /// The segment was merged into its parent.
    Merged,
}

type WaiterKey = (SegmentId, u64, u64);

#[derive(Debug, Default)]
struct Waiters {
    pending: BTreeMap<WaiterKey, oneshot::Sender<Wakeup>>,
    next_id: u64,
}

/// Pending future reads keyed by segment and offset.
///
/// A waiter is registered while the segment state is read-locked and the
/// store notifies after applying an operation under the write lock, so a
/// read either sees the new length or is registered in time to be woken.
#[derive(Debug, Default)]
pub struct FutureReadRegistry {
    waiters: Mutex<Waiters>,
}

impl FutureReadRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `offset` of `segment`.
    ///
    /// The returned guard removes the waiter when dropped.
    pub fn register(
        self: &Arc<Self>,
        segment: SegmentId,
        offset: u64,
    ) -> (FutureReadGuard, oneshot::Receiver<Wakeup>) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let key = (segment, offset, waiters.next_id);
        waiters.next_id += 1;
        waiters.pending.insert(key, tx);
        let guard = FutureReadGuard {
            registry: Arc::clone(self),
            key,
        };
        (guard, rx)
    }

    /// Wakes every waiter on `segment` whose offset is below `length`, in
    /// offset order.
    pub fn notify_append(&self, segment: SegmentId, length: u64) {
        for tx in self.take(segment, length) {
            let _ = tx.send(Wakeup::Appended { length });
        }
    }

    /// Fails every remaining waiter on a sealed segment.
    pub fn notify_sealed(&self, segment: SegmentId) {
        for tx in self.take(segment, u64::MAX) {
            let _ = tx.send(Wakeup::Sealed);
        }
    }

    /// Fails every remaining waiter on a merged batch.
    pub fn notify_merged(&self, segment: SegmentId) {
        for tx in self.take(segment, u64::MAX) {
            let _ = tx.send(Wakeup::Merged);
        }
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.lock().pending.len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns the senders for `segment` with offset below
    /// `below`, ordered by offset.
    fn take(&self, segment: SegmentId, below: u64) -> Vec<oneshot::Sender<Wakeup>> {
        let mut waiters = self.waiters.lock();
        let keys: Vec<WaiterKey> = waiters
            .pending
            .range((segment, 0, 0)..=(segment, u64::MAX, u64::MAX))
            .take_while(|((_, offset, _), _)| *offset < below)
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| waiters.pending.remove(&key))
            .collect()
    }

    fn deregister(&self, key: &WaiterKey) {
        self.waiters.lock().pending.remove(key);
    }
}

/// Keeps a future read registered; dropping it cancels the wait.
#[derive(Debug)]
pub struct FutureReadGuard {
    registry: Arc<FutureReadRegistry>,
    key: WaiterKey,
}

impl Drop for FutureReadGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.key);
    }
}
