//! # Partition Store
//!
//! Registry of per-partition states keyed by [`PartitionKey`].
//!
//! States are handed out as [`StateLease`]s. A lease keeps its partition
//! alive; locking it yields exclusive access to the [`PartitionState`].
//! When the last lease of a partition is dropped and the state's destroy
//! predicate holds, the state is reclaimed.
//!
//! ## Lock Ordering
//!
//! The registry lock is never held while blocking on a partition lock. It
//! only ever `try_lock`s a partition to test the destroy predicate.

use crate::event::PartitionKey;
use crate::metrics::RateLimiterMetrics;
use crate::state::PartitionState;
use fxhash::FxHashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

struct Slot {
    state: Arc<Mutex<PartitionState>>,
    leases: usize,
}

/// Owner of every live partition state.
pub struct PartitionStore {
    slots: Mutex<FxHashMap<PartitionKey, Slot>>,
    metrics: Arc<RateLimiterMetrics>,
}

impl PartitionStore {
    /// Creates an empty store with its own metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(RateLimiterMetrics::new()))
    }

    /// Creates an empty store reporting into shared metrics.
    #[must_use]
    pub fn with_metrics(metrics: Arc<RateLimiterMetrics>) -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
            metrics,
        }
    }

    /// Leases the state of `key`, creating it if absent.
    pub fn lease(&self, key: &PartitionKey) -> StateLease<'_> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_insert_with(|| {
            tracing::trace!(partition = %key, "partition state created");
            self.metrics.record_partition_created();
            Slot {
                state: Arc::new(Mutex::new(PartitionState::new())),
                leases: 0,
            }
        });
        slot.leases += 1;
        StateLease {
            store: self,
            key: key.clone(),
            state: Arc::clone(&slot.state),
        }
    }

    /// Leases the state of `key` only if it already exists.
    pub fn lease_existing(&self, key: &PartitionKey) -> Option<StateLease<'_>> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key)?;
        slot.leases += 1;
        Some(StateLease {
            store: self,
            key: key.clone(),
            state: Arc::clone(&slot.state),
        })
    }

    /// Leases every live partition, ordered by key.
    pub fn lease_all(&self) -> Vec<StateLease<'_>> {
        let mut slots = self.slots.lock();
        let mut leases: Vec<_> = slots
            .iter_mut()
            .map(|(key, slot)| {
                slot.leases += 1;
                StateLease {
                    store: self,
                    key: key.clone(),
                    state: Arc::clone(&slot.state),
                }
            })
            .collect();
        leases.sort_by(|a, b| a.key.cmp(&b.key));
        leases
    }

    /// Returns true if `key` has a live state.
    #[must_use]
    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Keys of all live partitions, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<_> = self.slots.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of live partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if no partition is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Sweeps every unleased partition whose destroy predicate holds.
    ///
    /// Returns the number of partitions reclaimed.
    pub fn reclaim(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|key, slot| {
            let keep = !Self::is_reclaimable(slot);
            if !keep {
                tracing::trace!(partition = %key, "partition state reclaimed");
                self.metrics.record_partition_reclaimed();
            }
            keep
        });
        before - slots.len()
    }

    fn is_reclaimable(slot: &Slot) -> bool {
        slot.leases == 0
            && slot
                .state
                .try_lock()
                .is_some_and(|state| state.can_destroy())
    }

    fn release(&self, key: &PartitionKey) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        slot.leases = slot.leases.saturating_sub(1);
        if Self::is_reclaimable(slot) {
            slots.remove(key);
            tracing::trace!(partition = %key, "partition state reclaimed");
            self.metrics.record_partition_reclaimed();
        }
    }
}

impl Default for PartitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PartitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStore")
            .field("partitions", &self.len())
            .finish_non_exhaustive()
    }
}

/// Scoped loan of one partition's state.
///
/// Dropping the lease returns it to the store.
pub struct StateLease<'a> {
    store: &'a PartitionStore,
    key: PartitionKey,
    state: Arc<Mutex<PartitionState>>,
}

impl StateLease<'_> {
    /// The leased partition.
    #[must_use]
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Acquires the partition's exclusive lock.
    pub fn lock(&self) -> MutexGuard<'_, PartitionState> {
        self.state.lock()
    }
}

impl Drop for StateLease<'_> {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}

impl std::fmt::Debug for StateLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateLease").field("key", &self.key).finish()
    }
}
