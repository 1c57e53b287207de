//! Rate limiter counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for rate limiter activity.
///
/// Atomic so they can be read while other threads are processing. All
/// updates use relaxed ordering; values are monotonic between resets but not
/// mutually consistent at any single instant.
#[derive(Debug, Default)]
pub struct RateLimiterMetrics {
    /// Events absorbed by the state machine, TIMER included
    events_absorbed: AtomicU64,
    /// Snapshot batches emitted
    snapshots_emitted: AtomicU64,
    /// Events carried inside emitted snapshots
    snapshot_events: AtomicU64,
    /// EXPIRED signals that matched no live entry
    unmatched_expired: AtomicU64,
    /// Partition states created
    partitions_created: AtomicU64,
    /// Partition states reclaimed
    partitions_reclaimed: AtomicU64,
}

impl RateLimiterMetrics {
    /// Creates a new metrics tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of events absorbed.
    #[must_use]
    pub fn events_absorbed(&self) -> u64 {
        self.events_absorbed.load(Ordering::Relaxed)
    }

    /// Returns the number of snapshot batches emitted.
    #[must_use]
    pub fn snapshots_emitted(&self) -> u64 {
        self.snapshots_emitted.load(Ordering::Relaxed)
    }

    /// Returns the total number of events carried by emitted snapshots.
    #[must_use]
    pub fn snapshot_events(&self) -> u64 {
        self.snapshot_events.load(Ordering::Relaxed)
    }

    /// Returns the number of EXPIRED signals that matched nothing.
    #[must_use]
    pub fn unmatched_expired(&self) -> u64 {
        self.unmatched_expired.load(Ordering::Relaxed)
    }

    /// Returns the number of partition states created.
    #[must_use]
    pub fn partitions_created(&self) -> u64 {
        self.partitions_created.load(Ordering::Relaxed)
    }

    /// Returns the number of partition states reclaimed.
    #[must_use]
    pub fn partitions_reclaimed(&self) -> u64 {
        self.partitions_reclaimed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_absorbed(&self) {
        self.events_absorbed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot(&self, events: usize) {
        self.snapshots_emitted.fetch_add(1, Ordering::Relaxed);
        self.snapshot_events
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched_expired(&self) {
        self.unmatched_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_partition_created(&self) {
        self.partitions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_partition_reclaimed(&self) {
        self.partitions_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.events_absorbed.store(0, Ordering::Relaxed);
        self.snapshots_emitted.store(0, Ordering::Relaxed);
        self.snapshot_events.store(0, Ordering::Relaxed);
        self.unmatched_expired.store(0, Ordering::Relaxed);
        self.partitions_created.store(0, Ordering::Relaxed);
        self.partitions_reclaimed.store(0, Ordering::Relaxed);
    }
}
