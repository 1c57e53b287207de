//! # Windowed Snapshot Rate Limiter
//!
//! Emits, once per interval, a copy of every event currently live in the
//! upstream window.
//!
//! ## How it works
//!
//! Each partition keeps the ordered list of live window entries and the next
//! instant a flush is due. Every incoming event first runs the flush check
//! and then mutates membership:
//!
//! | Kind     | Flush check | Membership        |
//! |----------|-------------|-------------------|
//! | TIMER    | yes         | unchanged         |
//! | CURRENT  | yes         | append            |
//! | EXPIRED  | yes         | remove first match|
//! | RESET    | yes         | clear             |
//!
//! A flush copies the list, advances the schedule by exactly one interval and
//! re-arms the [`Scheduler`]. At most one flush happens per event, so a burst
//! spanning several missed intervals catches up one event at a time.
//!
//! Snapshots are published to every subscribed [`OutputSink`] after all
//! partition locks of the call have been released.
//!
//! ## Example
//!
//! ```rust
//! use laminar_ratelimit::time::{ManualClock, TimerService};
//! use laminar_ratelimit::{
//!     CollectingSink, Event, RateLimiterConfig, StreamEvent, WindowedSnapshotRateLimiter,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let limiter = WindowedSnapshotRateLimiter::new(
//!     &RateLimiterConfig::new(Duration::from_secs(1)),
//!     Arc::new(TimerService::new()),
//!     Arc::new(ManualClock::new(0)),
//! )
//! .unwrap();
//! let sink = Arc::new(CollectingSink::new());
//! limiter.subscribe(sink.clone());
//!
//! limiter.process(vec![StreamEvent::from(Event::current(0, vec!["IBM".into()]))]);
//! // The very first event always flushes: the schedule starts unarmed.
//! assert_eq!(sink.drain().len(), 1);
//! ```

use crate::checkpoint::{
    CheckpointError, LimiterCheckpoint, OperatorState, PartitionCheckpoint, PartitionSnapshot,
};
use crate::config::{ConfigError, RateLimiterConfig};
use crate::event::{Event, EventKind, PartitionKey, StreamEvent};
use crate::metrics::RateLimiterMetrics;
use crate::sink::{OutputSink, SnapshotBatch};
use crate::state::PartitionState;
use crate::store::PartitionStore;
use crate::time::{Clock, Scheduler, TimerTarget};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

/// Snapshots produced by one call, usually zero or one.
type SnapshotBatches = SmallVec<[SnapshotBatch; 4]>;

/// Per-snapshot output rate limiter over a sliding window.
///
/// # Bootstrapping
///
/// Call [`on_partition_created`](Self::on_partition_created) for every
/// partition before feeding it, [`PartitionKey::global`] included. A
/// partition created lazily by its first event starts its schedule at the
/// zero origin and advances one interval per flush, so against wall-clock
/// timestamps it emits one snapshot of an unchanged window for every
/// interval since the epoch. The same catch-up applies after a stalled
/// timer driver: each delivered timer carries its own deadline.
pub struct WindowedSnapshotRateLimiter {
    interval_ms: i64,
    operator_id: String,
    store: PartitionStore,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    sinks: RwLock<Vec<Arc<dyn OutputSink>>>,
    metrics: Arc<RateLimiterMetrics>,
}

impl WindowedSnapshotRateLimiter {
    /// Creates a rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(
        config: &RateLimiterConfig,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let metrics = Arc::new(RateLimiterMetrics::new());
        Ok(Self {
            interval_ms: config.interval_ms()?,
            operator_id: config.resolve_operator_id(),
            store: PartitionStore::with_metrics(Arc::clone(&metrics)),
            scheduler,
            clock,
            sinks: RwLock::new(Vec::new()),
            metrics,
        })
    }

    /// Registers a sink for emitted snapshots.
    pub fn subscribe(&self, sink: Arc<dyn OutputSink>) {
        self.sinks.write().push(sink);
    }

    /// Returns the operator ID.
    #[must_use]
    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    /// Returns the flush interval in milliseconds.
    #[must_use]
    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    /// Returns the activity counters.
    #[must_use]
    pub fn metrics(&self) -> &RateLimiterMetrics {
        &self.metrics
    }

    /// Returns the number of live partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.store.len()
    }

    /// Sweeps reclaimable partitions. Returns how many were dropped.
    pub fn reclaim(&self) -> usize {
        self.store.reclaim()
    }

    /// Processes an ordered batch of events.
    ///
    /// Consecutive events of the same partition are handled under a single
    /// lease and lock. Returns the number of snapshots emitted.
    pub fn process<I>(&self, batch: I) -> usize
    where
        I: IntoIterator<Item = StreamEvent>,
    {
        let mut out = SnapshotBatches::new();
        let mut events = batch.into_iter().map(StreamEvent::into_parts).peekable();

        while let Some((key, first)) = events.next() {
            let lease = self.store.lease(&key);
            let mut state = lease.lock();
            self.absorb(&key, &mut state, first, &mut out);
            while let Some((_, event)) = events.next_if(|(next, _)| *next == key) {
                self.absorb(&key, &mut state, event, &mut out);
            }
        }

        self.publish(&out);
        out.len()
    }

    /// Arms a new partition's schedule one interval from now.
    ///
    /// Gives each partition its own cadence instead of one aligned to the
    /// zero origin. An already armed later schedule is kept.
    pub fn on_partition_created(&self, key: &PartitionKey) {
        let lease = self.store.lease(key);
        let mut state = lease.lock();
        let target = self.clock.now_ms().saturating_add(self.interval_ms);
        let next = state.scheduled_time().map_or(target, |s| s.max(target));
        state.schedule_at(next);
        self.scheduler.notify_at(key, next);
        tracing::trace!(partition = %key, next_flush = next, "partition schedule armed");
    }

    /// Handles a scheduler wake-up for `key` at `timestamp`.
    ///
    /// Runs the flush check only. Wake-ups for partitions that no longer
    /// exist are dropped. Returns the number of snapshots emitted.
    pub fn fire_timer(&self, key: &PartitionKey, timestamp: i64) -> usize {
        let mut out = SnapshotBatches::new();
        if let Some(lease) = self.store.lease_existing(key) {
            let mut state = lease.lock();
            self.absorb(key, &mut state, Event::timer(timestamp), &mut out);
        } else {
            tracing::trace!(partition = %key, timestamp, "timer for unknown partition dropped");
        }
        self.publish(&out);
        out.len()
    }

    /// Captures every live partition.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialization`] if encoding fails.
    pub fn checkpoint(&self) -> Result<OperatorState, CheckpointError> {
        let partitions = self
            .store
            .lease_all()
            .iter()
            .map(|lease| {
                let snapshot = lease.lock().snapshot();
                PartitionCheckpoint::new(lease.key(), snapshot)
            })
            .collect();
        let data = LimiterCheckpoint { partitions }.to_bytes()?;
        Ok(OperatorState {
            operator_id: self.operator_id.clone(),
            data,
        })
    }

    /// Replaces all partition state with a checkpoint.
    ///
    /// Partitions absent from the checkpoint are emptied, unscheduled and
    /// then reclaimed. Every restored schedule replaces the partition's
    /// pending wake-up, even when it is earlier.
    ///
    /// All affected partitions are locked for the whole call, so concurrent
    /// processing observes either the old state or the restored one.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the checkpoint belongs to another
    /// operator or cannot be decoded. State is untouched on error.
    pub fn restore(&self, state: &OperatorState) -> Result<(), CheckpointError> {
        if state.operator_id != self.operator_id {
            tracing::warn!(
                expected = %self.operator_id,
                actual = %state.operator_id,
                "checkpoint rejected: operator mismatch"
            );
            return Err(CheckpointError::OperatorMismatch {
                expected: self.operator_id.clone(),
                actual: state.operator_id.clone(),
            });
        }

        let checkpoint = LimiterCheckpoint::from_bytes(&state.data).inspect_err(|e| {
            tracing::warn!(operator_id = %self.operator_id, error = %e, "checkpoint rejected");
        })?;

        let mut incoming: FxHashMap<PartitionKey, PartitionSnapshot> = checkpoint
            .partitions
            .into_iter()
            .map(|p| (p.partition_key(), p.snapshot))
            .collect();
        let restored = incoming.len();

        let mut keys = self.store.keys();
        keys.extend(incoming.keys().cloned());
        keys.sort();
        keys.dedup();

        // Every affected partition stays locked until all of them are
        // replaced. Locks are taken in key order.
        let leases: Vec<_> = keys.iter().map(|key| self.store.lease(key)).collect();
        let mut guards: Vec<_> = leases.iter().map(|lease| lease.lock()).collect();
        for (lease, state) in leases.iter().zip(guards.iter_mut()) {
            let key = lease.key();
            match incoming.remove(key) {
                Some(snapshot) => self.reinstate(key, state, snapshot),
                None => {
                    self.scheduler.cancel(key);
                    state.membership_mut().clear();
                    state.unschedule();
                }
            }
        }
        drop(guards);
        drop(leases);

        tracing::debug!(operator_id = %self.operator_id, partitions = restored, "rate limiter restored");
        Ok(())
    }

    /// Returns a snapshot of one partition, if it exists.
    #[must_use]
    pub fn snapshot_partition(&self, key: &PartitionKey) -> Option<PartitionSnapshot> {
        let lease = self.store.lease_existing(key)?;
        let snapshot = lease.lock().snapshot();
        Some(snapshot)
    }

    /// Replaces one partition's state and re-arms its schedule.
    pub fn restore_partition(&self, key: &PartitionKey, snapshot: PartitionSnapshot) {
        let lease = self.store.lease(key);
        let mut state = lease.lock();
        self.reinstate(key, &mut state, snapshot);
    }

    fn reinstate(
        &self,
        key: &PartitionKey,
        state: &mut PartitionState,
        snapshot: PartitionSnapshot,
    ) {
        // The restored deadline may be earlier than the pending one.
        self.scheduler.cancel(key);
        state.restore(snapshot);
        if let Some(next) = state.scheduled_time() {
            self.scheduler.notify_at(key, next);
        }
    }

    fn absorb(
        &self,
        key: &PartitionKey,
        state: &mut PartitionState,
        event: Event,
        out: &mut SnapshotBatches,
    ) {
        self.metrics.record_absorbed();
        if let Some(batch) = self.try_flush(key, state, event.timestamp) {
            out.push(batch);
        }

        match event.kind {
            EventKind::Timer => {}
            EventKind::Current => state.membership_mut().push(event),
            EventKind::Expired => {
                if state.membership_mut().remove_first_match(&event).is_none() {
                    self.metrics.record_unmatched_expired();
                }
            }
            EventKind::Reset => state.membership_mut().clear(),
        }
    }

    fn try_flush(
        &self,
        key: &PartitionKey,
        state: &mut PartitionState,
        timestamp: i64,
    ) -> Option<SnapshotBatch> {
        if !state.is_flush_due(timestamp) {
            return None;
        }

        let events = state.copy_events();
        let next = state.advance_schedule(self.interval_ms);
        self.scheduler.notify_at(key, next);

        tracing::debug!(
            partition = %key,
            timestamp,
            events = events.len(),
            next_flush = next,
            "snapshot flushed"
        );
        self.metrics.record_snapshot(events.len());

        Some(SnapshotBatch {
            partition_key: key.clone(),
            timestamp,
            events,
        })
    }

    fn publish(&self, out: &[SnapshotBatch]) {
        if out.is_empty() {
            return;
        }
        let sinks = self.sinks.read().clone();
        for batch in out {
            for sink in &sinks {
                sink.on_snapshot(batch);
            }
        }
    }
}

impl TimerTarget for WindowedSnapshotRateLimiter {
    fn on_timer(&self, key: &PartitionKey, timestamp: i64) {
        self.fire_timer(key, timestamp);
    }
}

impl std::fmt::Debug for WindowedSnapshotRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedSnapshotRateLimiter")
            .field("operator_id", &self.operator_id)
            .field("interval_ms", &self.interval_ms)
            .field("partitions", &self.store.len())
            .field("sinks", &self.sinks.read().len())
            .finish_non_exhaustive()
    }
}
