//! Output sinks for finished snapshot batches.
//!
//! Implement [`OutputSink`] directly, or wrap a closure with [`FnSink`].

use crate::event::{Event, PartitionKey};
use parking_lot::Mutex;

/// One emitted snapshot: a point-in-time copy of a partition's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBatch {
    /// Partition the snapshot was taken from
    pub partition_key: PartitionKey,
    /// Timestamp of the event that triggered the flush
    pub timestamp: i64,
    /// Window entries in membership order
    pub events: Vec<Event>,
}

impl SnapshotBatch {
    /// Number of events in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the window was empty at flush time.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Receives snapshot batches from a rate limiter.
///
/// Called on the thread that triggered the flush, after every partition lock
/// of that call has been released.
pub trait OutputSink: Send + Sync + 'static {
    /// Called once per emitted snapshot, in emission order.
    fn on_snapshot(&self, batch: &SnapshotBatch);
}

/// Adapter that turns a closure into an [`OutputSink`].
///
/// ```rust
/// use laminar_ratelimit::{FnSink, OutputSink, SnapshotBatch};
///
/// let sink = FnSink::new(|batch: &SnapshotBatch| println!("{} rows", batch.len()));
/// # let _ = &sink as &dyn OutputSink;
/// ```
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(&SnapshotBatch) + Send + Sync + 'static,
{
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> OutputSink for FnSink<F>
where
    F: Fn(&SnapshotBatch) + Send + Sync + 'static,
{
    fn on_snapshot(&self, batch: &SnapshotBatch) {
        (self.0)(batch);
    }
}

/// Sink that buffers every batch until drained.
#[derive(Debug, Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<SnapshotBatch>>,
}

impl CollectingSink {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns all collected batches.
    pub fn drain(&self) -> Vec<SnapshotBatch> {
        std::mem::take(&mut *self.batches.lock())
    }

    /// Number of batches currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

impl OutputSink for CollectingSink {
    fn on_snapshot(&self, batch: &SnapshotBatch) {
        self.batches.lock().push(batch.clone());
    }
}
