//! # Time Module
//!
//! Clocks, the scheduler seam and the keyed timer queue that drive periodic
//! snapshot emission.
//!
//! ## Key Concepts
//!
//! - **Clock**: Source of "now" in milliseconds. [`SystemClock`] for
//!   production, [`ManualClock`] for deterministic tests.
//! - **Scheduler**: Accepts "wake partition K at time T" requests.
//! - **Timer Service**: In-process [`Scheduler`] keeping at most one live
//!   deadline per partition.
//! - **Timer Driver**: Background thread that fires due timers into the
//!   rate limiter, see [`driver`].

pub mod driver;

pub use driver::{TimerDriver, TimerTarget};

use crate::event::PartitionKey;
use fxhash::FxHashMap;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Collection type for fired timers.
///
/// Uses `SmallVec` to avoid heap allocation when few timers fire per poll.
pub type FiredTimersVec = SmallVec<[TimerRegistration; 8]>;

/// Errors from the time subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    /// Driver thread could not be started
    #[error("failed to spawn timer driver: {0}")]
    SpawnFailed(String),

    /// Driver thread panicked
    #[error("timer driver thread panicked")]
    DriverPanicked,
}

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall clock: milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use laminar_ratelimit::time::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: i64) {
        self.now.store(now, AtomicOrdering::Release);
    }

    /// Moves the clock forward by `delta_ms` and returns the new time.
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now.fetch_add(delta_ms, AtomicOrdering::AcqRel) + delta_ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(AtomicOrdering::Acquire)
    }
}

/// Accepts wake-up requests on behalf of partitions.
///
/// Implementations deliver a TIMER for `(key, timestamp)` at approximately
/// `timestamp`. Re-arming may only move a partition's deadline forward:
/// a request earlier than or equal to the pending one is ignored. Moving a
/// deadline backwards takes an explicit [`Scheduler::cancel`] first.
pub trait Scheduler: Send + Sync {
    /// Requests a wake-up for `key` at `timestamp`.
    fn notify_at(&self, key: &PartitionKey, timestamp: i64);

    /// Drops the pending wake-up of `key`.
    ///
    /// Returns `true` if a wake-up was pending.
    fn cancel(&self, key: &PartitionKey) -> bool;
}

/// A timer registration for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRegistration {
    /// Unique registration ID
    pub id: u64,
    /// Scheduled timestamp in milliseconds
    pub timestamp: i64,
    /// Partition to wake
    pub key: PartitionKey,
}

impl Ord for TimerRegistration {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior (earliest first), then FIFO
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerRegistration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct TimerQueue {
    heap: BinaryHeap<TimerRegistration>,
    /// Live deadline per partition: (timestamp, registration id)
    pending: FxHashMap<PartitionKey, (i64, u64)>,
    next_id: u64,
    /// Bumped on every change a sleeping driver must observe.
    generation: u64,
}

impl TimerQueue {
    fn is_live(&self, reg: &TimerRegistration) -> bool {
        self.pending.get(&reg.key).is_some_and(|&(_, id)| id == reg.id)
    }

    /// Pops superseded or cancelled registrations off the top of the heap.
    fn prune_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Keyed timer queue shared between the rate limiter and a [`TimerDriver`].
///
/// Each partition has at most one live deadline. Re-arming a partition to a
/// later instant supersedes the earlier registration, which is skipped on
/// poll.
///
/// # Example
///
/// ```rust
/// use laminar_ratelimit::time::{Scheduler, TimerService};
/// use laminar_ratelimit::PartitionKey;
///
/// let service = TimerService::new();
/// let ibm = PartitionKey::from("IBM");
///
/// service.notify_at(&ibm, 1_000);
/// service.notify_at(&ibm, 2_000); // supersedes 1_000
/// service.notify_at(&ibm, 1_500); // earlier, ignored
///
/// assert!(service.poll_timers(1_999).is_empty());
/// let fired = service.poll_timers(2_000);
/// assert_eq!(fired.len(), 1);
/// assert_eq!(fired[0].timestamp, 2_000);
/// ```
#[derive(Debug, Default)]
pub struct TimerService {
    queue: Mutex<TimerQueue>,
    changed: Condvar,
}

impl TimerService {
    /// Creates an empty timer service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every live timer due at or before `current_time`,
    /// in timestamp order.
    #[inline]
    pub fn poll_timers(&self, current_time: i64) -> FiredTimersVec {
        let mut fired = FiredTimersVec::new();
        let mut queue = self.queue.lock();

        while let Some(top) = queue.heap.peek() {
            if top.timestamp > current_time {
                break;
            }
            let Some(reg) = queue.heap.pop() else {
                break;
            };
            if queue.is_live(&reg) {
                queue.pending.remove(&reg.key);
                fired.push(reg);
            }
        }
        queue.prune_stale();

        fired
    }

    /// Returns the pending deadline of `key`, if any.
    #[must_use]
    pub fn deadline(&self, key: &PartitionKey) -> Option<i64> {
        self.queue.lock().pending.get(key).map(|&(ts, _)| ts)
    }

    /// Returns the number of partitions with a pending deadline.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Returns the timestamp of the next timer to fire, if any.
    #[must_use]
    pub fn next_timer_timestamp(&self) -> Option<i64> {
        let mut queue = self.queue.lock();
        queue.prune_stale();
        queue.heap.peek().map(|t| t.timestamp)
    }

    /// Clears all pending timers.
    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        queue.heap.clear();
        queue.pending.clear();
        queue.touch();
        self.changed.notify_all();
    }

    /// Wakes any thread parked in [`TimerService::wait_for_change`].
    pub(crate) fn wake(&self) {
        self.queue.lock().touch();
        self.changed.notify_all();
    }

    /// Returns the next deadline together with the current change generation.
    pub(crate) fn observe(&self) -> (Option<i64>, u64) {
        let mut queue = self.queue.lock();
        queue.prune_stale();
        (queue.heap.peek().map(|t| t.timestamp), queue.generation)
    }

    /// Parks until the queue changes after `generation` or `timeout` elapses.
    pub(crate) fn wait_for_change(&self, generation: u64, timeout: Duration) {
        let mut queue = self.queue.lock();
        if queue.generation != generation {
            return;
        }
        let _ = self.changed.wait_for(&mut queue, timeout);
    }
}

impl Scheduler for TimerService {
    fn notify_at(&self, key: &PartitionKey, timestamp: i64) {
        let mut queue = self.queue.lock();
        if let Some(&(pending, _)) = queue.pending.get(key) {
            if timestamp <= pending {
                return;
            }
        }

        let id = queue.next_id;
        queue.next_id += 1;
        queue.pending.insert(key.clone(), (timestamp, id));
        queue.heap.push(TimerRegistration {
            id,
            timestamp,
            key: key.clone(),
        });
        queue.prune_stale();
        queue.touch();
        self.changed.notify_all();
    }

    fn cancel(&self, key: &PartitionKey) -> bool {
        let mut queue = self.queue.lock();
        let removed = queue.pending.remove(key).is_some();
        if removed {
            queue.prune_stale();
            queue.touch();
            self.changed.notify_all();
        }
        removed
    }
}
