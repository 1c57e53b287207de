//! Per-partition rate limiter state.
//!
//! One [`PartitionState`] exists per group-by key (or a single one for
//! ungrouped queries). It is only ever touched while holding the partition's
//! lock, see [`crate::store`].

use crate::checkpoint::PartitionSnapshot;
use crate::event::Event;
use crate::membership::Membership;

/// Window snapshot and flush schedule of one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionState {
    membership: Membership,
    /// Next instant a flush is due. `None` until the first flush or partition
    /// creation arms it.
    scheduled_time: Option<i64>,
}

impl PartitionState {
    /// Creates an empty, unscheduled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live window entries.
    #[must_use]
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Mutable access to the live window entries.
    pub fn membership_mut(&mut self) -> &mut Membership {
        &mut self.membership
    }

    /// Next scheduled flush, if armed.
    #[must_use]
    pub fn scheduled_time(&self) -> Option<i64> {
        self.scheduled_time
    }

    /// Returns true if an event at `timestamp` is due to flush.
    ///
    /// An unarmed schedule is always due.
    #[inline]
    #[must_use]
    pub fn is_flush_due(&self, timestamp: i64) -> bool {
        self.scheduled_time.map_or(true, |scheduled| timestamp >= scheduled)
    }

    /// Advances the schedule by exactly one interval and returns the new
    /// deadline. An unarmed schedule advances from the zero origin.
    pub fn advance_schedule(&mut self, interval_ms: i64) -> i64 {
        let next = self
            .scheduled_time
            .unwrap_or(0)
            .saturating_add(interval_ms);
        self.scheduled_time = Some(next);
        next
    }

    /// Arms the schedule at an explicit instant.
    ///
    /// # Panics
    ///
    /// Panics if `timestamp` would move an armed schedule backwards.
    pub fn schedule_at(&mut self, timestamp: i64) {
        if let Some(current) = self.scheduled_time {
            assert!(
                timestamp >= current,
                "flush schedule must not move backwards ({timestamp} < {current})"
            );
        }
        self.scheduled_time = Some(timestamp);
    }

    /// Disarms the schedule, making an empty state reclaimable.
    pub fn unschedule(&mut self) {
        self.scheduled_time = None;
    }

    /// Deep copy of the window in membership order.
    #[must_use]
    pub fn copy_events(&self) -> Vec<Event> {
        self.membership.to_vec()
    }

    /// Destroy predicate: nothing to emit and nothing scheduled.
    #[must_use]
    pub fn can_destroy(&self) -> bool {
        self.membership.is_empty() && self.scheduled_time.is_none()
    }

    /// Captures the full state for checkpointing.
    #[must_use]
    pub fn snapshot(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            event_list: self.membership.to_vec(),
            scheduled_time: self.scheduled_time,
        }
    }

    /// Replaces both fields verbatim from a snapshot.
    ///
    /// The scheduler is not touched; re-arming is the caller's job.
    pub fn restore(&mut self, snapshot: PartitionSnapshot) {
        self.membership = Membership::from(snapshot.event_list);
        self.scheduled_time = snapshot.scheduled_time;
    }
}
