//! Window membership bookkeeping.
//!
//! [`Membership`] is the ordered list of events currently live in a
//! partition's window. Insertion order is window order and decides which
//! duplicate an EXPIRED signal removes: the first match wins.

use crate::event::Event;
use std::collections::VecDeque;

/// Returns true if two events denote the same membership entry.
///
/// Only the output rows are compared, element-wise. Timestamps and kinds are
/// ignored: an EXPIRED event must match the CURRENT event it retracts.
#[inline]
#[must_use]
pub fn same_entry(a: &Event, b: &Event) -> bool {
    a.output_data == b.output_data
}

/// Ordered set of live window events for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    events: VecDeque<Event>,
}

impl Membership {
    /// Creates an empty membership list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event at the tail.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Removes the first entry equal to `event`.
    ///
    /// Returns the removed entry, or `None` if nothing matched.
    pub fn remove_first_match(&mut self, event: &Event) -> Option<Event> {
        let idx = self.events.iter().position(|e| same_entry(e, event))?;
        self.events.remove(idx)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Returns a deep, point-in-time copy of the entries in window order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Iterates over the entries in window order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no entry is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Vec<Event>> for Membership {
    fn from(events: Vec<Event>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Value;

    fn row(sym: &str, price: f64) -> Vec<Value> {
        vec![sym.into(), price.into()]
    }

    #[test]
    fn test_same_entry_ignores_time_and_kind() {
        let a = Event::current(1, row("IBM", 10.0));
        let b = Event::expired(99, row("IBM", 10.0));
        assert!(same_entry(&a, &b));
        assert!(!same_entry(&a, &Event::expired(1, row("IBM", 11.0))));
    }

    #[test]
    fn test_remove_first_match_takes_oldest_duplicate() {
        let mut members = Membership::new();
        members.push(Event::current(1, row("IBM", 10.0)));
        members.push(Event::current(2, row("WSO2", 5.0)));
        members.push(Event::current(3, row("IBM", 10.0)));

        let removed = members.remove_first_match(&Event::expired(4, row("IBM", 10.0)));
        assert_eq!(removed.map(|e| e.timestamp), Some(1));
        let left: Vec<_> = members.iter().map(|e| e.timestamp).collect();
        assert_eq!(left, vec![2, 3]);
    }

    #[test]
    fn test_remove_without_match_is_noop() {
        let mut members = Membership::from(vec![Event::current(1, row("IBM", 10.0))]);
        assert!(members
            .remove_first_match(&Event::expired(2, row("ORCL", 1.0)))
            .is_none());
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_copy_is_detached() {
        let mut members = Membership::new();
        members.push(Event::current(1, row("IBM", 10.0)));
        let copy = members.to_vec();
        members.clear();
        assert!(members.is_empty());
        assert_eq!(copy.len(), 1);
    }
}
