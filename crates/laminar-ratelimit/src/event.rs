//! # Event Model
//!
//! Events as seen by the rate limiter: a timestamp, a [`EventKind`] and the
//! projected output row. Grouped queries wrap events in a [`StreamEvent::Grouped`]
//! envelope carrying the [`PartitionKey`] they were routed to.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use smallvec::SmallVec;
use std::fmt;

/// Kind of an event flowing into the rate limiter.
///
/// The upstream window operator decides the kind; the limiter only reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, RkyvSerialize, RkyvDeserialize)]
pub enum EventKind {
    /// Event entered the window.
    Current,
    /// Event left the window.
    Expired,
    /// Synthetic wake-up delivered by the scheduler. Carries no data.
    Timer,
    /// Window reset boundary: flush, then discard all window state.
    Reset,
}

impl EventKind {
    /// Returns the canonical uppercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "CURRENT",
            Self::Expired => "EXPIRED",
            Self::Timer => "TIMER",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attribute value of an output row.
///
/// Equality mirrors boxed-value semantics: floating point values compare by
/// bit pattern, so `NaN == NaN` and `0.0 != -0.0`. Values of different
/// variants are never equal, even when numerically identical.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
pub enum Value {
    /// Missing value
    Null,
    /// Boolean attribute
    Bool(bool),
    /// 32-bit integer attribute
    Int(i32),
    /// 64-bit integer attribute
    Long(i64),
    /// Single precision attribute
    Float(f32),
    /// Double precision attribute
    Double(f64),
    /// String attribute
    String(String),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// An event as consumed by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct Event {
    /// Logical event time in milliseconds
    pub timestamp: i64,
    /// What happened to this event in the window
    pub kind: EventKind,
    /// Projected output row, compared element-wise for membership
    pub output_data: Vec<Value>,
}

impl Event {
    /// Creates an event with an explicit kind.
    #[must_use]
    pub fn new(timestamp: i64, kind: EventKind, output_data: Vec<Value>) -> Self {
        Self {
            timestamp,
            kind,
            output_data,
        }
    }

    /// Creates a CURRENT event.
    #[must_use]
    pub fn current(timestamp: i64, output_data: Vec<Value>) -> Self {
        Self::new(timestamp, EventKind::Current, output_data)
    }

    /// Creates an EXPIRED event.
    #[must_use]
    pub fn expired(timestamp: i64, output_data: Vec<Value>) -> Self {
        Self::new(timestamp, EventKind::Expired, output_data)
    }

    /// Creates a data-less TIMER event.
    #[must_use]
    pub fn timer(timestamp: i64) -> Self {
        Self::new(timestamp, EventKind::Timer, Vec::new())
    }

    /// Creates a data-less RESET event.
    #[must_use]
    pub fn reset(timestamp: i64) -> Self {
        Self::new(timestamp, EventKind::Reset, Vec::new())
    }
}

/// Identity of a group-by partition.
///
/// Keys are opaque bytes. Queries without grouping use [`PartitionKey::global`],
/// the empty key. Uses `SmallVec` to avoid heap allocation for keys up to
/// 16 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PartitionKey(SmallVec<[u8; 16]>);

impl PartitionKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self(SmallVec::from_slice(bytes))
    }

    /// The single partition used by ungrouped queries.
    #[must_use]
    pub fn global() -> Self {
        Self(SmallVec::new())
    }

    /// Returns true if this is the ungrouped partition.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for PartitionKey {
    fn from(key: &str) -> Self {
        Self::new(key.as_bytes())
    }
}

impl From<&[u8]> for PartitionKey {
    fn from(key: &[u8]) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("<global>")
        } else {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        }
    }
}

/// An event as delivered by the upstream operator, possibly wrapped in a
/// group-by envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Event of an ungrouped query
    Plain(Event),
    /// Event routed to a group-by partition
    Grouped {
        /// Partition the event belongs to
        key: PartitionKey,
        /// The wrapped event
        event: Event,
    },
}

impl StreamEvent {
    /// Wraps an event for the given partition.
    #[must_use]
    pub fn grouped(key: impl Into<PartitionKey>, event: Event) -> Self {
        Self::Grouped {
            key: key.into(),
            event,
        }
    }

    /// Returns the partition this event is routed to.
    #[must_use]
    pub fn partition_key(&self) -> PartitionKey {
        match self {
            Self::Plain(_) => PartitionKey::global(),
            Self::Grouped { key, .. } => key.clone(),
        }
    }

    /// Removes the envelope, returning the partition and the inner event.
    #[must_use]
    pub fn into_parts(self) -> (PartitionKey, Event) {
        match self {
            Self::Plain(event) => (PartitionKey::global(), event),
            Self::Grouped { key, event } => (key, event),
        }
    }
}

impl From<Event> for StreamEvent {
    fn from(event: Event) -> Self {
        Self::Plain(event)
    }
}
