//! # `LaminarDB` Snapshot Rate Limiter
//!
//! Per-snapshot output rate limiting for sliding-window queries.
//!
//! A windowed query produces a stream of CURRENT (entered the window) and
//! EXPIRED (left the window) events. Instead of forwarding every change, the
//! rate limiter periodically emits the complete set of events live in the
//! window, once per configured interval and independently per group-by
//! partition.
//!
//! This crate provides:
//! - **Rate Limiter**: The per-partition state machine, see [`limiter`]
//! - **Partition Store**: Leased, reclaimable per-partition state
//! - **Time**: Clocks, the scheduler seam, a keyed timer queue and its driver
//! - **Checkpoints**: Versioned full-state snapshots
//!
//! ## Example
//!
//! ```rust
//! use laminar_ratelimit::time::{ManualClock, TimerService};
//! use laminar_ratelimit::{
//!     CollectingSink, Event, PartitionKey, RateLimiterConfig, StreamEvent, Value,
//!     WindowedSnapshotRateLimiter,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let limiter = WindowedSnapshotRateLimiter::new(
//!     &RateLimiterConfig::new(Duration::from_millis(1000)),
//!     Arc::new(TimerService::new()),
//!     clock,
//! )?;
//! let sink = Arc::new(CollectingSink::new());
//! limiter.subscribe(sink.clone());
//!
//! limiter.on_partition_created(&PartitionKey::global());
//! limiter.process(vec![
//!     StreamEvent::from(Event::current(500, vec!["A".into()])),
//!     StreamEvent::from(Event::current(1200, vec!["B".into()])),
//! ]);
//!
//! let batches = sink.drain();
//! assert_eq!(batches.len(), 1);
//! assert_eq!(batches[0].events[0].output_data, vec![Value::from("A")]);
//! # Ok::<(), laminar_ratelimit::Error>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checkpoint;
pub mod config;
pub mod event;
pub mod limiter;
pub mod membership;
pub mod metrics;
pub mod sink;
pub mod state;
pub mod store;
pub mod time;

// Re-export key types
pub use checkpoint::{CheckpointError, OperatorState, PartitionSnapshot};
pub use config::{ConfigError, RateLimiterConfig};
pub use event::{Event, EventKind, PartitionKey, StreamEvent, Value};
pub use limiter::WindowedSnapshotRateLimiter;
pub use metrics::RateLimiterMetrics;
pub use sink::{CollectingSink, FnSink, OutputSink, SnapshotBatch};

/// Result type for laminar-ratelimit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for laminar-ratelimit
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Time-related errors
    #[error("Time error: {0}")]
    Time(#[from] time::TimeError),
}
