//! Background thread that fires due timers.
//!
//! The driver sleeps until the earliest pending deadline, woken early when a
//! registration changes the queue, then polls the [`TimerService`] and hands
//! each fired timer to its [`TimerTarget`]. Delivery happens after the
//! timer-service lock is released, so the target is free to re-arm.

use super::{Clock, TimeError, TimerService};
use crate::event::PartitionKey;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on a single park, so clock jumps are noticed.
const MAX_PARK: Duration = Duration::from_millis(50);

/// Receiver of fired timers.
pub trait TimerTarget: Send + Sync {
    /// Called once per fired timer, in timestamp order.
    fn on_timer(&self, key: &PartitionKey, timestamp: i64);
}

/// Handle to a running timer thread.
///
/// Dropping the handle stops and joins the thread.
pub struct TimerDriver {
    timers: Arc<TimerService>,
    shutdown: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl TimerDriver {
    /// Starts a driver thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::SpawnFailed`] if the thread cannot be spawned.
    pub fn spawn(
        timers: Arc<TimerService>,
        clock: Arc<dyn Clock>,
        target: Arc<dyn TimerTarget>,
    ) -> Result<Self, TimeError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));

        let ctx = DriverContext {
            timers: Arc::clone(&timers),
            clock,
            target,
            shutdown: Arc::clone(&shutdown),
            delivered: Arc::clone(&delivered),
        };

        let thread = thread::Builder::new()
            .name("laminar-timer-driver".to_string())
            .spawn(move || ctx.run())
            .map_err(|e| TimeError::SpawnFailed(e.to_string()))?;

        tracing::debug!("timer driver started");

        Ok(Self {
            timers,
            shutdown,
            delivered,
            thread: Some(thread),
        })
    }

    /// Number of timers delivered so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns true until the thread has been asked to stop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    /// Signals the thread to stop and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::DriverPanicked`] if a timer target panicked.
    pub fn shutdown(mut self) -> Result<(), TimeError> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<(), TimeError> {
        self.shutdown.store(true, Ordering::Release);
        self.timers.wake();
        match self.thread.take() {
            Some(handle) => handle.join().map_err(|_| TimeError::DriverPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}

impl std::fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerDriver")
            .field("is_running", &self.is_running())
            .field("delivered", &self.delivered())
            .field("pending", &self.timers.pending_count())
            .finish_non_exhaustive()
    }
}

struct DriverContext {
    timers: Arc<TimerService>,
    clock: Arc<dyn Clock>,
    target: Arc<dyn TimerTarget>,
    shutdown: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
}

impl DriverContext {
    fn run(&self) {
        loop {
            // Read the generation before checking the flag so a concurrent
            // shutdown either is seen here or makes the park return at once.
            let (next, generation) = self.timers.observe();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let now = self.clock.now_ms();
            match next {
                Some(deadline) if deadline <= now => {
                    let fired = self.timers.poll_timers(now);
                    for timer in &fired {
                        self.target.on_timer(&timer.key, timer.timestamp);
                    }
                    self.delivered
                        .fetch_add(fired.len() as u64, Ordering::Relaxed);
                }
                Some(deadline) => {
                    let wait = u64::try_from(deadline.saturating_sub(now)).unwrap_or(0);
                    let park = Duration::from_millis(wait).min(MAX_PARK);
                    self.timers.wait_for_change(generation, park);
                }
                None => self.timers.wait_for_change(generation, MAX_PARK),
            }
        }
        tracing::debug!("timer driver stopped");
    }
}
