//! Consumer wait strategies.
//!
//! A [`WaitStrategy`] converts "sequence not yet available" into a wait
//! action. Strategies are pure policy: they read the cursor through a
//! supplier closure and re-check a cancellation closure on every iteration,
//! aborting with [`Alerted`] as soon as it trips.
//!
//! Trade-off between the provided policies: [`SleepingWait`] (the default)
//! minimizes average latency at the cost of occasional latency spikes after
//! idle periods; [`BlockingWait`] parks on a condition variable, trading
//! latency for CPU efficiency; [`BusySpinWait`] burns a core for the lowest
//! possible latency.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::Alerted;

/// Pluggable wait policy for consumers (and blocked producers).
pub trait WaitStrategy: Send + Sync {
    /// Waits until the value reported by `cursor` reaches `sequence`.
    ///
    /// Returns the observed cursor value, which is at least `sequence`.
    ///
    /// # Errors
    ///
    /// Returns [`Alerted`] as soon as the `alert` check trips; the check is
    /// re-evaluated on every iteration so cancellation unwinds promptly.
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &dyn Fn() -> i64,
        alert: &dyn Fn() -> Result<(), Alerted>,
    ) -> Result<i64, Alerted>;

    /// Wakes any waiters parked on a shared monitor after a publish.
    ///
    /// No-op for strategies that never block on one.
    fn signal_all_when_blocking(&self) {}
}

/// The action a [`SleepingWait`] counter state maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backoff {
    Spin,
    Yield,
    Park,
}

/// Escalation step: spin while the counter is above the yield threshold,
/// yield while it is positive, then park ~1ns per iteration.
fn next_action(counter: i32, yield_threshold: i32) -> (Backoff, i32) {
    if counter > yield_threshold {
        (Backoff::Spin, counter - 1)
    } else if counter > 0 {
        (Backoff::Yield, counter - 1)
    } else {
        (Backoff::Park, counter)
    }
}

/// Progressive backoff: busy spin, then yield, then park.
///
/// Good compromise between latency and CPU burn; latency spikes can occur
/// after quiet periods once waiters have escalated to parking.
#[derive(Debug, Clone, Copy)]
pub struct SleepingWait {
    retries: i32,
}

/// Default total retries before parking (spin + yield phases).
pub const DEFAULT_RETRIES: i32 = 200;

/// Iterations of the yield phase within the retry budget.
const YIELD_THRESHOLD: i32 = 100;

impl SleepingWait {
    /// Creates the strategy with the default retry budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retries(DEFAULT_RETRIES)
    }

    /// Creates the strategy with a custom retry budget.
    #[must_use]
    pub fn with_retries(retries: i32) -> Self {
        Self { retries }
    }
}

impl Default for SleepingWait {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWait {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &dyn Fn() -> i64,
        alert: &dyn Fn() -> Result<(), Alerted>,
    ) -> Result<i64, Alerted> {
        let mut counter = self.retries;
        loop {
            let available = cursor();
            if available >= sequence {
                return Ok(available);
            }
            alert()?;

            let (action, next) = next_action(counter, YIELD_THRESHOLD);
            counter = next;
            match action {
                Backoff::Spin => std::hint::spin_loop(),
                Backoff::Yield => std::thread::yield_now(),
                Backoff::Park => std::thread::park_timeout(Duration::from_nanos(1)),
            }
        }
    }
}

/// Pure busy spin. Lowest latency, one core pinned at 100%.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusySpinWait;

impl WaitStrategy for BusySpinWait {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &dyn Fn() -> i64,
        alert: &dyn Fn() -> Result<(), Alerted>,
    ) -> Result<i64, Alerted> {
        loop {
            let available = cursor();
            if available >= sequence {
                return Ok(available);
            }
            alert()?;
            std::hint::spin_loop();
        }
    }
}

/// Parks on a condition variable until [`signal_all_when_blocking`] fires.
///
/// Waits use a short timeout so progress made without a signal (a gating
/// sequence advancing, an alert) is still observed.
///
/// [`signal_all_when_blocking`]: WaitStrategy::signal_all_when_blocking
#[derive(Debug, Default)]
pub struct BlockingWait {
    guard: Mutex<()>,
    cond: Condvar,
}

/// Upper bound on a single parked interval; bounds alert-detection latency.
const BLOCK_PARK_INTERVAL: Duration = Duration::from_millis(1);

impl BlockingWait {
    /// Creates the strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWait {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &dyn Fn() -> i64,
        alert: &dyn Fn() -> Result<(), Alerted>,
    ) -> Result<i64, Alerted> {
        let mut available = cursor();
        if available >= sequence {
            return Ok(available);
        }

        let mut guard = self.guard.lock().unwrap();
        loop {
            alert()?;
            available = cursor();
            if available >= sequence {
                return Ok(available);
            }
            guard = self.cond.wait_timeout(guard, BLOCK_PARK_INTERVAL).unwrap().0;
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.guard.lock().unwrap();
        self.cond.notify_all();
    }
}
